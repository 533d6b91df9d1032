use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use super::time::{parse_time, TimeOfDay, TimeRange};

const DAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// Opening window for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusinessHours {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl BusinessHours {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    pub fn window_minutes(&self) -> u32 {
        self.end.minutes().saturating_sub(self.start.minutes())
    }

    /// True when the whole interval fits inside opening hours.
    pub fn contains(&self, range: &TimeRange) -> bool {
        range.start >= self.start && range.end > range.start && range.end <= self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayHours {
    pub day: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WeeklyHoursJson {
    days: Vec<DayHours>,
}

/// Opening hours per weekday. Days without an entry are closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyHours {
    days: [Option<BusinessHours>; 7],
}

impl Default for WeeklyHours {
    /// Monday to Saturday 09:00-19:00, closed Sundays.
    fn default() -> Self {
        let open = TimeOfDay::from_hm(9, 0)
            .zip(TimeOfDay::from_hm(19, 0))
            .map(|(start, end)| BusinessHours::new(start, end));
        let mut days = [open; 7];
        days[Weekday::Sun.num_days_from_monday() as usize] = None;
        Self { days }
    }
}

impl WeeklyHours {
    pub fn closed() -> Self {
        Self { days: [None; 7] }
    }

    pub fn with_day(mut self, day: Weekday, hours: Option<BusinessHours>) -> Self {
        self.days[day.num_days_from_monday() as usize] = hours;
        self
    }

    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let parsed: WeeklyHoursJson = serde_json::from_str(s)?;
        let mut weekly = Self::closed();

        for entry in &parsed.days {
            let day = parse_weekday(&entry.day)?;
            let idx = day.num_days_from_monday() as usize;
            if weekly.days[idx].is_some() {
                anyhow::bail!("duplicate business hours for {}", entry.day);
            }

            let start = parse_time(&entry.start)?;
            let end = parse_time(&entry.end)?;
            if start >= end {
                anyhow::bail!(
                    "business hours for {} must open before they close ({}-{})",
                    entry.day,
                    entry.start,
                    entry.end
                );
            }
            weekly.days[idx] = Some(BusinessHours::new(start, end));
        }

        Ok(weekly)
    }

    pub fn for_weekday(&self, day: Weekday) -> Option<BusinessHours> {
        self.days[day.num_days_from_monday() as usize]
    }

    pub fn hours_for(&self, date: NaiveDate) -> Option<BusinessHours> {
        self.for_weekday(date.weekday())
    }

    pub fn to_human_readable(&self) -> String {
        self.days
            .iter()
            .zip(DAY_NAMES)
            .filter_map(|(hours, name)| {
                hours.map(|h| format!("{}: {}-{}", capitalize(name), h.start, h.end))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().to_string() + &c.as_str().to_lowercase(),
    }
}

fn parse_weekday(s: &str) -> anyhow::Result<Weekday> {
    match s.to_lowercase().as_str() {
        "mon" => Ok(Weekday::Mon),
        "tue" => Ok(Weekday::Tue),
        "wed" => Ok(Weekday::Wed),
        "thu" => Ok(Weekday::Thu),
        "fri" => Ok(Weekday::Fri),
        "sat" => Ok(Weekday::Sat),
        "sun" => Ok(Weekday::Sun),
        _ => Err(anyhow::anyhow!("invalid weekday: {s}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        parse_time(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_valid_json() {
        let json = r#"{"days":[{"day":"mon","start":"09:00","end":"17:00"},{"day":"Sat","start":"10:00","end":"18:00"}]}"#;
        let hours = WeeklyHours::from_json(json).unwrap();
        assert_eq!(
            hours.for_weekday(Weekday::Mon),
            Some(BusinessHours::new(t("09:00"), t("17:00")))
        );
        assert_eq!(
            hours.for_weekday(Weekday::Sat),
            Some(BusinessHours::new(t("10:00"), t("18:00")))
        );
        assert_eq!(hours.for_weekday(Weekday::Tue), None);
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(WeeklyHours::from_json("not json").is_err());
    }

    #[test]
    fn test_parse_invalid_day() {
        let json = r#"{"days":[{"day":"xyz","start":"09:00","end":"17:00"}]}"#;
        assert!(WeeklyHours::from_json(json).is_err());
    }

    #[test]
    fn test_parse_invalid_time() {
        let json = r#"{"days":[{"day":"mon","start":"25:00","end":"17:00"}]}"#;
        assert!(WeeklyHours::from_json(json).is_err());
    }

    #[test]
    fn test_parse_inverted_window() {
        let json = r#"{"days":[{"day":"mon","start":"17:00","end":"09:00"}]}"#;
        assert!(WeeklyHours::from_json(json).is_err());
    }

    #[test]
    fn test_parse_duplicate_day() {
        let json = r#"{"days":[{"day":"mon","start":"09:00","end":"12:00"},{"day":"mon","start":"13:00","end":"17:00"}]}"#;
        assert!(WeeklyHours::from_json(json).is_err());
    }

    #[test]
    fn test_default_closed_sunday() {
        let hours = WeeklyHours::default();
        // 2024-02-18 is a Sunday, 2024-02-15 a Thursday
        assert_eq!(hours.hours_for(date("2024-02-18")), None);
        assert_eq!(
            hours.hours_for(date("2024-02-15")),
            Some(BusinessHours::new(t("09:00"), t("19:00")))
        );
    }

    #[test]
    fn test_contains() {
        let hours = BusinessHours::new(t("09:00"), t("19:00"));
        assert!(hours.contains(&TimeRange::new(t("09:00"), t("10:00"))));
        assert!(hours.contains(&TimeRange::new(t("18:00"), t("19:00"))));
        assert!(!hours.contains(&TimeRange::new(t("08:30"), t("09:30"))));
        assert!(!hours.contains(&TimeRange::new(t("18:30"), t("19:30"))));
        // Wrapped past midnight
        assert!(!hours.contains(&TimeRange::new(t("18:30"), t("00:30"))));
    }

    #[test]
    fn test_to_human_readable() {
        let json = r#"{"days":[{"day":"fri","start":"10:00","end":"16:00"},{"day":"mon","start":"09:00","end":"17:00"}]}"#;
        let hours = WeeklyHours::from_json(json).unwrap();
        assert_eq!(hours.to_human_readable(), "Mon: 09:00-17:00, Fri: 10:00-16:00");
    }

    #[test]
    fn test_to_human_readable_closed() {
        assert_eq!(WeeklyHours::closed().to_human_readable(), "");
    }
}
