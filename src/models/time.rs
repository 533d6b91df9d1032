use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::SchedulingError;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Wall-clock time within a single day, stored as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u32);

impl TimeOfDay {
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(TimeOfDay(minutes))
    }

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(TimeOfDay(hour * 60 + minute))
    }

    pub fn minutes(self) -> u32 {
        self.0
    }

    /// Parses a 24h `HH:MM` string.
    pub fn parse(s: &str) -> Result<Self, SchedulingError> {
        parse_time(s)
    }

    /// Adds `duration` minutes, wrapping within the same day.
    pub fn add_minutes(self, duration: u32) -> Self {
        TimeOfDay((self.0 + duration % MINUTES_PER_DAY) % MINUTES_PER_DAY)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_time(&s).map_err(serde::de::Error::custom)
    }
}

pub fn parse_time(s: &str) -> Result<TimeOfDay, SchedulingError> {
    let invalid = || SchedulingError::InvalidFormat(format!("expected HH:MM time, got {s:?}"));

    let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
    let digits = |part: &str, max_len: usize| {
        !part.is_empty() && part.len() <= max_len && part.bytes().all(|b| b.is_ascii_digit())
    };
    if !digits(hour, 2) || !digits(minute, 2) || minute.len() != 2 {
        return Err(invalid());
    }

    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    TimeOfDay::from_hm(hour, minute).ok_or_else(invalid)
}

pub fn parse_date(s: &str) -> Result<NaiveDate, SchedulingError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| SchedulingError::InvalidFormat(format!("expected YYYY-MM-DD date, got {s:?}")))
}

/// Half-open interval test: touching intervals do not overlap.
pub fn overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && a_end > b_start
}

/// A `[start, end)` interval on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(rename = "start_time")]
    pub start: TimeOfDay,
    #[serde(rename = "end_time")]
    pub end: TimeOfDay,
}

impl TimeRange {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: TimeOfDay, duration: u32) -> Self {
        Self {
            start,
            end: start.add_minutes(duration),
        }
    }

    pub fn duration_minutes(&self) -> u32 {
        self.end.minutes().saturating_sub(self.start.minutes())
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
