use std::env;

use anyhow::Context;

use crate::models::WeeklyHours;
use crate::services::scheduling::DEFAULT_SLOT_GRANULARITY;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CalendarProvider {
    None,
    Google,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub business_name: String,
    pub business_hours: WeeklyHours,
    pub slot_granularity_minutes: u32,
    pub seed_services: bool,
    pub calendar_provider: CalendarProvider,
    pub google_calendar_id: String,
    pub google_calendar_token: String,
    pub calendar_timezone: String,
    /// Requests allowed per client IP per window; 0 disables limiting.
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: "parlor.db".to_string(),
            business_name: "Parlor".to_string(),
            business_hours: WeeklyHours::default(),
            slot_granularity_minutes: DEFAULT_SLOT_GRANULARITY,
            seed_services: true,
            calendar_provider: CalendarProvider::None,
            google_calendar_id: "primary".to_string(),
            google_calendar_token: String::new(),
            calendar_timezone: "America/New_York".to_string(),
            rate_limit_max_requests: 100,
            rate_limit_window_secs: 15 * 60,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let business_hours = match env::var("BUSINESS_HOURS") {
            Ok(raw) if !raw.trim().is_empty() => {
                WeeklyHours::from_json(&raw).context("invalid BUSINESS_HOURS")?
            }
            _ => defaults.business_hours,
        };

        let slot_granularity_minutes = match env::var("SLOT_GRANULARITY_MINUTES") {
            Ok(raw) => {
                let minutes: u32 = raw
                    .trim()
                    .parse()
                    .context("SLOT_GRANULARITY_MINUTES must be a positive integer")?;
                anyhow::ensure!(minutes > 0, "SLOT_GRANULARITY_MINUTES must be greater than zero");
                minutes
            }
            Err(_) => defaults.slot_granularity_minutes,
        };

        let calendar_provider = match env::var("CALENDAR_PROVIDER")
            .unwrap_or_default()
            .trim()
            .to_lowercase()
            .as_str()
        {
            "" | "none" => CalendarProvider::None,
            "google" => CalendarProvider::Google,
            other => anyhow::bail!("unknown CALENDAR_PROVIDER: {other}"),
        };

        let rate_limit_max_requests = match env::var("RATE_LIMIT_MAX_REQUESTS") {
            Ok(raw) => raw
                .trim()
                .parse()
                .context("RATE_LIMIT_MAX_REQUESTS must be a non-negative integer")?,
            Err(_) => defaults.rate_limit_max_requests,
        };

        let rate_limit_window_secs = match env::var("RATE_LIMIT_WINDOW_SECS") {
            Ok(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .context("RATE_LIMIT_WINDOW_SECS must be a positive integer")?;
                anyhow::ensure!(secs > 0, "RATE_LIMIT_WINDOW_SECS must be greater than zero");
                secs
            }
            Err(_) => defaults.rate_limit_window_secs,
        };

        Ok(Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            business_name: env::var("BUSINESS_NAME").unwrap_or(defaults.business_name),
            business_hours,
            slot_granularity_minutes,
            seed_services: env::var("SEED_SERVICES")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no"))
                .unwrap_or(defaults.seed_services),
            calendar_provider,
            google_calendar_id: env::var("GOOGLE_CALENDAR_ID")
                .unwrap_or(defaults.google_calendar_id),
            google_calendar_token: env::var("GOOGLE_CALENDAR_TOKEN").unwrap_or_default(),
            calendar_timezone: env::var("CALENDAR_TIMEZONE").unwrap_or(defaults.calendar_timezone),
            rate_limit_max_requests,
            rate_limit_window_secs,
        })
    }
}
