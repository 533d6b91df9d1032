use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::db::SqliteStore;
use crate::rate_limiter::RateLimiter;
use crate::services::booking::BookingService;
use crate::services::calendar::CalendarSync;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub booking: BookingService,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Wires the booking orchestrator to `conn` and `calendar`.
    pub fn new(conn: Connection, config: AppConfig, calendar: Arc<dyn CalendarSync>) -> Self {
        let db = Arc::new(Mutex::new(conn));
        let booking = BookingService::new(
            Arc::new(SqliteStore::new(Arc::clone(&db))),
            calendar,
            config.business_hours.clone(),
            config.slot_granularity_minutes,
        );

        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max_requests,
            Duration::from_secs(config.rate_limit_window_secs),
        ));

        Self {
            db,
            config,
            booking,
            rate_limiter,
        }
    }
}
