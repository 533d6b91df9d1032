pub mod appointments;
pub mod calendar;
pub mod customers;
pub mod health;
pub mod services;

use std::sync::{Arc, MutexGuard};

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::Query;
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderValue, Uri};
use axum::routing::get;
use axum::{middleware, Json, Router};
use rusqlite::Connection;
use serde::Serialize;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::errors::AppError;
use crate::rate_limiter::rate_limit;
use crate::state::AppState;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Response headers applied to every route unless a handler already set them.
const SECURITY_HEADERS: [(HeaderName, &str); 9] = [
    (header::CONTENT_SECURITY_POLICY, "default-src 'self'; frame-ancestors 'self'; object-src 'none'"),
    (header::STRICT_TRANSPORT_SECURITY, "max-age=15552000; includeSubDomains"),
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "SAMEORIGIN"),
    (header::X_DNS_PREFETCH_CONTROL, "off"),
    (header::X_XSS_PROTECTION, "0"),
    (header::REFERRER_POLICY, "no-referrer"),
    (HeaderName::from_static("cross-origin-opener-policy"), "same-origin"),
    (HeaderName::from_static("cross-origin-resource-policy"), "same-origin"),
];

pub fn router(state: Arc<AppState>) -> Router {
    let limiter = Arc::clone(&state.rate_limiter);

    let mut app = Router::new()
        .route("/health", get(health::health))
        .route(
            "/api/services",
            get(services::list_services).post(services::create_service),
        )
        .route("/api/services/categories", get(services::list_categories))
        .route(
            "/api/services/:id",
            get(services::get_service)
                .put(services::update_service)
                .delete(services::delete_service),
        )
        .route(
            "/api/customers",
            get(customers::list_customers).post(customers::create_customer),
        )
        .route(
            "/api/customers/:id",
            get(customers::get_customer)
                .put(customers::update_customer)
                .delete(customers::delete_customer),
        )
        .route(
            "/api/customers/:id/appointments",
            get(customers::customer_appointments),
        )
        .route(
            "/api/appointments",
            get(appointments::list_appointments).post(appointments::create_appointment),
        )
        .route(
            "/api/appointments/availability/:date",
            get(appointments::availability),
        )
        .route(
            "/api/appointments/:id",
            get(appointments::get_appointment)
                .put(appointments::update_appointment)
                .delete(appointments::cancel_appointment),
        )
        .route(
            "/api/appointments/:id/calendar.ics",
            get(calendar::download_ics),
        )
        .route("/api/calendar/feed.ics", get(calendar::calendar_feed))
        .fallback(route_not_found)
        .with_state(state);

    if limiter.enabled() {
        app = app.layer(middleware::from_fn_with_state(limiter, rate_limit));
    }
    for (name, value) in SECURITY_HEADERS {
        app = app.layer(SetResponseHeaderLayer::if_not_present(
            name,
            HeaderValue::from_static(value),
        ));
    }
    app
}

async fn route_not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("route {}", uri.path()))
}

pub(crate) fn lock_db(state: &AppState) -> Result<MutexGuard<'_, Connection>, AppError> {
    state
        .db
        .lock()
        .map_err(|_| AppError::Unavailable("database connection lock poisoned".to_string()))
}

/// Page number and size from query parameters, clamped to sane bounds.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub total_pages: i64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, page: Page) -> Self {
        Self {
            items,
            total,
            page: page.page,
            total_pages: (total + page.limit - 1) / page.limit,
        }
    }
}

/// Unwraps a JSON body, reporting malformed input as a 400.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| AppError::InvalidInput(e.body_text()))
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    query
        .map(|Query(value)| value)
        .map_err(|e| AppError::InvalidInput(e.body_text()))
}

pub(crate) fn require(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{field} is required")));
    }
    Ok(())
}
