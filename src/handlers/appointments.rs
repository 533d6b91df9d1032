use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::{json_body, lock_db, query_params, Page, Paginated};
use crate::db::queries::{self, AppointmentFilter};
use crate::errors::AppError;
use crate::models::{
    parse_date, parse_time, AppointmentDetails, AppointmentStatus, NewCustomer, PaymentStatus,
};
use crate::services::booking::{
    AppointmentChanges, AvailabilityReport, BookingOutcome, BookingRequest, CustomerRef,
    DEFAULT_CANCELLED_BY,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AppointmentQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<AppointmentStatus>,
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub service_id: Option<i64>,
}

/// Either `customer_id` of a known customer or `customer` contact details.
#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub customer_id: Option<i64>,
    pub customer: Option<NewCustomer>,
    pub service_id: i64,
    pub appointment_date: String,
    pub start_time: String,
    pub special_requests: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub appointment_date: Option<String>,
    pub start_time: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub special_requests: Option<String>,
    pub notes: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub customer_id: Option<serde_json::Value>,
    pub service_id: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub cancelled_by: Option<String>,
}

// GET /api/appointments
pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    query: Result<Query<AppointmentQuery>, QueryRejection>,
) -> Result<Json<Paginated<AppointmentDetails>>, AppError> {
    let query = query_params(query)?;
    let page = Page::new(query.page, query.limit);
    let filter = AppointmentFilter {
        status: query.status,
        date: query.date.as_deref().map(parse_date).transpose()?,
        customer_id: None,
    };

    let db = lock_db(&state)?;
    let (appointments, total) =
        queries::list_appointment_details(&db, &filter, false, page.limit, page.offset())?;
    Ok(Json(Paginated::new(appointments, total, page)))
}

// GET /api/appointments/:id
pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<AppointmentDetails>, AppError> {
    let db = lock_db(&state)?;
    queries::get_appointment_details(&db, id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("appointment {id}")))
}

// POST /api/appointments
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateAppointmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BookingOutcome>), AppError> {
    let req = json_body(payload)?;

    let customer = match (req.customer_id, req.customer) {
        (Some(id), _) => CustomerRef::Id(id),
        (None, Some(details)) => CustomerRef::Details(details),
        (None, None) => {
            return Err(AppError::InvalidInput(
                "customer or customer_id is required".to_string(),
            ))
        }
    };

    let request = BookingRequest {
        customer,
        service_id: req.service_id,
        date: parse_date(&req.appointment_date)?,
        start_time: parse_time(&req.start_time)?,
        special_requests: req.special_requests.filter(|s| !s.trim().is_empty()),
    };

    let outcome = state.booking.create(request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

// PUT /api/appointments/:id
pub async fn update_appointment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: Result<Json<UpdateAppointmentRequest>, JsonRejection>,
) -> Result<Json<BookingOutcome>, AppError> {
    let req = json_body(payload)?;

    if req.customer_id.is_some() || req.service_id.is_some() {
        return Err(AppError::InvalidInput(
            "customer_id and service_id cannot be changed".to_string(),
        ));
    }

    let changes = AppointmentChanges {
        date: req.appointment_date.as_deref().map(parse_date).transpose()?,
        start_time: req.start_time.as_deref().map(parse_time).transpose()?,
        status: req.status,
        special_requests: req.special_requests,
        notes: req.notes,
        payment_status: req.payment_status,
    };

    Ok(Json(state.booking.update(id, changes).await?))
}

// DELETE /api/appointments/:id
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<BookingOutcome>, AppError> {
    let req: CancelRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CancelRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::InvalidInput(format!("invalid JSON body: {e}")))?
    };

    let actor = req
        .cancelled_by
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CANCELLED_BY.to_string());

    Ok(Json(state.booking.cancel(id, &actor).await?))
}

// GET /api/appointments/availability/:date?service_id=
pub async fn availability(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> Result<Json<AvailabilityReport>, AppError> {
    let query = query_params(query)?;
    let date = parse_date(&date)?;
    let service_id = query
        .service_id
        .ok_or_else(|| AppError::InvalidInput("service_id is required".to_string()))?;

    Ok(Json(state.booking.availability(date, service_id)?))
}
