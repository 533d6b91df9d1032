use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{json_body, lock_db, query_params, require, Page, Paginated};
use crate::db::queries::{self, AppointmentFilter, CustomerFilter};
use crate::errors::AppError;
use crate::models::customer::validate_email;
use crate::models::{AppointmentDetails, AppointmentStatus, Customer, CustomerPatch, NewCustomer};
use crate::state::AppState;

const RECENT_APPOINTMENTS: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct CustomerQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerAppointmentsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Serialize)]
pub struct CustomerWithAppointments {
    #[serde(flatten)]
    pub customer: Customer,
    pub appointments: Vec<AppointmentDetails>,
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("customer {id}"))
}

fn email_taken(email: &str) -> AppError {
    AppError::Conflict(format!("a customer with email {email} already exists"))
}

// GET /api/customers
pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CustomerQuery>, QueryRejection>,
) -> Result<Json<Paginated<Customer>>, AppError> {
    let query = query_params(query)?;
    let page = Page::new(query.page, query.limit);
    let filter = CustomerFilter {
        search: query.search.as_deref(),
        is_active: query.is_active,
    };

    let db = lock_db(&state)?;
    let (customers, total) = queries::list_customers(&db, &filter, page.limit, page.offset())?;
    Ok(Json(Paginated::new(customers, total, page)))
}

// GET /api/customers/:id
pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<CustomerWithAppointments>, AppError> {
    let db = lock_db(&state)?;
    let customer = queries::get_customer(&db, id)?.ok_or_else(|| not_found(id))?;

    let filter = AppointmentFilter {
        customer_id: Some(id),
        ..Default::default()
    };
    let (appointments, _) =
        queries::list_appointment_details(&db, &filter, true, RECENT_APPOINTMENTS, 0)?;

    Ok(Json(CustomerWithAppointments {
        customer,
        appointments,
    }))
}

// POST /api/customers
pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewCustomer>, JsonRejection>,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    let new = json_body(payload)?;
    require("name", &new.name)?;
    validate_email(&new.email).map_err(AppError::InvalidInput)?;

    let db = lock_db(&state)?;
    if queries::get_customer_by_email(&db, &new.email)?.is_some() {
        return Err(email_taken(&new.email));
    }

    let customer = queries::create_customer(&db, &new)?;
    tracing::info!(customer_id = customer.id, "customer created");
    Ok((StatusCode::CREATED, Json(customer)))
}

// PUT /api/customers/:id
pub async fn update_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: Result<Json<CustomerPatch>, JsonRejection>,
) -> Result<Json<Customer>, AppError> {
    let patch = json_body(payload)?;

    let db = lock_db(&state)?;
    let mut customer = queries::get_customer(&db, id)?.ok_or_else(|| not_found(id))?;

    if let Some(email) = &patch.email {
        validate_email(email).map_err(AppError::InvalidInput)?;
        if let Some(other) = queries::get_customer_by_email(&db, email)? {
            if other.id != id {
                return Err(email_taken(email));
            }
        }
    }

    patch.apply(&mut customer);
    require("name", &customer.name)?;

    queries::save_customer(&db, &customer)?;
    let customer = queries::get_customer(&db, id)?.ok_or_else(|| not_found(id))?;
    Ok(Json(customer))
}

// DELETE /api/customers/:id
pub async fn delete_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let db = lock_db(&state)?;
    let mut customer = queries::get_customer(&db, id)?.ok_or_else(|| not_found(id))?;

    let active = queries::count_active_appointments_for_customer(&db, id)?;
    if active > 0 {
        let body = json!({
            "error": format!("customer {id} has {active} pending or confirmed appointment(s)"),
            "active_appointments": active,
        });
        return Ok((StatusCode::CONFLICT, Json(body)).into_response());
    }

    customer.is_active = false;
    queries::save_customer(&db, &customer)?;
    tracing::info!(customer_id = id, "customer deactivated");

    let customer = queries::get_customer(&db, id)?.ok_or_else(|| not_found(id))?;
    Ok(Json(customer).into_response())
}

// GET /api/customers/:id/appointments
pub async fn customer_appointments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    query: Result<Query<CustomerAppointmentsQuery>, QueryRejection>,
) -> Result<Json<Paginated<AppointmentDetails>>, AppError> {
    let query = query_params(query)?;
    let page = Page::new(query.page, query.limit);

    let db = lock_db(&state)?;
    if queries::get_customer(&db, id)?.is_none() {
        return Err(not_found(id));
    }

    let filter = AppointmentFilter {
        customer_id: Some(id),
        status: query.status,
        ..Default::default()
    };
    let (appointments, total) =
        queries::list_appointment_details(&db, &filter, true, page.limit, page.offset())?;
    Ok(Json(Paginated::new(appointments, total, page)))
}
