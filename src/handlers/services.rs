use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::{json_body, lock_db, query_params, require};
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{NewService, Service, ServicePatch};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

fn validate(name: &str, slug: &str, duration_minutes: u32) -> Result<(), AppError> {
    require("name", name)?;
    require("slug", slug)?;
    if duration_minutes == 0 {
        return Err(AppError::InvalidInput(
            "duration_minutes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

// GET /api/services
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ServiceQuery>, QueryRejection>,
) -> Result<Json<Vec<Service>>, AppError> {
    let query = query_params(query)?;
    let db = lock_db(&state)?;
    let services = queries::list_services(&db, query.category.as_deref(), query.is_active)?;
    Ok(Json(services))
}

// GET /api/services/categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, AppError> {
    let db = lock_db(&state)?;
    Ok(Json(queries::list_categories(&db)?))
}

// GET /api/services/:id
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Service>, AppError> {
    let db = lock_db(&state)?;
    queries::get_service(&db, id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("service {id}")))
}

// POST /api/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewService>, JsonRejection>,
) -> Result<(StatusCode, Json<Service>), AppError> {
    let new = json_body(payload)?;
    validate(&new.name, &new.slug, new.duration_minutes)?;

    let db = lock_db(&state)?;
    if queries::get_service_by_slug(&db, &new.slug)?.is_some() {
        return Err(AppError::Conflict(format!(
            "service slug '{}' already exists",
            new.slug
        )));
    }

    let service = queries::create_service(&db, &new)?;
    tracing::info!(service_id = service.id, slug = %service.slug, "service created");
    Ok((StatusCode::CREATED, Json(service)))
}

// PUT /api/services/:id
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: Result<Json<ServicePatch>, JsonRejection>,
) -> Result<Json<Service>, AppError> {
    let patch = json_body(payload)?;

    let db = lock_db(&state)?;
    let mut service = queries::get_service(&db, id)?
        .ok_or_else(|| AppError::NotFound(format!("service {id}")))?;

    if let Some(slug) = &patch.slug {
        if let Some(other) = queries::get_service_by_slug(&db, slug)? {
            if other.id != id {
                return Err(AppError::Conflict(format!(
                    "service slug '{slug}' already exists"
                )));
            }
        }
    }

    patch.apply(&mut service);
    validate(&service.name, &service.slug, service.duration_minutes)?;

    queries::save_service(&db, &service)?;
    let service = queries::get_service(&db, id)?
        .ok_or_else(|| AppError::NotFound(format!("service {id}")))?;
    Ok(Json(service))
}

// DELETE /api/services/:id
pub async fn delete_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let db = lock_db(&state)?;
    if queries::get_service(&db, id)?.is_none() {
        return Err(AppError::NotFound(format!("service {id}")));
    }

    let referenced = queries::count_appointments_for_service(&db, id)?;
    if referenced > 0 {
        return Err(AppError::Conflict(format!(
            "service {id} is referenced by {referenced} appointment(s); deactivate it instead"
        )));
    }

    queries::delete_service(&db, id)?;
    tracing::info!(service_id = id, "service deleted");
    Ok(StatusCode::NO_CONTENT)
}
