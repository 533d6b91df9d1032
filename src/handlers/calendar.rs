use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use super::lock_db;
use crate::db::queries;
use crate::errors::AppError;
use crate::services::calendar::ics::{generate_feed, generate_ics};
use crate::state::AppState;

const ICS_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

// GET /api/appointments/:id/calendar.ics
pub async fn download_ics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let appt = {
        let db = lock_db(&state)?;
        queries::get_appointment_details(&db, id)?
            .ok_or_else(|| AppError::NotFound(format!("appointment {id}")))?
    };

    let ics = generate_ics(&appt, &state.config.business_name);
    let disposition = format!("attachment; filename=\"appointment-{id}.ics\"");

    Ok((
        [
            (header::CONTENT_TYPE, ICS_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        ics,
    )
        .into_response())
}

// GET /api/calendar/feed.ics
pub async fn calendar_feed(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let today = chrono::Local::now().date_naive();
    let upcoming = {
        let db = lock_db(&state)?;
        queries::upcoming_appointment_details(&db, today)?
    };

    let feed = generate_feed(&upcoming, &state.config.business_name);
    Ok(([(header::CONTENT_TYPE, ICS_CONTENT_TYPE)], feed).into_response())
}
