use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let reachable = match state.db.lock() {
        Ok(db) => db.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok(),
        Err(_) => false,
    };

    if reachable {
        Json(json!({ "status": "ok", "database": "connected" })).into_response()
    } else {
        tracing::error!("health check failed: database unreachable");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "database": "unavailable" })),
        )
            .into_response()
    }
}
