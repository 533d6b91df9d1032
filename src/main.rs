use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use parlor::config::{AppConfig, CalendarProvider};
use parlor::db;
use parlor::handlers;
use parlor::services::calendar::google::GoogleCalendar;
use parlor::services::calendar::{CalendarSync, NoopCalendar};
use parlor::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env()?;

    let conn = db::init_db(&config.database_url)?;
    if config.seed_services {
        let seeded = db::queries::seed_default_services(&conn)?;
        if seeded > 0 {
            tracing::info!("seeded {seeded} default services");
        }
    }

    let calendar: Arc<dyn CalendarSync> = match config.calendar_provider {
        CalendarProvider::Google => {
            anyhow::ensure!(
                !config.google_calendar_token.is_empty(),
                "GOOGLE_CALENDAR_TOKEN must be set when CALENDAR_PROVIDER=google"
            );
            tracing::info!("syncing appointments to Google Calendar (calendar: {})", config.google_calendar_id);
            Arc::new(GoogleCalendar::new(
                config.google_calendar_id.clone(),
                config.google_calendar_token.clone(),
                config.calendar_timezone.clone(),
                config.business_name.clone(),
            )?)
        }
        CalendarProvider::None => {
            tracing::info!("calendar sync disabled");
            Arc::new(NoopCalendar)
        }
    };

    tracing::info!("business hours: {}", config.business_hours.to_human_readable());
    if config.rate_limit_max_requests > 0 {
        tracing::info!(
            "rate limit: {} requests per {}s per client",
            config.rate_limit_max_requests,
            config.rate_limit_window_secs
        );
    }

    let state = Arc::new(AppState::new(conn, config.clone(), calendar));

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
