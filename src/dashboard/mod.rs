use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::SystemPaths;
use crate::deploy::context::Services;
use crate::output::Plain;

pub mod auth;
pub mod db;
pub mod handlers;
pub mod stats;
pub mod ws;

/// Seconds between metrics samples pushed to the monitoring channel.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub pool: SqlitePool,
    pub metrics_tx: broadcast::Sender<String>,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("deckhand")
        .join("dashboard.db")
}

/// Run the admin dashboard until interrupted.
///
/// The JSON registry stays the authoritative store for applications; the
/// SQLite database holds users, sessions, metrics samples, logs, and
/// dashboard configuration.
pub async fn serve(paths: SystemPaths, host: &str, port: u16) -> Result<()> {
    let services = Arc::new(Services::new(paths, Arc::new(Plain)));

    let pool = db::connect(&default_db_path()).await?;
    db::init_schema(&pool).await?;
    auth::ensure_admin(&pool).await?;
    auth::cleanup_expired(&pool).await?;

    let (metrics_tx, _) = broadcast::channel(16);
    let state = AppState {
        services,
        pool,
        metrics_tx,
    };

    tokio::spawn(sample_metrics(state.clone()));

    let api = Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/me", get(handlers::me))
        .route(
            "/applications",
            get(handlers::list_applications).post(handlers::create_application),
        )
        .route(
            "/applications/:domain",
            get(handlers::get_application)
                .put(handlers::update_application)
                .delete(handlers::delete_application),
        )
        .route("/applications/:domain/start", post(handlers::start_application))
        .route("/applications/:domain/stop", post(handlers::stop_application))
        .route(
            "/applications/:domain/restart",
            post(handlers::restart_application),
        )
        .route("/system/stats", get(handlers::system_stats))
        .route("/system/logs", get(handlers::system_logs))
        .route("/config", get(handlers::get_config).post(handlers::set_config));

    let app = Router::new()
        .route("/", get(handlers::index_page))
        .route("/login", get(handlers::login_page))
        .route("/domains", get(handlers::domains_page))
        .route("/monitoring", get(handlers::monitoring_page))
        .route("/settings", get(handlers::settings_page))
        .nest("/api/v1", api)
        .route("/ws/monitoring", get(ws::monitoring))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("dashboard listening on http://{}", addr);
    println!("Dashboard running at http://{}", addr);

    axum::serve(listener, app).await.context("Dashboard server failed")?;
    Ok(())
}

/// Background sampler: store a usage row and push it to websocket clients.
async fn sample_metrics(state: AppState) {
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    loop {
        ticker.tick().await;

        let sample = stats::sample(&state.services.exec).await;
        let _ = db::insert_usage_sample(
            &state.pool,
            sample["cpu_load"].as_f64().unwrap_or(0.0),
            sample["memory_used_mb"].as_f64().unwrap_or(0.0),
            sample["disk_used_percent"].as_f64().unwrap_or(0.0),
        )
        .await;

        let _ = state.metrics_tx.send(sample.to_string());
    }
}
