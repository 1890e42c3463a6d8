use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tracing::info;

use super::import_routes::make_import_routes;
use super::metrics::metrics_handler;
use super::rec_routes::make_recommendation_routes;
use super::requests_logging::log_requests;
use super::stats_routes::make_stats_routes;
use super::state::{ServerConfig, ServerState};
use crate::importer::ImportManager;
use crate::library_store::SqliteLibraryStore;
use crate::provider::ProviderGateway;
use crate::recommend::RecommendationEngine;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

pub fn make_state(
    config: ServerConfig,
    store: SqliteLibraryStore,
    gateway: Arc<ProviderGateway>,
    import_manager: Arc<ImportManager>,
    recommender: Arc<RecommendationEngine>,
) -> ServerState {
    ServerState {
        config,
        start_time: Instant::now(),
        store,
        gateway,
        import_manager,
        recommender,
        hash: env!("GIT_HASH").to_string(),
    }
}

pub fn make_app(state: ServerState) -> Router {
    Router::new()
        .route("/", get(home))
        .merge(make_import_routes())
        .merge(make_stats_routes())
        .merge(make_recommendation_routes())
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

pub async fn run_server(state: ServerState) -> Result<()> {
    let port = state.config.port;
    let metrics_port = state.config.metrics_port;

    let metrics_listener =
        tokio::net::TcpListener::bind(format!("127.0.0.1:{}", metrics_port)).await?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(metrics_listener, make_metrics_app()).await {
            tracing::error!("Metrics server stopped: {}", err);
        }
    });
    info!("Metrics available at port {}", metrics_port);

    let app = make_app(state);
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    info!("Ready to serve at port {}!", port);
    Ok(axum::serve(listener, app).await?)
}
