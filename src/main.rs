use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use studybattle_backend::api;
use studybattle_backend::config::Config;
use studybattle_backend::content::InMemoryContentStore;
use studybattle_backend::engine::MatchEngine;
use studybattle_backend::metrics;
use studybattle_backend::question::OfflineQuestionBank;

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "studybattle-backend" }))
}

async fn metrics_endpoint() -> String {
    metrics::gather_metrics()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    metrics::register_metrics();

    let store = Arc::new(InMemoryContentStore::new());
    let questions = Arc::new(OfflineQuestionBank::new());
    let engine = MatchEngine::new(questions, store.clone());

    // Background sweep dropping finished matches after the retention window.
    engine.spawn_eviction_worker(Duration::from_secs(config.match_retention_secs));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .merge(api::router(engine, store))
        .layer(CorsLayer::permissive());

    if let Some(static_dir) = &config.static_dir {
        app = app.fallback_service(ServeDir::new(static_dir));
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("Study-Battle backend listening on port {}", config.port);
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
