pub mod health;
pub mod proctor;
pub mod proctor_ws;

use std::path::Path;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{AppState, UPLOADS_ROUTE};

pub fn app(state: AppState, uploads_dir: impl AsRef<Path>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/ws/proctor", get(proctor_ws::proctor_socket))
        .route("/api/proctoring/events", get(proctor::list_events))
        .nest_service(UPLOADS_ROUTE, ServeDir::new(uploads_dir.as_ref()))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
