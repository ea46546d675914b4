pub mod backups;
pub mod migration;
pub mod storage;
pub mod tours;
pub mod worker;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/tours", tours::router(state.clone()))
        .nest("/api/backups", backups::router(state.clone()))
        .nest("/api/worker", worker::router(state.clone()))
        .nest("/api/migration", migration::router(state.clone()))
        .nest("/api/storage", storage::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
