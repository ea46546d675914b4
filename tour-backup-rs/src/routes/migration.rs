use crate::error::AppError;
use crate::services::migration_engine::{self, MigrationReport, MigrationRequest};
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route("/run", post(run_migration))
}

/// Run a safe migration and always return the full report. A rolled-back
/// failure is still a 200: the caller reads `success` and `rollback`.
/// Only a critical failure, where the target may be inconsistent, is a 500.
async fn run_migration(
    State(_state): State<Arc<AppState>>,
    Json(body): Json<MigrationRequest>,
) -> Result<(StatusCode, Json<MigrationReport>), AppError> {
    if body.target_db_path.is_empty() {
        return Err(AppError::BadRequest("target_db_path is required".into()));
    }
    if body.sql.trim().is_empty() {
        return Err(AppError::BadRequest("sql is required".into()));
    }

    let report = tokio::task::spawn_blocking(move || migration_engine::run_safe_migration(&body))
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    let status = if report.critical_failure {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)))
}
