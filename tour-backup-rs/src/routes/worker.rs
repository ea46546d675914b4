//! Manual worker triggers. The cron scheduler calls the same services;
//! these endpoints exist for operators and integration tests.

use crate::error::AppError;
use crate::models::{backup_job, backup_queue};
use crate::services::{dispatcher, job_processor, reaper};
use crate::state::AppState;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/process-queue", post(process_queue))
        .route("/process-job", post(process_job))
        .route("/cleanup-stuck", post(cleanup_stuck))
}

#[derive(Debug, Deserialize)]
struct ProcessQueueBody {
    #[serde(default)]
    max_jobs: Option<usize>,
}

async fn process_queue(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProcessQueueBody>,
) -> Result<Json<dispatcher::DispatchSummary>, AppError> {
    let max_jobs = body.max_jobs.unwrap_or(state.config.dispatch_batch);
    let summary = dispatcher::process_queue(state, max_jobs).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct ProcessJobBody {
    backup_job_id: String,
}

/// Process one job directly, bypassing queue ordering. The queue entry is
/// still claimed first so a concurrent dispatch tick cannot double-run it.
async fn process_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProcessJobBody>,
) -> Result<Json<job_processor::JobOutcome>, AppError> {
    let db = state.db.clone();
    let job_id = body.backup_job_id.clone();
    let claimed = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let conn = db.get()?;
        if backup_job::find_by_id(&conn, &job_id)?.is_none() {
            return Ok(None);
        }
        match backup_queue::find_by_job_id(&conn, &job_id)? {
            Some(entry) => Ok(Some(backup_queue::claim(&conn, &entry.id)?)),
            None => Ok(Some(true)),
        }
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    match claimed {
        None => Err(AppError::NotFound("Backup job not found".into())),
        Some(false) => Err(AppError::Conflict(
            "Queue entry is not in a runnable state".into(),
        )),
        Some(true) => {
            let outcome = job_processor::process_job(state, body.backup_job_id).await?;
            Ok(Json(outcome))
        }
    }
}

async fn cleanup_stuck(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cleaned = reaper::cleanup_stuck_jobs(&state).await?;
    Ok(Json(json!({ "cleaned": cleaned })))
}
