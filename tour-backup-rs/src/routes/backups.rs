use crate::error::AppError;
use crate::models::{backup_job, backup_part, backup_queue, tour};
use crate::services::part_builder::{self, JOB_KIND_FULL, JOB_KIND_MEDIA_ONLY};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/{id}", get(get_backup))
        .route("/{id}/parts", get(get_backup_parts))
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<backup_job::BackupJob>>, AppError> {
    let db = state.db.clone();
    let jobs = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        backup_job::find_all(&conn)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(jobs))
}

async fn get_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = state.db.clone();
    let found = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let conn = db.get()?;
        let Some(job) = backup_job::find_by_id(&conn, &id)? else {
            return Ok(None);
        };
        let queue = backup_queue::find_by_job_id(&conn, &id)?;
        Ok(Some((job, queue)))
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    match found {
        Some((job, queue)) => {
            let metadata = job.parsed_metadata();
            Ok(Json(json!({
                "job": job,
                "metadata": metadata,
                "queue": queue,
            })))
        }
        None => Err(AppError::NotFound("Backup job not found".into())),
    }
}

async fn get_backup_parts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<backup_part::BackupPart>>, AppError> {
    let db = state.db.clone();
    let parts = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let conn = db.get()?;
        if backup_job::find_by_id(&conn, &id)?.is_none() {
            return Ok(None);
        }
        Ok(Some(backup_part::find_by_job_id(&conn, &id)?))
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    match parts {
        Some(parts) => Ok(Json(parts)),
        None => Err(AppError::NotFound("Backup job not found".into())),
    }
}

#[derive(Debug, Deserialize)]
struct CreateBackupBody {
    tour_id: String,
    #[serde(default)]
    job_kind: Option<String>,
    #[serde(default)]
    priority: i64,
}

/// Create a backup job and enqueue it. Processing starts on the next
/// dispatch tick or a manual worker call.
async fn create_backup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBackupBody>,
) -> Result<(axum::http::StatusCode, Json<serde_json::Value>), AppError> {
    let job_kind = body.job_kind.unwrap_or_else(|| JOB_KIND_FULL.into());
    if job_kind != JOB_KIND_FULL && job_kind != JOB_KIND_MEDIA_ONLY {
        return Err(AppError::BadRequest(format!(
            "job_kind must be '{}' or '{}'",
            JOB_KIND_FULL, JOB_KIND_MEDIA_ONLY
        )));
    }

    let db = state.db.clone();
    let max_attempts = state.config.default_max_attempts;
    let created = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let conn = db.get()?;
        let Some(tree) = tour::find_tree(&conn, &body.tour_id)? else {
            return Ok(None);
        };

        let total_items = part_builder::plan_items(&tree, &job_kind).len() as i64;
        let job = backup_job::create(
            &conn,
            &backup_job::CreateBackupJobData {
                tour_id: tree.tour.id.clone(),
                owner_id: tree.tour.owner_id.clone(),
                job_kind,
                total_items,
            },
        )?;
        let entry = backup_queue::create(&conn, &job.id, body.priority, max_attempts)?;
        Ok(Some((job, entry)))
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    match created {
        Some((job, entry)) => Ok((
            axum::http::StatusCode::CREATED,
            Json(json!({ "job": job, "queue": entry })),
        )),
        None => Err(AppError::NotFound("Tour not found".into())),
    }
}
