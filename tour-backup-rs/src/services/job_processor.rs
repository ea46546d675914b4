//! Drives one backup job through its multipart lifecycle.
//!
//! Each call to [`process_job`] advances the job by exactly one part and,
//! if parts remain, schedules the next one on a fresh task. Keeping each
//! step small bounds memory to a single part's archive and lets a crashed
//! job resume from the persisted cursor instead of starting over.

use crate::models::backup_job::{self, BackupJob, CompletionData};
use crate::models::backup_part::{self, RecordPartData};
use crate::models::backup_queue;
use crate::models::tour::{self, TourTree};
use crate::services::{cloud_sync, part_builder, part_uploader};
use crate::state::AppState;
use crate::utils::part_count;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub success: bool,
    pub in_progress: bool,
    pub parts_count: i64,
    pub total_size: i64,
    pub total_items: i64,
}

/// Retry delay in seconds: exponential in the attempt count, capped.
pub fn backoff_delay(base_secs: i64, cap_secs: i64, attempts: i64) -> i64 {
    let exp = attempts.clamp(0, 32) as u32;
    base_secs.saturating_mul(1_i64 << exp).min(cap_secs)
}

/// Boxed form used for self-scheduling continuations. A future that
/// spawns itself directly would have an infinitely recursive type.
pub fn process_job_boxed(
    state: Arc<AppState>,
    job_id: String,
) -> Pin<Box<dyn Future<Output = anyhow::Result<JobOutcome>> + Send>> {
    Box::pin(process_job(state, job_id))
}

pub async fn process_job(state: Arc<AppState>, job_id: String) -> anyhow::Result<JobOutcome> {
    match advance_one_part(&state, &job_id).await {
        Ok(outcome) => {
            if outcome.in_progress {
                spawn_next_part(state, job_id);
            }
            Ok(outcome)
        }
        Err(e) => {
            let message = format!("{:#}", e);
            if let Err(record_err) = record_failure(&state, &job_id, &message).await {
                tracing::error!(
                    job_id = %job_id,
                    error = %record_err,
                    "Failed to record job failure"
                );
            }
            Err(e)
        }
    }
}

fn spawn_next_part(state: Arc<AppState>, job_id: String) {
    tokio::spawn(async move {
        let id = job_id.clone();
        if let Err(e) = process_job_boxed(state, job_id).await {
            tracing::error!(job_id = %id, error = %e, "Backup part processing failed");
        }
    });
}

/// Advance the job by one part. Exposed to the crate so tests can step a
/// job deterministically without the spawned continuation racing them.
pub(crate) async fn advance_one_part(
    state: &Arc<AppState>,
    job_id: &str,
) -> anyhow::Result<JobOutcome> {
    let (job, tree) = load_job_and_tree(state, job_id).await?;

    let plan = part_builder::plan_items(&tree, &job.job_kind);
    let mut meta = job.parsed_metadata();

    if meta.current_part == 0 {
        meta.multipart = true;
        meta.items_per_part = state.config.items_per_part.max(1) as i64;
        // An empty tour still yields one part holding just the manifest.
        meta.total_parts = part_count(plan.len(), state.config.items_per_part).max(1);
        meta.current_part = 1;
        meta.started_at = Some(chrono::Utc::now().to_rfc3339());
        tracing::info!(
            job_id = %job.id,
            total_items = plan.len(),
            total_parts = meta.total_parts,
            "Starting multipart backup"
        );
    }

    {
        let db = state.db.clone();
        let id = job.id.clone();
        let meta = meta.clone();
        let needs_status = job.status != "processing";
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = db.get()?;
            if needs_status {
                backup_job::update_status(&conn, &id, "processing")?;
            }
            backup_job::update_metadata(&conn, &id, &meta)?;
            Ok(())
        })
        .await??;
    }

    let current = meta.current_part;
    let per_part = meta.items_per_part.max(1) as usize;
    let start = (current as usize - 1) * per_part;
    let end = (start + per_part).min(plan.len());

    // Archive assembly and blob IO are synchronous work.
    let (built_items, uploaded) = {
        let blob = state.blob.clone();
        let signer = state.signer.clone();
        let ttl = state.config.signed_url_ttl_secs;
        let job = job.clone();
        let total_parts = meta.total_parts;
        tokio::task::spawn_blocking(move || -> anyhow::Result<(i64, part_uploader::UploadedPart)> {
            let built = part_builder::build_part(
                &tree,
                &job.job_kind,
                current,
                total_parts,
                start..end,
                blob.as_ref(),
            )?;
            let uploaded = part_uploader::upload_part(
                blob.as_ref(),
                &signer,
                &job,
                &tree.tour.title,
                current,
                ttl,
                &built.bytes,
            )?;
            Ok((built.items_count, uploaded))
        })
        .await??
    };

    let outcome = {
        let db = state.db.clone();
        let id = job.id.clone();
        let mut meta = meta;
        tokio::task::spawn_blocking(move || -> anyhow::Result<JobOutcome> {
            let conn = db.get()?;
            backup_part::record_completed(
                &conn,
                &id,
                &RecordPartData {
                    part_number: current,
                    storage_path: uploaded.storage_path.clone(),
                    file_url: uploaded.file_url.clone(),
                    file_size: uploaded.file_size,
                    file_hash: uploaded.file_hash.clone(),
                    items_count: built_items,
                },
            )?;

            // Progress is recomputed from the parts table rather than
            // incremented, so a re-run part cannot double-count.
            let agg = backup_part::aggregate_completed(&conn, &id)?;
            let progress = (current * 100) / meta.total_parts;
            backup_job::update_progress(&conn, &id, agg.total_items, progress)?;

            if current < meta.total_parts {
                meta.current_part = current + 1;
                meta.last_part_at = Some(chrono::Utc::now().to_rfc3339());
                backup_job::update_metadata(&conn, &id, &meta)?;
                tracing::info!(
                    job_id = %id,
                    part = current,
                    total_parts = meta.total_parts,
                    "Backup part completed"
                );
                return Ok(JobOutcome {
                    success: true,
                    in_progress: true,
                    parts_count: agg.completed_parts,
                    total_size: agg.total_size,
                    total_items: agg.total_items,
                });
            }

            if agg.completed_parts != meta.total_parts {
                anyhow::bail!(
                    "Job {} finished its last part but only {} of {} parts are recorded",
                    id,
                    agg.completed_parts,
                    meta.total_parts
                );
            }

            meta.completed_at = Some(chrono::Utc::now().to_rfc3339());
            backup_job::mark_completed(
                &conn,
                &id,
                &CompletionData {
                    storage_path: uploaded.storage_path,
                    file_url: uploaded.file_url,
                    file_size: agg.total_size,
                    processed_items: agg.total_items,
                },
                &meta,
            )?;
            if let Some(entry) = backup_queue::find_by_job_id(&conn, &id)? {
                backup_queue::mark_completed(&conn, &entry.id)?;
            }
            tracing::info!(
                job_id = %id,
                parts = agg.completed_parts,
                total_size = agg.total_size,
                "Backup job completed"
            );
            Ok(JobOutcome {
                success: true,
                in_progress: false,
                parts_count: agg.completed_parts,
                total_size: agg.total_size,
                total_items: agg.total_items,
            })
        })
        .await??
    };

    if !outcome.in_progress {
        cloud_sync::trigger_cloud_sync(state, job_id);
    }

    Ok(outcome)
}

async fn load_job_and_tree(
    state: &Arc<AppState>,
    job_id: &str,
) -> anyhow::Result<(BackupJob, TourTree)> {
    let db = state.db.clone();
    let job_id = job_id.to_string();
    tokio::task::spawn_blocking(move || -> anyhow::Result<(BackupJob, TourTree)> {
        let conn = db.get()?;
        let job = backup_job::find_by_id(&conn, &job_id)?
            .ok_or_else(|| anyhow::anyhow!("Backup job {} not found", job_id))?;
        let tree = tour::find_tree(&conn, &job.tour_id)?
            .ok_or_else(|| anyhow::anyhow!("Tour {} not found", job.tour_id))?;
        Ok((job, tree))
    })
    .await?
}

/// Mark the job failed and move its queue entry to retry or terminal
/// failure depending on the attempt budget.
async fn record_failure(state: &Arc<AppState>, job_id: &str, error: &str) -> anyhow::Result<()> {
    let db = state.db.clone();
    let job_id = job_id.to_string();
    let error = error.to_string();
    let base = state.config.retry_base_secs;
    let cap = state.config.retry_cap_secs;
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let conn = db.get()?;
        backup_job::mark_failed(&conn, &job_id, &error)?;
        if let Some(entry) = backup_queue::find_by_job_id(&conn, &job_id)? {
            if entry.attempts >= entry.max_attempts {
                backup_queue::mark_failed(&conn, &entry.id, &error)?;
                tracing::warn!(
                    job_id = %job_id,
                    attempts = entry.attempts,
                    "Backup job failed permanently"
                );
            } else {
                let delay = backoff_delay(base, cap, entry.attempts);
                let when = (chrono::Utc::now() + chrono::Duration::seconds(delay)).to_rfc3339();
                backup_queue::schedule_retry(&conn, &entry.id, &error, &when)?;
                tracing::warn!(
                    job_id = %job_id,
                    attempts = entry.attempts,
                    retry_in_secs = delay,
                    "Backup job failed, retry scheduled"
                );
            }
        }
        Ok(())
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{backup_job, backup_part, backup_queue};
    use crate::services::part_builder::JOB_KIND_FULL;
    use crate::test_support::{seed_job, seed_tour, test_state};

    #[tokio::test]
    async fn processes_all_parts_incrementally() {
        let (state, _dir) = test_state();
        // 23 photos at 5 per part: four full parts and a final part of 3
        let tour = seed_tour(&state, 23);
        let (job, _entry) = seed_job(&state, &tour, JOB_KIND_FULL);

        let mut steps = 0;
        loop {
            let outcome = advance_one_part(&state, &job.id).await.unwrap();
            steps += 1;
            if !outcome.in_progress {
                assert_eq!(outcome.parts_count, 5);
                assert_eq!(outcome.total_items, 23);
                break;
            }
            assert!(steps < 10, "job never finished");
        }
        assert_eq!(steps, 5);

        let conn = state.db.get().unwrap();
        let done = backup_job::find_by_id(&conn, &job.id).unwrap().unwrap();
        assert_eq!(done.status, "completed");
        assert_eq!(done.progress_percentage, 100);
        assert_eq!(done.processed_items, 23);
        assert!(done.storage_path.is_some());

        let meta = done.parsed_metadata();
        assert_eq!(meta.total_parts, 5);
        assert!(meta.completed_at.is_some());

        let entry = backup_queue::find_by_job_id(&conn, &job.id).unwrap().unwrap();
        assert_eq!(entry.status, "completed");

        let parts = backup_part::find_by_job_id(&conn, &job.id).unwrap();
        let counts: Vec<i64> = parts.iter().map(|p| p.items_count).collect();
        assert_eq!(counts, vec![5, 5, 5, 5, 3]);
    }

    #[tokio::test]
    async fn resumes_from_persisted_cursor() {
        let (state, _dir) = test_state();
        let tour = seed_tour(&state, 12);
        let (job, _entry) = seed_job(&state, &tour, JOB_KIND_FULL);

        // First two steps, then pretend the worker died.
        advance_one_part(&state, &job.id).await.unwrap();
        advance_one_part(&state, &job.id).await.unwrap();

        let conn = state.db.get().unwrap();
        let mid = backup_job::find_by_id(&conn, &job.id).unwrap().unwrap();
        assert_eq!(mid.parsed_metadata().current_part, 3);
        assert_eq!(mid.processed_items, 10);
        drop(conn);

        // A fresh invocation picks up at part 3 and finishes.
        let outcome = advance_one_part(&state, &job.id).await.unwrap();
        assert!(!outcome.in_progress);
        assert_eq!(outcome.total_items, 12);
    }

    #[tokio::test]
    async fn empty_tour_completes_with_single_part() {
        let (state, _dir) = test_state();
        let tour = seed_tour(&state, 0);
        let (job, _entry) = seed_job(&state, &tour, JOB_KIND_FULL);

        let outcome = advance_one_part(&state, &job.id).await.unwrap();
        assert!(!outcome.in_progress);
        assert_eq!(outcome.parts_count, 1);
        assert_eq!(outcome.total_items, 0);
    }

    #[tokio::test]
    async fn missing_tour_schedules_retry_with_backoff() {
        let (state, _dir) = test_state();
        let tour = seed_tour(&state, 3);
        let (job, entry) = seed_job(&state, &tour, JOB_KIND_FULL);

        // Remove the tour out from under the job, keeping the job itself.
        {
            let conn = state.db.get().unwrap();
            assert!(backup_queue::claim(&conn, &entry.id).unwrap());
            conn.execute_batch(
                "PRAGMA foreign_keys = OFF;
                 DELETE FROM tours;
                 PRAGMA foreign_keys = ON;",
            )
            .unwrap();
        }

        let err = process_job(state.clone(), job.id.clone()).await;
        assert!(err.is_err());

        let conn = state.db.get().unwrap();
        let failed = backup_job::find_by_id(&conn, &job.id).unwrap().unwrap();
        assert_eq!(failed.status, "failed");
        assert!(failed.last_error.unwrap().contains("not found"));

        let entry = backup_queue::find_by_id(&conn, &entry.id).unwrap().unwrap();
        assert_eq!(entry.status, "retry");
        assert!(entry.scheduled_at > chrono::Utc::now().to_rfc3339());
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_the_queue_entry() {
        let (state, _dir) = test_state();
        let tour = seed_tour(&state, 3);
        let (job, entry) = seed_job(&state, &tour, JOB_KIND_FULL);

        {
            let conn = state.db.get().unwrap();
            conn.execute(
                "UPDATE backup_queue SET attempts = max_attempts WHERE id = ?",
                [entry.id.as_str()],
            )
            .unwrap();
            conn.execute_batch(
                "PRAGMA foreign_keys = OFF;
                 DELETE FROM tours;
                 PRAGMA foreign_keys = ON;",
            )
            .unwrap();
        }

        assert!(process_job(state.clone(), job.id.clone()).await.is_err());

        let conn = state.db.get().unwrap();
        let entry = backup_queue::find_by_id(&conn, &entry.id).unwrap().unwrap();
        assert_eq!(entry.status, "failed");
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(300, 3600, 0), 300);
        assert_eq!(backoff_delay(300, 3600, 1), 600);
        assert_eq!(backoff_delay(300, 3600, 2), 1200);
        assert_eq!(backoff_delay(300, 3600, 3), 2400);
        assert_eq!(backoff_delay(300, 3600, 4), 3600);
        assert_eq!(backoff_delay(300, 3600, 60), 3600);
    }
}
