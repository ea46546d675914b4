//! Pulls due entries off the backup queue and hands them to the job
//! processor. Runs from the cron schedule and from the manual worker
//! endpoint; both paths go through [`process_queue`].

use crate::models::{backup_job, backup_queue};
use crate::services::job_processor;
use crate::state::AppState;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct DispatchDetail {
    pub queue_id: String,
    pub backup_job_id: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct DispatchSummary {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub details: Vec<DispatchDetail>,
}

pub async fn process_queue(
    state: Arc<AppState>,
    max_jobs: usize,
) -> anyhow::Result<DispatchSummary> {
    let eligible = {
        let db = state.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_queue::find_eligible(&conn, max_jobs)
        })
        .await??
    };

    if eligible.is_empty() {
        return Ok(DispatchSummary::default());
    }
    tracing::info!(count = eligible.len(), "Dispatching due backup queue entries");

    let mut summary = DispatchSummary::default();
    for entry in eligible {
        // Entries that already spent their attempt budget are closed out
        // here instead of being claimed again.
        if entry.attempts >= entry.max_attempts {
            force_fail_exhausted(&state, &entry).await?;
            summary.skipped += 1;
            summary.details.push(DispatchDetail {
                queue_id: entry.id,
                backup_job_id: entry.backup_job_id,
                outcome: "skipped".into(),
                error: Some("Max retry attempts exceeded".into()),
            });
            continue;
        }

        let claimed = {
            let db = state.db.clone();
            let id = entry.id.clone();
            tokio::task::spawn_blocking(move || {
                let conn = db.get()?;
                backup_queue::claim(&conn, &id)
            })
            .await??
        };
        if !claimed {
            summary.skipped += 1;
            summary.details.push(DispatchDetail {
                queue_id: entry.id,
                backup_job_id: entry.backup_job_id,
                outcome: "skipped".into(),
                error: Some("Already claimed".into()),
            });
            continue;
        }

        match job_processor::process_job(state.clone(), entry.backup_job_id.clone()).await {
            Ok(_) => {
                summary.processed += 1;
                summary.details.push(DispatchDetail {
                    queue_id: entry.id,
                    backup_job_id: entry.backup_job_id,
                    outcome: "processed".into(),
                    error: None,
                });
            }
            Err(e) => {
                // Failure bookkeeping already happened inside process_job.
                summary.failed += 1;
                summary.details.push(DispatchDetail {
                    queue_id: entry.id,
                    backup_job_id: entry.backup_job_id,
                    outcome: "failed".into(),
                    error: Some(format!("{:#}", e)),
                });
            }
        }
    }

    Ok(summary)
}

async fn force_fail_exhausted(
    state: &Arc<AppState>,
    entry: &backup_queue::QueueEntry,
) -> anyhow::Result<()> {
    let db = state.db.clone();
    let entry_id = entry.id.clone();
    let job_id = entry.backup_job_id.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let conn = db.get()?;
        backup_queue::mark_failed(&conn, &entry_id, "Max retry attempts exceeded")?;
        backup_job::mark_failed(&conn, &job_id, "Max retry attempts exceeded")?;
        Ok(())
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{backup_job, backup_queue};
    use crate::services::part_builder::JOB_KIND_FULL;
    use crate::test_support::{seed_job, seed_tour, test_state};

    #[tokio::test]
    async fn dispatches_due_entry_to_completion() {
        let (state, _dir) = test_state();
        let tour = seed_tour(&state, 3);
        let (job, entry) = seed_job(&state, &tour, JOB_KIND_FULL);

        let summary = process_queue(state.clone(), 10).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.details[0].queue_id, entry.id);

        let conn = state.db.get().unwrap();
        let job = backup_job::find_by_id(&conn, &job.id).unwrap().unwrap();
        assert_eq!(job.status, "completed");
    }

    #[tokio::test]
    async fn future_scheduled_entries_are_not_picked_up() {
        let (state, _dir) = test_state();
        let tour = seed_tour(&state, 3);
        let (_job, entry) = seed_job(&state, &tour, JOB_KIND_FULL);

        {
            let conn = state.db.get().unwrap();
            let later = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
            conn.execute(
                "UPDATE backup_queue SET scheduled_at = ? WHERE id = ?",
                [later.as_str(), entry.id.as_str()],
            )
            .unwrap();
        }

        let summary = process_queue(state, 10).await.unwrap();
        assert_eq!(summary.processed + summary.failed + summary.skipped, 0);
    }

    #[tokio::test]
    async fn exhausted_entries_are_force_failed_not_reprocessed() {
        let (state, _dir) = test_state();
        let tour = seed_tour(&state, 3);
        let (job, entry) = seed_job(&state, &tour, JOB_KIND_FULL);

        {
            let conn = state.db.get().unwrap();
            conn.execute(
                "UPDATE backup_queue SET attempts = max_attempts, status = 'retry' WHERE id = ?",
                [entry.id.as_str()],
            )
            .unwrap();
        }

        let summary = process_queue(state.clone(), 10).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 0);

        let conn = state.db.get().unwrap();
        let entry = backup_queue::find_by_id(&conn, &entry.id).unwrap().unwrap();
        assert_eq!(entry.status, "failed");
        let job = backup_job::find_by_id(&conn, &job.id).unwrap().unwrap();
        assert_eq!(job.status, "failed");
    }

    #[tokio::test]
    async fn claimed_entries_are_skipped() {
        let (state, _dir) = test_state();
        let tour = seed_tour(&state, 3);
        let (_job, entry) = seed_job(&state, &tour, JOB_KIND_FULL);

        // Simulate another dispatcher winning the claim race.
        {
            let conn = state.db.get().unwrap();
            assert!(backup_queue::claim(&conn, &entry.id).unwrap());
        }

        let summary = process_queue(state, 10).await.unwrap();
        assert_eq!(summary.processed + summary.failed + summary.skipped, 0);
    }
}
