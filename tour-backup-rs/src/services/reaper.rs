//! Background sweep that rescues queue entries whose worker died mid-part.

use crate::models::backup_queue;
use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Reset entries stuck in `processing` longer than the configured timeout
/// back to `retry`. Returns how many were reset.
pub async fn cleanup_stuck_jobs(state: &Arc<AppState>) -> anyhow::Result<usize> {
    let db = state.db.clone();
    let timeout = state.config.stuck_timeout_secs;
    let reset = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
        let conn = db.get()?;
        let cutoff = (chrono::Utc::now() - chrono::Duration::seconds(timeout)).to_rfc3339();
        backup_queue::reset_stuck(&conn, &cutoff)
    })
    .await??;

    if reset > 0 {
        tracing::warn!(reset, "Reset stuck backup queue entries for retry");
    }
    Ok(reset)
}

pub fn start_reaper(state: Arc<AppState>, cancel: CancellationToken) {
    let interval_secs = state.config.reaper_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(interval_secs, "Stuck job reaper started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Stuck job reaper stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = cleanup_stuck_jobs(&state).await {
                        tracing::error!(error = %e, "Stuck job sweep failed");
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backup_queue;
    use crate::services::part_builder::JOB_KIND_FULL;
    use crate::test_support::{seed_job, seed_tour, test_state};

    #[tokio::test]
    async fn resets_only_stale_processing_entries() {
        let (state, _dir) = test_state();
        let tour = seed_tour(&state, 2);
        let (_job_a, stale) = seed_job(&state, &tour, JOB_KIND_FULL);
        let (_job_b, fresh) = seed_job(&state, &tour, JOB_KIND_FULL);
        let (_job_c, pending) = seed_job(&state, &tour, JOB_KIND_FULL);

        {
            let conn = state.db.get().unwrap();
            assert!(backup_queue::claim(&conn, &stale.id).unwrap());
            assert!(backup_queue::claim(&conn, &fresh.id).unwrap());
            let old = (chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
            conn.execute(
                "UPDATE backup_queue SET started_at = ? WHERE id = ?",
                [old.as_str(), stale.id.as_str()],
            )
            .unwrap();
        }

        let reset = cleanup_stuck_jobs(&state).await.unwrap();
        assert_eq!(reset, 1);

        let conn = state.db.get().unwrap();
        let stale = backup_queue::find_by_id(&conn, &stale.id).unwrap().unwrap();
        assert_eq!(stale.status, "retry");
        assert_eq!(stale.error_message.as_deref(), Some("Timeout - reset for retry"));
        let fresh = backup_queue::find_by_id(&conn, &fresh.id).unwrap().unwrap();
        assert_eq!(fresh.status, "processing");
        let pending = backup_queue::find_by_id(&conn, &pending.id).unwrap().unwrap();
        assert_eq!(pending.status, "pending");
    }
}
