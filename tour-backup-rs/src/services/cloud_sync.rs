//! Fire-and-forget notification to an external sync endpoint after a
//! backup completes. Failures are logged and never fail the job.

use crate::state::AppState;
use std::sync::Arc;

pub fn trigger_cloud_sync(state: &Arc<AppState>, backup_job_id: &str) {
    let Some(url) = state.config.cloud_sync_url.clone() else {
        tracing::debug!(backup_job_id, "Cloud sync disabled, skipping");
        return;
    };

    let client = state.http.clone();
    let backup_job_id = backup_job_id.to_string();
    tokio::spawn(async move {
        let body = serde_json::json!({
            "action": "sync_backup",
            "backupJobId": backup_job_id,
        });
        match client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(backup_job_id, "Cloud sync triggered");
            }
            Ok(resp) => {
                tracing::warn!(
                    backup_job_id,
                    status = %resp.status(),
                    "Cloud sync endpoint returned an error"
                );
            }
            Err(e) => {
                tracing::warn!(backup_job_id, error = %e, "Cloud sync request failed");
            }
        }
    });
}
