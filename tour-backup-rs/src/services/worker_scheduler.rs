use crate::services::dispatcher;
use crate::state::AppState;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Owns the cron scheduler that drives the queue dispatcher. The queue
/// itself is the concurrency guard: claiming is atomic, so overlapping
/// ticks cannot double-process an entry.
pub struct WorkerScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
}

impl WorkerScheduler {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
        })
    }

    /// Register the dispatch tick, once per minute.
    pub async fn init_schedules(&self) -> anyhow::Result<()> {
        let state = self.state.clone();
        let batch = self.state.config.dispatch_batch;

        let job = Job::new_async("0 * * * * *", move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                match dispatcher::process_queue(state, batch).await {
                    Ok(summary) if summary.processed + summary.failed + summary.skipped > 0 => {
                        tracing::info!(
                            processed = summary.processed,
                            failed = summary.failed,
                            skipped = summary.skipped,
                            "Queue dispatch tick finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Queue dispatch tick failed");
                    }
                }
            })
        })?;
        self.scheduler.lock().await.add(job).await?;

        tracing::info!("Dispatch schedule initialized");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
