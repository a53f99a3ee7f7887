//! Scheduled maintenance: crash recovery for jobs abandoned mid-flight.
//!
//! Runs independently of the worker poll loop. A worker that dies while
//! holding a Processing job stops touching its row; once the row is stale
//! past the threshold the sweep returns it to Pending for another worker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::jobs::JobSource;

/// Start the sweep schedule (hourly by default, configurable).
pub async fn start_sweeper(
    source: Arc<dyn JobSource>,
    schedule: &str,
    stale_after: Duration,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let sweep_source = source.clone();
    let sweep_job = Job::new_async(schedule, move |_uuid, _lock| {
        let source = sweep_source.clone();
        Box::pin(async move {
            match source.sweep_stuck(stale_after).await {
                Ok(0) => tracing::debug!("no stuck harvest jobs"),
                Ok(recovered) => {
                    tracing::info!(recovered, "returned stuck harvest jobs to pending");
                }
                Err(e) => tracing::error!(error = %e, "stuck-job sweep failed"),
            }
        })
    })?;

    scheduler.add(sweep_job).await?;
    scheduler.start().await?;

    tracing::info!(
        schedule,
        stale_after_secs = stale_after.as_secs(),
        "stuck-job sweeper started"
    );
    Ok(scheduler)
}
