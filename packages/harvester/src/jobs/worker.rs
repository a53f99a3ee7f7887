//! Background worker: drains the durable job queue.
//!
//! One job is in flight at a time per worker process — the poll loop awaits
//! each run before fetching again, which is the single-flight guard. Worker
//! processes running in parallel are coordinated only by the atomic claim in
//! [`JobSource::fetch_and_lock`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::job::{HarvestJob, JobStatus};
use super::source::JobSource;
use crate::cancel::CancelSignal;
use crate::error::HarvestError;
use crate::harvest::Harvester;
use crate::progress::DurableProgressSink;
use crate::vault::CredentialVault;

/// Configuration for the harvest worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to wait between polls when the queue is empty.
    pub poll_interval: Duration,
    /// How often a running job re-reads its own status for an external
    /// cancellation marker.
    pub status_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(20),
            status_poll_interval: Duration::from_secs(10),
        }
    }
}

/// Polls the durable queue and runs one claimed job at a time.
pub struct HarvestWorker {
    source: Arc<dyn JobSource>,
    harvester: Arc<Harvester>,
    vault: Arc<dyn CredentialVault>,
    config: WorkerConfig,
}

impl HarvestWorker {
    pub fn new(
        source: Arc<dyn JobSource>,
        harvester: Arc<Harvester>,
        vault: Arc<dyn CredentialVault>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            source,
            harvester,
            vault,
            config,
        }
    }

    /// Poll loop; runs until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("harvest worker starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.source.fetch_and_lock().await {
                Ok(Some(job)) => self.process(job, &shutdown).await,
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to fetch a job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        info!("harvest worker stopped");
    }

    /// Run one claimed job to its terminal state. Every path out of here
    /// persists Completed or Failed with the final payload.
    async fn process(&self, job: HarvestJob, shutdown: &CancellationToken) {
        let job_id = job.id;
        info!(job_id = %job_id, owner_id = %job.owner_id, "processing harvest job");

        let sink = DurableProgressSink::new(self.source.clone(), job_id);

        let credential = match self.vault.decrypt(&job.credential) {
            Ok(credential) => credential,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "credential decryption failed");
                self.finalize(
                    &sink,
                    job_id,
                    JobStatus::Failed,
                    None,
                    "stored credential could not be decrypted",
                )
                .await;
                return;
            }
        };

        let cancel = CancelSignal::from_token(shutdown.child_token());
        let watcher = tokio::spawn(watch_external_failure(
            self.source.clone(),
            job_id,
            cancel.clone(),
            self.config.status_poll_interval,
        ));

        let outcome = self
            .harvester
            .harvest(job.owner_id, &credential, &sink, &cancel)
            .await;

        match outcome {
            Ok(metrics) => {
                info!(job_id = %job_id, imported = metrics.imported, "harvest job completed");
                self.finalize(
                    &sink,
                    job_id,
                    JobStatus::Completed,
                    Some(&metrics),
                    &format!("harvest completed: {} questions imported", metrics.imported),
                )
                .await;
            }
            Err(HarvestError::Cancelled) => {
                info!(job_id = %job_id, "harvest job cancelled");
                self.finalize(&sink, job_id, JobStatus::Failed, None, "harvest cancelled")
                    .await;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "harvest job failed");
                self.finalize(
                    &sink,
                    job_id,
                    JobStatus::Failed,
                    None,
                    &format!("harvest failed: {e}"),
                )
                .await;
            }
        }

        watcher.abort();
    }

    async fn finalize(
        &self,
        sink: &DurableProgressSink,
        job_id: Uuid,
        status: JobStatus,
        metrics: Option<&crate::types::Metrics>,
        message: &str,
    ) {
        if let Err(e) = sink.finalize(status, metrics, message).await {
            error!(job_id = %job_id, error = %e, "failed to persist terminal job state");
        }
    }
}

/// Cancel the run when the job's status is flipped to Failed externally.
async fn watch_external_failure(
    source: Arc<dyn JobSource>,
    job_id: Uuid,
    cancel: CancelSignal,
    interval: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                match source.job_status(job_id).await {
                    Ok(Some(JobStatus::Failed)) => {
                        info!(job_id = %job_id, "job marked failed externally, cancelling run");
                        cancel.cancel();
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "status poll failed");
                    }
                }
            }
        }
    }
}
