//! In-memory job source for tests and local development.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::job::{HarvestJob, JobStatus};
use super::source::JobSource;
use crate::types::ProgressPayload;

/// A [`JobSource`] holding jobs in process memory. Claiming is serialized by
/// a mutex, which gives the same mutual exclusion the database lock does.
#[derive(Default)]
pub struct InMemoryJobSource {
    jobs: Mutex<Vec<HarvestJob>>,
    persists: AtomicU64,
}

impl InMemoryJobSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, job: HarvestJob) {
        self.jobs.lock().unwrap().push(job);
    }

    pub fn get(&self, job_id: Uuid) -> Option<HarvestJob> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|job| job.id == job_id)
            .cloned()
    }

    /// Flip a job's status directly, as an external actor would.
    pub fn set_status(&self, job_id: Uuid, status: JobStatus) {
        if let Some(job) = self
            .jobs
            .lock()
            .unwrap()
            .iter_mut()
            .find(|job| job.id == job_id)
        {
            job.status = status;
            job.updated_at = Utc::now();
        }
    }

    /// How many times in-flight progress was persisted.
    pub fn persist_count(&self) -> u64 {
        self.persists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobSource for InMemoryJobSource {
    async fn fetch_and_lock(&self) -> Result<Option<HarvestJob>> {
        let mut jobs = self.jobs.lock().unwrap();
        let next = jobs
            .iter_mut()
            .filter(|job| job.status == JobStatus::Pending)
            .min_by_key(|job| job.created_at);
        Ok(next.map(|job| {
            job.status = JobStatus::Processing;
            job.updated_at = Utc::now();
            job.clone()
        }))
    }

    async fn sweep_stuck(&self, stale_after: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(stale_after)
                .map_err(|e| anyhow!("stale_after out of range: {e}"))?;
        let mut jobs = self.jobs.lock().unwrap();
        let mut recovered = 0;
        for job in jobs.iter_mut() {
            if job.status == JobStatus::Processing && job.updated_at < cutoff {
                job.status = JobStatus::Pending;
                job.updated_at = Utc::now();
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn job_status(&self, job_id: Uuid) -> Result<Option<JobStatus>> {
        Ok(self.get(job_id).map(|job| job.status))
    }

    async fn persist_progress(&self, job_id: Uuid, payload: &ProgressPayload) -> Result<()> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|job| job.id == job_id)
            .ok_or_else(|| anyhow!("no such job: {job_id}"))?;
        job.logs.0 = payload.clone();
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(
        &self,
        job_id: Uuid,
        status: JobStatus,
        payload: &ProgressPayload,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|job| job.id == job_id)
            .ok_or_else(|| anyhow!("no such job: {job_id}"))?;
        job.status = status;
        job.logs.0 = payload.clone();
        let now = Utc::now();
        job.updated_at = now;
        job.completed_at = Some(now);
        Ok(())
    }
}
