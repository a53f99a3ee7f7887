//! Durable job acquisition with crash recovery.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::job::{HarvestJob, JobStatus};
use crate::types::ProgressPayload;

/// Exclusive access to the shared job store.
///
/// `fetch_and_lock` is the only cross-process coordination point: the claim
/// happens inside one atomic statement so two workers can never pick up the
/// same pending job.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Claim the oldest pending job, transitioning it to Processing in the
    /// same atomic unit of work. `Ok(None)` when nothing is pending.
    async fn fetch_and_lock(&self) -> Result<Option<HarvestJob>>;

    /// Return Processing jobs untouched for longer than `stale_after` to
    /// Pending so another worker can claim them. Returns the recovered count.
    async fn sweep_stuck(&self, stale_after: Duration) -> Result<u64>;

    /// Current status of one job, re-read from the store.
    async fn job_status(&self, job_id: Uuid) -> Result<Option<JobStatus>>;

    /// Persist the in-flight progress payload.
    async fn persist_progress(&self, job_id: Uuid, payload: &ProgressPayload) -> Result<()>;

    /// Record terminal state with the final progress payload.
    async fn complete(&self, job_id: Uuid, status: JobStatus, payload: &ProgressPayload)
        -> Result<()>;
}

/// PostgreSQL-backed job source.
pub struct PostgresJobSource {
    pool: PgPool,
}

impl PostgresJobSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobSource for PostgresJobSource {
    async fn fetch_and_lock(&self) -> Result<Option<HarvestJob>> {
        let job = sqlx::query_as::<_, HarvestJob>(
            r#"
            WITH next_job AS (
                SELECT id
                FROM harvest_jobs
                WHERE status = 'pending'
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE harvest_jobs
            SET status = 'processing', updated_at = NOW()
            WHERE id IN (SELECT id FROM next_job)
            RETURNING id, owner_id, credential, status, logs,
                      created_at, updated_at, completed_at
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn sweep_stuck(&self, stale_after: Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET status = 'pending', updated_at = NOW()
            WHERE status = 'processing'
              AND updated_at < NOW() - ($1 || ' seconds')::INTERVAL
            "#,
        )
        .bind(stale_after.as_secs().to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn job_status(&self, job_id: Uuid) -> Result<Option<JobStatus>> {
        let status = sqlx::query_scalar::<_, JobStatus>(
            r#"
            SELECT status
            FROM harvest_jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }

    async fn persist_progress(&self, job_id: Uuid, payload: &ProgressPayload) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET logs = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(Json(payload))
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete(
        &self,
        job_id: Uuid,
        status: JobStatus,
        payload: &ProgressPayload,
    ) -> Result<()> {
        debug_assert!(status.is_terminal());
        sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET status = $1, logs = $2, updated_at = NOW(), completed_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(status)
        .bind(Json(payload))
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
