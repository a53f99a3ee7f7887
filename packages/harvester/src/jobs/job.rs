//! Durable harvest job model.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::ProgressPayload;

/// Lifecycle of a durable harvest job.
///
/// Pending → Processing → {Completed, Failed}; crash recovery is the only
/// path that moves Processing back to Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "harvest_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One queued harvest. Rows are created by the external submitter; only the
/// orchestrator mutates status and progress, and nothing here deletes them.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct HarvestJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Encrypted credential; decrypted only for the duration of one run.
    pub credential: String,
    pub status: JobStatus,
    pub logs: Json<ProgressPayload>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl HarvestJob {
    pub fn new(owner_id: Uuid, credential: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            credential,
            status: JobStatus::Pending,
            logs: Json(ProgressPayload::default()),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Insert the job into the database
    pub async fn insert(&self, pool: &PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO harvest_jobs (
                id, owner_id, credential, status, logs,
                created_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, owner_id, credential, status, logs,
                      created_at, updated_at, completed_at
            "#,
        )
        .bind(self.id)
        .bind(self.owner_id)
        .bind(&self.credential)
        .bind(self.status)
        .bind(&self.logs)
        .bind(self.created_at)
        .bind(self.updated_at)
        .bind(self.completed_at)
        .fetch_one(pool)
        .await?;

        Ok(job)
    }
}
