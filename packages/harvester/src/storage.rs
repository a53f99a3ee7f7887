//! Persistence of harvested questions and per-exam completion markers.
//!
//! Delivery is at-least-once; inserts are made idempotent by a content
//! fingerprint so a re-run or a retried attempt never duplicates a question.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::error::HarvestError;
use crate::types::{ExamSummary, Question};

/// Store for extracted questions and the append-only exam progress markers
/// used for idempotent resume.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Insert a question; `Ok(false)` when an identical one is already stored
    /// for this owner.
    async fn insert_question(&self, owner_id: Uuid, question: &Question) -> Result<bool>;

    /// Record that an exam was fully harvested. Idempotent per
    /// (owner, exam id).
    async fn record_exam_done(&self, owner_id: Uuid, summary: &ExamSummary) -> Result<()>;

    /// Labels of exams already fully harvested for this owner.
    async fn completed_exams(&self, owner_id: Uuid) -> Result<HashSet<String>>;
}

pub struct PostgresQuestionStore {
    pool: PgPool,
}

impl PostgresQuestionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuestionStore for PostgresQuestionStore {
    async fn insert_question(&self, owner_id: Uuid, question: &Question) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO questions (
                id, owner_id, fingerprint, subject, statement, alternatives,
                correct_letter, selected_letter, commentary,
                week, difficulty, learning_objective, image_urls, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (owner_id, fingerprint) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(question.fingerprint())
        .bind(&question.subject)
        .bind(&question.statement)
        .bind(Json(&question.alternatives))
        .bind(question.correct_letter.map(String::from))
        .bind(question.selected_letter.map(String::from))
        .bind(&question.commentary)
        .bind(question.meta.week.map(|w| w as i32))
        .bind(&question.meta.difficulty)
        .bind(&question.meta.learning_objective)
        .bind(&question.image_urls)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_exam_done(&self, owner_id: Uuid, summary: &ExamSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO exam_progress (
                id, owner_id, exam_id, exam_label, academic_year, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (owner_id, exam_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(&summary.exam_id)
        .bind(&summary.exam_label)
        .bind(&summary.academic_year)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn completed_exams(&self, owner_id: Uuid) -> Result<HashSet<String>> {
        let labels = sqlx::query_scalar::<_, String>(
            r#"
            SELECT exam_label
            FROM exam_progress
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(labels.into_iter().collect())
    }
}

/// Local insert retries before a question is given up on.
const INSERT_ATTEMPTS: u32 = 3;

/// Insert a question, retrying with a jittered delay. The final failure
/// surfaces as [`HarvestError::Persistence`]; the caller reports it per
/// record without aborting the run.
pub async fn insert_with_retry(
    store: &dyn QuestionStore,
    owner_id: Uuid,
    question: &Question,
) -> Result<bool, HarvestError> {
    let mut attempt = 1;
    loop {
        match store.insert_question(owner_id, question).await {
            Ok(inserted) => return Ok(inserted),
            Err(e) if attempt < INSERT_ATTEMPTS => {
                warn!(attempt, error = %e, "question insert failed, retrying");
                tokio::time::sleep(insert_backoff(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(HarvestError::Persistence(e.to_string())),
        }
    }
}

fn insert_backoff(attempt: u32) -> Duration {
    let base = 200 * u64::from(attempt);
    Duration::from_millis(base + fastrand::u64(0..150))
}
