//! Progress reporting for harvest runs.
//!
//! Two sinks share one contract: the live sink pushes every event straight
//! to the submitting client over a broadcast channel backing an SSE stream;
//! the durable sink appends to a job's persisted progress log, batching
//! question events to bound write volume.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;
use uuid::Uuid;

use crate::jobs::{JobSource, JobStatus};
use crate::types::{ExamSummary, LogEntry, LogLevel, Metrics, ProgressPayload, Question};

/// Events pushed to interactive callers over the live stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HarvestEvent {
    Queued { position: usize },
    Status { level: LogLevel, step: String, message: String },
    Question { question: Box<Question> },
    ExamDone { summary: ExamSummary },
    Done { total: u64 },
    Error { message: String },
}

impl HarvestEvent {
    /// SSE event name for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Status { .. } => "status",
            Self::Question { .. } => "question",
            Self::ExamDone { .. } => "exam_done",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Consumer of phase status, extracted questions, and per-exam completion.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn status(&self, level: LogLevel, step: &str, message: &str);
    async fn question(&self, question: &Question);
    async fn exam_done(&self, summary: &ExamSummary);
}

/// Pushes each event immediately to the submitting client.
///
/// Sending is a no-op once the client has disconnected (no receivers left
/// on the channel). The keep-alive heartbeat is owned by the SSE layer, not
/// by this sink.
pub struct LiveProgressSink {
    tx: broadcast::Sender<HarvestEvent>,
}

impl LiveProgressSink {
    pub fn new(tx: broadcast::Sender<HarvestEvent>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: HarvestEvent) {
        // A send error only means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

#[async_trait]
impl ProgressSink for LiveProgressSink {
    async fn status(&self, level: LogLevel, step: &str, message: &str) {
        self.send(HarvestEvent::Status {
            level,
            step: step.to_string(),
            message: message.to_string(),
        });
    }

    async fn question(&self, question: &Question) {
        self.send(HarvestEvent::Question {
            question: Box::new(question.clone()),
        });
    }

    async fn exam_done(&self, summary: &ExamSummary) {
        self.send(HarvestEvent::ExamDone {
            summary: summary.clone(),
        });
    }
}

/// Question events buffered before the durable sink persists.
const QUESTIONS_PER_FLUSH: u32 = 2;

/// Appends progress to the job row's jsonb payload.
///
/// Persists on every status event but only on every
/// [`QUESTIONS_PER_FLUSH`]th question event; exam completion and terminal
/// state always persist immediately.
pub struct DurableProgressSink {
    source: Arc<dyn JobSource>,
    job_id: Uuid,
    state: Mutex<SinkState>,
}

#[derive(Default)]
struct SinkState {
    payload: ProgressPayload,
    pending_questions: u32,
}

impl DurableProgressSink {
    /// Start a fresh payload for one job run; counters reset here.
    pub fn new(source: Arc<dyn JobSource>, job_id: Uuid) -> Self {
        Self {
            source,
            job_id,
            state: Mutex::new(SinkState::default()),
        }
    }

    /// Merge the run's final counters, append a terminal log entry, and
    /// persist the terminal status with the final payload.
    pub async fn finalize(
        &self,
        status: JobStatus,
        metrics: Option<&Metrics>,
        message: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if let Some(metrics) = metrics {
            state.payload.metrics = *metrics;
        }
        let level = if status == JobStatus::Completed {
            LogLevel::Success
        } else {
            LogLevel::Error
        };
        state.payload.logs.push(LogEntry::new(level, message));
        self.source
            .complete(self.job_id, status, &state.payload)
            .await
    }

    async fn flush(&self, payload: &ProgressPayload) {
        if let Err(e) = self.source.persist_progress(self.job_id, payload).await {
            warn!(job_id = %self.job_id, error = %e, "failed to persist progress");
        }
    }
}

#[async_trait]
impl ProgressSink for DurableProgressSink {
    async fn status(&self, level: LogLevel, step: &str, message: &str) {
        let mut state = self.state.lock().await;
        state
            .payload
            .logs
            .push(LogEntry::new(level, format!("[{step}] {message}")));
        let payload = state.payload.clone();
        drop(state);
        self.flush(&payload).await;
    }

    async fn question(&self, _question: &Question) {
        let mut state = self.state.lock().await;
        // Interim count; the run's own metrics replace it at finalize.
        state.payload.metrics.found += 1;
        state.pending_questions += 1;
        if state.pending_questions < QUESTIONS_PER_FLUSH {
            return;
        }
        state.pending_questions = 0;
        let payload = state.payload.clone();
        drop(state);
        self.flush(&payload).await;
    }

    async fn exam_done(&self, summary: &ExamSummary) {
        let mut state = self.state.lock().await;
        state.payload.logs.push(LogEntry::new(
            LogLevel::Success,
            format!("finished {} ({})", summary.exam_label, summary.academic_year),
        ));
        state.pending_questions = 0;
        let payload = state.payload.clone();
        drop(state);
        self.flush(&payload).await;
    }
}
