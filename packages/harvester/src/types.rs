use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Severity of a progress log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One append-only entry in a job's progress log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Points credited to the student per newly imported question.
pub const POINTS_PER_QUESTION: u64 = 5;

/// Aggregate counters for one harvest run. Reset when a run starts,
/// monotonic afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub found: u64,
    pub imported: u64,
    pub skipped: u64,
    pub points_awarded: u64,
}

impl Metrics {
    /// Count one newly stored question and refresh the derived points total.
    pub fn record_import(&mut self) {
        self.imported += 1;
        self.points_awarded = self.imported * POINTS_PER_QUESTION;
    }
}

/// The progress payload persisted on a job row (jsonb column).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub logs: Vec<LogEntry>,
    pub metrics: Metrics,
}

/// One answer alternative of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    pub letter: char,
    pub content: String,
    pub is_correct: bool,
}

/// Trailing metadata printed after a question's last alternative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionMeta {
    pub week: Option<u32>,
    pub difficulty: Option<String>,
    pub learning_objective: Option<String>,
}

/// A fully extracted question. Immutable once emitted by a harvest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub subject: String,
    pub statement: String,
    pub alternatives: Vec<Alternative>,
    pub correct_letter: Option<char>,
    pub selected_letter: Option<char>,
    pub commentary: Option<String>,
    pub meta: QuestionMeta,
    pub image_urls: Vec<String>,
}

impl Question {
    /// Content fingerprint for exact-duplicate detection at insert time.
    ///
    /// Whitespace runs and letter case are normalized so trivially reflowed
    /// copies of the same statement hash identically.
    pub fn fingerprint(&self) -> String {
        let normalized = self
            .statement
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Identity of one exam as presented by the portal's selection control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamRef {
    pub id: String,
    pub label: String,
}

/// Emitted once per exam after its questions are exhausted; the unit of
/// idempotent resume bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamSummary {
    pub academic_year: String,
    pub exam_id: String,
    pub exam_label: String,
}

/// A decrypted portal credential.
#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The two login shapes the portal accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginKind {
    Email,
    NationalId,
}

impl LoginKind {
    /// Classify a username before submission. `None` means the credential
    /// matches neither accepted shape and must not be submitted.
    pub fn classify(username: &str) -> Option<Self> {
        let username = username.trim();
        if username.contains('@') && username.rsplit('@').next().is_some_and(|d| d.contains('.')) {
            return Some(Self::Email);
        }
        let digits: String = username.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() == 11 && username.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-') {
            return Some(Self::NationalId);
        }
        None
    }
}
