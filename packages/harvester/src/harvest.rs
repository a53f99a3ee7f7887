//! The harvest run: an ordered walk of the portal's exam-review surface.
//!
//! Phases run strictly in order: authenticate, open the review surface,
//! discover academic years, then per year → exams → questions. Cancellation
//! is checked at every phase boundary and around every exam and question.
//! The portal session acquired for an attempt is released exactly once on
//! every exit path, including failure and cancellation.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::error::{HarvestError, HarvestResult};
use crate::parse;
use crate::progress::ProgressSink;
use crate::retry::RetryExecutor;
use crate::site::{EntrySurface, SitePort, SiteSession};
use crate::storage::{insert_with_retry, QuestionStore};
use crate::types::{Credential, ExamRef, ExamSummary, LogLevel, LoginKind, Metrics};

/// Entries in selection controls that do not name a real year or exam.
const PLACEHOLDER_PREFIXES: &[&str] = &["select", "choose", "--"];

fn is_placeholder(label: &str) -> bool {
    let trimmed = label.trim();
    trimmed.is_empty()
        || PLACEHOLDER_PREFIXES
            .iter()
            .any(|prefix| trimmed.to_lowercase().starts_with(prefix))
}

/// Allow/deny substring filter on exam labels, scoped to the deployment
/// environment rather than to individual requests.
#[derive(Debug, Clone, Default)]
pub struct ExamFilter {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl ExamFilter {
    pub fn new(allow: Vec<String>, deny: Vec<String>) -> Self {
        let lower = |items: Vec<String>| {
            items
                .into_iter()
                .map(|item| item.to_lowercase())
                .collect::<Vec<_>>()
        };
        Self {
            allow: lower(allow),
            deny: lower(deny),
        }
    }

    pub fn allows(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        if self.deny.iter().any(|deny| label.contains(deny)) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|allow| label.contains(allow))
    }
}

/// Orchestrates complete harvests: acquires a fresh session per attempt,
/// drives it through the phase sequence, and retries whole runs on
/// transient failure.
pub struct Harvester {
    port: Arc<dyn SitePort>,
    store: Arc<dyn QuestionStore>,
    retry: RetryExecutor,
    filter: ExamFilter,
}

impl Harvester {
    pub fn new(
        port: Arc<dyn SitePort>,
        store: Arc<dyn QuestionStore>,
        retry: RetryExecutor,
        filter: ExamFilter,
    ) -> Self {
        Self {
            port,
            store,
            retry,
            filter,
        }
    }

    /// Run one harvest to completion for `owner_id`, reporting progress to
    /// `sink`. Returns the final run counters.
    pub async fn harvest(
        &self,
        owner_id: Uuid,
        credential: &Credential,
        sink: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> HarvestResult<Metrics> {
        self.retry
            .run(cancel, |attempt| async move {
                cancel.checkpoint()?;
                let opening = if attempt == 1 {
                    "starting harvest session".to_string()
                } else {
                    format!("starting attempt {attempt}")
                };
                sink.status(LogLevel::Info, "session", &opening).await;
                // Re-read completed exams each attempt so work finished by an
                // earlier attempt is not repeated.
                let completed = self
                    .store
                    .completed_exams(owner_id)
                    .await
                    .map_err(|e| HarvestError::Persistence(e.to_string()))?;

                let session = self.port.acquire().await?;
                let run = HarvestRun {
                    session,
                    sink,
                    cancel,
                    store: self.store.as_ref(),
                    filter: &self.filter,
                    owner_id,
                    credential,
                    completed,
                    metrics: Metrics::default(),
                };
                run.run().await
            })
            .await
    }
}

/// One in-flight walk. Owns the portal session for its whole lifetime.
struct HarvestRun<'a> {
    session: Box<dyn SiteSession>,
    sink: &'a dyn ProgressSink,
    cancel: &'a CancelSignal,
    store: &'a dyn QuestionStore,
    filter: &'a ExamFilter,
    owner_id: Uuid,
    credential: &'a Credential,
    completed: HashSet<String>,
    metrics: Metrics,
}

impl HarvestRun<'_> {
    /// Drive the walk, then release the session no matter how it ended.
    async fn run(mut self) -> HarvestResult<Metrics> {
        let outcome = self.drive().await;
        self.session.close().await;
        outcome.map(|()| self.metrics)
    }

    async fn drive(&mut self) -> HarvestResult<()> {
        self.cancel.checkpoint()?;
        self.sink
            .status(LogLevel::Info, "login", "signing in to the portal")
            .await;
        let kind = LoginKind::classify(&self.credential.username).ok_or_else(|| {
            HarvestError::Authentication(
                "credential is neither an email nor a national id".to_string(),
            )
        })?;
        // Any login failure, including a navigation timeout, is fatal here.
        self.session
            .login(kind, self.credential)
            .await
            .map_err(|e| HarvestError::Authentication(e.to_string()))?;

        self.cancel.checkpoint()?;
        match self.session.open_exam_review().await {
            Ok(EntrySurface::InPlace) => {
                info!("exam review opened in place");
            }
            Ok(EntrySurface::NewWindow) => {
                info!("exam review opened in a new window");
            }
            Err(e) => {
                warn!(error = %e, "review surface did not open cleanly, continuing on current page");
                self.sink
                    .status(
                        LogLevel::Warning,
                        "navigate",
                        "review surface did not open cleanly, continuing",
                    )
                    .await;
            }
        }

        self.cancel.checkpoint()?;
        let years: Vec<String> = self
            .session
            .list_academic_years()
            .await?
            .into_iter()
            .filter(|year| !is_placeholder(year))
            .collect();
        self.sink
            .status(
                LogLevel::Info,
                "years",
                &format!("found {} academic years", years.len()),
            )
            .await;

        for year in years {
            self.cancel.checkpoint()?;
            if !self.enter_year(&year).await? {
                continue;
            }
            self.harvest_year(&year).await?;
        }

        self.sink
            .status(
                LogLevel::Success,
                "done",
                &format!(
                    "harvest finished: {} questions imported, {} skipped",
                    self.metrics.imported, self.metrics.skipped
                ),
            )
            .await;
        Ok(())
    }

    /// Select `year` unless it is already active, then verify the selection
    /// stuck. A failed verification skips the year instead of aborting.
    async fn enter_year(&mut self, year: &str) -> HarvestResult<bool> {
        if self.session.selected_academic_year().await?.as_deref() == Some(year) {
            return Ok(true);
        }
        self.session.select_academic_year(year).await?;
        if self.session.selected_academic_year().await?.as_deref() != Some(year) {
            warn!(year, "academic year selection did not stick, skipping");
            self.sink
                .status(
                    LogLevel::Warning,
                    "years",
                    &format!("could not switch to {year}, skipping it"),
                )
                .await;
            return Ok(false);
        }
        Ok(true)
    }

    async fn harvest_year(&mut self, year: &str) -> HarvestResult<()> {
        let exams: Vec<ExamRef> = self
            .session
            .list_exams()
            .await?
            .into_iter()
            .filter(|exam| !is_placeholder(&exam.label))
            .collect();

        for exam in exams {
            self.cancel.checkpoint()?;
            if !self.filter.allows(&exam.label) {
                self.metrics.skipped += 1;
                self.sink
                    .status(
                        LogLevel::Info,
                        "exam",
                        &format!("{} filtered out, skipping", exam.label),
                    )
                    .await;
                continue;
            }
            if self.completed.contains(&exam.label) {
                self.metrics.skipped += 1;
                self.sink
                    .status(
                        LogLevel::Info,
                        "exam",
                        &format!("{} already harvested, skipping", exam.label),
                    )
                    .await;
                continue;
            }
            self.session.select_exam(&exam).await?;
            self.harvest_exam(year, &exam).await?;
            self.cancel.checkpoint()?;
        }
        Ok(())
    }

    async fn harvest_exam(&mut self, year: &str, exam: &ExamRef) -> HarvestResult<()> {
        if !self.session.items_ready().await? {
            self.metrics.skipped += 1;
            self.sink
                .status(
                    LogLevel::Warning,
                    "exam",
                    &format!("{} has no visible questions (empty or expired), skipping", exam.label),
                )
                .await;
            return Ok(());
        }

        let ordinals = self.session.list_items().await?;
        self.sink
            .status(
                LogLevel::Info,
                "exam",
                &format!("{}: {} questions found", exam.label, ordinals.len()),
            )
            .await;

        for ordinal in &ordinals {
            self.cancel.checkpoint()?;
            self.extract_item(ordinal).await?;
        }

        let summary = ExamSummary {
            academic_year: year.to_string(),
            exam_id: exam.id.clone(),
            exam_label: exam.label.clone(),
        };
        if let Err(e) = self.store.record_exam_done(self.owner_id, &summary).await {
            warn!(exam = %exam.label, error = %e, "failed to record exam completion marker");
        } else {
            self.completed.insert(exam.label.clone());
        }
        self.sink.exam_done(&summary).await;
        Ok(())
    }

    async fn extract_item(&mut self, ordinal: &str) -> HarvestResult<()> {
        let raw = match self.session.open_item(ordinal, false).await {
            Ok(raw) => raw,
            Err(first) => {
                // Exactly one forced re-selection before the step error is fatal.
                warn!(ordinal, error = %first, "question did not render, forcing one re-selection");
                self.session.open_item(ordinal, true).await?
            }
        };

        let question = parse::parse_question(&raw)?;
        self.metrics.found += 1;
        self.sink.question(&question).await;

        match insert_with_retry(self.store, self.owner_id, &question).await {
            Ok(true) => self.metrics.record_import(),
            Ok(false) => {
                self.metrics.skipped += 1;
                self.sink
                    .status(
                        LogLevel::Info,
                        "question",
                        &format!("question {ordinal} already stored, skipped"),
                    )
                    .await;
            }
            Err(e) => {
                // A single stubborn insert does not abort the run.
                self.sink
                    .status(
                        LogLevel::Error,
                        "question",
                        &format!("could not store question {ordinal}: {e}"),
                    )
                    .await;
            }
        }
        Ok(())
    }
}
