//! Shared fakes for integration tests: a scripted portal and an in-memory
//! question store.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use harvester::cancel::CancelSignal;
use harvester::error::{HarvestError, HarvestResult};
use harvester::progress::ProgressSink;
use harvester::site::{EntrySurface, RawQuestion, SitePort, SiteSession};
use harvester::storage::QuestionStore;
use harvester::types::{Credential, ExamRef, ExamSummary, LogLevel, LoginKind, Question};

pub fn credential() -> Credential {
    Credential {
        username: "student@example.edu".into(),
        password: "hunter2".into(),
    }
}

pub fn cued_block() -> String {
    r#"<p>A) Left atrium</p><p style="color: green">B) Left ventricle</p>"#.to_string()
}

pub fn raw_question(statement: &str) -> RawQuestion {
    RawQuestion {
        subject: "Anatomy".into(),
        statement: statement.into(),
        alternatives_html: cued_block(),
        commentary: None,
        image_urls: vec![],
    }
}

/// Scripted portal content: years → exams → questions, plus fault switches.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub years: Vec<String>,
    pub exams_by_year: HashMap<String, Vec<ExamRef>>,
    /// Questions keyed by exam id; ordinals are 1-based indexes into these.
    pub items_by_exam: HashMap<String, Vec<RawQuestion>>,
    /// Years whose selection silently never sticks.
    pub unstickable_years: HashSet<String>,
    /// Exam ids that never render any question.
    pub empty_exams: HashSet<String>,
    /// (exam id, ordinal) → times the question fails to render before
    /// succeeding.
    pub render_failures: HashMap<(String, String), u32>,
    /// Fail this session while listing academic years (a transient step).
    pub fail_listing_years: bool,
    /// Pause inside every `open_item`, to let tests race cancellation.
    pub item_delay_ms: u64,
}

/// Counters observed across every session a port hands out.
#[derive(Default)]
pub struct SessionProbe {
    pub acquires: AtomicU32,
    pub closes: AtomicU32,
    pub open_calls: Mutex<Vec<(String, bool)>>,
}

pub struct FakePort {
    script: Script,
    pub probe: Arc<SessionProbe>,
    failing_sessions: AtomicU32,
}

impl FakePort {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            probe: Arc::new(SessionProbe::default()),
            failing_sessions: AtomicU32::new(0),
        }
    }

    /// The first `failures` sessions fail while listing years; later ones
    /// follow the script.
    pub fn failing_first(script: Script, failures: u32) -> Self {
        Self {
            script,
            probe: Arc::new(SessionProbe::default()),
            failing_sessions: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl SitePort for FakePort {
    async fn acquire(&self) -> HarvestResult<Box<dyn SiteSession>> {
        self.probe.acquires.fetch_add(1, Ordering::SeqCst);
        let fail_listing_years = {
            let left = self.failing_sessions.load(Ordering::SeqCst);
            if left > 0 {
                self.failing_sessions.store(left - 1, Ordering::SeqCst);
                true
            } else {
                self.script.fail_listing_years
            }
        };
        Ok(Box::new(FakeSession {
            script: Script {
                fail_listing_years,
                ..self.script.clone()
            },
            failures_left: self.script.render_failures.clone(),
            year: None,
            exam: None,
            probe: self.probe.clone(),
        }))
    }
}

pub struct FakeSession {
    script: Script,
    failures_left: HashMap<(String, String), u32>,
    year: Option<String>,
    exam: Option<String>,
    probe: Arc<SessionProbe>,
}

#[async_trait]
impl SiteSession for FakeSession {
    async fn login(&mut self, _kind: LoginKind, _credential: &Credential) -> HarvestResult<()> {
        Ok(())
    }

    async fn open_exam_review(&mut self) -> HarvestResult<EntrySurface> {
        Ok(EntrySurface::InPlace)
    }

    async fn list_academic_years(&mut self) -> HarvestResult<Vec<String>> {
        if self.script.fail_listing_years {
            return Err(HarvestError::step("years", "year control never rendered"));
        }
        Ok(self.script.years.clone())
    }

    async fn selected_academic_year(&mut self) -> HarvestResult<Option<String>> {
        Ok(self.year.clone())
    }

    async fn select_academic_year(&mut self, year: &str) -> HarvestResult<()> {
        if !self.script.unstickable_years.contains(year) {
            self.year = Some(year.to_string());
        }
        Ok(())
    }

    async fn list_exams(&mut self) -> HarvestResult<Vec<ExamRef>> {
        Ok(self
            .year
            .as_ref()
            .and_then(|year| self.script.exams_by_year.get(year))
            .cloned()
            .unwrap_or_default())
    }

    async fn select_exam(&mut self, exam: &ExamRef) -> HarvestResult<()> {
        self.exam = Some(exam.id.clone());
        Ok(())
    }

    async fn items_ready(&mut self) -> HarvestResult<bool> {
        Ok(self
            .exam
            .as_ref()
            .is_some_and(|exam| !self.script.empty_exams.contains(exam)))
    }

    async fn list_items(&mut self) -> HarvestResult<Vec<String>> {
        let count = self
            .exam
            .as_ref()
            .and_then(|exam| self.script.items_by_exam.get(exam))
            .map(Vec::len)
            .unwrap_or(0);
        Ok((1..=count).map(|ordinal| ordinal.to_string()).collect())
    }

    async fn open_item(&mut self, ordinal: &str, force: bool) -> HarvestResult<RawQuestion> {
        self.probe
            .open_calls
            .lock()
            .unwrap()
            .push((ordinal.to_string(), force));
        if self.script.item_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.script.item_delay_ms)).await;
        }

        let exam = self
            .exam
            .clone()
            .ok_or_else(|| HarvestError::step("question", "no exam selected"))?;
        let key = (exam.clone(), ordinal.to_string());
        if let Some(left) = self.failures_left.get_mut(&key) {
            if *left > 0 {
                *left -= 1;
                return Err(HarvestError::step(
                    "question",
                    "content region never became visible",
                ));
            }
        }

        let index: usize = ordinal
            .parse()
            .map_err(|_| HarvestError::step("question", "bad ordinal"))?;
        self.script
            .items_by_exam
            .get(&exam)
            .and_then(|items| items.get(index - 1))
            .cloned()
            .ok_or_else(|| HarvestError::step("question", "no such question"))
    }

    async fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory question store recording inserts and completion markers.
#[derive(Default)]
pub struct MemoryQuestionStore {
    pub questions: Mutex<HashSet<(Uuid, String)>>,
    pub markers: Mutex<Vec<(Uuid, ExamSummary)>>,
}

impl MemoryQuestionStore {
    pub fn with_completed(owner_id: Uuid, summary: ExamSummary) -> Self {
        let store = Self::default();
        store.markers.lock().unwrap().push((owner_id, summary));
        store
    }

    pub fn marker_count(&self) -> usize {
        self.markers.lock().unwrap().len()
    }
}

#[async_trait]
impl QuestionStore for MemoryQuestionStore {
    async fn insert_question(&self, owner_id: Uuid, question: &Question) -> Result<bool> {
        Ok(self
            .questions
            .lock()
            .unwrap()
            .insert((owner_id, question.fingerprint())))
    }

    async fn record_exam_done(&self, owner_id: Uuid, summary: &ExamSummary) -> Result<()> {
        let mut markers = self.markers.lock().unwrap();
        let exists = markers
            .iter()
            .any(|(owner, marker)| *owner == owner_id && marker.exam_id == summary.exam_id);
        if !exists {
            markers.push((owner_id, summary.clone()));
        }
        Ok(())
    }

    async fn completed_exams(&self, owner_id: Uuid) -> Result<HashSet<String>> {
        Ok(self
            .markers
            .lock()
            .unwrap()
            .iter()
            .filter(|(owner, _)| *owner == owner_id)
            .map(|(_, marker)| marker.exam_label.clone())
            .collect())
    }
}

/// What a sink observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Status(LogLevel, String, String),
    Question(String),
    ExamDone(String),
}

/// Records every event; optionally fires a cancel signal when a status for
/// a given step arrives.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<SinkEvent>>,
    cancel_on_step: Option<(CancelSignal, String)>,
}

impl RecordingSink {
    pub fn cancelling_on(step: &str, signal: CancelSignal) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            cancel_on_step: Some((signal, step.to_string())),
        }
    }

    pub fn statuses(&self) -> Vec<(LogLevel, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Status(level, _, message) => Some((*level, message.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn exam_done_labels(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::ExamDone(label) => Some(label.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn status(&self, level: LogLevel, step: &str, message: &str) {
        self.events.lock().unwrap().push(SinkEvent::Status(
            level,
            step.to_string(),
            message.to_string(),
        ));
        if let Some((signal, cancel_step)) = &self.cancel_on_step {
            if step == cancel_step {
                signal.cancel();
            }
        }
    }

    async fn question(&self, question: &Question) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Question(question.statement.clone()));
    }

    async fn exam_done(&self, summary: &ExamSummary) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::ExamDone(summary.exam_label.clone()));
    }
}
