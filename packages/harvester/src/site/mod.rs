//! Seam to the e-learning portal.
//!
//! The harvest engine drives a portal session only through these traits; all
//! markup- and endpoint-level knowledge lives behind them. A reference HTTP
//! implementation is in [`portal`], and tests script their own sessions.

pub mod portal;

use async_trait::async_trait;

use crate::error::HarvestResult;
use crate::types::{Credential, ExamRef, LoginKind};

pub use portal::PortalPort;

/// Raw markup captured for one opened question, before parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawQuestion {
    pub subject: String,
    pub statement: String,
    /// Mixed-markup region containing the labeled alternatives and, inside
    /// the last one, the trailing metadata text.
    pub alternatives_html: String,
    pub commentary: Option<String>,
    pub image_urls: Vec<String>,
}

/// Where the exam-review surface ended up after entry navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySurface {
    InPlace,
    NewWindow,
}

/// Opens fresh authenticated portal sessions.
#[async_trait]
pub trait SitePort: Send + Sync {
    async fn acquire(&self) -> HarvestResult<Box<dyn SiteSession>>;
}

/// One exclusively-owned browsing session against the portal.
///
/// Every wait inside an implementation must be bounded; none may block
/// indefinitely.
#[async_trait]
pub trait SiteSession: Send {
    /// Submit the credential in the given shape and wait for the
    /// session-establishing navigation. A timeout here is an error; the
    /// caller classifies it as a fatal authentication failure.
    async fn login(&mut self, kind: LoginKind, credential: &Credential) -> HarvestResult<()>;

    /// Navigate to the exam-review landing surface. Whichever of in-place
    /// navigation or a new window materializes first within the bounded wait
    /// wins; an error means neither did.
    async fn open_exam_review(&mut self) -> HarvestResult<EntrySurface>;

    /// Academic years offered by the selection control, in source order and
    /// including any placeholder entries (the caller discards those).
    async fn list_academic_years(&mut self) -> HarvestResult<Vec<String>>;

    /// The currently selected academic year, re-read from the live control.
    async fn selected_academic_year(&mut self) -> HarvestResult<Option<String>>;

    async fn select_academic_year(&mut self, year: &str) -> HarvestResult<()>;

    /// Exams available under the selected academic year.
    async fn list_exams(&mut self) -> HarvestResult<Vec<ExamRef>>;

    async fn select_exam(&mut self, exam: &ExamRef) -> HarvestResult<()>;

    /// Bounded wait for at least one question to render. `false` means the
    /// exam is empty or expired and should be skipped.
    async fn items_ready(&mut self) -> HarvestResult<bool>;

    /// Visible ordinal labels of the exam's questions. Re-read on every call;
    /// the live list may shift between selections.
    async fn list_items(&mut self) -> HarvestResult<Vec<String>>;

    /// Open one question and capture its raw markup. `force` re-selects the
    /// item even if it already appears active.
    async fn open_item(&mut self, ordinal: &str, force: bool) -> HarvestResult<RawQuestion>;

    /// Release the underlying session. Called exactly once per acquisition,
    /// on every exit path.
    async fn close(&mut self);
}
