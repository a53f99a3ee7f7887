//! Error taxonomy for harvest runs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    /// Malformed admission input. Reported to the caller, never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Credential rejected or the login navigation timed out. Fatal for the
    /// whole run; the outer retry wrapper re-raises it immediately.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A single navigation or selection step failed (stale element, slow
    /// render, unexpected markup). Fails the current run attempt; the outer
    /// retry wrapper may start a fresh session.
    #[error("{step} failed: {message}")]
    Step { step: &'static str, message: String },

    /// Cooperative cancellation observed at a phase boundary.
    #[error("harvest cancelled")]
    Cancelled,

    /// A record insert failed after local retries.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// The whole-run retry budget is exhausted.
    #[error("harvest failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<HarvestError>,
    },
}

impl HarvestError {
    pub fn step(step: &'static str, message: impl Into<String>) -> Self {
        Self::Step {
            step,
            message: message.into(),
        }
    }

    /// Whether the outer retry wrapper may re-run the whole session.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled | Self::Authentication(_) | Self::Validation(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type HarvestResult<T> = Result<T, HarvestError>;
