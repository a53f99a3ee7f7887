//! Cooperative cancellation for harvest runs.
//!
//! Cancellation is never preemptive: runs call [`CancelSignal::checkpoint`]
//! at phase boundaries and around every exam and question, and waits select
//! against [`CancelSignal::cancelled`]. The signal is fed by client
//! disconnect on the interactive path and by an external status flip on the
//! worker path.

use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{HarvestError, HarvestResult};

/// Cooperative abort signal checked at phase, exam, and question boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. a child of the process shutdown token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Raise the distinguished cancelled outcome if the signal has fired.
    pub fn checkpoint(&self) -> HarvestResult<()> {
        if self.token.is_cancelled() {
            Err(HarvestError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once the signal fires; for use in `tokio::select!` waits.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Guard that cancels this signal when dropped (client disconnect).
    pub fn drop_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }
}
