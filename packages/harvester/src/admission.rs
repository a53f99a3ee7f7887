//! Bounded admission of interactive harvest runs.
//!
//! At most `limit` runs execute concurrently; overflow waits in a FIFO list
//! and the caller is told its 1-based queue position. Completing a run, for
//! any reason, frees the slot and starts the first queued run whose caller
//! is still connected; abandoned entries are discarded without ever running.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use tracing::debug;

use crate::cancel::CancelSignal;

/// Outcome of submitting a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started,
    /// Waiting; the value is the 1-based queue position.
    Queued(usize),
}

struct QueuedRun {
    cancel: CancelSignal,
    task: BoxFuture<'static, ()>,
}

pub struct AdmissionQueue {
    limit: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    active: usize,
    waiting: VecDeque<QueuedRun>,
}

impl AdmissionQueue {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: limit.max(1),
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Start the task now if a slot is free, otherwise queue it. `cancel`
    /// doubles as the abandonment marker: a queued task whose signal fired
    /// before it starts is dropped without running.
    pub fn submit(
        self: &Arc<Self>,
        cancel: CancelSignal,
        task: impl Future<Output = ()> + Send + 'static,
    ) -> Admission {
        let task = task.boxed();
        let mut inner = self.inner.lock().unwrap();
        if inner.active < self.limit {
            inner.active += 1;
            drop(inner);
            self.spawn(task);
            Admission::Started
        } else {
            inner.waiting.push_back(QueuedRun { cancel, task });
            Admission::Queued(inner.waiting.len())
        }
    }

    pub fn active(&self) -> usize {
        self.inner.lock().unwrap().active
    }

    pub fn waiting(&self) -> usize {
        self.inner.lock().unwrap().waiting.len()
    }

    fn spawn(self: &Arc<Self>, task: BoxFuture<'static, ()>) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            task.await;
            queue.release();
        });
    }

    /// Free one slot and start the first still-wanted queued run.
    fn release(self: &Arc<Self>) {
        let next = {
            let mut inner = self.inner.lock().unwrap();
            inner.active -= 1;
            let mut next = None;
            while let Some(run) = inner.waiting.pop_front() {
                if run.cancel.is_cancelled() {
                    debug!("skipping queued harvest whose caller disconnected");
                    continue;
                }
                inner.active += 1;
                next = Some(run.task);
                break;
            }
            next
        };
        if let Some(task) = next {
            self.spawn(task);
        }
    }
}
