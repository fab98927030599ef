//! Completion events: the adapter that turns a wait source into a
//! host-coroutine-awaitable.
//!
//! The concrete host coroutine scheduler is a language binding's own
//! concern, so this module specifies the bridge as a small
//! [`HostScheduler`] trait a language binding implements, plus
//! [`ManualCompletion`], a plain-Rust test double built on `std::sync::mpsc`
//! for the crate's own tests and for downstream crates that want a
//! non-hosted await point.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::error::WorkerError;
use crate::wait_source::WaitSource;
use crate::worker::Worker;

/// Why a `CompletionEvent`'s wait did not resolve with a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// The registered timeout elapsed before the wait source signalled.
    Timeout,
    /// The worker tore down before the wait source signalled.
    Cancelled,
    /// The callback that observed the wait source failed.
    Failed(String),
}

/// One method: deliver the outcome of a completion wait to whatever is
/// awaiting it. A language binding implements this over its own future
/// type; [`ManualCompletion`] is the plain-Rust test double.
pub trait HostScheduler: Send + Sync {
    fn complete(&self, result: Result<(), WaitError>);
}

/// Wraps a wait source (a handle plus whatever opaque payload it carries --
/// here, simply the trait object) and keeps it alive at least until the
/// callback registered against it fires.
pub struct CompletionEvent {
    source: Arc<dyn WaitSource>,
}

impl CompletionEvent {
    pub fn new(source: Arc<dyn WaitSource>) -> Self {
        CompletionEvent { source }
    }

    /// Register this completion event with `worker`'s reactor, delivering
    /// the outcome to `scheduler` exactly once. Must be called from the
    /// worker thread, like any other `WaitOneLowLevel` submission.
    ///
    /// `self` is kept alive by the callback's closure until it fires, so the
    /// underlying wait source stays valid for as long as the registration
    /// needs it.
    pub fn bridge(
        self,
        worker: &Worker,
        timeout: Option<Duration>,
        scheduler: Arc<dyn HostScheduler>,
    ) -> Result<(), WorkerError> {
        let source = Arc::clone(&self.source);
        worker.wait_one_low_level(
            source,
            timeout,
            Box::new(move |_reactor, status| {
                let _keep_alive = &self;
                let result = match status {
                    crate::error::Status::Ok => Ok(()),
                    crate::error::Status::TimedOut => Err(WaitError::Timeout),
                    crate::error::Status::Cancelled => Err(WaitError::Cancelled),
                    crate::error::Status::Err(message) => Err(WaitError::Failed(message)),
                };
                scheduler.complete(result);
                crate::error::Status::Ok
            }),
        )
    }
}

/// A plain-Rust `HostScheduler` test double: `complete` sends its result
/// down an `mpsc` channel, and [`ManualCompletion::channel`] hands back the
/// matching receiver as a oneshot-style future for callers with no host
/// scheduler to bridge through.
pub struct ManualCompletion {
    tx: mpsc::Sender<Result<(), WaitError>>,
}

impl ManualCompletion {
    /// Returns a `(scheduler, receiver)` pair: `scheduler` goes to
    /// [`CompletionEvent::bridge`], `receiver.recv()` blocks for the result.
    pub fn channel() -> (Arc<ManualCompletion>, mpsc::Receiver<Result<(), WaitError>>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(ManualCompletion { tx }), rx)
    }
}

impl HostScheduler for ManualCompletion {
    fn complete(&self, result: Result<(), WaitError>) {
        let _ = self.tx.send(result);
    }
}
