//! Wait sources: the opaque, signallable primitives a [`crate::reactor::Reactor`]
//! polls on behalf of `WaitOneLowLevel` registrations.
//!
//! A wait source stands in for a device fence or a foreign future in the
//! real heterogeneous-compute stack. This module gives the crate's own
//! `Worker` and tests something concrete to register:
//! [`ManualResetWaitSource`], a plain signal any number of observers can
//! poll or raise directly.

use std::sync::Arc;

use crate::event::ManualResetEvent;

/// Anything the reactor can poll for "has this become signalled yet".
///
/// Implementations must be cheap to poll repeatedly (the reactor polls
/// cooperatively rather than blocking on each source individually) and safe
/// to share across threads, since the signalling side typically runs on a
/// thread other than the worker that registered the wait.
pub trait WaitSource: Send + Sync {
    /// Returns `true` once the source has become signalled. Implementations
    /// need not be idempotent about resetting -- callers that want one-shot
    /// semantics should use [`ManualResetWaitSource`], which stays signalled.
    fn poll_signalled(&self) -> bool;
}

/// A manual-reset wait source: once signalled it stays signalled for every
/// poller, mirroring the `CompletionEvent`/`Process::termination` contract
/// ("signalled exactly once and remains signalled thereafter").
#[derive(Default)]
pub struct ManualResetWaitSource {
    event: ManualResetEvent,
}

impl ManualResetWaitSource {
    pub fn new() -> Arc<Self> {
        Arc::new(ManualResetWaitSource { event: ManualResetEvent::new() })
    }

    /// Raise the source. Idempotent: signalling an already-signalled source
    /// is a no-op.
    pub fn signal(&self) {
        self.event.signal();
    }

    pub fn is_signalled(&self) -> bool {
        self.event.is_signalled()
    }

    /// Block the calling thread until signalled. Used by tests and by
    /// callers that have no host scheduler to bridge through (see
    /// [`crate::completion::ManualCompletion`] for the awaitable path).
    pub fn wait(&self) {
        self.event.wait();
    }
}

impl WaitSource for ManualResetWaitSource {
    fn poll_signalled(&self) -> bool {
        self.event.is_signalled()
    }
}
