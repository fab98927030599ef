//! Cross-thread mailbox: the mutex-protected FIFO of deferred callbacks
//! that backs `CallThreadsafe`.
//!
//! Push/pop under a `parking_lot::Mutex`, plus a double-buffered drain: the
//! worker thread swaps the whole queue out under the lock once per trip,
//! then runs the swapped-out batch without holding it, so a submitter never
//! contends with callback execution.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::worker::Worker;

/// A zero-argument callback submitted from off the worker thread. Runs on
/// the worker thread with the worker itself available, so it can turn
/// around and use `CallLowLevel`/`WaitUntilLowLevel`/`WaitOneLowLevel`.
pub type Thunk = Box<dyn FnOnce(&std::sync::Arc<Worker>) + Send>;

/// The pair (mutex, FIFO, kill flag). `signal_transact` itself lives on
/// [`crate::worker::Worker`] since it is shared with the reactor's watchdog
/// registration, not just the mailbox.
pub struct Mailbox {
    pending: Mutex<VecDeque<Thunk>>,
    kill: AtomicBool,
}

impl Mailbox {
    pub fn new() -> Self {
        Mailbox { pending: Mutex::new(VecDeque::new()), kill: AtomicBool::new(false) }
    }

    /// Append a thunk. O(1) amortized, never blocks on loop work.
    pub fn push(&self, thunk: Thunk) {
        self.pending.lock().push_back(thunk);
    }

    /// Request shutdown. Idempotent.
    pub fn request_kill(&self) {
        self.kill.store(true, Ordering::SeqCst);
    }

    pub fn kill_requested(&self) -> bool {
        self.kill.load(Ordering::SeqCst)
    }

    /// Atomically swap the pending queue out for an empty one and report
    /// whether kill has been requested. Called once per trip, on the
    /// worker thread, under the mailbox's own lock; the returned queue is
    /// then drained without holding the lock.
    pub fn drain(&self) -> (VecDeque<Thunk>, bool) {
        let mut guard = self.pending.lock();
        let next = std::mem::take(&mut *guard);
        drop(guard);
        (next, self.kill_requested())
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
