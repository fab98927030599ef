//! OS-level events used for cross-thread signalling.
//!
//! Two flavors, matching the two events a [`crate::worker::Worker`] owns:
//! an auto-reset event for `signal_transact` (each observation consumes the
//! signal -- spurious wakes are harmless because the drain step always
//! re-checks the mailbox under its own mutex) and a manual-reset event for
//! `signal_ended` (once raised, it stays raised for every observer).

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// An auto-reset event: each observation in [`AutoResetEvent::wait_timeout`]
/// both observes and consumes the signal, the way `WaitOneLowLevel` consumes
/// `signal_transact` once per trip's watchdog registration.
pub struct AutoResetEvent {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl AutoResetEvent {
    pub fn new() -> Self {
        AutoResetEvent { signalled: Mutex::new(false), condvar: Condvar::new() }
    }

    /// Raise the event, waking exactly one waiter if any is blocked in
    /// [`Self::wait_timeout`].
    pub fn signal(&self) {
        *self.signalled.lock() = true;
        self.condvar.notify_all();
    }

    /// Block until signalled or `timeout` elapses. Returns `true` if
    /// signalled (and consumes the flag), `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.signalled.lock();
        if *guard {
            *guard = false;
            return true;
        }
        let result = self.condvar.wait_for(&mut guard, timeout);
        if *guard && !result.timed_out() {
            *guard = false;
            true
        } else if *guard {
            // Woke up near the deadline but the flag is set anyway.
            *guard = false;
            true
        } else {
            false
        }
    }
}

impl Default for AutoResetEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// A manual-reset event: once raised it stays raised for every observer.
/// Used for `signal_ended` (shutdown is a one-way door) and as the basis for
/// [`crate::wait_source::ManualResetWaitSource`].
pub struct ManualResetEvent {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl ManualResetEvent {
    pub fn new() -> Self {
        ManualResetEvent { signalled: Mutex::new(false), condvar: Condvar::new() }
    }

    pub fn signal(&self) {
        *self.signalled.lock() = true;
        self.condvar.notify_all();
    }

    pub fn is_signalled(&self) -> bool {
        *self.signalled.lock()
    }

    pub fn wait(&self) {
        let mut guard = self.signalled.lock();
        while !*guard {
            self.condvar.wait(&mut guard);
        }
    }
}

impl Default for ManualResetEvent {
    fn default() -> Self {
        Self::new()
    }
}
