//! Error and status types shared across the worker runtime.
//!
//! `Status` is the value threaded through the low-level loop's callbacks
//! (mirrors a C-ABI status code); `WorkerError`, `ProcessError` and
//! `ForegroundError` are the typed, idiomatic-Rust errors surfaced from the
//! public API, one per fallible surface (`Worker`, `Process`, the foreground
//! runner) rather than a single stringly-typed catch-all.

use std::fmt;

/// Outcome of a single low-level callback invocation.
///
/// `Ok` is the only success value. `Cancelled` and `TimedOut` are not
/// errors -- they happen routinely (teardown, and `WaitOneLowLevel`
/// timeouts, respectively) and a callback is expected to handle both.
/// `Err` carries a message, produced either by a callback returning failure
/// directly or by catching a panic at the loop boundary (the Rust analogue
/// of the "foreign exception" case in other-language bindings).
#[derive(Debug, Clone)]
pub enum Status {
    Ok,
    Cancelled,
    TimedOut,
    Err(String),
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Status::Cancelled)
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Status::TimedOut)
    }

    pub fn is_err(&self) -> bool {
        matches!(self, Status::Err(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::Cancelled => write!(f, "cancelled"),
            Status::TimedOut => write!(f, "timed out"),
            Status::Err(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// Errors surfaced by [`crate::worker::Worker`].
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker already started or run once; workers are single-use")]
    AlreadyStarted,

    #[error("wrong entrypoint for this worker: owned_thread={owned_thread}, use {expected}")]
    WrongEntrypoint {
        owned_thread: bool,
        expected: &'static str,
    },

    #[error("no worker is current on this thread")]
    NoCurrentWorker,

    #[error("low-level submission was rejected: {0}")]
    SubmissionFailed(Status),

    #[error("a callback aborted its trip: {status}")]
    CallbackFailed { status: Status },

    #[error("CallLowLevel-family calls must run on the worker thread")]
    WrongThread,
}

impl Clone for WorkerError {
    fn clone(&self) -> Self {
        match self {
            WorkerError::AlreadyStarted => WorkerError::AlreadyStarted,
            WorkerError::WrongEntrypoint { owned_thread, expected } => {
                WorkerError::WrongEntrypoint { owned_thread: *owned_thread, expected }
            }
            WorkerError::NoCurrentWorker => WorkerError::NoCurrentWorker,
            WorkerError::SubmissionFailed(s) => WorkerError::SubmissionFailed(s.clone()),
            WorkerError::CallbackFailed { status } => {
                WorkerError::CallbackFailed { status: status.clone() }
            }
            WorkerError::WrongThread => WorkerError::WrongThread,
        }
    }
}

/// Errors surfaced by [`crate::process::Process`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessError {
    #[error("process already launched")]
    AlreadyLaunched,

    #[error("failed to schedule process on its worker: {0}")]
    Worker(#[from] WorkerError),
}

/// Errors surfaced by [`crate::foreground::run_until_done`].
#[derive(Debug, thiserror::Error)]
pub enum ForegroundError {
    #[error("failed to spawn the foreground sidecar thread: {0}")]
    SpawnFailed(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("foreground runner was interrupted; worker killed and joined before re-raising")]
    Interrupted,

    #[error("sidecar worker thread was lost before reporting shutdown")]
    SidecarLost,
}
