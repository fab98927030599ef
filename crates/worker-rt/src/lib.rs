//! Single-threaded cooperative worker loops for a heterogeneous compute
//! runtime (host CPU + accelerator devices, e.g. GPU).
//!
//! This crate is the concurrency contract the rest of such a stack (device
//! managers, scopes, array storage, language bindings) would rely on. It
//! drives one cooperative loop per OS thread (owned or donated), multiplexes
//! cross-thread callbacks, on-loop timers, and wait-source completions, and
//! layers a lightweight `Process` abstraction on top that runs a user
//! routine to termination and reports completion through a wait source.
//!
//! Device enumeration, memory/array storage, HAL driver selection, and the
//! high-level language-binding surface are all out of scope. This crate's
//! own [`reactor::Reactor`] is a minimal, host-only cooperative loop,
//! sufficient to host real timers, real cross-thread wakeups, and real
//! (test) wait sources without any device I/O integration.
//!
//! ## Modules
//!
//! - [`worker`]: the `Worker` itself -- the trip loop, `CallThreadsafe`,
//!   `CallLowLevel`/`WaitUntilLowLevel`/`WaitOneLowLevel`, `Start` /
//!   `RunOnCurrentThread` / `Kill` / `WaitForShutdown`.
//! - [`mailbox`]: the cross-thread FIFO `CallThreadsafe` submissions land in.
//! - [`reactor`]: the priority-queue/timer-heap/wait-source-registry loop.
//! - [`process`]: `Process`, `ProcessId`, the launch/terminate lifecycle.
//! - [`completion`]: the wait-source-to-host-scheduler awaitable bridge.
//! - [`foreground`]: the system-level `run_until_done` entrypoint.
//! - [`wait_source`]: the `WaitSource` trait and `ManualResetWaitSource`.
//! - [`event`]: OS-level auto-reset/manual-reset events.
//! - [`clock`]: the worker's monotonic nanosecond clock.
//! - [`allocator`]: the opaque allocator handle threaded through unchanged.
//! - [`error`]: `Status`, `WorkerError`, `ProcessError`, `ForegroundError`.

pub mod allocator;
pub mod clock;
pub mod completion;
pub mod error;
pub mod event;
pub mod foreground;
pub mod mailbox;
pub mod process;
pub mod reactor;
pub mod wait_source;
pub mod worker;

pub use allocator::AllocatorHandle;
pub use completion::{CompletionEvent, HostScheduler, ManualCompletion, WaitError};
pub use error::{ForegroundError, ProcessError, Status, WorkerError};
pub use foreground::run_until_done;
pub use process::{Process, ProcessId, ProcessState, Routine as ProcessRoutine, RunOutcome};
pub use reactor::Priority;
pub use wait_source::{ManualResetWaitSource, WaitSource};
pub use worker::{Worker, WorkerHooks, WorkerOptions};

/// Render a `std::panic::catch_unwind` payload as a message, used at every
/// point a callback crosses the reactor/mailbox boundary so a panic never
/// unwinds through it.
pub(crate) fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked with a non-string payload".to_string()
    }
}
