//! The Process abstraction: run an asynchronous routine on a worker and
//! signal observers when it terminates.
//!
//! `ProcessId` is a bit-packed identifier (40-bit local id / 8-bit creation
//! counter / 16-bit scope id) rather than a bare counter, even though a
//! single-node worker runtime only ever produces scope id 0 today.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ProcessError;
use crate::wait_source::{ManualResetWaitSource, WaitSource};
use crate::worker::Worker;

/// Bit-packed process identifier: `[16-bit scope_id | 8-bit creation | 40-bit local_id]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(u64);

const LOCAL_ID_MASK: u64 = 0x0000_00FF_FFFF_FFFF;

impl ProcessId {
    /// Generate a fresh, globally unique local id on scope 0, creation 0.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        ProcessId(COUNTER.fetch_add(1, Ordering::Relaxed) & LOCAL_ID_MASK)
    }

    /// Construct a PID with an explicit scope and creation, e.g. for a
    /// future multi-scope extension not yet designed.
    pub fn with_scope(scope_id: u16, creation: u8, local_id: u64) -> Self {
        debug_assert!(local_id <= LOCAL_ID_MASK, "local_id exceeds 40 bits: {local_id}");
        ProcessId((scope_id as u64) << 48 | (creation as u64) << 40 | (local_id & LOCAL_ID_MASK))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn scope_id(self) -> u16 {
        (self.0 >> 48) as u16
    }

    pub fn creation(self) -> u8 {
        ((self.0 >> 40) & 0xFF) as u8
    }

    pub fn local_id(self) -> u64 {
        self.0 & LOCAL_ID_MASK
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId({})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}.{}.{}>", self.scope_id(), self.local_id(), self.creation())
    }
}

/// `Initialized --Launch()--> Running --<routine end>--> Terminated`. Monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Initialized,
    Running,
    Terminated,
}

/// What a launched routine returns: either it is done, or it handed back a
/// continuation that will eventually finish.
pub enum RunOutcome {
    Finished,
    Continuation(Box<dyn Continuation>),
}

/// A pending asynchronous result a `Process`'s routine returned. The
/// process attaches a completion callback via `on_finish` and calls
/// `Terminate()` from it, exactly once, when the continuation finishes.
pub trait Continuation: Send {
    fn on_finish(self: Box<Self>, on_done: Box<dyn FnOnce() + Send>);
}

/// The user-provided routine a launched `Process` runs on its worker.
pub type Routine = Box<dyn FnOnce(&Arc<Process>) -> RunOutcome + Send>;

/// A launched asynchronous routine with an observable termination.
pub struct Process {
    worker: Arc<Worker>,
    pid: ProcessId,
    state: Mutex<ProcessState>,
    termination: Arc<ManualResetWaitSource>,
    launched: AtomicBool,
}

impl Process {
    /// Construct an `Initialized` process bound to `worker`. Does not
    /// schedule anything until `launch` is called.
    pub fn new(worker: Arc<Worker>) -> Arc<Process> {
        Arc::new(Process {
            worker,
            pid: ProcessId::next(),
            state: Mutex::new(ProcessState::Initialized),
            termination: ManualResetWaitSource::new(),
            launched: AtomicBool::new(false),
        })
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    /// A wait source that becomes signalled exactly once, when this
    /// process terminates, and stays signalled thereafter. Any number of
    /// observers may await it.
    pub fn on_termination(&self) -> Arc<dyn WaitSource> {
        Arc::clone(&self.termination) as Arc<dyn WaitSource>
    }

    /// Idempotent against repeated calls: a second `launch` is an error.
    /// Posts a one-shot thunk via `CallThreadsafe` that, on-loop, invokes
    /// `routine`. The process (and hence the worker) holds a strong
    /// reference across the thread boundary via the thunk's closure --
    /// the cross-thread reference handoff called out in the design notes.
    pub fn launch(self: &Arc<Self>, routine: Routine) -> Result<ProcessId, ProcessError> {
        if self.launched.swap(true, Ordering::SeqCst) {
            return Err(ProcessError::AlreadyLaunched);
        }
        *self.state.lock() = ProcessState::Running;

        let this = Arc::clone(self);
        self.worker.call_threadsafe(move |_worker| {
            this.run_routine(routine);
        });
        Ok(self.pid)
    }

    fn run_routine(self: Arc<Self>, routine: Routine) {
        match routine(&self) {
            RunOutcome::Finished => self.terminate(),
            RunOutcome::Continuation(continuation) => {
                let this = Arc::clone(&self);
                continuation.on_finish(Box::new(move || this.terminate()));
            }
        }
    }

    /// Called exactly once, on-loop, and signals `termination`. Safe to
    /// call more than once defensively (e.g. a continuation racing with a
    /// supervisor) -- later calls are no-ops.
    pub fn terminate(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if *state == ProcessState::Terminated {
            return;
        }
        *state = ProcessState::Terminated;
        drop(state);
        self.termination.signal();
    }
}
