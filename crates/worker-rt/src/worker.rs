//! The single-threaded cooperative worker: one OS thread (owned or
//! donated), one [`Reactor`], and the trip loop that ties the cross-thread
//! mailbox to it.
//!
//! The trip algorithm: drain external, schedule the transact watchdog, run
//! the loop, check termination.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::allocator::AllocatorHandle;
use crate::clock::Clock;
use crate::error::{Status, WorkerError};
use crate::event::{AutoResetEvent, ManualResetEvent};
use crate::mailbox::{Mailbox, Thunk};
use crate::reactor::{LowLevelCallback, Priority, Reactor, RunOutcome};
use crate::wait_source::WaitSource;

/// Default quantum: the maximum wall time a trip may block before
/// returning control for external maintenance.
pub const DEFAULT_QUANTUM: Duration = Duration::from_millis(500);

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// The (worker id, weak backpointer) of the `Worker` whose trip loop is
    /// running on this OS thread, if any. Installed right before
    /// `OnThreadStart` fires, cleared right after `OnThreadStop` -- see
    /// design note "Thread-local current-worker pointer".
    static CURRENT: RefCell<Option<(u64, Weak<Worker>)>> = const { RefCell::new(None) };
}

/// Extension points a language-binding subclass uses to install a per-thread
/// host coroutine scheduler without the base `Worker` knowing anything
/// about it. The base `Worker` only ever calls these two hooks.
pub trait WorkerHooks: Send + Sync {
    /// Runs on the worker thread immediately after the loop initializes,
    /// before the first trip.
    fn on_thread_start(&self, _worker: &Arc<Worker>) {}

    /// Runs on the worker thread immediately before loop teardown, after
    /// the last trip. The thread-local current-worker pointer is cleared
    /// right after this returns.
    fn on_thread_stop(&self, _worker: &Arc<Worker>) {}
}

/// The hooks implementation used when no language binding is attached.
pub struct NoopHooks;
impl WorkerHooks for NoopHooks {}

/// Construction options for a [`Worker`]. Defaults to a 500ms quantum and
/// an owned thread.
pub struct WorkerOptions {
    pub name: String,
    pub allocator: AllocatorHandle,
    pub quantum: Duration,
    pub owned_thread: bool,
    pub hooks: Arc<dyn WorkerHooks>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions {
            name: "worker".to_string(),
            allocator: AllocatorHandle::default(),
            quantum: DEFAULT_QUANTUM,
            owned_thread: true,
            hooks: Arc::new(NoopHooks),
        }
    }
}

impl fmt::Debug for WorkerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerOptions")
            .field("name", &self.name)
            .field("quantum", &self.quantum)
            .field("owned_thread", &self.owned_thread)
            .finish_non_exhaustive()
    }
}

/// A single-threaded cooperative executor bound to one loop and one OS
/// thread.
pub struct Worker {
    id: u64,
    name: String,
    #[allow(dead_code)] // passed through opaquely; not interpreted by this crate (see AllocatorHandle).
    allocator: AllocatorHandle,
    quantum: Duration,
    owned_thread: bool,
    clock: Clock,
    reactor: Reactor,
    mailbox: Mailbox,
    has_run: AtomicBool,
    signal_transact: AutoResetEvent,
    signal_ended: ManualResetEvent,
    shutdown_status: Mutex<Option<Status>>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    hooks: Arc<dyn WorkerHooks>,
}

impl Worker {
    /// Construct a new, not-yet-started worker.
    pub fn new(options: WorkerOptions) -> Arc<Worker> {
        Arc::new(Worker {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
            name: options.name,
            allocator: options.allocator,
            quantum: options.quantum,
            owned_thread: options.owned_thread,
            clock: Clock::new(),
            reactor: Reactor::new(),
            mailbox: Mailbox::new(),
            has_run: AtomicBool::new(false),
            signal_transact: AutoResetEvent::new(),
            signal_ended: ManualResetEvent::new(),
            shutdown_status: Mutex::new(None),
            thread_handle: Mutex::new(None),
            hooks: options.hooks,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quantum(&self) -> Duration {
        self.quantum
    }

    pub fn owned_thread(&self) -> bool {
        self.owned_thread
    }

    /// The worker associated with the running thread, if any.
    pub fn current() -> Result<Arc<Worker>, WorkerError> {
        CURRENT.with(|cell| {
            cell.borrow()
                .as_ref()
                .and_then(|(_, weak)| weak.upgrade())
                .ok_or(WorkerError::NoCurrentWorker)
        })
    }

    fn is_current_thread(&self) -> bool {
        CURRENT.with(|cell| cell.borrow().as_ref().map(|(id, _)| *id) == Some(self.id))
    }

    fn assert_on_worker_thread(&self) -> Result<(), WorkerError> {
        if self.is_current_thread() {
            Ok(())
        } else {
            Err(WorkerError::WrongThread)
        }
    }

    /// Spawn the OS thread that runs the loop entrypoint. Only valid for
    /// `owned_thread = true` workers that have not yet run.
    pub fn start(self: &Arc<Self>) -> Result<(), WorkerError> {
        if !self.owned_thread {
            return Err(WorkerError::WrongEntrypoint {
                owned_thread: false,
                expected: "run_on_current_thread",
            });
        }
        if self.has_run.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted);
        }

        let worker = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker.run_loop())
            .expect("failed to spawn worker OS thread");
        *self.thread_handle.lock() = Some(handle);
        Ok(())
    }

    /// Run the loop entrypoint inline on the calling thread, returning only
    /// after shutdown. Only valid for `owned_thread = false` workers that
    /// have not yet run.
    pub fn run_on_current_thread(self: &Arc<Self>) -> Result<(), WorkerError> {
        if self.owned_thread {
            return Err(WorkerError::WrongEntrypoint { owned_thread: true, expected: "start" });
        }
        if self.has_run.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted);
        }
        Arc::clone(self).run_loop();
        self.shutdown_result()
    }

    /// Request termination. Idempotent, callable from any thread, never
    /// blocks, never joins.
    pub fn kill(&self) {
        trace!(worker = %self.name, "kill requested");
        self.mailbox.request_kill();
        self.signal_transact.signal();
    }

    /// Block until `signal_ended` is raised, then propagate whatever status
    /// the loop exited with.
    pub fn wait_for_shutdown(&self) -> Result<(), WorkerError> {
        self.signal_ended.wait();
        self.shutdown_result()
    }

    fn shutdown_result(&self) -> Result<(), WorkerError> {
        match self.shutdown_status.lock().clone() {
            Some(Status::Err(message)) => {
                Err(WorkerError::CallbackFailed { status: Status::Err(message) })
            }
            _ => Ok(()),
        }
    }

    /// Off-loop submission: appends `cb` to the mailbox and wakes the loop.
    /// FIFO with respect to other `call_threadsafe` calls from the same
    /// submitting thread; no ordering guarantee across threads.
    pub fn call_threadsafe<F>(self: &Arc<Self>, cb: F)
    where
        F: FnOnce(&Arc<Worker>) + Send + 'static,
    {
        let thunk: Thunk = Box::new(cb);
        self.mailbox.push(thunk);
        self.signal_transact.signal();
    }

    /// On-loop submission: must be called from this worker's own thread.
    pub fn call_low_level(&self, priority: Priority, cb: LowLevelCallback) -> Result<(), WorkerError> {
        self.assert_on_worker_thread()?;
        match self.reactor.submit_callback(priority, cb) {
            Status::Ok => Ok(()),
            other => Err(WorkerError::SubmissionFailed(other)),
        }
    }

    /// On-loop timer submission; `deadline_ns` is absolute, on this
    /// worker's clock (see [`Worker::now_ns`]/[`Worker::convert_relative_timeout_to_deadline_ns`]).
    pub fn wait_until_low_level(&self, deadline_ns: u64, cb: LowLevelCallback) -> Result<(), WorkerError> {
        self.assert_on_worker_thread()?;
        let deadline = self.clock.instant_for(deadline_ns);
        match self.reactor.submit_timer(deadline, cb) {
            Status::Ok => Ok(()),
            other => Err(WorkerError::SubmissionFailed(other)),
        }
    }

    /// On-loop wait-source submission; fires when `wait_source` is
    /// signalled or `timeout` elapses (`None` means wait indefinitely).
    pub fn wait_one_low_level(
        &self,
        wait_source: Arc<dyn WaitSource>,
        timeout: Option<Duration>,
        cb: LowLevelCallback,
    ) -> Result<(), WorkerError> {
        self.assert_on_worker_thread()?;
        match self.reactor.submit_wait_one(wait_source, timeout, cb) {
            Status::Ok => Ok(()),
            other => Err(WorkerError::SubmissionFailed(other)),
        }
    }

    /// Nanoseconds elapsed since this worker's clock epoch.
    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    /// Convert a relative timeout into an absolute deadline on this
    /// worker's clock, suitable for `wait_until_low_level`.
    pub fn convert_relative_timeout_to_deadline_ns(&self, timeout: Duration) -> u64 {
        self.clock.deadline_from_now_ns(timeout)
    }

    /// The trip loop: drain external, schedule the watchdog, run the
    /// reactor, check termination. Runs on whichever thread called
    /// `start`'s spawn closure or `run_on_current_thread`.
    fn run_loop(self: Arc<Self>) {
        CURRENT.with(|cell| *cell.borrow_mut() = Some((self.id, Arc::downgrade(&self))));
        self.hooks.on_thread_start(&self);

        let status = self.trip_loop();

        self.hooks.on_thread_stop(&self);
        CURRENT.with(|cell| *cell.borrow_mut() = None);

        self.reactor.cancel_all();
        *self.shutdown_status.lock() = Some(status);
        self.signal_ended.signal();
    }

    fn trip_loop(&self) -> Status {
        loop {
            let (batch, killed) = self.mailbox.drain();
            for thunk in batch {
                let worker = match Self::current() {
                    Ok(w) => w,
                    Err(_) => return Status::Err("worker not current on its own thread".into()),
                };
                let result =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| thunk(&worker)));
                if let Err(payload) = result {
                    let message = crate::panic_message(&payload);
                    warn!(worker = %self.name, %message, "CallThreadsafe thunk panicked");
                    return Status::Err(message);
                }
            }

            if killed {
                trace!(worker = %self.name, "kill observed after drain, exiting trip loop");
                return Status::Ok;
            }

            let deadline = Instant::now() + self.quantum;
            trace!(worker = %self.name, quantum_ms = self.quantum.as_millis() as u64, "entering trip");
            match self.reactor.run_until(deadline, &self.signal_transact) {
                RunOutcome::Failed(status) => {
                    warn!(worker = %self.name, %status, "callback aborted trip");
                    return status;
                }
                RunOutcome::Deadline | RunOutcome::Woken => {}
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.owned_thread {
            if let Some(handle) = self.thread_handle.lock().take() {
                let _ = handle.join();
            }
        }
    }
}
