//! The foreground runner: the system-level "run this coroutine until done"
//! entrypoint.
//!
//! On the process main thread it shields the loop from OS signal delivery
//! (e.g. Ctrl-C) by running the loop on a sidecar OS thread and polling for
//! completion, rather than letting a signal land mid-trip. The shield is
//! wired to `SIGINT` via `signal-hook`;
//! `run_until_done_with_interrupt_flag` exposes the underlying mechanism
//! directly so tests can simulate an interrupt without sending a real
//! signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use tracing::warn;

use crate::error::{ForegroundError, WorkerError};
use crate::worker::Worker;

static MAIN_THREAD_ID: OnceLock<ThreadId> = OnceLock::new();

/// How often the main thread polls the sidecar for completion or the
/// interrupt flag for a signal. Bounds how late a shielded interrupt is
/// noticed; small relative to any reasonable `quantum`.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn is_main_thread() -> bool {
    let current = thread::current().id();
    *MAIN_THREAD_ID.get_or_init(|| current) == current
}

/// Run `routine` on `worker` until it (and the worker) finish, installing
/// the main-thread signal shield described above when invoked from the
/// process main thread.
///
/// 1. Schedules `routine` via `CallThreadsafe`; when it returns, kills the
///    worker.
/// 2. If on the main thread, spawns a sidecar thread to call
///    `run_on_current_thread` and joins it while shielding this thread
///    from interrupts; otherwise runs inline.
/// 3. If an interrupt is observed during the join, kills the worker, joins
///    again, and returns `Err(ForegroundError::Interrupted)`.
pub fn run_until_done<F>(worker: Arc<Worker>, routine: F) -> Result<(), ForegroundError>
where
    F: FnOnce(&Arc<Worker>) + Send + 'static,
{
    let interrupt = Arc::new(AtomicBool::new(false));
    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupt)) {
        warn!(%err, "could not install SIGINT shield for the foreground runner");
    }
    run_until_done_with_interrupt_flag(worker, routine, interrupt)
}

/// Same as [`run_until_done`], but takes the interrupt flag as a parameter
/// instead of wiring it to `SIGINT` -- lets tests simulate the "thrown
/// termination during join" scenario deterministically.
pub fn run_until_done_with_interrupt_flag<F>(
    worker: Arc<Worker>,
    routine: F,
    interrupt: Arc<AtomicBool>,
) -> Result<(), ForegroundError>
where
    F: FnOnce(&Arc<Worker>) + Send + 'static,
{
    run_until_done_inner(worker, routine, interrupt, is_main_thread())
}

fn run_until_done_inner<F>(
    worker: Arc<Worker>,
    routine: F,
    interrupt: Arc<AtomicBool>,
    is_main: bool,
) -> Result<(), ForegroundError>
where
    F: FnOnce(&Arc<Worker>) + Send + 'static,
{
    worker.call_threadsafe(move |w| {
        routine(w);
        w.kill();
    });

    if !is_main {
        return worker.run_on_current_thread().map_err(ForegroundError::from);
    }

    let sidecar_worker = Arc::clone(&worker);
    let (done_tx, done_rx) = crossbeam_channel::bounded::<Result<(), WorkerError>>(1);
    let handle = thread::Builder::new()
        .name("worker-rt-foreground".to_string())
        .spawn(move || {
            let result = sidecar_worker.run_on_current_thread();
            let _ = done_tx.send(result);
        })
        .map_err(|e| ForegroundError::SpawnFailed(e.to_string()))?;

    loop {
        match done_rx.recv_timeout(POLL_INTERVAL) {
            Ok(result) => {
                let _ = handle.join();
                return result.map_err(ForegroundError::from);
            }
            Err(RecvTimeoutError::Timeout) => {
                if interrupt.swap(false, Ordering::SeqCst) {
                    warn!("foreground runner interrupted; killing worker and shutting down");
                    worker.kill();
                    let _ = done_rx.recv();
                    let _ = handle.join();
                    return Err(ForegroundError::Interrupted);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                return Err(ForegroundError::SidecarLost);
            }
        }
    }
}
