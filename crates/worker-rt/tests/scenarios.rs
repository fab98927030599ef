//! Black-box scenario tests covering worker/process/foreground-runner
//! concurrency end to end. Each spawns real OS threads and asserts on
//! shared state rather than relying on a mocked-clock harness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use worker_rt::foreground::run_until_done_with_interrupt_flag;
use worker_rt::process::{Process, RunOutcome};
use worker_rt::reactor::Priority;
use worker_rt::wait_source::ManualResetWaitSource;
use worker_rt::worker::{Worker, WorkerOptions};

fn worker_with_quantum(quantum: Duration, owned_thread: bool) -> Arc<Worker> {
    Worker::new(WorkerOptions { quantum, owned_thread, ..Default::default() })
}

/// Scenario 1: ping-pong. `CallThreadsafe(A)` then `CallThreadsafe(B; Kill)`
/// from the test thread; expect trace `["A", "B"]` and shutdown within
/// 2 * quantum.
#[test]
fn scenario_1_ping_pong() {
    let quantum = Duration::from_millis(50);
    let worker = worker_with_quantum(quantum, true);
    let trace = Arc::new(Mutex::new(Vec::new()));

    let trace_a = Arc::clone(&trace);
    worker.call_threadsafe(move |_w| trace_a.lock().unwrap().push("A"));
    let trace_b = Arc::clone(&trace);
    let worker_for_kill = Arc::clone(&worker);
    worker.call_threadsafe(move |_w| {
        trace_b.lock().unwrap().push("B");
        worker_for_kill.kill();
    });

    let start = Instant::now();
    worker.start().unwrap();
    worker.wait_for_shutdown().unwrap();

    assert_eq!(*trace.lock().unwrap(), vec!["A", "B"]);
    assert!(start.elapsed() <= quantum * 2);
}

/// Scenario 2: timer precision. On-loop, schedule a 50ms timer; expect it
/// to fire in `[50ms, 50ms + quantum]`.
#[test]
fn scenario_2_timer_precision() {
    let quantum = Duration::from_millis(100);
    let worker = worker_with_quantum(quantum, true);
    let (tx, rx) = mpsc::channel();

    let worker_for_timer = Arc::clone(&worker);
    worker.call_threadsafe(move |w| {
        let deadline_ns = w.convert_relative_timeout_to_deadline_ns(Duration::from_millis(50));
        let worker_for_cb = Arc::clone(&worker_for_timer);
        w.wait_until_low_level(
            deadline_ns,
            Box::new(move |_reactor, status| {
                tx.send(Instant::now()).unwrap();
                worker_for_cb.kill();
                status
            }),
        )
        .unwrap();
    });

    let start = Instant::now();
    worker.start().unwrap();
    worker.wait_for_shutdown().unwrap();
    let fired_at = rx.recv().unwrap();

    let delta = fired_at - start;
    assert!(delta >= Duration::from_millis(50));
    assert!(delta <= Duration::from_millis(50) + quantum);
}

/// Scenario 3: wait source. Register `WaitOneLowLevel(ws, infinite, cb)`;
/// from a sidecar thread, after 20ms, signal `ws`. Expect `cb` to run on
/// the worker with an ok status before 100ms elapse.
#[test]
fn scenario_3_wait_source_signalled_from_sidecar() {
    let worker = worker_with_quantum(Duration::from_millis(50), true);
    let source = ManualResetWaitSource::new();
    let (tx, rx) = mpsc::channel();

    let worker_for_wait = Arc::clone(&worker);
    let source_for_wait = Arc::clone(&source);
    worker.call_threadsafe(move |w| {
        let worker_for_cb = Arc::clone(&worker_for_wait);
        w.wait_one_low_level(
            source_for_wait,
            None,
            Box::new(move |_reactor, status| {
                tx.send(status.is_ok()).unwrap();
                worker_for_cb.kill();
                status
            }),
        )
        .unwrap();
    });

    worker.start().unwrap();
    let sidecar = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        source.signal();
    });

    let start = Instant::now();
    let observed_ok = rx.recv().unwrap();
    worker.wait_for_shutdown().unwrap();
    sidecar.join().unwrap();

    assert!(observed_ok);
    assert!(start.elapsed() < Duration::from_millis(100));
}

/// Scenario 4: donated thread. Construct a worker with `owned_thread =
/// false`; `CallThreadsafe(Kill)` then `RunOnCurrentThread`. Expect the
/// call to return and `GetCurrent()` inside the callback to resolve to
/// this worker.
#[test]
fn scenario_4_donated_thread() {
    let worker = worker_with_quantum(Duration::from_millis(50), false);
    let (tx, rx) = mpsc::channel();

    let worker_for_cb = Arc::clone(&worker);
    worker.call_threadsafe(move |_w| {
        let current_is_self =
            Worker::current().map(|c| Arc::ptr_eq(&c, &worker_for_cb)).unwrap_or(false);
        tx.send(current_is_self).unwrap();
        worker_for_cb.kill();
    });

    worker.run_on_current_thread().unwrap();
    assert!(rx.recv().unwrap());
}

/// Scenario 5: process lifecycle. Launch a process whose `run` completes
/// synchronously; immediately await `OnTermination()`. Expect it to
/// resolve without hanging.
#[test]
fn scenario_5_process_lifecycle_synchronous() {
    let worker = worker_with_quantum(Duration::from_millis(50), true);
    let process = Process::new(Arc::clone(&worker));
    let termination = process.on_termination();

    let worker_for_routine = Arc::clone(&worker);
    process
        .launch(Box::new(move |_p| {
            worker_for_routine.kill();
            RunOutcome::Finished
        }))
        .unwrap();

    worker.start().unwrap();

    let start = Instant::now();
    termination.wait();
    assert!(start.elapsed() < Duration::from_secs(1));

    worker.wait_for_shutdown().unwrap();
}

/// Scenario 6: foreground runner interruption. Simulate a sidecar-thread
/// interrupt during the join; expect kill, join, and `Interrupted` to be
/// reported in that order (no hang, no panic propagating past the call).
#[test]
fn scenario_6_foreground_runner_interruption() {
    let worker = worker_with_quantum(Duration::from_millis(20), false);
    let interrupt = Arc::new(AtomicBool::new(false));
    let interrupt_for_flip = Arc::clone(&interrupt);

    thread::spawn(move || {
        thread::sleep(Duration::from_millis(15));
        interrupt_for_flip.store(true, Ordering::SeqCst);
    });

    let routine_ran = Arc::new(AtomicBool::new(false));
    let routine_ran_for_closure = Arc::clone(&routine_ran);

    let result = run_until_done_with_interrupt_flag(
        worker,
        move |_w| {
            // A routine that never kills the worker on its own -- only the
            // interrupt path should end this run.
            routine_ran_for_closure.store(true, Ordering::SeqCst);
        },
        interrupt,
    );

    assert!(routine_ran.load(Ordering::SeqCst));
    assert!(result.is_err());
}

/// Priority ordering: default-priority `CallLowLevel` submissions run
/// before low-priority ones within a single trip.
#[test]
fn low_level_default_priority_precedes_low_priority() {
    let worker = worker_with_quantum(Duration::from_millis(50), true);
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_for_low = Arc::clone(&order);
    let order_for_default = Arc::clone(&order);
    let worker_for_cb = Arc::clone(&worker);
    worker.call_threadsafe(move |w| {
        w.call_low_level(
            Priority::Low,
            Box::new(move |_r, s| {
                order_for_low.lock().unwrap().push("low");
                s
            }),
        )
        .unwrap();
        let worker_for_kill = Arc::clone(&worker_for_cb);
        w.call_low_level(
            Priority::Default,
            Box::new(move |_r, s| {
                order_for_default.lock().unwrap().push("default");
                worker_for_kill.kill();
                s
            }),
        )
        .unwrap();
    });

    worker.start().unwrap();
    worker.wait_for_shutdown().unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["default", "low"]);
}
