//! The minimal, host-only cooperative loop a `Worker` drives.
//!
//! Device wait-source implementations and HAL initialization are a driver
//! concern handled elsewhere; this module gives `Worker` something concrete
//! to drive: a priority-ordered ready queue, a deadline-ordered timer heap,
//! and a registry of boxed [`WaitSource`] trait objects polled
//! cooperatively -- sufficient to host real timers, real cross-thread
//! wakeups, and real wait sources without any device I/O integration
//! (no epoll/io_uring/IOCP; that belongs to the HAL).
//!
//! `Worker` is generic over nothing here; it simply owns one `Reactor`.
//! A downstream device backend that wants a real I/O-driven loop would
//! swap this module out behind the same four submission methods.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::Status;
use crate::event::AutoResetEvent;
use crate::wait_source::WaitSource;

/// How often `run_until` re-polls wait sources and timers while otherwise
/// idle. Trades a little latency (bounded by this constant) for a reactor
/// with no platform-specific wakeup primitive beyond the events already in
/// [`crate::event`].
pub const POLL_GRANULARITY: Duration = Duration::from_millis(1);

/// Priority class for `CallLowLevel`. Higher-priority callbacks run before
/// lower-priority ones within a trip; FIFO within a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Default,
    Low,
}

/// A callback registered with the reactor. Receives the reactor itself (the
/// current loop handle) and a status, and returns the status that should
/// abort the trip if non-ok.
pub type LowLevelCallback = Box<dyn FnOnce(&Reactor, Status) -> Status + Send>;

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    callback: LowLevelCallback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    // Reversed so `BinaryHeap` (a max-heap) pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.deadline.cmp(&self.deadline).then_with(|| other.seq.cmp(&self.seq))
    }
}

struct WaitEntry {
    source: Arc<dyn WaitSource>,
    deadline: Option<Instant>,
    callback: LowLevelCallback,
}

/// What interrupted a call to [`Reactor::run_until`].
pub enum RunOutcome {
    /// The requested deadline was reached with no fatal status.
    Deadline,
    /// `wake` fired before the deadline.
    Woken,
    /// A callback returned a non-ok status; the trip must abort with it.
    Failed(Status),
}

/// The priority-queue + timer-heap + wait-source-registry loop.
pub struct Reactor {
    default_queue: Mutex<VecDeque<LowLevelCallback>>,
    low_queue: Mutex<VecDeque<LowLevelCallback>>,
    timers: Mutex<BinaryHeap<TimerEntry>>,
    wait_entries: Mutex<FxHashMap<u64, WaitEntry>>,
    next_wait_id: AtomicU64,
    next_timer_seq: AtomicU64,
    closed: AtomicBool,
}

impl Reactor {
    pub fn new() -> Self {
        Reactor {
            default_queue: Mutex::new(VecDeque::new()),
            low_queue: Mutex::new(VecDeque::new()),
            timers: Mutex::new(BinaryHeap::new()),
            wait_entries: Mutex::new(FxHashMap::default()),
            next_wait_id: AtomicU64::new(0),
            next_timer_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Submit a callback at the given priority. Rejected (with
    /// `Status::Cancelled`) once the reactor has been closed at teardown.
    pub fn submit_callback(&self, priority: Priority, cb: LowLevelCallback) -> Status {
        if self.closed.load(Ordering::SeqCst) {
            return Status::Cancelled;
        }
        match priority {
            Priority::Default => self.default_queue.lock().push_back(cb),
            Priority::Low => self.low_queue.lock().push_back(cb),
        }
        Status::Ok
    }

    /// Submit a timer firing at or after `deadline`.
    pub fn submit_timer(&self, deadline: Instant, cb: LowLevelCallback) -> Status {
        if self.closed.load(Ordering::SeqCst) {
            return Status::Cancelled;
        }
        let seq = self.next_timer_seq.fetch_add(1, Ordering::Relaxed);
        self.timers.lock().push(TimerEntry { deadline, seq, callback: cb });
        Status::Ok
    }

    /// Register a one-shot wait over `source`, firing `cb` when signalled
    /// or when `timeout` elapses, whichever comes first. `timeout = None`
    /// means wait indefinitely.
    pub fn submit_wait_one(
        &self,
        source: Arc<dyn WaitSource>,
        timeout: Option<Duration>,
        cb: LowLevelCallback,
    ) -> Status {
        if self.closed.load(Ordering::SeqCst) {
            return Status::Cancelled;
        }
        let id = self.next_wait_id.fetch_add(1, Ordering::Relaxed);
        let deadline = timeout.map(|t| Instant::now() + t);
        self.wait_entries.lock().insert(id, WaitEntry { source, deadline, callback: cb });
        Status::Ok
    }

    /// Invoke a single callback, converting a panic into `Status::Err` so it
    /// never unwinds through the reactor (the Rust analogue of catching a
    /// foreign exception at the loop boundary).
    fn invoke(&self, cb: LowLevelCallback, status: Status) -> Status {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(self, status))) {
            Ok(result) => result,
            Err(payload) => Status::Err(crate::panic_message(&payload)),
        }
    }

    /// Drain whatever is immediately ready: all default-priority callbacks,
    /// then all low-priority ones, then all due timers. Returns `Err` if any
    /// callback aborted the trip.
    fn drain_ready(&self) -> Result<(), Status> {
        loop {
            let next = self.default_queue.lock().pop_front();
            let cb = match next {
                Some(cb) => cb,
                None => match self.low_queue.lock().pop_front() {
                    Some(cb) => cb,
                    None => break,
                },
            };
            let result = self.invoke(cb, Status::Ok);
            if let Status::Err(e) = result {
                return Err(Status::Err(e));
            }
        }

        loop {
            let now = Instant::now();
            let due = {
                let mut heap = self.timers.lock();
                match heap.peek() {
                    Some(entry) if entry.deadline <= now => heap.pop(),
                    _ => None,
                }
            };
            let entry = match due {
                Some(entry) => entry,
                None => break,
            };
            let result = self.invoke(entry.callback, Status::Ok);
            if let Status::Err(e) = result {
                return Err(Status::Err(e));
            }
        }

        let fired: Vec<(LowLevelCallback, Status)> = {
            let now = Instant::now();
            let mut entries = self.wait_entries.lock();
            let ready_ids: Vec<u64> = entries
                .iter()
                .filter_map(|(id, entry)| {
                    if entry.source.poll_signalled() {
                        Some((*id, Status::Ok))
                    } else if entry.deadline.map_or(false, |d| now >= d) {
                        Some((*id, Status::TimedOut))
                    } else {
                        None
                    }
                })
                .collect();
            ready_ids
                .into_iter()
                .map(|(id, status)| {
                    let entry = entries.remove(&id).expect("id just observed in this map");
                    (entry.callback, status)
                })
                .collect()
        };
        for (cb, status) in fired {
            let result = self.invoke(cb, status);
            if let Status::Err(e) = result {
                return Err(Status::Err(e));
            }
        }

        Ok(())
    }

    fn earliest_wakeup(&self, deadline: Instant) -> Instant {
        let mut earliest = deadline;
        if let Some(t) = self.timers.lock().peek().map(|e| e.deadline) {
            earliest = earliest.min(t);
        }
        if let Some(t) = self.wait_entries.lock().values().filter_map(|e| e.deadline).min() {
            earliest = earliest.min(t);
        }
        earliest
    }

    /// Run until `deadline` or until `wake` is signalled, servicing ready
    /// callbacks, due timers, and wait sources along the way. This is the
    /// trip loop's watchdog step: the caller arranges for `wake` to be
    /// `signal_transact` and `deadline` to be `now + quantum`.
    pub fn run_until(&self, deadline: Instant, wake: &AutoResetEvent) -> RunOutcome {
        loop {
            if let Err(status) = self.drain_ready() {
                return RunOutcome::Failed(status);
            }

            let now = Instant::now();
            if now >= deadline {
                return RunOutcome::Deadline;
            }

            let wakeup = self.earliest_wakeup(deadline).min(now + POLL_GRANULARITY);
            if wakeup > now && wake.wait_timeout(wakeup - now) {
                return RunOutcome::Woken;
            }
        }
    }

    /// Teardown: close the reactor to further submissions and fire every
    /// still-pending callback with `Status::Cancelled`, matching "wait-source
    /// callbacks registered with the loop receive a cancelled status at
    /// teardown". Panics from cancellation callbacks are swallowed -- there
    /// is no trip left to abort.
    pub fn cancel_all(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let mut callbacks = Vec::new();
        callbacks.extend(self.default_queue.lock().drain(..));
        callbacks.extend(self.low_queue.lock().drain(..));
        callbacks.extend(self.timers.lock().drain().map(|entry| entry.callback));
        callbacks.extend(self.wait_entries.lock().drain().map(|(_, entry)| entry.callback));

        for cb in callbacks {
            let _ = self.invoke(cb, Status::Cancelled);
        }
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait_source::ManualResetWaitSource;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn default_priority_runs_before_low_within_a_trip() {
        let reactor = Reactor::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        reactor.submit_callback(Priority::Low, Box::new(move |_r, s| { o1.lock().push("low"); s }));
        let o2 = Arc::clone(&order);
        reactor.submit_callback(Priority::Default, Box::new(move |_r, s| { o2.lock().push("default"); s }));

        let wake = AutoResetEvent::new();
        reactor.run_until(Instant::now() + Duration::from_millis(5), &wake);

        assert_eq!(*order.lock(), vec!["default", "low"]);
    }

    #[test]
    fn timer_fires_no_earlier_than_deadline() {
        let reactor = Reactor::new();
        let fired_at = Arc::new(Mutex::new(None));
        let start = Instant::now();
        let deadline = start + Duration::from_millis(30);

        let fa = Arc::clone(&fired_at);
        reactor.submit_timer(deadline, Box::new(move |_r, s| {
            *fa.lock() = Some(Instant::now());
            s
        }));

        let wake = AutoResetEvent::new();
        reactor.run_until(start + Duration::from_millis(200), &wake);

        let fired_at = fired_at.lock().expect("timer should have fired");
        assert!(fired_at >= deadline);
    }

    #[test]
    fn wait_source_delivers_ok_when_signalled() {
        let reactor = Reactor::new();
        let source = ManualResetWaitSource::new();
        let got = Arc::new(AtomicU32::new(0));

        let g = Arc::clone(&got);
        reactor.submit_wait_one(
            source.clone(),
            None,
            Box::new(move |_r, s| {
                if s.is_ok() {
                    g.fetch_add(1, Ordering::SeqCst);
                }
                s
            }),
        );

        source.signal();
        let wake = AutoResetEvent::new();
        reactor.run_until(Instant::now() + Duration::from_millis(20), &wake);

        assert_eq!(got.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_source_times_out() {
        let reactor = Reactor::new();
        let source = ManualResetWaitSource::new();
        let observed = Arc::new(Mutex::new(None));

        let o = Arc::clone(&observed);
        reactor.submit_wait_one(
            source,
            Some(Duration::from_millis(10)),
            Box::new(move |_r, s| {
                *o.lock() = Some(s.is_timed_out());
                Status::Ok
            }),
        );

        let wake = AutoResetEvent::new();
        reactor.run_until(Instant::now() + Duration::from_millis(100), &wake);

        assert_eq!(*observed.lock(), Some(true));
    }

    #[test]
    fn callback_failure_aborts_the_run() {
        let reactor = Reactor::new();
        reactor.submit_callback(Priority::Default, Box::new(|_r, _s| Status::Err("boom".into())));

        let wake = AutoResetEvent::new();
        match reactor.run_until(Instant::now() + Duration::from_millis(50), &wake) {
            RunOutcome::Failed(Status::Err(msg)) => assert_eq!(msg, "boom"),
            _ => panic!("expected Failed(Err)"),
        }
    }

    #[test]
    fn cancel_all_delivers_cancelled_to_every_pending_callback() {
        let reactor = Reactor::new();
        let cancelled = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let c = Arc::clone(&cancelled);
            reactor.submit_callback(Priority::Default, Box::new(move |_r, s| {
                if s.is_cancelled() {
                    c.fetch_add(1, Ordering::SeqCst);
                }
                Status::Ok
            }));
        }
        let c = Arc::clone(&cancelled);
        reactor.submit_timer(Instant::now() + Duration::from_secs(10), Box::new(move |_r, s| {
            if s.is_cancelled() {
                c.fetch_add(1, Ordering::SeqCst);
            }
            Status::Ok
        }));

        reactor.cancel_all();
        assert_eq!(cancelled.load(Ordering::SeqCst), 4);

        // Submissions after teardown are rejected.
        let status = reactor.submit_callback(Priority::Default, Box::new(|_r, s| s));
        assert!(status.is_cancelled());
    }
}
