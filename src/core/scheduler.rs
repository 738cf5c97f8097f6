//! Scheduling contract and the queue/admission/polling engine behind it.
//!
//! [`SchedulerCore`] owns the pending queue, the admission latch, and the two
//! wait conditions every concrete scheduler shares. The [`Scheduler`] trait
//! layers the dispatch contract on top as default methods, so concrete
//! schedulers override only the seams they specialize (admission gates,
//! hand-off targets, readiness re-check intervals).
//!
//! A scheduler is itself a [`Work`] item. Running one drains its queue, which
//! is what lets schedulers nest: a reactivating scheduler submits itself into
//! a thread pool and a pool worker performs the drain.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Weak;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use crate::core::error::AppResult;
use crate::core::notify::WorkListener;
use crate::core::work::{Work, WorkRef, WorkState};

/// Readiness re-check pause used when a pending item is not yet eligible.
pub const DEFAULT_CHECK_WORK_INTERVAL: Duration = Duration::from_millis(3000);

/// Intervals at or above this are treated as misconfigured.
const MAX_CHECK_WORK_INTERVAL: Duration = Duration::from_secs(60);

fn clamp_interval(interval: Duration) -> Duration {
    if interval.is_zero() || interval >= MAX_CHECK_WORK_INTERVAL {
        DEFAULT_CHECK_WORK_INTERVAL
    } else {
        interval
    }
}

/// The dispatch contract shared by every scheduler.
///
/// All methods have default implementations driven by the embedded
/// [`SchedulerCore`]; a concrete scheduler provides `core()` and overrides
/// the seams it specializes.
pub trait Scheduler: Work {
    /// The embedded queue/admission/polling engine.
    fn core(&self) -> &SchedulerCore;

    /// Admission gate consulted under the queue lock before an item is
    /// accepted. Defaults to open while the scheduler is neither prohibited
    /// nor cancelled.
    fn allow_adding_work(&self, _work: &WorkRef) -> bool {
        !self.core().is_prohibited() && !self.state().is_cancelled()
    }

    /// Submits an item. Returns whether it was admitted.
    fn add_work(&self, work: WorkRef) -> bool {
        self.core().admit(self, work)
    }

    /// Hand-off target for a dispatched item. The manual shell leaves this a
    /// no-op (callers poll and run items themselves); composing schedulers
    /// forward here, and a thread pool executes.
    fn schedule_work(&self, _work: WorkRef) {}

    /// Drains the queue, handing each dispatched item to
    /// [`Scheduler::schedule_work`]. Returns when the queue is empty or the
    /// scheduler is cancelled.
    fn schedule_works(&self) {
        while self.has_work() {
            match self.poll_work() {
                Some(work) => self.schedule_work(work),
                None => break,
            }
        }
    }

    /// Whether the scheduler is live and pending items exist right now
    /// (snapshot).
    fn has_work(&self) -> bool {
        !self.state().is_cancelled() && self.core().work_count() > 0
    }

    /// Blocks until an eligible item can be dispatched or the scheduler is
    /// cancelled. Returns `None` only on cancellation.
    fn poll_work(&self) -> Option<WorkRef> {
        self.core().poll(self, None)
    }

    /// Like [`Scheduler::poll_work`] with an overall deadline. Returns `None`
    /// on cancellation or when the deadline passes first.
    fn poll_work_timeout(&self, timeout: Duration) -> Option<WorkRef> {
        self.core().poll(self, Some(timeout))
    }

    /// Whether the scheduler is currently able to dispatch.
    fn ready_to_schedule_work(&self) -> bool {
        !self.state().is_cancelled()
    }

    /// Pause before re-checking readiness when an unordered scan found only
    /// pending items. Receives the locked queue contents so overrides can
    /// inspect the pending set without re-entering the lock.
    fn schedule_work_interval(&self, _pending: &VecDeque<WorkRef>) -> Duration {
        self.core().check_work_interval()
    }

    /// Flips the one-way admission latch; every later `add_work` is refused.
    fn prohibit_adding_work(&self) {
        self.core().prohibit();
    }

    /// Stops the scheduler: latches admission shut, cancels its own work
    /// state, and wakes every blocked poller and completion waiter.
    fn shutdown(&self) {
        self.core().shutdown_core();
    }
}

/// Queue, admission latch, and polling engine embedded in every scheduler.
///
/// Also the "manual dispatch shell": `SchedulerCore` implements the full
/// [`Scheduler`] contract itself, so callers can admit items and poll them
/// out by hand without any worker machinery.
pub struct SchedulerCore {
    state: WorkState,
    queue: Mutex<VecDeque<WorkRef>>,
    // New-work arrivals wake `work_coordinator`; both arrivals and readiness
    // re-checks wake `check_work_ready`. Same queue mutex backs both.
    work_coordinator: Condvar,
    check_work_ready: Condvar,
    schedule_by_sequence: AtomicBool,
    prohibit_adding: AtomicBool,
    check_work_interval_ms: AtomicU64,
    listener: Mutex<Option<Weak<dyn WorkListener>>>,
}

impl SchedulerCore {
    /// Creates a core with an empty queue.
    ///
    /// The core's own work state is configured for repeated runs
    /// (`schedule_only_once=false`, `finish_after_scheduling=false`) since a
    /// scheduler is drained many times over its life.
    pub fn new(name: impl Into<String>, schedule_by_sequence: bool) -> Self {
        let state = WorkState::new(name);
        state.set_schedule_only_once(false);
        state.set_finish_after_scheduling(false);
        Self {
            state,
            queue: Mutex::new(VecDeque::new()),
            work_coordinator: Condvar::new(),
            check_work_ready: Condvar::new(),
            schedule_by_sequence: AtomicBool::new(schedule_by_sequence),
            prohibit_adding: AtomicBool::new(false),
            check_work_interval_ms: AtomicU64::new(DEFAULT_CHECK_WORK_INTERVAL.as_millis() as u64),
            listener: Mutex::new(None),
        }
    }

    /// Whether dispatch honors strict queue order.
    pub fn schedule_by_sequence(&self) -> bool {
        self.schedule_by_sequence.load(Ordering::SeqCst)
    }

    /// See [`SchedulerCore::schedule_by_sequence`].
    pub fn set_schedule_by_sequence(&self, value: bool) {
        self.schedule_by_sequence.store(value, Ordering::SeqCst);
    }

    /// The readiness re-check pause. Always within the sane range.
    pub fn check_work_interval(&self) -> Duration {
        Duration::from_millis(self.check_work_interval_ms.load(Ordering::SeqCst))
    }

    /// Sets the readiness re-check pause. Zero or a value of a minute and
    /// beyond falls back to the default.
    pub fn set_check_work_interval(&self, interval: Duration) {
        let clamped = clamp_interval(interval);
        self.check_work_interval_ms
            .store(clamped.as_millis() as u64, Ordering::SeqCst);
    }

    /// Whether the admission latch has been flipped.
    pub fn is_prohibited(&self) -> bool {
        self.prohibit_adding.load(Ordering::SeqCst)
    }

    pub(crate) fn prohibit(&self) {
        self.prohibit_adding.store(true, Ordering::SeqCst);
    }

    /// Number of pending items (snapshot).
    pub fn work_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Installs the listener handle registered on every admitted item.
    /// Concrete schedulers bind their own weak self-reference here.
    pub(crate) fn bind_listener(&self, listener: Weak<dyn WorkListener>) {
        *self.listener.lock() = Some(listener);
    }

    /// Admission: consult the scheduler's gate under the queue lock, register
    /// the scheduler's listener on the item, append, and wake pollers.
    pub(crate) fn admit<S: Scheduler + ?Sized>(&self, scheduler: &S, work: WorkRef) -> bool {
        let mut queue = self.queue.lock();
        if !scheduler.allow_adding_work(&work) {
            debug!(
                scheduler = %self.state.name(),
                work = %work.name(),
                "work refused at admission"
            );
            return false;
        }
        if let Some(listener) = self.listener.lock().clone() {
            work.state().events().add_weak(listener);
        }
        queue.push_back(work);
        // Arrivals can shorten the nearest readiness deadline, so wake both
        // wait conditions.
        self.work_coordinator.notify_one();
        self.check_work_ready.notify_all();
        true
    }

    /// The dispatch loop.
    ///
    /// Sequential mode watches the head: a cancelled head is dropped, a ready
    /// head is removed and returned, a pending head blocks dispatch with a
    /// timed readiness re-check. Unordered mode scans the whole queue,
    /// dropping cancelled entries and returning the first ready one; when
    /// only pending entries remain it sleeps for the scheduler's re-check
    /// interval. An empty queue blocks until new work arrives. Returns `None`
    /// on cancellation, or at the deadline when one was given.
    pub(crate) fn poll<S: Scheduler + ?Sized>(
        &self,
        scheduler: &S,
        timeout: Option<Duration>,
    ) -> Option<WorkRef> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut queue = self.queue.lock();
        loop {
            if self.state.is_cancelled() {
                return None;
            }
            if queue.is_empty() {
                match deadline {
                    Some(deadline) => {
                        if self
                            .work_coordinator
                            .wait_until(&mut queue, deadline)
                            .timed_out()
                        {
                            return None;
                        }
                    }
                    None => self.work_coordinator.wait(&mut queue),
                }
                continue;
            }

            if self.schedule_by_sequence() {
                let head_cancelled;
                let head_ready;
                {
                    // queue is non-empty here
                    let Some(head) = queue.front() else { continue };
                    head_cancelled = head.state().is_cancelled();
                    head_ready = head.ready_to_execute();
                }
                if head_cancelled {
                    queue.pop_front();
                    continue;
                }
                if head_ready {
                    return queue.pop_front();
                }
                if !self.ready_recheck_wait(&mut queue, self.check_work_interval(), deadline) {
                    return None;
                }
            } else {
                let mut index = 0;
                let mut dispatched = None;
                while index < queue.len() {
                    if queue[index].state().is_cancelled() {
                        queue.remove(index);
                        continue;
                    }
                    if queue[index].ready_to_execute() {
                        dispatched = queue.remove(index);
                        break;
                    }
                    index += 1;
                }
                if dispatched.is_some() {
                    return dispatched;
                }
                if queue.is_empty() {
                    // everything was cancelled; fall through to the empty wait
                    continue;
                }
                let interval = clamp_interval(scheduler.schedule_work_interval(&queue));
                if !self.ready_recheck_wait(&mut queue, interval, deadline) {
                    return None;
                }
            }
        }
    }

    /// Timed sleep on the readiness condition. Returns false when the overall
    /// deadline has passed.
    fn ready_recheck_wait(
        &self,
        queue: &mut MutexGuard<'_, VecDeque<WorkRef>>,
        interval: Duration,
        deadline: Option<Instant>,
    ) -> bool {
        let mut wake_at = Instant::now() + interval;
        if let Some(deadline) = deadline {
            wake_at = wake_at.min(deadline);
        }
        self.check_work_ready.wait_until(queue, wake_at);
        match deadline {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }

    pub(crate) fn shutdown_core(&self) {
        self.prohibit();
        self.state.mark_cancelled();
        self.state.notify_finish_waiters();
        let _queue = self.queue.lock();
        self.work_coordinator.notify_all();
        self.check_work_ready.notify_all();
    }
}

impl Work for SchedulerCore {
    fn state(&self) -> &WorkState {
        &self.state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn do_work(&self) -> AppResult<()> {
        self.schedule_works();
        Ok(())
    }
}

impl Scheduler for SchedulerCore {
    fn core(&self) -> &SchedulerCore {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::work::{cancel_work, FnWork};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn work(name: &str) -> WorkRef {
        Arc::new(FnWork::new(name, || Ok(())))
    }

    struct GatedWork {
        state: WorkState,
        ready: AtomicBool,
    }

    impl GatedWork {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                state: WorkState::new(name),
                ready: AtomicBool::new(false),
            })
        }
    }

    impl Work for GatedWork {
        fn state(&self) -> &WorkState {
            &self.state
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn ready_to_execute(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn do_work(&self) -> AppResult<()> {
            Ok(())
        }
    }

    #[test]
    fn ready_head_is_removed_on_dispatch() {
        let core = SchedulerCore::new("sequential", true);
        assert!(core.add_work(work("first")));
        assert!(core.add_work(work("second")));

        let dispatched = core.poll_work_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(dispatched.name(), "first");
        assert_eq!(core.work_count(), 1);
    }

    #[test]
    fn cancelled_head_is_dropped_and_successor_dispatched() {
        let core = SchedulerCore::new("sequential", true);
        let head = work("head");
        assert!(core.add_work(Arc::clone(&head)));
        assert!(core.add_work(work("successor")));
        assert!(cancel_work(&head));

        let dispatched = core.poll_work_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(dispatched.name(), "successor");
        assert_eq!(core.work_count(), 0);
    }

    #[test]
    fn pending_head_blocks_ready_successor_in_sequential_mode() {
        let core = SchedulerCore::new("sequential", true);
        core.set_check_work_interval(Duration::from_millis(50));
        let gated = GatedWork::new("gated-head");
        assert!(core.add_work(gated.clone() as WorkRef));
        assert!(core.add_work(work("ready-successor")));

        assert!(core.poll_work_timeout(Duration::from_millis(200)).is_none());

        gated.ready.store(true, Ordering::SeqCst);
        let dispatched = core.poll_work_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(dispatched.name(), "gated-head");
    }

    #[test]
    fn unordered_scan_skips_pending_head() {
        let core = SchedulerCore::new("unordered", false);
        let gated = GatedWork::new("gated-head");
        assert!(core.add_work(gated as WorkRef));
        assert!(core.add_work(work("ready-successor")));

        let dispatched = core.poll_work_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(dispatched.name(), "ready-successor");
        assert_eq!(core.work_count(), 1);
    }

    #[test]
    fn timed_poll_expires_on_empty_queue() {
        let core = SchedulerCore::new("empty", true);
        let started = Instant::now();
        assert!(core.poll_work_timeout(Duration::from_millis(80)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn prohibit_latch_refuses_later_admissions() {
        let core = SchedulerCore::new("latched", true);
        assert!(core.add_work(work("before")));
        core.prohibit_adding_work();
        assert!(!core.add_work(work("after")));
        assert_eq!(core.work_count(), 1);
    }

    #[test]
    fn shutdown_wakes_blocked_poller() {
        let core = Arc::new(SchedulerCore::new("stopping", true));
        let poller = {
            let core = Arc::clone(&core);
            std::thread::spawn(move || core.poll_work())
        };
        std::thread::sleep(Duration::from_millis(50));
        core.shutdown();
        assert!(poller.join().unwrap().is_none());
    }

    #[test]
    fn interval_setter_falls_back_to_default_when_out_of_range() {
        let core = SchedulerCore::new("intervals", true);
        core.set_check_work_interval(Duration::ZERO);
        assert_eq!(core.check_work_interval(), DEFAULT_CHECK_WORK_INTERVAL);
        core.set_check_work_interval(Duration::from_secs(120));
        assert_eq!(core.check_work_interval(), DEFAULT_CHECK_WORK_INTERVAL);
        core.set_check_work_interval(Duration::from_millis(100));
        assert_eq!(core.check_work_interval(), Duration::from_millis(100));
    }
}
