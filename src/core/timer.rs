//! Deadline-gated work and the scheduler that repeats it.
//!
//! A [`TimerWork`] is an ordinary work item whose readiness is a deadline:
//! not ready until `next_fire`, which is pushed out by `schedule_interval`
//! each time the payload completes (fixed delay, measured from completion,
//! so a slow payload never causes overlapping fires). The [`TimerScheduler`]
//! admits only timers, scans its queue unordered so an early deadline behind
//! a late one is never blocked, and re-admits repeatable timers when they
//! finish.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::core::error::AppResult;
use crate::core::notify::WorkListener;
use crate::core::reactivating::{drain_reactivating, Reactivation};
use crate::core::scheduler::{Scheduler, SchedulerCore};
use crate::core::work::{Work, WorkRef, WorkState};

/// Interval used when a timer is built without one.
pub const DEFAULT_SCHEDULE_INTERVAL: Duration = Duration::from_secs(30);

/// Work item that fires on a deadline and, optionally, repeats.
pub struct TimerWork {
    state: WorkState,
    task: Box<dyn Fn() -> AppResult<()> + Send + Sync>,
    delay: Option<Duration>,
    schedule_interval: Duration,
    next_fire: Mutex<Option<Instant>>,
    repeatable: AtomicBool,
}

impl TimerWork {
    /// Creates a repeatable timer running `task` every
    /// [`DEFAULT_SCHEDULE_INTERVAL`], first fire immediate.
    ///
    /// The one-shot guard is disabled here; a timer's whole point is being
    /// run again after a recycle.
    pub fn new<F>(name: impl Into<String>, task: F) -> Self
    where
        F: Fn() -> AppResult<()> + Send + Sync + 'static,
    {
        let state = WorkState::new(name);
        state.set_schedule_only_once(false);
        Self {
            state,
            task: Box::new(task),
            delay: None,
            schedule_interval: DEFAULT_SCHEDULE_INTERVAL,
            next_fire: Mutex::new(None),
            repeatable: AtomicBool::new(true),
        }
    }

    /// Offset of the first fire from the moment the timer is first examined.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Pause between a completion and the next fire.
    #[must_use]
    pub fn schedule_interval(mut self, interval: Duration) -> Self {
        self.schedule_interval = interval;
        self
    }

    /// Whether the timer re-fires after completing. Defaults to true.
    #[must_use]
    pub fn repeatable(mut self, value: bool) -> Self {
        self.repeatable.store(value, Ordering::SeqCst);
        self
    }

    /// The configured fire interval.
    pub fn interval(&self) -> Duration {
        self.schedule_interval
    }

    /// The next deadline, once one has been established.
    pub fn next_fire(&self) -> Option<Instant> {
        *self.next_fire.lock()
    }

    /// Whether the timer is eligible for another round after finishing.
    pub fn support_reschedule(&self) -> bool {
        !self.state.schedule_only_once() && self.repeatable.load(Ordering::SeqCst)
    }

    /// Stops future rounds; the current one, if any, still completes.
    pub fn cancel_reschedule(&self) {
        self.repeatable.store(false, Ordering::SeqCst);
    }
}

impl Work for TimerWork {
    fn state(&self) -> &WorkState {
        &self.state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Deadline check. The first examination of a delayed timer anchors the
    /// delay to that moment; a timer without a delay or deadline is ready
    /// immediately.
    fn ready_to_execute(&self) -> bool {
        let mut next_fire = self.next_fire.lock();
        match *next_fire {
            Some(deadline) => Instant::now() >= deadline,
            None => match self.delay {
                Some(delay) => {
                    *next_fire = Some(Instant::now() + delay);
                    delay.is_zero()
                }
                None => true,
            },
        }
    }

    /// Runs the payload, then pushes the deadline out by the interval. The
    /// deadline moves even on a payload error, so a failing repeatable timer
    /// backs off instead of firing hot.
    fn do_work(&self) -> AppResult<()> {
        let result = (self.task)();
        *self.next_fire.lock() = Some(Instant::now() + self.schedule_interval);
        result
    }
}

/// Scheduler dedicated to [`TimerWork`] items.
///
/// Composes like [`ReactivatingScheduler`](crate::core::reactivating::ReactivatingScheduler):
/// it submits itself into an outer scheduler while timers are pending, sleeps
/// until the nearest re-check when none is due, and recycles-and-re-admits
/// repeatable timers as they finish. Re-admission is the only dispatch path;
/// a freshly admitted due timer fires through the same drain as everything
/// else.
pub struct TimerScheduler {
    core: SchedulerCore,
    outer: Arc<dyn Scheduler>,
    reactivation: Reactivation,
    self_weak: Weak<TimerScheduler>,
}

impl TimerScheduler {
    /// Creates a timer scheduler draining into `outer`. The queue is always
    /// scanned unordered; deadline order and admission order are unrelated.
    pub fn new(name: impl Into<String>, outer: Arc<dyn Scheduler>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<TimerScheduler>| {
            let core = SchedulerCore::new(name, false);
            core.bind_listener(weak.clone() as Weak<dyn WorkListener>);
            Self {
                core,
                outer,
                reactivation: Reactivation::new(),
                self_weak: weak.clone(),
            }
        })
    }

    /// The outer scheduler timers execute on.
    pub fn outer(&self) -> &Arc<dyn Scheduler> {
        &self.outer
    }

    /// Admits a timer. Returns whether it was accepted.
    pub fn schedule_timer(&self, timer: Arc<TimerWork>) -> bool {
        self.add_work(timer)
    }

    fn activate(&self) {
        if !self.reactivation.try_activate() {
            return;
        }
        let Some(this) = self.self_weak.upgrade() else {
            self.reactivation.deactivate();
            return;
        };
        if !self.outer.add_work(this as WorkRef) {
            debug!(
                scheduler = %self.core.state().name(),
                "outer scheduler refused self-submission"
            );
            self.reactivation.deactivate();
        }
    }
}

impl WorkListener for TimerScheduler {
    /// Repeatable timers come back for another round: reset the state
    /// machine and re-admit through the ordinary admission path.
    fn work_finished(&self, work: &WorkRef) {
        let Some(timer) = work.as_any().downcast_ref::<TimerWork>() else {
            return;
        };
        if !timer.support_reschedule() {
            return;
        }
        if self.state().is_cancelled() || self.core.is_prohibited() {
            return;
        }
        work.state().recycle();
        if !self.add_work(Arc::clone(work)) {
            debug!(
                scheduler = %self.core.state().name(),
                timer = %work.name(),
                "repeatable timer refused at re-admission"
            );
        }
    }
}

impl Work for TimerScheduler {
    fn state(&self) -> &WorkState {
        self.core.state()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn do_work(&self) -> AppResult<()> {
        self.schedule_works();
        Ok(())
    }
}

impl Scheduler for TimerScheduler {
    fn core(&self) -> &SchedulerCore {
        &self.core
    }

    /// Only timers are admitted; everything else is refused.
    fn allow_adding_work(&self, work: &WorkRef) -> bool {
        work.as_any().is::<TimerWork>()
            && !self.core.is_prohibited()
            && !self.state().is_cancelled()
    }

    fn add_work(&self, work: WorkRef) -> bool {
        if !self.core.admit(self, work) {
            return false;
        }
        self.activate();
        true
    }

    fn schedule_work(&self, work: WorkRef) {
        self.outer.schedule_work(work);
    }

    fn schedule_works(&self) {
        drain_reactivating(self, &self.reactivation);
    }

    /// Sleep until the nearest pending deadline. A timer with no deadline
    /// yet contributes its interval instead.
    fn schedule_work_interval(&self, pending: &VecDeque<WorkRef>) -> Duration {
        let now = Instant::now();
        pending
            .iter()
            .filter_map(|work| work.as_any().downcast_ref::<TimerWork>())
            .map(|timer| match timer.next_fire() {
                Some(deadline) => deadline
                    .saturating_duration_since(now)
                    .max(Duration::from_millis(1)),
                None => timer.interval(),
            })
            .min()
            .unwrap_or_else(|| self.core.check_work_interval())
    }
}
