//! Self-submitting scheduler composition.
//!
//! A reactivating scheduler queues items like any other scheduler, but
//! instead of owning threads it submits *itself* as a work item into an
//! outer scheduler whenever its queue goes non-empty. The outer scheduler
//! (typically a thread pool) then runs it, which drains the queue and
//! forwards each dispatched item back to the outer scheduler for execution.
//! An activation flag coalesces concurrent admissions into a single pending
//! self-submission.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::core::error::AppResult;
use crate::core::notify::WorkListener;
use crate::core::scheduler::{Scheduler, SchedulerCore};
use crate::core::work::{Work, WorkRef, WorkState};

/// Activation flag coalescing self-submissions.
///
/// At most one submission of the scheduler into its outer scheduler is
/// pending at a time; admissions while the flag is set ride along with the
/// pending drain.
#[derive(Default)]
pub struct Reactivation {
    in_scheduling: AtomicBool,
}

impl Reactivation {
    /// Creates a cleared flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the flag. Returns true when this caller performed the flip and
    /// therefore owns the self-submission.
    pub fn try_activate(&self) -> bool {
        self.in_scheduling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Clears the flag.
    pub fn deactivate(&self) {
        self.in_scheduling.store(false, Ordering::SeqCst);
    }

    /// Whether a self-submission is pending.
    pub fn is_active(&self) -> bool {
        self.in_scheduling.load(Ordering::SeqCst)
    }
}

/// Clears the activation flag on scope exit, panics included, mirroring a
/// `finally` around the drain.
pub(crate) struct DeactivateOnExit<'a>(pub(crate) &'a Reactivation);

impl Drop for DeactivateOnExit<'_> {
    fn drop(&mut self) {
        self.0.deactivate();
    }
}

/// Drains the scheduler under the activation flag.
///
/// The flag clears on the way out of each drain pass even when forwarding
/// panics. An admission racing the drain tail can land after the final
/// emptiness check but before the flag clears; re-checking after the clear
/// closes that window: if this thread reclaims the flag it drains the
/// straggler inline, and if the racing admission reclaimed it first that
/// admission owns the next self-submission.
pub(crate) fn drain_reactivating<S>(scheduler: &S, reactivation: &Reactivation)
where
    S: Scheduler + ?Sized,
{
    loop {
        {
            let _deactivate = DeactivateOnExit(reactivation);
            while scheduler.has_work() {
                match scheduler.poll_work() {
                    Some(work) => scheduler.schedule_work(work),
                    None => break,
                }
            }
        }
        if scheduler.state().is_cancelled() || !scheduler.has_work() {
            return;
        }
        if !reactivation.try_activate() {
            return;
        }
    }
}

/// Scheduler that runs by submitting itself into an outer scheduler.
pub struct ReactivatingScheduler {
    core: SchedulerCore,
    outer: Arc<dyn Scheduler>,
    reactivation: Reactivation,
    self_weak: Weak<ReactivatingScheduler>,
}

impl ReactivatingScheduler {
    /// Creates a reactivating scheduler draining into `outer`.
    pub fn new(
        name: impl Into<String>,
        outer: Arc<dyn Scheduler>,
        schedule_by_sequence: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<ReactivatingScheduler>| {
            let core = SchedulerCore::new(name, schedule_by_sequence);
            core.bind_listener(weak.clone() as Weak<dyn WorkListener>);
            Self {
                core,
                outer,
                reactivation: Reactivation::new(),
                self_weak: weak.clone(),
            }
        })
    }

    /// The outer scheduler this one drains into.
    pub fn outer(&self) -> &Arc<dyn Scheduler> {
        &self.outer
    }

    /// Whether a self-submission is currently pending.
    pub fn is_activated(&self) -> bool {
        self.reactivation.is_active()
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

impl WorkListener for ReactivatingScheduler {}

impl Work for ReactivatingScheduler {
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

impl Scheduler for ReactivatingScheduler {
    fn core(&self) -> &SchedulerCore {
        &self.core
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
}
