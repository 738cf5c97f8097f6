//! Forwarding scheduler decorator.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::AppResult;
use crate::core::scheduler::{Scheduler, SchedulerCore};
use crate::core::work::{Work, WorkRef, WorkState};

/// Scheduler that forwards its entire contract to another scheduler.
///
/// A base for decorators: wrap a scheduler, forward everything, and override
/// the one or two operations being decorated.
pub struct DelegatingScheduler {
    inner: Arc<dyn Scheduler>,
}

impl DelegatingScheduler {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn Scheduler>) -> Self {
        Self { inner }
    }

    /// The wrapped scheduler.
    pub fn inner(&self) -> &Arc<dyn Scheduler> {
        &self.inner
    }
}

impl Work for DelegatingScheduler {
    fn state(&self) -> &WorkState {
        self.inner.state()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn ready_to_execute(&self) -> bool {
        self.inner.ready_to_execute()
    }

    fn can_execute(&self) -> bool {
        self.inner.can_execute()
    }

    fn do_work(&self) -> AppResult<()> {
        self.inner.do_work()
    }

    fn abort_work(&self) {
        self.inner.abort_work();
    }
}

impl Scheduler for DelegatingScheduler {
    fn core(&self) -> &SchedulerCore {
        self.inner.core()
    }

    fn allow_adding_work(&self, work: &WorkRef) -> bool {
        self.inner.allow_adding_work(work)
    }

    fn add_work(&self, work: WorkRef) -> bool {
        self.inner.add_work(work)
    }

    fn schedule_work(&self, work: WorkRef) {
        self.inner.schedule_work(work);
    }

    fn schedule_works(&self) {
        self.inner.schedule_works();
    }

    fn has_work(&self) -> bool {
        self.inner.has_work()
    }

    fn poll_work(&self) -> Option<WorkRef> {
        self.inner.poll_work()
    }

    fn poll_work_timeout(&self, timeout: Duration) -> Option<WorkRef> {
        self.inner.poll_work_timeout(timeout)
    }

    fn ready_to_schedule_work(&self) -> bool {
        self.inner.ready_to_schedule_work()
    }

    fn schedule_work_interval(&self, pending: &VecDeque<WorkRef>) -> Duration {
        self.inner.schedule_work_interval(pending)
    }

    fn prohibit_adding_work(&self) {
        self.inner.prohibit_adding_work();
    }

    fn shutdown(&self) {
        self.inner.shutdown();
    }
}
