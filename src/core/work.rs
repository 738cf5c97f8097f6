//! The unit of schedulable work and its state machine.
//!
//! A work item moves through `Idle -> Scheduled -> Executing -> Finished`,
//! with `Cancelled` reachable from the non-terminal states and `recycle`
//! resetting a terminal item back to `Idle` for reuse (periodic timers rely
//! on this). All flag transitions happen under the item's own guard lock;
//! that lock is never held while user payload code runs or listener events
//! fire, so callbacks may safely re-enter the item.
//!
//! Lifecycle verbs that broadcast events ([`run_work`], [`finish_work`],
//! [`cancel_work`]) are free functions over [`WorkRef`] so the item itself
//! can be handed to listeners.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::core::error::{AppResult, SchedulerError};
use crate::core::notify::{WorkEventNotification, WorkListener};

/// Shared handle to a schedulable unit of work.
pub type WorkRef = Arc<dyn Work>;

/// A schedulable unit of work.
///
/// Implementations provide the payload (`do_work`) and optional override
/// points; the state machine itself lives in [`WorkState`], which every
/// implementation owns and exposes through `state()`. Schedulers are
/// themselves `Work`, which is what allows a scheduler to be submitted into
/// another scheduler as an ordinary item.
pub trait Work: Send + Sync {
    /// The item's state-machine handle.
    fn state(&self) -> &WorkState;

    /// Concrete-type access for type-gated admission (e.g. timer schedulers).
    fn as_any(&self) -> &dyn Any;

    /// Display name, not a uniqueness key.
    fn name(&self) -> &str {
        self.state().name()
    }

    /// Readiness predicate gating eligibility independent of queue position.
    fn ready_to_execute(&self) -> bool {
        true
    }

    /// Last-moment gate evaluated inside the execution region; when false the
    /// abort path runs instead of the payload.
    fn can_execute(&self) -> bool {
        true
    }

    /// The payload. An `Err` is captured as the item's terminal failure.
    fn do_work(&self) -> AppResult<()>;

    /// Ran instead of the payload when `can_execute` refuses.
    fn abort_work(&self) {}
}

/// Terminal failure of a work item: the first error wins, later ones are
/// attached as suppressed.
#[derive(Debug)]
pub struct WorkFailure {
    primary: anyhow::Error,
    suppressed: Vec<anyhow::Error>,
}

impl WorkFailure {
    /// The first failure recorded.
    pub fn primary(&self) -> &anyhow::Error {
        &self.primary
    }

    /// Failures recorded after the primary one.
    pub fn suppressed(&self) -> &[anyhow::Error] {
        &self.suppressed
    }
}

impl std::fmt::Display for WorkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.primary)?;
        for err in &self.suppressed {
            write!(f, "; suppressed: {err:#}")?;
        }
        Ok(())
    }
}

/// Outcome of a cancellation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelTransition {
    /// The item transitioned to cancelled now.
    Cancelled,
    /// The item was already cancelled; treated as success.
    AlreadyCancelled,
    /// Cancellation is not possible in the current state.
    Refused,
}

#[derive(Debug, Default)]
struct Flags {
    cancelled: bool,
    finished: bool,
    executing: bool,
    scheduled: bool,
}

/// The work-item state machine.
///
/// Holds the flag set, configuration, captured execution context, terminal
/// failure, result slot, and the listener registry. A separate
/// completion-wait condition is kept apart from the flag lock so a thread
/// blocked in `wait_finish` never contends with a worker releasing state.
pub struct WorkState {
    name: String,
    flags: Mutex<Flags>,
    // Lock-free mirrors for hot-path reads.
    cancelled: AtomicBool,
    finished: AtomicBool,
    schedule_only_once: AtomicBool,
    finish_after_scheduling: AtomicBool,
    support_cancel_during_executing: AtomicBool,
    executing_thread: Mutex<Option<thread::Thread>>,
    failure: Mutex<Option<WorkFailure>>,
    result: Mutex<Option<Box<dyn Any + Send>>>,
    events: WorkEventNotification,
    wait_finish_lock: Mutex<()>,
    finish_signal: Condvar,
}

impl WorkState {
    /// Creates an idle state with the default configuration
    /// (`schedule_only_once=true`, `finish_after_scheduling=true`,
    /// `support_cancel_during_executing=false`).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: Mutex::new(Flags::default()),
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            schedule_only_once: AtomicBool::new(true),
            finish_after_scheduling: AtomicBool::new(true),
            support_cancel_during_executing: AtomicBool::new(false),
            executing_thread: Mutex::new(None),
            failure: Mutex::new(None),
            result: Mutex::new(None),
            events: WorkEventNotification::new(),
            wait_finish_lock: Mutex::new(()),
            finish_signal: Condvar::new(),
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether re-running after the first hand-off to `run` is rejected.
    pub fn schedule_only_once(&self) -> bool {
        self.schedule_only_once.load(Ordering::SeqCst)
    }

    /// See [`WorkState::schedule_only_once`].
    pub fn set_schedule_only_once(&self, value: bool) {
        self.schedule_only_once.store(value, Ordering::SeqCst);
    }

    /// Whether the item auto-finishes when `run` returns.
    pub fn finish_after_scheduling(&self) -> bool {
        self.finish_after_scheduling.load(Ordering::SeqCst)
    }

    /// See [`WorkState::finish_after_scheduling`].
    pub fn set_finish_after_scheduling(&self, value: bool) {
        self.finish_after_scheduling.store(value, Ordering::SeqCst);
    }

    /// Whether cancellation is honored while the item is executing.
    pub fn support_cancel_during_executing(&self) -> bool {
        self.support_cancel_during_executing.load(Ordering::SeqCst)
    }

    /// See [`WorkState::support_cancel_during_executing`].
    pub fn set_support_cancel_during_executing(&self, value: bool) {
        self.support_cancel_during_executing.store(value, Ordering::SeqCst);
    }

    /// The item's listener registry.
    pub fn events(&self) -> &WorkEventNotification {
        &self.events
    }

    /// Registers a lifecycle listener on this item.
    pub fn add_listener<L: WorkListener + 'static>(&self, listener: &Arc<L>) {
        self.events.add_listener(listener);
    }

    /// Removes a lifecycle listener. Returns whether it was registered.
    pub fn remove_listener<L: WorkListener + 'static>(&self, listener: &Arc<L>) -> bool {
        self.events.remove_listener(listener)
    }

    /// Whether the item is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the item is finished.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Whether a thread is currently inside the execution region.
    pub fn is_executing(&self) -> bool {
        self.flags.lock().executing
    }

    /// Whether the item has ever been handed to `run`.
    pub fn is_scheduled(&self) -> bool {
        self.flags.lock().scheduled
    }

    fn is_terminal(&self) -> bool {
        self.is_finished() || self.is_cancelled()
    }

    /// Whether cancellation would be honored in the current state.
    pub fn support_cancel(&self) -> bool {
        let flags = self.flags.lock();
        if flags.finished {
            return false;
        }
        if self.schedule_only_once() && flags.scheduled {
            return false;
        }
        if flags.executing && !self.support_cancel_during_executing() {
            return false;
        }
        true
    }

    /// Attempts the cancel transition. Low-level: does not broadcast the
    /// cancelled event or wake completion waiters; use [`cancel_work`] for
    /// the full verb.
    pub fn try_cancel(&self) -> CancelTransition {
        let mut flags = self.flags.lock();
        if flags.cancelled {
            return CancelTransition::AlreadyCancelled;
        }
        if flags.finished
            || (self.schedule_only_once() && flags.scheduled)
            || (flags.executing && !self.support_cancel_during_executing())
        {
            return CancelTransition::Refused;
        }
        flags.cancelled = true;
        self.cancelled.store(true, Ordering::SeqCst);
        CancelTransition::Cancelled
    }

    /// Unconditionally marks the item cancelled. Used by scheduler shutdown,
    /// where the one-shot guard must not keep pollers alive.
    pub(crate) fn mark_cancelled(&self) {
        let mut flags = self.flags.lock();
        flags.cancelled = true;
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Guarded entry into the execution region. Returns false without side
    /// effects when the item is cancelled, finished, one-shot-and-already
    /// scheduled, or another thread is executing it.
    pub(crate) fn begin_execution(&self) -> bool {
        let mut flags = self.flags.lock();
        if flags.cancelled || flags.finished {
            return false;
        }
        if self.schedule_only_once() && flags.scheduled {
            return false;
        }
        if flags.executing {
            // executing by another thread
            return false;
        }
        flags.scheduled = true;
        flags.executing = true;
        *self.executing_thread.lock() = Some(thread::current());
        true
    }

    /// Leaves the execution region. Returns whether the item transitioned to
    /// finished (`finish_after_scheduling`); the caller then wakes waiters
    /// and fires the finished event outside the guard lock.
    pub(crate) fn end_execution(&self) -> bool {
        let auto_finish = self.finish_after_scheduling();
        let mut flags = self.flags.lock();
        flags.executing = false;
        *self.executing_thread.lock() = None;
        if auto_finish {
            flags.finished = true;
            self.finished.store(true, Ordering::SeqCst);
        }
        auto_finish
    }

    /// Explicit completion transition. Returns `Ok(true)` when the item
    /// transitioned now, `Ok(false)` when it was already finished. Low-level;
    /// use [`finish_work`] for the full verb.
    pub(crate) fn complete(&self) -> Result<bool, SchedulerError> {
        let mut flags = self.flags.lock();
        if flags.finished {
            return Ok(false);
        }
        if flags.executing {
            return Err(SchedulerError::FinishWhileExecuting(self.name.clone()));
        }
        flags.finished = true;
        flags.executing = false;
        self.finished.store(true, Ordering::SeqCst);
        *self.executing_thread.lock() = None;
        Ok(true)
    }

    /// Wakes every thread blocked in `wait_finish*`.
    pub(crate) fn notify_finish_waiters(&self) {
        let _guard = self.wait_finish_lock.lock();
        self.finish_signal.notify_all();
    }

    /// Blocks until the item is finished or cancelled.
    pub fn wait_finish(&self) {
        if self.is_terminal() {
            return;
        }
        let mut guard = self.wait_finish_lock.lock();
        while !self.is_terminal() {
            self.finish_signal.wait(&mut guard);
        }
    }

    /// Blocks until the item is finished or cancelled, or the timeout
    /// elapses. Returns whether a terminal state was reached. The deadline is
    /// absolute and re-measured on every wake.
    pub fn wait_finish_for(&self, timeout: Duration) -> bool {
        if self.is_terminal() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.wait_finish_lock.lock();
        while !self.is_terminal() {
            if self.finish_signal.wait_until(&mut guard, deadline).timed_out() {
                return self.is_terminal();
            }
        }
        true
    }

    /// Best-effort interrupt: if the item is executing, unparks the captured
    /// executing thread so park-based waits inside the payload wake early.
    /// No-op otherwise. Payload code must observe the wakeup cooperatively.
    pub fn interrupt_work(&self) {
        let target = {
            let flags = self.flags.lock();
            if flags.executing {
                self.executing_thread.lock().clone()
            } else {
                None
            }
        };
        match target {
            Some(thread) => {
                thread.unpark();
                debug!(work = %self.name, thread = ?thread.name(), "interrupt signal delivered");
            }
            None => debug!(work = %self.name, "interrupt requested but work is not executing"),
        }
    }

    /// Resets `scheduled`, `cancelled` and `finished`, returning the item to
    /// `Idle` so it can be admitted and run again.
    pub fn recycle(&self) {
        let mut flags = self.flags.lock();
        flags.scheduled = false;
        flags.cancelled = false;
        flags.finished = false;
        self.cancelled.store(false, Ordering::SeqCst);
        self.finished.store(false, Ordering::SeqCst);
    }

    /// Records a terminal failure. The first failure wins; later ones are
    /// attached as suppressed.
    pub fn record_failure(&self, err: anyhow::Error) {
        let mut failure = self.failure.lock();
        match failure.as_mut() {
            Some(existing) => existing.suppressed.push(err),
            None => {
                *failure = Some(WorkFailure {
                    primary: err,
                    suppressed: Vec::new(),
                });
            }
        }
    }

    /// Whether a terminal failure has been recorded.
    pub fn has_failure(&self) -> bool {
        self.failure.lock().is_some()
    }

    /// Renders the recorded failure, if any.
    pub fn failure_message(&self) -> Option<String> {
        self.failure.lock().as_ref().map(ToString::to_string)
    }

    /// Runs `f` against the recorded failure, if any.
    pub fn with_failure<R>(&self, f: impl FnOnce(&WorkFailure) -> R) -> Option<R> {
        self.failure.lock().as_ref().map(f)
    }

    /// Stores the item's result value.
    pub fn set_result(&self, value: Box<dyn Any + Send>) {
        *self.result.lock() = Some(value);
    }

    /// Takes the item's result value.
    pub fn take_result(&self) -> Option<Box<dyn Any + Send>> {
        self.result.lock().take()
    }
}

impl std::fmt::Debug for WorkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flags = self.flags.lock();
        f.debug_struct("WorkState")
            .field("name", &self.name)
            .field("cancelled", &flags.cancelled)
            .field("finished", &flags.finished)
            .field("executing", &flags.executing)
            .field("scheduled", &flags.scheduled)
            .finish()
    }
}

enum RunOutcome {
    Executed(AppResult<()>),
    Aborted,
}

/// Executes a work item through its guarded state machine.
///
/// Returns whether the execution region was entered; false when the item is
/// cancelled, finished, one-shot-and-scheduled, or already executing on
/// another thread. On entry it fires `started`, evaluates `can_execute`,
/// runs the payload or the abort path, and on the way out clears `executing`
/// and applies `finish_after_scheduling` (waiter wakeup and the `finished`
/// event fire after the guard lock is released).
///
/// A payload `Err` is recorded and swallowed. A payload panic is recorded,
/// logged, and re-raised after state cleanup so it reaches the worker
/// thread's panic handler.
pub fn run_work(work: &WorkRef) -> bool {
    let state = work.state();
    if !state.begin_execution() {
        return false;
    }

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        state.events().notify_started(work);
        if work.can_execute() {
            RunOutcome::Executed(work.do_work())
        } else {
            work.abort_work();
            state.events().notify_aborted(work);
            RunOutcome::Aborted
        }
    }));

    let mut panic_payload = None;
    match outcome {
        Ok(RunOutcome::Executed(Ok(())) | RunOutcome::Aborted) => {}
        Ok(RunOutcome::Executed(Err(err))) => {
            error!(work = %state.name(), error = %format!("{err:#}"), "work failed");
            state.record_failure(err);
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(work = %state.name(), panic = %message, "work panicked");
            state.record_failure(anyhow::anyhow!("work payload panicked: {message}"));
            panic_payload = Some(payload);
        }
    }

    if state.end_execution() {
        state.notify_finish_waiters();
        state.events().notify_finished(work);
    }

    if let Some(payload) = panic_payload {
        std::panic::resume_unwind(payload);
    }
    true
}

/// Explicit external completion of a work item.
///
/// Errors while the item is executing; idempotent when already finished.
/// Waiter wakeup and the `finished` event fire after the guard lock is
/// released.
pub fn finish_work(work: &WorkRef) -> Result<(), SchedulerError> {
    if work.state().complete()? {
        work.state().notify_finish_waiters();
        work.state().events().notify_finished(work);
    }
    Ok(())
}

/// Attempts to cancel a work item.
///
/// Returns false once the item is finished, while it is one-shot and already
/// scheduled, or while it is executing without
/// `support_cancel_during_executing`. Already-cancelled returns true. On the
/// actual transition, completion waiters are woken and the `cancelled` event
/// fires.
pub fn cancel_work(work: &WorkRef) -> bool {
    match work.state().try_cancel() {
        CancelTransition::Refused => false,
        CancelTransition::AlreadyCancelled => true,
        CancelTransition::Cancelled => {
            work.state().notify_finish_waiters();
            work.state().events().notify_cancelled(work);
            true
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Closure-backed work item.
///
/// The everyday way to submit work: a name plus a payload closure returning
/// [`AppResult`]. Configuration flags are exposed as chainable builders.
pub struct FnWork {
    state: WorkState,
    task: Box<dyn Fn() -> AppResult<()> + Send + Sync>,
}

impl FnWork {
    /// Creates a work item running `task` as its payload.
    pub fn new<F>(name: impl Into<String>, task: F) -> Self
    where
        F: Fn() -> AppResult<()> + Send + Sync + 'static,
    {
        Self {
            state: WorkState::new(name),
            task: Box::new(task),
        }
    }

    /// Sets `schedule_only_once`.
    #[must_use]
    pub fn schedule_only_once(self, value: bool) -> Self {
        self.state.set_schedule_only_once(value);
        self
    }

    /// Sets `finish_after_scheduling`.
    #[must_use]
    pub fn finish_after_scheduling(self, value: bool) -> Self {
        self.state.set_finish_after_scheduling(value);
        self
    }

    /// Sets `support_cancel_during_executing`.
    #[must_use]
    pub fn support_cancel_during_executing(self, value: bool) -> Self {
        self.state.set_support_cancel_during_executing(value);
        self
    }
}

impl Work for FnWork {
    fn state(&self) -> &WorkState {
        &self.state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn do_work(&self) -> AppResult<()> {
        (self.task)()
    }
}
