//! General-purpose work scheduling engine.
//!
//! A [`Work`] item is a small state machine (cancelled, finished, executing,
//! scheduled) around a payload. Schedulers queue items, decide readiness,
//! and dispatch them:
//!
//! - [`SchedulerCore`] is the manual shell: admit items, poll them out by
//!   hand.
//! - [`ThreadPoolScheduler`] executes dispatched items on an elastic pool of
//!   named worker threads.
//! - [`ReactivatingScheduler`] owns no threads; it submits itself into an
//!   outer scheduler whenever its queue goes non-empty.
//! - [`TimerScheduler`] runs [`TimerWork`] items on deadlines, re-admitting
//!   repeatable timers as they complete.
//! - [`DelegatingScheduler`] is a forwarding base for decorators.
//!
//! Schedulers are themselves work items, which is what lets them nest.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use work_scheduler::{
//!     FnWork, Scheduler, ThreadPoolScheduler, ThreadPoolSettings, TimerScheduler, TimerWork,
//! };
//!
//! # fn main() -> Result<(), work_scheduler::SchedulerError> {
//! let pool = ThreadPoolScheduler::new("app", ThreadPoolSettings::default())?;
//! pool.start();
//!
//! pool.add_work(Arc::new(FnWork::new("hello", || {
//!     println!("hello from a pool worker");
//!     Ok(())
//! })));
//!
//! let timers = TimerScheduler::new("app-timers", pool.clone());
//! timers.schedule_timer(Arc::new(
//!     TimerWork::new("heartbeat", || Ok(())).schedule_interval(Duration::from_secs(5)),
//! ));
//!
//! pool.shutdown();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod core;
pub mod util;

pub use self::config::{SchedulerSettings, ThreadPoolSettings, WorkSettings};
pub use self::core::{
    cancel_work, finish_work, run_work, AppResult, CancelTransition, DelegatingScheduler, FnWork,
    Reactivation, ReactivatingScheduler, Scheduler, SchedulerCore, SchedulerError,
    ThreadPoolScheduler, TimerScheduler, TimerWork, Work, WorkEventNotification, WorkFailure,
    WorkListener, WorkRef, WorkState, DEFAULT_CHECK_WORK_INTERVAL, DEFAULT_SCHEDULE_INTERVAL,
};
pub use self::util::{init_tracing, WorkThreadFactory};
