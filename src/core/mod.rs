//! Core scheduling primitives: work items, events, schedulers, and pools.

pub mod delegating;
pub mod error;
pub mod notify;
pub mod reactivating;
pub mod scheduler;
pub mod thread_pool;
pub mod timer;
pub mod work;

pub use delegating::DelegatingScheduler;
pub use error::{AppResult, SchedulerError};
pub use notify::{WorkEventNotification, WorkListener};
pub use reactivating::{Reactivation, ReactivatingScheduler};
pub use scheduler::{Scheduler, SchedulerCore, DEFAULT_CHECK_WORK_INTERVAL};
pub use thread_pool::ThreadPoolScheduler;
pub use timer::{TimerScheduler, TimerWork, DEFAULT_SCHEDULE_INTERVAL};
pub use work::{
    cancel_work, finish_work, run_work, CancelTransition, FnWork, Work, WorkFailure, WorkRef,
    WorkState,
};
