//! Serde-backed configuration models.

pub mod scheduler;

pub use scheduler::{SchedulerSettings, ThreadPoolSettings, WorkSettings};
