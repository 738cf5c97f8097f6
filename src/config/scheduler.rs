//! Configuration models for schedulers, pools, and work items.
//!
//! All models are serde-derived with field-level defaults, so partial JSON
//! documents deserialize into fully-populated settings. `validate` rejects
//! combinations the runtime cannot honor; the readiness re-check interval is
//! not an error case, out-of-range values fall back to the default when the
//! settings are applied.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::scheduler::DEFAULT_CHECK_WORK_INTERVAL;

/// Queue-discipline settings shared by every scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Dispatch strictly in admission order when true, scan for any ready
    /// item when false.
    pub schedule_by_sequence: bool,
    /// Pause in milliseconds before re-checking a pending item's readiness.
    pub check_work_interval_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            schedule_by_sequence: true,
            check_work_interval_ms: DEFAULT_CHECK_WORK_INTERVAL.as_millis() as u64,
        }
    }
}

impl SchedulerSettings {
    /// The configured re-check interval as a duration.
    pub fn check_work_interval(&self) -> Duration {
        Duration::from_millis(self.check_work_interval_ms)
    }

    /// Builds settings from a JSON document and validates them.
    pub fn from_json_str(json: &str) -> Result<Self, SchedulerError> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|err| SchedulerError::InvalidConfig(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the settings for combinations the runtime cannot honor.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        Ok(())
    }
}

/// Sizing settings for [`ThreadPoolScheduler`](crate::core::thread_pool::ThreadPoolScheduler).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolSettings {
    /// Workers kept even when the queue is empty.
    pub min_thread: usize,
    /// Hard ceiling on live workers. Defaults to the logical CPU count.
    pub max_thread: usize,
    /// Queue-discipline settings for the pool's own queue.
    pub scheduler: SchedulerSettings,
}

impl Default for ThreadPoolSettings {
    fn default() -> Self {
        Self {
            min_thread: 0,
            max_thread: num_cpus::get(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl ThreadPoolSettings {
    /// Builds settings from a JSON document and validates them.
    pub fn from_json_str(json: &str) -> Result<Self, SchedulerError> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|err| SchedulerError::InvalidConfig(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the settings for combinations the runtime cannot honor.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_thread == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_thread must be at least 1".into(),
            ));
        }
        if self.min_thread > self.max_thread {
            return Err(SchedulerError::InvalidConfig(format!(
                "min_thread {} exceeds max_thread {}",
                self.min_thread, self.max_thread
            )));
        }
        self.scheduler.validate()
    }
}

/// Per-item flag defaults applied to newly built work items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkSettings {
    /// Reject a second hand-off to `run` after the first.
    pub schedule_only_once: bool,
    /// Auto-finish when the payload returns.
    pub finish_after_scheduling: bool,
    /// Honor cancellation while the payload is running.
    pub support_cancel_during_executing: bool,
}

impl Default for WorkSettings {
    fn default() -> Self {
        Self {
            schedule_only_once: true,
            finish_after_scheduling: true,
            support_cancel_during_executing: false,
        }
    }
}

impl WorkSettings {
    /// Applies these flags to a work item's state.
    pub fn apply(&self, state: &crate::core::work::WorkState) {
        state.set_schedule_only_once(self.schedule_only_once);
        state.set_finish_after_scheduling(self.finish_after_scheduling);
        state.set_support_cancel_during_executing(self.support_cancel_during_executing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let pool = ThreadPoolSettings::default();
        assert!(pool.max_thread >= 1);
        assert!(pool.validate().is_ok());
        assert!(pool.scheduler.schedule_by_sequence);
        assert_eq!(
            pool.scheduler.check_work_interval(),
            DEFAULT_CHECK_WORK_INTERVAL
        );
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let pool = ThreadPoolSettings::from_json_str(r#"{"max_thread": 3}"#).unwrap();
        assert_eq!(pool.max_thread, 3);
        assert_eq!(pool.min_thread, 0);
    }

    #[test]
    fn invalid_sizing_is_rejected() {
        assert!(ThreadPoolSettings::from_json_str(r#"{"max_thread": 0}"#).is_err());
        assert!(
            ThreadPoolSettings::from_json_str(r#"{"min_thread": 8, "max_thread": 2}"#).is_err()
        );
    }

    #[test]
    fn malformed_json_maps_to_config_error() {
        let err = SchedulerSettings::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[test]
    fn work_settings_apply_to_item_state() {
        let state = crate::core::work::WorkState::new("configured");
        let settings = WorkSettings {
            schedule_only_once: false,
            finish_after_scheduling: false,
            support_cancel_during_executing: true,
        };
        settings.apply(&state);
        assert!(!state.schedule_only_once());
        assert!(!state.finish_after_scheduling());
        assert!(state.support_cancel_during_executing());
    }
}
