//! crates/progress_sync_core/src/config.rs
//!
//! Tunables for a lesson session. Both structs deserialize from partial JSON,
//! filling anything missing with the defaults below.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::sync::ConflictPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncOptions {
    pub conflict_resolution: ConflictPolicy,
    pub sync_interval_ms: u64,
    pub tracking_interval_ms: u64,
    /// Subscribe to remote changes while the lesson is open.
    pub enable_real_time_sync: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            conflict_resolution: ConflictPolicy::MostProgress,
            sync_interval_ms: 10_000,
            tracking_interval_ms: 5_000,
            enable_real_time_sync: true,
        }
    }
}

impl SyncOptions {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    pub fn tracking_interval(&self) -> Duration {
        Duration::from_millis(self.tracking_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResumePreferences {
    /// Minimum position (seconds, or percent for text/pdf) before a resume
    /// point is offered.
    pub resume_threshold: f64,
    pub show_resume_notification: bool,
    pub max_history_items: usize,
    /// Lessons untouched for longer than this are recommended for a restart.
    pub stale_after_days: i64,
}

impl Default for ResumePreferences {
    fn default() -> Self {
        Self {
            resume_threshold: 30.0,
            show_resume_notification: true,
            max_history_items: 10,
            stale_after_days: 7,
        }
    }
}
