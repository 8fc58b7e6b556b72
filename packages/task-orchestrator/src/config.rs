use std::time::Duration;

use crate::hub::DEFAULT_OBSERVER_BUFFER;
use crate::record::DEFAULT_MAX_LOG_ENTRIES;

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of tasks that may be Running or Paused at once
    pub max_concurrent: usize,
    /// How often a paused runner re-checks its pause flag
    pub pause_poll_interval: Duration,
    /// How long shutdown waits for runners before force-abandoning them
    pub shutdown_grace: Duration,
    /// Buffered events per channel observer before it is considered slow
    pub observer_buffer: usize,
    /// Log lines retained per task record
    pub max_log_entries: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            pause_poll_interval: Duration::from_millis(250),
            shutdown_grace: Duration::from_secs(30),
            observer_buffer: DEFAULT_OBSERVER_BUFFER,
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
        }
    }
}

impl OrchestratorConfig {
    /// Create a default config with a specific concurrency bound.
    pub fn with_max_concurrent(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            ..Default::default()
        }
    }

    pub fn pause_poll_interval(mut self, interval: Duration) -> Self {
        self.pause_poll_interval = interval;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn observer_buffer(mut self, buffer: usize) -> Self {
        self.observer_buffer = buffer;
        self
    }

    pub fn max_log_entries(mut self, entries: usize) -> Self {
        self.max_log_entries = entries;
        self
    }
}
