use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{JobId, JobStatus};

/// Task lifecycle events pushed to observers.
///
/// These are facts about a task, not commands. They serialize adjacently
/// tagged so every frame on the wire reads `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum TaskEvent {
    /// Acknowledgement sent to a single observer when it subscribes.
    Connected { job_id: JobId },

    /// The runner took the task from `Pending` to `Running`.
    Started { job_id: JobId, status: JobStatus },

    /// An increment finished and its progress was persisted.
    Progress {
        job_id: JobId,
        progress: u8,
        items_collected: u64,
        status: JobStatus,
    },

    /// The task ended without error. `status` is `completed` or `cancelled`.
    Completed {
        job_id: JobId,
        status: JobStatus,
        items_collected: u64,
    },

    /// The unit of work failed. The core never retries, so `retrying` is always false.
    Error {
        job_id: JobId,
        message: String,
        retrying: bool,
    },
}

impl TaskEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            TaskEvent::Connected { job_id }
            | TaskEvent::Started { job_id, .. }
            | TaskEvent::Progress { job_id, .. }
            | TaskEvent::Completed { job_id, .. }
            | TaskEvent::Error { job_id, .. } => *job_id,
        }
    }

    /// The wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            TaskEvent::Connected { .. } => "connected",
            TaskEvent::Started { .. } => "started",
            TaskEvent::Progress { .. } => "progress",
            TaskEvent::Completed { .. } => "completed",
            TaskEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskEvent::Completed { .. } | TaskEvent::Error { .. })
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.event_type(), self.job_id())
    }
}

/// A [`TaskEvent`] stamped with the time it was published.
///
/// Serializes as `{"type", "data", "timestamp"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: TaskEvent,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: TaskEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
