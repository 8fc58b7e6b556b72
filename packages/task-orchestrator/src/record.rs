//! The durable state of one task and the transitions that mutate it.
//!
//! A [`JobRecord`] is pure data. It only changes through [`JobRecord::apply`],
//! which checks that a [`Transition`] is legal from the current status before
//! touching any field. Illegal transitions come back as
//! [`OrchestratorError::InvalidState`] and leave the record untouched.
//!
//! ```text
//! Pending ──start──► Running ◄──resume── Paused
//!    │                 │  └────pause──────►│
//!    │                 ├──complete──► Completed
//!    │                 ├──fail──────► Failed
//!    └──────cancel─────┴──cancel────► Cancelled ◄──cancel── Paused
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Default cap on retained log entries per task.
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 100;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque task identifier, assigned at submission and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// `Completed`, `Failed` and `Cancelled` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

// ============================================================================
// Trail entries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

// ============================================================================
// Transitions
// ============================================================================

/// A single atomic mutation of a [`JobRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Pending → Running. Sets `started_at` the first time.
    Started,
    /// Running → Paused.
    Paused,
    /// Paused → Running.
    Resumed,
    /// New progress after an increment. Allowed while Running or Paused.
    Progress { progress: u8, items_collected: u64 },
    /// Running/Paused → Completed with progress pinned to 100.
    Completed,
    /// Non-terminal → Failed, appending `message` to the error trail.
    Failed { message: String },
    /// Non-terminal → Cancelled.
    Cancelled,
    /// Append a log line. Allowed in any status.
    Log { level: LogLevel, message: String },
}

impl Transition {
    /// Verb used in `InvalidState` errors.
    fn action(&self) -> &'static str {
        match self {
            Transition::Started => "start",
            Transition::Paused => "pause",
            Transition::Resumed => "resume",
            Transition::Progress { .. } => "record progress for",
            Transition::Completed => "complete",
            Transition::Failed { .. } => "fail",
            Transition::Cancelled => "cancel",
            Transition::Log { .. } => "log to",
        }
    }

    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Transition::Log {
            level,
            message: message.into(),
        }
    }
}

// ============================================================================
// Record
// ============================================================================

fn default_log_capacity() -> usize {
    DEFAULT_MAX_LOG_ENTRIES
}

/// The state of one submitted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub platform: String,
    pub crawler_type: String,
    pub config: serde_json::Value,
    pub status: JobStatus,
    pub progress: u8,
    pub items_collected: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub errors: Vec<ErrorEntry>,
    pub logs: VecDeque<LogEntry>,
    #[serde(skip, default = "default_log_capacity")]
    log_capacity: usize,
}

impl JobRecord {
    /// Create a `Pending` record.
    pub fn new(
        id: JobId,
        platform: impl Into<String>,
        crawler_type: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            platform: platform.into(),
            crawler_type: crawler_type.into(),
            config,
            status: JobStatus::Pending,
            progress: 0,
            items_collected: 0,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
            errors: Vec::new(),
            logs: VecDeque::new(),
            log_capacity: DEFAULT_MAX_LOG_ENTRIES,
        }
    }

    /// Override how many log lines are retained. Zero is treated as one.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds between start and end, once both are known.
    pub fn duration_secs(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }

    /// Apply `transition` if it is legal from the current status.
    pub fn apply(&mut self, transition: Transition) -> Result<()> {
        let now = Utc::now();
        let status = self.status;
        let action = transition.action();

        match transition {
            Transition::Started => {
                self.require(status == JobStatus::Pending, action)?;
                self.status = JobStatus::Running;
                self.started_at.get_or_insert(now);
            }
            Transition::Paused => {
                self.require(status == JobStatus::Running, action)?;
                self.status = JobStatus::Paused;
            }
            Transition::Resumed => {
                self.require(status == JobStatus::Paused, action)?;
                self.status = JobStatus::Running;
            }
            Transition::Progress {
                progress,
                items_collected,
            } => {
                self.require(
                    matches!(status, JobStatus::Running | JobStatus::Paused),
                    action,
                )?;
                // progress never moves backwards while the task is live
                self.progress = self.progress.max(progress.min(100));
                self.items_collected = items_collected;
            }
            Transition::Completed => {
                self.require(
                    matches!(status, JobStatus::Running | JobStatus::Paused),
                    action,
                )?;
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.ended_at = Some(now);
            }
            Transition::Failed { message } => {
                self.require(!status.is_terminal(), action)?;
                self.status = JobStatus::Failed;
                self.errors.push(ErrorEntry {
                    timestamp: now,
                    message,
                });
                self.ended_at = Some(now);
            }
            Transition::Cancelled => {
                self.require(!status.is_terminal(), action)?;
                self.status = JobStatus::Cancelled;
                self.ended_at = Some(now);
            }
            Transition::Log { level, message } => {
                self.logs.push_back(LogEntry {
                    timestamp: now,
                    level,
                    message,
                });
                while self.logs.len() > self.log_capacity {
                    self.logs.pop_front();
                }
            }
        }

        self.updated_at = now;
        Ok(())
    }

    fn require(&self, legal: bool, action: &'static str) -> Result<()> {
        if legal {
            Ok(())
        } else {
            Err(OrchestratorError::invalid_state(self.id, self.status, action))
        }
    }
}
