//! Concurrency-capped background task orchestration.
//!
//! Callers submit long-running, incrementally progressing work. The
//! orchestrator admits at most `max_concurrent` tasks at a time, runs each one
//! on its own runner, lets callers pause, resume and cancel them between
//! increments, and pushes lifecycle events to any number of observers per
//! task.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  submit/pause/resume/cancel  ┌───────────┐
//! │ Orchestrator │ ───────────────────────────► │ Scheduler │ admission, signals
//! └──────┬───────┘                              └─────┬─────┘
//!        │ spawn                                      │ watch / CancellationToken
//!        ▼                                            ▼
//! ┌──────────────┐  apply_transition   ┌──────────┐
//! │  JobRunner   │ ──────────────────► │ JobStore │ task records
//! └──────┬───────┘                     └──────────┘
//!        │ publish
//!        ▼
//! ┌──────────────┐  deliver
//! │   EventHub   │ ─────────► observers (websocket clients, channels, tests)
//! └──────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(OrchestratorConfig::default());
//! let job_id = orchestrator.submit(JobSpec::new("xhs", "search", work)).await?;
//! let mut events = orchestrator.subscribe(job_id).await?;
//! while let Some(envelope) = events.recv().await {
//!     println!("{}", envelope.to_json()?);
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod orchestrator;
pub mod record;
pub mod runner;
pub mod scheduler;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use events::{EventEnvelope, TaskEvent};
pub use hub::{ChannelObserver, DeliveryError, EventHub, Observer, ObserverId, Subscription};
pub use orchestrator::{JobSpec, Orchestrator};
pub use record::{ErrorEntry, JobId, JobRecord, JobStatus, LogEntry, LogLevel, Transition};
pub use runner::{Increment, ProgressState, UnitOfWork};
pub use scheduler::ShutdownReport;
pub use store::{InMemoryJobStore, JobFilter, JobPage, JobStore, MAX_PAGE_SIZE};

// Re-export async_trait for implementing `UnitOfWork` and `JobStore`
pub use async_trait::async_trait;
