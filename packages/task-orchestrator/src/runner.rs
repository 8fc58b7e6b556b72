//! Drives one unit of work from start to a terminal state.
//!
//! A [`JobRunner`] owns its task's [`UnitOfWork`] for the task's whole life.
//! It is the only writer of progress, counters, terminal status, and the log
//! trail, and the only publisher of the task's lifecycle events.
//!
//! The loop checks pause and cancel signals between increments, never in the
//! middle of one:
//!
//! ```text
//! start ─► [paused? wait] ─► [cancelled? stop] ─► step ─► persist ─► publish ─┐
//!             ▲                                                              │
//!             └────────────────────────── has_more ──────────────────────────┘
//! ```
//!
//! If an increment lands after a pause request, its progress is persisted at
//! once but its `progress` event is held back until the task resumes (or is
//! flushed ahead of the terminal event if the task is cancelled while paused).
//! Observers therefore never see progress between a pause and its resume.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::error::OrchestratorError;
use crate::events::TaskEvent;
use crate::hub::EventHub;
use crate::record::{JobId, JobStatus, LogLevel, Transition};
use crate::scheduler::{JobSignals, PauseOutcome, Scheduler};
use crate::store::JobStore;

/// What the runner knows about a task's progress before the next increment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressState {
    pub progress: u8,
    pub items_collected: u64,
    /// Increments completed so far.
    pub increments: u64,
}

/// Result of one increment of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Increment {
    /// Percent complete, 0..=100. Values above 100 are clamped and the
    /// runner never lets progress move backwards.
    pub progress: u8,
    /// Cumulative item count after this increment.
    pub items_collected: u64,
    pub has_more: bool,
}

impl Increment {
    pub fn more(progress: u8, items_collected: u64) -> Self {
        Self {
            progress,
            items_collected,
            has_more: true,
        }
    }

    pub fn last(progress: u8, items_collected: u64) -> Self {
        Self {
            progress,
            items_collected,
            has_more: false,
        }
    }
}

/// Work that advances in discrete increments.
///
/// Each `step` should be short. Pause and cancel take effect only between
/// steps, so a long step delays both.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn step(&mut self, job_id: JobId, prior: ProgressState) -> anyhow::Result<Increment>;

    /// Release resources. Called exactly once, whatever the outcome.
    async fn close(&mut self) {}
}

enum Outcome {
    Completed,
    Failed(OrchestratorError),
    Cancelled,
}

/// Runs one task to a terminal state.
pub struct JobRunner {
    ctx: RunContext,
    work: Box<dyn UnitOfWork>,
    signals: JobSignals,
    pause_poll_interval: Duration,
}

/// Shared handles a runner writes through.
struct RunContext {
    job_id: JobId,
    store: Arc<dyn JobStore>,
    hub: EventHub,
    scheduler: Arc<Scheduler>,
}

impl JobRunner {
    pub fn new(
        job_id: JobId,
        work: Box<dyn UnitOfWork>,
        store: Arc<dyn JobStore>,
        hub: EventHub,
        scheduler: Arc<Scheduler>,
        signals: JobSignals,
        pause_poll_interval: Duration,
    ) -> Self {
        Self {
            ctx: RunContext {
                job_id,
                store,
                hub,
                scheduler,
            },
            work,
            signals,
            pause_poll_interval,
        }
    }

    /// Run to completion, persist the terminal state, publish the terminal
    /// event, then hand the concurrency slot back.
    pub async fn run(mut self) -> JobStatus {
        let outcome = self.drive().await;

        if AssertUnwindSafe(self.work.close())
            .catch_unwind()
            .await
            .is_err()
        {
            error!(job_id = %self.ctx.job_id, "unit of work panicked while closing");
        }

        let status = self.ctx.finish(outcome).await;
        self.ctx.scheduler.release(self.ctx.job_id);
        status
    }

    async fn drive(&mut self) -> Outcome {
        let job_id = self.ctx.job_id;

        let record = match self.ctx.store.apply_transition(job_id, Transition::Started).await {
            Ok(record) => record,
            Err(e) => return self.ctx.failed(e.to_string()),
        };
        self.ctx.log(LogLevel::Info, "Task started").await;
        self.ctx.hub.publish(TaskEvent::Started {
            job_id,
            status: record.status,
        });
        info!(job_id = %job_id, platform = %record.platform, "task started");

        let mut state = ProgressState::default();
        let mut held: Option<TaskEvent> = None;

        loop {
            if self.signals.is_paused() {
                self.ctx.log(LogLevel::Info, "Task paused").await;
                debug!(job_id = %job_id, increments = state.increments, "runner waiting while paused");

                let resumed = self
                    .signals
                    .wait_while_paused(self.pause_poll_interval)
                    .await;
                if let Some(event) = held.take() {
                    self.ctx.hub.publish(event);
                }
                match resumed {
                    PauseOutcome::Resumed => {
                        self.ctx.log(LogLevel::Info, "Task resumed").await;
                        debug!(job_id = %job_id, "runner resumed");
                    }
                    PauseOutcome::Cancelled => return Outcome::Cancelled,
                }
            }

            if self.signals.is_cancelled() {
                return Outcome::Cancelled;
            }

            let step = AssertUnwindSafe(self.work.step(job_id, state))
                .catch_unwind()
                .await;
            let increment = match step {
                Ok(Ok(increment)) => increment,
                Ok(Err(e)) => return self.ctx.failed(format!("{e:#}")),
                Err(panic) => return self.ctx.failed(panic_message(panic.as_ref())),
            };

            state.increments += 1;
            state.progress = state.progress.max(increment.progress.min(100));
            state.items_collected = increment.items_collected;

            let record = match self
                .ctx
                .store
                .apply_transition(
                    job_id,
                    Transition::Progress {
                        progress: state.progress,
                        items_collected: state.items_collected,
                    },
                )
                .await
            {
                Ok(record) => record,
                Err(e) => return self.ctx.failed(e.to_string()),
            };
            debug!(
                job_id = %job_id,
                progress = record.progress,
                items_collected = record.items_collected,
                "increment persisted"
            );

            let event = TaskEvent::Progress {
                job_id,
                progress: record.progress,
                items_collected: record.items_collected,
                status: record.status,
            };
            if self.signals.is_paused() {
                held = Some(event);
            } else {
                self.ctx.hub.publish(event);
            }

            if !increment.has_more {
                if let Some(event) = held.take() {
                    self.ctx.hub.publish(event);
                }
                return Outcome::Completed;
            }
        }
    }
}

impl RunContext {
    async fn finish(&self, outcome: Outcome) -> JobStatus {
        let job_id = self.job_id;

        match outcome {
            Outcome::Completed => {
                let record = match self.store.apply_transition(job_id, Transition::Completed).await {
                    Ok(record) => record,
                    Err(e) => return self.terminal_write_failed(e).await,
                };
                self.log(
                    LogLevel::Info,
                    format!("Task completed: {} items collected", record.items_collected),
                )
                .await;
                self.hub.publish(TaskEvent::Completed {
                    job_id,
                    status: record.status,
                    items_collected: record.items_collected,
                });
                info!(job_id = %job_id, items_collected = record.items_collected, "task completed");
                record.status
            }
            Outcome::Cancelled => {
                let record = match self.store.apply_transition(job_id, Transition::Cancelled).await {
                    Ok(record) => record,
                    Err(e) => return self.terminal_write_failed(e).await,
                };
                self.log(LogLevel::Info, "Task cancelled").await;
                self.hub.publish(TaskEvent::Completed {
                    job_id,
                    status: record.status,
                    items_collected: record.items_collected,
                });
                info!(job_id = %job_id, progress = record.progress, "task cancelled");
                record.status
            }
            Outcome::Failed(err) => {
                let message = match &err {
                    OrchestratorError::ExecutionFailed { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                let record = match self
                    .store
                    .apply_transition(
                        job_id,
                        Transition::Failed {
                            message: message.clone(),
                        },
                    )
                    .await
                {
                    Ok(record) => record,
                    Err(e) => return self.terminal_write_failed(e).await,
                };
                self.log(LogLevel::Error, format!("Task failed: {message}")).await;
                self.hub.publish(TaskEvent::Error {
                    job_id,
                    message,
                    retrying: false,
                });
                warn!(job_id = %job_id, error = %err, "task failed");
                record.status
            }
        }
    }

    /// The terminal write was refused, typically because shutdown already
    /// abandoned the task or the record is gone. Publish nothing.
    async fn terminal_write_failed(&self, e: OrchestratorError) -> JobStatus {
        error!(job_id = %self.job_id, error = %e, "failed to persist terminal state");
        match self.store.get(self.job_id).await {
            Ok(record) => record.status,
            Err(_) => JobStatus::Cancelled,
        }
    }

    fn failed(&self, message: String) -> Outcome {
        Outcome::Failed(OrchestratorError::ExecutionFailed {
            job_id: self.job_id,
            message,
        })
    }

    async fn log(&self, level: LogLevel, message: impl Into<String>) {
        if let Err(e) = self
            .store
            .apply_transition(self.job_id, Transition::log(level, message))
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "failed to append task log");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("unit of work panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("unit of work panicked: {s}")
    } else {
        "unit of work panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::JobRecord;
    use crate::store::InMemoryJobStore;
    use crate::testing::ScriptedWork;

    struct Fixture {
        store: Arc<InMemoryJobStore>,
        hub: EventHub,
        scheduler: Arc<Scheduler>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryJobStore::new());
            Self {
                scheduler: Arc::new(Scheduler::new(2, store.clone())),
                store,
                hub: EventHub::new(),
            }
        }

        async fn runner(&self, work: ScriptedWork) -> (JobId, JobRunner) {
            let id = JobId::new();
            let signals = self.scheduler.admit(id).unwrap();
            self.store
                .create(JobRecord::new(id, "xhs", "search", serde_json::json!({})))
                .await
                .unwrap();
            let runner = JobRunner::new(
                id,
                Box::new(work),
                self.store.clone(),
                self.hub.clone(),
                self.scheduler.clone(),
                signals,
                Duration::from_millis(10),
            );
            (id, runner)
        }
    }

    fn drain(sub: &mut crate::hub::Subscription) -> Vec<&'static str> {
        let mut types = Vec::new();
        while let Some(envelope) = sub.try_recv() {
            types.push(envelope.event_type());
        }
        types
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let fx = Fixture::new();
        let (id, runner) = fx.runner(ScriptedWork::new(3)).await;
        let mut sub = fx.hub.subscribe_channel(id);

        assert_eq!(runner.run().await, JobStatus::Completed);

        let record = fx.store.get(id).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(record.items_collected, 3);
        assert!(record.ended_at.is_some());
        assert_eq!(fx.scheduler.running_count(), 0);

        assert_eq!(
            drain(&mut sub),
            vec!["connected", "started", "progress", "progress", "progress", "completed"]
        );
    }

    #[tokio::test]
    async fn test_step_error_fails_task_and_publishes_error() {
        let fx = Fixture::new();
        let (id, runner) = fx.runner(ScriptedWork::new(5).fail_at(3, "page 3 returned 500")).await;
        let mut sub = fx.hub.subscribe_channel(id);

        assert_eq!(runner.run().await, JobStatus::Failed);

        let record = fx.store.get(id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.items_collected, 2);
        assert_eq!(record.errors.len(), 1);
        assert!(record.errors[0].message.contains("page 3 returned 500"));

        let types = drain(&mut sub);
        assert_eq!(types.last(), Some(&"error"));
        assert_eq!(types.iter().filter(|t| **t == "progress").count(), 2);
    }

    #[tokio::test]
    async fn test_panicking_step_is_contained() {
        let fx = Fixture::new();
        let (id, runner) = fx.runner(ScriptedWork::new(3).panic_at(1)).await;

        assert_eq!(runner.run().await, JobStatus::Failed);

        let record = fx.store.get(id).await.unwrap();
        assert!(record.errors[0].message.contains("panicked"));
        assert_eq!(fx.scheduler.running_count(), 0);
    }

    #[tokio::test]
    async fn test_close_is_called_once_on_every_path() {
        let fx = Fixture::new();
        let work = ScriptedWork::new(2).fail_at(1, "boom");
        let closed = work.close_count();
        let (_id, runner) = fx.runner(work).await;
        runner.run().await;
        assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_first_step_still_starts_then_cancels() {
        let fx = Fixture::new();
        let (id, runner) = fx.runner(ScriptedWork::new(3)).await;
        fx.scheduler.cancel(id).await.unwrap();

        assert_eq!(runner.run().await, JobStatus::Cancelled);
        let record = fx.store.get(id).await.unwrap();
        assert_eq!(record.items_collected, 0);
        assert!(record.started_at.is_some());
    }

    #[tokio::test]
    async fn test_progress_never_moves_backwards() {
        let fx = Fixture::new();
        let work = ScriptedWork::from_increments(vec![
            Increment::more(60, 1),
            Increment::more(30, 2),
            Increment::last(250, 3),
        ]);
        let (id, runner) = fx.runner(work).await;
        let mut sub = fx.hub.subscribe_channel(id);
        runner.run().await;

        let mut progress = Vec::new();
        while let Some(envelope) = sub.try_recv() {
            if let TaskEvent::Progress { progress: p, .. } = envelope.event {
                progress.push(p);
            }
        }
        assert_eq!(progress, vec![60, 60, 100]);
    }

    #[tokio::test]
    async fn test_last_increment_landing_while_paused_completes_without_resume() {
        let fx = Fixture::new();
        let (work, gate) = ScriptedWork::new(2).gated();
        let steps = work.steps_taken();
        let (id, runner) = fx.runner(work).await;
        let mut sub = fx.hub.subscribe_channel(id);
        let handle = tokio::spawn(runner.run());

        while steps.load(std::sync::atomic::Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }
        gate.release(1);
        while steps.load(std::sync::atomic::Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }

        // the final step is in flight when the pause lands
        fx.scheduler.pause(id).await.unwrap();
        gate.release(1);

        assert_eq!(handle.await.unwrap(), JobStatus::Completed);
        let record = fx.store.get(id).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(
            drain(&mut sub),
            vec!["connected", "started", "progress", "progress", "completed"]
        );
    }

    #[test]
    fn test_panic_message_extracts_payload() {
        let boxed: Box<dyn Any + Send> = Box::new("bad page");
        assert_eq!(panic_message(boxed.as_ref()), "unit of work panicked: bad page");
        let boxed: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(boxed.as_ref()), "unit of work panicked");
    }
}
