//! The public entry point: submit work and control or observe it.
//!
//! [`Orchestrator`] owns no state of its own. It wires the store, scheduler
//! and event hub together and spawns one [`JobRunner`] per admitted task.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::TaskEvent;
use crate::hub::{EventHub, Observer, ObserverId, Subscription};
use crate::record::{JobId, JobRecord, JobStatus};
use crate::runner::{JobRunner, UnitOfWork};
use crate::scheduler::{Scheduler, ShutdownReport};
use crate::store::{InMemoryJobStore, JobFilter, JobPage, JobStore};

/// Everything needed to submit one task.
pub struct JobSpec {
    pub platform: String,
    pub crawler_type: String,
    /// Opaque task configuration, stored on the record for callers to read back.
    pub config: Value,
    pub work: Box<dyn UnitOfWork>,
}

impl JobSpec {
    pub fn new(
        platform: impl Into<String>,
        crawler_type: impl Into<String>,
        work: impl UnitOfWork + 'static,
    ) -> Self {
        Self {
            platform: platform.into(),
            crawler_type: crawler_type.into(),
            config: Value::Null,
            work: Box::new(work),
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("platform", &self.platform)
            .field("crawler_type", &self.crawler_type)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Concurrency-capped task orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    scheduler: Arc<Scheduler>,
    hub: EventHub,
}

impl Orchestrator {
    /// Create an orchestrator backed by an in-memory store.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryJobStore::new()))
    }

    pub fn with_store(config: OrchestratorConfig, store: Arc<dyn JobStore>) -> Self {
        let scheduler = Arc::new(Scheduler::new(config.max_concurrent, store.clone()));
        let hub = EventHub::with_buffer(config.observer_buffer);
        Self {
            config,
            store,
            scheduler,
            hub,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Tasks currently Running or Paused.
    pub fn running_count(&self) -> usize {
        self.scheduler.running_count()
    }

    /// Admit and start a task. Returns as soon as the task is scheduled.
    ///
    /// Fails with `ResourceExhausted` when `max_concurrent` tasks are
    /// already active; nothing is recorded in that case.
    pub async fn submit(&self, spec: JobSpec) -> Result<JobId> {
        let job_id = JobId::new();
        let signals = self.scheduler.admit(job_id)?;

        let record = JobRecord::new(job_id, &spec.platform, &spec.crawler_type, spec.config)
            .with_log_capacity(self.config.max_log_entries);
        if let Err(e) = self.store.create(record).await {
            self.scheduler.release(job_id);
            return Err(e);
        }

        let runner = JobRunner::new(
            job_id,
            spec.work,
            self.store.clone(),
            self.hub.clone(),
            self.scheduler.clone(),
            signals,
            self.config.pause_poll_interval,
        );
        let handle = tokio::spawn(runner.run());
        self.scheduler.attach(job_id, handle.abort_handle());

        info!(
            job_id = %job_id,
            platform = %spec.platform,
            crawler_type = %spec.crawler_type,
            "task submitted"
        );
        Ok(job_id)
    }

    pub async fn pause(&self, job_id: JobId) -> Result<JobRecord> {
        self.scheduler.pause(job_id).await
    }

    pub async fn resume(&self, job_id: JobId) -> Result<JobRecord> {
        self.scheduler.resume(job_id).await
    }

    /// Request cancellation. The task reaches `Cancelled` once its current
    /// increment finishes; use [`Orchestrator::wait`] to observe that.
    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        self.scheduler.cancel(job_id).await
    }

    pub async fn get(&self, job_id: JobId) -> Result<JobRecord> {
        self.store.get(job_id).await
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<JobPage> {
        self.store.list(filter).await
    }

    /// Delete a finished task's record.
    pub async fn remove(&self, job_id: JobId) -> Result<JobRecord> {
        if self.scheduler.is_tracked(job_id) {
            let status = self.store.get(job_id).await?.status;
            return Err(OrchestratorError::invalid_state(job_id, status, "delete"));
        }
        self.store.remove(job_id).await
    }

    /// Subscribe to a task's future events through a bounded channel.
    pub async fn subscribe(&self, job_id: JobId) -> Result<Subscription> {
        self.store.get(job_id).await?;
        Ok(self.hub.subscribe_channel(job_id))
    }

    /// Register a custom observer for a task's future events.
    pub async fn observe(&self, job_id: JobId, observer: Arc<dyn Observer>) -> Result<ObserverId> {
        self.store.get(job_id).await?;
        Ok(self.hub.subscribe(job_id, observer))
    }

    pub fn unsubscribe(&self, job_id: JobId, observer_id: ObserverId) {
        self.hub.unsubscribe(job_id, observer_id);
    }

    /// Wait until the task's runner has finished and return the final record.
    pub async fn wait(&self, job_id: JobId) -> Result<JobRecord> {
        self.scheduler.wait_released(job_id).await;
        self.store.get(job_id).await
    }

    /// Refuse new work, cancel everything running, and wait up to the
    /// configured grace period for runners to finish.
    pub async fn shutdown(&self) -> ShutdownReport {
        let report = self.scheduler.shutdown(self.config.shutdown_grace).await;

        for job_id in &report.abandoned {
            let items_collected = match self.store.get(*job_id).await {
                Ok(record) => record.items_collected,
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "abandoned task record missing");
                    continue;
                }
            };
            self.hub.publish(TaskEvent::Completed {
                job_id: *job_id,
                status: JobStatus::Cancelled,
                items_collected,
            });
        }

        info!(
            drained = report.drained,
            abandoned = report.abandoned.len(),
            "orchestrator shut down"
        );
        report
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("hub", &self.hub)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedWork;

    #[tokio::test]
    async fn test_submitted_task_is_recorded_with_labels() {
        let orchestrator = Orchestrator::default();
        let (work, gate) = ScriptedWork::new(1).gated();
        let id = orchestrator
            .submit(JobSpec::new("bilibili", "detail", work).with_config(serde_json::json!({"ids": [1, 2]})))
            .await
            .unwrap();

        let record = orchestrator.get(id).await.unwrap();
        assert_eq!(record.platform, "bilibili");
        assert_eq!(record.crawler_type, "detail");
        assert_eq!(record.config["ids"][1], 2);

        gate.open();
        let record = orchestrator.wait(id).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_remove_refuses_active_tasks() {
        let orchestrator = Orchestrator::default();
        let (work, gate) = ScriptedWork::new(1).gated();
        let id = orchestrator.submit(JobSpec::new("xhs", "search", work)).await.unwrap();

        assert!(matches!(
            orchestrator.remove(id).await.unwrap_err(),
            OrchestratorError::InvalidState { action: "delete", .. }
        ));

        gate.open();
        orchestrator.wait(id).await.unwrap();
        orchestrator.remove(id).await.unwrap();
        assert_eq!(
            orchestrator.get(id).await.unwrap_err(),
            OrchestratorError::NotFound(id)
        );
    }

    #[tokio::test]
    async fn test_subscribe_to_unknown_task_is_not_found() {
        let orchestrator = Orchestrator::default();
        let id = JobId::new();
        assert_eq!(
            orchestrator.subscribe(id).await.unwrap_err(),
            OrchestratorError::NotFound(id)
        );
    }

    #[tokio::test]
    async fn test_log_capacity_follows_config() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default().max_log_entries(2));
        let id = orchestrator
            .submit(JobSpec::new("xhs", "search", ScriptedWork::new(2)))
            .await
            .unwrap();
        let record = orchestrator.wait(id).await.unwrap();
        assert_eq!(record.logs.len(), 2);
        assert!(record.logs.back().unwrap().message.starts_with("Task completed"));
    }
}
