//! Admission control and pause/resume/cancel signalling for running tasks.
//!
//! The `Scheduler` tracks every admitted task until its runner releases it.
//! It enforces the concurrency bound at admission time only, through a
//! semaphore whose permits travel with each tracked task.
//!
//! # Signals, not writes
//!
//! ```text
//! caller ──pause──► Scheduler ──watch<bool>──► JobRunner (checks between increments)
//! caller ──cancel─► Scheduler ──CancellationToken──► JobRunner (unwinds, writes Cancelled)
//! ```
//!
//! The scheduler mirrors caller-driven `Paused`/`Running` status into the
//! task record, but never touches progress, counters, or the log trail. A
//! cancel request only trips the task's token; the runner performs the
//! terminal transition itself. The one exception is shutdown: a runner that
//! does not finish within the grace period is aborted and its record is
//! marked `Cancelled` here.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::record::{JobId, JobRecord, LogLevel, Transition};
use crate::store::JobStore;

/// Caller-visible control state of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlState {
    Active,
    Paused,
    Cancelling,
}

struct JobControl {
    state: Mutex<ControlState>,
    pause_tx: watch::Sender<bool>,
    cancel: CancellationToken,
    released: CancellationToken,
    abort: StdMutex<Option<AbortHandle>>,
    permit: StdMutex<Option<OwnedSemaphorePermit>>,
}

/// How a paused runner stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Resumed,
    Cancelled,
}

/// The runner's view of its task's control signals.
#[derive(Debug, Clone)]
pub struct JobSignals {
    pause_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl JobSignals {
    pub fn is_paused(&self) -> bool {
        *self.pause_rx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Suspend until the pause flag clears or cancellation is requested.
    ///
    /// Wakes on either signal, and re-checks at least every `poll` in case a
    /// wake-up is missed.
    pub async fn wait_while_paused(&mut self, poll: Duration) -> PauseOutcome {
        loop {
            if self.cancel.is_cancelled() {
                return PauseOutcome::Cancelled;
            }
            if !*self.pause_rx.borrow_and_update() {
                return PauseOutcome::Resumed;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {}
                changed = self.pause_rx.changed() => {
                    // sender gone means the scheduler dropped this task
                    if changed.is_err() {
                        return PauseOutcome::Cancelled;
                    }
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}

/// Outcome of [`Scheduler::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that reached a terminal state on their own within the grace period
    pub drained: usize,
    /// Tasks aborted after the grace period and marked cancelled
    pub abandoned: Vec<JobId>,
}

/// Tracks admitted tasks and enforces the concurrency bound.
pub struct Scheduler {
    max_concurrent: usize,
    slots: Arc<Semaphore>,
    controls: DashMap<JobId, Arc<JobControl>>,
    store: Arc<dyn JobStore>,
    root: CancellationToken,
    shutting_down: AtomicBool,
}

impl Scheduler {
    pub fn new(max_concurrent: usize, store: Arc<dyn JobStore>) -> Self {
        Self {
            max_concurrent,
            slots: Arc::new(Semaphore::new(max_concurrent)),
            controls: DashMap::new(),
            store,
            root: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of tasks currently tracked (Running or Paused).
    pub fn running_count(&self) -> usize {
        self.controls.len()
    }

    pub fn is_tracked(&self, job_id: JobId) -> bool {
        self.controls.contains_key(&job_id)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Reserve a concurrency slot for `job_id` and start tracking it.
    ///
    /// Fails with `ResourceExhausted` when every slot is taken. This is a
    /// rejection, not a queue.
    pub fn admit(&self, job_id: JobId) -> Result<JobSignals> {
        if self.is_shutting_down() {
            return Err(OrchestratorError::ShuttingDown);
        }

        let permit = self.slots.clone().try_acquire_owned().map_err(|_| {
            OrchestratorError::ResourceExhausted {
                max_concurrent: self.max_concurrent,
            }
        })?;

        let (pause_tx, pause_rx) = watch::channel(false);
        let cancel = self.root.child_token();
        let control = Arc::new(JobControl {
            state: Mutex::new(ControlState::Active),
            pause_tx,
            cancel: cancel.clone(),
            released: CancellationToken::new(),
            abort: StdMutex::new(None),
            permit: StdMutex::new(Some(permit)),
        });
        self.controls.insert(job_id, control);

        info!(
            job_id = %job_id,
            running = self.running_count(),
            max_concurrent = self.max_concurrent,
            "task admitted"
        );

        Ok(JobSignals { pause_rx, cancel })
    }

    /// Remember how to abort the task's runner if shutdown has to abandon it.
    pub fn attach(&self, job_id: JobId, abort: AbortHandle) {
        if let Some(control) = self.control(job_id) {
            *control.abort.lock().unwrap_or_else(|e| e.into_inner()) = Some(abort);
        }
    }

    /// Stop tracking a task and free its slot. Idempotent.
    pub fn release(&self, job_id: JobId) {
        let Some((_, control)) = self.controls.remove(&job_id) else {
            return;
        };
        control
            .permit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        control.released.cancel();
        debug!(job_id = %job_id, running = self.running_count(), "task released");
    }

    /// Resolves once `job_id` has been released. Returns immediately for
    /// tasks that are not tracked.
    pub async fn wait_released(&self, job_id: JobId) {
        let released = self.control(job_id).map(|c| c.released.clone());
        if let Some(released) = released {
            released.cancelled().await;
        }
    }

    /// Running → Paused. The runner's current increment is allowed to finish.
    pub async fn pause(&self, job_id: JobId) -> Result<JobRecord> {
        let Some(control) = self.control(job_id) else {
            return Err(self.untracked(job_id, "pause").await);
        };

        let mut state = control.state.lock().await;
        if *state != ControlState::Active {
            return Err(self.current_state_error(job_id, *state, "pause").await);
        }

        control.pause_tx.send_replace(true);
        let record = match self.store.apply_transition(job_id, Transition::Paused).await {
            Ok(record) => record,
            Err(e) => {
                control.pause_tx.send_replace(false);
                return Err(e);
            }
        };
        *state = ControlState::Paused;

        info!(job_id = %job_id, progress = record.progress, "task paused");
        Ok(record)
    }

    /// Paused → Running.
    pub async fn resume(&self, job_id: JobId) -> Result<JobRecord> {
        let Some(control) = self.control(job_id) else {
            return Err(self.untracked(job_id, "resume").await);
        };

        let mut state = control.state.lock().await;
        if *state != ControlState::Paused {
            return Err(self.current_state_error(job_id, *state, "resume").await);
        }

        let record = self
            .store
            .apply_transition(job_id, Transition::Resumed)
            .await?;
        control.pause_tx.send_replace(false);
        *state = ControlState::Active;

        info!(job_id = %job_id, progress = record.progress, "task resumed");
        Ok(record)
    }

    /// Request cancellation. The runner writes the terminal state when it unwinds.
    ///
    /// Repeating a cancel for a task that is already unwinding is accepted.
    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        let Some(control) = self.control(job_id) else {
            return Err(self.untracked(job_id, "cancel").await);
        };

        let mut state = control.state.lock().await;
        if *state == ControlState::Cancelling {
            return Ok(());
        }

        let record = self.store.get(job_id).await?;
        if record.is_terminal() {
            return Err(OrchestratorError::invalid_state(
                job_id,
                record.status,
                "cancel",
            ));
        }

        control.cancel.cancel();
        *state = ControlState::Cancelling;
        info!(job_id = %job_id, status = %record.status, "task cancellation requested");
        Ok(())
    }

    /// Cancel every tracked task and wait up to `grace` for them to finish.
    ///
    /// Runners still alive after `grace` are aborted and their records are
    /// marked `Cancelled`. New admissions are refused from the moment this
    /// is called.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.shutting_down.store(true, Ordering::SeqCst);

        let tracked: Vec<(JobId, Arc<JobControl>)> = self
            .controls
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        info!(count = tracked.len(), "cancelling running tasks for shutdown");
        self.root.cancel();

        let drain = futures::future::join_all(
            tracked.iter().map(|(_, control)| control.released.cancelled()),
        );
        if tokio::time::timeout(grace, drain).await.is_ok() {
            info!(drained = tracked.len(), "all tasks drained");
            return ShutdownReport {
                drained: tracked.len(),
                abandoned: Vec::new(),
            };
        }

        let mut report = ShutdownReport::default();
        for (job_id, control) in tracked {
            if control.released.is_cancelled() {
                report.drained += 1;
                continue;
            }

            if let Some(abort) = control
                .abort
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
            {
                abort.abort();
            }

            match self
                .store
                .apply_transition(job_id, Transition::Cancelled)
                .await
            {
                Ok(_) => {
                    let _ = self
                        .store
                        .apply_transition(
                            job_id,
                            Transition::log(
                                LogLevel::Warning,
                                "Task abandoned after shutdown grace period",
                            ),
                        )
                        .await;
                    error!(job_id = %job_id, grace_ms = grace.as_millis() as u64, "task force-abandoned at shutdown");
                    report.abandoned.push(job_id);
                }
                Err(e) => {
                    // runner reached a terminal state between timeout and abort
                    warn!(job_id = %job_id, error = %e, "abandoned task already terminal");
                    report.drained += 1;
                }
            }
            self.release(job_id);
        }

        report
    }

    fn control(&self, job_id: JobId) -> Option<Arc<JobControl>> {
        self.controls.get(&job_id).map(|c| c.value().clone())
    }

    /// Error for a request against a task the scheduler does not track.
    async fn untracked(&self, job_id: JobId, action: &'static str) -> OrchestratorError {
        match self.store.get(job_id).await {
            Ok(record) => OrchestratorError::invalid_state(job_id, record.status, action),
            Err(e) => e,
        }
    }

    async fn current_state_error(
        &self,
        job_id: JobId,
        state: ControlState,
        action: &'static str,
    ) -> OrchestratorError {
        if state == ControlState::Cancelling {
            return OrchestratorError::Cancelling { job_id, action };
        }
        self.untracked(job_id, action).await
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("max_concurrent", &self.max_concurrent)
            .field("running", &self.running_count())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
