//! Test doubles for exercising the orchestrator without real work.
//!
//! - [`ScriptedWork`]: a [`UnitOfWork`] that replays a fixed list of
//!   increments, optionally failing, panicking, or waiting on a gate.
//! - [`RecordingObserver`]: an [`Observer`] that keeps everything it receives.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::events::{EventEnvelope, TaskEvent};
use crate::hub::{DeliveryError, Observer};
use crate::record::JobId;
use crate::runner::{Increment, ProgressState, UnitOfWork};

enum Step {
    Advance(Increment),
    Fail(String),
    Panic,
}

/// Releases gated steps of a [`ScriptedWork`] one at a time.
#[derive(Debug, Clone)]
pub struct StepGate {
    permits: Arc<Semaphore>,
}

impl StepGate {
    fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    /// Let `n` more steps run.
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    /// Let every remaining step run.
    pub fn open(&self) {
        self.permits.add_permits(1 << 16);
    }
}

/// A [`UnitOfWork`] that replays scripted increments.
pub struct ScriptedWork {
    steps: VecDeque<Step>,
    gate: Option<StepGate>,
    delay: Option<Duration>,
    steps_taken: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedWork {
    /// `total` evenly spaced increments collecting one item each, the last
    /// reaching 100%.
    pub fn new(total: usize) -> Self {
        let total = total.max(1);
        let increments = (1..=total)
            .map(|i| Increment {
                progress: ((i * 100) / total) as u8,
                items_collected: i as u64,
                has_more: i < total,
            })
            .collect();
        Self::from_increments(increments)
    }

    pub fn from_increments(increments: Vec<Increment>) -> Self {
        Self {
            steps: increments.into_iter().map(Step::Advance).collect(),
            gate: None,
            delay: None,
            steps_taken: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the `n`th step (1-based) return an error instead.
    pub fn fail_at(mut self, n: usize, message: impl Into<String>) -> Self {
        if let Some(step) = self.steps.get_mut(n.saturating_sub(1)) {
            *step = Step::Fail(message.into());
        }
        self
    }

    /// Make the `n`th step (1-based) panic instead.
    pub fn panic_at(mut self, n: usize) -> Self {
        if let Some(step) = self.steps.get_mut(n.saturating_sub(1)) {
            *step = Step::Panic;
        }
        self
    }

    /// Sleep for `delay` inside every step.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Block every step until the returned gate releases it.
    pub fn gated(mut self) -> (Self, StepGate) {
        let gate = StepGate::new();
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Shared counter of steps that have started.
    pub fn steps_taken(&self) -> Arc<AtomicUsize> {
        self.steps_taken.clone()
    }

    /// Shared counter of `close` calls.
    pub fn close_count(&self) -> Arc<AtomicUsize> {
        self.closed.clone()
    }
}

#[async_trait]
impl UnitOfWork for ScriptedWork {
    async fn step(&mut self, _job_id: JobId, prior: ProgressState) -> anyhow::Result<Increment> {
        self.steps_taken.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.permits.acquire().await?.forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.steps.pop_front() {
            Some(Step::Advance(increment)) => Ok(increment),
            Some(Step::Fail(message)) => Err(anyhow::anyhow!(message)),
            Some(Step::Panic) => panic!("scripted panic"),
            None => Ok(Increment::last(100, prior.items_collected)),
        }
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// An [`Observer`] that records every delivered event.
///
/// `fail_after(n)` makes it refuse deliveries after `n` accepted events, to
/// simulate a disconnecting client.
#[derive(Default)]
pub struct RecordingObserver {
    events: RwLock<Vec<EventEnvelope>>,
    fail_after: Option<usize>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_after(n: usize) -> Arc<Self> {
        Arc::new(Self {
            events: RwLock::new(Vec::new()),
            fail_after: Some(n),
        })
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.event.clone())
            .collect()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.event_type())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Observer for RecordingObserver {
    fn deliver(&self, envelope: &EventEnvelope) -> Result<(), DeliveryError> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        if self.fail_after.is_some_and(|n| events.len() >= n) {
            return Err(DeliveryError::Closed);
        }
        events.push(envelope.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_work_replays_even_increments() {
        let mut work = ScriptedWork::new(4);
        let id = JobId::new();
        let mut state = ProgressState::default();
        let mut seen = Vec::new();
        loop {
            let inc = work.step(id, state).await.unwrap();
            state.progress = inc.progress;
            state.items_collected = inc.items_collected;
            seen.push(inc.progress);
            if !inc.has_more {
                break;
            }
        }
        assert_eq!(seen, vec![25, 50, 75, 100]);
        assert_eq!(work.steps_taken().load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_scripted_failure_surfaces_message() {
        let mut work = ScriptedWork::new(3).fail_at(2, "rate limited");
        let id = JobId::new();
        work.step(id, ProgressState::default()).await.unwrap();
        let err = work.step(id, ProgressState::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "rate limited");
    }

    #[test]
    fn test_recording_observer_refuses_after_limit() {
        let observer = RecordingObserver::fail_after(1);
        let envelope = EventEnvelope::new(TaskEvent::Connected { job_id: JobId::new() });
        assert!(observer.deliver(&envelope).is_ok());
        assert_eq!(observer.deliver(&envelope), Err(DeliveryError::Closed));
        assert_eq!(observer.len(), 1);
    }
}
