//! Per-task fan-out of [`TaskEvent`]s to live observers.
//!
//! The hub keeps, for every task with at least one observer, the set of
//! registered [`Observer`]s. It holds no task state and never queues events
//! for future subscribers: publishing to a task nobody watches is a no-op.
//!
//! # Guarantees
//!
//! - **Connected first**: a new observer receives `connected` before any
//!   event published after it joined, and never any event published before.
//! - **Per-task order**: every healthy observer of a task sees events in the
//!   order `publish` was called for that task, without gaps or duplicates.
//! - **No head-of-line blocking**: delivery is a non-blocking hand-off. An
//!   observer that cannot take an event right now (full or closed) is
//!   dropped from the set instead of being retried.
//!
//! Membership changes and publish iteration for one task are serialized on
//! that task's map shard. Tasks on other shards are never blocked.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{EventEnvelope, TaskEvent};
use crate::record::JobId;

/// Default per-observer buffer for channel-backed observers.
pub const DEFAULT_OBSERVER_BUFFER: usize = 256;

/// Handle identifying one observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Why an event could not be handed to an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("observer buffer is full")]
    Full,
    #[error("observer is disconnected")]
    Closed,
}

/// Something that can receive pushed events, and can fail.
///
/// Implementations must not block: the hub calls `deliver` while holding the
/// task's membership lock.
pub trait Observer: Send + Sync {
    fn deliver(&self, envelope: &EventEnvelope) -> Result<(), DeliveryError>;
}

/// Observer backed by a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::Sender<EventEnvelope>,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::Sender<EventEnvelope>) -> Self {
        Self { sender }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl Observer for ChannelObserver {
    fn deliver(&self, envelope: &EventEnvelope) -> Result<(), DeliveryError> {
        self.sender.try_send(envelope.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

struct Registration {
    id: ObserverId,
    observer: Arc<dyn Observer>,
}

struct HubInner {
    subscriptions: DashMap<JobId, Vec<Registration>>,
    buffer: usize,
}

/// Process-wide registry of per-task observer sets.
///
/// Cloneable; clones share the same registry.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    /// Create a hub whose channel subscriptions buffer 256 events each.
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_OBSERVER_BUFFER)
    }

    /// Create a hub with the given per-observer buffer for [`EventHub::subscribe_channel`].
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscriptions: DashMap::new(),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Register `observer` for `job_id` and send it a `connected` acknowledgement.
    ///
    /// If the acknowledgement cannot be delivered the observer is not
    /// registered; the returned handle is then already inert.
    pub fn subscribe(&self, job_id: JobId, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId::new();
        let ack = EventEnvelope::new(TaskEvent::Connected { job_id });

        let mut observers = self.inner.subscriptions.entry(job_id).or_default();
        match observer.deliver(&ack) {
            Ok(()) => {
                observers.push(Registration { id, observer });
                debug!(job_id = %job_id, observer_id = %id, observers = observers.len(), "observer subscribed");
            }
            Err(e) => {
                warn!(job_id = %job_id, observer_id = %id, error = %e, "observer rejected connected ack");
            }
        }
        let now_empty = observers.is_empty();
        drop(observers);

        if now_empty {
            self.inner
                .subscriptions
                .remove_if(&job_id, |_, observers| observers.is_empty());
        }
        id
    }

    /// Subscribe with a fresh bounded channel and get a receiving handle.
    ///
    /// Dropping the returned [`Subscription`] unsubscribes it.
    pub fn subscribe_channel(&self, job_id: JobId) -> Subscription {
        let (observer, receiver) = ChannelObserver::channel(self.inner.buffer);
        let id = self.subscribe(job_id, Arc::new(observer));
        Subscription {
            hub: self.clone(),
            job_id,
            id,
            receiver,
        }
    }

    /// Remove an observer. Unknown or already-removed handles are ignored.
    pub fn unsubscribe(&self, job_id: JobId, observer_id: ObserverId) {
        let removed = match self.inner.subscriptions.get_mut(&job_id) {
            Some(mut observers) => {
                let before = observers.len();
                observers.retain(|r| r.id != observer_id);
                before != observers.len()
            }
            None => false,
        };

        self.inner
            .subscriptions
            .remove_if(&job_id, |_, observers| observers.is_empty());

        if removed {
            debug!(job_id = %job_id, observer_id = %observer_id, "observer unsubscribed");
        }
    }

    /// Deliver `event` to every observer currently registered for its task.
    ///
    /// Observers that fail delivery are removed. Returns how many observers
    /// received the event.
    pub fn publish(&self, event: TaskEvent) -> usize {
        let job_id = event.job_id();
        let Some(mut observers) = self.inner.subscriptions.get_mut(&job_id) else {
            return 0;
        };

        let envelope = EventEnvelope::new(event);
        let before = observers.len();
        observers.retain(|r| match r.observer.deliver(&envelope) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    job_id = %job_id,
                    observer_id = %r.id,
                    event = envelope.event_type(),
                    error = %e,
                    "dropping observer after failed delivery"
                );
                false
            }
        });
        let delivered = observers.len();
        drop(observers);

        if delivered < before {
            self.inner
                .subscriptions
                .remove_if(&job_id, |_, observers| observers.is_empty());
        }
        delivered
    }

    /// Number of observers registered for `job_id`.
    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.inner
            .subscriptions
            .get(&job_id)
            .map(|o| o.len())
            .unwrap_or(0)
    }

    /// Number of tasks with at least one observer.
    pub fn watched_jobs(&self) -> usize {
        self.inner.subscriptions.len()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("watched_jobs", &self.watched_jobs())
            .field("buffer", &self.inner.buffer)
            .finish()
    }
}

/// A channel-backed observer registration that unsubscribes on drop.
pub struct Subscription {
    hub: EventHub,
    job_id: JobId,
    id: ObserverId,
    receiver: mpsc::Receiver<EventEnvelope>,
}

impl Subscription {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the next event. `None` once the hub has dropped this observer.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.try_recv().ok()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("job_id", &self.job_id)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.job_id, self.id);
    }
}
