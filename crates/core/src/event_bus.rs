//! The process-local event bus that ties the Orchestrator, the
//! Modification Synchronizer, and the Planning Agent together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use orion_common::{Metadata, OrionId, TaskId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The closed set of event kinds the core emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrionEventKind {
    OrionStarted,
    OrionCompleted,
    OrionFailed,
    OrionModified,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    DeviceConnected,
    DeviceDisconnected,
    DeviceStatusChanged,
}

/// One event delivered to every subscribed observer.
#[derive(Debug, Clone)]
pub struct OrionEvent {
    pub kind: OrionEventKind,
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Metadata,
    pub orion_id: Option<OrionId>,
    pub task_id: Option<TaskId>,
}

impl OrionEvent {
    pub fn new(kind: OrionEventKind, source_id: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            timestamp: Utc::now(),
            data: Metadata::new(),
            orion_id: None,
            task_id: None,
        }
    }

    pub fn with_orion_id(mut self, orion_id: OrionId) -> Self {
        self.orion_id = Some(orion_id);
        self
    }

    pub fn with_task_id(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_data(mut self, data: Metadata) -> Self {
        self.data = data;
        self
    }
}

/// An observer subscribed to the event bus. Handlers may suspend; the
/// bus awaits a given observer's handler to completion before delivering
/// that observer's next event, but runs distinct observers concurrently.
#[async_trait]
pub trait EventObserver: Send + Sync {
    async fn on_event(&self, event: &OrionEvent);
}

type ObserverId = u64;

/// Publish/subscribe bus with the ordering guarantees required by the
/// orchestration loop: per-publisher in-order delivery, per-observer
/// sequential delivery, cross-observer concurrency.
pub struct EventBus {
    observers: RwLock<Vec<(ObserverId, Arc<dyn EventObserver>)>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Subscribes an observer, returning a handle usable with
    /// [`EventBus::unsubscribe`].
    pub fn subscribe(&self, observer: Arc<dyn EventObserver>) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers.write().push((id, observer));
        id
    }

    /// Removes an observer. Safe to call while a delivery to that
    /// observer is in flight: the in-flight call holds its own `Arc`
    /// clone from a snapshot taken before dispatch, so it runs to
    /// completion unaffected.
    pub fn unsubscribe(&self, id: ObserverId) {
        self.observers.write().retain(|(oid, _)| *oid != id);
    }

    /// Delivers `event` to every currently-subscribed observer
    /// concurrently, returning once all have finished. Because callers
    /// await this before publishing their next event, this is what
    /// gives per-publisher, in-order delivery without a dedicated actor
    /// loop.
    pub async fn publish(&self, event: OrionEvent) {
        let snapshot: Vec<Arc<dyn EventObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        let event = &event;
        join_all(snapshot.iter().map(|o| o.on_event(event))).await;
    }
}
