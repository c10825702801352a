//! The Modification Synchronizer: a barrier that holds the execution
//! loop back after each task completion until the planning agent has had
//! a chance to edit the live Orion, so a structural edit (new tasks, new
//! dependencies) is visible before the next round of ready-task discovery.
//!
//! Grounded on `orion_sync_observer.py`'s `wait_for_pending_modifications`
//! / `merge_and_sync_orion_states` in the original source: registers one
//! barrier per completed/failed task id, auto-releases it (as "not
//! applied") past a timeout so a slow or crashed agent can never wedge
//! the orchestrator, and merges the two copies of the Orion by keeping
//! whichever side's per-task status is more advanced.

use async_trait::async_trait;
use orion_common::metrics::MetricsCollector;
use orion_common::{Orion, TaskId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use orion_core::{EventObserver, OrionEvent, OrionEventKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct SyncStats {
    pub registered: u64,
    pub released: u64,
    pub timed_out: u64,
}

/// Holds the orchestrator's execution loop back between a task's
/// completion and the planning agent's corresponding structural edit.
pub struct ModificationSynchronizer {
    pending: Arc<Mutex<HashMap<TaskId, ()>>>,
    current_orion: Mutex<Option<Orion>>,
    modification_timeout: Duration,
    stats: Arc<Mutex<SyncStats>>,
}

impl ModificationSynchronizer {
    pub fn new(modification_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            current_orion: Mutex::new(None),
            modification_timeout,
            stats: Arc::new(Mutex::new(SyncStats::default())),
        })
    }

    pub fn stats(&self) -> SyncStats {
        *self.stats.lock()
    }

    /// Registers a barrier for `task_id`, auto-releasing it after
    /// `modification_timeout` if the agent never acknowledges it. A
    /// second registration for an id already pending is a no-op
    /// (matches the Python's idempotent dict-based registration).
    fn register(&self, task_id: TaskId) {
        let mut pending = self.pending.lock();
        if pending.contains_key(&task_id) {
            warn!(?task_id, "modification barrier already pending, ignoring");
            return;
        }
        pending.insert(task_id, ());
        self.stats.lock().registered += 1;
        drop(pending);

        let pending_handle = Arc::clone(&self.pending);
        let stats_handle = Arc::clone(&self.stats);
        let timeout = self.modification_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if pending_handle.lock().remove(&task_id).is_some() {
                stats_handle.lock().timed_out += 1;
                warn!(?task_id, "modification barrier timed out, releasing");
            }
        });
    }

    fn release(&self, task_id: &TaskId) {
        if self.pending.lock().remove(task_id).is_some() {
            self.stats.lock().released += 1;
        }
    }

    /// Waits until every currently-pending barrier has resolved. Loops
    /// because releasing one barrier (an `OrionModified` event) may race
    /// with a new one being registered, exactly as
    /// `wait_for_pending_modifications` does via its snapshot-then-recheck
    /// loop. Returns once the pending set has been empty for one full
    /// pass, or clears it and returns on overall timeout — a barrier
    /// timeout is logged and treated as non-fatal, never propagated as an
    /// error.
    pub async fn wait_for_pending_modifications(&self) {
        let started_at = tokio::time::Instant::now();
        let deadline = started_at + self.modification_timeout * 4;
        loop {
            let ids: Vec<TaskId> = self.pending.lock().keys().copied().collect();
            if ids.is_empty() {
                orion_common::metrics::DefaultMetricsCollector
                    .record_barrier_wait("released", started_at.elapsed().as_secs_f64());
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    pending = ids.len(),
                    "clearing stale modification barriers after overall timeout"
                );
                self.pending.lock().clear();
                orion_common::metrics::DefaultMetricsCollector
                    .record_barrier_wait("timed_out", started_at.elapsed().as_secs_f64());
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Merges the orchestrator's in-flight Orion with whatever the agent
    /// has structurally edited: the agent's copy (held in
    /// `current_orion`) is the structural base — it may contain newly
    /// added tasks/dependencies the orchestrator's copy doesn't know
    /// about yet — and per-task status/result/error/timestamps are taken
    /// from whichever side is strictly more advanced by
    /// `TaskStatus::level()`. Never regresses a task's status; idempotent
    /// when called twice with the same inputs.
    pub fn merge_and_sync_orion_states(&self, orchestrator_orion: &Orion) -> Orion {
        let base = self.current_orion.lock().clone();
        let mut merged = base.unwrap_or_else(|| orchestrator_orion.clone());

        for (task_id, orch_task) in &orchestrator_orion.tasks {
            match merged.tasks.get_mut(task_id) {
                Some(merged_task) => {
                    if orch_task.status.level() > merged_task.status.level() {
                        merged_task.status = orch_task.status;
                        merged_task.result = orch_task.result.clone();
                        merged_task.error = orch_task.error.clone();
                        merged_task.execution_start_time = orch_task.execution_start_time;
                        merged_task.execution_end_time = orch_task.execution_end_time;
                    }
                }
                None => {
                    merged.tasks.insert(*task_id, orch_task.clone());
                }
            }
        }

        merged.update_state();
        *self.current_orion.lock() = Some(merged.clone());
        merged
    }

    pub fn adopt(&self, orion: Orion) {
        *self.current_orion.lock() = Some(orion);
    }

    pub fn current(&self) -> Option<Orion> {
        self.current_orion.lock().clone()
    }
}

#[async_trait]
impl EventObserver for ModificationSynchronizer {
    async fn on_event(&self, event: &OrionEvent) {
        match event.kind {
            OrionEventKind::TaskCompleted | OrionEventKind::TaskFailed => {
                if let Some(task_id) = event.task_id {
                    self.register(task_id);
                }
            }
            OrionEventKind::OrionStarted
            | OrionEventKind::OrionCompleted
            | OrionEventKind::OrionFailed => {
                if let Some(orion_json) = event.data.get("orion") {
                    if let Ok(orion) = serde_json::from_value::<Orion>(orion_json.clone()) {
                        self.adopt(orion);
                    }
                }
            }
            OrionEventKind::OrionModified => {
                if let Some(ids) = event.data.get("on_task_id").and_then(|v| v.as_array()) {
                    for id in ids {
                        if let Some(task_id) = id.as_str().and_then(|s| s.parse().ok()) {
                            self.release(&task_id);
                        }
                    }
                }
                if let Some(new_orion) = event.data.get("new_orion") {
                    if let Ok(orion) = serde_json::from_value::<Orion>(new_orion.clone()) {
                        self.adopt(orion);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_release_unblocks_wait() {
        let sync = ModificationSynchronizer::new(Duration::from_secs(5));
        let task_id = TaskId::new_v4();
        sync.register(task_id);
        assert_eq!(sync.stats().registered, 1);
        sync.release(&task_id);
        sync.wait_for_pending_modifications().await;
        assert_eq!(sync.stats().released, 1);
    }

    #[tokio::test]
    async fn timeout_releases_without_agent() {
        let sync = ModificationSynchronizer::new(Duration::from_millis(20));
        let task_id = TaskId::new_v4();
        sync.register(task_id);
        tokio::time::sleep(Duration::from_millis(60)).await;
        sync.wait_for_pending_modifications().await;
        assert_eq!(sync.stats().timed_out, 1);
    }

    #[test]
    fn merge_never_regresses_status() {
        use orion_common::{TaskPriority, TaskStatus};
        let mut orion = Orion::new("merge-test");
        let mut task = orion_common::TaskStar::new("t", TaskPriority::Medium);
        task.status = TaskStatus::Completed;
        let task_id = task.task_id;
        orion.add_task(task);

        let sync_arc = ModificationSynchronizer::new(Duration::from_secs(1));
        let mut agent_copy = orion.clone();
        agent_copy.tasks.get_mut(&task_id).unwrap().status = TaskStatus::Pending;
        sync_arc.adopt(agent_copy);

        let merged = sync_arc.merge_and_sync_orion_states(&orion);
        assert_eq!(merged.tasks.get(&task_id).unwrap().status, TaskStatus::Completed);
    }

    use proptest::prelude::*;
    proptest::proptest! {
        /// Testable property 5: merging twice with the same orchestrator
        /// snapshot is idempotent — a repeated merge call must never move
        /// a task's status.
        #[test]
        fn merge_is_idempotent_under_repeated_calls(
            status_idx in 0usize..5,
        ) {
            use orion_common::{TaskPriority, TaskStatus};

            let statuses = [
                TaskStatus::Pending,
                TaskStatus::Running,
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
            ];
            let mut orion = Orion::new("merge-prop");
            let mut task = orion_common::TaskStar::new("t", TaskPriority::Medium);
            task.status = statuses[status_idx];
            let task_id = task.task_id;
            orion.add_task(task);

            let sync_arc = ModificationSynchronizer::new(Duration::from_secs(1));
            let first = sync_arc.merge_and_sync_orion_states(&orion);
            let second = sync_arc.merge_and_sync_orion_states(&orion);
            prop_assert_eq!(
                first.tasks.get(&task_id).unwrap().status,
                second.tasks.get(&task_id).unwrap().status
            );
        }
    }
}
