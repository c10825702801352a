#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! The Orion execution engine: the DAG algorithms, the Modification
//! Synchronizer barrier, the built-in device assignment strategies, and
//! the `Orchestrator` itself that drives one Orion from `Created` to a
//! terminal state.

pub mod assignment;
pub mod dag;
pub mod sync;

use orion_common::{
    DeviceId, DeviceTaskOutcome, Error, Metadata, Orion, OrionId, OrionStatistics, Result, TaskId,
    TaskStatus,
};
use orion_core::{DeviceManager, EventBus, OrionEvent, OrionEventKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use sync::ModificationSynchronizer;

/// Configuration the orchestrator reads per run; the config crate's
/// `OrchestratorConfig` converts into this via `From`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrent_tasks: usize,
    pub task_timeout: Duration,
    pub critical_task_timeout: Duration,
    pub max_dag_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 100,
            task_timeout: Duration::from_secs(60),
            critical_task_timeout: Duration::from_secs(300),
            max_dag_depth: 32,
        }
    }
}

/// How devices are resolved for each task before execution starts.
#[derive(Clone)]
pub enum AssignmentPlan {
    /// An explicit task -> device map, used verbatim.
    Manual(HashMap<TaskId, DeviceId>),
    /// One of the built-in named strategies (§7 `AssignmentStrategyError`
    /// on an unrecognized name), applied over the connected device set.
    Named(String),
    /// Use whatever `target_device_id` each `TaskStar` already carries;
    /// any task missing one (or pointing at a disconnected device)
    /// surfaces as `UnassignedTask`.
    PreAssigned,
}

/// Outcome of one `orchestrate` call, replacing the source's ad-hoc
/// dict-typed result with a typed enum.
#[derive(Debug, Clone)]
pub enum OrchestrationSummary {
    Completed {
        statistics: OrionStatistics,
    },
    PartiallyFailed {
        statistics: OrionStatistics,
        failed_task_ids: Vec<TaskId>,
    },
    Failed {
        error: String,
    },
    Cancelled {
        statistics: OrionStatistics,
    },
}

/// A worker's report of how its dispatched task ended, fed back into the
/// execution loop's local `Orion` copy.
struct TaskOutcomeMsg {
    task_id: TaskId,
    success: bool,
    result: Option<serde_json::Value>,
    error: Option<String>,
}

#[derive(Default)]
struct CancellationState {
    flags: Mutex<std::collections::HashSet<OrionId>>,
}

impl CancellationState {
    fn request(&self, orion_id: OrionId) {
        self.flags.lock().insert(orion_id);
    }

    fn is_cancelled(&self, orion_id: &OrionId) -> bool {
        self.flags.lock().contains(orion_id)
    }

    fn clear(&self, orion_id: &OrionId) {
        self.flags.lock().remove(orion_id);
    }
}

/// Drives one Orion from `Created` through to a terminal
/// [`OrchestrationSummary`], dispatching ready tasks to devices through a
/// `DeviceManager` and, if installed, pausing after each task completion
/// for the [`ModificationSynchronizer`]'s barrier.
pub struct Orchestrator<D: DeviceManager + 'static> {
    device_manager: Arc<D>,
    event_bus: Arc<EventBus>,
    synchronizer: Option<Arc<ModificationSynchronizer>>,
    execution_tasks: Mutex<HashMap<TaskId, JoinHandle<()>>>,
    cancellation: CancellationState,
    running: AtomicBool,
    config: EngineConfig,
    current_orion_id: Mutex<Option<OrionId>>,
    metrics: Arc<dyn orion_common::metrics::MetricsCollector>,
}

impl<D: DeviceManager + 'static> Orchestrator<D> {
    pub fn new(
        device_manager: Arc<D>,
        event_bus: Arc<EventBus>,
        synchronizer: Option<Arc<ModificationSynchronizer>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            device_manager,
            event_bus,
            synchronizer,
            execution_tasks: Mutex::new(HashMap::new()),
            cancellation: CancellationState::default(),
            running: AtomicBool::new(false),
            config,
            current_orion_id: Mutex::new(None),
            metrics: Arc::new(orion_common::metrics::DefaultMetricsCollector),
        }
    }

    /// Runs one Orion to completion. Implements the five-step protocol:
    /// validate, resolve assignments, publish `OrionStarted`, run the
    /// execution loop, publish the terminal event and always clean up
    /// in-flight workers.
    #[instrument(skip(self, orion, plan))]
    pub async fn orchestrate(
        &self,
        mut orion: Orion,
        plan: AssignmentPlan,
        metadata: Metadata,
    ) -> Result<OrchestrationSummary> {
        dag::validate(&orion, self.config.max_dag_depth)?;

        let connected = self.device_manager.get_all_devices(true).await;
        let assignments = self.resolve_assignments(&orion, &plan, &connected, &HashMap::new())?;
        for (task_id, device_id) in &assignments {
            if let Some(task) = orion.tasks.get_mut(task_id) {
                task.target_device_id = Some(device_id.clone());
            }
        }

        orion.start_execution();
        self.cancellation.clear(&orion.orion_id);
        self.running.store(true, Ordering::SeqCst);
        *self.current_orion_id.lock() = Some(orion.orion_id);

        let mut start_data = Metadata::new();
        start_data.insert(
            "orion".to_string(),
            serde_json::to_value(&orion).unwrap_or_default(),
        );
        self.event_bus
            .publish(
                OrionEvent::new(OrionEventKind::OrionStarted, "orchestrator")
                    .with_orion_id(orion.orion_id)
                    .with_data(start_data),
            )
            .await;

        let result = self.run_execution_loop(orion, plan, metadata).await;

        self.cancel_execution(&result.0.orion_id).await;
        self.cancellation.clear(&result.0.orion_id);
        self.running.store(false, Ordering::SeqCst);
        self.current_orion_id.lock().take();

        let (final_orion, summary) = result;
        let kind = match &summary {
            OrchestrationSummary::Completed { .. } => OrionEventKind::OrionCompleted,
            OrchestrationSummary::PartiallyFailed { .. } | OrchestrationSummary::Failed { .. } => {
                OrionEventKind::OrionFailed
            }
            OrchestrationSummary::Cancelled { .. } => OrionEventKind::OrionCompleted,
        };
        let mut end_data = Metadata::new();
        end_data.insert(
            "orion".to_string(),
            serde_json::to_value(&final_orion).unwrap_or_default(),
        );
        self.event_bus
            .publish(
                OrionEvent::new(kind, "orchestrator")
                    .with_orion_id(final_orion.orion_id)
                    .with_data(end_data),
            )
            .await;

        Ok(summary)
    }

    fn resolve_assignments(
        &self,
        orion: &Orion,
        plan: &AssignmentPlan,
        connected: &HashMap<DeviceId, orion_common::DeviceProfile>,
        preferences: &HashMap<TaskId, DeviceId>,
    ) -> Result<HashMap<TaskId, DeviceId>> {
        match plan {
            AssignmentPlan::Manual(map) => Ok(map.clone()),
            AssignmentPlan::Named(name) => {
                let strategy = assignment::by_name(name)?;
                strategy.assign(orion, connected, preferences)
            }
            AssignmentPlan::PreAssigned => {
                let mut assignments = HashMap::new();
                for task in orion.tasks.values() {
                    match &task.target_device_id {
                        Some(device_id) if connected.contains_key(device_id) => {
                            assignments.insert(task.task_id, device_id.clone());
                        }
                        _ => {
                            return Err(Error::UnassignedTask(format!(
                                "task {} has no connected target device",
                                task.task_id
                            )))
                        }
                    }
                }
                Ok(assignments)
            }
        }
    }

    /// The core loop: wait for any pending modification barrier, merge in
    /// the agent's structural edits, spawn workers for newly-ready tasks,
    /// apply worker outcomes as they arrive, and reap completed workers,
    /// until the Orion reaches a terminal state or cancellation is
    /// requested.
    async fn run_execution_loop(
        &self,
        mut orion: Orion,
        plan: AssignmentPlan,
        metadata: Metadata,
    ) -> (Orion, OrchestrationSummary) {
        let (outcome_tx, mut outcome_rx) = tokio::sync::mpsc::unbounded_channel::<TaskOutcomeMsg>();

        loop {
            if self.cancellation.is_cancelled(&orion.orion_id) {
                orion.state = orion_common::OrionState::Cancelled;
                return (
                    orion.clone(),
                    OrchestrationSummary::Cancelled {
                        statistics: orion.get_statistics(),
                    },
                );
            }

            while let Ok(outcome) = outcome_rx.try_recv() {
                orion.mark_task_completed(outcome.task_id, outcome.success, outcome.result, outcome.error);
            }

            if let Some(sync) = &self.synchronizer {
                sync.wait_for_pending_modifications().await;
                orion = sync.merge_and_sync_orion_states(&orion);
            }

            if orion.is_complete() {
                return self.finalize(orion);
            }

            // An agent edit may have added tasks the initial assignment
            // pass never saw; give those a device before they can go ready.
            let needs_assignment = orion.tasks.values().any(|t| {
                t.target_device_id.is_none()
                    && !matches!(t.status, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
            });
            if needs_assignment {
                let connected = self.device_manager.get_all_devices(true).await;
                let preferences: HashMap<TaskId, DeviceId> = orion
                    .tasks
                    .iter()
                    .filter_map(|(id, t)| t.target_device_id.clone().map(|d| (*id, d)))
                    .collect();
                match self.resolve_assignments(&orion, &plan, &connected, &preferences) {
                    Ok(assignments) => {
                        for (task_id, device_id) in assignments {
                            if let Some(task) = orion.tasks.get_mut(&task_id) {
                                if task.target_device_id.is_none() {
                                    task.target_device_id = Some(device_id);
                                }
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to assign devices for newly added tasks"),
                }
            }

            let ready = orion.get_ready_tasks();
            {
                let mut scheduled = self.execution_tasks.lock();
                for task_id in ready {
                    if scheduled.contains_key(&task_id) {
                        continue;
                    }
                    let Some(task) = orion.tasks.get(&task_id) else {
                        continue;
                    };
                    let Some(device_id) = task.target_device_id.clone() else {
                        continue;
                    };
                    let timeout =
                        task.effective_timeout(self.config.task_timeout, self.config.critical_task_timeout);
                    let priority = task.priority;
                    let handle = self.spawn_worker(
                        orion.orion_id,
                        task_id,
                        device_id,
                        priority,
                        timeout,
                        metadata.clone(),
                        outcome_tx.clone(),
                    );
                    scheduled.insert(task_id, handle);
                }
            }

            self.metrics.set_active_tasks(
                &format!("{:?}", orion.state),
                self.execution_tasks.lock().len() as f64,
            );

            if self.execution_tasks.lock().is_empty() {
                if orion.is_complete() {
                    return self.finalize(orion);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }

            tokio::select! {
                msg = outcome_rx.recv() => {
                    if let Some(outcome) = msg {
                        orion.mark_task_completed(outcome.task_id, outcome.success, outcome.result, outcome.error);
                    }
                }
                () = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
            self.reap_finished_workers();
        }
    }

    fn finalize(&self, orion: Orion) -> (Orion, OrchestrationSummary) {
        let statistics = orion.get_statistics();
        let summary = match orion.state {
            orion_common::OrionState::Completed => OrchestrationSummary::Completed { statistics },
            orion_common::OrionState::PartiallyFailed => OrchestrationSummary::PartiallyFailed {
                statistics,
                failed_task_ids: orion.get_failed_tasks(),
            },
            orion_common::OrionState::Failed => OrchestrationSummary::Failed {
                error: "all tasks failed".to_string(),
            },
            orion_common::OrionState::Cancelled => OrchestrationSummary::Cancelled { statistics },
            _ => OrchestrationSummary::Completed { statistics },
        };
        (orion, summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_worker(
        &self,
        orion_id: OrionId,
        task_id: TaskId,
        device_id: DeviceId,
        priority: orion_common::TaskPriority,
        timeout: Duration,
        metadata: Metadata,
        outcome_tx: tokio::sync::mpsc::UnboundedSender<TaskOutcomeMsg>,
    ) -> JoinHandle<()> {
        let device_manager = Arc::clone(&self.device_manager);
        let event_bus = Arc::clone(&self.event_bus);
        let metrics = Arc::clone(&self.metrics);
        let priority_label = format!("{priority:?}");

        tokio::spawn(async move {
            event_bus
                .publish(
                    OrionEvent::new(OrionEventKind::TaskStarted, "orchestrator")
                        .with_orion_id(orion_id)
                        .with_task_id(task_id),
                )
                .await;

            let started_at = tokio::time::Instant::now();
            let outcome = device_manager
                .assign_task_to_device(task_id, &device_id, metadata, timeout)
                .await;
            let elapsed = started_at.elapsed().as_secs_f64();

            match outcome {
                Ok(DeviceTaskOutcome {
                    status: TaskStatus::Completed,
                    result,
                    ..
                }) => {
                    metrics.record_task_dispatch("completed", &priority_label, elapsed);
                    let mut data = Metadata::new();
                    if let Some(r) = result.clone() {
                        data.insert("result".to_string(), r);
                    }
                    event_bus
                        .publish(
                            OrionEvent::new(OrionEventKind::TaskCompleted, "orchestrator")
                                .with_orion_id(orion_id)
                                .with_task_id(task_id)
                                .with_data(data),
                        )
                        .await;
                    let _ = outcome_tx.send(TaskOutcomeMsg {
                        task_id,
                        success: true,
                        result,
                        error: None,
                    });
                }
                Ok(DeviceTaskOutcome {
                    status: TaskStatus::Cancelled,
                    ..
                }) => {
                    metrics.record_task_dispatch("cancelled", &priority_label, elapsed);
                    info!(%task_id, "task cancelled externally");
                }
                Ok(outcome) => {
                    metrics.record_task_dispatch("failed", &priority_label, elapsed);
                    let mut data = Metadata::new();
                    if let Some(e) = &outcome.error {
                        data.insert(
                            "error".to_string(),
                            serde_json::Value::String(e.clone()),
                        );
                    }
                    event_bus
                        .publish(
                            OrionEvent::new(OrionEventKind::TaskFailed, "orchestrator")
                                .with_orion_id(orion_id)
                                .with_task_id(task_id)
                                .with_data(data),
                        )
                        .await;
                    let _ = outcome_tx.send(TaskOutcomeMsg {
                        task_id,
                        success: false,
                        result: None,
                        error: outcome.error,
                    });
                }
                Err(e) => {
                    metrics.record_error("device_dispatch", "warning");
                    warn!(%task_id, error = %e, "device dispatch failed");
                    let error_string = e.to_string();
                    let mut data = Metadata::new();
                    data.insert(
                        "error".to_string(),
                        serde_json::Value::String(error_string.clone()),
                    );
                    event_bus
                        .publish(
                            OrionEvent::new(OrionEventKind::TaskFailed, "orchestrator")
                                .with_orion_id(orion_id)
                                .with_task_id(task_id)
                                .with_data(data),
                        )
                        .await;
                    let _ = outcome_tx.send(TaskOutcomeMsg {
                        task_id,
                        success: false,
                        result: None,
                        error: Some(error_string),
                    });
                }
            }
        })
    }

    fn reap_finished_workers(&self) {
        let mut scheduled = self.execution_tasks.lock();
        scheduled.retain(|_, handle| !handle.is_finished());
    }

    /// Requests cancellation of a running Orion and aborts every
    /// currently-scheduled worker, ignoring `JoinError::is_cancelled()`
    /// the way `asyncio.gather(..., return_exceptions=True)` swallows
    /// `CancelledError`.
    pub async fn cancel_execution(&self, orion_id: &OrionId) {
        self.cancellation.request(*orion_id);
        let handles: Vec<JoinHandle<()>> = {
            let mut scheduled = self.execution_tasks.lock();
            scheduled.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "worker task ended with a non-cancellation error");
                }
            }
        }
    }

    pub fn request_cancellation(&self, orion_id: OrionId) {
        self.cancellation.request(orion_id);
    }

    /// Cancels whichever Orion this orchestrator currently has in
    /// flight, for callers (the owning `Session`) that don't track the
    /// id themselves. A no-op if nothing is running.
    pub async fn cancel_current(&self) {
        let orion_id = *self.current_orion_id.lock();
        if let Some(orion_id) = orion_id {
            self.cancel_execution(&orion_id).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use orion_common::{DeviceProfile, TaskPriority, TaskStar};

    struct StubDeviceManager {
        devices: DashMap<DeviceId, DeviceProfile>,
        outcome: TaskStatus,
    }

    impl StubDeviceManager {
        fn new(outcome: TaskStatus) -> Self {
            let devices = DashMap::new();
            devices.insert(
                "dev-1".to_string(),
                DeviceProfile {
                    device_id: "dev-1".to_string(),
                    server_url: String::new(),
                    os: "linux".to_string(),
                    device_type: None,
                    capabilities: vec![],
                    metadata: Metadata::new(),
                    status: orion_common::DeviceStatus::Connected,
                    last_heartbeat: None,
                    connection_attempts: 0,
                    max_retries: 3,
                },
            );
            Self { devices, outcome }
        }
    }

    #[async_trait]
    impl DeviceManager for StubDeviceManager {
        async fn get_connected_devices(&self) -> Vec<DeviceId> {
            self.devices.iter().map(|e| e.key().clone()).collect()
        }

        async fn get_all_devices(&self, _connected_only: bool) -> HashMap<DeviceId, DeviceProfile> {
            self.devices
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect()
        }

        async fn assign_task_to_device(
            &self,
            _task_id: TaskId,
            device_id: &DeviceId,
            _payload: Metadata,
            _timeout: Duration,
        ) -> Result<DeviceTaskOutcome> {
            Ok(DeviceTaskOutcome {
                status: self.outcome,
                result: Some(serde_json::json!({"ok": true})),
                error: None,
                device_id: device_id.clone(),
            })
        }

        async fn register_device(
            &self,
            _device_id: DeviceId,
            _url: String,
            _os: String,
            _capabilities: Vec<String>,
            _metadata: Metadata,
        ) -> Result<bool> {
            Ok(true)
        }

        async fn disconnect_device(&self, _device_id: &DeviceId) -> Result<bool> {
            Ok(true)
        }
    }

    fn linear_orion() -> Orion {
        let mut orion = Orion::new("linear");
        let a = TaskStar::new("a", TaskPriority::Medium);
        let b = TaskStar::new("b", TaskPriority::Medium);
        let (a_id, b_id) = (a.task_id, b.task_id);
        orion.add_task(a);
        orion.add_task(b);
        orion
            .add_dependency(orion_common::TaskStarLine {
                from_task_id: a_id,
                to_task_id: b_id,
                dependency_type: orion_common::DependencyType::Unconditional,
            })
            .unwrap();
        orion
    }

    #[tokio::test]
    async fn linear_chain_completes() {
        let device_manager = Arc::new(StubDeviceManager::new(TaskStatus::Completed));
        let event_bus = Arc::new(EventBus::new());
        let orchestrator = Orchestrator::new(device_manager, event_bus, None, EngineConfig::default());

        let summary = orchestrator
            .orchestrate(
                linear_orion(),
                AssignmentPlan::Named("round_robin".to_string()),
                Metadata::new(),
            )
            .await
            .unwrap();

        assert!(matches!(summary, OrchestrationSummary::Completed { .. }));
    }

    #[tokio::test]
    async fn chain_with_all_failures_reaches_failed() {
        let device_manager = Arc::new(StubDeviceManager::new(TaskStatus::Failed));
        let event_bus = Arc::new(EventBus::new());
        let orchestrator = Orchestrator::new(device_manager, event_bus, None, EngineConfig::default());

        let summary = orchestrator
            .orchestrate(
                linear_orion(),
                AssignmentPlan::Named("round_robin".to_string()),
                Metadata::new(),
            )
            .await
            .unwrap();

        assert!(matches!(summary, OrchestrationSummary::Failed { .. }));
    }

    struct SelectiveDeviceManager {
        devices: DashMap<DeviceId, DeviceProfile>,
        failing: std::collections::HashSet<TaskId>,
        delay: Duration,
    }

    impl SelectiveDeviceManager {
        fn new(failing: std::collections::HashSet<TaskId>, delay: Duration) -> Self {
            let devices = DashMap::new();
            devices.insert(
                "dev-1".to_string(),
                DeviceProfile {
                    device_id: "dev-1".to_string(),
                    server_url: String::new(),
                    os: "linux".to_string(),
                    device_type: None,
                    capabilities: vec![],
                    metadata: Metadata::new(),
                    status: orion_common::DeviceStatus::Connected,
                    last_heartbeat: None,
                    connection_attempts: 0,
                    max_retries: 3,
                },
            );
            Self { devices, failing, delay }
        }
    }

    #[async_trait]
    impl DeviceManager for SelectiveDeviceManager {
        async fn get_connected_devices(&self) -> Vec<DeviceId> {
            self.devices.iter().map(|e| e.key().clone()).collect()
        }

        async fn get_all_devices(&self, _connected_only: bool) -> HashMap<DeviceId, DeviceProfile> {
            self.devices.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
        }

        async fn assign_task_to_device(
            &self,
            task_id: TaskId,
            device_id: &DeviceId,
            _payload: Metadata,
            _timeout: Duration,
        ) -> Result<DeviceTaskOutcome> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let status = if self.failing.contains(&task_id) {
                TaskStatus::Failed
            } else {
                TaskStatus::Completed
            };
            Ok(DeviceTaskOutcome {
                status,
                result: Some(serde_json::json!({"ok": true})),
                error: None,
                device_id: device_id.clone(),
            })
        }

        async fn register_device(
            &self,
            _device_id: DeviceId,
            _url: String,
            _os: String,
            _capabilities: Vec<String>,
            _metadata: Metadata,
        ) -> Result<bool> {
            Ok(true)
        }

        async fn disconnect_device(&self, _device_id: &DeviceId) -> Result<bool> {
            Ok(true)
        }
    }

    /// `root` feeds both `a` and `b`; `join` waits on both via
    /// `SUCCESS_ONLY` edges. With `a` scripted to fail, `join`'s edge from
    /// `a` can never be satisfied (`SUCCESS_ONLY` requires `Completed`),
    /// so `join` is permanently unreachable and the Orion must still
    /// settle on `PartiallyFailed` rather than hang waiting on it.
    fn diamond_orion() -> (Orion, TaskId) {
        let mut orion = Orion::new("diamond");
        let root = TaskStar::new("root", TaskPriority::Medium);
        let a = TaskStar::new("a", TaskPriority::Medium);
        let b = TaskStar::new("b", TaskPriority::Medium);
        let join = TaskStar::new("join", TaskPriority::Medium);
        let (root_id, a_id, b_id, join_id) = (root.task_id, a.task_id, b.task_id, join.task_id);
        orion.add_task(root);
        orion.add_task(a);
        orion.add_task(b);
        orion.add_task(join);
        for (from, to) in [(root_id, a_id), (root_id, b_id), (a_id, join_id), (b_id, join_id)] {
            orion
                .add_dependency(orion_common::TaskStarLine {
                    from_task_id: from,
                    to_task_id: to,
                    dependency_type: orion_common::DependencyType::SuccessOnly,
                })
                .unwrap();
        }
        (orion, a_id)
    }

    #[tokio::test]
    async fn diamond_with_one_failure_reaches_partially_failed() {
        let (orion, failing_task) = diamond_orion();
        let mut failing = std::collections::HashSet::new();
        failing.insert(failing_task);
        let device_manager = Arc::new(SelectiveDeviceManager::new(failing, Duration::from_secs(0)));
        let event_bus = Arc::new(EventBus::new());
        let orchestrator = Orchestrator::new(device_manager, event_bus, None, EngineConfig::default());

        let summary = orchestrator
            .orchestrate(orion, AssignmentPlan::Named("round_robin".to_string()), Metadata::new())
            .await
            .unwrap();

        match summary {
            OrchestrationSummary::PartiallyFailed { failed_task_ids, statistics } => {
                assert_eq!(failed_task_ids, vec![failing_task]);
                assert_eq!(statistics.completed, 2);
                assert_eq!(statistics.failed, 1);
                assert_eq!(statistics.pending + statistics.waiting_dependency, 1);
            }
            other => panic!("expected PartiallyFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_mid_flight_reaches_cancelled() {
        let device_manager = Arc::new(SelectiveDeviceManager::new(
            std::collections::HashSet::new(),
            Duration::from_millis(200),
        ));
        let event_bus = Arc::new(EventBus::new());
        let orchestrator = Arc::new(Orchestrator::new(device_manager, event_bus, None, EngineConfig::default()));

        let run_orchestrator = orchestrator.clone();
        let handle = tokio::spawn(async move {
            run_orchestrator
                .orchestrate(linear_orion(), AssignmentPlan::Named("round_robin".to_string()), Metadata::new())
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        orchestrator.cancel_current().await;

        let summary = handle.await.unwrap();
        assert!(matches!(summary, OrchestrationSummary::Cancelled { .. }));
    }

    #[tokio::test]
    async fn barrier_timeout_still_reaches_completed() {
        let device_manager = Arc::new(StubDeviceManager::new(TaskStatus::Completed));
        let event_bus = Arc::new(EventBus::new());
        let synchronizer = sync::ModificationSynchronizer::new(Duration::from_millis(10));
        event_bus.subscribe(synchronizer.clone());
        let orchestrator =
            Orchestrator::new(device_manager, event_bus, Some(synchronizer), EngineConfig::default());

        let summary = orchestrator
            .orchestrate(linear_orion(), AssignmentPlan::Named("round_robin".to_string()), Metadata::new())
            .await
            .unwrap();

        assert!(matches!(summary, OrchestrationSummary::Completed { .. }));
    }

    #[tokio::test]
    async fn event_ordering_brackets_task_events_within_orion_lifecycle() {
        use orion_core::{EventObserver, OrionEvent, OrionEventKind};

        struct RecordingObserver(Mutex<Vec<OrionEventKind>>);
        #[async_trait]
        impl EventObserver for RecordingObserver {
            async fn on_event(&self, event: &OrionEvent) {
                self.0.lock().push(event.kind);
            }
        }

        let device_manager = Arc::new(StubDeviceManager::new(TaskStatus::Completed));
        let event_bus = Arc::new(EventBus::new());
        let recorder = Arc::new(RecordingObserver(Mutex::new(Vec::new())));
        event_bus.subscribe(recorder.clone());
        let orchestrator = Orchestrator::new(device_manager, event_bus, None, EngineConfig::default());

        orchestrator
            .orchestrate(linear_orion(), AssignmentPlan::Named("round_robin".to_string()), Metadata::new())
            .await
            .unwrap();

        let events = recorder.0.lock().clone();
        let start = events.iter().position(|k| *k == OrionEventKind::OrionStarted).unwrap();
        let end = events.iter().position(|k| *k == OrionEventKind::OrionCompleted).unwrap();
        assert!(start < end);
        for (i, kind) in events.iter().enumerate() {
            if matches!(kind, OrionEventKind::TaskStarted | OrionEventKind::TaskCompleted) {
                assert!(i > start && i < end, "task event at {i} fell outside the orion lifecycle brackets");
            }
        }
    }
}
