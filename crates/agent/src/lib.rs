#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! The Planning Agent: a finite state machine { START, MONITOR, FINISH,
//! FAIL } that drives one request to a terminal outcome, grounded on
//! `orion_agent_states.py`'s `StartOrionAgentState` / `MonitorOrionAgentState`
//! / `FinishOrionAgentState` / `FailOrionAgentState` and the round loop in
//! `network_session.py::NetworkRound.run`.
//!
//! The four Python state classes collapse here into one closed enum
//! matched over in [`PlanningAgent::run_round`] — a state pattern over a
//! fixed, small variant set reads more idiomatically in Rust as a match
//! than as boxed trait objects, and it avoids an allocation per
//! transition.

pub mod scripted;

use async_trait::async_trait;
use orion_common::{DeviceProfile, Error, Metadata, Orion, Result};
use orion_core::{
    DeviceManager, EditScript, EventBus, EventObserver, OracleVerdict, OrionEvent, OrionEventKind,
    PlanningOracle,
};
use orion_orchestrator_engine::sync::ModificationSynchronizer;
use orion_orchestrator_engine::{AssignmentPlan, Orchestrator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// The four states of the planning agent's round loop.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AgentState {
    Start,
    Monitor,
    Finish,
    Fail(FailReason),
}

/// Why the round escalated to FAIL, carried on the transition itself so
/// `run_round`'s `Fail` arm doesn't need to fabricate a generic message.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FailReason(String);

/// Tunables read by the agent: per-task timeout defaults (by priority)
/// and the `MAX_STEP` cap that guarantees the round terminates even if
/// the oracle never signals `DONE`.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_step: u32,
    pub task_timeout: Duration,
    pub critical_task_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_step: 50,
            task_timeout: Duration::from_mins(1),
            critical_task_timeout: Duration::from_mins(5),
        }
    }
}

/// How one round of the agent's state machine ended.
#[derive(Clone)]
pub enum RoundOutcome {
    /// The oracle judged the request satisfied; carries the final Orion.
    Finished { orion: Orion },
    /// The round escalated to FAIL: an oracle error, a `MAX_STEP`
    /// overrun, or the event queue closing unexpectedly.
    Failed { orion: Option<Orion>, reason: String },
}

impl std::fmt::Debug for RoundOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundOutcome::Finished { orion } => {
                write!(f, "Finished(orion_id={}, state={:?})", orion.orion_id, orion.state)
            }
            RoundOutcome::Failed { orion, reason } => write!(
                f,
                "Failed(orion_id={:?}, reason={reason})",
                orion.as_ref().map(|o| o.orion_id)
            ),
        }
    }
}

/// Bridges `EventBus` deliveries into the agent's single-consumer
/// task-completion queue, the Rust analogue of the Python session's
/// `OrionProgressObserver`. Forwards only the events MONITOR acts on.
struct AgentProgressObserver {
    tx: mpsc::UnboundedSender<OrionEvent>,
}

#[async_trait]
impl EventObserver for AgentProgressObserver {
    async fn on_event(&self, event: &OrionEvent) {
        if matches!(
            event.kind,
            OrionEventKind::TaskCompleted | OrionEventKind::TaskFailed | OrionEventKind::OrionCompleted
        ) {
            let _ = self.tx.send(event.clone());
        }
    }
}

/// The finite-state controller that calls the oracle to produce and
/// edit Orions, and owns the background orchestration task for the
/// round currently in flight.
pub struct PlanningAgent<D: DeviceManager + 'static> {
    oracle: Arc<dyn PlanningOracle>,
    orchestrator: Arc<Orchestrator<D>>,
    synchronizer: Arc<ModificationSynchronizer>,
    event_bus: Arc<EventBus>,
    config: AgentConfig,
    queue: Mutex<mpsc::UnboundedReceiver<OrionEvent>>,
    observer: Arc<AgentProgressObserver>,
    force_stop_reason: parking_lot::Mutex<Option<String>>,
    force_stop_notify: tokio::sync::Notify,
}

impl<D: DeviceManager + 'static> PlanningAgent<D> {
    pub fn new(
        oracle: Arc<dyn PlanningOracle>,
        orchestrator: Arc<Orchestrator<D>>,
        synchronizer: Arc<ModificationSynchronizer>,
        event_bus: Arc<EventBus>,
        config: AgentConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            oracle,
            orchestrator,
            synchronizer,
            event_bus,
            config,
            queue: Mutex::new(rx),
            observer: Arc::new(AgentProgressObserver { tx }),
            force_stop_reason: parking_lot::Mutex::new(None),
            force_stop_notify: tokio::sync::Notify::new(),
        }
    }

    /// The observer the owning session must subscribe to the shared
    /// event bus before calling [`PlanningAgent::run_round`].
    pub fn progress_observer(&self) -> Arc<dyn EventObserver> {
        self.observer.clone()
    }

    /// Forces the round currently in flight to escalate to FAIL the next
    /// time MONITOR looks at its queue, waking it immediately if it's
    /// already blocked awaiting an event — the Rust analogue of
    /// `NetworkRound.force_finish`.
    pub fn force_stop(&self, reason: impl Into<String>) {
        *self.force_stop_reason.lock() = Some(reason.into());
        self.force_stop_notify.notify_waiters();
    }

    /// Clears a pending force-stop. A force-stop persists across round
    /// boundaries until this is called, so an owner that wants a fresh
    /// round after stopping one must call this first.
    pub fn reset(&self) {
        *self.force_stop_reason.lock() = None;
    }

    /// Drives START → MONITOR → (FINISH | FAIL), looping back to START
    /// when the oracle reports the request isn't satisfied yet. Returns
    /// once the agent reaches a terminal state; never loops forever,
    /// guaranteed by the `max_step` cap on total MONITOR iterations.
    ///
    /// # Panics
    ///
    /// Panics only if FINISH is reached without START having populated
    /// an Orion first, which the state machine's transitions make
    /// unreachable.
    #[instrument(skip(self, device_info))]
    pub async fn run_round(&self, request: &str, device_info: &[DeviceProfile]) -> RoundOutcome {
        let mut state = AgentState::Start;
        let mut current: Option<Orion> = None;
        let mut orchestration: Option<JoinHandle<()>> = None;
        let mut step: u32 = 0;

        loop {
            state = match state {
                AgentState::Start => match self.handle_start(request, device_info).await {
                    Ok((orion, handle)) => {
                        current = Some(orion);
                        orchestration = Some(handle);
                        AgentState::Monitor
                    }
                    Err(e) => {
                        warn!(error = %e, "oracle failed to produce an Orion in START");
                        return self
                            .finish(orchestration, RoundOutcome::Failed { orion: current, reason: e.to_string() })
                            .await;
                    }
                },
                AgentState::Monitor => {
                    step += 1;
                    if step > self.config.max_step {
                        warn!(max_step = self.config.max_step, "agent exceeded MAX_STEP, escalating to FAIL");
                        return self
                            .finish(
                                orchestration,
                                RoundOutcome::Failed {
                                    orion: current,
                                    reason: format!("exceeded max_step={}", self.config.max_step),
                                },
                            )
                            .await;
                    }
                    match self.handle_monitor(request, device_info, &mut current).await {
                        Ok(next) => next,
                        Err(e) => {
                            warn!(error = %e, "agent escalating to FAIL from MONITOR");
                            return self
                                .finish(
                                    orchestration,
                                    RoundOutcome::Failed { orion: current, reason: e.to_string() },
                                )
                                .await;
                        }
                    }
                }
                AgentState::Finish => {
                    return self
                        .finish(
                            orchestration,
                            RoundOutcome::Finished {
                                orion: current.expect("FINISH is only reached after START populates an Orion"),
                            },
                        )
                        .await;
                }
                AgentState::Fail(FailReason(reason)) => {
                    return self
                        .finish(orchestration, RoundOutcome::Failed { orion: current, reason })
                        .await;
                }
            };
        }
    }

    /// START: build the initial Orion via the oracle, configure default
    /// per-task timeouts by priority, and spawn the orchestrator as a
    /// background task under the round-robin assignment strategy.
    async fn handle_start(&self, request: &str, device_info: &[DeviceProfile]) -> Result<(Orion, JoinHandle<()>)> {
        let mut orion = self
            .oracle
            .create_orion(request, device_info)
            .await
            .map_err(|e| Error::Oracle(e.to_string()))?;

        configure_task_timeouts(&mut orion, self.config.task_timeout, self.config.critical_task_timeout);
        self.synchronizer.adopt(orion.clone());

        let orchestrator = Arc::clone(&self.orchestrator);
        let to_run = orion.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = orchestrator
                .orchestrate(to_run, AssignmentPlan::Named("round_robin".to_string()), Metadata::new())
                .await
            {
                warn!(error = %e, "background orchestration ended in error");
            }
        });

        Ok((orion, handle))
    }

    /// MONITOR: await one event from the task-completion queue, consult
    /// the oracle, and either apply a structural edit (publishing
    /// `ORION_MODIFIED` to release the synchronizer's barrier) or decide
    /// the round is done.
    async fn handle_monitor(
        &self,
        request: &str,
        device_info: &[DeviceProfile],
        current: &mut Option<Orion>,
    ) -> Result<AgentState> {
        if let Some(reason) = self.force_stop_reason.lock().clone() {
            return Ok(AgentState::Fail(FailReason(reason)));
        }

        let event = {
            let mut queue = self.queue.lock().await;
            tokio::select! {
                e = queue.recv() => e,
                () = self.force_stop_notify.notified() => {
                    let reason = self
                        .force_stop_reason
                        .lock()
                        .clone()
                        .unwrap_or_else(|| "force stop requested".to_string());
                    return Ok(AgentState::Fail(FailReason(reason)));
                }
            }
        };
        let Some(event) = event else {
            return Err(Error::Internal("task-completion queue closed".to_string()));
        };

        match event.kind {
            OrionEventKind::TaskCompleted | OrionEventKind::TaskFailed => {
                self.process_editing(&event, device_info, current).await?;
                Ok(AgentState::Monitor)
            }
            OrionEventKind::OrionCompleted => {
                let snapshot = self
                    .synchronizer
                    .current()
                    .or_else(|| current.clone())
                    .ok_or_else(|| Error::Internal("no Orion to judge completion against".to_string()))?;
                match self.oracle.is_done(&snapshot, request).await.map_err(|e| Error::Oracle(e.to_string()))? {
                    OracleVerdict::Done => {
                        *current = Some(snapshot);
                        Ok(AgentState::Finish)
                    }
                    OracleVerdict::Continue => {
                        *current = Some(snapshot);
                        Ok(AgentState::Start)
                    }
                    OracleVerdict::Fail(reason) => Ok(AgentState::Fail(FailReason(reason))),
                }
            }
            _ => Ok(AgentState::Monitor),
        }
    }

    /// Consults the oracle for an edit script in response to one task's
    /// completion, applies it to the current Orion, and publishes
    /// `ORION_MODIFIED` with `on_task_id=[event.task_id]` — releasing the
    /// synchronizer's barrier for that task whether or not the script was
    /// empty.
    async fn process_editing(
        &self,
        event: &OrionEvent,
        device_info: &[DeviceProfile],
        current: &mut Option<Orion>,
    ) -> Result<()> {
        let base = self
            .synchronizer
            .current()
            .or_else(|| current.clone())
            .ok_or_else(|| Error::Internal("no Orion to edit".to_string()))?;

        let edit = self.oracle.edit_orion(&base, event, device_info).await.map_err(|e| Error::Oracle(e.to_string()))?;

        let mut new_orion = base.clone();
        apply_edit_script(&mut new_orion, edit);
        configure_task_timeouts(&mut new_orion, self.config.task_timeout, self.config.critical_task_timeout);
        new_orion.update_state();

        let mut data = Metadata::new();
        data.insert("old_orion".to_string(), serde_json::to_value(&base).unwrap_or_default());
        data.insert("new_orion".to_string(), serde_json::to_value(&new_orion).unwrap_or_default());
        if let Some(task_id) = event.task_id {
            data.insert(
                "on_task_id".to_string(),
                serde_json::Value::Array(vec![serde_json::Value::String(task_id.to_string())]),
            );
        }

        self.event_bus
            .publish(
                OrionEvent::new(OrionEventKind::OrionModified, "agent")
                    .with_orion_id(new_orion.orion_id)
                    .with_data(data),
            )
            .await;

        *current = Some(new_orion);
        Ok(())
    }

    /// FINISH / FAIL: cancel the background orchestration task
    /// (idempotent — a no-op if it already completed) and return the
    /// round's outcome.
    async fn finish(&self, orchestration: Option<JoinHandle<()>>, outcome: RoundOutcome) -> RoundOutcome {
        if let Some(handle) = orchestration {
            if !handle.is_finished() {
                handle.abort();
            }
            let _ = handle.await;
        }
        info!(?outcome, "round finished");
        outcome
    }
}

/// Sets each task's `timeout` from config by priority, preserving any
/// timeout already set explicitly — mirrors
/// `StartOrionAgentState._configure_task_timeouts`.
fn configure_task_timeouts(orion: &mut Orion, task_timeout: Duration, critical_task_timeout: Duration) {
    for task in orion.tasks.values_mut() {
        if task.timeout.is_none() {
            task.timeout = Some(task.effective_timeout(task_timeout, critical_task_timeout));
        }
    }
}

/// Applies an [`EditScript`] to an in-memory Orion: removals before
/// additions, so replacing a task (remove + add under a fresh id) and
/// extending the graph (add + `add_dependency`) both work in one script.
/// A rejected dependency (unknown endpoint, would-be cycle) is logged and
/// skipped rather than aborting the whole edit.
fn apply_edit_script(orion: &mut Orion, edit: EditScript) {
    for task_id in edit.remove_task_ids {
        orion.tasks.shift_remove(&task_id);
        orion.dependencies.retain(|d| d.from_task_id != task_id && d.to_task_id != task_id);
    }
    for task in edit.add_tasks {
        orion.add_task(task);
    }
    for line in edit.add_dependencies {
        if let Err(e) = orion.add_dependency(line) {
            warn!(error = %e, "oracle-proposed dependency rejected, skipping");
        }
    }
    for (from, to) in edit.remove_dependencies {
        orion.dependencies.retain(|d| !(d.from_task_id == from && d.to_task_id == to));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedOracle;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use orion_common::{DeviceId, DeviceStatus, DeviceTaskOutcome, TaskId, TaskPriority, TaskStar, TaskStatus};
    use orion_orchestrator_engine::EngineConfig;
    use std::collections::HashMap;

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
                    status: DeviceStatus::Connected,
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
            self.devices.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
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

    fn single_task_orion() -> Orion {
        let mut orion = Orion::new("single");
        orion.add_task(TaskStar::new("t1", TaskPriority::Medium));
        orion
    }

    fn build_agent(
        oracle: Arc<dyn PlanningOracle>,
        outcome: TaskStatus,
    ) -> (Arc<PlanningAgent<StubDeviceManager>>, Arc<EventBus>) {
        let event_bus = Arc::new(EventBus::new());
        let synchronizer = ModificationSynchronizer::new(Duration::from_secs(5));
        event_bus.subscribe(synchronizer.clone());
        let device_manager = Arc::new(StubDeviceManager::new(outcome));
        let orchestrator =
            Arc::new(Orchestrator::new(device_manager, event_bus.clone(), Some(synchronizer.clone()), EngineConfig::default()));
        let agent = Arc::new(PlanningAgent::new(
            oracle,
            orchestrator,
            synchronizer,
            event_bus.clone(),
            AgentConfig { max_step: 10, ..AgentConfig::default() },
        ));
        event_bus.subscribe(agent.progress_observer());
        (agent, event_bus)
    }

    #[tokio::test]
    async fn single_task_round_finishes_without_edits() {
        let oracle: Arc<dyn PlanningOracle> =
            Arc::new(ScriptedOracle::new(single_task_orion()).with_verdict(OracleVerdict::Done));
        let (agent, _bus) = build_agent(oracle, TaskStatus::Completed);

        let outcome = agent.run_round("do the thing", &[]).await;
        assert!(matches!(outcome, RoundOutcome::Finished { .. }));
    }

    #[tokio::test]
    async fn dynamic_task_addition_completes_after_edit() {
        let mut t2 = TaskStar::new("t2", TaskPriority::Medium);
        t2.task_id = TaskId::new_v4();
        let t2_id = t2.task_id;

        let initial = single_task_orion();
        let t1_id = initial.tasks.keys().next().copied().unwrap();

        let edit = EditScript {
            add_tasks: vec![t2],
            add_dependencies: vec![orion_common::TaskStarLine {
                from_task_id: t1_id,
                to_task_id: t2_id,
                dependency_type: orion_common::DependencyType::Unconditional,
            }],
            ..EditScript::default()
        };

        let oracle: Arc<dyn PlanningOracle> = Arc::new(
            ScriptedOracle::new(initial).with_edit(edit).with_verdict(OracleVerdict::Done),
        );
        let (agent, _bus) = build_agent(oracle, TaskStatus::Completed);

        let outcome = agent.run_round("add a follow-up task", &[]).await;
        match outcome {
            RoundOutcome::Finished { orion } => {
                assert_eq!(orion.tasks.len(), 2);
                assert_eq!(orion.get_statistics().completed, 2);
            }
            other @ RoundOutcome::Failed { .. } => panic!("expected Finished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oracle_that_never_finishes_hits_max_step() {
        let mut scripted = ScriptedOracle::new(single_task_orion());
        for _ in 0..20 {
            scripted = scripted.with_verdict(OracleVerdict::Continue);
        }
        let oracle: Arc<dyn PlanningOracle> = Arc::new(scripted);
        let (agent, _bus) = build_agent(oracle, TaskStatus::Completed);

        let outcome = agent.run_round("never satisfied", &[]).await;
        assert!(matches!(outcome, RoundOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn oracle_fail_verdict_escalates_to_fail() {
        let oracle: Arc<dyn PlanningOracle> = Arc::new(
            ScriptedOracle::new(single_task_orion())
                .with_verdict(OracleVerdict::Fail("nope".to_string())),
        );
        let (agent, _bus) = build_agent(oracle, TaskStatus::Completed);

        let outcome = agent.run_round("impossible request", &[]).await;
        match outcome {
            RoundOutcome::Failed { reason, .. } => assert!(reason.contains("nope")),
            other @ RoundOutcome::Finished { .. } => panic!("expected Failed, got {other:?}"),
        }
    }
}
