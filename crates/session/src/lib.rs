#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! The Session: glues one `Orchestrator` and one `PlanningAgent` to a
//! shared `EventBus`/`ModificationSynchronizer` pair behind a single
//! request/response entrypoint, grounded on
//! `original_source/network/session/network_session.py`'s
//! `NetworkSession`.

use orion_agent::{AgentConfig, PlanningAgent, RoundOutcome};
use orion_common::{OrionState, OrionStatistics, TaskId};
use orion_core::{DeviceManager, EventBus, PlanningOracle};
use orion_orchestrator_engine::sync::ModificationSynchronizer;
use orion_orchestrator_engine::{EngineConfig, Orchestrator};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Terminal result of one session round, replacing the source's
/// ad-hoc dict-typed `session_results` with a typed struct.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub status: OrionState,
    pub statistics: OrionStatistics,
    pub completed_task_ids: Vec<TaskId>,
    pub failed_task_ids: Vec<TaskId>,
    pub cancelled: bool,
    pub reason: Option<String>,
}

impl SessionOutcome {
    fn from_round(outcome: RoundOutcome) -> Self {
        match outcome {
            RoundOutcome::Finished { orion } => Self {
                status: orion.state,
                statistics: orion.get_statistics(),
                completed_task_ids: orion.get_completed_tasks(),
                failed_task_ids: orion.get_failed_tasks(),
                cancelled: matches!(orion.state, OrionState::Cancelled),
                reason: None,
            },
            RoundOutcome::Failed { orion, reason } => match orion {
                Some(orion) => Self {
                    status: orion.state,
                    statistics: orion.get_statistics(),
                    completed_task_ids: orion.get_completed_tasks(),
                    failed_task_ids: orion.get_failed_tasks(),
                    cancelled: matches!(orion.state, OrionState::Cancelled),
                    reason: Some(reason),
                },
                None => Self {
                    status: OrionState::Failed,
                    statistics: OrionStatistics::default(),
                    completed_task_ids: Vec::new(),
                    failed_task_ids: Vec::new(),
                    cancelled: false,
                    reason: Some(reason),
                },
            },
        }
    }
}

/// Owns one `Orchestrator`/`PlanningAgent` pair wired to a private
/// `EventBus` and `ModificationSynchronizer`, and exposes the
/// request/response surface a caller drives a DAG execution through.
pub struct Session<D: DeviceManager + 'static> {
    device_manager: Arc<D>,
    agent: Arc<PlanningAgent<D>>,
    orchestrator: Arc<Orchestrator<D>>,
    event_bus: Arc<EventBus>,
}

impl<D: DeviceManager + 'static> Session<D> {
    pub fn new(
        device_manager: Arc<D>,
        oracle: Arc<dyn PlanningOracle>,
        engine_config: EngineConfig,
        agent_config: AgentConfig,
        modification_timeout: Duration,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new());
        let synchronizer = ModificationSynchronizer::new(modification_timeout);
        event_bus.subscribe(synchronizer.clone());

        let orchestrator = Arc::new(Orchestrator::new(
            device_manager.clone(),
            event_bus.clone(),
            Some(synchronizer.clone()),
            engine_config,
        ));
        let agent = Arc::new(PlanningAgent::new(
            oracle,
            orchestrator.clone(),
            synchronizer,
            event_bus.clone(),
            agent_config,
        ));
        event_bus.subscribe(agent.progress_observer());

        Self {
            device_manager,
            agent,
            orchestrator,
            event_bus,
        }
    }

    /// Runs one request to a terminal [`SessionOutcome`], fetching a
    /// fresh device snapshot (connected and disconnected, so the oracle
    /// always sees the full fleet) before handing off to the agent's
    /// round loop. Mirrors `NetworkSession::run` driving one
    /// `NetworkRound::run`.
    #[instrument(skip(self))]
    pub async fn run(&self, request: &str) -> SessionOutcome {
        info!(%request, "starting session round");
        let device_info: Vec<_> = self.device_manager.get_all_devices(false).await.into_values().collect();
        let outcome = self.agent.run_round(request, &device_info).await;
        SessionOutcome::from_round(outcome)
    }

    /// Forces the round currently in flight to FAIL immediately and
    /// halts whatever the orchestrator has in flight. Mirrors
    /// `NetworkSession::force_finish`.
    pub async fn force_stop(&self, reason: impl Into<String>) {
        self.agent.force_stop(reason.into());
        self.orchestrator.cancel_current().await;
    }

    /// Halts the orchestrator's in-flight execution so no further task
    /// events are published; the round in progress still runs to a
    /// terminal state once the agent observes the resulting
    /// `OrionCompleted`. Mirrors `NetworkSession::request_cancellation`.
    pub async fn request_cancellation(&self) {
        self.orchestrator.cancel_current().await;
    }

    /// Clears any pending force-stop so a new [`Session::run`] call
    /// starts clean. Mirrors `NetworkSession::reset`.
    pub fn reset(&self) {
        self.agent.reset();
    }

    #[must_use]
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use orion_agent::scripted::ScriptedOracle;
    use orion_common::{
        DeviceId, DeviceProfile, DeviceStatus, DeviceTaskOutcome, Metadata, Result, TaskPriority, TaskStar,
        TaskStatus,
    };
    use orion_core::OracleVerdict;
    use std::collections::HashMap;

    struct StubDeviceManager {
        devices: DashMap<DeviceId, DeviceProfile>,
        outcome: TaskStatus,
        delay: Duration,
    }

    impl StubDeviceManager {
        fn new(outcome: TaskStatus) -> Self {
            Self::with_delay(outcome, Duration::from_secs(0))
        }

        fn with_delay(outcome: TaskStatus, delay: Duration) -> Self {
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
            Self { devices, outcome, delay }
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
            _timeout: std::time::Duration,
        ) -> Result<DeviceTaskOutcome> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
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

    fn single_task_orion() -> orion_common::Orion {
        let mut orion = orion_common::Orion::new("single");
        orion.add_task(TaskStar::new("t1", TaskPriority::Medium));
        orion
    }

    fn build_session(outcome: TaskStatus, verdict: OracleVerdict) -> Session<StubDeviceManager> {
        let device_manager = Arc::new(StubDeviceManager::new(outcome));
        let oracle: Arc<dyn PlanningOracle> =
            Arc::new(ScriptedOracle::new(single_task_orion()).with_verdict(verdict));
        Session::new(
            device_manager,
            oracle,
            EngineConfig::default(),
            AgentConfig { max_step: 10, ..AgentConfig::default() },
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn run_to_completion_reports_finished_status() {
        let session = build_session(TaskStatus::Completed, OracleVerdict::Done);
        let outcome = session.run("do the thing").await;
        assert_eq!(outcome.status, OrionState::Completed);
        assert_eq!(outcome.completed_task_ids.len(), 1);
        assert!(outcome.reason.is_none());
    }

    #[tokio::test]
    async fn cancellation_halts_further_task_events() {
        use orion_common::DependencyType;
        use orion_core::{EventObserver, OrionEvent, OrionEventKind};
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingObserver(Arc<AtomicUsize>);
        #[async_trait]
        impl EventObserver for CountingObserver {
            async fn on_event(&self, event: &OrionEvent) {
                if event.kind == OrionEventKind::TaskStarted {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let mut orion = orion_common::Orion::new("chain");
        let first = TaskStar::new("t1", TaskPriority::Medium);
        let second = TaskStar::new("t2", TaskPriority::Medium);
        let (first_id, second_id) = (first.task_id, second.task_id);
        orion.add_task(first);
        orion.add_task(second);
        orion
            .add_dependency(orion_common::TaskStarLine {
                from_task_id: first_id,
                to_task_id: second_id,
                dependency_type: DependencyType::Unconditional,
            })
            .unwrap();

        let device_manager = Arc::new(StubDeviceManager::with_delay(TaskStatus::Completed, Duration::from_millis(200)));
        let oracle: Arc<dyn PlanningOracle> =
            Arc::new(ScriptedOracle::new(orion).with_verdict(OracleVerdict::Done));
        let session = Arc::new(Session::new(
            device_manager,
            oracle,
            EngineConfig::default(),
            AgentConfig { max_step: 10, ..AgentConfig::default() },
            Duration::from_secs(5),
        ));

        let count = Arc::new(AtomicUsize::new(0));
        session.event_bus().subscribe(Arc::new(CountingObserver(count.clone())));

        let run_session = session.clone();
        let handle = tokio::spawn(async move { run_session.run("two step chain").await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        session.request_cancellation().await;

        let outcome = handle.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.status, OrionState::Cancelled);
        assert!(outcome.completed_task_ids.is_empty());
    }

    #[tokio::test]
    async fn force_stop_escalates_round_to_failed() {
        let session = build_session(TaskStatus::Completed, OracleVerdict::Continue);
        session.force_stop("operator requested shutdown").await;
        let outcome = session.run("never gets to finish").await;
        assert!(outcome.reason.is_some());
    }
}
