//! Orion Orchestrator entry point: loads configuration, initializes
//! telemetry, wires up one in-memory `Session`, and runs a demo request
//! against a simulated device fleet.

use anyhow::Result;
use orion_agent::scripted::ScriptedOracle;
use orion_agent::AgentConfig;
use orion_common::{Config, TaskPriority, TaskStar};
use orion_core::{EventBus, OracleVerdict, PlanningOracle};
use orion_devices::registry::DeviceRegistry;
use orion_devices::transport::SimulatedTransport;
use orion_devices::LocalDeviceManager;
use orion_orchestrator_engine::EngineConfig;
use orion_session::Session;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    if let Err(errors) = config.validate() {
        for error in errors {
            eprintln!("Config error: {error}");
        }
        std::process::exit(1);
    }

    orion_common::telemetry::init_telemetry(&config.observability)?;

    info!("Starting Orion Orchestrator v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded successfully");

    let event_bus = Arc::new(EventBus::new());
    let registry = Arc::new(DeviceRegistry::new());
    registry.insert(
        "demo-device-1".to_string(),
        "sim://demo-device-1".to_string(),
        "linux".to_string(),
        vec!["cpu".to_string()],
        orion_common::Metadata::new(),
    );
    let device_manager = Arc::new(LocalDeviceManager::new(
        registry,
        SimulatedTransport::always_succeeds(),
        event_bus,
    ));

    let mut demo_orion = orion_common::Orion::new("demo-request");
    demo_orion.add_task(TaskStar::new("gather-inputs", TaskPriority::Medium));
    let oracle: Arc<dyn PlanningOracle> = Arc::new(ScriptedOracle::new(demo_orion).with_verdict(OracleVerdict::Done));

    let session = Session::new(
        device_manager,
        oracle,
        EngineConfig {
            max_concurrent_tasks: config.orchestrator.max_concurrent_tasks,
            task_timeout: config.orchestrator.task_timeout(),
            critical_task_timeout: config.orchestrator.critical_task_timeout(),
            ..EngineConfig::default()
        },
        AgentConfig {
            max_step: config.orchestrator.max_step,
            task_timeout: config.orchestrator.task_timeout(),
            critical_task_timeout: config.orchestrator.critical_task_timeout(),
        },
        config.orchestrator.modification_timeout(),
    );

    info!("Running demo orion to completion");
    let outcome = session.run("run the demo orion").await;
    info!(?outcome.status, completed = outcome.completed_task_ids.len(), "demo orion finished");

    info!("Ready to process further requests; waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down Orion Orchestrator");
    orion_common::telemetry::shutdown_telemetry();

    Ok(())
}
