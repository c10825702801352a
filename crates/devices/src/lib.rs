#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! The device registry and its `DeviceManager` façade: a pluggable
//! transport dispatches tasks to registered devices, and a heartbeat task
//! flips stale devices to `Disconnected`, publishing the corresponding
//! `DEVICE_*` events on the shared event bus.

pub mod registry;
pub mod transport;

use async_trait::async_trait;
use orion_common::{DeviceId, DeviceProfile, DeviceStatus, DeviceTaskOutcome, Metadata, Result, TaskId};
use orion_core::{DeviceManager, EventBus, OrionEvent, OrionEventKind};
use registry::DeviceRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use transport::DeviceTransport;

/// A `DeviceManager` backed by an in-memory [`DeviceRegistry`] and a
/// pluggable [`DeviceTransport`]. Mutations publish `DeviceConnected` /
/// `DeviceDisconnected` / `DeviceStatusChanged` on the shared
/// [`EventBus`].
pub struct LocalDeviceManager<T: DeviceTransport> {
    registry: Arc<DeviceRegistry>,
    transport: T,
    event_bus: Arc<EventBus>,
}

impl<T: DeviceTransport> LocalDeviceManager<T> {
    pub fn new(registry: Arc<DeviceRegistry>, transport: T, event_bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            transport,
            event_bus,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Spawns a background task that periodically marks devices whose
    /// heartbeat has gone stale as `Disconnected`, publishing
    /// `DeviceStatusChanged` for each.
    pub fn spawn_heartbeat_task(&self, interval: Duration) -> tokio::task::JoinHandle<()>
    where
        T: 'static,
    {
        let registry = Arc::clone(&self.registry);
        let event_bus = Arc::clone(&self.event_bus);
        tokio::spawn(async move {
            let stale_after = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::seconds(30));
            loop {
                tokio::time::sleep(interval).await;
                for device_id in registry.stale_device_ids(stale_after) {
                    if registry.set_status(&device_id, DeviceStatus::Disconnected) {
                        info!(%device_id, "device heartbeat stale, marking disconnected");
                        let mut data = Metadata::new();
                        data.insert(
                            "device_id".to_string(),
                            serde_json::Value::String(device_id),
                        );
                        event_bus
                            .publish(
                                OrionEvent::new(OrionEventKind::DeviceStatusChanged, "device-registry")
                                    .with_data(data),
                            )
                            .await;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl<T: DeviceTransport + Send + Sync> DeviceManager for LocalDeviceManager<T> {
    async fn get_connected_devices(&self) -> Vec<DeviceId> {
        self.registry.connected_ids()
    }

    async fn get_all_devices(&self, connected_only: bool) -> HashMap<DeviceId, DeviceProfile> {
        self.registry.all(connected_only)
    }

    async fn assign_task_to_device(
        &self,
        task_id: TaskId,
        device_id: &DeviceId,
        payload: Metadata,
        timeout: Duration,
    ) -> Result<DeviceTaskOutcome> {
        self.transport.dispatch(task_id, device_id, payload, timeout).await
    }

    async fn register_device(
        &self,
        device_id: DeviceId,
        url: String,
        os: String,
        capabilities: Vec<String>,
        metadata: Metadata,
    ) -> Result<bool> {
        let newly_connected = self.registry.insert(device_id.clone(), url, os, capabilities, metadata);
        let mut data = Metadata::new();
        data.insert("device_id".to_string(), serde_json::Value::String(device_id));
        self.event_bus
            .publish(OrionEvent::new(OrionEventKind::DeviceConnected, "device-registry").with_data(data))
            .await;
        Ok(newly_connected)
    }

    async fn disconnect_device(&self, device_id: &DeviceId) -> Result<bool> {
        let removed = self.registry.remove(device_id);
        if removed {
            let mut data = Metadata::new();
            data.insert(
                "device_id".to_string(),
                serde_json::Value::String(device_id.clone()),
            );
            self.event_bus
                .publish(
                    OrionEvent::new(OrionEventKind::DeviceDisconnected, "device-registry").with_data(data),
                )
                .await;
        }
        Ok(removed)
    }
}
