//! The Device Manager abstraction consumed by the orchestrator. The
//! concrete registry and transport live in the `orion-devices` crate;
//! keeping the trait here lets `orion-orchestrator-engine` depend on the
//! abstraction without depending on a specific transport.

use async_trait::async_trait;
use orion_common::{DeviceId, DeviceProfile, DeviceTaskOutcome, Metadata, Result, TaskId};
use std::collections::HashMap;
use std::time::Duration;

#[async_trait]
pub trait DeviceManager: Send + Sync {
    /// Ids of devices currently connected.
    async fn get_connected_devices(&self) -> Vec<DeviceId>;

    /// Full profile snapshot, optionally restricted to connected devices.
    async fn get_all_devices(&self, connected_only: bool) -> HashMap<DeviceId, DeviceProfile>;

    /// Dispatches a task's payload to a device and suspends until the
    /// device replies or `timeout` elapses.
    async fn assign_task_to_device(
        &self,
        task_id: TaskId,
        device_id: &DeviceId,
        payload: Metadata,
        timeout: Duration,
    ) -> Result<DeviceTaskOutcome>;

    async fn register_device(
        &self,
        device_id: DeviceId,
        url: String,
        os: String,
        capabilities: Vec<String>,
        metadata: Metadata,
    ) -> Result<bool>;

    async fn disconnect_device(&self, device_id: &DeviceId) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        TestDeviceManager {}

        #[async_trait]
        impl DeviceManager for TestDeviceManager {
            async fn get_connected_devices(&self) -> Vec<DeviceId>;
            async fn get_all_devices(&self, connected_only: bool) -> HashMap<DeviceId, DeviceProfile>;
            async fn assign_task_to_device(
                &self,
                task_id: TaskId,
                device_id: &DeviceId,
                payload: Metadata,
                timeout: Duration,
            ) -> Result<DeviceTaskOutcome>;
            async fn register_device(
                &self,
                device_id: DeviceId,
                url: String,
                os: String,
                capabilities: Vec<String>,
                metadata: Metadata,
            ) -> Result<bool>;
            async fn disconnect_device(&self, device_id: &DeviceId) -> Result<bool>;
        }
    }

    #[tokio::test]
    async fn mocked_device_manager_reports_connected_devices() {
        let mut mock = MockTestDeviceManager::new();
        mock.expect_get_connected_devices()
            .returning(|| vec!["dev-1".to_string()]);

        let devices = mock.get_connected_devices().await;
        assert_eq!(devices, vec!["dev-1".to_string()]);
    }

    #[tokio::test]
    async fn mocked_device_manager_propagates_dispatch_error() {
        let mut mock = MockTestDeviceManager::new();
        mock.expect_assign_task_to_device()
            .returning(|_, _, _, _| Err(orion_common::Error::Device("device unreachable".to_string())));

        let result = mock
            .assign_task_to_device(TaskId::new_v4(), &"dev-1".to_string(), Metadata::new(), Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }
}
