//! The wire-level dispatch abstraction. Actual WebSocket/RPC framing to a
//! physical device is out of scope; this trait is the seam a real
//! transport would implement, in the same role the teacher's stub
//! `ClaudeAgent`/`OpenAIAgent::submit` play for not-yet-wired providers.

use async_trait::async_trait;
use orion_common::{DeviceId, DeviceTaskOutcome, Metadata, Result, TaskId};
use std::time::Duration;

#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn dispatch(
        &self,
        task_id: TaskId,
        device_id: &DeviceId,
        payload: Metadata,
        timeout: Duration,
    ) -> Result<DeviceTaskOutcome>;
}

/// A scripted transport used in tests and the demo binary: resolves
/// after a configurable delay with a fixed status, standing in for a
/// real device's response.
pub struct SimulatedTransport {
    delay: Duration,
    status: orion_common::TaskStatus,
}

impl SimulatedTransport {
    pub fn new(delay: Duration, status: orion_common::TaskStatus) -> Self {
        Self { delay, status }
    }

    pub fn always_succeeds() -> Self {
        Self::new(Duration::from_millis(10), orion_common::TaskStatus::Completed)
    }

    pub fn always_fails() -> Self {
        Self::new(Duration::from_millis(10), orion_common::TaskStatus::Failed)
    }
}

#[async_trait]
impl DeviceTransport for SimulatedTransport {
    async fn dispatch(
        &self,
        _task_id: TaskId,
        device_id: &DeviceId,
        _payload: Metadata,
        timeout: Duration,
    ) -> Result<DeviceTaskOutcome> {
        tokio::time::sleep(self.delay.min(timeout)).await;
        Ok(DeviceTaskOutcome {
            status: self.status,
            result: match self.status {
                orion_common::TaskStatus::Completed => Some(serde_json::json!({"simulated": true})),
                _ => None,
            },
            error: match self.status {
                orion_common::TaskStatus::Completed => None,
                _ => Some("simulated failure".to_string()),
            },
            device_id: device_id.clone(),
        })
    }
}
