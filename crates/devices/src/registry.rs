//! The concurrent device registry: a `DashMap`-backed map of connected
//! devices, in the style of the teacher's `dispatcher.rs::active_requests`
//! tracking.

use dashmap::DashMap;
use orion_common::{DeviceId, DeviceProfile, DeviceStatus, DeviceType, Metadata};

/// In-memory registry of device profiles, safe for concurrent mutation
/// from the heartbeat task and from `register_device`/`disconnect_device`
/// calls.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<DeviceId, DeviceProfile>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        device_id: DeviceId,
        server_url: String,
        os: String,
        capabilities: Vec<String>,
        metadata: Metadata,
    ) -> bool {
        let already_present = self.devices.contains_key(&device_id);
        let device_type = infer_device_type(&os);
        self.devices.insert(
            device_id.clone(),
            DeviceProfile {
                device_id,
                server_url,
                os,
                device_type,
                capabilities,
                metadata,
                status: DeviceStatus::Connected,
                last_heartbeat: Some(chrono::Utc::now()),
                connection_attempts: 0,
                max_retries: 3,
            },
        );
        !already_present
    }

    pub fn remove(&self, device_id: &DeviceId) -> bool {
        self.devices.remove(device_id).is_some()
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<DeviceProfile> {
        self.devices.get(device_id).map(|e| e.value().clone())
    }

    pub fn touch_heartbeat(&self, device_id: &DeviceId) {
        if let Some(mut entry) = self.devices.get_mut(device_id) {
            entry.last_heartbeat = Some(chrono::Utc::now());
            if entry.status == DeviceStatus::Disconnected {
                entry.status = DeviceStatus::Connected;
            }
        }
    }

    pub fn set_status(&self, device_id: &DeviceId, status: DeviceStatus) -> bool {
        if let Some(mut entry) = self.devices.get_mut(device_id) {
            entry.status = status;
            true
        } else {
            false
        }
    }

    pub fn connected_ids(&self) -> Vec<DeviceId> {
        self.devices
            .iter()
            .filter(|e| e.status == DeviceStatus::Connected || e.status == DeviceStatus::Idle)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn all(&self, connected_only: bool) -> std::collections::HashMap<DeviceId, DeviceProfile> {
        self.devices
            .iter()
            .filter(|e| {
                !connected_only
                    || matches!(e.status, DeviceStatus::Connected | DeviceStatus::Idle | DeviceStatus::Busy)
            })
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Devices whose last heartbeat is older than `stale_after`, used by
    /// the heartbeat task to detect silently-dropped connections.
    pub fn stale_device_ids(&self, stale_after: chrono::Duration) -> Vec<DeviceId> {
        let cutoff = chrono::Utc::now() - stale_after;
        self.devices
            .iter()
            .filter(|e| e.status != DeviceStatus::Disconnected)
            .filter(|e| e.last_heartbeat.map_or(true, |hb| hb < cutoff))
            .map(|e| e.key().clone())
            .collect()
    }
}

fn infer_device_type(os: &str) -> Option<DeviceType> {
    match os.to_ascii_lowercase().as_str() {
        "windows" => Some(DeviceType::Windows),
        "macos" | "darwin" => Some(DeviceType::MacOs),
        "linux" => Some(DeviceType::Linux),
        "android" => Some(DeviceType::Android),
        "ios" => Some(DeviceType::Ios),
        "web" => Some(DeviceType::Web),
        "api" => Some(DeviceType::Api),
        _ => None,
    }
}
