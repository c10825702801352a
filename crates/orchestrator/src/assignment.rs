//! Device assignment strategies, ported from `orion_manager.py`'s
//! `_assign_round_robin`/`_assign_capability_match`/`_assign_load_balance`.
//! Each strategy honors an explicit preference map first — a task keeps
//! its preferred device as long as that device is still connected — then
//! applies its own policy to whatever tasks remain, walked in Orion
//! insertion order.

use orion_common::{DeviceId, DeviceProfile, DeviceType, Error, Result, TaskId};
use orion_common::Orion;
use std::collections::HashMap;

pub trait AssignmentStrategy: Send + Sync {
    fn assign(
        &self,
        orion: &Orion,
        connected_devices: &HashMap<DeviceId, DeviceProfile>,
        preferences: &HashMap<TaskId, DeviceId>,
    ) -> Result<HashMap<TaskId, DeviceId>>;
}

fn apply_preferences(
    orion: &Orion,
    connected_devices: &HashMap<DeviceId, DeviceProfile>,
    preferences: &HashMap<TaskId, DeviceId>,
    assignments: &mut HashMap<TaskId, DeviceId>,
) -> Vec<TaskId> {
    orion
        .tasks
        .keys()
        .copied()
        .filter(|task_id| {
            if let Some(preferred) = preferences.get(task_id) {
                if connected_devices.contains_key(preferred) {
                    assignments.insert(*task_id, preferred.clone());
                    return false;
                }
            }
            true
        })
        .collect()
}

fn require_devices(connected_devices: &HashMap<DeviceId, DeviceProfile>) -> Result<()> {
    if connected_devices.is_empty() {
        return Err(Error::AssignmentStrategy(
            "no devices available".to_string(),
        ));
    }
    Ok(())
}

/// Cycles through connected devices in a stable order, one per remaining
/// task.
pub struct RoundRobinStrategy;

impl AssignmentStrategy for RoundRobinStrategy {
    fn assign(
        &self,
        orion: &Orion,
        connected_devices: &HashMap<DeviceId, DeviceProfile>,
        preferences: &HashMap<TaskId, DeviceId>,
    ) -> Result<HashMap<TaskId, DeviceId>> {
        require_devices(connected_devices)?;
        let mut assignments = HashMap::new();
        let remaining = apply_preferences(orion, connected_devices, preferences, &mut assignments);

        let mut device_ids: Vec<&DeviceId> = connected_devices.keys().collect();
        device_ids.sort();
        for (i, task_id) in remaining.into_iter().enumerate() {
            let device_id = device_ids[i % device_ids.len()].clone();
            assignments.insert(task_id, device_id);
        }
        Ok(assignments)
    }
}

/// Matches a task's declared `device_type` against connected devices,
/// falling back to round-robin over the whole connected set when a task
/// has no type requirement or no device of that type is connected.
pub struct CapabilityMatchStrategy;

impl AssignmentStrategy for CapabilityMatchStrategy {
    fn assign(
        &self,
        orion: &Orion,
        connected_devices: &HashMap<DeviceId, DeviceProfile>,
        preferences: &HashMap<TaskId, DeviceId>,
    ) -> Result<HashMap<TaskId, DeviceId>> {
        require_devices(connected_devices)?;
        let mut assignments = HashMap::new();
        let remaining = apply_preferences(orion, connected_devices, preferences, &mut assignments);

        let mut by_type: HashMap<DeviceType, Vec<&DeviceId>> = HashMap::new();
        let mut all_ids: Vec<&DeviceId> = connected_devices.keys().collect();
        all_ids.sort();
        for id in &all_ids {
            if let Some(device_type) = connected_devices[*id].device_type {
                by_type.entry(device_type).or_default().push(id);
            }
        }

        let mut round_robin_cursor = 0usize;
        for task_id in remaining {
            let wanted = orion.tasks.get(&task_id).and_then(|t| t.device_type);
            let chosen = wanted
                .and_then(|dt| by_type.get(&dt))
                .filter(|ids| !ids.is_empty())
                .map(|ids| ids[round_robin_cursor % ids.len()].clone())
                .unwrap_or_else(|| {
                    let id = all_ids[round_robin_cursor % all_ids.len()].clone();
                    id
                });
            round_robin_cursor += 1;
            assignments.insert(task_id, chosen);
        }
        Ok(assignments)
    }
}

/// Assigns each remaining task to whichever connected device currently
/// holds the fewest assignments from this same call, breaking ties by
/// device id for determinism.
pub struct LoadBalanceStrategy;

impl AssignmentStrategy for LoadBalanceStrategy {
    fn assign(
        &self,
        orion: &Orion,
        connected_devices: &HashMap<DeviceId, DeviceProfile>,
        preferences: &HashMap<TaskId, DeviceId>,
    ) -> Result<HashMap<TaskId, DeviceId>> {
        require_devices(connected_devices)?;
        let mut assignments = HashMap::new();
        let remaining = apply_preferences(orion, connected_devices, preferences, &mut assignments);

        let mut load: HashMap<DeviceId, usize> =
            connected_devices.keys().map(|id| (id.clone(), 0)).collect();
        for device_id in assignments.values() {
            *load.entry(device_id.clone()).or_insert(0) += 1;
        }

        for task_id in remaining {
            let chosen = load
                .iter()
                .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
                .map(|(id, _)| id.clone())
                .expect("connected_devices is non-empty");
            *load.get_mut(&chosen).unwrap() += 1;
            assignments.insert(task_id, chosen);
        }
        Ok(assignments)
    }
}

/// Resolves a named strategy, per the §7 `unknown strategy name` error.
pub fn by_name(name: &str) -> Result<Box<dyn AssignmentStrategy>> {
    match name {
        "round_robin" => Ok(Box::new(RoundRobinStrategy)),
        "capability_match" => Ok(Box::new(CapabilityMatchStrategy)),
        "load_balance" => Ok(Box::new(LoadBalanceStrategy)),
        other => Err(Error::AssignmentStrategy(format!(
            "unknown strategy name: {other}"
        ))),
    }
}
