//! A deterministic [`PlanningOracle`] test double, standing in for the
//! LLM-backed oracle so the agent's state machine can be exercised
//! without a live model — the same role `MockOrionAgent` plays in the
//! Python test suite.

use async_trait::async_trait;
use orion_common::{DeviceProfile, Orion, Result};
use orion_core::{EditScript, OracleVerdict, OrionEvent, PlanningOracle};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Scripts a fixed sequence of responses: one initial Orion, a queue of
/// edit scripts handed out one per `edit_orion` call (empty script once
/// exhausted), and a queue of verdicts handed out one per `is_done` call
/// (defaults to `Done` once exhausted, so a test that forgets to script
/// enough verdicts still terminates).
pub struct ScriptedOracle {
    initial: Orion,
    edits: Mutex<VecDeque<EditScript>>,
    verdicts: Mutex<VecDeque<OracleVerdict>>,
}

impl ScriptedOracle {
    #[must_use]
    pub fn new(initial: Orion) -> Self {
        Self {
            initial,
            edits: Mutex::new(VecDeque::new()),
            verdicts: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn with_edit(self, edit: EditScript) -> Self {
        self.edits.lock().push_back(edit);
        self
    }

    #[must_use]
    pub fn with_verdict(self, verdict: OracleVerdict) -> Self {
        self.verdicts.lock().push_back(verdict);
        self
    }
}

#[async_trait]
impl PlanningOracle for ScriptedOracle {
    async fn create_orion(&self, _request: &str, _device_info: &[DeviceProfile]) -> Result<Orion> {
        Ok(self.initial.clone())
    }

    async fn edit_orion(
        &self,
        _current: &Orion,
        _task_event: &OrionEvent,
        _device_info: &[DeviceProfile],
    ) -> Result<EditScript> {
        Ok(self.edits.lock().pop_front().unwrap_or_default())
    }

    async fn is_done(&self, _current: &Orion, _request: &str) -> Result<OracleVerdict> {
        Ok(self.verdicts.lock().pop_front().unwrap_or(OracleVerdict::Done))
    }
}
