//! The Planning Oracle abstraction consumed by the Planning Agent state
//! machine. No concrete LLM-backed implementation ships here — prompt
//! templates are out of scope — but the edit-script shape and verdict
//! type are part of the core contract between the agent and whatever
//! oracle drives it.

use async_trait::async_trait;
use orion_common::{DeviceProfile, Orion, Result, TaskId, TaskStar, TaskStarLine};

use crate::event_bus::OrionEvent;

/// The oracle's verdict on whether the user's original intent has been
/// satisfied by the current Orion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleVerdict {
    Done,
    Continue,
    Fail(String),
}

/// A structural edit to an in-flight Orion, produced by the oracle in
/// response to a task completion or failure.
#[derive(Debug, Clone, Default)]
pub struct EditScript {
    pub add_tasks: Vec<TaskStar>,
    pub remove_task_ids: Vec<TaskId>,
    pub add_dependencies: Vec<TaskStarLine>,
    pub remove_dependencies: Vec<(TaskId, TaskId)>,
}

impl EditScript {
    pub fn is_empty(&self) -> bool {
        self.add_tasks.is_empty()
            && self.remove_task_ids.is_empty()
            && self.add_dependencies.is_empty()
            && self.remove_dependencies.is_empty()
    }
}

#[async_trait]
pub trait PlanningOracle: Send + Sync {
    /// Builds the initial Orion from a request and the current device
    /// registry snapshot.
    async fn create_orion(&self, request: &str, device_info: &[DeviceProfile]) -> Result<Orion>;

    /// Produces an edit script in response to a task completion or
    /// failure event.
    async fn edit_orion(
        &self,
        current: &Orion,
        task_event: &OrionEvent,
        device_info: &[DeviceProfile],
    ) -> Result<EditScript>;

    /// Whether the original request has been satisfied by the current
    /// (now-complete) Orion.
    async fn is_done(&self, current: &Orion, request: &str) -> Result<OracleVerdict>;
}
