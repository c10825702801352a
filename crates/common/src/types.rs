//! Domain types shared across the orchestrator workspace: the Orion DAG
//! value model (`TaskStar`, `TaskStarLine`, `Orion`), their state enums,
//! and the device profile shape consumed through the `DeviceManager`
//! abstraction.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orion (DAG) id type
pub type OrionId = uuid::Uuid;

/// Task id type, unique within one Orion
pub type TaskId = uuid::Uuid;

/// Device id type; operator-assigned, not generated
pub type DeviceId = String;

/// Generic metadata bag
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Status of one TaskStar. Advancement is monotonic: a merge must never
/// move a task backwards along this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    WaitingDependency,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Advancement level used by the Modification Synchronizer's merge
    /// and by the monotonicity invariant. Terminal states are equally
    /// advanced — none of them may be overwritten by another.
    pub fn level(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::WaitingDependency => 1,
            TaskStatus::Running => 2,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => 3,
        }
    }

    /// Whether the status is terminal (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        self.level() >= 3
    }
}

/// Status of an Orion (DAG) as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrionState {
    Created,
    Ready,
    Executing,
    Completed,
    PartiallyFailed,
    Failed,
    Cancelled,
}

/// How a dependency edge's satisfaction is derived from its predecessor's
/// terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "condition")]
pub enum DependencyType {
    /// Fires on any terminal state of the predecessor.
    Unconditional,
    /// Fires only when the predecessor is `Completed`.
    SuccessOnly,
    /// Fires on `Completed` or `Failed`, but not `Cancelled`.
    CompletionOnly,
    /// Fires when a named condition evaluates true against the
    /// predecessor's result. The condition string is never evaluated in
    /// code — it is informational, read by the planning oracle.
    Conditional(String),
}

/// Ordered task priority. Influences only initial device assignment and
/// the default per-task timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

/// The kind of device a task may require, used by the capability-match
/// assignment strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Windows,
    MacOs,
    Linux,
    Android,
    Ios,
    Web,
    Api,
}

/// Connection status of one device in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Connected,
    Disconnected,
    Idle,
    Busy,
    Failed,
    Connecting,
}

/// Snapshot of one registered device, as returned by the Device Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device_id: DeviceId,
    pub server_url: String,
    pub os: String,
    pub device_type: Option<DeviceType>,
    pub capabilities: Vec<String>,
    pub metadata: Metadata,
    pub status: DeviceStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub connection_attempts: u32,
    pub max_retries: u32,
}

/// Outcome of dispatching one task to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTaskOutcome {
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub device_id: DeviceId,
}

/// One node in an Orion DAG: a unit of work dispatched to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStar {
    pub task_id: TaskId,
    pub name: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub device_type: Option<DeviceType>,
    pub target_device_id: Option<DeviceId>,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub execution_start_time: Option<DateTime<Utc>>,
    pub execution_end_time: Option<DateTime<Utc>>,
    pub timeout: Option<Duration>,
    pub tips: Vec<String>,
    pub task_data: Metadata,
    pub metadata: Metadata,
}

impl TaskStar {
    pub fn new(name: impl Into<String>, priority: TaskPriority) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4(),
            name: name.into(),
            description: None,
            priority,
            device_type: None,
            target_device_id: None,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            execution_start_time: None,
            execution_end_time: None,
            timeout: None,
            tips: Vec::new(),
            task_data: Metadata::new(),
            metadata: Metadata::new(),
        }
    }

    /// Marks the task running and records the start time. No-op if the
    /// task is already terminal.
    pub fn start_execution(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Running;
        self.execution_start_time = Some(Utc::now());
    }

    /// Marks the task completed with a result. Idempotent: a second call
    /// on an already-terminal task is a no-op, matching the invariant
    /// that terminal fields are immutable.
    pub fn complete_with_success(&mut self, result: Option<serde_json::Value>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Completed;
        self.result = result;
        self.execution_end_time = Some(Utc::now());
    }

    /// Marks the task failed with an error. Idempotent like
    /// [`TaskStar::complete_with_success`].
    pub fn complete_with_failure(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.execution_end_time = Some(Utc::now());
    }

    /// Marks the task cancelled. Idempotent like the other terminal
    /// transitions.
    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Cancelled;
        self.execution_end_time = Some(Utc::now());
    }

    pub fn execution_duration(&self) -> Option<Duration> {
        let start = self.execution_start_time?;
        let end = self.execution_end_time?;
        (end - start).to_std().ok()
    }

    pub fn effective_timeout(&self, task_timeout: Duration, critical_task_timeout: Duration) -> Duration {
        self.timeout.unwrap_or(match self.priority {
            TaskPriority::Critical => critical_task_timeout,
            _ => task_timeout,
        })
    }
}

/// One edge in an Orion DAG, expressing a typed dependency between two
/// tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStarLine {
    pub from_task_id: TaskId,
    pub to_task_id: TaskId,
    pub dependency_type: DependencyType,
}

impl TaskStarLine {
    /// True iff the predecessor is in a terminal state consistent with
    /// this edge's dependency type. `CONDITIONAL` edges are never
    /// auto-derived: they are satisfied only through an explicit
    /// structural edit from the planning agent (see the agent's
    /// `ORION_MODIFIED` path), so they read as unsatisfied here.
    pub fn is_satisfied(&self, predecessor: &TaskStar) -> bool {
        match &self.dependency_type {
            DependencyType::Unconditional => predecessor.status.is_terminal(),
            DependencyType::SuccessOnly => predecessor.status == TaskStatus::Completed,
            DependencyType::CompletionOnly => matches!(
                predecessor.status,
                TaskStatus::Completed | TaskStatus::Failed
            ),
            DependencyType::Conditional(_) => false,
        }
    }
}

/// Aggregate counts over one Orion's tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrionStatistics {
    pub total: usize,
    pub pending: usize,
    pub waiting_dependency: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// A directed acyclic graph of `TaskStar` nodes connected by typed
/// `TaskStarLine` dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orion {
    pub orion_id: OrionId,
    pub name: String,
    pub state: OrionState,
    pub tasks: IndexMap<TaskId, TaskStar>,
    pub dependencies: Vec<TaskStarLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub execution_start_time: Option<DateTime<Utc>>,
    pub execution_end_time: Option<DateTime<Utc>>,
}

impl Orion {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            orion_id: uuid::Uuid::new_v4(),
            name: name.into(),
            state: OrionState::Created,
            tasks: IndexMap::new(),
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
            execution_start_time: None,
            execution_end_time: None,
        }
    }

    pub fn add_task(&mut self, task: TaskStar) {
        self.tasks.insert(task.task_id, task);
        self.updated_at = Utc::now();
    }

    /// Rejects an edge that would introduce a cycle or reference a
    /// missing endpoint (invariants 1 and 2).
    pub fn add_dependency(&mut self, line: TaskStarLine) -> crate::error::Result<()> {
        if !self.tasks.contains_key(&line.from_task_id) || !self.tasks.contains_key(&line.to_task_id) {
            return Err(crate::error::Error::InvalidDag(format!(
                "dependency references unknown task: {} -> {}",
                line.from_task_id, line.to_task_id
            )));
        }
        let mut candidate = self.dependencies.clone();
        candidate.push(line.clone());
        if Self::has_cycle(&self.tasks, &candidate) {
            return Err(crate::error::Error::InvalidDag(format!(
                "dependency would introduce a cycle: {} -> {}",
                line.from_task_id, line.to_task_id
            )));
        }
        self.dependencies.push(line);
        self.updated_at = Utc::now();
        Ok(())
    }

    fn has_cycle(tasks: &IndexMap<TaskId, TaskStar>, deps: &[TaskStarLine]) -> bool {
        use std::collections::{HashMap, HashSet};
        let mut adjacency: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for d in deps {
            adjacency.entry(d.from_task_id).or_default().push(d.to_task_id);
        }
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();

        fn visit(
            node: TaskId,
            adjacency: &std::collections::HashMap<TaskId, Vec<TaskId>>,
            visiting: &mut HashSet<TaskId>,
            visited: &mut HashSet<TaskId>,
        ) -> bool {
            if visiting.contains(&node) {
                return true;
            }
            if visited.contains(&node) {
                return false;
            }
            visiting.insert(node);
            if let Some(next) = adjacency.get(&node) {
                for &n in next {
                    if visit(n, adjacency, visiting, visited) {
                        return true;
                    }
                }
            }
            visiting.remove(&node);
            visited.insert(node);
            false
        }

        for &id in tasks.keys() {
            if visit(id, &adjacency, &mut visiting, &mut visited) {
                return true;
            }
        }
        false
    }

    /// Structural validation: acyclic, and every edge endpoint exists.
    pub fn validate_dag(&self) -> crate::error::Result<()> {
        for dep in &self.dependencies {
            if !self.tasks.contains_key(&dep.from_task_id) || !self.tasks.contains_key(&dep.to_task_id) {
                return Err(crate::error::Error::InvalidDag(format!(
                    "dangling dependency: {} -> {}",
                    dep.from_task_id, dep.to_task_id
                )));
            }
        }
        if Self::has_cycle(&self.tasks, &self.dependencies) {
            return Err(crate::error::Error::InvalidDag(
                "DAG contains a cycle".to_string(),
            ));
        }
        Ok(())
    }

    /// Tasks that are `Pending` with every incoming edge satisfied
    /// (invariant 3).
    pub fn get_ready_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| self.incoming_satisfied(t.task_id))
            .map(|t| t.task_id)
            .collect()
    }

    fn incoming_satisfied(&self, task_id: TaskId) -> bool {
        self.dependencies
            .iter()
            .filter(|d| d.to_task_id == task_id)
            .all(|d| {
                self.tasks
                    .get(&d.from_task_id)
                    .map(|pred| d.is_satisfied(pred))
                    .unwrap_or(false)
            })
    }

    pub fn get_running_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.task_id)
            .collect()
    }

    pub fn get_completed_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.task_id)
            .collect()
    }

    pub fn get_failed_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.task_id)
            .collect()
    }

    pub fn get_statistics(&self) -> OrionStatistics {
        let mut stats = OrionStatistics {
            total: self.tasks.len(),
            ..Default::default()
        };
        for t in self.tasks.values() {
            match t.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::WaitingDependency => stats.waiting_dependency += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    pub fn is_complete(&self) -> bool {
        matches!(
            self.state,
            OrionState::Completed
                | OrionState::PartiallyFailed
                | OrionState::Failed
                | OrionState::Cancelled
        )
    }

    /// Tasks that are `Pending`/`WaitingDependency` but can never become
    /// ready: transitively, some incoming edge's predecessor has already
    /// terminated without satisfying it (or is itself doomed this way).
    /// `CONDITIONAL` edges never doom a downstream task here since they
    /// are resolved out of band by the planning agent, not by predecessor
    /// status.
    fn doomed_tasks(&self) -> std::collections::HashSet<TaskId> {
        let mut doomed = std::collections::HashSet::new();
        loop {
            let mut changed = false;
            for t in self.tasks.values() {
                if !matches!(t.status, TaskStatus::Pending | TaskStatus::WaitingDependency)
                    || doomed.contains(&t.task_id)
                {
                    continue;
                }
                let blocked = self
                    .dependencies
                    .iter()
                    .filter(|d| d.to_task_id == t.task_id)
                    .any(|d| {
                        if matches!(d.dependency_type, DependencyType::Conditional(_)) {
                            return false;
                        }
                        match self.tasks.get(&d.from_task_id) {
                            Some(pred) if pred.status.is_terminal() => !d.is_satisfied(pred),
                            Some(pred) => doomed.contains(&pred.task_id),
                            None => false,
                        }
                    });
                if blocked && doomed.insert(t.task_id) {
                    changed = true;
                }
            }
            if !changed {
                return doomed;
            }
        }
    }

    /// True if some non-terminal task can still make progress: a
    /// `Running` task always can, and a `Pending`/`WaitingDependency`
    /// task can unless it is in [`Orion::doomed_tasks`].
    fn has_unreachable_progress(&self) -> bool {
        if self.tasks.values().any(|t| t.status == TaskStatus::Running) {
            return true;
        }
        let doomed = self.doomed_tasks();
        self.tasks.values().any(|t| {
            matches!(t.status, TaskStatus::Pending | TaskStatus::WaitingDependency)
                && !doomed.contains(&t.task_id)
        })
    }

    /// Recomputes `state` from current task statuses (invariant 4).
    /// Does not move the state if the orchestrator has already forced a
    /// `Cancelled` terminal state.
    pub fn update_state(&mut self) {
        if self.state == OrionState::Cancelled {
            return;
        }
        if self.tasks.is_empty() {
            self.updated_at = Utc::now();
            return;
        }
        let stats = self.get_statistics();
        self.state = if stats.completed == stats.total {
            OrionState::Completed
        } else if stats.failed > 0 && !self.has_unreachable_progress() {
            if stats.completed > 0 {
                OrionState::PartiallyFailed
            } else {
                OrionState::Failed
            }
        } else if stats.running > 0 || stats.waiting_dependency > 0 {
            OrionState::Executing
        } else if !self.get_ready_tasks().is_empty() {
            OrionState::Ready
        } else {
            self.state
        };
        self.updated_at = Utc::now();
    }

    pub fn start_execution(&mut self) {
        self.execution_start_time = Some(Utc::now());
        self.state = OrionState::Executing;
    }

    pub fn complete_execution(&mut self) {
        self.execution_end_time = Some(Utc::now());
        self.update_state();
    }

    /// Applies a completed/failed task's terminal status and returns the
    /// set of tasks that became ready as a result.
    pub fn mark_task_completed(
        &mut self,
        task_id: TaskId,
        success: bool,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Vec<TaskId> {
        let previously_ready: std::collections::HashSet<_> =
            self.get_ready_tasks().into_iter().collect();
        if let Some(task) = self.tasks.get_mut(&task_id) {
            if success {
                task.complete_with_success(result);
            } else {
                task.complete_with_failure(error.unwrap_or_default());
            }
        }
        self.update_state();
        self.get_ready_tasks()
            .into_iter()
            .filter(|id| !previously_ready.contains(id) && *id != task_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `root` -> `a`/`b` -> `join`, all `SUCCESS_ONLY`. `a` fails, so
    /// `join`'s edge from `a` can never be satisfied. Must settle on
    /// `PartiallyFailed`, not spin forever waiting on `join`.
    #[test]
    fn diamond_with_success_only_failure_settles_partially_failed() {
        let mut orion = Orion::new("diamond");
        let root = TaskStar::new("root", TaskPriority::Medium);
        let a = TaskStar::new("a", TaskPriority::Medium);
        let b = TaskStar::new("b", TaskPriority::Medium);
        let join = TaskStar::new("join", TaskPriority::Medium);
        let (root_id, a_id, b_id, join_id) = (root.task_id, a.task_id, b.task_id, join.task_id);
        orion.add_task(root);
        orion.add_task(a);
        orion.add_task(b);
        orion.add_task(join);
        for (from, to) in [(root_id, a_id), (root_id, b_id), (a_id, join_id), (b_id, join_id)] {
            orion
                .add_dependency(TaskStarLine {
                    from_task_id: from,
                    to_task_id: to,
                    dependency_type: DependencyType::SuccessOnly,
                })
                .unwrap();
        }

        orion.mark_task_completed(root_id, true, None, None);
        orion.mark_task_completed(a_id, false, None, Some("boom".to_string()));
        orion.mark_task_completed(b_id, true, None, None);

        assert_eq!(orion.tasks.get(&join_id).unwrap().status, TaskStatus::Pending);
        assert_eq!(orion.state, OrionState::PartiallyFailed);
    }

    /// A lone `CONDITIONAL` edge never dooms its downstream task: it is
    /// resolved out of band by the planning agent, not by predecessor
    /// status, so the task must stay reachable indefinitely.
    #[test]
    fn conditional_edge_never_marks_downstream_doomed() {
        let mut orion = Orion::new("conditional");
        let gate = TaskStar::new("gate", TaskPriority::Medium);
        let dependent = TaskStar::new("dependent", TaskPriority::Medium);
        let (gate_id, dependent_id) = (gate.task_id, dependent.task_id);
        orion.add_task(gate);
        orion.add_task(dependent);
        orion
            .add_dependency(TaskStarLine {
                from_task_id: gate_id,
                to_task_id: dependent_id,
                dependency_type: DependencyType::Conditional("manual".to_string()),
            })
            .unwrap();

        orion.mark_task_completed(gate_id, false, None, Some("boom".to_string()));

        assert!(!orion.doomed_tasks().contains(&dependent_id));
        assert!(!orion.is_complete());
    }
}
