use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, SystemTime},
};

use derive_new::new;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIs};

use crate::TaskKey;

/// Values a task exposes to its dependants and to the caller.
pub type TaskOutputs = BTreeMap<String, serde_json::Value>;

/// Tri-state outcome of a status check or a processing call.
///
/// `NotReady` means "must be processed" and is distinct from `Error`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    EnumIs,
    Display,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    #[strum(serialize = "ready")]
    Ready,
    #[strum(serialize = "not-ready")]
    NotReady,
    #[strum(serialize = "error")]
    Error,
}

/// What a task handler reports back from `get_status` or `process`.
#[derive(Debug, Clone, new, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: TaskState,
    #[new(default)]
    pub outputs: TaskOutputs,
}

impl StatusReport {
    pub fn ready() -> Self {
        Self::new(TaskState::Ready)
    }

    pub fn ready_with(outputs: TaskOutputs) -> Self {
        Self {
            state: TaskState::Ready,
            outputs,
        }
    }

    pub fn not_ready() -> Self {
        Self::new(TaskState::NotReady)
    }
}

/// Terminal result of one task within a batch.
///
/// Owned by the solver until delivered; shared read-only afterwards.
#[derive(Debug, Clone, new, Serialize, Deserialize)]
pub struct TaskResult {
    pub state: TaskState,
    pub outputs: TaskOutputs,
    pub started_at: SystemTime,
    pub completed_at: SystemTime,
}

impl TaskResult {
    pub fn success(&self) -> bool {
        !self.state.is_error()
    }

    pub fn elapsed(&self) -> Duration {
        self.completed_at
            .duration_since(self.started_at)
            .unwrap_or(Duration::ZERO)
    }

    pub fn output(&self, name: &str) -> Option<&serde_json::Value> {
        self.outputs.get(name)
    }
}

/// Read-only lookup of dependency results, keyed by task key.
///
/// Passed into `get_status`/`process`; entries are `Arc`-shared with the
/// solver's own bookkeeping, so cloning the whole structure is cheap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyResults {
    results: HashMap<TaskKey, Arc<TaskResult>>,
}

impl DependencyResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: TaskKey, result: Arc<TaskResult>) {
        self.results.insert(key, result);
    }

    pub fn get(&self, key: &TaskKey) -> Option<&TaskResult> {
        self.results.get(key).map(Arc::as_ref)
    }

    pub fn outputs_of(&self, key: &TaskKey) -> Option<&TaskOutputs> {
        self.get(key).map(|r| &r.outputs)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskKey, &Arc<TaskResult>)> {
        self.results.iter()
    }

    /// Union of two lookups; entries in `other` win on key collision.
    pub fn merged_with(&self, other: &DependencyResults) -> DependencyResults {
        let mut results = self.results.clone();
        results.extend(
            other.results.iter().map(|(k, v)| (k.clone(), v.clone())),
        );
        Self { results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(state: TaskState) -> Arc<TaskResult> {
        let now = SystemTime::now();
        Arc::new(TaskResult::new(state, TaskOutputs::new(), now, now))
    }

    #[test]
    fn test_task_state_is_tri_state() {
        assert!(TaskState::Ready.is_ready());
        assert!(TaskState::NotReady.is_not_ready());
        assert!(!TaskState::NotReady.is_error());
        assert_eq!(TaskState::NotReady.to_string(), "not-ready");
    }

    #[test]
    fn test_dependency_results_lookup() {
        let mut deps = DependencyResults::new();
        deps.insert(TaskKey::from("a"), result(TaskState::Ready));

        assert_eq!(deps.len(), 1);
        assert!(deps.get(&TaskKey::from("a")).is_some());
        assert!(deps.get(&TaskKey::from("b")).is_none());
    }

    #[test]
    fn test_merged_with_prefers_other_on_collision() {
        let mut left = DependencyResults::new();
        left.insert(TaskKey::from("a"), result(TaskState::NotReady));

        let mut right = DependencyResults::new();
        right.insert(TaskKey::from("a"), result(TaskState::Ready));
        right.insert(TaskKey::from("b"), result(TaskState::Ready));

        let merged = left.merged_with(&right);
        assert_eq!(merged.len(), 2);
        assert!(
            merged
                .get(&TaskKey::from("a"))
                .is_some_and(|r| r.state.is_ready())
        );
    }
}
