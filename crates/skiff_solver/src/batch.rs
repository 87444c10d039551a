use std::{collections::HashMap, sync::Arc};

use derive_new::new;
use serde::{Deserialize, Serialize};
use skiff_core::{DependencyResults, TaskKey, TaskResult};
use strum::{Display, EnumIs};

/// Why a task was abandoned without being invoked.
#[derive(
    Debug, Clone, PartialEq, Eq, new, EnumIs, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum CancelReason {
    /// A direct or transitive dependency failed; `origin` is the task whose
    /// failure started the cascade.
    #[strum(to_string = "dependency '{origin}' failed")]
    DependencyFailed { origin: TaskKey },

    /// The caller aborted the whole batch.
    #[strum(to_string = "batch was aborted")]
    Aborted,
}

/// Terminal outcome of one task within a batch.
#[derive(Debug, Clone, new, EnumIs, Serialize, Deserialize)]
#[serde(tag = "status")]
#[serde(rename_all = "kebab-case")]
pub enum SolveOutcome {
    Completed {
        result: Arc<TaskResult>,
        cache_hit: bool,
    },
    Errored {
        error: String,
    },
    Cancelled {
        reason: CancelReason,
    },
}

impl SolveOutcome {
    pub fn result(&self) -> Option<&TaskResult> {
        match self {
            SolveOutcome::Completed { result, .. } => Some(result),
            SolveOutcome::Errored { .. } | SolveOutcome::Cancelled { .. } => {
                None
            }
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SolveOutcome::Errored { error } => Some(error),
            _ => None,
        }
    }

    pub fn cache_hit(&self) -> bool {
        matches!(self, SolveOutcome::Completed { cache_hit: true, .. })
    }

    pub fn cancel_reason(&self) -> Option<&CancelReason> {
        match self {
            SolveOutcome::Cancelled { reason } => Some(reason),
            _ => None,
        }
    }

    /// True for errors and for cancellations caused by a failed dependency.
    pub fn is_failure(&self) -> bool {
        match self {
            SolveOutcome::Errored { .. } => true,
            SolveOutcome::Cancelled { reason } => {
                reason.is_dependency_failed()
            }
            SolveOutcome::Completed { .. } => false,
        }
    }
}

/// One task's slice of a [`BatchResult`].
#[derive(Debug, Clone, new, Serialize, Deserialize)]
pub struct BatchEntry {
    pub outcome: SolveOutcome,
    /// Results of this task's declared dependencies, as its own handlers saw
    /// them.
    pub dependency_results: DependencyResults,
}

/// Outcome map for one batch, keyed by task key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    entries: HashMap<TaskKey, BatchEntry>,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, key: TaskKey, entry: BatchEntry) {
        self.entries.insert(key, entry);
    }

    pub fn get(&self, key: &TaskKey) -> Option<&BatchEntry> {
        self.entries.get(key)
    }

    pub fn outcome(&self, key: &TaskKey) -> Option<&SolveOutcome> {
        self.get(key).map(|e| &e.outcome)
    }

    pub fn remove(&mut self, key: &TaskKey) -> Option<BatchEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskKey, &BatchEntry)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TaskKey> {
        self.entries.keys()
    }

    /// Keys whose outcome is an error (cancellations excluded).
    pub fn errored_keys(&self) -> Vec<&TaskKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.outcome.is_errored())
            .map(|(k, _)| k)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use skiff_core::{TaskOutputs, TaskState};

    use super::*;

    fn completed() -> SolveOutcome {
        let now = SystemTime::now();
        SolveOutcome::new_completed(
            Arc::new(TaskResult::new(
                TaskState::Ready,
                TaskOutputs::new(),
                now,
                now,
            )),
            false,
        )
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = completed();
        assert!(ok.result().is_some());
        assert!(ok.error().is_none());
        assert!(!ok.is_failure());

        let err = SolveOutcome::new_errored("boom".to_string());
        assert_eq!(err.error(), Some("boom"));
        assert!(err.is_failure());

        let aborted = SolveOutcome::new_cancelled(CancelReason::new_aborted());
        assert!(!aborted.is_failure());

        let cascaded = SolveOutcome::new_cancelled(
            CancelReason::new_dependency_failed(TaskKey::from("a")),
        );
        assert!(cascaded.is_failure());
    }

    #[test]
    fn test_cancel_reason_display_names_origin() {
        let reason =
            CancelReason::new_dependency_failed(TaskKey::from("build.api"));
        assert_eq!(reason.to_string(), "dependency 'build.api' failed");
    }

    #[test]
    fn test_errored_keys_excludes_cancellations() {
        let mut batch = BatchResult::new();
        batch.insert(
            TaskKey::from("ok"),
            BatchEntry::new(completed(), DependencyResults::new()),
        );
        batch.insert(
            TaskKey::from("bad"),
            BatchEntry::new(
                SolveOutcome::new_errored("boom".to_string()),
                DependencyResults::new(),
            ),
        );
        batch.insert(
            TaskKey::from("skipped"),
            BatchEntry::new(
                SolveOutcome::new_cancelled(
                    CancelReason::new_dependency_failed(TaskKey::from("bad")),
                ),
                DependencyResults::new(),
            ),
        );

        assert_eq!(batch.errored_keys(), vec![&TaskKey::from("bad")]);
    }
}
