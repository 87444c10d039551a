use std::sync::Arc;

use async_trait::async_trait;
use derive_new::new;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIs, VariantArray};

use crate::{CancelToken, DependencyResults, StatusReport, TaskKey, Version};

/// Action kind discriminator.
///
/// The solver only uses kinds for per-kind concurrency ceilings and display;
/// all behavioral polymorphism lives behind the [`Task`] contract.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIs,
    Display,
    VariantArray,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    #[strum(serialize = "build")]
    Build,
    #[strum(serialize = "deploy")]
    Deploy,
    #[strum(serialize = "run")]
    Run,
    #[strum(serialize = "test")]
    Test,
}

/// Per-invocation context handed to `get_status`/`process`.
#[derive(Debug, Clone, new)]
pub struct TaskParams {
    /// Results of this task's declared dependencies. For `get_status` the
    /// lookup holds the status-dependency results; for `process` it holds
    /// the union of status- and process-dependency results.
    pub dependency_results: DependencyResults,
    pub cancel: CancelToken,
    pub force: bool,
}

pub type TaskRef = Arc<dyn Task>;

/// A unit of schedulable work.
///
/// Instances are immutable once handed to the solver; any private state a
/// handler mutates during `process` is invisible to scheduling. `key` is the
/// deduplication and cache identity within a resolution, `version` decides
/// cache validity, and the dependency resolvers declare edges of the graph.
#[async_trait]
pub trait Task: Send + Sync {
    fn kind(&self) -> TaskKind;

    fn key(&self) -> TaskKey;

    /// Disambiguating suffix for when the same key is processed more than
    /// once within one run. Purely informational.
    fn uid(&self) -> Option<String> {
        None
    }

    /// Human-readable identity used in logs and events.
    fn id(&self) -> String {
        match self.uid() {
            Some(uid) => format!("{}.{uid}", self.key()),
            None => self.key().to_string(),
        }
    }

    fn version(&self) -> Version;

    /// When true, the "already ready" short-circuit is skipped and the task
    /// is processed unconditionally.
    fn force(&self) -> bool {
        false
    }

    /// Tasks whose results must be known before this task's own readiness
    /// can be evaluated.
    fn resolve_status_dependencies(&self) -> Vec<TaskRef> {
        vec![]
    }

    /// Tasks that must have completed processing before this task may
    /// process.
    fn resolve_process_dependencies(&self) -> Vec<TaskRef> {
        vec![]
    }

    async fn get_status(
        &self,
        params: TaskParams,
    ) -> eyre::Result<StatusReport>;

    async fn process(&self, params: TaskParams) -> eyre::Result<StatusReport>;
}
