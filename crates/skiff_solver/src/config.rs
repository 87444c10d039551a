use std::collections::HashMap;

use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use skiff_core::{CancelToken, TaskKind};

/// Options for one call to [`crate::GraphSolver::process_tasks`].
#[derive(Debug, Clone, Builder, Getters, CopyGetters)]
#[builder(setter(into, strip_option))]
pub struct SolveConfig {
    /// Maximum number of concurrently executing status/process calls across
    /// all task kinds. Defaults to `num_cpus::get() * 4`.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    max_concurrency: Option<usize>,

    /// Per-kind ceilings, enforced together with the global limit. A kind
    /// limit above the global limit is clamped to it.
    #[builder(default)]
    #[getset(get = "pub")]
    kind_limits: HashMap<TaskKind, usize>,

    /// If true, the batch call returns an error once every task has settled
    /// and at least one of them failed.
    #[builder(default = false)]
    #[getset(get_copy = "pub")]
    throw_on_error: bool,

    /// External abort handle. Tripping it stops new status/process calls;
    /// in-flight calls run to completion.
    #[builder(default)]
    #[getset(get = "pub")]
    cancellation: CancelToken,
}

impl SolveConfig {
    pub fn builder() -> SolveConfigBuilder {
        SolveConfigBuilder::default()
    }

    pub(crate) fn effective_global_limit(&self) -> usize {
        self.max_concurrency
            .unwrap_or_else(|| num_cpus::get() * 4)
            .max(1)
    }

    pub(crate) fn effective_kind_limit(&self, kind: TaskKind) -> Option<usize> {
        self.kind_limits
            .get(&kind)
            .map(|limit| (*limit).clamp(1, self.effective_global_limit()))
    }
}

impl SolveConfigBuilder {
    /// Sets the ceiling for one task kind, keeping others untouched.
    pub fn kind_limit(&mut self, kind: TaskKind, limit: usize) -> &mut Self {
        self.kind_limits
            .get_or_insert_with(HashMap::new)
            .insert(kind, limit);
        self
    }
}

impl Default for SolveConfig {
    fn default() -> Self {
        SolveConfigBuilder::default()
            .build()
            .expect("all config fields have defaults")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let config = SolveConfig::default();

        assert!(config.max_concurrency().is_none());
        assert!(config.effective_global_limit() >= 1);
        assert!(config.effective_kind_limit(TaskKind::Deploy).is_none());
        assert!(!config.throw_on_error());
    }

    #[test]
    fn test_kind_limit_is_clamped_to_global() {
        let config = SolveConfig::builder()
            .max_concurrency(4usize)
            .kind_limit(TaskKind::Deploy, 16)
            .kind_limit(TaskKind::Test, 2)
            .build()
            .unwrap();

        assert_eq!(config.effective_kind_limit(TaskKind::Deploy), Some(4));
        assert_eq!(config.effective_kind_limit(TaskKind::Test), Some(2));
        assert_eq!(config.effective_kind_limit(TaskKind::Build), None);
    }

    #[test]
    fn test_zero_limits_round_up_to_one() {
        let config = SolveConfig::builder()
            .max_concurrency(0usize)
            .kind_limit(TaskKind::Run, 0)
            .build()
            .unwrap();

        assert_eq!(config.effective_global_limit(), 1);
        assert_eq!(config.effective_kind_limit(TaskKind::Run), Some(1));
    }
}
