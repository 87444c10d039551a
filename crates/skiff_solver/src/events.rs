use skiff_core::{TaskKey, TaskKind, TaskResult};

use crate::CancelReason;

/// Injected observer of task lifecycle transitions.
///
/// All callbacks fire from the solver's own loop, so a sink observes a
/// deterministic sequence consistent with the dependency partial order.
/// Every method defaults to a no-op; sinks override what they care about.
pub trait SolverEventSink: std::fmt::Debug + Send + Sync {
    fn on_pending(&self, _key: &TaskKey, _kind: TaskKind) {}

    fn on_status_check(&self, _key: &TaskKey) {}

    fn on_processing(&self, _key: &TaskKey) {}

    fn on_cache_hit(&self, _key: &TaskKey) {}

    fn on_complete(&self, _key: &TaskKey, _result: &TaskResult) {}

    fn on_error(&self, _key: &TaskKey, _error: &str) {}

    fn on_cancelled(&self, _key: &TaskKey, _reason: &CancelReason) {}
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl SolverEventSink for NullEventSink {}
