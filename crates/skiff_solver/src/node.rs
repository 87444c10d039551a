use strum::{Display, EnumIs};

/// Per-batch state of one graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIs)]
pub(crate) enum NodeState {
    /// Waiting for status-dependencies to complete.
    #[strum(serialize = "pending")]
    Pending,
    /// A `get_status` call is in flight.
    #[strum(serialize = "checking-status")]
    CheckingStatus,
    /// Status said the task must be processed (or it is forced); waiting for
    /// process-dependencies to complete.
    #[strum(serialize = "awaiting-process-deps")]
    AwaitingProcessDeps,
    /// A `process` call is in flight.
    #[strum(serialize = "processing")]
    Processing,
    /// Awaiting an identical (key, version) execution started elsewhere.
    #[strum(serialize = "joining-cache")]
    JoiningCache,
    /// Terminal: produced a result.
    #[strum(serialize = "complete")]
    Complete,
    /// Terminal: the task's own call failed.
    #[strum(serialize = "errored")]
    Errored,
    /// Terminal: abandoned before completion.
    #[strum(serialize = "cancelled")]
    Cancelled,
}

impl NodeState {
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Complete | NodeState::Errored | NodeState::Cancelled
        )
    }
}
