use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::SystemTime,
};

use futures::FutureExt as _;
use petgraph::graph::NodeIndex;
use skiff_core::{
    CancelToken, DepKind, DependencyResults, StatusReport, Task as _,
    TaskGraph, TaskKey, TaskKind, TaskNode, TaskParams, TaskResult,
};
use strum::Display;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};

use crate::{
    BatchEntry, BatchResult, CancelReason, SolveConfig, SolveOutcome,
    SolverEventSink,
    node::NodeState,
    result_cache::{CacheDecision, ExecutionClaim, ResultCache, SharedOutcome},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum Phase {
    #[strum(serialize = "status")]
    Status,
    #[strum(serialize = "process")]
    Process,
}

#[derive(Debug)]
enum NodeEvent {
    HandlerDone {
        idx: NodeIndex,
        phase: Phase,
        outcome: eyre::Result<StatusReport>,
        started_at: SystemTime,
        completed_at: SystemTime,
    },
    SharedSettled {
        idx: NodeIndex,
        outcome: SharedOutcome,
    },
    Aborted {
        idx: NodeIndex,
    },
}

enum Wake {
    Event(Option<NodeEvent>),
    Abort,
}

/// Drives one batch to settlement.
///
/// The runner exclusively owns all node state; workers only ever talk back
/// through the event channel, so no dispatch decision races another.
pub(crate) struct Runner<'a> {
    graph: &'a TaskGraph,
    cache: Arc<ResultCache>,
    events: Arc<dyn SolverEventSink>,
    cancel: CancelToken,
    states: Vec<NodeState>,
    results: HashMap<NodeIndex, Arc<TaskResult>>,
    errors: HashMap<NodeIndex, String>,
    cancel_reasons: HashMap<NodeIndex, CancelReason>,
    cache_hits: HashSet<NodeIndex>,
    claims: HashMap<NodeIndex, ExecutionClaim>,
    global_sem: Arc<Semaphore>,
    kind_sems: HashMap<TaskKind, Arc<Semaphore>>,
    tx: mpsc::UnboundedSender<NodeEvent>,
    rx: mpsc::UnboundedReceiver<NodeEvent>,
    in_flight: usize,
    abort_observed: bool,
}

impl<'a> Runner<'a> {
    pub(crate) fn new(
        graph: &'a TaskGraph,
        config: &'a SolveConfig,
        cache: Arc<ResultCache>,
        events: Arc<dyn SolverEventSink>,
    ) -> Self {
        let global_limit = config.effective_global_limit();
        let kind_sems = graph
            .node_indices()
            .map(|idx| graph.node(idx).kind())
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|kind| {
                config
                    .effective_kind_limit(kind)
                    .map(|limit| (kind, Arc::new(Semaphore::new(limit))))
            })
            .collect();

        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            states: vec![NodeState::Pending; graph.count()],
            results: HashMap::new(),
            errors: HashMap::new(),
            cancel_reasons: HashMap::new(),
            cache_hits: HashSet::new(),
            claims: HashMap::new(),
            global_sem: Arc::new(Semaphore::new(global_limit)),
            kind_sems,
            cancel: config.cancellation().clone(),
            graph,
            cache,
            events,
            tx,
            rx,
            in_flight: 0,
            abort_observed: false,
        }
    }

    pub(crate) async fn run(mut self) -> BatchResult {
        for idx in self.graph.node_indices() {
            let node = self.graph.node(idx);
            self.events.on_pending(node.key(), node.kind());
        }

        if self.cancel.is_cancelled() {
            self.observe_abort();
        }

        self.pump();

        let cancel = self.cancel.clone();
        while !self.settled() {
            let abort_observed = self.abort_observed;
            let wake = tokio::select! {
                ev = self.rx.recv() => Wake::Event(ev),
                _ = cancel.cancelled(), if !abort_observed => Wake::Abort,
            };

            match wake {
                Wake::Abort => self.observe_abort(),
                Wake::Event(Some(ev)) => self.handle_event(ev),
                // We hold a sender, so the channel can't close mid-run.
                Wake::Event(None) => break,
            }

            self.pump();
        }

        self.collect()
    }

    fn settled(&self) -> bool {
        self.in_flight == 0 && self.states.iter().all(NodeState::is_terminal)
    }

    fn state(&self, idx: NodeIndex) -> NodeState {
        self.states[idx.index()]
    }

    fn set_state(&mut self, idx: NodeIndex, state: NodeState) {
        self.states[idx.index()] = state;
    }

    /// Dispatches every node whose blocking dependencies are satisfied.
    fn pump(&mut self) {
        if self.abort_observed {
            return;
        }

        let indices: Vec<_> = self.graph.node_indices().collect();
        for idx in indices {
            match self.state(idx) {
                NodeState::Pending => self.try_start(idx),
                NodeState::AwaitingProcessDeps => self.try_process(idx),
                _ => {}
            }
        }
    }

    fn try_start(&mut self, idx: NodeIndex) {
        let ready = self
            .graph
            .direct_dependencies(idx, DepKind::Status)
            .into_iter()
            .all(|dep| self.state(dep).is_complete());
        if !ready {
            return;
        }

        let node = self.graph.node(idx).clone();
        match self.cache.lookup(node.key(), node.version(), node.force()) {
            CacheDecision::Hit(result) => {
                tracing::debug!(task = %node.key(), "result cache hit");
                self.events.on_cache_hit(node.key());
                self.finalize_complete(idx, result, true);
            }
            CacheDecision::Join(rx) => {
                tracing::debug!(
                    task = %node.key(),
                    "joining in-flight execution"
                );
                self.set_state(idx, NodeState::JoiningCache);
                self.in_flight += 1;
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let outcome = crate::result_cache::await_shared(rx).await;
                    let _ = tx.send(NodeEvent::SharedSettled { idx, outcome });
                });
            }
            CacheDecision::Claim(claim) => {
                self.claims.insert(idx, claim);
                self.set_state(idx, NodeState::CheckingStatus);
                self.events.on_status_check(node.key());
                let params = TaskParams::new(
                    self.dependency_results_for(idx, Some(DepKind::Status)),
                    self.cancel.clone(),
                    node.force(),
                );
                self.spawn_handler(idx, node, params, Phase::Status);
            }
        }
    }

    fn try_process(&mut self, idx: NodeIndex) {
        let ready = self
            .graph
            .direct_dependencies(idx, DepKind::Process)
            .into_iter()
            .all(|dep| self.state(dep).is_complete());
        if !ready {
            return;
        }

        let node = self.graph.node(idx).clone();
        self.set_state(idx, NodeState::Processing);
        self.events.on_processing(node.key());
        // Processing sees the union of status- and process-dependency
        // results.
        let params = TaskParams::new(
            self.dependency_results_for(idx, None),
            self.cancel.clone(),
            node.force(),
        );
        self.spawn_handler(idx, node, params, Phase::Process);
    }

    fn spawn_handler(
        &mut self,
        idx: NodeIndex,
        node: TaskNode,
        params: TaskParams,
        phase: Phase,
    ) {
        self.in_flight += 1;

        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        let global_sem = self.global_sem.clone();
        let kind_sem = self.kind_sems.get(&node.kind()).cloned();

        tokio::spawn(async move {
            let Some(_permits) =
                acquire_permits(kind_sem, global_sem, &cancel).await
            else {
                let _ = tx.send(NodeEvent::Aborted { idx });
                return;
            };

            let started_at = SystemTime::now();
            let call = match phase {
                Phase::Status => node.task().get_status(params),
                Phase::Process => node.task().process(params),
            };
            let outcome = std::panic::AssertUnwindSafe(call)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(eyre::eyre!("{phase} call panicked"))
                });
            let completed_at = SystemTime::now();

            let _ = tx.send(NodeEvent::HandlerDone {
                idx,
                phase,
                outcome,
                started_at,
                completed_at,
            });
        });
    }

    fn handle_event(&mut self, ev: NodeEvent) {
        match ev {
            NodeEvent::HandlerDone {
                idx,
                phase,
                outcome,
                started_at,
                completed_at,
            } => {
                self.in_flight -= 1;
                // A cascade may have cancelled the node while its call was
                // in flight; the late result is dropped.
                if self.state(idx).is_terminal() {
                    return;
                }
                self.handle_handler_done(
                    idx,
                    phase,
                    outcome,
                    started_at,
                    completed_at,
                );
            }
            NodeEvent::SharedSettled { idx, outcome } => {
                self.in_flight -= 1;
                if self.state(idx).is_terminal() {
                    return;
                }
                match outcome {
                    SharedOutcome::Completed(result) => {
                        self.finalize_complete(idx, result, true);
                    }
                    SharedOutcome::Failed(error) => {
                        self.finalize_error(idx, error);
                    }
                    SharedOutcome::Abandoned => {
                        let origin = self.graph.node(idx).key().clone();
                        self.finalize_cancelled(
                            idx,
                            CancelReason::new_aborted(),
                        );
                        self.cascade_cancel(idx, origin);
                    }
                }
            }
            NodeEvent::Aborted { idx } => {
                self.in_flight -= 1;
                if self.state(idx).is_terminal() {
                    return;
                }
                self.finalize_cancelled(idx, CancelReason::new_aborted());
            }
        }
    }

    fn handle_handler_done(
        &mut self,
        idx: NodeIndex,
        phase: Phase,
        outcome: eyre::Result<StatusReport>,
        started_at: SystemTime,
        completed_at: SystemTime,
    ) {
        let node = self.graph.node(idx);
        match (phase, outcome) {
            (Phase::Status, Ok(report)) => {
                if report.state.is_ready() && !node.force() {
                    // Already up to date; the status outputs stand in for
                    // processing outputs.
                    let result = Arc::new(TaskResult::new(
                        report.state,
                        report.outputs,
                        started_at,
                        completed_at,
                    ));
                    self.finalize_complete(idx, result, false);
                } else if self.abort_observed {
                    self.finalize_cancelled(idx, CancelReason::new_aborted());
                } else {
                    self.set_state(idx, NodeState::AwaitingProcessDeps);
                }
            }
            (Phase::Process, Ok(report)) => {
                if report.state.is_error() {
                    let error = format!(
                        "task '{}' reported state '{}' after processing",
                        node.key(),
                        report.state
                    );
                    let origin = node.key().clone();
                    self.finalize_error(idx, error);
                    self.cascade_cancel(idx, origin);
                } else {
                    let result = Arc::new(TaskResult::new(
                        report.state,
                        report.outputs,
                        started_at,
                        completed_at,
                    ));
                    self.finalize_complete(idx, result, false);
                }
            }
            (_, Err(e)) => {
                let origin = node.key().clone();
                self.finalize_error(idx, format!("{e:#}"));
                self.cascade_cancel(idx, origin);
            }
        }
    }

    fn finalize_complete(
        &mut self,
        idx: NodeIndex,
        result: Arc<TaskResult>,
        cache_hit: bool,
    ) {
        self.set_state(idx, NodeState::Complete);
        if cache_hit {
            self.cache_hits.insert(idx);
        }
        if let Some(claim) = self.claims.remove(&idx) {
            self.cache.complete(claim, result.clone());
        }
        self.results.insert(idx, result.clone());

        let node = self.graph.node(idx);
        tracing::debug!(task = %node.key(), cache_hit, "task complete");
        self.events.on_complete(node.key(), &result);
    }

    fn finalize_error(&mut self, idx: NodeIndex, error: String) {
        self.set_state(idx, NodeState::Errored);
        if let Some(claim) = self.claims.remove(&idx) {
            self.cache.fail(claim, error.clone());
        }

        let node = self.graph.node(idx);
        tracing::error!(task = %node.key(), error = %error, "task failed");
        self.events.on_error(node.key(), &error);
        self.errors.insert(idx, error);
    }

    fn finalize_cancelled(&mut self, idx: NodeIndex, reason: CancelReason) {
        self.set_state(idx, NodeState::Cancelled);
        if let Some(claim) = self.claims.remove(&idx) {
            self.cache.abandon(claim);
        }

        let node = self.graph.node(idx);
        tracing::warn!(task = %node.key(), reason = %reason, "task cancelled");
        self.events.on_cancelled(node.key(), &reason);
        self.cancel_reasons.insert(idx, reason);
    }

    /// Marks every non-terminal transitive dependant of `idx` as cancelled,
    /// without invoking it.
    fn cascade_cancel(&mut self, idx: NodeIndex, origin: TaskKey) {
        for dependant in self.graph.transitive_dependants(idx) {
            if self.state(dependant).is_terminal() {
                continue;
            }
            self.finalize_cancelled(
                dependant,
                CancelReason::new_dependency_failed(origin.clone()),
            );
        }
    }

    /// External abort: stop dispatching, cancel everything not yet running.
    /// Calls already in flight finish and have their results recorded.
    fn observe_abort(&mut self) {
        self.abort_observed = true;
        tracing::warn!("cancellation requested, abandoning pending tasks");

        let indices: Vec<_> = self.graph.node_indices().collect();
        for idx in indices {
            if matches!(
                self.state(idx),
                NodeState::Pending | NodeState::AwaitingProcessDeps
            ) {
                self.finalize_cancelled(idx, CancelReason::new_aborted());
            }
        }
    }

    /// Snapshot of dependency results for one node, filtered to one edge
    /// kind, or across both when `kind` is `None`.
    fn dependency_results_for(
        &self,
        idx: NodeIndex,
        kind: Option<DepKind>,
    ) -> DependencyResults {
        let deps = match kind {
            Some(kind) => self.graph.direct_dependencies(idx, kind),
            None => self.graph.dependencies_of(idx),
        };

        let mut results = DependencyResults::new();
        for dep in deps {
            if let Some(result) = self.results.get(&dep) {
                results.insert(
                    self.graph.node(dep).key().clone(),
                    result.clone(),
                );
            }
        }
        results
    }

    fn collect(self) -> BatchResult {
        let mut batch = BatchResult::new();

        for idx in self.graph.node_indices() {
            let outcome = match self.state(idx) {
                NodeState::Complete => SolveOutcome::new_completed(
                    self.results
                        .get(&idx)
                        .cloned()
                        .expect("complete node must have a result"),
                    self.cache_hits.contains(&idx),
                ),
                NodeState::Errored => SolveOutcome::new_errored(
                    self.errors
                        .get(&idx)
                        .cloned()
                        .unwrap_or_else(|| "unknown error".to_string()),
                ),
                _ => SolveOutcome::new_cancelled(
                    self.cancel_reasons
                        .get(&idx)
                        .cloned()
                        .unwrap_or_else(CancelReason::new_aborted),
                ),
            };

            let dependency_results = self.dependency_results_for(idx, None);
            let key = self.graph.node(idx).key().clone();
            batch.insert(key, BatchEntry::new(outcome, dependency_results));
        }

        batch
    }
}

/// Waits for a per-kind permit (when a ceiling is configured) and then a
/// global permit; both are held for the duration of one handler call.
/// Returns `None` when cancellation wins the race.
async fn acquire_permits(
    kind_sem: Option<Arc<Semaphore>>,
    global_sem: Arc<Semaphore>,
    cancel: &CancelToken,
) -> Option<(Option<OwnedSemaphorePermit>, OwnedSemaphorePermit)> {
    let kind_permit = match kind_sem {
        Some(sem) => Some(tokio::select! {
            _ = cancel.cancelled() => return None,
            permit = sem.acquire_owned() => {
                permit.expect("solver semaphores are never closed")
            }
        }),
        None => None,
    };

    let global_permit = tokio::select! {
        _ = cancel.cancelled() => return None,
        permit = global_sem.acquire_owned() => {
            permit.expect("solver semaphores are never closed")
        }
    };

    if cancel.is_cancelled() {
        return None;
    }

    Some((kind_permit, global_permit))
}
