use std::sync::Arc;

use skiff_core::{Task as _, TaskGraph, TaskRef};

use crate::{
    BatchEntry, BatchResult, NullEventSink, ResultCache, SolveConfig,
    SolverEventSink, SolverResult, error::SolverErrorInner, runner::Runner,
};

/// The graph solver: expands batches of tasks into dependency graphs and
/// drives them to settlement.
///
/// The result cache lives as long as the solver, so re-submitting an
/// unchanged batch is served without re-invoking any task.
#[derive(Debug)]
pub struct GraphSolver {
    config: SolveConfig,
    cache: Arc<ResultCache>,
    events: Arc<dyn SolverEventSink>,
}

impl GraphSolver {
    pub fn new(config: SolveConfig) -> Self {
        Self {
            config,
            cache: Arc::new(ResultCache::new()),
            events: Arc::new(NullEventSink),
        }
    }

    pub fn with_event_sink(
        mut self,
        events: Arc<dyn SolverEventSink>,
    ) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &SolveConfig {
        &self.config
    }

    /// Processes a batch of root tasks together with everything they
    /// transitively depend on.
    ///
    /// Cycle detection happens during expansion, before any task runs. The
    /// call resolves once every node reached a terminal state; with
    /// `throw_on_error` set, a batch containing failures is returned as a
    /// `TasksFailed` error that still carries every task's outcome.
    pub async fn process_tasks(
        &self,
        tasks: &[TaskRef],
    ) -> SolverResult<BatchResult> {
        if tasks.is_empty() {
            return Err(SolverErrorInner::EmptyBatch.into());
        }

        let start = std::time::Instant::now();
        let graph = TaskGraph::from_roots(tasks)?;
        tracing::debug!(
            roots = tasks.len(),
            tasks = graph.count(),
            "expanded task graph"
        );

        let runner = Runner::new(
            &graph,
            &self.config,
            self.cache.clone(),
            self.events.clone(),
        );
        let results = runner.run().await;

        tracing::info!(
            tasks = results.len(),
            failed = results.errored_keys().len(),
            elapsed = ?start.elapsed(),
            "batch settled"
        );

        if self.config.throw_on_error() {
            let failed = results.errored_keys().len();
            if failed > 0 {
                return Err(SolverErrorInner::TasksFailed {
                    failed,
                    total: results.len(),
                    results,
                }
                .into());
            }
        }

        Ok(results)
    }

    /// Convenience wrapper over a single-task batch.
    pub async fn process_task(
        &self,
        task: TaskRef,
    ) -> SolverResult<BatchEntry> {
        let key = task.key();
        let mut results =
            self.process_tasks(std::slice::from_ref(&task)).await?;

        results.remove(&key).ok_or_else(|| {
            SolverErrorInner::Unknown(eyre::eyre!(
                "result for task '{key}' missing from batch"
            ))
            .into()
        })
    }
}
