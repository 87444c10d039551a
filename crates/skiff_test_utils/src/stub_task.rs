use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use derive_builder::Builder;
use skiff_core::{
    StatusReport, Task, TaskKey, TaskKind, TaskOutputs, TaskParams, TaskRef,
    Version,
};

use crate::InvocationLog;

pub type HandlerFn = Arc<
    dyn Fn(&TaskParams) -> eyre::Result<StatusReport> + Send + Sync + 'static,
>;

/// Scriptable task for solver tests.
///
/// By default it reports `not-ready` from `get_status` and completes
/// `process` with an empty `ready` report; fixed reports, failure flags,
/// delays, and full closure overrides are available through the builder.
#[derive(Clone, Builder)]
#[builder(setter(into, strip_option))]
pub struct StubTask {
    key: TaskKey,

    #[builder(default = TaskKind::Build)]
    kind: TaskKind,

    #[builder(default = Version::from("v1"))]
    version: Version,

    #[builder(default = false)]
    force: bool,

    #[builder(default)]
    status_deps: Vec<TaskRef>,

    #[builder(default)]
    process_deps: Vec<TaskRef>,

    /// Fixed report returned by `get_status` when no closure is set.
    #[builder(default = StatusReport::not_ready())]
    status: StatusReport,

    /// Fixed report returned by `process` when no closure is set.
    #[builder(default = StatusReport::ready())]
    process: StatusReport,

    #[builder(default, setter(custom))]
    status_fn: Option<HandlerFn>,

    #[builder(default, setter(custom))]
    process_fn: Option<HandlerFn>,

    #[builder(default)]
    process_delay: Option<Duration>,

    #[builder(default = false)]
    fail_status: bool,

    #[builder(default = false)]
    fail_process: bool,

    #[builder(default)]
    log: Option<Arc<InvocationLog>>,
}

impl StubTaskBuilder {
    pub fn status_with(
        &mut self,
        f: impl Fn(&TaskParams) -> eyre::Result<StatusReport>
        + Send
        + Sync
        + 'static,
    ) -> &mut Self {
        self.status_fn = Some(Some(Arc::new(f)));
        self
    }

    pub fn process_with(
        &mut self,
        f: impl Fn(&TaskParams) -> eyre::Result<StatusReport>
        + Send
        + Sync
        + 'static,
    ) -> &mut Self {
        self.process_fn = Some(Some(Arc::new(f)));
        self
    }

    pub fn into_task(&mut self) -> TaskRef {
        Arc::new(self.build().expect("stub task misconfigured"))
    }
}

impl std::fmt::Debug for StubTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubTask")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Task for StubTask {
    fn kind(&self) -> TaskKind {
        self.kind
    }

    fn key(&self) -> TaskKey {
        self.key.clone()
    }

    fn version(&self) -> Version {
        self.version.clone()
    }

    fn force(&self) -> bool {
        self.force
    }

    fn resolve_status_dependencies(&self) -> Vec<TaskRef> {
        self.status_deps.clone()
    }

    fn resolve_process_dependencies(&self) -> Vec<TaskRef> {
        self.process_deps.clone()
    }

    async fn get_status(
        &self,
        params: TaskParams,
    ) -> eyre::Result<StatusReport> {
        if let Some(log) = &self.log {
            log.record_status(&self.key);
        }

        if self.fail_status {
            eyre::bail!("status check failed for task '{}'", self.key);
        }

        match &self.status_fn {
            Some(f) => f(&params),
            None => Ok(self.status.clone()),
        }
    }

    async fn process(&self, params: TaskParams) -> eyre::Result<StatusReport> {
        let _guard = self
            .log
            .as_ref()
            .map(|log| log.clone().begin_process(&self.key, self.kind));

        if let Some(delay) = self.process_delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_process {
            eyre::bail!("process failed for task '{}'", self.key);
        }

        match &self.process_fn {
            Some(f) => f(&params),
            None => Ok(self.process.clone()),
        }
    }
}

/// Builds a [`TaskOutputs`] map from literal entries.
pub fn outputs(entries: &[(&str, serde_json::Value)]) -> TaskOutputs {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
