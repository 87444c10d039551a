use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::{
    Direction,
    algo::is_cyclic_directed,
    graph::{DiGraph, NodeIndex},
    visit::{Dfs, EdgeRef as _, IntoNeighborsDirected as _, Walker},
};
use strum::{Display, EnumDiscriminants, EnumIs, IntoDiscriminant as _};

use crate::{Task as _, TaskKey, TaskKind, TaskRef, Version};

/// Edge classification within the task graph.
///
/// A status edge gates the dependant's `get_status` call; a process edge
/// additionally gates its `process` call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumIs,
)]
pub enum DepKind {
    #[strum(serialize = "status")]
    Status,
    #[strum(serialize = "process")]
    Process,
}

/// One task plus the identity fields the solver reads on every dispatch
/// decision, cached out of the trait object.
#[derive(Clone)]
pub struct TaskNode {
    task: TaskRef,
    key: TaskKey,
    kind: TaskKind,
    version: Version,
    force: bool,
}

impl TaskNode {
    fn new(task: TaskRef) -> Self {
        Self {
            key: task.key(),
            kind: task.kind(),
            version: task.version(),
            force: task.force(),
            task,
        }
    }

    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn force(&self) -> bool {
        self.force
    }

    pub fn id(&self) -> String {
        self.task.id()
    }
}

impl std::fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

type InnerGraph = DiGraph<TaskNode, DepKind>;

macro_rules! filtered_graph {
    ($graph:expr, $dep_kind:expr) => {
        petgraph::visit::EdgeFiltered::from_fn($graph, |e| {
            *e.weight() == $dep_kind
        })
    };
}

/// The fully expanded dependency graph for one batch.
///
/// Nodes are addressed by index; edges run dependency → dependant so that
/// incoming neighbors of a node are its dependencies. Construction is pure:
/// expanding a batch touches no task handler.
#[derive(Debug, Default)]
pub struct TaskGraph {
    node_map: HashMap<TaskKey, NodeIndex>,
    di_graph: InnerGraph,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            node_map: HashMap::new(),
            di_graph: DiGraph::new(),
        }
    }

    /// Expands a batch of root tasks into the complete graph, deduplicating
    /// by key: two dependency paths reaching the same key share one node.
    ///
    /// Fails with a [`TaskGraphErrorKind::CycleDetected`] error describing
    /// the offending path if any task is reachable from itself.
    pub fn from_roots(roots: &[TaskRef]) -> TaskGraphResult<Self> {
        let mut graph = Self::new();
        let mut queue = VecDeque::new();

        for task in roots {
            graph.add_task(task.clone(), &mut queue);
        }

        while let Some(task) = queue.pop_front() {
            let dependant = graph.index_of(&task.key())?;

            for dep in task.resolve_status_dependencies() {
                let dep_idx = graph.add_task(dep, &mut queue);
                graph.add_edge(dep_idx, dependant, DepKind::Status)?;
            }

            for dep in task.resolve_process_dependencies() {
                let dep_idx = graph.add_task(dep, &mut queue);
                graph.add_edge(dep_idx, dependant, DepKind::Process)?;
            }
        }

        Ok(graph)
    }

    fn add_task(
        &mut self,
        task: TaskRef,
        queue: &mut VecDeque<TaskRef>,
    ) -> NodeIndex {
        let key = task.key();

        if let Some(idx) = self.node_map.get(&key) {
            return *idx;
        }

        let idx = self.di_graph.add_node(TaskNode::new(task.clone()));
        self.node_map.insert(key, idx);
        queue.push_back(task);

        idx
    }

    fn add_edge(
        &mut self,
        dependency: NodeIndex,
        dependant: NodeIndex,
        kind: DepKind,
    ) -> TaskGraphResult<()> {
        let duplicate = self
            .di_graph
            .edges_connecting(dependency, dependant)
            .any(|e| *e.weight() == kind);
        if duplicate {
            return Ok(());
        }

        let edge_idx = self.di_graph.add_edge(dependency, dependant, kind);

        if is_cyclic_directed(&self.di_graph) {
            self.di_graph.remove_edge(edge_idx);

            // The new edge closed a cycle, so a dependant → dependency path
            // already exists; report the full loop.
            let mut path: Vec<TaskKey> = self
                .find_path(dependant, dependency)
                .unwrap_or_else(|| vec![dependant, dependency])
                .into_iter()
                .map(|idx| self.di_graph[idx].key.clone())
                .collect();
            path.push(self.di_graph[dependant].key.clone());

            return Err(TaskGraphError::cycle_detected(path));
        }

        Ok(())
    }

    fn find_path(
        &self,
        from: NodeIndex,
        to: NodeIndex,
    ) -> Option<Vec<NodeIndex>> {
        let mut stack = vec![from];
        let mut seen = HashSet::from([from]);
        let mut parent = HashMap::new();

        while let Some(n) = stack.pop() {
            if n == to {
                let mut path = vec![to];
                let mut cur = to;
                while cur != from {
                    cur = parent[&cur];
                    path.push(cur);
                }
                path.reverse();
                return Some(path);
            }

            for next in
                self.di_graph.neighbors_directed(n, Direction::Outgoing)
            {
                if seen.insert(next) {
                    parent.insert(next, n);
                    stack.push(next);
                }
            }
        }

        None
    }

    #[inline(always)]
    pub fn count(&self) -> usize {
        self.di_graph.node_count()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    #[inline(always)]
    pub fn node(&self, idx: NodeIndex) -> &TaskNode {
        &self.di_graph[idx]
    }

    #[inline(always)]
    pub fn contains(&self, key: &TaskKey) -> bool {
        self.node_map.contains_key(key)
    }

    pub fn index_of(&self, key: &TaskKey) -> TaskGraphResult<NodeIndex> {
        self.node_map
            .get(key)
            .copied()
            .ok_or_else(|| TaskGraphError::task_not_found(key.clone()))
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.di_graph.node_indices()
    }

    /// Direct dependencies of a node over edges of one kind.
    pub fn direct_dependencies(
        &self,
        idx: NodeIndex,
        kind: DepKind,
    ) -> Vec<NodeIndex> {
        let graph = filtered_graph!(&self.di_graph, kind);

        let mut seen = HashSet::new();
        graph
            .neighbors_directed(idx, Direction::Incoming)
            .filter(|n| seen.insert(*n))
            .collect()
    }

    /// Direct dependencies over any edge kind, deduplicated.
    pub fn dependencies_of(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut seen = HashSet::new();
        self.di_graph
            .neighbors_directed(idx, Direction::Incoming)
            .filter(|n| seen.insert(*n))
            .collect()
    }

    /// Every node that transitively depends on `idx`, over any edge kind.
    /// `idx` itself is not included.
    pub fn transitive_dependants(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let dfs = Dfs::new(&self.di_graph, idx);

        dfs.iter(&self.di_graph).filter(|n| *n != idx).collect()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{inner}")]
pub struct TaskGraphError {
    kind: TaskGraphErrorKind,
    #[source]
    inner: TaskGraphErrorInner,
}

impl TaskGraphError {
    pub fn kind(&self) -> TaskGraphErrorKind {
        self.kind
    }

    /// The offending key sequence when the error is a detected cycle.
    pub fn cycle_path(&self) -> Option<&[TaskKey]> {
        match &self.inner {
            TaskGraphErrorInner::CycleDetected { path } => Some(path),
            _ => None,
        }
    }

    #[doc(hidden)]
    pub fn task_not_found(key: TaskKey) -> Self {
        TaskGraphErrorInner::TaskNotFound { key }.into()
    }

    #[doc(hidden)]
    pub fn cycle_detected(path: Vec<TaskKey>) -> Self {
        TaskGraphErrorInner::CycleDetected { path }.into()
    }
}

impl<T: Into<TaskGraphErrorInner>> From<T> for TaskGraphError {
    fn from(value: T) -> Self {
        let inner = value.into();
        let kind = inner.discriminant();
        Self { inner, kind }
    }
}

#[derive(Debug, thiserror::Error, EnumDiscriminants)]
#[strum_discriminants(name(TaskGraphErrorKind), vis(pub))]
enum TaskGraphErrorInner {
    #[error("task with key '{key}' not found in the graph")]
    TaskNotFound { key: TaskKey },

    #[error(
        "cycle detected through task dependencies: {}",
        display_cycle(.path)
    )]
    CycleDetected { path: Vec<TaskKey> },

    #[error(transparent)]
    Unknown(#[from] eyre::Report),
}

fn display_cycle(path: &[TaskKey]) -> String {
    path.iter()
        .map(TaskKey::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type TaskGraphResult<T> = Result<T, TaskGraphError>;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::{StatusReport, Task, TaskParams, Version};

    struct Node {
        key: &'static str,
        status_deps: Vec<TaskRef>,
        process_deps: Vec<TaskRef>,
    }

    fn leaf(key: &'static str) -> TaskRef {
        Arc::new(Node {
            key,
            status_deps: vec![],
            process_deps: vec![],
        })
    }

    fn with_deps(
        key: &'static str,
        status_deps: Vec<TaskRef>,
        process_deps: Vec<TaskRef>,
    ) -> TaskRef {
        Arc::new(Node {
            key,
            status_deps,
            process_deps,
        })
    }

    #[async_trait]
    impl Task for Node {
        fn kind(&self) -> TaskKind {
            TaskKind::Build
        }

        fn key(&self) -> TaskKey {
            TaskKey::from(self.key)
        }

        fn version(&self) -> Version {
            Version::from("v1")
        }

        fn resolve_status_dependencies(&self) -> Vec<TaskRef> {
            self.status_deps.clone()
        }

        fn resolve_process_dependencies(&self) -> Vec<TaskRef> {
            self.process_deps.clone()
        }

        async fn get_status(
            &self,
            _params: TaskParams,
        ) -> eyre::Result<StatusReport> {
            Ok(StatusReport::not_ready())
        }

        async fn process(
            &self,
            _params: TaskParams,
        ) -> eyre::Result<StatusReport> {
            Ok(StatusReport::ready())
        }
    }

    #[test]
    fn test_from_roots_expands_transitively() {
        let a = leaf("a");
        let b = with_deps("b", vec![], vec![a.clone()]);
        let c = with_deps("c", vec![], vec![b.clone()]);

        let graph = TaskGraph::from_roots(&[c]).unwrap();

        assert_eq!(graph.count(), 3);
        assert!(graph.contains(&TaskKey::from("a")));
        assert!(graph.contains(&TaskKey::from("b")));
        assert!(graph.contains(&TaskKey::from("c")));
    }

    #[test]
    fn test_same_key_shares_one_node() {
        // Diamond: d depends on b and c, both of which depend on a.
        let a = leaf("a");
        let b = with_deps("b", vec![], vec![a.clone()]);
        let c = with_deps("c", vec![], vec![a.clone()]);
        let d = with_deps("d", vec![], vec![b, c]);

        let graph = TaskGraph::from_roots(&[d]).unwrap();

        assert_eq!(graph.count(), 4);
        let a_idx = graph.index_of(&TaskKey::from("a")).unwrap();
        assert_eq!(graph.transitive_dependants(a_idx).len(), 3);
    }

    #[test]
    fn test_status_and_process_edges_are_distinct() {
        let a = leaf("a");
        let b = leaf("b");
        let c = with_deps("c", vec![a.clone()], vec![b.clone()]);

        let graph = TaskGraph::from_roots(&[c]).unwrap();
        let c_idx = graph.index_of(&TaskKey::from("c")).unwrap();

        let status = graph.direct_dependencies(c_idx, DepKind::Status);
        let process = graph.direct_dependencies(c_idx, DepKind::Process);

        assert_eq!(status.len(), 1);
        assert_eq!(process.len(), 1);
        assert_eq!(graph.node(status[0]).key(), &TaskKey::from("a"));
        assert_eq!(graph.node(process[0]).key(), &TaskKey::from("b"));
    }

    #[test]
    fn test_duplicate_edges_are_collapsed() {
        let a = leaf("a");
        let b = with_deps("b", vec![], vec![a.clone(), a.clone()]);

        let graph = TaskGraph::from_roots(&[b]).unwrap();
        let b_idx = graph.index_of(&TaskKey::from("b")).unwrap();

        assert_eq!(
            graph.direct_dependencies(b_idx, DepKind::Process).len(),
            1
        );
    }

    #[test]
    fn test_cycle_is_rejected_with_path() {
        struct Cyclic {
            key: &'static str,
            dep: &'static str,
        }

        #[async_trait]
        impl Task for Cyclic {
            fn kind(&self) -> TaskKind {
                TaskKind::Build
            }

            fn key(&self) -> TaskKey {
                TaskKey::from(self.key)
            }

            fn version(&self) -> Version {
                Version::from("v1")
            }

            fn resolve_process_dependencies(&self) -> Vec<TaskRef> {
                let dep = match self.dep {
                    "a" => Cyclic { key: "a", dep: "b" },
                    "b" => Cyclic { key: "b", dep: "c" },
                    _ => Cyclic { key: "c", dep: "a" },
                };
                vec![Arc::new(dep)]
            }

            async fn get_status(
                &self,
                _params: TaskParams,
            ) -> eyre::Result<StatusReport> {
                Ok(StatusReport::not_ready())
            }

            async fn process(
                &self,
                _params: TaskParams,
            ) -> eyre::Result<StatusReport> {
                Ok(StatusReport::ready())
            }
        }

        let root: TaskRef = Arc::new(Cyclic { key: "a", dep: "b" });
        let err = TaskGraph::from_roots(&[root]).unwrap_err();

        assert_eq!(err.kind(), TaskGraphErrorKind::CycleDetected);
        let path = err.cycle_path().expect("cycle error should carry a path");
        assert!(path.len() >= 3);
        assert_eq!(path.first(), path.last());
        assert!(err.to_string().contains(" -> "));
    }

    #[test]
    fn test_index_of_unknown_key_errors() {
        let graph = TaskGraph::from_roots(&[leaf("a")]).unwrap();
        let err = graph.index_of(&TaskKey::from("missing")).unwrap_err();

        assert_eq!(err.kind(), TaskGraphErrorKind::TaskNotFound);
    }
}
