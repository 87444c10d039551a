use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use skiff_core::{TaskKey, TaskKind};

/// Shared recorder of handler invocations across a fixture's stub tasks.
///
/// Tracks per-key call counts, the order in which `process` calls started,
/// and per-kind in-flight high-water marks for concurrency assertions.
#[derive(Debug, Default)]
pub struct InvocationLog {
    inner: Mutex<LogInner>,
}

#[derive(Debug, Default)]
struct LogInner {
    status_calls: HashMap<TaskKey, usize>,
    process_calls: HashMap<TaskKey, usize>,
    process_order: Vec<TaskKey>,
    in_flight: HashMap<TaskKind, usize>,
    max_in_flight: HashMap<TaskKind, usize>,
}

impl InvocationLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_status(&self, key: &TaskKey) {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        *inner.status_calls.entry(key.clone()).or_default() += 1;
    }

    pub fn status_calls(&self, key: &TaskKey) -> usize {
        let inner = self.inner.lock().expect("log lock poisoned");
        inner.status_calls.get(key).copied().unwrap_or(0)
    }

    pub fn process_calls(&self, key: &TaskKey) -> usize {
        let inner = self.inner.lock().expect("log lock poisoned");
        inner.process_calls.get(key).copied().unwrap_or(0)
    }

    /// Keys in the order their `process` calls started.
    pub fn process_order(&self) -> Vec<TaskKey> {
        let inner = self.inner.lock().expect("log lock poisoned");
        inner.process_order.clone()
    }

    /// True when both keys were processed and `earlier` started first.
    pub fn process_started_before(
        &self,
        earlier: &TaskKey,
        later: &TaskKey,
    ) -> bool {
        let order = self.process_order();
        match (
            order.iter().position(|k| k == earlier),
            order.iter().position(|k| k == later),
        ) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    /// Highest number of simultaneously in-flight `process` calls observed
    /// for one kind.
    pub fn max_in_flight(&self, kind: TaskKind) -> usize {
        let inner = self.inner.lock().expect("log lock poisoned");
        inner.max_in_flight.get(&kind).copied().unwrap_or(0)
    }

    /// Registers the start of a `process` call; the returned guard marks its
    /// end when dropped.
    pub fn begin_process(
        self: Arc<Self>,
        key: &TaskKey,
        kind: TaskKind,
    ) -> ProcessGuard {
        {
            let mut inner = self.inner.lock().expect("log lock poisoned");
            *inner.process_calls.entry(key.clone()).or_default() += 1;
            inner.process_order.push(key.clone());

            let current = inner.in_flight.entry(kind).or_default();
            *current += 1;
            let current = *current;
            let max = inner.max_in_flight.entry(kind).or_default();
            *max = (*max).max(current);
        }

        ProcessGuard { log: self, kind }
    }
}

pub struct ProcessGuard {
    log: Arc<InvocationLog>,
    kind: TaskKind,
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let mut inner = self.log.inner.lock().expect("log lock poisoned");
        if let Some(current) = inner.in_flight.get_mut(&self.kind) {
            *current = current.saturating_sub(1);
        }
    }
}
