use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use skiff_core::{TaskKey, TaskResult, Version};
use tokio::sync::watch;

/// What joiners of a shared execution observe once it settles.
#[derive(Debug, Clone)]
pub(crate) enum SharedOutcome {
    Completed(Arc<TaskResult>),
    Failed(String),
    Abandoned,
}

/// Exclusive right (and obligation) to execute one (key, version) pair.
///
/// The holder must settle the claim through [`ResultCache::complete`],
/// [`ResultCache::fail`] or [`ResultCache::abandon`]; joiners are parked on
/// the embedded channel until then.
#[derive(Debug)]
pub(crate) struct ExecutionClaim {
    key: TaskKey,
    version: Version,
    tx: watch::Sender<Option<SharedOutcome>>,
}

#[derive(Debug)]
pub(crate) enum CacheDecision {
    /// A completed result for an equal version exists; use it as-is.
    Hit(Arc<TaskResult>),
    /// An execution for this exact (key, version) is already in flight;
    /// await it instead of starting a duplicate.
    Join(watch::Receiver<Option<SharedOutcome>>),
    /// No usable entry; the caller executes and settles the claim.
    Claim(ExecutionClaim),
}

#[derive(Debug)]
enum EntryState {
    InFlight(watch::Receiver<Option<SharedOutcome>>),
    Done(Arc<TaskResult>),
}

#[derive(Debug)]
struct CacheEntry {
    version: Version,
    state: EntryState,
}

/// Process-lifetime result store keyed by task key.
///
/// Guarantees at-most-one in-flight execution per (key, version): a second
/// requester joins the first execution instead of starting its own, and a
/// completed entry for an equal version is served without invoking the task.
/// A differing version supersedes the old entry outright. `force` bypasses
/// the completed-entry short-circuit but never the in-flight deduplication.
///
/// Only successful results are retained: a failed or abandoned execution
/// resolves its joiners with the failure and clears the slot, so a later
/// submission retries.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<TaskKey, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lookup(
        &self,
        key: &TaskKey,
        version: &Version,
        force: bool,
    ) -> CacheDecision {
        let mut entries = self.entries.lock().expect("cache lock poisoned");

        if let Some(entry) = entries.get(key)
            && entry.version == *version
        {
            match &entry.state {
                EntryState::Done(result) if !force => {
                    return CacheDecision::Hit(result.clone());
                }
                EntryState::InFlight(rx) => {
                    return CacheDecision::Join(rx.clone());
                }
                EntryState::Done(_) => {}
            }
        }

        // Miss, forced re-execution, or a superseded version: this caller
        // becomes the executor.
        let (tx, rx) = watch::channel(None);
        entries.insert(
            key.clone(),
            CacheEntry {
                version: version.clone(),
                state: EntryState::InFlight(rx),
            },
        );

        CacheDecision::Claim(ExecutionClaim {
            key: key.clone(),
            version: version.clone(),
            tx,
        })
    }

    pub(crate) fn complete(
        &self,
        claim: ExecutionClaim,
        result: Arc<TaskResult>,
    ) {
        claim
            .tx
            .send_replace(Some(SharedOutcome::Completed(result.clone())));

        let mut entries = self.entries.lock().expect("cache lock poisoned");
        if let Some(entry) = entries.get_mut(&claim.key)
            && entry.version == claim.version
            && matches!(entry.state, EntryState::InFlight(_))
        {
            entry.state = EntryState::Done(result);
        }
    }

    pub(crate) fn fail(&self, claim: ExecutionClaim, error: String) {
        claim.tx.send_replace(Some(SharedOutcome::Failed(error)));
        self.clear_in_flight(&claim);
    }

    pub(crate) fn abandon(&self, claim: ExecutionClaim) {
        claim.tx.send_replace(Some(SharedOutcome::Abandoned));
        self.clear_in_flight(&claim);
    }

    fn clear_in_flight(&self, claim: &ExecutionClaim) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        if let Some(entry) = entries.get(&claim.key)
            && entry.version == claim.version
            && matches!(entry.state, EntryState::InFlight(_))
        {
            entries.remove(&claim.key);
        }
    }
}

/// Parks until the shared execution settles.
pub(crate) async fn await_shared(
    mut rx: watch::Receiver<Option<SharedOutcome>>,
) -> SharedOutcome {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome
            .clone()
            .expect("wait_for only returns once the outcome is set"),
        // The claim holder dropped without settling.
        Err(_) => SharedOutcome::Abandoned,
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use skiff_core::{TaskOutputs, TaskState};

    use super::*;

    fn result() -> Arc<TaskResult> {
        let now = SystemTime::now();
        Arc::new(TaskResult::new(
            TaskState::Ready,
            TaskOutputs::new(),
            now,
            now,
        ))
    }

    fn key() -> TaskKey {
        TaskKey::from("build.api")
    }

    fn v(s: &str) -> Version {
        Version::from(s)
    }

    fn claim(cache: &ResultCache, version: &Version) -> ExecutionClaim {
        match cache.lookup(&key(), version, false) {
            CacheDecision::Claim(claim) => claim,
            other => panic!("expected a claim, got {other:?}"),
        }
    }

    #[test]
    fn test_first_lookup_claims() {
        let cache = ResultCache::new();
        assert!(matches!(
            cache.lookup(&key(), &v("1"), false),
            CacheDecision::Claim(_)
        ));
    }

    #[test]
    fn test_in_flight_is_joined_even_when_forced() {
        let cache = ResultCache::new();
        let _claim = claim(&cache, &v("1"));

        assert!(matches!(
            cache.lookup(&key(), &v("1"), false),
            CacheDecision::Join(_)
        ));
        assert!(matches!(
            cache.lookup(&key(), &v("1"), true),
            CacheDecision::Join(_)
        ));
    }

    #[test]
    fn test_completed_entry_hits_until_forced() {
        let cache = ResultCache::new();
        let c = claim(&cache, &v("1"));
        cache.complete(c, result());

        assert!(matches!(
            cache.lookup(&key(), &v("1"), false),
            CacheDecision::Hit(_)
        ));
        // Force skips the short-circuit and starts a fresh execution.
        assert!(matches!(
            cache.lookup(&key(), &v("1"), true),
            CacheDecision::Claim(_)
        ));
    }

    #[test]
    fn test_new_version_supersedes_done_entry() {
        let cache = ResultCache::new();
        let c = claim(&cache, &v("1"));
        cache.complete(c, result());

        assert!(matches!(
            cache.lookup(&key(), &v("2"), false),
            CacheDecision::Claim(_)
        ));
        // The old version's entry is gone, not merged.
        assert!(matches!(
            cache.lookup(&key(), &v("1"), false),
            CacheDecision::Claim(_)
        ));
    }

    #[test]
    fn test_failed_execution_is_not_cached() {
        let cache = ResultCache::new();
        let c = claim(&cache, &v("1"));
        cache.fail(c, "boom".to_string());

        assert!(matches!(
            cache.lookup(&key(), &v("1"), false),
            CacheDecision::Claim(_)
        ));
    }

    #[tokio::test]
    async fn test_joiners_observe_the_settled_outcome() {
        let cache = ResultCache::new();
        let c = claim(&cache, &v("1"));

        let rx = match cache.lookup(&key(), &v("1"), false) {
            CacheDecision::Join(rx) => rx,
            other => panic!("expected join, got {other:?}"),
        };

        let waiter = tokio::spawn(await_shared(rx));
        cache.complete(c, result());

        assert!(matches!(
            waiter.await.expect("waiter panicked"),
            SharedOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_superseded_claim_still_resolves_its_joiners() {
        let cache = ResultCache::new();
        let old_claim = claim(&cache, &v("1"));
        let old_rx = match cache.lookup(&key(), &v("1"), false) {
            CacheDecision::Join(rx) => rx,
            other => panic!("expected join, got {other:?}"),
        };

        // A new version takes over the slot while the old execution runs.
        let _new_claim = claim(&cache, &v("2"));

        let waiter = tokio::spawn(await_shared(old_rx));
        cache.complete(old_claim, result());

        assert!(matches!(
            waiter.await.expect("waiter panicked"),
            SharedOutcome::Completed(_)
        ));
    }
}
