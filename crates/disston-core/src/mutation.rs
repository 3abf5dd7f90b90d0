//! Optimistic mutations with precise rollback.
//!
//! A mutation moves through
//! `Idle -> Optimistic -> (Success | RolledBack) -> Reconciling -> Settled`:
//! the cached entry is snapshotted and rewritten locally before the commit
//! is sent, restored from the snapshot if the commit fails, and invalidated
//! once the commit settles either way. Commits are sent once, never retried.
//!
//! Overlapping mutations on one key form a chain. Every rollback inside an
//! open chain restores the snapshot taken before the chain's first
//! mutation, so a late failure cannot resurrect another mutation's
//! optimistic write.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::cache::{CacheEntry, CacheStore, QueryKey};
use crate::query::{lock, QueryRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    Optimistic,
    Success,
    RolledBack,
    Reconciling,
    Settled,
}

pub type PhaseObserver = Arc<dyn Fn(&QueryKey, MutationPhase) + Send + Sync>;

/// Entry snapshot taken when a mutation goes optimistic. Consumed by
/// [`rollback`](Self::rollback) on failure, dropped on success.
#[derive(Debug)]
pub struct MutationContext<T> {
    key: QueryKey,
    snapshot: Arc<CacheEntry<T>>,
}

impl<T> MutationContext<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn snapshot(&self) -> &CacheEntry<T> {
        &self.snapshot
    }

    /// Write the snapshot back (data, status, error and staleness) as a new
    /// version. Returns that version.
    pub fn rollback(self, store: &CacheStore) -> u64 {
        let snapshot = self.snapshot;
        store.set::<T, _>(&self.key, move |_| CacheEntry::clone(&snapshot))
    }
}

struct Chain {
    pending: usize,
    snapshot: Arc<dyn Any + Send + Sync>,
}

/// Runs mutations against the entries of a [`QueryRunner`]'s store.
#[derive(Clone)]
pub struct MutationRunner {
    queries: QueryRunner,
    chains: Arc<Mutex<HashMap<QueryKey, Chain>>>,
    on_phase: Option<PhaseObserver>,
}

impl MutationRunner {
    pub fn new(queries: QueryRunner) -> Self {
        Self {
            queries,
            chains: Arc::new(Mutex::new(HashMap::new())),
            on_phase: None,
        }
    }

    /// Report every phase transition to `observer`.
    pub fn with_phase_observer(mut self, observer: impl Fn(&QueryKey, MutationPhase) + Send + Sync + 'static) -> Self {
        self.on_phase = Some(Arc::new(observer));
        self
    }

    pub fn store(&self) -> &CacheStore {
        self.queries.store()
    }

    /// Mutation on `key`: `apply` computes the optimistic data from the
    /// current data, `commit` performs the write. The commit's error is
    /// returned after the entry has been rolled back.
    pub async fn mutate<T, R, A, C, Fut>(&self, key: &QueryKey, apply: A, commit: C) -> Result<R, ApiError>
    where
        T: Clone + Send + Sync + 'static,
        A: FnOnce(Option<&T>) -> T,
        C: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<R, ApiError>>,
    {
        self.report(key, MutationPhase::Idle);

        // A fetch racing the optimistic write would overwrite it.
        self.queries.cancel::<T>(key);
        let context = self.open_chain::<T>(key);
        let guard = ChainGuard { runner: self, key };
        self.store()
            .set::<T, _>(key, |entry| entry.with_data(apply(entry.data())));
        self.report(key, MutationPhase::Optimistic);

        let result = commit(CancellationToken::new()).await;
        match &result {
            Ok(_) => {
                drop(context);
                self.report(key, MutationPhase::Success);
            }
            Err(err) => {
                warn!(key = %key, status = err.status(), code = ?err.code(), "Mutation failed, rolling back");
                context.rollback(self.store());
                self.report(key, MutationPhase::RolledBack);
            }
        }

        self.report(key, MutationPhase::Reconciling);
        drop(guard);
        self.report(key, MutationPhase::Settled);
        result
    }

    /// Mutation without a local transform: commit, then invalidate `key`
    /// whatever the outcome.
    pub async fn commit_and_invalidate<R, C, Fut>(&self, key: &QueryKey, commit: C) -> Result<R, ApiError>
    where
        C: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<R, ApiError>>,
    {
        self.report(key, MutationPhase::Idle);
        let result = commit(CancellationToken::new()).await;
        match &result {
            Ok(_) => self.report(key, MutationPhase::Success),
            Err(err) => warn!(key = %key, status = err.status(), code = ?err.code(), "Mutation failed"),
        }

        self.report(key, MutationPhase::Reconciling);
        self.store().invalidate(key);
        self.report(key, MutationPhase::Settled);
        result
    }

    /// Number of unresolved mutations on `key`.
    pub fn pending(&self, key: &QueryKey) -> usize {
        lock(&self.chains).get(key).map(|c| c.pending).unwrap_or(0)
    }

    fn open_chain<T>(&self, key: &QueryKey) -> MutationContext<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let current = self.store().get::<T>(key);
        let mut chains = lock(&self.chains);
        let chain = chains.entry(key.clone()).or_insert_with(|| Chain {
            pending: 0,
            snapshot: current.clone(),
        });
        chain.pending += 1;
        debug!(key = %key, pending = chain.pending, "Mutation chain opened");

        let snapshot = match chain.snapshot.clone().downcast::<CacheEntry<T>>() {
            Ok(snapshot) => snapshot,
            Err(_) => {
                warn!(key = %key, "Chain snapshot holds a different type, using current entry");
                current
            }
        };
        MutationContext {
            key: key.clone(),
            snapshot,
        }
    }

    fn close_chain(&self, key: &QueryKey) {
        let mut chains = lock(&self.chains);
        if let Some(chain) = chains.get_mut(key) {
            chain.pending = chain.pending.saturating_sub(1);
            if chain.pending == 0 {
                chains.remove(key);
            }
        }
    }

    fn report(&self, key: &QueryKey, phase: MutationPhase) {
        debug!(key = %key, ?phase, "Mutation phase");
        if let Some(observer) = &self.on_phase {
            observer(key, phase);
        }
    }
}

/// Closes the mutation's chain and reconciles the key, also when the
/// mutation future is dropped before the commit settles.
struct ChainGuard<'a> {
    runner: &'a MutationRunner,
    key: &'a QueryKey,
}

impl Drop for ChainGuard<'_> {
    fn drop(&mut self) {
        self.runner.close_chain(self.key);
        self.runner.store().invalidate(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn key() -> QueryKey {
        QueryKey::new(["players", "requests"])
    }

    fn runner() -> MutationRunner {
        let store = CacheStore::new();
        MutationRunner::new(QueryRunner::new(store, RetryPolicy::default(), Duration::ZERO))
    }

    fn seeded(runner: &MutationRunner, names: &[&str]) {
        let data: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        runner.store().set::<Vec<String>, _>(&key(), |e| e.succeeded(data));
    }

    fn without(name: &'static str) -> impl FnOnce(Option<&Vec<String>>) -> Vec<String> {
        move |data| data.into_iter().flatten().filter(|n| *n != name).cloned().collect()
    }

    fn names(runner: &MutationRunner) -> Vec<String> {
        runner.store().get::<Vec<String>>(&key()).data().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_optimistic_value_visible_before_commit() {
        let runner = runner();
        seeded(&runner, &["A", "B"]);
        let (release, gate) = oneshot::channel::<Result<(), ApiError>>();

        let task = {
            let runner = runner.clone();
            tokio::spawn(async move {
                runner
                    .mutate(&key(), without("B"), |_| async move { gate.await.expect("sender kept") })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(names(&runner), ["A"]);
        assert_eq!(runner.pending(&key()), 1);

        release.send(Ok(())).expect("receiver alive");
        task.await.expect("join").expect("commit ok");
        assert_eq!(names(&runner), ["A"]);
        assert_eq!(runner.pending(&key()), 0);
        assert!(runner.store().get::<Vec<String>>(&key()).is_stale);
    }

    #[tokio::test]
    async fn test_rollback_restores_snapshot() {
        let store = CacheStore::new();
        let restored = Arc::new(Mutex::new(None));
        let (reader, sink) = (store.clone(), restored.clone());
        let runner = MutationRunner::new(QueryRunner::new(store, RetryPolicy::default(), Duration::ZERO))
            .with_phase_observer(move |key, phase| {
                if phase == MutationPhase::RolledBack {
                    *sink.lock().expect("lock") = Some(reader.get::<Vec<String>>(key));
                }
            });
        seeded(&runner, &["A", "B"]);
        let before = runner.store().get::<Vec<String>>(&key());

        let result: Result<(), ApiError> = runner
            .mutate(&key(), without("B"), |_| async { Err(ApiError::new(500, "boom")) })
            .await;
        assert_eq!(result.map_err(|e| e.status()), Err(500));

        let after = restored.lock().expect("lock").clone().expect("rolled back");
        assert!(after.same_state(&before), "{:?} vs {:?}", after, before);
        assert_eq!(after.updated_at, before.updated_at);
        assert!(after.version > before.version);
        // Reconciliation then marks it for refetch
        assert!(runner.store().get::<Vec<String>>(&key()).is_stale);
    }

    #[tokio::test]
    async fn test_phases_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let runner = runner().with_phase_observer(move |_, phase| sink.lock().expect("lock").push(phase));
        seeded(&runner, &["A"]);

        let _ = runner
            .mutate(&key(), without("A"), |_| async { Ok::<_, ApiError>(()) })
            .await;
        let _ = runner
            .mutate(&key(), without("A"), |_| async { Err::<(), _>(ApiError::new(422, "invalid")) })
            .await;

        use MutationPhase::*;
        assert_eq!(
            *seen.lock().expect("lock"),
            [
                Idle, Optimistic, Success, Reconciling, Settled,
                Idle, Optimistic, RolledBack, Reconciling, Settled,
            ]
        );
    }

    #[tokio::test]
    async fn test_commit_is_not_retried() {
        let runner = runner();
        seeded(&runner, &["A"]);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), ApiError> = runner
            .mutate(&key(), without("A"), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::new(503, "unavailable")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chain_restores_first_snapshot() {
        let runner = runner();
        seeded(&runner, &["A", "B", "C"]);
        let (release_first, first_gate) = oneshot::channel::<Result<(), ApiError>>();
        let (release_second, second_gate) = oneshot::channel::<Result<(), ApiError>>();

        let first = {
            let runner = runner.clone();
            tokio::spawn(async move {
                runner
                    .mutate(&key(), without("B"), |_| async move { first_gate.await.expect("sender kept") })
                    .await
            })
        };
        tokio::task::yield_now().await;
        let second = {
            let runner = runner.clone();
            tokio::spawn(async move {
                runner
                    .mutate(&key(), without("C"), |_| async move { second_gate.await.expect("sender kept") })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(names(&runner), ["A"]);
        assert_eq!(runner.pending(&key()), 2);

        release_second
            .send(Err(ApiError::new(500, "boom")))
            .expect("receiver alive");
        assert!(second.await.expect("join").is_err());
        assert_eq!(names(&runner), ["A", "B", "C"]);

        release_first.send(Ok(())).expect("receiver alive");
        first.await.expect("join").expect("commit ok");
        assert_eq!(runner.pending(&key()), 0);
    }

    #[tokio::test]
    async fn test_commit_and_invalidate() {
        let runner = runner();
        seeded(&runner, &["A"]);
        let result = runner
            .commit_and_invalidate(&key(), |_| async { Ok::<_, ApiError>(5) })
            .await;
        assert_eq!(result, Ok(5));
        let entry = runner.store().get::<Vec<String>>(&key());
        assert!(entry.is_stale);
        assert_eq!(entry.data().map(Vec::len), Some(1));
    }
}
