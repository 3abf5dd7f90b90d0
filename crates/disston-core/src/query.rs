//! Query runner: cached, deduplicated, cancellable reads.
//!
//! A read for a key is fetched when its first observer attaches (or any
//! observer attaches to an idle, stale or expired entry) and again whenever
//! the key is invalidated while observed. At most one fetch per key is in
//! flight; later readers join it. Results are written with
//! [`CacheStore::set_if_version`], so a response that outlived its request
//! (cancelled, or superseded by a newer write) never lands in the cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::cache::{CacheEntry, CacheEvent, CacheStore, QueryKey, QueryStatus, Subscription};
use crate::retry::{with_retry, RetryPolicy};

/// Produces one attempt of a read. Called again for every retry.
pub type Fetcher<T> = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;

/// Wrap an async closure as a [`Fetcher`].
pub fn fetcher<T, F, Fut>(f: F) -> Fetcher<T>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
    Arc::new(move |cancel| f(cancel).boxed())
}

type FetchDone = Shared<BoxFuture<'static, ()>>;

struct InFlight {
    id: u64,
    token: CancellationToken,
    /// Status restored if the fetch is abandoned; never `Loading`.
    prior_status: QueryStatus,
    done: FetchDone,
}

/// What a spawned fetch needs to write (or abandon) its result.
struct PendingFetch {
    id: u64,
    /// Entry version written when the fetch went `Loading`.
    version: u64,
    prior_status: QueryStatus,
    token: CancellationToken,
}

struct Observed {
    count: usize,
    _invalidation: Subscription,
}

struct RunnerInner {
    store: CacheStore,
    retry: RetryPolicy,
    stale_time: Duration,
    next_fetch_id: AtomicU64,
    in_flight: Mutex<HashMap<QueryKey, InFlight>>,
    observers: Mutex<HashMap<QueryKey, Observed>>,
}

/// Executes reads into a [`CacheStore`]. Clone is cheap; clones share
/// in-flight fetches and observers.
///
/// Fetches run on spawned tasks, so the runner must be used from within a
/// tokio runtime.
#[derive(Clone)]
pub struct QueryRunner {
    inner: Arc<RunnerInner>,
}

impl QueryRunner {
    /// `stale_time` is how long a successful result is served to newly
    /// attaching observers without refetching.
    pub fn new(store: CacheStore, retry: RetryPolicy, stale_time: Duration) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                store,
                retry,
                stale_time,
                next_fetch_id: AtomicU64::new(1),
                in_flight: Mutex::new(HashMap::new()),
                observers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// Observe `key`, fetching with `fetcher` if the cached entry needs it.
    /// The returned handle keeps the key observed until dropped.
    pub fn query<T>(&self, key: QueryKey, fetcher: Fetcher<T>) -> QueryHandle<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let (tx, rx) = watch::channel(self.inner.store.version(&key));
        let watch = self.inner.store.subscribe(&key, move |event| {
            tx.send_replace(event.version());
        });

        self.attach(&key, &fetcher);

        QueryHandle {
            runner: self.clone(),
            key,
            fetcher,
            rx,
            _watch: watch,
        }
    }

    /// Fetch `key` now (joining a fetch already in flight) and return the
    /// resulting entry. Does not observe the key.
    pub async fn fetch<T>(&self, key: &QueryKey, fetcher: Fetcher<T>) -> Arc<CacheEntry<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.start_fetch(key, fetcher).await;
        self.inner.store.get(key)
    }

    /// Abort the in-flight fetch for `key`, if any. The entry goes back to
    /// its pre-fetch status, marked stale. Returns whether a fetch was
    /// cancelled.
    pub fn cancel<T>(&self, key: &QueryKey) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        let Some(flight) = lock(&self.inner.in_flight).remove(key) else {
            return false;
        };
        flight.token.cancel();

        let reverted = self.revert_orphaned::<T>(key, flight.prior_status);
        debug!(key = %key, reverted = reverted.is_some(), "Cancelled in-flight fetch");
        true
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        lock(&self.inner.in_flight).contains_key(key)
    }

    pub fn observer_count(&self, key: &QueryKey) -> usize {
        lock(&self.inner.observers).get(key).map(|o| o.count).unwrap_or(0)
    }

    /// Put an entry left `Loading` with no fetch behind it back to `prior`,
    /// marked stale.
    fn revert_orphaned<T>(&self, key: &QueryKey, prior: QueryStatus) -> Option<u64>
    where
        T: Clone + Send + Sync + 'static,
    {
        let current = self.inner.store.get::<T>(key);
        if !current.is_loading() || self.is_fetching(key) {
            return None;
        }
        // A fetch starting meanwhile bumps the version, so its `Loading` wins.
        self.inner
            .store
            .set_if_version::<T, _>(key, current.version, |entry| entry.reverted(prior))
    }

    fn needs_fetch<T>(&self, entry: &CacheEntry<T>) -> bool {
        entry.status == QueryStatus::Idle
            || entry.is_stale
            || self.inner.stale_time.is_zero()
            || entry.is_older_than(self.inner.stale_time)
    }

    fn attach<T>(&self, key: &QueryKey, fetcher: &Fetcher<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        {
            let mut observers = lock(&self.inner.observers);
            match observers.get_mut(key) {
                Some(observed) => observed.count += 1,
                None => {
                    let invalidation = self.subscribe_invalidation(key, fetcher.clone());
                    observers.insert(
                        key.clone(),
                        Observed {
                            count: 1,
                            _invalidation: invalidation,
                        },
                    );
                }
            }
        }

        let entry = self.inner.store.get::<T>(key);
        if self.needs_fetch(&entry) {
            // Runs on its own task; the handle observes the outcome.
            drop(self.start_fetch(key, fetcher.clone()));
        }
    }

    fn detach<T>(&self, key: &QueryKey)
    where
        T: Clone + Send + Sync + 'static,
    {
        let released = {
            let mut observers = lock(&self.inner.observers);
            let remaining = match observers.get_mut(key) {
                Some(observed) => {
                    observed.count = observed.count.saturating_sub(1);
                    observed.count
                }
                None => return,
            };
            if remaining == 0 {
                observers.remove(key)
            } else {
                None
            }
        };

        if let Some(observed) = released {
            drop(observed);
            if self.cancel::<T>(key) {
                debug!(key = %key, "Last observer detached mid-fetch");
            }
        }
    }

    /// The first observer's fetcher serves every invalidation-driven
    /// refetch while the key stays observed.
    fn subscribe_invalidation<T>(&self, key: &QueryKey, fetcher: Fetcher<T>) -> Subscription
    where
        T: Clone + Send + Sync + 'static,
    {
        let runner: Weak<RunnerInner> = Arc::downgrade(&self.inner);
        let target = key.clone();
        self.inner.store.subscribe(key, move |event| {
            if !matches!(event, CacheEvent::Invalidated { .. }) {
                return;
            }
            if let Some(inner) = runner.upgrade() {
                let runner = QueryRunner { inner };
                // An in-flight result predates the invalidation.
                runner.cancel::<T>(&target);
                drop(runner.start_fetch(&target, fetcher.clone()));
            }
        })
    }

    /// Join the fetch in flight for `key` or start one. The returned future
    /// resolves once the result (if any) has been written.
    fn start_fetch<T>(&self, key: &QueryKey, fetcher: Fetcher<T>) -> FetchDone
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut in_flight = lock(&self.inner.in_flight);
        if let Some(flight) = in_flight.get(key) {
            debug!(key = %key, "Joining in-flight fetch");
            return flight.done.clone();
        }

        let prior_status = self.inner.store.get::<T>(key).settled_status();
        let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let (finished, signal) = oneshot::channel::<()>();
        let done: FetchDone = async move {
            // Resolves on send or when the task is gone.
            let _ = signal.await;
        }
        .boxed()
        .shared();

        in_flight.insert(
            key.clone(),
            InFlight {
                id,
                token: token.clone(),
                prior_status,
                done: done.clone(),
            },
        );
        drop(in_flight);

        // Listeners may call back into the runner, so `Loading` is written
        // only after the in-flight lock is released.
        let version = self.inner.store.set::<T, _>(key, CacheEntry::loading);

        debug!(key = %key, version, "Fetch started");
        let runner = self.clone();
        let key = key.clone();
        let fetch = PendingFetch {
            id,
            version,
            prior_status,
            token,
        };
        tokio::spawn(async move {
            runner.run_fetch(key, fetch, fetcher).await;
            let _ = finished.send(());
        });

        done
    }

    async fn run_fetch<T>(self, key: QueryKey, fetch: PendingFetch, fetcher: Fetcher<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let PendingFetch {
            id,
            version,
            prior_status,
            token,
        } = fetch;
        let result = with_retry(&self.inner.retry, &token, |cancel| fetcher(cancel)).await;

        {
            let mut in_flight = lock(&self.inner.in_flight);
            if in_flight.get(&key).is_some_and(|flight| flight.id == id) {
                in_flight.remove(&key);
            }
        }

        if token.is_cancelled() || result.as_ref().is_err_and(ApiError::is_cancelled) {
            debug!(key = %key, "Fetch cancelled, result discarded");
            self.revert_orphaned::<T>(&key, prior_status);
            return;
        }

        let failed = result.as_ref().err().map(ApiError::status);
        let written = self.inner.store.set_if_version::<T, _>(&key, version, |entry| match result {
            Ok(data) => entry.succeeded(data),
            Err(err) => entry.failed(err),
        });
        match (written, failed) {
            (None, _) => {
                warn!(key = %key, version, "Dropping stale fetch result");
                self.revert_orphaned::<T>(&key, prior_status);
            }
            (Some(v), None) => debug!(key = %key, version = v, "Fetch succeeded"),
            (Some(v), Some(status)) => debug!(key = %key, version = v, status, "Fetch failed"),
        }
    }
}

/// Live view of one observed key. Dropping it detaches the observer; the
/// last detach cancels an in-flight fetch.
pub struct QueryHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    runner: QueryRunner,
    key: QueryKey,
    fetcher: Fetcher<T>,
    rx: watch::Receiver<u64>,
    _watch: Subscription,
}

impl<T> QueryHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Current snapshot.
    pub fn entry(&self) -> Arc<CacheEntry<T>> {
        self.runner.store().get(&self.key)
    }

    /// Wait for the next write to the entry and return it.
    pub async fn changed(&mut self) -> Arc<CacheEntry<T>> {
        // The sender lives as long as `_watch`, so this only fails after drop.
        let _ = self.rx.changed().await;
        self.entry()
    }

    /// Wait until the entry is no longer `Loading`.
    pub async fn settled(&mut self) -> Arc<CacheEntry<T>> {
        loop {
            let entry = self.entry();
            if !entry.is_loading() {
                return entry;
            }
            if self.rx.changed().await.is_err() {
                return self.entry();
            }
        }
    }

    /// Fetch again (joining a fetch already in flight) and return the result.
    pub async fn refetch(&self) -> Arc<CacheEntry<T>> {
        self.runner.fetch(&self.key, self.fetcher.clone()).await
    }
}

impl<T> Drop for QueryHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.runner.detach::<T>(&self.key);
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
