use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, warn};

use super::entry::ErasedEntry;
use super::{CacheEntry, QueryKey};

pub type Listener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Notification delivered to a key's listeners after each write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Updated { version: u64 },
    Invalidated { version: u64 },
}

impl CacheEvent {
    pub fn version(&self) -> u64 {
        match self {
            CacheEvent::Updated { version } | CacheEvent::Invalidated { version } => *version,
        }
    }
}

#[derive(Default)]
struct Slot {
    entry: Option<Arc<dyn ErasedEntry>>,
    version: u64,
    listeners: Vec<(u64, Listener)>,
}

impl Slot {
    fn listeners(&self) -> Vec<Listener> {
        self.listeners.iter().map(|(_, l)| l.clone()).collect()
    }
}

struct StoreInner {
    slots: DashMap<QueryKey, Slot>,
    next_listener_id: AtomicU64,
}

/// Key-addressed store of query results: one authoritative entry per key.
///
/// Clone is cheap and every clone shares the same entries. Create one per
/// session and pass it to the runners.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                slots: DashMap::new(),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current snapshot for `key`; `Idle` if the key was never written.
    pub fn get<T>(&self, key: &QueryKey) -> Arc<CacheEntry<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let stored = self
            .inner
            .slots
            .get(key)
            .and_then(|slot| slot.entry.clone().map(|entry| (entry, slot.version)));

        match stored {
            Some((entry, version)) => downcast(key, entry).unwrap_or_else(|| idle_at(key, version)),
            None => idle_at(key, 0),
        }
    }

    /// Replace the entry for `key` with `updater(previous)`, bumping the
    /// version. Returns the new version.
    ///
    /// `updater` runs while the key is locked: it must be a pure transform
    /// and must not call back into the store.
    pub fn set<T, F>(&self, key: &QueryKey, updater: F) -> u64
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&CacheEntry<T>) -> CacheEntry<T>,
    {
        // Unconditional writes always apply
        self.write(key, None, updater).unwrap_or_default()
    }

    /// Like [`set`](Self::set), but only when the entry is still at
    /// `expected`; returns `None` (and leaves the entry alone) otherwise.
    pub fn set_if_version<T, F>(&self, key: &QueryKey, expected: u64, updater: F) -> Option<u64>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&CacheEntry<T>) -> CacheEntry<T>,
    {
        self.write(key, Some(expected), updater)
    }

    fn write<T, F>(&self, key: &QueryKey, expected: Option<u64>, updater: F) -> Option<u64>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&CacheEntry<T>) -> CacheEntry<T>,
    {
        let (version, listeners) = {
            let mut slot = self.inner.slots.entry(key.clone()).or_default();
            if let Some(expected) = expected {
                if slot.version != expected {
                    debug!(key = %key, expected, current = slot.version, "Skipping write on version mismatch");
                    return None;
                }
            }

            let previous = slot
                .entry
                .clone()
                .and_then(|entry| downcast::<T>(key, entry))
                .unwrap_or_else(|| idle_at(key, slot.version));

            let mut next = updater(&previous);
            let version = slot.version + 1;
            next.key = key.clone();
            next.version = version;
            slot.version = version;
            slot.entry = Some(Arc::new(next));
            (version, slot.listeners())
        };

        notify(&listeners, CacheEvent::Updated { version });
        Some(version)
    }

    /// Mark `key` stale and notify its listeners; active queries refetch,
    /// inactive ones refetch on their next subscription.
    pub fn invalidate(&self, key: &QueryKey) {
        let (version, listeners) = {
            let Some(mut slot) = self.inner.slots.get_mut(key) else {
                debug!(key = %key, "Invalidate on unknown key");
                return;
            };
            if let Some(entry) = slot.entry.clone() {
                let version = slot.version + 1;
                let stale = entry.stale_copy(version);
                slot.version = version;
                slot.entry = Some(stale);
            }
            (slot.version, slot.listeners())
        };

        debug!(key = %key, version, "Invalidated");
        notify(&listeners, CacheEvent::Invalidated { version });
    }

    /// Invalidate every key that starts with `prefix`.
    pub fn invalidate_matching(&self, prefix: &QueryKey) {
        for key in self.keys_matching(prefix) {
            self.invalidate(&key);
        }
    }

    /// Register `listener` for every `set`/`invalidate` of `key` until the
    /// returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, key: &QueryKey, listener: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .slots
            .entry(key.clone())
            .or_default()
            .listeners
            .push((id, Arc::new(listener)));

        Subscription {
            store: Arc::downgrade(&self.inner),
            key: key.clone(),
            id,
        }
    }

    /// Version of the entry for `key`, without knowing its type.
    pub fn version(&self, key: &QueryKey) -> u64 {
        self.inner.slots.get(key).map(|slot| slot.version).unwrap_or(0)
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner
            .slots
            .get(key)
            .map(|slot| slot.entry.is_some())
            .unwrap_or(false)
    }

    pub fn listener_count(&self, key: &QueryKey) -> usize {
        self.inner.slots.get(key).map(|slot| slot.listeners.len()).unwrap_or(0)
    }

    pub fn keys_matching(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        self.inner
            .slots
            .iter()
            .filter(|slot| slot.key().starts_with(prefix))
            .map(|slot| slot.key().clone())
            .collect()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("keys", &self.inner.slots.len())
            .finish()
    }
}

impl StoreInner {
    fn remove_listener(&self, key: &QueryKey, listener_id: u64) {
        // Dropped outside the shard lock: a listener's captures may touch the store.
        let removed: Vec<(u64, Listener)> = {
            let Some(mut slot) = self.slots.get_mut(key) else {
                return;
            };
            let (removed, kept) = std::mem::take(&mut slot.listeners)
                .into_iter()
                .partition(|(id, _)| *id == listener_id);
            slot.listeners = kept;
            removed
        };
        drop(removed);

        self.slots
            .remove_if(key, |_, slot| slot.entry.is_none() && slot.listeners.is_empty());
    }
}

/// Listener registration; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<StoreInner>,
    key: QueryKey,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner.remove_listener(&self.key, self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

fn notify(listeners: &[Listener], event: CacheEvent) {
    for listener in listeners {
        listener(&event);
    }
}

fn idle_at<T>(key: &QueryKey, version: u64) -> Arc<CacheEntry<T>> {
    let mut idle = CacheEntry::idle(key.clone());
    idle.version = version;
    Arc::new(idle)
}

fn downcast<T>(key: &QueryKey, entry: Arc<dyn ErasedEntry>) -> Option<Arc<CacheEntry<T>>>
where
    T: Clone + Send + Sync + 'static,
{
    match entry.into_any().downcast::<CacheEntry<T>>() {
        Ok(entry) => Some(entry),
        Err(_) => {
            warn!(key = %key, expected = std::any::type_name::<T>(), "Cache entry holds a different type");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryStatus;
    use std::sync::Mutex;

    fn roster() -> QueryKey {
        QueryKey::new(["players", "roster"])
    }

    #[test]
    fn test_get_unseen_key_is_idle() {
        let store = CacheStore::new();
        let entry = store.get::<Vec<String>>(&roster());
        assert_eq!(entry.status, QueryStatus::Idle);
        assert_eq!(entry.version, 0);
        assert!(!store.contains(&roster()));
    }

    #[test]
    fn test_set_increments_version() {
        let store = CacheStore::new();
        let v1 = store.set::<Vec<i32>, _>(&roster(), |e| e.succeeded(vec![1]));
        let v2 = store.set::<Vec<i32>, _>(&roster(), |e| {
            let mut data = e.data.clone().unwrap_or_default();
            data.push(2);
            e.succeeded(data)
        });
        assert_eq!((v1, v2), (1, 2));
        let entry = store.get::<Vec<i32>>(&roster());
        assert_eq!(entry.data(), Some(&vec![1, 2]));
        assert_eq!(entry.version, 2);
        assert_eq!(entry.key, roster());
    }

    #[test]
    fn test_readers_share_one_snapshot() {
        let store = CacheStore::new();
        store.set::<Vec<i32>, _>(&roster(), |e| e.succeeded(vec![1]));
        let a = store.get::<Vec<i32>>(&roster());
        let b = store.get::<Vec<i32>>(&roster());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_set_if_version() {
        let store = CacheStore::new();
        let v = store.set::<i32, _>(&roster(), |e| e.succeeded(1));
        assert_eq!(store.set_if_version::<i32, _>(&roster(), v + 5, |e| e.succeeded(9)), None);
        assert_eq!(store.get::<i32>(&roster()).data(), Some(&1));
        assert_eq!(store.set_if_version::<i32, _>(&roster(), v, |e| e.succeeded(2)), Some(v + 1));
    }

    #[test]
    fn test_invalidate_marks_stale_and_notifies() {
        let store = CacheStore::new();
        store.set::<i32, _>(&roster(), |e| e.succeeded(1));

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = store.subscribe(&roster(), move |event| sink.lock().expect("lock").push(*event));

        store.invalidate(&roster());
        let entry = store.get::<i32>(&roster());
        assert!(entry.is_stale);
        assert_eq!(entry.data(), Some(&1));
        assert_eq!(*events.lock().expect("lock"), vec![CacheEvent::Invalidated { version: 2 }]);
    }

    #[test]
    fn test_unsubscribe_releases_listener() {
        let store = CacheStore::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        let sub = store.subscribe(&roster(), move |_| *counter.lock().expect("lock") += 1);
        assert_eq!(store.listener_count(&roster()), 1);

        store.set::<i32, _>(&roster(), |e| e.succeeded(1));
        sub.unsubscribe();
        store.set::<i32, _>(&roster(), |e| e.succeeded(2));

        assert_eq!(*hits.lock().expect("lock"), 1);
        assert_eq!(store.listener_count(&roster()), 0);
    }

    #[test]
    fn test_listener_can_read_store() {
        let store = CacheStore::new();
        let seen = Arc::new(Mutex::new(None));
        let (reader, sink) = (store.clone(), seen.clone());
        let _sub = store.subscribe(&roster(), move |_| {
            *sink.lock().expect("lock") = reader.get::<i32>(&roster()).data().copied();
        });
        store.set::<i32, _>(&roster(), |e| e.succeeded(7));
        assert_eq!(*seen.lock().expect("lock"), Some(7));
    }

    #[test]
    fn test_invalidate_matching_prefix() {
        let store = CacheStore::new();
        let upcoming = QueryKey::new(["api", "matches", "upcoming"]);
        let recent = QueryKey::new(["api", "matches", "recent"]);
        let leagues = QueryKey::new(["api", "leagues"]);
        for key in [&upcoming, &recent, &leagues] {
            store.set::<i32, _>(key, |e| e.succeeded(1));
        }

        store.invalidate_matching(&QueryKey::new(["api", "matches"]));
        assert!(store.get::<i32>(&upcoming).is_stale);
        assert!(store.get::<i32>(&recent).is_stale);
        assert!(!store.get::<i32>(&leagues).is_stale);
    }

    #[test]
    fn test_type_mismatch_reads_idle() {
        let store = CacheStore::new();
        store.set::<i32, _>(&roster(), |e| e.succeeded(1));
        let entry = store.get::<String>(&roster());
        assert_eq!(entry.status, QueryStatus::Idle);
        assert_eq!(entry.version, 1);
    }
}
