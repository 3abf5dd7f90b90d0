use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::QueryKey;
use crate::api::ApiError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryStatus {
    /// Never fetched.
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// Snapshot of one cached resource collection.
///
/// Entries are handed out as `Arc<CacheEntry<T>>` and never mutated in
/// place; the transform helpers below build the next entry for
/// [`CacheStore::set`](super::CacheStore::set). `key` and `version` are
/// stamped by the store on every write.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub key: QueryKey,
    pub data: Option<T>,
    pub status: QueryStatus,
    pub error: Option<ApiError>,
    pub version: u64,
    /// Set by invalidation; cleared by the next successful fetch.
    pub is_stale: bool,
    /// Time of the last data write.
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
    pub fn idle(key: QueryKey) -> Self {
        Self {
            key,
            data: None,
            status: QueryStatus::Idle,
            error: None,
            version: 0,
            is_stale: false,
            updated_at: None,
        }
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// `true` when there is no data, or the data was written more than
    /// `age` ago.
    pub fn is_older_than(&self, age: Duration) -> bool {
        match self.updated_at {
            None => true,
            Some(at) => {
                let elapsed = Utc::now() - at;
                // Clock skew counts as fresh
                elapsed.to_std().map(|e| e >= age).unwrap_or(false)
            }
        }
    }

    /// `status`, or for a `Loading` entry the status its contents imply.
    pub fn settled_status(&self) -> QueryStatus {
        match self.status {
            QueryStatus::Loading if self.error.is_some() => QueryStatus::Error,
            QueryStatus::Loading if self.data.is_some() => QueryStatus::Success,
            QueryStatus::Loading => QueryStatus::Idle,
            status => status,
        }
    }

    /// Data, status, error and staleness match; key, version and timestamp
    /// are bookkeeping.
    pub fn same_state(&self, other: &CacheEntry<T>) -> bool
    where
        T: PartialEq,
    {
        self.data == other.data
            && self.status == other.status
            && self.error == other.error
            && self.is_stale == other.is_stale
    }
}

impl<T: Clone> CacheEntry<T> {
    pub fn loading(&self) -> Self {
        Self {
            status: QueryStatus::Loading,
            ..self.clone()
        }
    }

    pub fn succeeded(&self, data: T) -> Self {
        Self {
            data: Some(data),
            status: QueryStatus::Success,
            error: None,
            is_stale: false,
            updated_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    /// Prior data is kept (stale-while-error).
    pub fn failed(&self, error: ApiError) -> Self {
        Self {
            status: QueryStatus::Error,
            error: Some(error),
            ..self.clone()
        }
    }

    /// Local write of `data` ahead of server confirmation.
    pub fn with_data(&self, data: T) -> Self {
        Self {
            data: Some(data),
            status: QueryStatus::Success,
            error: None,
            updated_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    /// Back to `status` after an abandoned fetch, flagged for refetch.
    pub fn reverted(&self, status: QueryStatus) -> Self {
        Self {
            status,
            is_stale: true,
            ..self.clone()
        }
    }

    pub fn marked_stale(&self) -> Self {
        Self {
            is_stale: true,
            ..self.clone()
        }
    }
}

/// Type-erased view the store keeps per key, so `invalidate` can work
/// without knowing `T`.
pub(crate) trait ErasedEntry: Send + Sync {
    fn stale_copy(&self, version: u64) -> Arc<dyn ErasedEntry>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T> ErasedEntry for CacheEntry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn stale_copy(&self, version: u64) -> Arc<dyn ErasedEntry> {
        let mut next = self.marked_stale();
        next.version = version;
        Arc::new(next)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> QueryKey {
        QueryKey::new(["players", "roster"])
    }

    #[test]
    fn test_idle_entry() {
        let entry: CacheEntry<Vec<i32>> = CacheEntry::idle(key());
        assert_eq!(entry.status, QueryStatus::Idle);
        assert!(entry.data().is_none());
        assert!(entry.is_older_than(Duration::from_secs(3600)));
    }

    #[test]
    fn test_failed_keeps_data() {
        let entry = CacheEntry::idle(key()).succeeded(vec![1, 2]);
        let failed = entry.failed(ApiError::new(500, "boom"));
        assert_eq!(failed.data(), Some(&vec![1, 2]));
        assert!(failed.is_error());
        assert_eq!(failed.error.as_ref().map(ApiError::status), Some(500));
    }

    #[test]
    fn test_succeeded_clears_error_and_staleness() {
        let entry = CacheEntry::idle(key())
            .failed(ApiError::new(503, "down"))
            .marked_stale()
            .succeeded(vec![3]);
        assert!(entry.is_success());
        assert!(entry.error.is_none());
        assert!(!entry.is_stale);
        assert!(!entry.is_older_than(Duration::from_secs(60)));
    }

    #[test]
    fn test_loading_preserves_data() {
        let entry = CacheEntry::idle(key()).succeeded(vec![1]).loading();
        assert!(entry.is_loading());
        assert_eq!(entry.data(), Some(&vec![1]));
    }

    #[test]
    fn test_settled_status_of_loading_entry() {
        let idle: CacheEntry<Vec<i32>> = CacheEntry::idle(key());
        assert_eq!(idle.loading().settled_status(), QueryStatus::Idle);
        let loaded = idle.succeeded(vec![1]);
        assert_eq!(loaded.loading().settled_status(), QueryStatus::Success);
        let failed = loaded.failed(ApiError::new(503, "down"));
        assert_eq!(failed.loading().settled_status(), QueryStatus::Error);
        assert_eq!(failed.settled_status(), QueryStatus::Error);
    }

    #[test]
    fn test_same_state_ignores_bookkeeping() {
        let a = CacheEntry::idle(key()).succeeded(vec![1]);
        let mut b = a.clone();
        b.version = 42;
        assert!(a.same_state(&b));
        assert!(!a.same_state(&a.marked_stale()));
    }
}
