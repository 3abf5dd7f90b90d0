//! Disston City SC data-access layer.
//!
//! A resilient client for the club's REST API: a transport that normalizes
//! every failure into one [`ApiError`], bounded retry for reads, a
//! versioned in-memory cache, deduplicated cancellable queries, and
//! optimistic mutations with rollback and reconciliation.
//!
//! [`Club`] wires the pieces together for the club's endpoints.

pub mod api;
pub mod cache;
pub mod club;
pub mod config;
pub mod models;
pub mod mutation;
pub mod query;
pub mod retry;

pub use api::{ApiError, ApiRequest, ApiResponse, ClubApi, HttpTransport, Transport};
pub use cache::{CacheEntry, CacheEvent, CacheStore, KeyPart, QueryKey, QueryStatus, Subscription};
pub use club::{keys, Club};
pub use config::ClientConfig;
pub use mutation::{MutationContext, MutationPhase, MutationRunner};
pub use query::{fetcher, Fetcher, QueryHandle, QueryRunner};
pub use retry::{with_retry, RetryPolicy};
