//! REST API access for the Disston City SC backend.
//!
//! This module provides the `Transport` seam with its reqwest-backed
//! `HttpTransport`, the normalized `ApiError`, and the typed `ClubApi`
//! endpoint functions built on top of them.
//!
//! Nothing here retries or caches; see `retry` and `query` for that.

pub mod client;
pub mod error;
pub mod transport;

pub use client::ClubApi;
pub use error::ApiError;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
