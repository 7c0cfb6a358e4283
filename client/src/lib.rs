//! Client for the drug shortage reporting API.
//!
//! The upstream service is multi-tenant and rate limited per account, so the
//! client holds a pool of credentials and rotates through them whenever a
//! session is rejected or throttled. Transient failures are retried with
//! exponential backoff.

pub mod backoff;
pub mod client;
pub mod config;
pub mod errors;
pub mod metrics_defs;
pub mod types;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

pub use backoff::Backoff;
pub use client::ShortageClient;
pub use config::{ClientConfig, Credential};
pub use errors::ClientError;
pub use types::{Report, ReportKind, ReportQuery, SearchResponse, SortOrder};
