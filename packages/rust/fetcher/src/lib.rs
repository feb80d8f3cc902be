//! Two-phase report fetcher with retry/backoff.
//!
//! This crate provides:
//! - [`ArtifactSource`]: the seam the orchestrator drives, one call per item
//! - [`TwoPhaseFetcher`]: handle acquisition followed by artifact download
//! - [`RetryPolicy`]: attempt budget, exponential backoff, retryable statuses
//! - [`extract_handles`]: pulls the three render handles out of a report page

pub mod client;
pub mod error;
pub mod fetcher;
pub mod handles;
pub mod retry;

use std::future::Future;

use reportharvest_shared::WorkItem;

pub use client::build_client;
pub use error::{FetchFailure, Phase};
pub use fetcher::TwoPhaseFetcher;
pub use handles::{ReportHandles, extract_handles};
pub use retry::{AttemptError, RetryPolicy};

/// Source of rendered spreadsheet artifacts, one per work item.
///
/// Implementations classify their own failures; the orchestrator only maps a
/// [`FetchFailure`] to a permanent or transient outcome.
pub trait ArtifactSource: Send + Sync {
    /// Fetch the binary artifact for `item`.
    fn fetch(&self, item: &WorkItem) -> impl Future<Output = Result<Vec<u8>, FetchFailure>> + Send;
}
