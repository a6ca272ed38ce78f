//! Errors returned by pipeline lifecycle and export operations.

use std::time::Duration;
use thiserror::Error;

/// Result of a flush, shutdown or other pipeline-level operation.
pub type SdkResult = Result<(), SdkError>;

/// Errors surfaced by flush, shutdown and export plumbing.
///
/// Application-facing instrument calls never return this type; invalid
/// instrument use is reported through the signal-local error enums
/// ([`MetricError`], [`TraceError`]) without touching shared state.
///
/// [`MetricError`]: crate::metrics::MetricError
/// [`TraceError`]: crate::trace::TraceError
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SdkError {
    /// The operation was attempted after the component had already shut down.
    #[error("already shut down")]
    AlreadyShutdown,

    /// The operation did not complete within the allotted deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Any other failure, carried as a message.
    #[error("{0}")]
    InternalFailure(String),
}
