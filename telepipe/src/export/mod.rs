//! Exporter seams and the OTLP-style HTTP implementation.
//!
//! A batch processor hands finished batches to an [`Exporter`]; the
//! metric reader pushes snapshots to a [`MetricsExporter`]. Protocol
//! details live behind the [`Codec`] seam so the engine never sees the
//! wire format.
//!
//! [`Codec`]: codec::Codec

use std::fmt::Debug;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::metrics::MetricsSnapshot;

pub mod codec;
pub mod otlp;

/// Describes the result of an export attempt.
pub type ExportResult = Result<(), ExportError>;

/// Failures reported by exporters. Transport and timeout failures are
/// transient and retried by the caller; the rest are terminal.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExportError {
    /// The transport failed to deliver the batch.
    #[error("transport error: {0}")]
    Transport(String),

    /// The collector rejected the request.
    #[error("collector returned status {0}")]
    Status(u16),

    /// The export attempt exceeded its deadline.
    #[error("export timed out after {0:?}")]
    Timeout(Duration),

    /// The batch could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// The exporter was already shut down.
    #[error("exporter already shut down")]
    Shutdown,
}

/// Sends batches of finished records to a destination.
///
/// The engine never calls `export` concurrently for the same exporter
/// and retries a failed batch by calling `export` again with the same
/// slice, so implementations need no internal retry logic. The returned
/// future must be `'static`: implementations either finish their work
/// before returning (the blocking HTTP transport) or copy what they
/// need from the batch (the in-memory test exporters).
pub trait Exporter<T>: Send + Debug {
    /// Serialize and transmit a batch of records.
    fn export(&mut self, batch: &[T]) -> BoxFuture<'static, ExportResult>;

    /// Release any resources held by the exporter. Called once, after
    /// the final batch has been exported.
    fn shutdown(&mut self) {}
}

impl<T, E: Exporter<T> + ?Sized> Exporter<T> for Box<E> {
    fn export(&mut self, batch: &[T]) -> BoxFuture<'static, ExportResult> {
        (**self).export(batch)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

/// Receives metric snapshots from the periodic reader.
pub trait MetricsExporter: Send + Debug {
    /// Serialize and transmit a snapshot.
    fn export(&mut self, snapshot: &MetricsSnapshot) -> BoxFuture<'static, ExportResult>;

    /// Release any resources held by the exporter.
    fn shutdown(&mut self) {}
}

impl<E: MetricsExporter + ?Sized> MetricsExporter for Box<E> {
    fn export(&mut self, snapshot: &MetricsSnapshot) -> BoxFuture<'static, ExportResult> {
        (**self).export(snapshot)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}
