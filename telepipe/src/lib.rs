//! # Telepipe
//!
//! An in-process telemetry pipeline: collects traces, metrics and logs
//! from an application, buffers them in bounded queues, and exports
//! them in batches to an OTLP-style HTTP collector — without ever
//! blocking the instrumented application, and resilient to exporter
//! failures.
//!
//! The pipeline is assembled through [`TelemetryPipeline::builder`] or
//! installed process-wide with [`init`]:
//!
//! ```
//! use telepipe::{KeyValue, TelemetryConfig, TelemetryPipeline};
//! use telepipe::logs::InMemoryLogExporter;
//! use telepipe::metrics::InMemoryMetricsExporter;
//! use telepipe::trace::InMemorySpanExporter;
//!
//! let pipeline = TelemetryPipeline::builder(TelemetryConfig::default())
//!     .with_span_exporter(InMemorySpanExporter::default())
//!     .with_log_exporter(InMemoryLogExporter::default())
//!     .with_metrics_exporter(InMemoryMetricsExporter::default())
//!     .build()
//!     .expect("pipeline wiring");
//!
//! let tracer = pipeline.tracer();
//! tracer.in_span("handle-request", |_cx| {
//!     pipeline.logger().info("handling", vec![KeyValue::new("route", "/demo")]);
//! });
//!
//! pipeline.shutdown().expect("flush before exit");
//! ```
//!
//! Three signals, two delivery models:
//!
//! * **Push** — finished spans and log records flow through a bounded
//!   queue into a [`batch::BatchProcessor`], which cuts batches by size
//!   or age on a dedicated worker thread and retries failed exports
//!   with bounded backoff.
//! * **Pull** — metric instruments accumulate in the [`metrics::Meter`]
//!   registry; a [`metrics::PeriodicReader`] samples it on the export
//!   interval, which is also when observable-gauge callbacks run.
//!
//! Log records are correlated with the active span via the
//! execution-scoped [`Context`], which also isolates concurrent
//! requests from each other's spans.

#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![allow(clippy::needless_doctest_main)]

pub mod batch;
pub mod common;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod logs;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod resource;
pub mod retry;
pub mod trace;

mod macros;

pub use common::{Key, KeyValue, Value};
pub use config::TelemetryConfig;
pub use context::{get_active_span, mark_span_as_active, Context, ContextGuard};
pub use error::{SdkError, SdkResult};
pub use pipeline::{global, init, shutdown_global, TelemetryPipeline};
pub use resource::Resource;

#[cfg(feature = "internal-diagnostics")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
