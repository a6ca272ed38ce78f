//! Finished span data and the span exporter seam.

use std::borrow::Cow;
use std::time::SystemTime;

use crate::common::KeyValue;
use crate::export::Exporter;

use super::{ExceptionRecord, SpanContext, SpanId, Status};

/// Everything collected by a span, the input to span exporters.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// The identifying portion of the span.
    pub span_context: SpanContext,
    /// The parent span's id, [`SpanId::INVALID`] for root spans.
    pub parent_span_id: SpanId,
    /// The operation name.
    pub name: Cow<'static, str>,
    /// When the operation began.
    pub start_time: SystemTime,
    /// When the operation ended.
    pub end_time: SystemTime,
    /// The final status.
    pub status: Status,
    /// Attributes recorded during the operation.
    pub attributes: Vec<KeyValue>,
    /// Exceptions recorded during the operation.
    pub exceptions: Vec<ExceptionRecord>,
}

/// Protocol-specific span exporters implement this to plug into the
/// batch processor.
pub trait SpanExporter: Exporter<SpanData> {}

impl<E: Exporter<SpanData>> SpanExporter for E {}
