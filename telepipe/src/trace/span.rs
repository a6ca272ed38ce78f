//! The recording span implementation.

use std::borrow::Cow;
use std::error::Error;
use std::sync::Arc;
use std::time::SystemTime;

use crate::batch::BatchProcessor;
use crate::common::KeyValue;

use super::{SpanContext, SpanData, SpanId, Status, TraceError};

/// An exception captured on a span: type, message and optional stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionRecord {
    /// The kind of failure, e.g. the error type's name.
    pub exception_type: String,
    /// The failure message.
    pub message: String,
    /// A rendered stack or cause chain, when one is available.
    pub stacktrace: Option<String>,
}

/// A timed record of one unit of work.
///
/// A span is mutable (attributes, status, exceptions) from creation
/// until [`end`] is called, at which point its data is handed to the
/// span processor and the span becomes inert. Unsampled spans carry only
/// their [`SpanContext`] so ids keep propagating to children and logs,
/// but record nothing.
///
/// Dropping an unended span ends it implicitly with the drop time.
///
/// [`end`]: Span::end
#[derive(Debug)]
pub struct Span {
    span_context: SpanContext,
    data: Option<SpanData>,
    processor: Option<Arc<BatchProcessor<SpanData>>>,
    ended: bool,
}

impl Span {
    pub(crate) fn new_recording(
        span_context: SpanContext,
        parent_span_id: SpanId,
        name: Cow<'static, str>,
        processor: Arc<BatchProcessor<SpanData>>,
    ) -> Self {
        let start_time = SystemTime::now();
        Span {
            span_context,
            data: Some(SpanData {
                span_context,
                parent_span_id,
                name,
                start_time,
                end_time: start_time,
                status: Status::Unset,
                attributes: Vec::new(),
                exceptions: Vec::new(),
            }),
            processor: Some(processor),
            ended: false,
        }
    }

    pub(crate) fn new_non_recording(span_context: SpanContext) -> Self {
        Span {
            span_context,
            data: None,
            processor: None,
            ended: false,
        }
    }

    /// The identifying portion of this span.
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// Whether the span is still recording. Unsampled and ended spans
    /// are not.
    pub fn is_recording(&self) -> bool {
        self.data.is_some()
    }

    /// Set a single attribute, overwriting an existing value for the
    /// same key.
    pub fn set_attribute(&mut self, attribute: KeyValue) {
        if let Some(data) = self.data.as_mut() {
            match data.attributes.iter_mut().find(|kv| kv.key == attribute.key) {
                Some(existing) => existing.value = attribute.value,
                None => data.attributes.push(attribute),
            }
        }
    }

    /// Set multiple attributes.
    pub fn set_attributes(&mut self, attributes: impl IntoIterator<Item = KeyValue>) {
        for attribute in attributes {
            self.set_attribute(attribute);
        }
    }

    /// Set the span status, overriding the default [`Status::Unset`].
    pub fn set_status(&mut self, status: Status) {
        if let Some(data) = self.data.as_mut() {
            data.status = status;
        }
    }

    /// Update the span's name.
    pub fn update_name(&mut self, name: impl Into<Cow<'static, str>>) {
        if let Some(data) = self.data.as_mut() {
            data.name = name.into();
        }
    }

    /// Record an exception on the span.
    ///
    /// This does not change the span status; call [`Span::set_status`]
    /// separately to mark the span as failed.
    pub fn record_exception(
        &mut self,
        exception_type: impl Into<String>,
        message: impl Into<String>,
        stacktrace: Option<String>,
    ) {
        if let Some(data) = self.data.as_mut() {
            data.exceptions.push(ExceptionRecord {
                exception_type: exception_type.into(),
                message: message.into(),
                stacktrace,
            });
        }
    }

    /// Record an error value as an exception, rendering its cause chain
    /// as the stack.
    pub fn record_error(&mut self, err: &dyn Error) {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        let stacktrace = if chain.is_empty() {
            None
        } else {
            Some(chain.join("\n"))
        };
        self.record_exception("Error", err.to_string(), stacktrace);
    }

    /// Signal that the operation described by this span has now ended.
    ///
    /// The finished span data is queued for export exactly once; ending
    /// an already-ended span is an [`TraceError::AlreadyEnded`] error
    /// and changes nothing.
    pub fn end(&mut self) -> Result<(), TraceError> {
        self.end_with_timestamp(SystemTime::now())
    }

    /// End the span with an explicit end time.
    pub fn end_with_timestamp(&mut self, timestamp: SystemTime) -> Result<(), TraceError> {
        if self.ended {
            return Err(TraceError::AlreadyEnded);
        }
        self.ended = true;
        if let (Some(mut data), Some(processor)) = (self.data.take(), self.processor.take()) {
            data.end_time = timestamp;
            processor.enqueue(data);
        }
        Ok(())
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if !self.ended {
            let _ = self.end();
        }
    }
}
