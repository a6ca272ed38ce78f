//! The log correlator.

use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::batch::BatchProcessor;
use crate::common::KeyValue;
use crate::context::Context;
use crate::resource::Resource;

use super::{LogRecord, Severity};

/// Emits enriched log records into the log batch processor.
///
/// Enrichment happens synchronously at the call site: the active span's
/// trace id, span id and trace flags are copied into the record, and the
/// static resource attributes are merged with the call-site attributes
/// (call-site keys win). Emission is fail-safe: `log` never returns an
/// error and never panics the caller; records that cannot be delivered
/// (after shutdown, or from a telemetry-suppressed scope) are counted on
/// a diagnostic counter instead.
///
/// Cloning a `Logger` is cheap; clones share the processor and counters.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

struct LoggerInner {
    processor: Arc<BatchProcessor<LogRecord>>,
    resource_attributes: Vec<KeyValue>,
    min_severity: Severity,
    faults: AtomicUsize,
}

impl Logger {
    pub(crate) fn new(
        processor: Arc<BatchProcessor<LogRecord>>,
        resource: &Resource,
        min_severity: Severity,
    ) -> Self {
        let mut resource_attributes = resource.to_key_values();
        resource_attributes.sort_by(|a, b| a.key.cmp(&b.key));
        Logger {
            inner: Arc::new(LoggerInner {
                processor,
                resource_attributes,
                min_severity,
                faults: AtomicUsize::new(0),
            }),
        }
    }

    /// Emit a log record. Records below the configured minimum severity
    /// are discarded; everything else is enriched and queued. Never
    /// raises to the caller.
    pub fn log(
        &self,
        severity: Severity,
        body: impl Into<String>,
        attributes: Vec<KeyValue>,
    ) {
        if severity < self.inner.min_severity {
            return;
        }
        // Records produced inside the pipeline's own export path would
        // loop back into the queue being drained.
        if Context::is_current_suppressed() {
            return;
        }

        let span_context = Context::map_current(Context::span_context);
        let record = LogRecord {
            timestamp: SystemTime::now(),
            severity,
            body: body.into(),
            attributes: self.merge_attributes(attributes),
            trace_id: span_context.map(|cx| cx.trace_id()),
            span_id: span_context.map(|cx| cx.span_id()),
            trace_flags: span_context.map(|cx| cx.trace_flags()),
        };
        if !self.inner.processor.enqueue(record) {
            self.inner.faults.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Static resource attributes first, then call-site attributes;
    /// a call-site key replaces the resource value for the same key.
    fn merge_attributes(&self, call_site: Vec<KeyValue>) -> Vec<KeyValue> {
        let mut merged = self.inner.resource_attributes.clone();
        for attribute in call_site {
            match merged.iter_mut().find(|kv| kv.key == attribute.key) {
                Some(existing) => existing.value = attribute.value,
                None => merged.push(attribute),
            }
        }
        merged
    }

    /// Emit at [`Severity::Trace`].
    pub fn trace(&self, body: impl Into<String>, attributes: Vec<KeyValue>) {
        self.log(Severity::Trace, body, attributes);
    }

    /// Emit at [`Severity::Debug`].
    pub fn debug(&self, body: impl Into<String>, attributes: Vec<KeyValue>) {
        self.log(Severity::Debug, body, attributes);
    }

    /// Emit at [`Severity::Info`].
    pub fn info(&self, body: impl Into<String>, attributes: Vec<KeyValue>) {
        self.log(Severity::Info, body, attributes);
    }

    /// Emit at [`Severity::Warn`].
    pub fn warn(&self, body: impl Into<String>, attributes: Vec<KeyValue>) {
        self.log(Severity::Warn, body, attributes);
    }

    /// Emit at [`Severity::Error`].
    pub fn error(&self, body: impl Into<String>, attributes: Vec<KeyValue>) {
        self.log(Severity::Error, body, attributes);
    }

    /// Emit at [`Severity::Fatal`].
    pub fn fatal(&self, body: impl Into<String>, attributes: Vec<KeyValue>) {
        self.log(Severity::Fatal, body, attributes);
    }

    /// Records that could not be delivered to the processor.
    pub fn faults(&self) -> usize {
        self.inner.faults.load(Ordering::Relaxed)
    }
}

impl Debug for Logger {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_severity", &self.inner.min_severity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchConfigBuilder;
    use crate::context::mark_span_as_active;
    use crate::logs::InMemoryLogExporter;
    use crate::trace::{Span, SpanContext, SpanId, TraceFlags, TraceId};
    use std::time::Duration;

    fn test_logger(min_severity: Severity) -> (Logger, InMemoryLogExporter, Arc<BatchProcessor<LogRecord>>) {
        let exporter = InMemoryLogExporter::default();
        let config = BatchConfigBuilder::default()
            .with_scheduled_delay(Duration::from_secs(60))
            .build();
        let processor = Arc::new(BatchProcessor::new(exporter.clone(), config, "logs"));
        let resource = Resource::builder_empty()
            .with_attribute(KeyValue::new("service.name", "test-service"))
            .with_attribute(KeyValue::new("service.version", "1.0.0"))
            .build();
        let logger = Logger::new(Arc::clone(&processor), &resource, min_severity);
        (logger, exporter, processor)
    }

    #[test]
    fn records_are_enriched_with_the_active_span() {
        let (logger, exporter, processor) = test_logger(Severity::Trace);
        let span_context = SpanContext::new(
            TraceId::from_u128(0xabc),
            SpanId::from_u64(0xdef),
            TraceFlags::SAMPLED,
        );
        {
            let _guard = mark_span_as_active(Span::new_non_recording(span_context));
            logger.info("correlated", vec![]);
        }
        logger.info("uncorrelated", vec![]);

        processor.force_flush().unwrap();
        let records = exporter.get_emitted_logs();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].trace_id, Some(TraceId::from_u128(0xabc)));
        assert_eq!(records[0].span_id, Some(SpanId::from_u64(0xdef)));
        assert_eq!(records[0].trace_flags, Some(TraceFlags::SAMPLED));
        assert_eq!(records[1].trace_id, None);
        processor.shutdown().unwrap();
    }

    #[test]
    fn call_site_attributes_win_over_resource_attributes() {
        let (logger, exporter, processor) = test_logger(Severity::Trace);
        logger.info(
            "merge",
            vec![
                KeyValue::new("service.version", "override"),
                KeyValue::new("request.id", "r-1"),
            ],
        );

        processor.force_flush().unwrap();
        let records = exporter.get_emitted_logs();
        let attributes = &records[0].attributes;
        assert!(attributes.contains(&KeyValue::new("service.name", "test-service")));
        assert!(attributes.contains(&KeyValue::new("service.version", "override")));
        assert!(attributes.contains(&KeyValue::new("request.id", "r-1")));
        assert_eq!(
            attributes
                .iter()
                .filter(|kv| kv.key.as_str() == "service.version")
                .count(),
            1
        );
        processor.shutdown().unwrap();
    }

    #[test]
    fn severity_filter_discards_quieter_records() {
        let (logger, exporter, processor) = test_logger(Severity::Warn);
        logger.debug("dropped", vec![]);
        logger.info("dropped", vec![]);
        logger.warn("kept", vec![]);
        logger.error("kept", vec![]);

        processor.force_flush().unwrap();
        let records = exporter.get_emitted_logs();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].severity, Severity::Warn);
        assert_eq!(records[1].severity, Severity::Error);
        processor.shutdown().unwrap();
    }

    #[test]
    fn logging_after_shutdown_is_swallowed_and_counted() {
        let (logger, exporter, processor) = test_logger(Severity::Trace);
        processor.shutdown().unwrap();

        logger.info("too late", vec![]);
        assert_eq!(logger.faults(), 1);
        assert!(exporter.get_emitted_logs().is_empty());
    }

    #[test]
    fn suppressed_scopes_emit_nothing() {
        let (logger, exporter, processor) = test_logger(Severity::Trace);
        {
            let _guard = Context::enter_suppressed_scope();
            logger.error("from the export path", vec![]);
        }
        processor.force_flush().unwrap();
        assert!(exporter.get_emitted_logs().is_empty());
        processor.shutdown().unwrap();
    }
}
