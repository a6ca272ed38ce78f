//! Span creation and activation.

use std::borrow::Cow;
use std::sync::Arc;

use crate::batch::BatchProcessor;
use crate::context::Context;
use crate::diag_debug;

use super::{RandomIdGenerator, Sampler, Span, SpanContext, SpanData, SpanId, TraceFlags};

/// Creates spans and manages their activation.
///
/// Cloning a `Tracer` is cheap; clones share the span processor and
/// sampler.
#[derive(Clone, Debug)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

#[derive(Debug)]
struct TracerInner {
    processor: Arc<BatchProcessor<SpanData>>,
    sampler: Sampler,
    id_generator: RandomIdGenerator,
}

impl Tracer {
    pub(crate) fn new(processor: Arc<BatchProcessor<SpanData>>, sampler: Sampler) -> Self {
        Tracer {
            inner: Arc::new(TracerInner {
                processor,
                sampler,
                id_generator: RandomIdGenerator,
            }),
        }
    }

    /// Start a span whose parent is the active span of the current
    /// context, or a new root span when none is active.
    pub fn start(&self, name: impl Into<Cow<'static, str>>) -> Span {
        Context::map_current(|cx| self.start_with_context(name, cx))
    }

    /// Start a span with an explicitly provided parent context.
    ///
    /// A child inherits its parent's trace id and sampling verdict; a
    /// root span draws a fresh trace id and asks the sampler. Unsampled
    /// spans still carry valid ids so correlation and further nesting
    /// keep working, but they record nothing and are never exported.
    pub fn start_with_context(
        &self,
        name: impl Into<Cow<'static, str>>,
        parent_cx: &Context,
    ) -> Span {
        let span_id = self.inner.id_generator.new_span_id();
        match parent_cx.span_context().filter(SpanContext::is_valid) {
            Some(parent) => {
                let span_context =
                    SpanContext::new(parent.trace_id(), span_id, parent.trace_flags());
                if parent.is_sampled() {
                    Span::new_recording(
                        span_context,
                        parent.span_id(),
                        name.into(),
                        Arc::clone(&self.inner.processor),
                    )
                } else {
                    Span::new_non_recording(span_context)
                }
            }
            None => {
                let trace_id = self.inner.id_generator.new_trace_id();
                let sampled = self.inner.sampler.should_sample(trace_id);
                let trace_flags = if sampled {
                    TraceFlags::SAMPLED
                } else {
                    TraceFlags::default()
                };
                let span_context = SpanContext::new(trace_id, span_id, trace_flags);
                if sampled {
                    Span::new_recording(
                        span_context,
                        SpanId::INVALID,
                        name.into(),
                        Arc::clone(&self.inner.processor),
                    )
                } else {
                    Span::new_non_recording(span_context)
                }
            }
        }
    }

    /// Start a span, make it active for the duration of the closure and
    /// end it afterwards.
    pub fn in_span<F, R>(&self, name: impl Into<Cow<'static, str>>, f: F) -> R
    where
        F: FnOnce(&Context) -> R,
    {
        let span = self.start(name);
        let cx = Context::current_with_span(span);
        let _guard = cx.clone().attach();
        let result = f(&cx);
        if cx.span().end().is_err() {
            // The closure ended the span itself; nothing left to do.
            diag_debug!(name: "Tracer.InSpan.AlreadyEnded");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchConfigBuilder;
    use crate::common::KeyValue;
    use crate::context::get_active_span;
    use crate::trace::{InMemorySpanExporter, Status, TraceError};
    use std::time::Duration;

    fn test_tracer(sampler: Sampler) -> (Tracer, InMemorySpanExporter, Arc<BatchProcessor<SpanData>>) {
        let exporter = InMemorySpanExporter::default();
        let config = BatchConfigBuilder::default()
            .with_scheduled_delay(Duration::from_secs(60))
            .build();
        let processor = Arc::new(BatchProcessor::new(exporter.clone(), config, "traces"));
        (Tracer::new(Arc::clone(&processor), sampler), exporter, processor)
    }

    #[test]
    fn nested_spans_parent_under_the_active_span() {
        let (tracer, exporter, processor) = test_tracer(Sampler::AlwaysOn);

        tracer.in_span("outer", |outer_cx| {
            let outer_id = outer_cx.span_context().unwrap().span_id();
            tracer.in_span("inner", |inner_cx| {
                let inner = inner_cx.span_context().unwrap();
                let active = get_active_span(|span| *span.span_context());
                assert_eq!(active.span_id(), inner.span_id());
                assert_eq!(
                    inner.trace_id(),
                    outer_cx.span_context().unwrap().trace_id()
                );
            });
            // The inner span has ended; the outer span is active again.
            let active = get_active_span(|span| *span.span_context());
            assert_eq!(active.span_id(), outer_id);
        });

        processor.force_flush().unwrap();
        let spans = exporter.get_finished_spans();
        assert_eq!(spans.len(), 2);
        let inner = &spans[0];
        let outer = &spans[1];
        assert_eq!(inner.name, "inner");
        assert_eq!(outer.name, "outer");
        assert_eq!(inner.parent_span_id, outer.span_context.span_id());
        assert_eq!(outer.parent_span_id, SpanId::INVALID);
        assert_eq!(inner.span_context.trace_id(), outer.span_context.trace_id());
        processor.shutdown().unwrap();
    }

    #[test]
    fn span_mutations_are_exported() {
        let (tracer, exporter, processor) = test_tracer(Sampler::AlwaysOn);

        let mut span = tracer.start("work");
        span.set_attribute(KeyValue::new("operation.type", "data-processing"));
        span.set_attribute(KeyValue::new("operation.type", "re-processing"));
        span.set_status(Status::error("boom"));
        span.record_exception("SimulatedError", "boom", None);
        span.end().unwrap();

        processor.force_flush().unwrap();
        let spans = exporter.get_finished_spans();
        assert_eq!(spans.len(), 1);
        let data = &spans[0];
        assert_eq!(
            data.attributes,
            vec![KeyValue::new("operation.type", "re-processing")]
        );
        assert_eq!(data.status, Status::error("boom"));
        assert_eq!(data.exceptions.len(), 1);
        assert_eq!(data.exceptions[0].exception_type, "SimulatedError");
        processor.shutdown().unwrap();
    }

    #[test]
    fn ending_twice_is_an_invalid_state() {
        let (tracer, _exporter, processor) = test_tracer(Sampler::AlwaysOn);

        let mut span = tracer.start("once");
        span.end().unwrap();
        assert_eq!(span.end(), Err(TraceError::AlreadyEnded));
        processor.shutdown().unwrap();
    }

    #[test]
    fn dropping_an_unended_span_exports_it() {
        let (tracer, exporter, processor) = test_tracer(Sampler::AlwaysOn);

        drop(tracer.start("dropped"));
        processor.force_flush().unwrap();
        assert_eq!(exporter.get_finished_spans().len(), 1);
        processor.shutdown().unwrap();
    }

    #[test]
    fn unsampled_traces_propagate_ids_but_export_nothing() {
        let (tracer, exporter, processor) = test_tracer(Sampler::AlwaysOff);

        tracer.in_span("root", |root_cx| {
            let root = root_cx.span_context().unwrap();
            assert!(root.is_valid());
            assert!(!root.is_sampled());
            let child = tracer.start("child");
            assert!(!child.is_recording());
            assert_eq!(child.span_context().trace_id(), root.trace_id());
        });

        processor.force_flush().unwrap();
        assert!(exporter.get_finished_spans().is_empty());
        processor.shutdown().unwrap();
    }

    #[test]
    fn sampled_children_inherit_the_parent_verdict() {
        let (tracer, exporter, processor) = test_tracer(Sampler::AlwaysOn);

        tracer.in_span("root", |_cx| {
            tracer.in_span("child", |child_cx| {
                assert!(child_cx.span_context().unwrap().is_sampled());
            });
        });
        processor.force_flush().unwrap();
        assert_eq!(exporter.get_finished_spans().len(), 2);
        processor.shutdown().unwrap();
    }
}
