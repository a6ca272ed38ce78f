//! Execution-scoped context propagation.
//!
//! A [`Context`] carries the active span (and a telemetry-suppression
//! flag) across API boundaries within one logical execution unit.
//! Contexts are immutable; write operations return a new context.
//! [`Context::attach`] installs a context on the current thread and
//! returns a guard that restores the previous one on drop, so nested
//! spans restore their parent as the active span when they go out of
//! scope.
//!
//! The stack is thread-local: concurrent requests on different threads
//! never observe each other's active span. Work that hops threads must
//! pass the context explicitly and re-attach it.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::common::KeyValue;
use crate::diag_warn;
use crate::trace::{Span, SpanContext, Status, TraceError};

thread_local! {
    static CURRENT_CONTEXT: RefCell<ContextStack> = RefCell::new(ContextStack::default());
}

const NOOP_SPAN: ActiveSpan = ActiveSpan {
    span_context: SpanContext::NONE,
    inner: None,
};

/// The span occupying a context. The identifying part is immutable and
/// lock-free to read; mutation goes through the lock.
#[derive(Debug)]
pub(crate) struct ActiveSpan {
    span_context: SpanContext,
    inner: Option<Mutex<Span>>,
}

impl From<Span> for ActiveSpan {
    fn from(span: Span) -> Self {
        ActiveSpan {
            span_context: *span.span_context(),
            inner: Some(Mutex::new(span)),
        }
    }
}

/// A reference to the span of a context.
///
/// When the context has no span, every operation is a recognized no-op:
/// recording an exception or setting a status without an active span is
/// legal and does nothing.
#[derive(Debug)]
pub struct SpanRef<'a>(&'a ActiveSpan);

impl SpanRef<'_> {
    fn with_inner_mut<F: FnOnce(&mut Span)>(&self, f: F) {
        if let Some(inner) = &self.0.inner {
            if let Ok(mut locked) = inner.lock() {
                f(&mut locked);
            }
        }
    }

    /// The identifying portion of the span, [`SpanContext::NONE`] when
    /// no span is active.
    pub fn span_context(&self) -> &SpanContext {
        &self.0.span_context
    }

    /// Whether an active, still-recording span backs this reference.
    pub fn is_recording(&self) -> bool {
        self.0
            .inner
            .as_ref()
            .and_then(|inner| inner.lock().ok().map(|span| span.is_recording()))
            .unwrap_or(false)
    }

    /// Set an attribute on the active span.
    pub fn set_attribute(&self, attribute: KeyValue) {
        self.with_inner_mut(move |span| span.set_attribute(attribute));
    }

    /// Set multiple attributes on the active span.
    pub fn set_attributes(&self, attributes: impl IntoIterator<Item = KeyValue>) {
        self.with_inner_mut(move |span| span.set_attributes(attributes));
    }

    /// Set the status of the active span.
    pub fn set_status(&self, status: Status) {
        self.with_inner_mut(move |span| span.set_status(status));
    }

    /// Record an exception on the active span.
    pub fn record_exception(
        &self,
        exception_type: impl Into<String>,
        message: impl Into<String>,
        stacktrace: Option<String>,
    ) {
        let (exception_type, message) = (exception_type.into(), message.into());
        self.with_inner_mut(move |span| span.record_exception(exception_type, message, stacktrace));
    }

    /// Record an error value as an exception on the active span.
    pub fn record_error(&self, err: &dyn std::error::Error) {
        self.with_inner_mut(move |span| span.record_error(err));
    }

    /// End the active span. Ending an already-ended span fails with
    /// [`TraceError::AlreadyEnded`]; ending when no span is active is a
    /// no-op.
    pub fn end(&self) -> Result<(), TraceError> {
        match &self.0.inner {
            Some(inner) => match inner.lock() {
                Ok(mut span) => span.end(),
                Err(_) => Ok(()),
            },
            None => Ok(()),
        }
    }
}

/// An execution-scoped collection of telemetry state.
#[derive(Clone, Debug, Default)]
pub struct Context {
    span: Option<Arc<ActiveSpan>>,
    suppressed: bool,
}

impl Context {
    /// Creates an empty `Context`.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns a snapshot of the current thread's context.
    pub fn current() -> Self {
        Self::map_current(Clone::clone)
    }

    /// Applies a function to the current context without cloning it.
    pub fn map_current<T>(f: impl FnOnce(&Context) -> T) -> T {
        CURRENT_CONTEXT.with(|stack| stack.borrow().map_current_cx(f))
    }

    /// Returns a copy of this context with the given span installed as
    /// the active span.
    pub fn with_span(&self, span: Span) -> Self {
        Context {
            span: Some(Arc::new(span.into())),
            suppressed: self.suppressed,
        }
    }

    /// Returns a copy of the current context with the given span
    /// installed as the active span.
    pub fn current_with_span(span: Span) -> Self {
        Self::map_current(|cx| cx.with_span(span))
    }

    /// A reference to this context's span, or the no-op span when none
    /// is set.
    pub fn span(&self) -> SpanRef<'_> {
        match self.span.as_ref() {
            Some(span) => SpanRef(span),
            None => SpanRef(&NOOP_SPAN),
        }
    }

    /// Whether an active span has been set.
    pub fn has_active_span(&self) -> bool {
        self.span.is_some()
    }

    /// The identifying portion of the active span, if any.
    pub fn span_context(&self) -> Option<SpanContext> {
        self.span.as_ref().map(|span| span.span_context)
    }

    /// Replaces the current context on this thread with this context.
    /// Dropping the returned guard restores the previous context.
    pub fn attach(self) -> ContextGuard {
        let cx_pos = CURRENT_CONTEXT.with(|stack| stack.borrow_mut().push(self));
        ContextGuard {
            cx_pos,
            _marker: PhantomData,
        }
    }

    /// Whether telemetry is suppressed in this context.
    #[inline]
    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Returns a copy of this context with telemetry suppression enabled.
    pub fn with_suppressed(&self) -> Self {
        Context {
            span: self.span.clone(),
            suppressed: true,
        }
    }

    /// Enters a scope in which telemetry is suppressed.
    ///
    /// The pipeline's own worker threads run inside such a scope so that
    /// exporting telemetry can never generate new telemetry about the
    /// export itself and feed back into the queues.
    pub fn enter_suppressed_scope() -> ContextGuard {
        Self::map_current(Context::with_suppressed).attach()
    }

    /// Whether telemetry is suppressed in the current context.
    #[inline]
    pub fn is_current_suppressed() -> bool {
        Self::map_current(Context::is_suppressed)
    }
}

/// Executes a closure with a reference to the current thread's active
/// span.
pub fn get_active_span<F, T>(f: F) -> T
where
    F: FnOnce(SpanRef<'_>) -> T,
{
    Context::map_current(|cx| f(cx.span()))
}

/// Mark a span as the active span for the current thread.
///
/// Dropping the returned guard restores the previously active span, so
/// nested activations unwind to their parent.
#[must_use = "Dropping the guard detaches the context."]
pub fn mark_span_as_active(span: Span) -> ContextGuard {
    Context::current_with_span(span).attach()
}

/// A guard that resets the current context to the prior context when
/// dropped.
#[derive(Debug)]
pub struct ContextGuard {
    // Position of the replaced context in the stack.
    cx_pos: u16,
    // Rely on thread locals; the guard must not move threads.
    _marker: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let pos = self.cx_pos;
        if pos > ContextStack::BASE_POS && pos < ContextStack::MAX_POS {
            CURRENT_CONTEXT.with(|stack| stack.borrow_mut().pop_id(pos));
        }
    }
}

/// Tracks the contexts attached to the current thread.
///
/// Guards can be dropped out of order; only popping the top of the
/// stack actually restores a context, entries below are tombstoned and
/// reclaimed when the top is popped.
struct ContextStack {
    current_cx: Context,
    stack: Vec<Option<Context>>,
}

impl ContextStack {
    const BASE_POS: u16 = 0;
    const MAX_POS: u16 = u16::MAX;
    const INITIAL_CAPACITY: usize = 8;

    #[inline(always)]
    fn push(&mut self, cx: Context) -> u16 {
        // The next id is the stack length plus one, since the top of the
        // stack lives in `current_cx`.
        let next_pos = self.stack.len() + 1;
        if next_pos < ContextStack::MAX_POS.into() {
            let previous_cx = std::mem::replace(&mut self.current_cx, cx);
            self.stack.push(Some(previous_cx));
            next_pos as u16
        } else {
            diag_warn!(
                name: "Context.AttachFailed",
                message = "too many nested contexts; the current context is unchanged and the returned guard will have no effect"
            );
            ContextStack::MAX_POS
        }
    }

    #[inline(always)]
    fn pop_id(&mut self, pos: u16) {
        let len = self.stack.len() as u16;
        if pos == len {
            // Shrink the stack to clear out any out-of-order pops below.
            while let Some(None) = self.stack.last() {
                let _ = self.stack.pop();
            }
            if let Some(Some(previous_cx)) = self.stack.pop() {
                self.current_cx = previous_cx;
            }
        } else if pos < len {
            // Out-of-order drop: tombstone the entry.
            let _ = self.stack[pos as usize].take();
        } else {
            diag_warn!(
                name: "Context.PopOutOfBounds",
                position = pos,
                stack_length = len
            );
        }
    }

    #[inline(always)]
    fn map_current_cx<T>(&self, f: impl FnOnce(&Context) -> T) -> T {
        f(&self.current_cx)
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        ContextStack {
            current_cx: Context::default(),
            stack: Vec::with_capacity(ContextStack::INITIAL_CAPACITY),
        }
    }
}

impl fmt::Debug for ContextStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStack")
            .field("depth", &self.stack.len())
            .finish()
    }
}
