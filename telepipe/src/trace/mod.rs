//! Distributed tracing: spans, the tracer, sampling and span export.
//!
//! A [`Span`] is a timed record of one unit of work. Spans sharing a
//! trace id form one logical request's execution; the innermost unended
//! span in the current [`Context`] is the active span, and new spans
//! nest under it as children.
//!
//! [`Context`]: crate::context::Context

use std::fmt;

use thiserror::Error;

mod export;
mod id_generator;
mod in_memory_exporter;
mod sampler;
mod span;
mod tracer;

pub use export::{SpanData, SpanExporter};
pub use id_generator::RandomIdGenerator;
pub use in_memory_exporter::InMemorySpanExporter;
pub use sampler::Sampler;
pub use span::{ExceptionRecord, Span};
pub use tracer::Tracer;

/// Errors returned by span operations.
#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum TraceError {
    /// The span was already ended; its data has been handed off and can
    /// no longer change.
    #[error("span has already ended")]
    AlreadyEnded,
}

/// A 16-byte identifier shared by all spans of one trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    /// The invalid trace id, all zeroes.
    pub const INVALID: TraceId = TraceId(0);

    /// Construct a trace id from its integer representation.
    pub const fn from_u128(value: u128) -> Self {
        TraceId(value)
    }

    /// The integer representation of the id.
    pub const fn to_u128(self) -> u128 {
        self.0
    }

    /// Whether the id is non-zero.
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::LowerHex for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// An 8-byte identifier unique within one trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    /// The invalid span id, all zeroes. Used as the parent id of root
    /// spans.
    pub const INVALID: SpanId = SpanId(0);

    /// Construct a span id from its integer representation.
    pub const fn from_u64(value: u64) -> Self {
        SpanId(value)
    }

    /// The integer representation of the id.
    pub const fn to_u64(self) -> u64 {
        self.0
    }

    /// Whether the id is non-zero.
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::LowerHex for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Flags propagated alongside the span identifiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TraceFlags(u8);

impl TraceFlags {
    /// The span is part of a sampled trace and should be exported.
    pub const SAMPLED: TraceFlags = TraceFlags(0x01);

    /// Construct flags from their byte representation.
    pub const fn new(flags: u8) -> Self {
        TraceFlags(flags)
    }

    /// Whether the sampled flag is set.
    pub fn is_sampled(&self) -> bool {
        self.0 & TraceFlags::SAMPLED.0 != 0
    }

    /// The byte representation of the flags.
    pub const fn to_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for TraceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

/// The identifying portion of a span: trace id, span id and flags.
/// Immutable once created; shared by reference wherever the span is
/// active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    trace_flags: TraceFlags,
}

impl SpanContext {
    /// An invalid span context, used by the no-op span.
    pub const NONE: SpanContext = SpanContext {
        trace_id: TraceId::INVALID,
        span_id: SpanId::INVALID,
        trace_flags: TraceFlags::new(0),
    };

    /// Construct a span context.
    pub const fn new(trace_id: TraceId, span_id: SpanId, trace_flags: TraceFlags) -> Self {
        SpanContext {
            trace_id,
            span_id,
            trace_flags,
        }
    }

    /// The trace id shared by every span of this trace.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The id of this span.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// The propagated flags.
    pub fn trace_flags(&self) -> TraceFlags {
        self.trace_flags
    }

    /// Whether both ids are non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.is_valid()
    }

    /// Whether the trace this span belongs to is sampled.
    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }
}

/// The status of a finished span.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Status {
    /// The default status.
    #[default]
    Unset,
    /// The operation completed successfully.
    Ok,
    /// The operation failed.
    Error {
        /// A developer-facing description of the failure.
        description: String,
    },
}

impl Status {
    /// Construct an error status with the given description.
    pub fn error(description: impl Into<String>) -> Self {
        Status::Error {
            description: description.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_render_as_padded_hex() {
        assert_eq!(
            TraceId::from_u128(0x3b).to_string(),
            "0000000000000000000000000000003b"
        );
        assert_eq!(SpanId::from_u64(0x3b).to_string(), "000000000000003b");
    }

    #[test]
    fn invalid_ids_are_recognized() {
        assert!(!TraceId::INVALID.is_valid());
        assert!(!SpanId::INVALID.is_valid());
        assert!(!SpanContext::NONE.is_valid());
        assert!(TraceId::from_u128(1).is_valid());
    }

    #[test]
    fn sampled_flag_round_trips() {
        assert!(TraceFlags::SAMPLED.is_sampled());
        assert!(!TraceFlags::default().is_sampled());
        assert_eq!(TraceFlags::SAMPLED.to_string(), "01");
    }
}
