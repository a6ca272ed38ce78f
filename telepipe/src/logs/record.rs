//! Log records and severity.

use std::str::FromStr;
use std::time::SystemTime;

use crate::common::KeyValue;
use crate::trace::{SpanId, TraceFlags, TraceId};

/// The severity of a log record.
///
/// Numeric ranks follow the OTLP severity scale, leaving room between
/// the named levels; ordering comparisons respect the ranks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum Severity {
    /// Finest-grained tracing output.
    Trace = 1,
    /// Debugging detail.
    Debug = 5,
    /// Routine operational messages.
    Info = 9,
    /// Something unexpected but recoverable.
    Warn = 13,
    /// An operation failed.
    Error = 17,
    /// The process cannot continue.
    Fatal = 21,
}

impl Severity {
    /// The numeric rank of this severity.
    pub fn rank(self) -> i32 {
        self as i32
    }

    /// The conventional upper-case name of this severity.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

/// Parses the conventional level names, case-insensitively.
impl FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Severity::Trace),
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            "fatal" => Ok(Severity::Fatal),
            _ => Err(()),
        }
    }
}

/// A single log record, immutable once enriched and queued.
#[derive(Clone, Debug)]
pub struct LogRecord {
    /// When the record was created. Nanosecond resolution.
    pub timestamp: SystemTime,
    /// The record's severity.
    pub severity: Severity,
    /// The record body.
    pub body: String,
    /// Structured attributes: static resource attributes merged with
    /// call-site attributes, call-site keys winning on conflict.
    pub attributes: Vec<KeyValue>,
    /// The trace id of the span active at the call site, if any.
    pub trace_id: Option<TraceId>,
    /// The span id of the span active at the call site, if any.
    pub span_id: Option<SpanId>,
    /// The trace flags of the span active at the call site, if any.
    pub trace_flags: Option<TraceFlags>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities_are_ordered_by_rank() {
        assert!(Severity::Trace < Severity::Debug);
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
        assert_eq!(Severity::Info.rank(), 9);
        assert_eq!(Severity::Fatal.rank(), 21);
    }

    #[test]
    fn level_names_parse_case_insensitively() {
        assert_eq!("INFO".parse(), Ok(Severity::Info));
        assert_eq!("warning".parse(), Ok(Severity::Warn));
        assert_eq!("Fatal".parse(), Ok(Severity::Fatal));
        assert_eq!("verbose".parse::<Severity>(), Err(()));
    }
}
