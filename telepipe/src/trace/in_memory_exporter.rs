//! An in-memory span exporter for testing and debugging.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::export::{ExportError, ExportResult, Exporter};

use super::SpanData;

/// Stores exported spans in memory.
///
/// Finished spans survive shutdown so that drain-on-shutdown behavior
/// can be asserted; call [`reset`] to clear between test cases.
///
/// [`reset`]: InMemorySpanExporter::reset
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
    shutdown_called: Arc<AtomicBool>,
}

impl InMemorySpanExporter {
    /// All spans exported so far, in export order.
    pub fn get_finished_spans(&self) -> Vec<SpanData> {
        self.spans
            .lock()
            .map(|spans| spans.clone())
            .unwrap_or_default()
    }

    /// Clears the stored spans.
    pub fn reset(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }

    /// Whether the processor shut this exporter down.
    pub fn is_shutdown_called(&self) -> bool {
        self.shutdown_called.load(Ordering::Relaxed)
    }
}

impl Exporter<SpanData> for InMemorySpanExporter {
    fn export(&mut self, batch: &[SpanData]) -> BoxFuture<'static, ExportResult> {
        let result = self
            .spans
            .lock()
            .map(|mut spans| spans.extend_from_slice(batch))
            .map_err(|err| ExportError::Transport(err.to_string()));
        Box::pin(std::future::ready(result))
    }

    fn shutdown(&mut self) {
        self.shutdown_called.store(true, Ordering::Relaxed);
    }
}
