//! An in-memory log exporter for testing and debugging.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::export::{ExportError, ExportResult, Exporter};

use super::LogRecord;

/// Stores exported log records in memory.
///
/// Records survive shutdown so that drain-on-shutdown behavior can be
/// asserted; call [`reset`] to clear between test cases.
///
/// [`reset`]: InMemoryLogExporter::reset
#[derive(Clone, Debug, Default)]
pub struct InMemoryLogExporter {
    records: Arc<Mutex<Vec<LogRecord>>>,
    shutdown_called: Arc<AtomicBool>,
}

impl InMemoryLogExporter {
    /// All records exported so far, in export order.
    pub fn get_emitted_logs(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Clears the stored records.
    pub fn reset(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }

    /// Whether the processor shut this exporter down.
    pub fn is_shutdown_called(&self) -> bool {
        self.shutdown_called.load(Ordering::Relaxed)
    }
}

impl Exporter<LogRecord> for InMemoryLogExporter {
    fn export(&mut self, batch: &[LogRecord]) -> BoxFuture<'static, ExportResult> {
        let result = self
            .records
            .lock()
            .map(|mut records| records.extend_from_slice(batch))
            .map_err(|err| ExportError::Transport(err.to_string()));
        Box::pin(std::future::ready(result))
    }

    fn shutdown(&mut self) {
        self.shutdown_called.store(true, Ordering::Relaxed);
    }
}
