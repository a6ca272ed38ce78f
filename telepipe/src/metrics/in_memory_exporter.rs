//! An in-memory metrics exporter for testing and debugging.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::export::{ExportError, ExportResult, MetricsExporter};

use super::MetricsSnapshot;

/// Stores exported snapshots in memory, one entry per export tick.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetricsExporter {
    snapshots: Arc<Mutex<Vec<MetricsSnapshot>>>,
    shutdown_called: Arc<AtomicBool>,
}

impl InMemoryMetricsExporter {
    /// All snapshots exported so far, in export order.
    pub fn get_snapshots(&self) -> Vec<MetricsSnapshot> {
        self.snapshots
            .lock()
            .map(|snapshots| snapshots.clone())
            .unwrap_or_default()
    }

    /// Clears the stored snapshots.
    pub fn reset(&self) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.clear();
        }
    }

    /// Whether the reader shut this exporter down.
    pub fn is_shutdown_called(&self) -> bool {
        self.shutdown_called.load(Ordering::Relaxed)
    }
}

impl MetricsExporter for InMemoryMetricsExporter {
    fn export(&mut self, snapshot: &MetricsSnapshot) -> BoxFuture<'static, ExportResult> {
        let result = self
            .snapshots
            .lock()
            .map(|mut snapshots| snapshots.push(snapshot.clone()))
            .map_err(|err| ExportError::Transport(err.to_string()));
        Box::pin(std::future::ready(result))
    }

    fn shutdown(&mut self) {
        self.shutdown_called.store(true, Ordering::Relaxed);
    }
}
