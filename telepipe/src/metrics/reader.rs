//! Periodic collection and export of metric snapshots.

use std::env;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::error::{SdkError, SdkResult};
use crate::export::MetricsExporter;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{diag_debug, diag_error};

use super::Meter;

/// Interval between two consecutive metric exports, in milliseconds.
pub(crate) const TELEPIPE_METRIC_EXPORT_INTERVAL: &str = "TELEPIPE_METRIC_EXPORT_INTERVAL";
pub(crate) const METRIC_EXPORT_INTERVAL_DEFAULT: Duration = Duration::from_secs(10);

enum ReaderMessage {
    Flush(SyncSender<SdkResult>),
    Shutdown(SyncSender<SdkResult>),
}

/// Collects a snapshot from the [`Meter`] on a fixed interval and
/// pushes it to a [`MetricsExporter`] from a dedicated worker thread.
///
/// Metrics are pull-based: nothing queues between ticks, the registry
/// is sampled when the timer fires. Gauge callbacks therefore run at
/// export time, never earlier.
pub struct PeriodicReader {
    control_sender: SyncSender<ReaderMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    flush_timeout: Duration,
    shutdown_timeout: Duration,
    failed_exports: Arc<AtomicUsize>,
}

impl Debug for PeriodicReader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicReader").finish()
    }
}

impl PeriodicReader {
    /// Configuration options for a periodic reader.
    pub fn builder<E>(exporter: E) -> PeriodicReaderBuilder<E>
    where
        E: MetricsExporter + 'static,
    {
        PeriodicReaderBuilder::new(exporter)
    }

    fn new<E>(exporter: E, meter: Meter, interval: Duration, retry_policy: RetryPolicy) -> Self
    where
        E: MetricsExporter + 'static,
    {
        let (control_sender, control_receiver) = mpsc::sync_channel(16);
        let failed_exports = Arc::new(AtomicUsize::new(0));
        let worker_failed = Arc::clone(&failed_exports);

        let handle = thread::Builder::new()
            .name("telepipe.metrics.reader".to_string())
            .spawn(move || {
                reader_loop(
                    meter,
                    exporter,
                    control_receiver,
                    interval,
                    retry_policy,
                    worker_failed,
                );
            })
            .expect("metrics reader thread spawn failed");

        PeriodicReader {
            control_sender,
            handle: Mutex::new(Some(handle)),
            flush_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            failed_exports,
        }
    }

    /// Collect and export a snapshot immediately.
    pub fn force_flush(&self) -> SdkResult {
        let (sender, receiver) = mpsc::sync_channel(1);
        match self.control_sender.try_send(ReaderMessage::Flush(sender)) {
            Ok(()) => receiver
                .recv_timeout(self.flush_timeout)
                .map_err(|err| match err {
                    RecvTimeoutError::Timeout => SdkError::Timeout(self.flush_timeout),
                    RecvTimeoutError::Disconnected => SdkError::AlreadyShutdown,
                })?,
            Err(mpsc::TrySendError::Full(_)) => Err(SdkError::InternalFailure(
                "flush control message could not be sent: control channel full".into(),
            )),
            Err(mpsc::TrySendError::Disconnected(_)) => Err(SdkError::AlreadyShutdown),
        }
    }

    /// Perform a final collect-and-export, shut the exporter down and
    /// stop the worker thread. A second call reports
    /// [`SdkError::AlreadyShutdown`].
    pub fn shutdown(&self) -> SdkResult {
        let (sender, receiver) = mpsc::sync_channel(1);
        match self.control_sender.try_send(ReaderMessage::Shutdown(sender)) {
            Ok(()) => {
                let result = receiver.recv_timeout(self.shutdown_timeout);
                match result {
                    Ok(worker_result) => {
                        if let Ok(mut guard) = self.handle.lock() {
                            if let Some(handle) = guard.take() {
                                let _ = handle.join();
                            }
                        }
                        worker_result
                    }
                    Err(RecvTimeoutError::Timeout) => Err(SdkError::Timeout(self.shutdown_timeout)),
                    Err(RecvTimeoutError::Disconnected) => Err(SdkError::InternalFailure(
                        "reader thread exited before acknowledging shutdown".into(),
                    )),
                }
            }
            Err(mpsc::TrySendError::Full(_)) => Err(SdkError::InternalFailure(
                "shutdown control message could not be sent: control channel full".into(),
            )),
            Err(mpsc::TrySendError::Disconnected(_)) => {
                diag_debug!(name: "PeriodicReader.Shutdown.AlreadyShutdown");
                Err(SdkError::AlreadyShutdown)
            }
        }
    }

    /// Snapshots abandoned after the retry budget was exhausted.
    pub fn failed_exports(&self) -> usize {
        self.failed_exports.load(Ordering::Relaxed)
    }
}

fn reader_loop<E>(
    meter: Meter,
    mut exporter: E,
    receiver: mpsc::Receiver<ReaderMessage>,
    interval: Duration,
    retry_policy: RetryPolicy,
    failed_exports: Arc<AtomicUsize>,
) where
    E: MetricsExporter,
{
    let _suppress_guard = Context::enter_suppressed_scope();
    diag_debug!(
        name: "PeriodicReader.ThreadStarted",
        interval_in_millisecs = interval.as_millis()
    );
    let mut last_export_time = Instant::now();

    loop {
        let remaining_time = interval
            .checked_sub(last_export_time.elapsed())
            .unwrap_or(Duration::ZERO);

        match receiver.recv_timeout(remaining_time) {
            Ok(ReaderMessage::Flush(sender)) => {
                diag_debug!(name: "PeriodicReader.ExportingDueToForceFlush");
                let result = collect_and_export(
                    &meter,
                    &mut exporter,
                    &retry_policy,
                    &mut last_export_time,
                    &failed_exports,
                );
                let _ = sender.send(result);
            }
            Ok(ReaderMessage::Shutdown(sender)) => {
                diag_debug!(name: "PeriodicReader.ExportingDueToShutdown");
                let result = collect_and_export(
                    &meter,
                    &mut exporter,
                    &retry_policy,
                    &mut last_export_time,
                    &failed_exports,
                );
                exporter.shutdown();
                let _ = sender.send(result);
                diag_debug!(name: "PeriodicReader.ThreadExiting", reason = "ShutdownRequested");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                diag_debug!(name: "PeriodicReader.ExportingDueToTimer");
                let _ = collect_and_export(
                    &meter,
                    &mut exporter,
                    &retry_policy,
                    &mut last_export_time,
                    &failed_exports,
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                diag_debug!(name: "PeriodicReader.ThreadExiting", reason = "ControlSenderDisconnected");
                break;
            }
        }
    }
    diag_debug!(name: "PeriodicReader.ThreadStopped");
}

fn collect_and_export<E>(
    meter: &Meter,
    exporter: &mut E,
    retry_policy: &RetryPolicy,
    last_export_time: &mut Instant,
    failed_exports: &AtomicUsize,
) -> SdkResult
where
    E: MetricsExporter,
{
    *last_export_time = Instant::now();
    let snapshot = meter.collect();
    if snapshot.is_empty() {
        return Ok(());
    }

    let attempt = retry_with_backoff(retry_policy, "metrics export", || {
        futures_executor::block_on(exporter.export(&snapshot))
    });
    match attempt {
        Ok(()) => Ok(()),
        Err(err) => {
            failed_exports.fetch_add(1, Ordering::Relaxed);
            diag_error!(
                name: "PeriodicReader.ExportError",
                error = format!("{err}")
            );
            Err(SdkError::InternalFailure(err.to_string()))
        }
    }
}

/// Builder for [`PeriodicReader`].
///
/// The export interval comes from `TELEPIPE_METRIC_EXPORT_INTERVAL`
/// (milliseconds) when set; [`with_interval`] overrides it.
///
/// [`with_interval`]: PeriodicReaderBuilder::with_interval
#[derive(Debug)]
pub struct PeriodicReaderBuilder<E> {
    interval: Duration,
    retry_policy: RetryPolicy,
    exporter: E,
}

impl<E> PeriodicReaderBuilder<E>
where
    E: MetricsExporter + 'static,
{
    fn new(exporter: E) -> Self {
        let interval = env::var(TELEPIPE_METRIC_EXPORT_INTERVAL)
            .ok()
            .and_then(|millis| millis.parse().map(Duration::from_millis).ok())
            .unwrap_or(METRIC_EXPORT_INTERVAL_DEFAULT);
        PeriodicReaderBuilder {
            interval,
            retry_policy: RetryPolicy::default(),
            exporter,
        }
    }

    /// Set the interval between exports. Zero is ignored.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    /// Set the retry policy applied to failed exports.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Start the reader against the given registry.
    pub fn build(self, meter: Meter) -> PeriodicReader {
        PeriodicReader::new(self.exporter, meter, self.interval, self.retry_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{InMemoryMetricsExporter, MetricData};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: Duration::from_millis(1),
        }
    }

    #[test]
    fn flush_exports_the_current_state() {
        let meter = Meter::new();
        let counter = meter.create_counter("c", "");
        let exporter = InMemoryMetricsExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_secs(60))
            .with_retry_policy(fast_retry())
            .build(meter);

        counter.add(4.0, &[]).unwrap();
        reader.force_flush().unwrap();

        let snapshots = exporter.get_snapshots();
        assert_eq!(snapshots.len(), 1);
        let MetricData::Sum { points, monotonic } = &snapshots[0].metrics[0].data else {
            panic!("expected sum data");
        };
        assert!(*monotonic);
        assert!((points[0].value - 4.0).abs() < f64::EPSILON);
        reader.shutdown().unwrap();
    }

    #[test]
    fn timer_exports_on_interval() {
        let meter = Meter::new();
        let counter = meter.create_counter("ticks", "");
        counter.add(1.0, &[]).unwrap();
        let exporter = InMemoryMetricsExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_millis(20))
            .with_retry_policy(fast_retry())
            .build(meter);

        let deadline = Instant::now() + Duration::from_secs(2);
        while exporter.get_snapshots().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(exporter.get_snapshots().len() >= 2);
        reader.shutdown().unwrap();
    }

    #[test]
    fn empty_registry_exports_nothing() {
        let meter = Meter::new();
        let exporter = InMemoryMetricsExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_millis(20))
            .with_retry_policy(fast_retry())
            .build(meter);

        thread::sleep(Duration::from_millis(100));
        reader.shutdown().unwrap();
        assert!(exporter.get_snapshots().is_empty());
        assert!(exporter.is_shutdown_called());
    }

    #[test]
    fn shutdown_performs_a_final_export() {
        let meter = Meter::new();
        let counter = meter.create_counter("c", "");
        let exporter = InMemoryMetricsExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_secs(60))
            .with_retry_policy(fast_retry())
            .build(meter);

        counter.add(1.0, &[]).unwrap();
        reader.shutdown().unwrap();
        assert_eq!(exporter.get_snapshots().len(), 1);
        assert!(matches!(
            reader.shutdown(),
            Err(SdkError::AlreadyShutdown)
        ));
    }

    #[test]
    fn interval_can_come_from_the_environment() {
        temp_env::with_vars([(TELEPIPE_METRIC_EXPORT_INTERVAL, Some("1234"))], || {
            let builder = PeriodicReader::builder(InMemoryMetricsExporter::default());
            assert_eq!(builder.interval, Duration::from_millis(1234));
        });
    }
}
