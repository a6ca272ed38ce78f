//! The batching/export engine shared by the push-based signals.
//!
//! One [`BatchProcessor`] instance serves one signal (spans or logs). It
//! owns a bounded [`RecordQueue`] and a dedicated worker thread; the
//! application side only ever pushes into the queue, so a slow or failing
//! exporter never adds latency to request handling.
//!
//! ```ascii
//!   +-------------+    enqueue()   +--------------+    export()    +----------+
//!   | application +----------------> BatchProcessor+----------------> Exporter |
//!   +-------------+   (never blocks)+--------------+ (worker thread)+----------+
//! ```
//!
//! A batch is cut when the queue reaches `max_export_batch_size` or when
//! `scheduled_delay` elapses. Failed exports are retried with bounded
//! exponential backoff and the batch is then dropped, never re-queued, so
//! memory stays bounded under a collector outage.

use std::cmp::min;
use std::env;
use std::fmt::{self, Debug, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::error::{SdkError, SdkResult};
use crate::export::Exporter;
use crate::queue::{PushResult, RecordQueue};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{diag_debug, diag_error, diag_warn};

/// Delay interval between two consecutive exports.
pub(crate) const TELEPIPE_SCHEDULE_DELAY: &str = "TELEPIPE_SCHEDULE_DELAY";
pub(crate) const SCHEDULE_DELAY_DEFAULT: Duration = Duration::from_millis(5_000);
/// Maximum queue size.
pub(crate) const TELEPIPE_MAX_QUEUE_SIZE: &str = "TELEPIPE_MAX_QUEUE_SIZE";
pub(crate) const MAX_QUEUE_SIZE_DEFAULT: usize = 1_000;
/// Maximum batch size, must be less than or equal to the queue size.
pub(crate) const TELEPIPE_MAX_EXPORT_BATCH_SIZE: &str = "TELEPIPE_MAX_EXPORT_BATCH_SIZE";
pub(crate) const MAX_EXPORT_BATCH_SIZE_DEFAULT: usize = 100;
/// Maximum allowed time for a single export attempt.
pub(crate) const TELEPIPE_EXPORT_TIMEOUT: &str = "TELEPIPE_EXPORT_TIMEOUT";
pub(crate) const EXPORT_TIMEOUT_DEFAULT: Duration = Duration::from_millis(5_000);

/// Messages sent from application threads to the worker thread.
enum ControlMessage {
    /// Sent when the queue has reached `max_export_batch_size`.
    Export(Arc<AtomicBool>),
    /// Flush everything currently queued to the exporter.
    Flush(SyncSender<SdkResult>),
    /// Drain the queue, shut the exporter down, stop the worker.
    Shutdown(SyncSender<SdkResult>),
}

/// Batches records of one signal and exports them off the hot path.
///
/// `enqueue` never blocks: the queue evicts its oldest record when full
/// and counts the drop. The worker thread cuts a batch every
/// `scheduled_delay`, whenever the queue reaches `max_export_batch_size`,
/// on `force_flush`, and a final time on `shutdown`.
pub struct BatchProcessor<T> {
    queue: Arc<RecordQueue<T>>,
    control_sender: SyncSender<ControlMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    flush_timeout: Duration,
    shutdown_timeout: Duration,
    export_message_sent: Arc<AtomicBool>,
    max_export_batch_size: usize,
    is_shutdown: AtomicBool,
    failed_batches: Arc<AtomicUsize>,
    drop_warning_emitted: AtomicBool,
}

impl<T> Debug for BatchProcessor<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("max_export_batch_size", &self.max_export_batch_size)
            .finish()
    }
}

impl<T: Send + 'static> BatchProcessor<T> {
    /// Start a processor with a dedicated worker thread. `signal` names
    /// the thread (`telepipe.<signal>.batch`) for diagnostics.
    pub fn new<E>(exporter: E, config: BatchConfig, signal: &'static str) -> Self
    where
        E: Exporter<T> + 'static,
    {
        let queue = Arc::new(RecordQueue::with_capacity(config.max_queue_size));
        let (control_sender, control_receiver) = mpsc::sync_channel(64);
        let failed_batches = Arc::new(AtomicUsize::new(0));
        let flush_timeout = config.flush_timeout;
        let shutdown_timeout = config.shutdown_timeout;
        let max_export_batch_size = config.max_export_batch_size;

        let worker_queue = Arc::clone(&queue);
        let worker_failed = Arc::clone(&failed_batches);
        let handle = thread::Builder::new()
            .name(format!("telepipe.{signal}.batch"))
            .spawn(move || {
                worker_loop(worker_queue, exporter, control_receiver, config, worker_failed);
            })
            .expect("batch worker thread spawn failed");

        BatchProcessor {
            queue,
            control_sender,
            handle: Mutex::new(Some(handle)),
            flush_timeout,
            shutdown_timeout,
            export_message_sent: Arc::new(AtomicBool::new(false)),
            max_export_batch_size,
            is_shutdown: AtomicBool::new(false),
            failed_batches,
            drop_warning_emitted: AtomicBool::new(false),
        }
    }

    /// Append a record to the signal's queue. Never blocks; returns
    /// whether the record was accepted (an eviction of an older record
    /// still counts as accepted).
    pub fn enqueue(&self, record: T) -> bool {
        if self.is_shutdown.load(Ordering::Relaxed) {
            diag_warn!(
                name: "BatchProcessor.Emit.AfterShutdown",
                message = "record emitted after shutdown will not be exported"
            );
            return false;
        }

        match self.queue.push(record) {
            PushResult::Stored | PushResult::Evicted => {}
            PushResult::Rejected => {
                self.warn_on_first_drop();
                return false;
            }
        }
        if self.queue.dropped() > 0 {
            self.warn_on_first_drop();
        }

        if self.queue.len() >= self.max_export_batch_size {
            // An atomic load screens the common case; the swap claims the
            // right to post the single outstanding export message. The
            // worker resets the flag once it has processed the message.
            if !self.export_message_sent.load(Ordering::Relaxed)
                && !self.export_message_sent.swap(true, Ordering::Relaxed)
            {
                let message = ControlMessage::Export(Arc::clone(&self.export_message_sent));
                if self.control_sender.try_send(message).is_err() {
                    self.export_message_sent.store(false, Ordering::Relaxed);
                }
            }
        }
        true
    }

    fn warn_on_first_drop(&self) {
        if !self.drop_warning_emitted.swap(true, Ordering::Relaxed) {
            diag_warn!(
                name: "BatchProcessor.RecordDroppingStarted",
                message = "queue reached capacity and records are being dropped; the total count is reported at shutdown"
            );
        }
    }

    /// Export everything currently queued, waiting up to the flush
    /// timeout for the worker to finish.
    pub fn force_flush(&self) -> SdkResult {
        let (sender, receiver) = mpsc::sync_channel(1);
        match self.control_sender.try_send(ControlMessage::Flush(sender)) {
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

    /// Stop the timer, drain and export all remaining records, shut the
    /// exporter down and join the worker thread, bounded by the shutdown
    /// timeout. A second call reports [`SdkError::AlreadyShutdown`].
    pub fn shutdown(&self) -> SdkResult {
        self.is_shutdown.store(true, Ordering::Relaxed);

        let dropped = self.queue.dropped();
        if dropped > 0 {
            diag_warn!(
                name: "BatchProcessor.RecordsDropped",
                dropped_records = dropped,
                message = "records were dropped over the lifetime of this processor because its queue was full; consider a larger queue or a shorter schedule delay"
            );
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        match self.control_sender.try_send(ControlMessage::Shutdown(sender)) {
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
                    Err(RecvTimeoutError::Timeout) => {
                        diag_error!(
                            name: "BatchProcessor.Shutdown.Timeout",
                            timeout_millis = self.shutdown_timeout.as_millis()
                        );
                        Err(SdkError::Timeout(self.shutdown_timeout))
                    }
                    Err(RecvTimeoutError::Disconnected) => Err(SdkError::InternalFailure(
                        "worker thread exited before acknowledging shutdown".into(),
                    )),
                }
            }
            Err(mpsc::TrySendError::Full(_)) => Err(SdkError::InternalFailure(
                "shutdown control message could not be sent: control channel full".into(),
            )),
            Err(mpsc::TrySendError::Disconnected(_)) => {
                diag_debug!(
                    name: "BatchProcessor.Shutdown.AlreadyShutdown",
                    message = "shutdown invoked more than once"
                );
                Err(SdkError::AlreadyShutdown)
            }
        }
    }

    /// Records dropped because the queue was full.
    pub fn dropped_records(&self) -> usize {
        self.queue.dropped()
    }

    /// Batches abandoned after the retry budget was exhausted.
    pub fn failed_batches(&self) -> usize {
        self.failed_batches.load(Ordering::Relaxed)
    }
}

fn worker_loop<T, E>(
    queue: Arc<RecordQueue<T>>,
    mut exporter: E,
    receiver: mpsc::Receiver<ControlMessage>,
    config: BatchConfig,
    failed_batches: Arc<AtomicUsize>,
) where
    E: Exporter<T>,
{
    // Exporter activity must not generate new telemetry through this
    // very pipeline.
    let _suppress_guard = Context::enter_suppressed_scope();
    diag_debug!(
        name: "BatchProcessor.ThreadStarted",
        interval_in_millisecs = config.scheduled_delay.as_millis(),
        max_export_batch_size = config.max_export_batch_size,
        max_queue_size = config.max_queue_size
    );
    let mut last_export_time = Instant::now();

    loop {
        let remaining_time = config
            .scheduled_delay
            .checked_sub(last_export_time.elapsed())
            .unwrap_or(Duration::ZERO);

        match receiver.recv_timeout(remaining_time) {
            Ok(ControlMessage::Export(export_message_sent)) => {
                export_message_sent.store(false, Ordering::Relaxed);
                diag_debug!(name: "BatchProcessor.ExportingDueToBatchSize");
                let _ = drain_and_export(
                    &queue,
                    &mut exporter,
                    &config,
                    &mut last_export_time,
                    &failed_batches,
                );
            }
            Ok(ControlMessage::Flush(sender)) => {
                diag_debug!(name: "BatchProcessor.ExportingDueToForceFlush");
                let result = drain_and_export(
                    &queue,
                    &mut exporter,
                    &config,
                    &mut last_export_time,
                    &failed_batches,
                );
                let _ = sender.send(result);
            }
            Ok(ControlMessage::Shutdown(sender)) => {
                diag_debug!(name: "BatchProcessor.ExportingDueToShutdown");
                let result = drain_and_export(
                    &queue,
                    &mut exporter,
                    &config,
                    &mut last_export_time,
                    &failed_batches,
                );
                exporter.shutdown();
                let _ = sender.send(result);
                diag_debug!(name: "BatchProcessor.ThreadExiting", reason = "ShutdownRequested");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                diag_debug!(name: "BatchProcessor.ExportingDueToTimer");
                let _ = drain_and_export(
                    &queue,
                    &mut exporter,
                    &config,
                    &mut last_export_time,
                    &failed_batches,
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                diag_debug!(name: "BatchProcessor.ThreadExiting", reason = "ControlSenderDisconnected");
                break;
            }
        }
    }
    diag_debug!(name: "BatchProcessor.ThreadStopped");
}

/// Drain the queue in chunks of at most `max_export_batch_size` and
/// export each chunk. The record count observed at entry bounds the
/// drain, so records arriving during a cut belong to the next batch and
/// a steady burst cannot starve the timer.
fn drain_and_export<T, E>(
    queue: &RecordQueue<T>,
    exporter: &mut E,
    config: &BatchConfig,
    last_export_time: &mut Instant,
    failed_batches: &AtomicUsize,
) -> SdkResult
where
    E: Exporter<T>,
{
    *last_export_time = Instant::now();
    let target = queue.len();
    let mut exported = 0usize;
    let mut result = Ok(());

    while exported < target {
        let batch = queue.drain(min(config.max_export_batch_size, target - exported));
        if batch.is_empty() {
            break;
        }
        exported += batch.len();

        // The same batch is resent on every retry attempt; after the
        // budget it is dropped, never re-queued.
        let attempt = retry_with_backoff(&config.retry_policy, "batch export", || {
            futures_executor::block_on(exporter.export(&batch))
        });
        if let Err(err) = attempt {
            failed_batches.fetch_add(1, Ordering::Relaxed);
            diag_error!(
                name: "BatchProcessor.ExportError",
                batch_size = batch.len(),
                error = format!("{err}")
            );
            result = Err(SdkError::InternalFailure(err.to_string()));
        }
    }
    result
}

/// Batch processor configuration.
/// Use [`BatchConfigBuilder`] to configure your own instance.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Maximum number of records buffered for delayed processing. When
    /// the queue is full the oldest record is evicted.
    pub(crate) max_queue_size: usize,

    /// Delay interval between two consecutive batch exports.
    pub(crate) scheduled_delay: Duration,

    /// Maximum number of records in a single batch. A larger backlog is
    /// processed as consecutive batches without delay between them.
    pub(crate) max_export_batch_size: usize,

    /// Deadline for a single export attempt, enforced by the transport.
    pub(crate) export_timeout: Duration,

    /// Backoff applied to failed export attempts.
    pub(crate) retry_policy: RetryPolicy,

    pub(crate) flush_timeout: Duration,
    pub(crate) shutdown_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfigBuilder::default().build()
    }
}

impl BatchConfig {
    /// Deadline for a single export attempt.
    pub fn export_timeout(&self) -> Duration {
        self.export_timeout
    }
}

/// A builder for [`BatchConfig`] instances.
///
/// Initial values come from the environment where set:
/// `TELEPIPE_MAX_QUEUE_SIZE`, `TELEPIPE_SCHEDULE_DELAY` (millis),
/// `TELEPIPE_MAX_EXPORT_BATCH_SIZE`, `TELEPIPE_EXPORT_TIMEOUT` (millis).
/// Programmatic configuration overrides the environment.
#[derive(Clone, Debug)]
pub struct BatchConfigBuilder {
    max_queue_size: usize,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
    export_timeout: Duration,
    retry_policy: RetryPolicy,
    flush_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Default for BatchConfigBuilder {
    fn default() -> Self {
        BatchConfigBuilder {
            max_queue_size: MAX_QUEUE_SIZE_DEFAULT,
            scheduled_delay: SCHEDULE_DELAY_DEFAULT,
            max_export_batch_size: MAX_EXPORT_BATCH_SIZE_DEFAULT,
            export_timeout: EXPORT_TIMEOUT_DEFAULT,
            retry_policy: RetryPolicy::default(),
            flush_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        }
        .init_from_env_vars()
    }
}

impl BatchConfigBuilder {
    /// Set the maximum queue size. When the queue is full the oldest
    /// record is evicted. The default is 1000.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set the delay interval between two consecutive batch exports.
    /// The default is 5 seconds.
    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    /// Set the maximum batch size. The default is 100; values above the
    /// queue size are clamped to it at build time.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size;
        self
    }

    /// Set the deadline for a single export attempt. The default is
    /// 5 seconds.
    pub fn with_export_timeout(mut self, export_timeout: Duration) -> Self {
        self.export_timeout = export_timeout;
        self
    }

    /// Set the retry policy applied to failed exports.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Set the deadline for `force_flush` to complete.
    pub fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    /// Set the deadline for `shutdown` to complete.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Builds a [`BatchConfig`], clamping `max_export_batch_size` to
    /// `max_queue_size`.
    pub fn build(self) -> BatchConfig {
        let max_export_batch_size = min(self.max_export_batch_size, self.max_queue_size);

        BatchConfig {
            max_queue_size: self.max_queue_size,
            scheduled_delay: self.scheduled_delay,
            max_export_batch_size,
            export_timeout: self.export_timeout,
            retry_policy: self.retry_policy,
            flush_timeout: self.flush_timeout,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(max_queue_size) = env::var(TELEPIPE_MAX_QUEUE_SIZE)
            .ok()
            .and_then(|queue_size| usize::from_str(&queue_size).ok())
        {
            self.max_queue_size = max_queue_size;
        }

        if let Some(max_export_batch_size) = env::var(TELEPIPE_MAX_EXPORT_BATCH_SIZE)
            .ok()
            .and_then(|batch_size| usize::from_str(&batch_size).ok())
        {
            self.max_export_batch_size = max_export_batch_size;
        }

        if let Some(scheduled_delay) = env::var(TELEPIPE_SCHEDULE_DELAY)
            .ok()
            .and_then(|delay| u64::from_str(&delay).ok())
        {
            self.scheduled_delay = Duration::from_millis(scheduled_delay);
        }

        if let Some(export_timeout) = env::var(TELEPIPE_EXPORT_TIMEOUT)
            .ok()
            .and_then(|timeout| u64::from_str(&timeout).ok())
        {
            self.export_timeout = Duration::from_millis(export_timeout);
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{ExportError, ExportResult, Exporter};
    use futures_util::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;

    /// Records every exported batch; can be told to fail the first N
    /// export attempts.
    #[derive(Debug, Clone, Default)]
    struct RecordingExporter {
        batches: Arc<Mutex<Vec<Vec<u32>>>>,
        remaining_failures: Arc<AtomicUsize>,
        shutdown_calls: Arc<AtomicUsize>,
    }

    impl RecordingExporter {
        fn failing(times: usize) -> Self {
            let exporter = RecordingExporter::default();
            exporter.remaining_failures.store(times, Ordering::SeqCst);
            exporter
        }

        fn batches(&self) -> Vec<Vec<u32>> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl Exporter<u32> for RecordingExporter {
        fn export(&mut self, batch: &[u32]) -> BoxFuture<'static, ExportResult> {
            let result = if self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                    remaining.checked_sub(1)
                })
                .is_ok()
            {
                Err(ExportError::Transport("connection refused".into()))
            } else {
                self.batches.lock().unwrap().push(batch.to_vec());
                Ok(())
            };
            Box::pin(std::future::ready(result))
        }

        fn shutdown(&mut self) {
            self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: Duration::from_millis(1),
        }
    }

    fn quiet_config() -> BatchConfig {
        BatchConfigBuilder::default()
            .with_max_queue_size(1_000)
            .with_max_export_batch_size(100)
            .with_scheduled_delay(Duration::from_secs(60))
            .with_retry_policy(fast_retry())
            .build()
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn size_trigger_cuts_batches_of_at_most_max_size() {
        let exporter = RecordingExporter::default();
        let processor = BatchProcessor::new(exporter.clone(), quiet_config(), "test");

        for i in 0..150 {
            assert!(processor.enqueue(i));
        }
        // The 100th record posts the size-trigger export; whatever is
        // left over is drained by shutdown. The control channel is FIFO,
        // so the trigger is always processed before the shutdown drain.
        processor.shutdown().unwrap();

        let batches = exporter.batches();
        assert_eq!(batches[0].len(), 100);
        assert!(batches.iter().all(|batch| batch.len() <= 100));
        let flattened: Vec<u32> = batches.into_iter().flatten().collect();
        assert_eq!(flattened, (0..150).collect::<Vec<_>>());
    }

    #[test]
    fn timer_tick_with_empty_queue_exports_nothing() {
        let exporter = RecordingExporter::default();
        let config = BatchConfigBuilder::default()
            .with_scheduled_delay(Duration::from_millis(20))
            .with_retry_policy(fast_retry())
            .build();
        let processor = BatchProcessor::<u32>::new(exporter.clone(), config, "test");

        thread::sleep(Duration::from_millis(150));
        processor.shutdown().unwrap();
        assert!(exporter.batches().is_empty());
    }

    #[test]
    fn timer_exports_partial_batch() {
        let exporter = RecordingExporter::default();
        let config = BatchConfigBuilder::default()
            .with_scheduled_delay(Duration::from_millis(20))
            .with_retry_policy(fast_retry())
            .build();
        let processor = BatchProcessor::new(exporter.clone(), config, "test");

        for i in 0..7 {
            processor.enqueue(i);
        }
        assert!(wait_until(Duration::from_secs(2), || {
            exporter.batches().len() == 1
        }));
        assert_eq!(exporter.batches()[0], (0..7).collect::<Vec<_>>());
        processor.shutdown().unwrap();
    }

    #[test]
    fn transient_failures_deliver_the_batch_exactly_once() {
        let exporter = RecordingExporter::failing(3);
        let processor = BatchProcessor::new(exporter.clone(), quiet_config(), "test");

        for i in 0..5 {
            processor.enqueue(i);
        }
        processor.force_flush().unwrap();

        let batches = exporter.batches();
        assert_eq!(batches, vec![(0..5).collect::<Vec<_>>()]);
        assert_eq!(processor.failed_batches(), 0);
        processor.shutdown().unwrap();
    }

    #[test]
    fn exhausted_retries_drop_the_batch() {
        let exporter = RecordingExporter::failing(usize::MAX);
        let processor = BatchProcessor::new(exporter.clone(), quiet_config(), "test");

        processor.enqueue(1);
        assert!(processor.force_flush().is_err());
        assert_eq!(processor.failed_batches(), 1);
        assert!(exporter.batches().is_empty());

        // The dropped batch is not re-queued; later records still flow.
        exporter.remaining_failures.store(0, Ordering::SeqCst);
        processor.enqueue(2);
        processor.force_flush().unwrap();
        assert_eq!(exporter.batches(), vec![vec![2]]);
        let _ = processor.shutdown();
    }

    #[test]
    fn shutdown_drains_remaining_records() {
        let exporter = RecordingExporter::default();
        let processor = BatchProcessor::new(exporter.clone(), quiet_config(), "test");

        for i in 0..3 {
            processor.enqueue(i);
        }
        processor.shutdown().unwrap();
        assert_eq!(exporter.batches(), vec![vec![0, 1, 2]]);
        assert_eq!(exporter.shutdown_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_shutdown_reports_already_shutdown() {
        let exporter = RecordingExporter::default();
        let processor = BatchProcessor::<u32>::new(exporter, quiet_config(), "test");

        processor.shutdown().unwrap();
        assert!(matches!(
            processor.shutdown(),
            Err(SdkError::AlreadyShutdown)
        ));
    }

    #[test]
    fn enqueue_after_shutdown_is_refused() {
        let exporter = RecordingExporter::default();
        let processor = BatchProcessor::new(exporter.clone(), quiet_config(), "test");

        processor.shutdown().unwrap();
        assert!(!processor.enqueue(9));
        assert!(exporter.batches().is_empty());
    }

    #[test]
    fn queue_overflow_drops_oldest_and_counts() {
        let exporter = RecordingExporter::default();
        // Batch size above the capacity keeps the size trigger quiet, so
        // nothing drains the queue before shutdown.
        let config = BatchConfig {
            max_queue_size: 10,
            scheduled_delay: Duration::from_secs(60),
            max_export_batch_size: 100,
            export_timeout: Duration::from_secs(5),
            retry_policy: fast_retry(),
            flush_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        };
        let processor = BatchProcessor::new(exporter.clone(), config, "test");

        for i in 0..15 {
            processor.enqueue(i);
        }
        assert_eq!(processor.dropped_records(), 5);
        processor.shutdown().unwrap();
        assert_eq!(exporter.batches(), vec![(5..15).collect::<Vec<_>>()]);
    }

    #[test]
    fn default_config_reads_env_vars() {
        temp_env::with_vars(
            [
                (TELEPIPE_MAX_QUEUE_SIZE, Some("4096")),
                (TELEPIPE_SCHEDULE_DELAY, Some("2000")),
                (TELEPIPE_MAX_EXPORT_BATCH_SIZE, Some("256")),
                (TELEPIPE_EXPORT_TIMEOUT, Some("1500")),
            ],
            || {
                let config = BatchConfig::default();
                assert_eq!(config.max_queue_size, 4096);
                assert_eq!(config.scheduled_delay, Duration::from_millis(2000));
                assert_eq!(config.max_export_batch_size, 256);
                assert_eq!(config.export_timeout, Duration::from_millis(1500));
            },
        );
    }

    #[test]
    fn builder_overrides_env_vars() {
        temp_env::with_vars(
            [
                (TELEPIPE_MAX_QUEUE_SIZE, Some("4096")),
                (TELEPIPE_SCHEDULE_DELAY, Some("2000")),
            ],
            || {
                let config = BatchConfigBuilder::default()
                    .with_max_queue_size(2048)
                    .with_scheduled_delay(Duration::from_millis(1000))
                    .build();
                assert_eq!(config.max_queue_size, 2048);
                assert_eq!(config.scheduled_delay, Duration::from_millis(1000));
            },
        );
    }

    #[test]
    fn batch_size_is_clamped_to_queue_size() {
        temp_env::with_vars_unset(
            [TELEPIPE_MAX_QUEUE_SIZE, TELEPIPE_MAX_EXPORT_BATCH_SIZE],
            || {
                let config = BatchConfigBuilder::default()
                    .with_max_queue_size(256)
                    .with_max_export_batch_size(1024)
                    .build();
                assert_eq!(config.max_queue_size, 256);
                assert_eq!(config.max_export_batch_size, 256);
            },
        );
    }
}
