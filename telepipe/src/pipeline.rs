//! Pipeline lifecycle: wiring, startup order and flush-before-exit.
//!
//! [`TelemetryPipeline`] is the process-wide context object holding all
//! pipeline state. Construction follows a fixed order: resource first,
//! then the per-signal exporters, then the processors/registry/reader
//! whose construction starts the background workers. [`shutdown`]
//! unwinds in reverse, flushing every component before returning, and is
//! bounded by the component deadlines so process exit never hangs.
//!
//! The global surface ([`init`]/[`global`]/[`shutdown_global`]) replaces
//! module-level singletons with explicit lifecycle: initializing twice
//! returns the existing pipeline with a warning, and initializing after
//! a global shutdown is a defined error.
//!
//! [`shutdown`]: TelemetryPipeline::shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::batch::{BatchConfig, BatchProcessor};
use crate::common::KeyValue;
use crate::config::TelemetryConfig;
use crate::error::{SdkError, SdkResult};
use crate::export::otlp::OtlpExporterBuilder;
use crate::export::{Exporter, MetricsExporter};
use crate::logs::{LogRecord, Logger};
use crate::metrics::{Meter, PeriodicReader};
use crate::resource::{
    Resource, DEPLOYMENT_ENVIRONMENT, SERVICE_NAME, SERVICE_VERSION,
};
use crate::trace::{Sampler, SpanData, Tracer};
use crate::{diag_debug, diag_info, diag_warn};

/// The assembled pipeline. Cloning is cheap and shares the underlying
/// state; the last reference triggers a best-effort shutdown on drop.
#[derive(Clone, Debug)]
pub struct TelemetryPipeline {
    inner: Arc<PipelineInner>,
}

#[derive(Debug)]
struct PipelineInner {
    resource: Resource,
    tracer: Tracer,
    meter: Meter,
    logger: Logger,
    span_processor: Arc<BatchProcessor<SpanData>>,
    log_processor: Arc<BatchProcessor<LogRecord>>,
    metric_reader: PeriodicReader,
    is_shutdown: AtomicBool,
}

impl PipelineInner {
    /// Reverse of the initialization order: logs, metrics, traces.
    fn shutdown_components(&self) -> Vec<SdkResult> {
        let mut results = Vec::with_capacity(3);
        for (component, result) in [
            ("log_processor", self.log_processor.shutdown()),
            ("metric_reader", self.metric_reader.shutdown()),
            ("span_processor", self.span_processor.shutdown()),
        ] {
            if let Err(err) = &result {
                diag_debug!(
                    name: "Pipeline.Shutdown.ComponentError",
                    component = component,
                    error = format!("{err}")
                );
            }
            results.push(result);
        }
        results
    }
}

impl Drop for PipelineInner {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::SeqCst) {
            let _ = self.shutdown_components();
        }
    }
}

impl TelemetryPipeline {
    /// Start configuring a pipeline.
    pub fn builder(config: TelemetryConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            span_batch_config: None,
            log_batch_config: None,
            metric_interval: None,
            span_exporter: None,
            log_exporter: None,
            metrics_exporter: None,
        }
    }

    /// The tracer backed by this pipeline.
    pub fn tracer(&self) -> Tracer {
        self.inner.tracer.clone()
    }

    /// The metric registry backed by this pipeline.
    pub fn meter(&self) -> Meter {
        self.inner.meter.clone()
    }

    /// The correlating logger backed by this pipeline.
    pub fn logger(&self) -> Logger {
        self.inner.logger.clone()
    }

    /// The process resource attached to every exported batch.
    pub fn resource(&self) -> Resource {
        self.inner.resource.clone()
    }

    /// Flush every signal's buffered records.
    pub fn force_flush(&self) -> SdkResult {
        let results = [
            self.inner.span_processor.force_flush(),
            self.inner.metric_reader.force_flush(),
            self.inner.log_processor.force_flush(),
        ];
        results.into_iter().find(|result| result.is_err()).unwrap_or(Ok(()))
    }

    /// Flush and stop every component, in reverse initialization order.
    ///
    /// Safe to call more than once; only the first call does work, later
    /// calls are no-ops returning `Ok`. Each component is bounded by its
    /// own deadline, so shutdown returns (with a [`SdkError::Timeout`])
    /// rather than hanging when an exporter is stuck.
    pub fn shutdown(&self) -> SdkResult {
        if self.inner.is_shutdown.swap(true, Ordering::SeqCst) {
            diag_debug!(name: "Pipeline.Shutdown.AlreadyShutdown");
            return Ok(());
        }
        diag_info!(name: "Pipeline.ShuttingDown");
        self.inner
            .shutdown_components()
            .into_iter()
            .find(|result| result.is_err())
            .unwrap_or(Ok(()))
    }
}

/// Configures and assembles a [`TelemetryPipeline`].
///
/// Exporters default to OTLP HTTP against the configured endpoint;
/// tests and embedders can substitute their own per signal.
#[derive(Debug)]
pub struct PipelineBuilder {
    config: TelemetryConfig,
    span_batch_config: Option<BatchConfig>,
    log_batch_config: Option<BatchConfig>,
    metric_interval: Option<Duration>,
    span_exporter: Option<Box<dyn Exporter<SpanData>>>,
    log_exporter: Option<Box<dyn Exporter<LogRecord>>>,
    metrics_exporter: Option<Box<dyn MetricsExporter>>,
}

impl PipelineBuilder {
    /// Batch tuning for the trace signal.
    pub fn with_span_batch_config(mut self, config: BatchConfig) -> Self {
        self.span_batch_config = Some(config);
        self
    }

    /// Batch tuning for the log signal.
    pub fn with_log_batch_config(mut self, config: BatchConfig) -> Self {
        self.log_batch_config = Some(config);
        self
    }

    /// Export interval for the metric signal.
    pub fn with_metric_interval(mut self, interval: Duration) -> Self {
        self.metric_interval = Some(interval);
        self
    }

    /// Replace the span exporter.
    pub fn with_span_exporter(mut self, exporter: impl Exporter<SpanData> + 'static) -> Self {
        self.span_exporter = Some(Box::new(exporter));
        self
    }

    /// Replace the log exporter.
    pub fn with_log_exporter(mut self, exporter: impl Exporter<LogRecord> + 'static) -> Self {
        self.log_exporter = Some(Box::new(exporter));
        self
    }

    /// Replace the metrics exporter.
    pub fn with_metrics_exporter(mut self, exporter: impl MetricsExporter + 'static) -> Self {
        self.metrics_exporter = Some(Box::new(exporter));
        self
    }

    /// Assemble the pipeline: resource, then exporters, then the wiring
    /// whose construction brings the background workers up.
    pub fn build(self) -> Result<TelemetryPipeline, SdkError> {
        let config = self.config;

        let resource = Resource::builder()
            .with_attributes([
                KeyValue::new(SERVICE_NAME, config.service_name.clone()),
                KeyValue::new(SERVICE_VERSION, config.service_version.clone()),
                KeyValue::new(DEPLOYMENT_ENVIRONMENT, config.environment.clone()),
            ])
            .build();

        let span_batch_config = self.span_batch_config.unwrap_or_default();
        let log_batch_config = self.log_batch_config.unwrap_or_default();

        let mut otlp = OtlpExporterBuilder::new().with_endpoint(config.otlp_endpoint.clone());
        if let Some(token) = &config.otlp_token {
            otlp = otlp.with_token(token.clone());
        }

        let span_exporter = match self.span_exporter {
            Some(exporter) => exporter,
            None => Box::new(
                otlp.clone()
                    .with_timeout(span_batch_config.export_timeout())
                    .build_span_exporter(resource.clone())
                    .map_err(|err| SdkError::InternalFailure(err.to_string()))?,
            ),
        };
        let metrics_exporter = match self.metrics_exporter {
            Some(exporter) => exporter,
            None => Box::new(
                otlp.clone()
                    .build_metrics_exporter(resource.clone())
                    .map_err(|err| SdkError::InternalFailure(err.to_string()))?,
            ),
        };
        let log_exporter = match self.log_exporter {
            Some(exporter) => exporter,
            None => Box::new(
                otlp.with_timeout(log_batch_config.export_timeout())
                    .build_log_exporter(resource.clone())
                    .map_err(|err| SdkError::InternalFailure(err.to_string()))?,
            ),
        };

        let span_processor = Arc::new(BatchProcessor::new(
            span_exporter,
            span_batch_config,
            "traces",
        ));
        let tracer = Tracer::new(
            Arc::clone(&span_processor),
            Sampler::ratio(config.trace_sample_ratio),
        );

        let meter = Meter::new();
        let mut reader_builder = PeriodicReader::builder(metrics_exporter);
        if let Some(interval) = self.metric_interval {
            reader_builder = reader_builder.with_interval(interval);
        }
        let metric_reader = reader_builder.build(meter.clone());

        let log_processor = Arc::new(BatchProcessor::new(log_exporter, log_batch_config, "logs"));
        let logger = Logger::new(Arc::clone(&log_processor), &resource, config.log_level);

        diag_info!(
            name: "Pipeline.Initialized",
            service_name = config.service_name
        );

        Ok(TelemetryPipeline {
            inner: Arc::new(PipelineInner {
                resource,
                tracer,
                meter,
                logger,
                span_processor,
                log_processor,
                metric_reader,
                is_shutdown: AtomicBool::new(false),
            }),
        })
    }
}

#[derive(Debug)]
enum GlobalState {
    Uninitialized,
    Running(TelemetryPipeline),
    Stopped,
}

static GLOBAL_PIPELINE: Mutex<GlobalState> = Mutex::new(GlobalState::Uninitialized);

/// Initialize the process-wide pipeline.
///
/// Idempotent while running: a second call returns the existing
/// pipeline and warns. After [`shutdown_global`] the pipeline cannot be
/// re-initialized; that returns [`SdkError::AlreadyShutdown`].
pub fn init(config: TelemetryConfig) -> Result<TelemetryPipeline, SdkError> {
    let mut state = GLOBAL_PIPELINE.lock().unwrap_or_else(|err| err.into_inner());
    match &*state {
        GlobalState::Running(pipeline) => {
            diag_warn!(
                name: "Pipeline.Init.AlreadyInitialized",
                message = "telemetry already initialized; returning the existing pipeline"
            );
            Ok(pipeline.clone())
        }
        GlobalState::Stopped => Err(SdkError::AlreadyShutdown),
        GlobalState::Uninitialized => {
            let pipeline = TelemetryPipeline::builder(config).build()?;
            *state = GlobalState::Running(pipeline.clone());
            Ok(pipeline)
        }
    }
}

/// The process-wide pipeline, if one is running.
pub fn global() -> Option<TelemetryPipeline> {
    let state = GLOBAL_PIPELINE.lock().unwrap_or_else(|err| err.into_inner());
    match &*state {
        GlobalState::Running(pipeline) => Some(pipeline.clone()),
        _ => None,
    }
}

/// Shut the process-wide pipeline down.
///
/// Safe in every state: before [`init`] and after a completed shutdown
/// it is a no-op. Only the first call on a running pipeline does work.
pub fn shutdown_global() -> SdkResult {
    let mut state = GLOBAL_PIPELINE.lock().unwrap_or_else(|err| err.into_inner());
    if matches!(&*state, GlobalState::Uninitialized) {
        return Ok(());
    }
    match std::mem::replace(&mut *state, GlobalState::Stopped) {
        GlobalState::Running(pipeline) => pipeline.shutdown(),
        _ => Ok(()),
    }
}
