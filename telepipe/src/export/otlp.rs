//! OTLP-style HTTP exporters.
//!
//! One [`OtlpExporterBuilder`] configures the shared transport pieces
//! (endpoint, bearer token, per-request timeout, codec) and builds the
//! per-signal exporters posting to `/v1/traces`, `/v1/metrics` and
//! `/v1/logs`. The blocking HTTP client pairs with the pipeline's
//! thread-based processors: every send happens on a worker thread, never
//! on an application thread.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::logs::LogRecord;
use crate::metrics::MetricsSnapshot;
use crate::resource::Resource;
use crate::trace::SpanData;

use super::codec::{Codec, JsonCodec};
use super::{ExportError, ExportResult, Exporter, MetricsExporter};

const TRACES_PATH: &str = "/v1/traces";
const METRICS_PATH: &str = "/v1/metrics";
const LOGS_PATH: &str = "/v1/logs";

pub(crate) const DEFAULT_ENDPOINT: &str = "http://localhost:4317";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configures and builds the per-signal OTLP HTTP exporters.
#[derive(Clone, Debug)]
pub struct OtlpExporterBuilder {
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
    codec: Arc<dyn Codec>,
}

impl Default for OtlpExporterBuilder {
    fn default() -> Self {
        OtlpExporterBuilder {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
            codec: Arc::new(JsonCodec),
        }
    }
}

impl OtlpExporterBuilder {
    /// Start from the defaults: localhost endpoint, no token, 5 second
    /// timeout, JSON codec.
    pub fn new() -> Self {
        OtlpExporterBuilder::default()
    }

    /// Set the base collector endpoint; signal paths are appended.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Send a bearer token with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the wire codec.
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    fn transport(&self, path: &str) -> Result<OtlpTransport, ExportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| ExportError::Transport(err.to_string()))?;
        Ok(OtlpTransport {
            client,
            url: format!("{}{}", self.endpoint.trim_end_matches('/'), path),
            token: self.token.clone(),
            timeout: self.timeout,
        })
    }

    /// Build the span exporter.
    pub fn build_span_exporter(&self, resource: Resource) -> Result<OtlpSpanExporter, ExportError> {
        Ok(OtlpSpanExporter {
            transport: self.transport(TRACES_PATH)?,
            codec: Arc::clone(&self.codec),
            resource,
        })
    }

    /// Build the log exporter.
    pub fn build_log_exporter(&self, resource: Resource) -> Result<OtlpLogExporter, ExportError> {
        Ok(OtlpLogExporter {
            transport: self.transport(LOGS_PATH)?,
            codec: Arc::clone(&self.codec),
            resource,
        })
    }

    /// Build the metrics exporter.
    pub fn build_metrics_exporter(
        &self,
        resource: Resource,
    ) -> Result<OtlpMetricsExporter, ExportError> {
        Ok(OtlpMetricsExporter {
            transport: self.transport(METRICS_PATH)?,
            codec: Arc::clone(&self.codec),
            resource,
        })
    }
}

/// The shared HTTP plumbing of the signal exporters.
#[derive(Debug)]
struct OtlpTransport {
    client: reqwest::blocking::Client,
    url: String,
    token: Option<String>,
    timeout: Duration,
}

impl OtlpTransport {
    fn send(&self, body: Vec<u8>, content_type: &'static str) -> ExportResult {
        let mut request = self
            .client
            .post(&self.url)
            .header("content-type", content_type)
            .body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().map_err(|err| {
            if err.is_timeout() {
                ExportError::Timeout(self.timeout)
            } else {
                ExportError::Transport(err.to_string())
            }
        })?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ExportError::Status(status.as_u16()))
        }
    }
}

/// Posts span batches to `{endpoint}/v1/traces`.
#[derive(Debug)]
pub struct OtlpSpanExporter {
    transport: OtlpTransport,
    codec: Arc<dyn Codec>,
    resource: Resource,
}

impl Exporter<SpanData> for OtlpSpanExporter {
    fn export(&mut self, batch: &[SpanData]) -> BoxFuture<'static, ExportResult> {
        let result = self
            .codec
            .encode_spans(&self.resource, batch)
            .and_then(|body| self.transport.send(body, self.codec.content_type()));
        Box::pin(std::future::ready(result))
    }
}

/// Posts log batches to `{endpoint}/v1/logs`.
#[derive(Debug)]
pub struct OtlpLogExporter {
    transport: OtlpTransport,
    codec: Arc<dyn Codec>,
    resource: Resource,
}

impl Exporter<LogRecord> for OtlpLogExporter {
    fn export(&mut self, batch: &[LogRecord]) -> BoxFuture<'static, ExportResult> {
        let result = self
            .codec
            .encode_logs(&self.resource, batch)
            .and_then(|body| self.transport.send(body, self.codec.content_type()));
        Box::pin(std::future::ready(result))
    }
}

/// Posts metric snapshots to `{endpoint}/v1/metrics`.
#[derive(Debug)]
pub struct OtlpMetricsExporter {
    transport: OtlpTransport,
    codec: Arc<dyn Codec>,
    resource: Resource,
}

impl MetricsExporter for OtlpMetricsExporter {
    fn export(&mut self, snapshot: &MetricsSnapshot) -> BoxFuture<'static, ExportResult> {
        let result = self
            .codec
            .encode_metrics(&self.resource, snapshot)
            .and_then(|body| self.transport.send(body, self.codec.content_type()));
        Box::pin(std::future::ready(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_paths_are_appended_to_the_endpoint() {
        let builder = OtlpExporterBuilder::new().with_endpoint("http://collector:4317");
        let resource = Resource::builder_empty().build();

        let spans = builder.build_span_exporter(resource.clone()).unwrap();
        let logs = builder.build_log_exporter(resource.clone()).unwrap();
        let metrics = builder.build_metrics_exporter(resource).unwrap();

        assert_eq!(spans.transport.url, "http://collector:4317/v1/traces");
        assert_eq!(logs.transport.url, "http://collector:4317/v1/logs");
        assert_eq!(metrics.transport.url, "http://collector:4317/v1/metrics");
    }

    #[test]
    fn trailing_slashes_do_not_double_up() {
        let builder = OtlpExporterBuilder::new().with_endpoint("http://collector:4317/");
        let resource = Resource::builder_empty().build();
        let spans = builder.build_span_exporter(resource).unwrap();
        assert_eq!(spans.transport.url, "http://collector:4317/v1/traces");
    }

    #[test]
    fn token_is_carried_into_the_transport() {
        let builder = OtlpExporterBuilder::new().with_token("secret");
        let resource = Resource::builder_empty().build();
        let spans = builder.build_span_exporter(resource).unwrap();
        assert_eq!(spans.transport.token.as_deref(), Some("secret"));
    }

    #[test]
    fn default_codec_is_json() {
        let builder = OtlpExporterBuilder::new();
        assert_eq!(builder.codec.content_type(), "application/json");
    }
}
