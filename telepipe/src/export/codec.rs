//! The opaque wire-encoding seam.
//!
//! Batch processors and the metric reader never see the wire format;
//! they hand finished records to an exporter, which asks its [`Codec`]
//! for bytes. [`JsonCodec`] produces OTLP-JSON-shaped payloads: one
//! resource envelope, one instrumentation scope, hex-encoded ids and
//! unix-nano timestamps rendered as strings.

use std::fmt::Debug;
use std::time::SystemTime;

use serde_json::{json, Map, Value as JsonValue};

use crate::common::{KeyValue, Value};
use crate::logs::LogRecord;
use crate::metrics::{GaugePoint, HistogramPoint, Metric, MetricData, MetricsSnapshot, SumPoint};
use crate::resource::Resource;
use crate::trace::{ExceptionRecord, SpanData, Status};

use super::ExportError;

const SCOPE_NAME: &str = "telepipe";

/// Encodes batches into transmittable bytes.
pub trait Codec: Send + Sync + Debug {
    /// The content type of the encoded payloads.
    fn content_type(&self) -> &'static str;

    /// Encode a batch of finished spans.
    fn encode_spans(&self, resource: &Resource, batch: &[SpanData])
        -> Result<Vec<u8>, ExportError>;

    /// Encode a batch of log records.
    fn encode_logs(&self, resource: &Resource, batch: &[LogRecord])
        -> Result<Vec<u8>, ExportError>;

    /// Encode a metrics snapshot.
    fn encode_metrics(
        &self,
        resource: &Resource,
        snapshot: &MetricsSnapshot,
    ) -> Result<Vec<u8>, ExportError>;
}

/// The default OTLP-JSON codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode_spans(
        &self,
        resource: &Resource,
        batch: &[SpanData],
    ) -> Result<Vec<u8>, ExportError> {
        let payload = json!({
            "resourceSpans": [{
                "resource": resource_json(resource),
                "scopeSpans": [{
                    "scope": scope_json(),
                    "spans": batch.iter().map(span_json).collect::<Vec<_>>(),
                }],
            }],
        });
        to_bytes(&payload)
    }

    fn encode_logs(
        &self,
        resource: &Resource,
        batch: &[LogRecord],
    ) -> Result<Vec<u8>, ExportError> {
        let payload = json!({
            "resourceLogs": [{
                "resource": resource_json(resource),
                "scopeLogs": [{
                    "scope": scope_json(),
                    "logRecords": batch.iter().map(log_json).collect::<Vec<_>>(),
                }],
            }],
        });
        to_bytes(&payload)
    }

    fn encode_metrics(
        &self,
        resource: &Resource,
        snapshot: &MetricsSnapshot,
    ) -> Result<Vec<u8>, ExportError> {
        let payload = json!({
            "resourceMetrics": [{
                "resource": resource_json(resource),
                "scopeMetrics": [{
                    "scope": scope_json(),
                    "metrics": snapshot.metrics.iter().map(metric_json).collect::<Vec<_>>(),
                }],
            }],
        });
        to_bytes(&payload)
    }
}

fn to_bytes(payload: &JsonValue) -> Result<Vec<u8>, ExportError> {
    serde_json::to_vec(payload).map_err(|err| ExportError::Encode(err.to_string()))
}

fn scope_json() -> JsonValue {
    json!({ "name": SCOPE_NAME, "version": env!("CARGO_PKG_VERSION") })
}

// Unix nanos exceed 2^53; OTLP-JSON renders them as decimal strings.
fn unix_nanos(time: SystemTime) -> String {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .to_string()
}

fn attribute_value(value: &Value) -> JsonValue {
    match value {
        Value::Bool(v) => json!({ "boolValue": v }),
        Value::I64(v) => json!({ "intValue": v.to_string() }),
        Value::F64(v) => json!({ "doubleValue": v }),
        Value::String(v) => json!({ "stringValue": v.as_ref() }),
    }
}

fn attributes_json(attributes: &[KeyValue]) -> JsonValue {
    JsonValue::Array(
        attributes
            .iter()
            .map(|kv| json!({ "key": kv.key.as_str(), "value": attribute_value(&kv.value) }))
            .collect(),
    )
}

fn resource_json(resource: &Resource) -> JsonValue {
    json!({ "attributes": attributes_json(&resource.to_key_values()) })
}

fn status_json(status: &Status) -> JsonValue {
    match status {
        Status::Unset => json!({}),
        Status::Ok => json!({ "code": 1 }),
        Status::Error { description } => json!({ "code": 2, "message": description }),
    }
}

fn exception_json(exception: &ExceptionRecord, time: &str) -> JsonValue {
    let mut attributes = vec![
        json!({ "key": "exception.type", "value": { "stringValue": exception.exception_type } }),
        json!({ "key": "exception.message", "value": { "stringValue": exception.message } }),
    ];
    if let Some(stacktrace) = &exception.stacktrace {
        attributes.push(
            json!({ "key": "exception.stacktrace", "value": { "stringValue": stacktrace } }),
        );
    }
    json!({ "name": "exception", "timeUnixNano": time, "attributes": attributes })
}

fn span_json(span: &SpanData) -> JsonValue {
    let end = unix_nanos(span.end_time);
    json!({
        "traceId": span.span_context.trace_id().to_string(),
        "spanId": span.span_context.span_id().to_string(),
        "parentSpanId": if span.parent_span_id.is_valid() {
            span.parent_span_id.to_string()
        } else {
            String::new()
        },
        "name": span.name.as_ref(),
        "startTimeUnixNano": unix_nanos(span.start_time),
        "endTimeUnixNano": end.clone(),
        "attributes": attributes_json(&span.attributes),
        "events": span
            .exceptions
            .iter()
            .map(|exception| exception_json(exception, &end))
            .collect::<Vec<_>>(),
        "status": status_json(&span.status),
    })
}

fn log_json(record: &LogRecord) -> JsonValue {
    let mut object = Map::new();
    object.insert("timeUnixNano".to_owned(), json!(unix_nanos(record.timestamp)));
    object.insert("severityNumber".to_owned(), json!(record.severity.rank()));
    object.insert("severityText".to_owned(), json!(record.severity.as_str()));
    object.insert("body".to_owned(), json!({ "stringValue": record.body }));
    object.insert("attributes".to_owned(), attributes_json(&record.attributes));
    if let (Some(trace_id), Some(span_id)) = (record.trace_id, record.span_id) {
        object.insert("traceId".to_owned(), json!(trace_id.to_string()));
        object.insert("spanId".to_owned(), json!(span_id.to_string()));
        object.insert(
            "flags".to_owned(),
            json!(record.trace_flags.map(|flags| flags.to_u8()).unwrap_or(0)),
        );
    }
    JsonValue::Object(object)
}

fn sum_point_json(point: &SumPoint) -> JsonValue {
    json!({
        "attributes": attributes_json(&point.attributes),
        "startTimeUnixNano": unix_nanos(point.start_time),
        "timeUnixNano": unix_nanos(point.time),
        "asDouble": point.value,
    })
}

fn histogram_point_json(point: &HistogramPoint) -> JsonValue {
    let mut object = Map::new();
    object.insert("attributes".to_owned(), attributes_json(&point.attributes));
    object.insert(
        "startTimeUnixNano".to_owned(),
        json!(unix_nanos(point.start_time)),
    );
    object.insert("timeUnixNano".to_owned(), json!(unix_nanos(point.time)));
    object.insert("count".to_owned(), json!(point.count.to_string()));
    object.insert("sum".to_owned(), json!(point.sum));
    object.insert(
        "bucketCounts".to_owned(),
        json!(point
            .bucket_counts
            .iter()
            .map(|count| count.to_string())
            .collect::<Vec<_>>()),
    );
    object.insert("explicitBounds".to_owned(), json!(point.bounds));
    if let Some(min) = point.min {
        object.insert("min".to_owned(), json!(min));
    }
    if let Some(max) = point.max {
        object.insert("max".to_owned(), json!(max));
    }
    JsonValue::Object(object)
}

fn gauge_point_json(point: &GaugePoint) -> JsonValue {
    json!({
        "attributes": attributes_json(&point.attributes),
        "timeUnixNano": unix_nanos(point.time),
        "asDouble": point.value,
    })
}

fn metric_json(metric: &Metric) -> JsonValue {
    let mut object = Map::new();
    object.insert("name".to_owned(), json!(metric.name.as_ref()));
    object.insert("description".to_owned(), json!(metric.description.as_ref()));
    match &metric.data {
        MetricData::Sum { monotonic, points } => {
            object.insert(
                "sum".to_owned(),
                json!({
                    "dataPoints": points.iter().map(sum_point_json).collect::<Vec<_>>(),
                    "isMonotonic": monotonic,
                    // 2 = cumulative on the OTLP temporality scale.
                    "aggregationTemporality": 2,
                }),
            );
        }
        MetricData::Histogram { points } => {
            object.insert(
                "histogram".to_owned(),
                json!({
                    "dataPoints": points.iter().map(histogram_point_json).collect::<Vec<_>>(),
                    "aggregationTemporality": 2,
                }),
            );
        }
        MetricData::Gauge { points } => {
            object.insert(
                "gauge".to_owned(),
                json!({
                    "dataPoints": points.iter().map(gauge_point_json).collect::<Vec<_>>(),
                }),
            );
        }
    }
    JsonValue::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::Severity;
    use crate::trace::{SpanContext, SpanId, TraceFlags, TraceId};
    use std::time::Duration;

    fn test_resource() -> Resource {
        Resource::builder_empty()
            .with_attribute(KeyValue::new("service.name", "codec-test"))
            .build()
    }

    fn test_span() -> SpanData {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        SpanData {
            span_context: SpanContext::new(
                TraceId::from_u128(0xabc),
                SpanId::from_u64(0x00f0_67aa_0ba9_02b7),
                TraceFlags::SAMPLED,
            ),
            parent_span_id: SpanId::INVALID,
            name: "op".into(),
            start_time: start,
            end_time: start + Duration::from_millis(250),
            status: Status::error("boom"),
            attributes: vec![KeyValue::new("http.method", "POST")],
            exceptions: vec![ExceptionRecord {
                exception_type: "SimulatedError".to_owned(),
                message: "boom".to_owned(),
                stacktrace: None,
            }],
        }
    }

    #[test]
    fn spans_encode_with_hex_ids_and_nano_timestamps() {
        let codec = JsonCodec;
        let bytes = codec
            .encode_spans(&test_resource(), &[test_span()])
            .unwrap();
        let payload: JsonValue = serde_json::from_slice(&bytes).unwrap();

        let span = &payload["resourceSpans"][0]["scopeSpans"][0]["spans"][0];
        assert_eq!(span["traceId"], "00000000000000000000000000000abc");
        assert_eq!(span["spanId"].as_str().unwrap().len(), 16);
        assert_eq!(span["parentSpanId"], "");
        assert_eq!(
            span["startTimeUnixNano"],
            "1700000000000000000"
        );
        assert_eq!(span["status"]["code"], 2);
        assert_eq!(span["events"][0]["name"], "exception");

        let resource = &payload["resourceSpans"][0]["resource"]["attributes"][0];
        assert_eq!(resource["key"], "service.name");
        assert_eq!(resource["value"]["stringValue"], "codec-test");
    }

    #[test]
    fn logs_encode_correlation_ids_only_when_present() {
        let codec = JsonCodec;
        let correlated = LogRecord {
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(1),
            severity: Severity::Warn,
            body: "careful".to_owned(),
            attributes: vec![],
            trace_id: Some(TraceId::from_u128(7)),
            span_id: Some(SpanId::from_u64(9)),
            trace_flags: Some(TraceFlags::SAMPLED),
        };
        let plain = LogRecord {
            trace_id: None,
            span_id: None,
            trace_flags: None,
            ..correlated.clone()
        };

        let bytes = codec
            .encode_logs(&test_resource(), &[correlated, plain])
            .unwrap();
        let payload: JsonValue = serde_json::from_slice(&bytes).unwrap();
        let records = &payload["resourceLogs"][0]["scopeLogs"][0]["logRecords"];
        assert_eq!(records[0]["severityNumber"], 13);
        assert_eq!(records[0]["severityText"], "WARN");
        assert_eq!(
            records[0]["traceId"],
            "00000000000000000000000000000007"
        );
        assert_eq!(records[0]["flags"], 1);
        assert!(records[1].get("traceId").is_none());
    }

    #[test]
    fn metrics_encode_cumulative_temporality() {
        let codec = JsonCodec;
        let snapshot = MetricsSnapshot {
            metrics: vec![Metric {
                name: "requests".into(),
                description: "total requests".into(),
                data: MetricData::Sum {
                    monotonic: true,
                    points: vec![SumPoint {
                        attributes: vec![KeyValue::new("route", "/health")],
                        value: 3.0,
                        start_time: SystemTime::UNIX_EPOCH,
                        time: SystemTime::UNIX_EPOCH + Duration::from_secs(2),
                    }],
                },
            }],
        };

        let bytes = codec.encode_metrics(&test_resource(), &snapshot).unwrap();
        let payload: JsonValue = serde_json::from_slice(&bytes).unwrap();
        let metric = &payload["resourceMetrics"][0]["scopeMetrics"][0]["metrics"][0];
        assert_eq!(metric["name"], "requests");
        assert_eq!(metric["sum"]["isMonotonic"], true);
        assert_eq!(metric["sum"]["aggregationTemporality"], 2);
        assert_eq!(metric["sum"]["dataPoints"][0]["asDouble"], 3.0);
    }
}
