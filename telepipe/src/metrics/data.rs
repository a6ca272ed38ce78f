//! Snapshot types produced by the metric registry at collect time.

use std::borrow::Cow;
use std::time::SystemTime;

use crate::common::KeyValue;

/// Everything the registry knows at one collect tick, the input to
/// metrics exporters. Temporality is cumulative: sums and histograms
/// carry totals since instrument creation.
#[derive(Clone, Debug, Default)]
pub struct MetricsSnapshot {
    /// One entry per registered instrument.
    pub metrics: Vec<Metric>,
}

impl MetricsSnapshot {
    /// Whether no instrument produced any data point.
    pub fn is_empty(&self) -> bool {
        self.metrics.iter().all(|metric| metric.data.is_empty())
    }
}

/// The collected state of one instrument.
#[derive(Clone, Debug)]
pub struct Metric {
    /// The instrument name.
    pub name: Cow<'static, str>,
    /// The instrument description.
    pub description: Cow<'static, str>,
    /// The aggregated data.
    pub data: MetricData,
}

/// Aggregated data, by instrument kind.
#[derive(Clone, Debug)]
pub enum MetricData {
    /// Counter and up-down counter data.
    Sum {
        /// Whether the sum only ever increases.
        monotonic: bool,
        /// One point per label set.
        points: Vec<SumPoint>,
    },
    /// Histogram data.
    Histogram {
        /// One point per label set.
        points: Vec<HistogramPoint>,
    },
    /// Observable gauge data, sampled at collect time.
    Gauge {
        /// The observations made by the gauge callback.
        points: Vec<GaugePoint>,
    },
}

impl MetricData {
    /// Whether the data carries no points.
    pub fn is_empty(&self) -> bool {
        match self {
            MetricData::Sum { points, .. } => points.is_empty(),
            MetricData::Histogram { points } => points.is_empty(),
            MetricData::Gauge { points } => points.is_empty(),
        }
    }
}

/// A single sum value for one label set.
#[derive(Clone, Debug)]
pub struct SumPoint {
    /// The label set, sorted by key.
    pub attributes: Vec<KeyValue>,
    /// The accumulated value.
    pub value: f64,
    /// When accumulation began.
    pub start_time: SystemTime,
    /// When the point was collected.
    pub time: SystemTime,
}

/// Bucketed observations for one label set.
#[derive(Clone, Debug)]
pub struct HistogramPoint {
    /// The label set, sorted by key.
    pub attributes: Vec<KeyValue>,
    /// The bucket boundaries; the final bucket is unbounded.
    pub bounds: Vec<f64>,
    /// Observation counts per bucket, one longer than `bounds`.
    pub bucket_counts: Vec<u64>,
    /// Total number of observations.
    pub count: u64,
    /// Sum of all observed values.
    pub sum: f64,
    /// Smallest observed value, if any observation was made.
    pub min: Option<f64>,
    /// Largest observed value, if any observation was made.
    pub max: Option<f64>,
    /// When accumulation began.
    pub start_time: SystemTime,
    /// When the point was collected.
    pub time: SystemTime,
}

/// One gauge observation.
#[derive(Clone, Debug)]
pub struct GaugePoint {
    /// The label set as observed.
    pub attributes: Vec<KeyValue>,
    /// The observed value.
    pub value: f64,
    /// When the observation was made.
    pub time: SystemTime,
}
