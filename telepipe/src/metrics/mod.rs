//! Metric instruments and their registry.
//!
//! A [`Meter`] hands out instrument handles: [`Counter`] (monotonic),
//! [`UpDownCounter`], [`Histogram`] and [`ObservableGauge`]. Handles are
//! cheap to clone and safe to use from any thread. Accumulation is keyed
//! by label set, with identity independent of label insertion order, so
//! cardinality is bounded by the instrumented call sites.
//!
//! Nothing is pushed anywhere at record time; the [`PeriodicReader`]
//! drives [`Meter::collect`] on its export interval, which also invokes
//! every observable-gauge callback so gauge values reflect the state at
//! export time.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use thiserror::Error;

use crate::common::{AttributeSet, KeyValue};

mod data;
mod in_memory_exporter;
mod reader;

pub use data::{GaugePoint, HistogramPoint, Metric, MetricData, MetricsSnapshot, SumPoint};
pub use in_memory_exporter::InMemoryMetricsExporter;
pub use reader::{PeriodicReader, PeriodicReaderBuilder};

/// Errors returned by instrument operations.
#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum MetricError {
    /// A counter was asked to decrease. The accumulated state is left
    /// untouched.
    #[error("counter delta must be non-negative, got {0}")]
    NegativeDelta(f64),
}

trait Instrument: Send + Sync {
    fn collect(&self) -> Metric;
}

#[derive(Clone, Debug)]
struct Descriptor {
    name: Cow<'static, str>,
    description: Cow<'static, str>,
}

/// Holds named instruments and produces a snapshot on demand.
///
/// Cloning a `Meter` is cheap; clones share the instrument registry.
#[derive(Clone, Default)]
pub struct Meter {
    instruments: Arc<Mutex<Vec<Arc<dyn Instrument>>>>,
}

impl Meter {
    /// Create an empty registry.
    pub fn new() -> Self {
        Meter::default()
    }

    fn register<I: Instrument + 'static>(&self, instrument: Arc<I>) {
        if let Ok(mut instruments) = self.instruments.lock() {
            instruments.push(instrument);
        }
    }

    /// Create a monotonic counter. Negative deltas are rejected at the
    /// call site.
    pub fn create_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
    ) -> Counter {
        let state = Arc::new(SumState::new(name, description, true));
        self.register(Arc::clone(&state));
        Counter { state }
    }

    /// Create a counter that can go up and down.
    pub fn create_up_down_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
    ) -> UpDownCounter {
        let state = Arc::new(SumState::new(name, description, false));
        self.register(Arc::clone(&state));
        UpDownCounter { state }
    }

    /// Create a histogram with explicit bucket boundaries. NaN
    /// boundaries are discarded and the rest sorted; a value equal to a
    /// boundary falls into that boundary's bucket, and the final bucket
    /// is unbounded.
    pub fn create_histogram(
        &self,
        name: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
        boundaries: Vec<f64>,
    ) -> Histogram {
        let state = Arc::new(HistogramState::new(name, description, boundaries));
        self.register(Arc::clone(&state));
        Histogram { state }
    }

    /// Create a gauge whose value is computed by `callback` at every
    /// collect tick. The callback is never polled in the background.
    pub fn create_observable_gauge(
        &self,
        name: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
        callback: impl Fn(&mut GaugeObserver) + Send + Sync + 'static,
    ) -> ObservableGauge {
        let state = Arc::new(GaugeState {
            descriptor: Descriptor {
                name: name.into(),
                description: description.into(),
            },
            callback: Box::new(callback),
        });
        self.register(Arc::clone(&state));
        ObservableGauge { state }
    }

    /// Produce a snapshot of every registered instrument, invoking the
    /// observable-gauge callbacks. Accumulators are not reset.
    pub fn collect(&self) -> MetricsSnapshot {
        let Ok(instruments) = self.instruments.lock() else {
            return MetricsSnapshot::default();
        };
        MetricsSnapshot {
            metrics: instruments.iter().map(|i| i.collect()).collect(),
        }
    }
}

impl Debug for Meter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let count = self.instruments.lock().map(|i| i.len()).unwrap_or(0);
        f.debug_struct("Meter").field("instruments", &count).finish()
    }
}

struct SumState {
    descriptor: Descriptor,
    monotonic: bool,
    start: SystemTime,
    points: Mutex<HashMap<AttributeSet, f64>>,
}

impl SumState {
    fn new(
        name: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
        monotonic: bool,
    ) -> Self {
        SumState {
            descriptor: Descriptor {
                name: name.into(),
                description: description.into(),
            },
            monotonic,
            start: SystemTime::now(),
            points: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, delta: f64, attributes: &[KeyValue]) {
        if let Ok(mut points) = self.points.lock() {
            *points.entry(AttributeSet::from(attributes)).or_insert(0.0) += delta;
        }
    }
}

impl Instrument for SumState {
    fn collect(&self) -> Metric {
        let time = SystemTime::now();
        let points = self
            .points
            .lock()
            .map(|points| {
                points
                    .iter()
                    .map(|(attributes, value)| SumPoint {
                        attributes: attributes.to_vec(),
                        value: *value,
                        start_time: self.start,
                        time,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Metric {
            name: self.descriptor.name.clone(),
            description: self.descriptor.description.clone(),
            data: MetricData::Sum {
                monotonic: self.monotonic,
                points,
            },
        }
    }
}

/// A monotonically increasing sum.
#[derive(Clone)]
pub struct Counter {
    state: Arc<SumState>,
}

impl Counter {
    /// Add a non-negative delta to the accumulator for the given label
    /// set. A negative delta is an error and leaves the state untouched.
    pub fn add(&self, delta: f64, attributes: &[KeyValue]) -> Result<(), MetricError> {
        if delta < 0.0 {
            return Err(MetricError::NegativeDelta(delta));
        }
        self.state.record(delta, attributes);
        Ok(())
    }
}

impl Debug for Counter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("name", &self.state.descriptor.name)
            .finish()
    }
}

/// A sum that can increase and decrease.
#[derive(Clone)]
pub struct UpDownCounter {
    state: Arc<SumState>,
}

impl UpDownCounter {
    /// Add a delta of any sign to the accumulator for the given label
    /// set.
    pub fn add(&self, delta: f64, attributes: &[KeyValue]) {
        self.state.record(delta, attributes);
    }
}

impl Debug for UpDownCounter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpDownCounter")
            .field("name", &self.state.descriptor.name)
            .finish()
    }
}

#[derive(Clone, Debug)]
struct Buckets {
    counts: Vec<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Buckets {
    fn new(n: usize) -> Self {
        Buckets {
            counts: vec![0; n],
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

struct HistogramState {
    descriptor: Descriptor,
    bounds: Vec<f64>,
    start: SystemTime,
    points: Mutex<HashMap<AttributeSet, Buckets>>,
}

impl HistogramState {
    fn new(
        name: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
        mut bounds: Vec<f64>,
    ) -> Self {
        bounds.retain(|bound| !bound.is_nan());
        bounds.sort_by(|a, b| a.partial_cmp(b).expect("NaNs filtered out"));
        HistogramState {
            descriptor: Descriptor {
                name: name.into(),
                description: description.into(),
            },
            bounds,
            start: SystemTime::now(),
            points: Mutex::new(HashMap::new()),
        }
    }
}

impl Instrument for HistogramState {
    fn collect(&self) -> Metric {
        let time = SystemTime::now();
        let points = self
            .points
            .lock()
            .map(|points| {
                points
                    .iter()
                    .map(|(attributes, buckets)| HistogramPoint {
                        attributes: attributes.to_vec(),
                        bounds: self.bounds.clone(),
                        bucket_counts: buckets.counts.clone(),
                        count: buckets.count,
                        sum: buckets.sum,
                        min: (buckets.count > 0).then_some(buckets.min),
                        max: (buckets.count > 0).then_some(buckets.max),
                        start_time: self.start,
                        time,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Metric {
            name: self.descriptor.name.clone(),
            description: self.descriptor.description.clone(),
            data: MetricData::Histogram { points },
        }
    }
}

/// Records observations into fixed boundary buckets.
#[derive(Clone)]
pub struct Histogram {
    state: Arc<HistogramState>,
}

impl Histogram {
    /// Record an observation for the given label set. NaN and infinite
    /// values are ignored.
    pub fn record(&self, value: f64, attributes: &[KeyValue]) {
        if value.is_nan() || value.is_infinite() {
            return;
        }
        // `partition_point` returns the index of the first boundary not
        // below `value`, so a value equal to a boundary lands in that
        // boundary's bucket and anything above the last boundary lands
        // in the unbounded final bucket.
        let index = self.state.bounds.partition_point(|&bound| bound < value);
        let bucket_count = self.state.bounds.len() + 1;
        if let Ok(mut points) = self.state.points.lock() {
            let buckets = points
                .entry(AttributeSet::from(attributes))
                .or_insert_with(|| Buckets::new(bucket_count));
            buckets.counts[index] += 1;
            buckets.count += 1;
            buckets.sum += value;
            if value < buckets.min {
                buckets.min = value;
            }
            if value > buckets.max {
                buckets.max = value;
            }
        }
    }
}

impl Debug for Histogram {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram")
            .field("name", &self.state.descriptor.name)
            .field("bounds", &self.state.bounds)
            .finish()
    }
}

/// Collects the observations made by a gauge callback during one
/// collect tick.
#[derive(Debug)]
pub struct GaugeObserver {
    time: SystemTime,
    points: Vec<GaugePoint>,
}

impl GaugeObserver {
    /// Report the current value for the given label set.
    pub fn observe(&mut self, value: f64, attributes: &[KeyValue]) {
        self.points.push(GaugePoint {
            attributes: attributes.to_vec(),
            value,
            time: self.time,
        });
    }
}

struct GaugeState {
    descriptor: Descriptor,
    callback: Box<dyn Fn(&mut GaugeObserver) + Send + Sync>,
}

impl Instrument for GaugeState {
    fn collect(&self) -> Metric {
        let mut observer = GaugeObserver {
            time: SystemTime::now(),
            points: Vec::new(),
        };
        (self.callback)(&mut observer);
        Metric {
            name: self.descriptor.name.clone(),
            description: self.descriptor.description.clone(),
            data: MetricData::Gauge {
                points: observer.points,
            },
        }
    }
}

/// A gauge whose value is pulled from its callback at collect time.
///
/// The handle itself records nothing; it exists so call sites can keep
/// a named reference to the registration.
#[derive(Clone)]
pub struct ObservableGauge {
    state: Arc<GaugeState>,
}

impl ObservableGauge {
    /// The instrument name.
    pub fn name(&self) -> &str {
        &self.state.descriptor.name
    }
}

impl Debug for ObservableGauge {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableGauge")
            .field("name", &self.state.descriptor.name)
            .finish()
    }
}
