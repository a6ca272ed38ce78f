//! Random trace and span id generation.

use rand::Rng;

use super::{SpanId, TraceId};

/// Generates random, non-zero trace and span ids from the thread-local
/// rng.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomIdGenerator;

impl RandomIdGenerator {
    /// Generate a new trace id.
    pub fn new_trace_id(&self) -> TraceId {
        let mut rng = rand::rng();
        loop {
            let id = rng.random::<u128>();
            if id != 0 {
                return TraceId::from_u128(id);
            }
        }
    }

    /// Generate a new span id.
    pub fn new_span_id(&self) -> SpanId {
        let mut rng = rand::rng();
        loop {
            let id = rng.random::<u64>();
            if id != 0 {
                return SpanId::from_u64(id);
            }
        }
    }
}
