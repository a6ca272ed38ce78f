//! Trace sampling.

use super::TraceId;

/// Decides at root-span creation whether a trace is recorded.
///
/// The decision is a pure function of the trace id, so every component
/// observing the same trace reaches the same verdict, and a given ratio
/// retains a stable subset of traffic.
#[derive(Clone, Debug)]
pub enum Sampler {
    /// Record every trace.
    AlwaysOn,
    /// Record no traces.
    AlwaysOff,
    /// Record the given fraction of traces, selected by trace id.
    TraceIdRatio(f64),
}

impl Sampler {
    /// A ratio sampler with the ratio clamped into `[0.0, 1.0]`.
    pub fn ratio(ratio: f64) -> Self {
        if ratio.is_nan() {
            return Sampler::TraceIdRatio(1.0);
        }
        Sampler::TraceIdRatio(ratio.clamp(0.0, 1.0))
    }

    /// Whether a trace with the given id should be recorded.
    pub fn should_sample(&self, trace_id: TraceId) -> bool {
        match self {
            Sampler::AlwaysOn => true,
            Sampler::AlwaysOff => false,
            Sampler::TraceIdRatio(ratio) => {
                if *ratio >= 1.0 {
                    true
                } else if *ratio <= 0.0 {
                    false
                } else {
                    let threshold = (ratio * u64::MAX as f64) as u64;
                    (trace_id.to_u128() as u64) < threshold
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::RandomIdGenerator;

    #[test]
    fn edge_ratios_behave_like_on_off() {
        let id = RandomIdGenerator.new_trace_id();
        assert!(Sampler::ratio(1.0).should_sample(id));
        assert!(!Sampler::ratio(0.0).should_sample(id));
        assert!(Sampler::AlwaysOn.should_sample(id));
        assert!(!Sampler::AlwaysOff.should_sample(id));
    }

    #[test]
    fn decision_is_deterministic_per_trace_id() {
        let sampler = Sampler::ratio(0.5);
        let id = RandomIdGenerator.new_trace_id();
        let first = sampler.should_sample(id);
        for _ in 0..10 {
            assert_eq!(sampler.should_sample(id), first);
        }
    }

    #[test]
    fn ratio_retains_roughly_the_requested_fraction() {
        let sampler = Sampler::ratio(0.5);
        let generator = RandomIdGenerator;
        let sampled = (0..1_000)
            .filter(|_| sampler.should_sample(generator.new_trace_id()))
            .count();
        assert!((300..=700).contains(&sampled), "sampled {sampled} of 1000");
    }

    #[test]
    fn out_of_range_ratios_are_clamped() {
        let id = RandomIdGenerator.new_trace_id();
        assert!(Sampler::ratio(7.0).should_sample(id));
        assert!(!Sampler::ratio(-2.0).should_sample(id));
    }
}
