//! Product tracking decisions.
//!
//! Each product integration owns one key in the session record. The strategy
//! turns the raw value found there (if any) into the value to store and
//! whether the session should carry an id.

/// Outcome of a tracking decision for one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingDecision {
    pub tracking_type: String,
    pub is_tracked: bool,
}

impl TrackingDecision {
    pub fn new(tracking_type: impl Into<String>, is_tracked: bool) -> Self {
        Self {
            tracking_type: tracking_type.into(),
            is_tracked,
        }
    }
}

pub trait TrackingStrategy {
    fn compute(&self, raw_tracking_type: Option<&str>) -> TrackingDecision;
}

impl<F> TrackingStrategy for F
where
    F: Fn(Option<&str>) -> TrackingDecision,
{
    fn compute(&self, raw_tracking_type: Option<&str>) -> TrackingDecision {
        self(raw_tracking_type)
    }
}

pub const TRACKED: &str = "1";
pub const NOT_TRACKED: &str = "0";

/// Samples sessions in or out once, then keeps the stored decision.
#[derive(Debug, Clone, Copy)]
pub struct SampledTracking {
    sample_rate: f64,
}

impl SampledTracking {
    /// `sample_rate` is a percentage in `0..=100`.
    pub fn new(sample_rate: f64) -> Self {
        Self { sample_rate }
    }

    fn draw(&self) -> bool {
        self.sample_rate > 0.0 && rand::random::<f64>() * 100.0 <= self.sample_rate
    }
}

impl TrackingStrategy for SampledTracking {
    fn compute(&self, raw_tracking_type: Option<&str>) -> TrackingDecision {
        let tracking_type = match raw_tracking_type {
            Some(raw @ (TRACKED | NOT_TRACKED)) => raw,
            _ if self.draw() => TRACKED,
            _ => NOT_TRACKED,
        };
        TrackingDecision::new(tracking_type, tracking_type == TRACKED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_strategy() {
        let strategy = |raw: Option<&str>| TrackingDecision::new(raw.unwrap_or("x"), raw.is_none());
        assert_eq!(strategy.compute(None), TrackingDecision::new("x", true));
        assert_eq!(strategy.compute(Some("y")), TrackingDecision::new("y", false));
    }

    #[test]
    fn test_full_sample_rate_tracks() {
        let decision = SampledTracking::new(100.0).compute(None);
        assert_eq!(decision, TrackingDecision::new(TRACKED, true));
    }

    #[test]
    fn test_zero_sample_rate_never_tracks() {
        for _ in 0..100 {
            let decision = SampledTracking::new(0.0).compute(None);
            assert_eq!(decision, TrackingDecision::new(NOT_TRACKED, false));
        }
    }

    #[test]
    fn test_existing_decision_is_kept() {
        let strategy = SampledTracking::new(0.0);
        assert!(strategy.compute(Some(TRACKED)).is_tracked);

        let strategy = SampledTracking::new(100.0);
        assert!(!strategy.compute(Some(NOT_TRACKED)).is_tracked);
    }

    #[test]
    fn test_unknown_raw_value_is_redrawn() {
        let decision = SampledTracking::new(100.0).compute(Some("2"));
        assert_eq!(decision.tracking_type, TRACKED);
    }
}
