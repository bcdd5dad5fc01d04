//! Rate-limited decision gate.
//!
//! A token bucket of depth one, refilled once per interval. The gate
//! protects the decision collaborator from being invoked more often than
//! the configured rate. The first request is always admitted.

use std::time::Duration;

use tokio::time::Instant;

/// Throttle for decision requests on the chat and autonomous paths.
#[derive(Debug, Clone)]
pub struct DecisionGate {
    /// Minimum spacing between two admitted decisions.
    interval: Duration,
    /// When the last admitted decision was accepted.
    last_accepted: Option<Instant>,
}

impl DecisionGate {
    /// Create a gate admitting at most one decision per `interval`.
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    /// Create a gate from a decisions-per-second rate.
    ///
    /// Non-positive and non-finite rates fall back to one decision per
    /// second. A rate too small to express as an interval admits only the
    /// first request.
    pub fn per_second(rate: f64) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
        Self::new(Duration::try_from_secs_f64(rate.recip()).unwrap_or(Duration::MAX))
    }

    /// Configured minimum interval.
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Ask whether a decision may run now. Advances the gate on success.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Same as [`Self::allow`] with an explicit clock reading.
    pub fn allow_at(&mut self, now: Instant) -> bool {
        let open = self
            .last_accepted
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if open {
            self.last_accepted = Some(now);
        }
        open
    }

    /// Forget the last accepted decision so the next request is admitted.
    pub const fn reset(&mut self) {
        self.last_accepted = None;
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn first_request_is_admitted() {
        let mut gate = DecisionGate::new(Duration::from_secs(60));
        assert!(gate.allow_at(Instant::now()));
    }

    #[test]
    fn half_second_interval_scenario() {
        let t0 = Instant::now();
        let mut gate = DecisionGate::new(ms(500));
        assert!(gate.allow_at(t0));
        assert!(!gate.allow_at(t0 + ms(100)));
        assert!(gate.allow_at(t0 + ms(600)));
    }

    #[test]
    fn requests_at_half_interval_admit_every_other() {
        let t0 = Instant::now();
        for n in [1_u32, 2, 5, 7, 10] {
            let mut gate = DecisionGate::new(ms(500));
            let admitted = (0..n).filter(|i| gate.allow_at(t0 + ms(250) * *i)).count();
            assert_eq!(admitted, n.div_ceil(2) as usize, "n = {n}");
        }
    }

    #[test]
    fn per_second_converts_rate() {
        assert_eq!(DecisionGate::per_second(2.0).interval(), ms(500));
        assert_eq!(DecisionGate::per_second(0.0).interval(), Duration::from_secs(1));
        assert_eq!(DecisionGate::per_second(f64::NAN).interval(), Duration::from_secs(1));
        assert_eq!(DecisionGate::per_second(1e-30).interval(), Duration::MAX);
    }

    #[test]
    fn unrepresentable_interval_admits_only_the_first_request() {
        let t0 = Instant::now();
        let mut gate = DecisionGate::per_second(1e-30);
        assert!(gate.allow_at(t0));
        assert!(!gate.allow_at(t0 + Duration::from_secs(86_400)));
    }
}
