//! Per-source circuit breaker
//!
//! Three consecutive hard errors within a 60s window open the circuit for a
//! 60s cooldown. Timeouts are budget noise, not breaker input.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

const FAILURE_THRESHOLD: u32 = 3;
const FAILURE_WINDOW: Duration = Duration::from_secs(60);
const COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct BreakerState {
    consecutive_failures: u32,
    first_failure: Option<Instant>,
    open_until: Option<Instant>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            first_failure: None,
            open_until: None,
        }
    }
}

#[derive(Default)]
pub struct CircuitBreaker {
    states: DashMap<String, BreakerState>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while the source is in cooldown
    pub fn is_open(&self, source: &str) -> bool {
        self.states
            .get(source)
            .and_then(|s| s.open_until)
            .is_some_and(|until| Instant::now() < until)
    }

    pub fn record_success(&self, source: &str) {
        if let Some(mut state) = self.states.get_mut(source) {
            state.consecutive_failures = 0;
            state.first_failure = None;
            state.open_until = None;
        }
    }

    /// Record a hard error; opens the circuit at the threshold
    pub fn record_failure(&self, source: &str) {
        let now = Instant::now();
        let mut state = self.states.entry(source.to_string()).or_default();

        // Stale streaks restart the window
        match state.first_failure {
            Some(first) if now.duration_since(first) <= FAILURE_WINDOW => {
                state.consecutive_failures += 1;
            }
            _ => {
                state.first_failure = Some(now);
                state.consecutive_failures = 1;
            }
        }

        if state.consecutive_failures >= FAILURE_THRESHOLD {
            state.open_until = Some(now + COOLDOWN);
            state.consecutive_failures = 0;
            state.first_failure = None;
            warn!(source, cooldown_secs = COOLDOWN.as_secs(), "circuit opened");
            metrics::counter!("intel_circuit_opened_total").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_three_consecutive_failures() {
        let breaker = CircuitBreaker::new();
        breaker.record_failure("virustotal");
        breaker.record_failure("virustotal");
        assert!(!breaker.is_open("virustotal"));
        breaker.record_failure("virustotal");
        assert!(breaker.is_open("virustotal"));
    }

    #[test]
    fn success_resets_the_streak() {
        let breaker = CircuitBreaker::new();
        breaker.record_failure("otx");
        breaker.record_failure("otx");
        breaker.record_success("otx");
        breaker.record_failure("otx");
        breaker.record_failure("otx");
        assert!(!breaker.is_open("otx"));
    }

    #[test]
    fn sources_are_independent() {
        let breaker = CircuitBreaker::new();
        for _ in 0..3 {
            breaker.record_failure("abusech");
        }
        assert!(breaker.is_open("abusech"));
        assert!(!breaker.is_open("virustotal"));
    }
}
