//! Reconnect backoff
//!
//! Delays grow as `min(cap, base * 2^attempt)` with a bounded random spread.
//! Within one failure streak a delay is never shorter than the one before it.

use crate::config::ReconnectConfig;
use core::time::Duration;

/// Exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter_ratio: f64,
    rng: fastrand::Rng,
    last_delay: Option<Duration>,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self::with_rng(config, fastrand::Rng::new())
    }

    /// Create a backoff with a deterministic jitter sequence
    pub fn with_seed(config: &ReconnectConfig, seed: u64) -> Self {
        Self::with_rng(config, fastrand::Rng::with_seed(seed))
    }

    fn with_rng(config: &ReconnectConfig, rng: fastrand::Rng) -> Self {
        Self {
            base: config.base_delay,
            cap: config.max_delay,
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0 / 3.0),
            rng,
            last_delay: None,
        }
    }

    /// Delay before jitter for the given zero-based attempt
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Delay to wait before the given zero-based attempt
    pub fn next_delay(&mut self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_millis() as f64;
        let spread = nominal * self.jitter_ratio * (self.rng.f64() * 2.0 - 1.0);
        let cap = self.cap.as_millis() as f64;
        let jittered = (nominal + spread).clamp(0.0, cap);

        let mut delay = Duration::from_millis(jittered.round() as u64);
        if let Some(last) = self.last_delay {
            delay = delay.max(last);
        }
        self.last_delay = Some(delay);
        delay
    }

    /// Start a new failure streak
    pub fn reset(&mut self) {
        self.last_delay = None;
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(jitter_ratio: f64) -> ReconnectConfig {
        ReconnectConfig {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_ratio,
            max_attempts: 10,
            retry_initial_connect: true,
        }
    }

    #[test]
    fn nominal_delay_doubles_until_cap() {
        let backoff = Backoff::new(&config(0.0));
        assert_eq!(backoff.nominal_delay(0), Duration::from_millis(500));
        assert_eq!(backoff.nominal_delay(1), Duration::from_secs(1));
        assert_eq!(backoff.nominal_delay(3), Duration::from_secs(4));
        assert_eq!(backoff.nominal_delay(6), Duration::from_secs(30));
        assert_eq!(backoff.nominal_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn without_jitter_delays_are_exact() {
        let mut backoff = Backoff::with_seed(&config(0.0), 7);
        let delays: Vec<_> = (0..4).map(|n| backoff.next_delay(n)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
            ]
        );
    }

    #[test]
    fn reset_starts_a_new_streak() {
        let mut backoff = Backoff::with_seed(&config(0.0), 7);
        backoff.next_delay(0);
        backoff.next_delay(5);
        backoff.reset();
        assert_eq!(backoff.next_delay(0), Duration::from_millis(500));
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Backoff::with_seed(&config(0.3), 99);
        let mut b = Backoff::with_seed(&config(0.3), 99);
        for attempt in 0..8 {
            assert_eq!(a.next_delay(attempt), b.next_delay(attempt));
        }
    }

    proptest! {
        #[test]
        fn delays_never_decrease_and_respect_cap(seed in any::<u64>(), jitter in 0.0f64..=0.33) {
            let mut backoff = Backoff::with_seed(&config(jitter), seed);
            let mut previous = Duration::ZERO;
            for attempt in 0..16 {
                let delay = backoff.next_delay(attempt);
                prop_assert!(delay >= previous);
                prop_assert!(delay <= backoff.cap());
                previous = delay;
            }
        }

        #[test]
        fn jitter_stays_within_ratio(seed in any::<u64>(), attempt in 0u32..5) {
            let cfg = config(0.25);
            let mut backoff = Backoff::with_seed(&cfg, seed);
            let nominal = backoff.nominal_delay(attempt).as_millis() as f64;
            let delay = backoff.next_delay(attempt).as_millis() as f64;
            prop_assert!(delay >= (nominal * 0.75).floor());
            prop_assert!(delay <= (nominal * 1.25).ceil());
        }
    }
}
