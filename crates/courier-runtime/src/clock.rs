//! Engine clock
//!
//! Wall-clock timestamps derived from tokio's monotonic clock, so deadlines
//! computed by the pipelines line up with the engine's timers and honour
//! tokio's paused time in tests.

use courier_core::{TimeSource, Timestamp};
use tokio::time::Instant;

/// Time source anchored to a tokio [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct TokioTimeSource {
    origin: Instant,
    epoch: Timestamp,
}

impl TokioTimeSource {
    /// Anchor the current instant to the current wall-clock time
    pub fn new() -> Self {
        Self::starting_at(Timestamp::now())
    }

    /// Anchor the current instant to an arbitrary timestamp
    pub fn starting_at(epoch: Timestamp) -> Self {
        Self {
            origin: Instant::now(),
            epoch,
        }
    }
}

impl Default for TokioTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TokioTimeSource {
    fn now(&self) -> Timestamp {
        self.epoch + self.origin.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn follows_paused_tokio_time() {
        let clock = TokioTimeSource::starting_at(Timestamp::new(10_000));
        assert_eq!(clock.now(), Timestamp::new(10_000));

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(clock.now(), Timestamp::new(11_500));
        assert_eq!(
            Timestamp::new(12_000).duration_since(clock.now()),
            Duration::from_millis(500)
        );
    }
}
