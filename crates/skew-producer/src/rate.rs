//! Fixed-rate pacing for the generation loop.

use skew_events::ConfigError;
use skew_lifecycle::CancellationToken;
use std::time::Duration;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Paces generation at a fixed events/second budget.
///
/// Ticks are scheduled on a fixed grid (`start + n * period`), so slow
/// iterations skip ticks instead of pushing every later tick back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateController {
    rate: u32,
    period: Duration,
}

impl RateController {
    /// Validate `rate` (events/second). Zero, negative, or a rate finer than
    /// one nanosecond per event is a configuration error.
    pub fn new(rate: i64) -> Result<Self, ConfigError> {
        let rate_u32 = u32::try_from(rate)
            .ok()
            .filter(|r| *r > 0)
            .ok_or(ConfigError::InvalidRate(rate))?;
        let nanos = NANOS_PER_SEC / u64::from(rate_u32);
        if nanos == 0 {
            return Err(ConfigError::InvalidRate(rate));
        }
        Ok(Self {
            rate: rate_u32,
            period: Duration::from_nanos(nanos),
        })
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start ticking. The first tick fires immediately.
    pub fn ticker(&self) -> Ticker {
        let mut interval = interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Ticker { interval }
    }
}

/// A running tick source.
#[derive(Debug)]
pub struct Ticker {
    interval: Interval,
}

impl Ticker {
    /// Wait for the next tick. Returns `None` once `token` is cancelled.
    pub async fn tick(&mut self, token: &CancellationToken) -> Option<Instant> {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            at = self.interval.tick() => Some(at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn mean_interval(rate: i64, ticks: u32) -> Duration {
        let controller = RateController::new(rate).unwrap();
        let token = CancellationToken::new();
        let mut ticker = controller.ticker();

        let first = ticker.tick(&token).await.unwrap();
        let mut last = first;
        for _ in 0..ticks {
            last = ticker.tick(&token).await.unwrap();
        }
        (last - first) / ticks
    }

    #[tokio::test(start_paused = true)]
    async fn test_mean_interval_matches_rate() {
        for rate in [1i64, 100, 1000] {
            let expected = Duration::from_secs(1) / rate as u32;
            let mean = mean_interval(rate, 50).await;
            let drift = if mean > expected {
                mean - expected
            } else {
                expected - mean
            };
            assert!(
                drift <= expected / 100,
                "rate {rate}: mean {mean:?} expected {expected:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_iterations_do_not_accumulate_drift() {
        let controller = RateController::new(100).unwrap();
        let token = CancellationToken::new();
        let mut ticker = controller.ticker();

        let start = ticker.tick(&token).await.unwrap();
        // One iteration overruns by several periods.
        tokio::time::sleep(Duration::from_millis(35)).await;
        let mut last = start;
        for _ in 0..10 {
            last = ticker.tick(&token).await.unwrap();
        }
        // Ticks stay on the 10ms grid.
        assert_eq!((last - start).as_millis() % 10, 0);
        assert!(last - start <= Duration::from_millis(140));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let controller = RateController::new(1).unwrap();
        let token = CancellationToken::new();
        let mut ticker = controller.ticker();
        assert!(ticker.tick(&token).await.is_some());
        token.cancel();
        assert!(ticker.tick(&token).await.is_none());
    }

    #[test]
    fn test_invalid_rates_rejected() {
        assert_eq!(RateController::new(0), Err(ConfigError::InvalidRate(0)));
        assert_eq!(RateController::new(-5), Err(ConfigError::InvalidRate(-5)));
        assert_eq!(
            RateController::new(2_000_000_000),
            Err(ConfigError::InvalidRate(2_000_000_000))
        );
        assert_eq!(
            RateController::new(400).unwrap().period(),
            Duration::from_micros(2_500)
        );
    }
}
