//! Client-side request spacing so a sequential walk stays under the API's per-second limit.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces requests at least `1 / rate` seconds apart. A rate of 0 (or less) disables spacing.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Fails when the rate is NaN or so small that the interval does not fit a `Duration`.
    pub fn new(requests_per_second: f64) -> Result<Self> {
        Ok(Self {
            interval: interval_for(requests_per_second)?,
            next_slot: Mutex::new(None),
        })
    }

    /// Wait until the next request slot, then claim it.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        let mut slot = self.next_slot.lock().await;
        let now = Instant::now();
        let start = match *slot {
            Some(at) if at > now => {
                tokio::time::sleep_until(at).await;
                at
            }
            _ => now,
        };
        *slot = Some(start + self.interval);
    }
}

fn interval_for(requests_per_second: f64) -> Result<Duration> {
    if requests_per_second.is_nan() {
        anyhow::bail!("requestsPerSecond is not a number");
    }
    if requests_per_second <= 0.0 || requests_per_second.is_infinite() {
        return Ok(Duration::ZERO);
    }
    Duration::try_from_secs_f64(1.0 / requests_per_second).map_err(|_| {
        anyhow::anyhow!(
            "requestsPerSecond {} is too small to space requests",
            requests_per_second
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_from_rate() {
        assert_eq!(interval_for(10.0).unwrap(), Duration::from_millis(100));
        assert_eq!(interval_for(0.0).unwrap(), Duration::ZERO);
        assert_eq!(interval_for(-1.0).unwrap(), Duration::ZERO);
    }

    #[test]
    fn unusable_rates_are_rejected() {
        assert!(interval_for(f64::NAN).is_err());
        assert!(interval_for(1e-300).is_err());
        assert!(RateLimiter::new(f64::MIN_POSITIVE).is_err());
    }

    #[tokio::test]
    async fn disabled_limiter_does_not_wait() {
        let limiter = RateLimiter::new(0.0).unwrap();
        let started = std::time::Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn consecutive_requests_are_spaced() {
        let limiter = RateLimiter::new(50.0).unwrap();
        let started = std::time::Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        // first slot is immediate, the next two wait one interval each
        assert!(started.elapsed() >= Duration::from_millis(38));
    }
}
