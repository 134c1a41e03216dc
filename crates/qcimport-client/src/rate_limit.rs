//! Shared token bucket for REDCap API calls.
//!
//! REDCap enforces its quota per API token, so every connection using the
//! same token must draw from the same bucket. Share one [`RateLimiter`]
//! through an `Arc` rather than creating one per connection.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use qcimport_core::HttpConfig;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::trace;

/// Token bucket limiting requests per second across all holders.
pub struct RateLimiter {
    inner: DefaultDirectRateLimiter,
    per_second: NonZeroU32,
    burst: NonZeroU32,
}

impl RateLimiter {
    /// Creates a bucket replenishing `per_second` permits per second and
    /// holding at most `burst` of them.
    ///
    /// The bucket starts empty, so even the first permit waits one
    /// replenish interval and N permits take at least N / `per_second`
    /// seconds.
    pub fn new(per_second: NonZeroU32, burst: NonZeroU32) -> Self {
        let quota = Quota::per_second(per_second).allow_burst(burst);
        let inner = GovernorRateLimiter::direct(quota);
        for _ in 0..burst.get() {
            if inner.check().is_err() {
                break;
            }
        }
        Self {
            inner,
            per_second,
            burst,
        }
    }

    /// Creates a shareable bucket from the HTTP configuration.
    pub fn shared(config: &HttpConfig) -> Arc<Self> {
        Arc::new(Self::new(config.requests_per_second, config.burst))
    }

    /// Waits until a permit is available and takes it.
    pub async fn acquire(&self) {
        if self.inner.check().is_ok() {
            return;
        }
        trace!("rate limit reached, waiting for a permit");
        self.inner.until_ready().await;
    }

    pub fn per_second(&self) -> u32 {
        self.per_second.get()
    }

    pub fn burst(&self) -> u32 {
        self.burst.get()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("per_second", &self.per_second)
            .field("burst", &self.burst)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn nz(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn test_shared_uses_config() {
        let limiter = RateLimiter::shared(&HttpConfig::default());
        assert_eq!(limiter.per_second(), 20);
        assert_eq!(limiter.burst(), 1);
    }

    #[tokio::test]
    async fn test_sustained_rate_is_capped() {
        let calls = 21;
        let start = Instant::now();
        let limiter = RateLimiter::new(nz(20), nz(1));

        for _ in 0..calls {
            limiter.acquire().await;
        }
        let elapsed = start.elapsed();

        // 21 permits at 20/s from an empty bucket need 21 intervals of 50ms
        assert!(
            elapsed >= Duration::from_millis(1050),
            "21 permits took only {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_concurrent_holders_share_the_bucket() {
        let start = Instant::now();
        let limiter = Arc::new(RateLimiter::new(nz(20), nz(1)));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                for _ in 0..6 {
                    limiter.acquire().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 24 permits in total, every one of them paced
        assert!(start.elapsed() >= Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn test_first_permit_waits_one_interval() {
        let start = Instant::now();
        let limiter = RateLimiter::new(nz(10), nz(1));
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_burst_refills_and_allows_immediate_permits() {
        let limiter = RateLimiter::new(nz(20), nz(5));
        // five 50ms intervals refill the whole burst
        tokio::time::sleep(Duration::from_millis(300)).await;

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(40));
    }
}
