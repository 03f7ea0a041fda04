// ─────────────────────────────────────────────────────────────────────────────
// governor.rs — Rate-Limit Governor
//
// Two mechanisms composed around every venue call:
//   1. A per-venue semaphore caps in-flight requests (default 2).
//   2. Exponential backoff with jitter retries rate-limit errors;
//      anything else propagates immediately.
// ─────────────────────────────────────────────────────────────────────────────
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;

use crate::gateway::{Venue, VenueError};

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// Number of retries after the first attempt.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

/// Base delay for the Nth retry (0-indexed): min(initial * factor^n, max).
pub fn backoff_delay(cfg: &BackoffConfig, attempt: u32) -> Duration {
    let secs = cfg.initial_delay.as_secs_f64() * cfg.factor.powi(attempt as i32);
    Duration::from_secs_f64(secs.min(cfg.max_delay.as_secs_f64()))
}

/// Applies ±25% jitter so synchronized workers don't retry in lockstep.
pub fn jittered(base: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor = rng.gen_range(0.75..=1.25);
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}

pub struct RateGovernor {
    venue: Venue,
    permits: Semaphore,
    backoff: BackoffConfig,
}

impl RateGovernor {
    pub fn new(venue: Venue, max_in_flight: usize, backoff: BackoffConfig) -> Self {
        Self {
            venue,
            permits: Semaphore::new(max_in_flight.max(1)),
            backoff,
        }
    }

    /// Runs `op` under the concurrency cap, retrying rate-limit errors
    /// with jittered exponential backoff. Non-rate-limit errors return
    /// immediately; exhausted retries surface as `RateLimited`.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, VenueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| VenueError::Transport("governor semaphore closed".to_string()))?;

        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_rate_limit() => {
                    if attempt >= self.backoff.max_attempts {
                        log::error!(
                            "[GOVERNOR] {} {}: rate limited, {} retries exhausted",
                            self.venue,
                            what,
                            self.backoff.max_attempts
                        );
                        return Err(VenueError::RateLimited(format!(
                            "{} {}: retries exhausted after {} attempts",
                            self.venue,
                            what,
                            self.backoff.max_attempts + 1
                        )));
                    }
                    let delay = jittered(backoff_delay(&self.backoff, attempt));
                    log::warn!(
                        "[GOVERNOR] {} {}: rate limited ({}), retry {}/{} in {:.2}s",
                        self.venue,
                        what,
                        e,
                        attempt + 1,
                        self.backoff.max_attempts,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Like `run`, but each attempt is bounded by `deadline`; an elapsed
    /// attempt surfaces as `VenueError::Timeout` (treated as a missing
    /// datum by callers, never retried here).
    pub async fn run_with_timeout<T, F, Fut>(
        &self,
        what: &str,
        deadline: Duration,
        mut op: F,
    ) -> Result<T, VenueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        let venue = self.venue;
        self.run(what, move || {
            let fut = op();
            let what = what.to_string();
            async move {
                match tokio::time::timeout(deadline, fut).await {
                    Ok(res) => res,
                    Err(_) => Err(VenueError::Timeout(format!(
                        "{} {} exceeded {:.0}s",
                        venue,
                        what,
                        deadline.as_secs_f64()
                    ))),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn governor() -> RateGovernor {
        RateGovernor::new(Venue::Aster, 2, BackoffConfig::default())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = BackoffConfig::default();
        assert_eq!(backoff_delay(&cfg, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(&cfg, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(&cfg, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(&cfg, 10), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_quarter_band() {
        let cfg = BackoffConfig::default();
        // Expected bands for three consecutive 429s: [0.75,1.25], [1.5,2.5], [3,5].
        let bands = [(0.75, 1.25), (1.5, 2.5), (3.0, 5.0)];
        for (attempt, (lo, hi)) in bands.iter().enumerate() {
            for _ in 0..200 {
                let d = jittered(backoff_delay(&cfg, attempt as u32)).as_secs_f64();
                assert!(d >= *lo && d <= *hi, "attempt {} delay {} outside band", attempt, d);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhaust_into_rate_limited() {
        let gov = governor();
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = gov
            .run("funding_rate", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(VenueError::RateLimited("429".to_string())) }
            })
            .await;
        // initial attempt + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(res, Err(VenueError::RateLimited(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn non_rate_limit_errors_propagate_immediately() {
        let gov = governor();
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = gov
            .run("best_bid_ask", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(VenueError::Transport("connection reset".to_string())) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(res, Err(VenueError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_rate_limit() {
        let gov = governor();
        let calls = AtomicU32::new(0);
        let res = gov
            .run("place_order", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(VenueError::Api("too many requests".to_string()))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;
        assert_eq!(res.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out() {
        let gov = governor();
        let res: Result<(), _> = gov
            .run_with_timeout("balance", Duration::from_secs(10), || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(VenueError::Timeout(_))));
    }
}
