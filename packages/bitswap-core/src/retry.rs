use std::time::Duration;

/// How a capped exponential backoff should be paced. Used by the want
/// manager's per-peer send retry and by the orchestrator's `has_block`
/// put retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// A flat retry interval with no backoff growth.
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
        }
    }

    /// A capped exponential schedule.
    pub fn exponential(max_attempts: u32, initial: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            initial_interval: initial,
            max_interval: cap,
            multiplier: 2.0,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // `powi` overflows to infinity past a few hundred attempts, and
        // `Duration::from_secs_f64` panics on non-finite input.
        let capped_attempt = attempt.min(64);
        let scaled = self.initial_interval.as_secs_f64() * self.multiplier.powi(capped_attempt as i32);
        let scaled = if scaled.is_finite() { scaled } else { self.max_interval.as_secs_f64() };
        Duration::from_secs_f64(scaled).min(self.max_interval)
    }
}

/// Runs `op` until it succeeds or `policy.max_attempts` is exhausted,
/// sleeping between attempts per the policy's schedule. Returns the last
/// error if every attempt fails.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(err);
                }
                tokio::time::sleep(policy.delay_for_attempt(attempt - 1)).await;
            }
        }
    }
}
