use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Capped exponential backoff: `base * 2^(attempt-1)`, never above `cap`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: bool,
}

impl Backoff {
    pub(crate) fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap: cap.max(base), jitter: true }
    }

    pub(crate) fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let raw = self.base.saturating_mul(1u32 << exponent).min(self.cap);
        if !self.jitter || raw.is_zero() {
            return raw;
        }
        // up to 10% extra so that retries from many sessions do not align
        let extra = rand::thread_rng().gen_range(0..=raw.as_millis().min(u64::MAX as u128) as u64 / 10);
        (raw + Duration::from_millis(extra)).min(self.cap)
    }
}

/// Runs `op` until it succeeds, `is_retryable` rejects the error, or `max_attempts` is reached.
pub(crate) async fn retry<T, E, F, Fut>(
    backoff: Backoff,
    max_attempts: u32,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && is_retryable(&err) => {
                let delay = backoff.delay(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying after transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
