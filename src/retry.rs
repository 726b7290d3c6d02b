use crate::config::RetryPolicy;
use crate::error::Error;
use log::warn;
use std::future::Future;
use std::time::Duration;

/// Runs `op` until it succeeds or the retry budget is spent.
///
/// Backoff doubles per attempt and is multiplied again when the failure looks
/// like throttling. Authentication failures are returned immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_auth_failure() => return Err(err),
            Err(err) if attempt >= policy.max_retries => return Err(err),
            Err(err) => {
                let delay = backoff_delay(policy, attempt, err.is_rate_limited());
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation,
                    attempt + 1,
                    policy.max_retries + 1,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn backoff_delay(policy: &RetryPolicy, attempt: u32, rate_limited: bool) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    let delay = policy.base_backoff.saturating_mul(factor);
    if rate_limited {
        delay.saturating_mul(policy.rate_limit_multiplier.max(1))
    } else {
        delay
    }
}
