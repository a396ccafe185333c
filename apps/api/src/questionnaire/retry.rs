//! Optimistic retry for operations racing on version numbers.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::questionnaire::error::QuestionnaireError;

pub const MAX_RETRY_ATTEMPTS: u32 = 5;
const BASE_RETRY_DELAY_MS: u64 = 50;
const MAX_JITTER_MS: u64 = 25;

/// `50ms * 2^(attempt-1)` plus up to 25ms of jitter.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
    Duration::from_millis(BASE_RETRY_DELAY_MS * (1u64 << exponent) + jitter)
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or has been
/// tried `MAX_RETRY_ATTEMPTS` times. The closure receives the 1-based attempt
/// number and must reload whatever state it depends on.
pub async fn execute_with_retry<T, F, Fut>(
    operation: &str,
    mut op: F,
) -> Result<T, QuestionnaireError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, QuestionnaireError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < MAX_RETRY_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                warn!(
                    "{operation} attempt {attempt} failed ({e}), retrying after {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_retryable() => {
                return Err(QuestionnaireError::Conflict(format!(
                    "{operation} failed after {MAX_RETRY_ATTEMPTS} attempts: {e}"
                )));
            }
            Err(e) => return Err(e),
        }
    }
}
