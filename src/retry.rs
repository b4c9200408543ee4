use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Runs `operation`, retrying errors accepted by `is_retryable` once per entry
/// in `delays`, sleeping that long before each retry. Non-retryable errors
/// return immediately.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    mut operation: F,
    delays: &[Duration],
    is_retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    R: Fn(&E) -> bool,
{
    let total = delays.len() + 1;
    let mut attempt = 0usize;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }
                let Some(delay) = delays.get(attempt) else {
                    return Err(e);
                };
                attempt += 1;
                warn!(
                    "request failed (attempt {}/{}): {e}; retrying after {}ms",
                    attempt,
                    total,
                    delay.as_millis()
                );
                sleep(*delay).await;
            }
        }
    }
}
