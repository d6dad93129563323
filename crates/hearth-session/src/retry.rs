use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Runs `op` up to `attempts` times (at least once), sleeping `delay` between
/// failed attempts. There is no sleep after the final attempt.
///
/// `op` receives the 1-based attempt number. The last error is returned when
/// every attempt fails.
pub async fn retry<T, E, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                tracing::info!(
                    attempt,
                    attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
