//! Bounded poll loops with exponential backoff

use resflow_config::PollSettings;
use resflow_core::{ResourceError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Call `probe` until it yields a value
///
/// An error from the probe ends the loop immediately. Running out of
/// attempts is a `Timeout`.
pub async fn poll_until<T, F, Fut>(settings: &PollSettings, what: &str, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for attempt in 0..settings.max_attempts {
        if let Some(value) = probe().await? {
            return Ok(value);
        }

        if attempt + 1 < settings.max_attempts {
            let delay_ms = settings.delay_for_attempt(attempt);
            sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    Err(ResourceError::Timeout(format!(
        "{what} did not finish after {} attempts",
        settings.max_attempts
    )))
}
