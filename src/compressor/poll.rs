use crate::error::CompressorError;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::trace;

/// Re-run `check` every `interval` until it yields a value, fails, or
/// `timeout` has elapsed since the first attempt.
///
/// The first check happens after one interval, matching the host page's
/// timer-driven polling.
pub async fn poll_until<T, F>(
    label: &str,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<T, CompressorError>
where
    F: FnMut() -> Result<Option<T>, CompressorError>,
{
    let started = Instant::now();
    loop {
        sleep(interval).await;
        if let Some(found) = check()? {
            return Ok(found);
        }
        let waited = started.elapsed();
        if waited >= timeout {
            return Err(CompressorError::AutomationTimeout {
                label: label.to_string(),
                waited_ms: waited.as_millis() as u64,
            });
        }
        trace!(target: "compressor::ui", label, waited_ms = waited.as_millis() as u64, "still waiting");
    }
}
