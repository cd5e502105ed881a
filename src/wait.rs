use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

use crate::error::StepError;
use crate::session::{SessionHandle, SessionProvider};

pub const POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_ELEMENT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Integer-prefix parse of a step value into a wait bound.
///
/// Missing, unparsable or zero values fall back to [`DEFAULT_ELEMENT_TIMEOUT`];
/// negative values give a zero bound.
pub fn parse_timeout(value: Option<&str>) -> Duration {
    let Some(value) = value else {
        return DEFAULT_ELEMENT_TIMEOUT;
    };
    let trimmed = value.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());

    match digits[..end].parse::<u64>() {
        Ok(0) | Err(_) => DEFAULT_ELEMENT_TIMEOUT,
        Ok(_) if negative => Duration::ZERO,
        Ok(ms) => Duration::from_millis(ms),
    }
}

/// Blocks until the session reports load-complete.
pub async fn wait_for_load(
    sessions: &dyn SessionProvider,
    handle: SessionHandle,
) -> Result<(), StepError> {
    sessions
        .wait_for_load(handle)
        .await
        .map_err(StepError::Session)
}

/// Polls for `selector` every [`POLL_INTERVAL`] until found or `timeout` has elapsed.
///
/// Errors from individual polls are ignored; the page may be mid-navigation.
pub async fn wait_for_element(
    sessions: &dyn SessionProvider,
    handle: SessionHandle,
    selector: &str,
    timeout: Duration,
) -> Result<(), StepError> {
    let start = Instant::now();
    let mut ticker = interval_at(start + POLL_INTERVAL, POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if start.elapsed() > timeout {
            return Err(StepError::Timeout {
                selector: selector.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        match sessions.poll_presence(handle, selector).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => debug!(%selector, error = %e, "presence poll failed"),
        }
    }
}
