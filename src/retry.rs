// retry.rs - Exponential backoff around a zero-argument async call.
//
// Used for the startup connection test and webhook delivery. Per-screenshot
// analysis never goes through here: it fails fast and reports to the user.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::settings::RetrySettings;

/// Lower-cased substrings that mark an error message as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "rate limit",
    "rate_limit",
    "too many requests",
    "429",
    "500",
    "502",
    "503",
    "504",
    "server error",
    "service unavailable",
    "temporarily unavailable",
    "overloaded",
];

/// The one place that decides transience, by message inspection.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

pub fn is_transient<E: Display>(err: &E) -> bool {
    is_transient_message(&err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_attempts,
            Duration::from_millis(settings.base_delay_ms),
        )
    }

    /// Wait after the given failed attempt (1-based): `base * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Run `op` until it succeeds, `retryable` rejects the error, or the attempt
/// budget is spent. The last error is returned unchanged; there is no sleep
/// after the final attempt.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
    retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    R: Fn(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    log::info!("{} succeeded on attempt {}", what, attempt);
                }
                return Ok(value);
            }
            Err(e) if !retryable(&e) => {
                log::debug!("{} failed permanently: {}", what, e);
                return Err(e);
            }
            Err(e) if attempt >= policy.max_attempts => {
                log::error!(
                    "{} failed after {} attempts: {}",
                    what,
                    policy.max_attempts,
                    e
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                log::warn!(
                    "[Attempt {}/{}] {} failed: {} - retrying in {:.1}s",
                    attempt,
                    policy.max_attempts,
                    what,
                    e,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// [`retry_with_backoff`] with message-based transience classification.
pub async fn retry_transient<T, E, F, Fut>(policy: &RetryPolicy, what: &str, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_with_backoff(policy, what, op, is_transient).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[test]
    fn classifies_messages() {
        assert!(is_transient_message("Request TIMEOUT after 30s"));
        assert!(is_transient_message("operation timed out"));
        assert!(is_transient_message("Connection failed: reset by peer"));
        assert!(is_transient_message("Rate limited: slow down"));
        assert!(is_transient_message("Server error (HTTP 503): unavailable"));
        assert!(!is_transient_message("Authentication failed: Invalid API key"));
        assert!(!is_transient_message("invalid api key"));
        assert!(!is_transient_message("No usable answer content in vendor response"));
    }

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::new(4, Duration::from_millis(500));
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_with_backoff_spacing() {
        let base = Duration::from_millis(100);
        let policy = RetryPolicy::new(3, base);
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&stamps);
        let started = Instant::now();
        let result: Result<(), String> = retry_transient(&policy, "probe", || {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().unwrap().push(Instant::now());
                Err("Request timeout".to_string())
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "Request timeout");
        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 3);
        assert_eq!(stamps[1] - stamps[0], base);
        assert_eq!(stamps[2] - stamps[1], base * 2);
        // Nothing slept after the last attempt.
        assert_eq!(started.elapsed(), base * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_raised_immediately() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let started = Instant::now();

        let result: Result<(), String> = retry_transient(&policy, "probe", || {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock().unwrap() += 1;
                Err("invalid api key".to_string())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<u32, String> = retry_transient(&policy, "probe", || {
            let counter = Arc::clone(&counter);
            async move {
                let mut n = counter.lock().unwrap();
                *n += 1;
                if *n < 2 {
                    Err("network unreachable".to_string())
                } else {
                    Ok(*n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_classifier_retries_everything() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), String> = retry_with_backoff(
            &policy,
            "webhook",
            || {
                let counter = Arc::clone(&counter);
                async move {
                    *counter.lock().unwrap() += 1;
                    Err("HTTP 404".to_string())
                }
            },
            |_| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
