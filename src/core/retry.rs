//! Retry classification and backoff for vision model calls.

use std::time::Duration;

use crate::error::VisionError;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF_MS: u64 = 30_000;

/// Whether a failed call is worth repeating.
///
/// Timeouts, connection failures, rate limits (429), server errors (5xx) and
/// garbled answers are retried. Missing configuration and other client
/// errors are not.
pub fn is_retryable(error: &VisionError) -> bool {
    match error {
        VisionError::Timeout(_)
        | VisionError::Transport(_)
        | VisionError::EmptyContent
        | VisionError::Parse(_) => true,
        VisionError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
        VisionError::NotConfigured(_) => false,
    }
}

/// Exponential backoff: `base_delay_ms * 2^attempt`, capped at 30 seconds.
pub fn backoff_duration(attempt: u32, base_delay_ms: u64) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> VisionError {
        VisionError::Http {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(is_retryable(&VisionError::Timeout(60_000)));
        assert!(is_retryable(&VisionError::Transport("connection refused".into())));
        assert!(is_retryable(&VisionError::EmptyContent));
        assert!(is_retryable(&http(429)));
        assert!(is_retryable(&http(503)));
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert!(!is_retryable(&http(400)));
        assert!(!is_retryable(&http(401)));
        assert!(!is_retryable(&VisionError::NotConfigured("no key".into())));
    }

    #[test]
    fn test_backoff_exponential() {
        assert_eq!(backoff_duration(0, 1000), Duration::from_millis(1000));
        assert_eq!(backoff_duration(1, 1000), Duration::from_millis(2000));
        assert_eq!(backoff_duration(3, 1000), Duration::from_millis(8000));
    }

    #[test]
    fn test_backoff_capped_at_30s() {
        assert_eq!(backoff_duration(10, 1000), Duration::from_millis(30_000));
        assert_eq!(backoff_duration(64, u64::MAX), Duration::from_millis(30_000));
    }
}
