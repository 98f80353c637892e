//! Retry eligibility and backoff for transcript jobs.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::transcript::FetchError;

/// Attempts allowed per job unless configured otherwise.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay before attempt N+1, indexed by N-1. Attempts past the end reuse the
/// last entry.
pub const DEFAULT_DELAYS: [Duration; 3] = [
    Duration::from_secs(15),
    Duration::from_secs(60),
    Duration::from_secs(180),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            delays: DEFAULT_DELAYS.to_vec(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delays: config
                .delays_secs
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delays,
        }
    }

    /// Whether a job that just failed on `attempt` should be tried again.
    ///
    /// `error` is `None` for failures that never went through the fetch
    /// taxonomy; those are retried until the attempt cap.
    pub fn should_retry(&self, error: Option<&FetchError>, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match error {
            Some(err) => err.transient,
            None => true,
        }
    }

    /// Delay before the attempt that follows `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.delays.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt.max(1) as usize - 1).min(self.delays.len() - 1);
        self.delays[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::ErrorCode;

    #[test]
    fn test_ladder_is_clamped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(15));
        assert_eq!(policy.delay_for(2), Duration::from_secs(60));
        assert_eq!(policy.delay_for(3), Duration::from_secs(180));
        assert_eq!(policy.delay_for(10), Duration::from_secs(180));
        assert_eq!(RetryPolicy::new(3, vec![]).delay_for(2), Duration::ZERO);
    }

    #[test]
    fn test_attempt_cap() {
        let policy = RetryPolicy::default();
        let blocked = FetchError::new(ErrorCode::BlockedOrRateLimited, "timedtext", "429");
        assert!(policy.should_retry(Some(&blocked), 1));
        assert!(policy.should_retry(Some(&blocked), 2));
        assert!(!policy.should_retry(Some(&blocked), 3));
        assert!(!policy.should_retry(Some(&blocked), 4));
    }

    #[test]
    fn test_terminal_errors_never_retry() {
        let policy = RetryPolicy::default();
        for code in [
            ErrorCode::NoCaptions,
            ErrorCode::ConfigError,
            ErrorCode::ParserError,
            ErrorCode::SourceUnavailable,
        ] {
            let err = FetchError::new(code, "p", "m");
            assert!(!policy.should_retry(Some(&err), 1), "{} retried", code);
        }
    }

    #[test]
    fn test_untyped_errors_fail_open() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(None, 1));
        assert!(!policy.should_retry(None, 3));
    }

    #[test]
    fn test_from_config() {
        let config = RetryConfig {
            max_attempts: 5,
            delays_secs: vec![1, 2],
            source_unavailable_transient: false,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_for(4), Duration::from_secs(2));
    }
}
