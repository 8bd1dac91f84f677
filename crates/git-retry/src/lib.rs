//! Retry engine: exponential backoff with optional jitter, plus named
//! policy presets matching the upstream tool's exact constants.

use std::time::Duration;

use git_error::{ErrorKind, GitError};
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
    pub jitter_factor: f64,
}

impl RetryConfig {
    pub const fn new(
        max_retries: u32,
        initial_delay_secs: f64,
        max_delay_secs: f64,
        exponential_base: f64,
        jitter: bool,
        jitter_factor: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis((initial_delay_secs * 1000.0) as u64),
            max_delay: Duration::from_millis((max_delay_secs * 1000.0) as u64),
            exponential_base,
            jitter,
            jitter_factor,
        }
    }

    /// Delay before attempt `k` (0-indexed), per
    /// `min(max_delay, initial_delay * base^k)`, jittered and clamped to zero.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.initial_delay.as_secs_f64() * self.exponential_base.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter {
            let variation = capped * self.jitter_factor;
            let offset = rand::thread_rng().gen_range(-variation..=variation);
            capped + offset
        } else {
            capped
        };

        Duration::from_secs_f64(delay.max(0.0))
    }
}

/// `conservative`: 2 retries, 0.5s start, 10s cap.
pub const CONSERVATIVE: RetryConfig = RetryConfig::new(2, 0.5, 10.0, 2.0, true, 0.1);
/// `standard`: 3 retries, 1s start, 60s cap.
pub const STANDARD: RetryConfig = RetryConfig::new(3, 1.0, 60.0, 2.0, true, 0.1);
/// `aggressive`: 5 retries, 2s start, 120s cap.
pub const AGGRESSIVE: RetryConfig = RetryConfig::new(5, 2.0, 120.0, 2.0, true, 0.1);
/// `network`: 3 retries, 1s start, 30s cap.
pub const NETWORK: RetryConfig = RetryConfig::new(3, 1.0, 30.0, 2.0, true, 0.1);
/// `clone`: 3 retries, 2s start, 120s cap, wider jitter.
pub const CLONE: RetryConfig = RetryConfig::new(3, 2.0, 120.0, 2.0, true, 0.2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Conservative,
    Standard,
    Aggressive,
    Network,
    Clone,
}

impl RetryPolicy {
    pub fn config(self) -> RetryConfig {
        match self {
            RetryPolicy::Conservative => CONSERVATIVE,
            RetryPolicy::Standard => STANDARD,
            RetryPolicy::Aggressive => AGGRESSIVE,
            RetryPolicy::Network => NETWORK,
            RetryPolicy::Clone => CLONE,
        }
    }

    /// `clone` -> Clone; `push`/`pull`/`fetch` -> Network; else -> Standard.
    pub fn for_operation(operation: &str) -> Self {
        match operation {
            "clone" => RetryPolicy::Clone,
            "push" | "pull" | "fetch" => RetryPolicy::Network,
            _ => RetryPolicy::Standard,
        }
    }
}

/// Runs `f`, retrying on retryable failures per `policy`. `f` is re-invoked
/// from scratch on each attempt; errors that don't classify as a
/// [`GitError`] are treated as retryable network errors, matching the
/// upstream "unknown errors are wrapped as network_error" rule.
pub async fn retry<F, Fut, T>(policy: RetryConfig, mut f: F) -> Result<T, GitError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, GitError>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = err.is_retryable();
                if !retryable || attempt >= policy.max_retries {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                tracing::debug!(attempt, ?delay, kind = ?err.kind, "retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Wraps an arbitrary error as a retryable network error, for call sites
/// whose underlying failure isn't already a [`GitError`].
pub fn as_network_error(message: impl Into<String>) -> GitError {
    GitError::new(ErrorKind::NetworkError, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let cfg = RetryConfig::new(5, 1.0, 8.0, 2.0, false, 0.0);
        assert_eq!(cfg.delay_for(0), Duration::from_secs(1));
        assert_eq!(cfg.delay_for(1), Duration::from_secs(2));
        assert_eq!(cfg.delay_for(2), Duration::from_secs(4));
        assert_eq!(cfg.delay_for(3), Duration::from_secs(8));
        assert_eq!(cfg.delay_for(10), Duration::from_secs(8));
    }

    #[test]
    fn policy_dispatch_matches_operation_table() {
        assert_eq!(RetryPolicy::for_operation("clone"), RetryPolicy::Clone);
        assert_eq!(RetryPolicy::for_operation("push"), RetryPolicy::Network);
        assert_eq!(RetryPolicy::for_operation("fetch"), RetryPolicy::Network);
        assert_eq!(RetryPolicy::for_operation("commit"), RetryPolicy::Standard);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_retries() {
        let mut calls = 0;
        let result: Result<(), GitError> = retry(RetryConfig::new(2, 0.001, 0.001, 2.0, false, 0.0), || {
            calls += 1;
            async { Err(GitError::new(ErrorKind::NetworkError, "boom")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn retry_does_not_retry_non_retryable_errors() {
        let mut calls = 0;
        let result: Result<(), GitError> = retry(STANDARD, || {
            calls += 1;
            async { Err(GitError::new(ErrorKind::GitMergeConflict, "conflict")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
