//! Retry policy for upstream invocations.
//!
//! Retries are allowed only for idempotent methods (GET/HEAD/PUT/DELETE)
//! and only on transient outcomes: a transient upstream status (429, 502,
//! 503, 504) or a transport failure. Delays come from `backoff`'s
//! `ExponentialBackoff`, which applies randomized jitter.

use crate::config::RetryConfig;
use backoff::ExponentialBackoff;
use reqwest::{Method, StatusCode};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
        }
    }

    #[must_use]
    pub fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Whether another attempt is allowed after attempt number `attempt`
    /// (1-based) ended with `status`, or with a transport failure when
    /// `status` is `None`.
    #[must_use]
    pub fn allows(&self, method: &Method, attempt: u32, status: Option<StatusCode>) -> bool {
        self.enabled
            && attempt < self.max_attempts
            && is_idempotent(method)
            && status.is_none_or(is_transient_status)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[must_use]
pub fn is_idempotent(method: &Method) -> bool {
    matches!(method.as_str(), "GET" | "HEAD" | "PUT" | "DELETE")
}

#[must_use]
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&RetryConfig::default())
    }

    #[test]
    fn get_on_transient_status_is_retried_within_bound() {
        let p = policy();
        assert!(p.allows(&Method::GET, 1, Some(StatusCode::SERVICE_UNAVAILABLE)));
        assert!(p.allows(&Method::GET, 2, Some(StatusCode::TOO_MANY_REQUESTS)));
        assert!(!p.allows(&Method::GET, 3, Some(StatusCode::SERVICE_UNAVAILABLE)));
    }

    #[test]
    fn post_is_never_retried() {
        let p = policy();
        assert!(!p.allows(&Method::POST, 1, Some(StatusCode::SERVICE_UNAVAILABLE)));
        assert!(!p.allows(&Method::POST, 1, None));
    }

    #[test]
    fn non_transient_status_is_not_retried() {
        let p = policy();
        assert!(!p.allows(&Method::GET, 1, Some(StatusCode::NOT_FOUND)));
        assert!(!p.allows(&Method::GET, 1, Some(StatusCode::INTERNAL_SERVER_ERROR)));
    }

    #[test]
    fn transport_failures_retry_for_idempotent_methods_only() {
        let p = policy();
        assert!(p.allows(&Method::DELETE, 1, None));
        assert!(!p.allows(&Method::PATCH, 1, None));
    }

    #[test]
    fn disabled_policy_never_retries() {
        let mut config = RetryConfig::default();
        config.enabled = false;
        let p = RetryPolicy::from_config(&config);
        assert!(!p.allows(&Method::GET, 1, Some(StatusCode::SERVICE_UNAVAILABLE)));
    }

    #[test]
    fn backoff_delays_grow_toward_the_cap() {
        use backoff::backoff::Backoff as _;
        let mut b = policy().create_backoff();
        let first = b.next_backoff().expect("first delay");
        // Jitter applies, but the first delay stays within a factor of the
        // configured initial interval.
        assert!(first <= Duration::from_millis(1000));
    }
}
