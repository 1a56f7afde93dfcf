//! Retry policy with bounded exponential backoff.
//!
//! Retries connection-class failures and retryable statuses (429, and 5xx
//! except 501). Never retries other 4xx responses. Waits grow exponentially
//! and are clamped to `[wait_min, wait_max]`.

use std::time::{Duration, SystemTime};

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    /// Lower bound for the wait between attempts.
    pub wait_min: Duration,
    /// Upper bound for the wait between attempts.
    pub wait_max: Duration,
    /// Backoff multiplier (2.0 doubles the wait every attempt).
    pub multiplier: f64,
    /// Whether to scale waits down by a deterministic jitter factor.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            wait_min: Duration::from_millis(500),
            wait_max: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries. Uses default waits.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// A config that never retries.
    pub fn none() -> Self {
        Self::with_retries(0)
    }

    /// Set the wait bounds.
    pub fn with_waits(mut self, wait_min: Duration, wait_max: Duration) -> Self {
        self.wait_min = wait_min;
        self.wait_max = wait_max.max(wait_min);
        self
    }

    /// Calculate the wait before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.wait_min.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.wait_max.as_secs_f64());

        let secs = if self.jitter {
            // Deterministic factor per attempt; avoids pulling in an RNG.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            capped * jitter_factor
        } else {
            capped
        };
        // A negative or NaN multiplier yields an unrepresentable wait.
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(self.wait_max);
        self.clamp(delay)
    }

    /// Wait before retry `attempt` after a response with `status`.
    ///
    /// Honours `Retry-After` on 429/503, clamped to the configured bounds.
    pub fn delay_for_response(
        &self,
        attempt: u32,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Duration {
        if (status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE)
            && let Some(wait) = parse_retry_after(headers)
        {
            return self.clamp(wait);
        }
        self.delay_for_attempt(attempt)
    }

    fn clamp(&self, delay: Duration) -> Duration {
        delay.clamp(self.wait_min, self.wait_max.max(self.wait_min))
    }
}

/// Whether a response status should be retried.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
}

/// Whether a failed send is transient (connection-class).
pub fn is_transient_error(error: &reqwest::Error) -> bool {
    if error.is_builder() || error.is_redirect() || error.is_decode() {
        return false;
    }
    error.is_connect() || error.is_timeout() || error.is_request()
}

/// Parse `Retry-After` as numeric seconds or an HTTP-date.
///
/// Returns `None` when the header is missing, unparseable, negative, or the
/// date is already in the past.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<f64>() {
        if secs >= 0.0 && secs.is_finite() {
            // Larger than `Duration::MAX` saturates; callers clamp anyway.
            return Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX));
        }
        return None;
    }

    let date = httpdate::parse_http_date(value).ok()?;
    date.duration_since(SystemTime::now()).ok()
}
