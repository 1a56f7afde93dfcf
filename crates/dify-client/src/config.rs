//! Client configuration with sensible defaults.
//!
//! [`ClientConfig`] is fixed at client construction and shared read-only by
//! every request afterwards.

use std::fmt;
use std::time::Duration;

use crate::api::retry::RetryConfig;
use crate::error::{Error, Result};

/// Default API endpoint of the hosted service.
pub const DEFAULT_BASE_URL: &str = "https://api.dify.ai/v1";

/// Default overall request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for a [`DifyClient`](crate::DifyClient).
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL, without trailing slash. Default: [`DEFAULT_BASE_URL`].
    pub base_url: String,
    /// Application API key, sent as a bearer token.
    pub api_key: String,
    /// Retry policy. Default: 3 retries, waits between 500 ms and 2 s.
    pub retry: RetryConfig,
    /// Overall timeout for obtaining a response. Default: 120 s.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(base_url.into()),
            api_key: api_key.into(),
            retry: RetryConfig::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Read configuration from the process environment.
    ///
    /// | Variable | Meaning |
    /// |----------|---------|
    /// | `DIFY_API_KEY` | API key (required) |
    /// | `DIFY_BASE_URL` | base URL (default [`DEFAULT_BASE_URL`]) |
    /// | `DIFY_TIMEOUT_SECS` | overall timeout in seconds |
    /// | `DIFY_MAX_RETRIES` | retry budget |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup("DIFY_API_KEY")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("DIFY_API_KEY is not set".into()))?;
        let base_url = lookup("DIFY_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut config = Self::new(base_url, api_key);

        if let Some(secs) = lookup("DIFY_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("DIFY_TIMEOUT_SECS is not a number: {secs}")))?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = lookup("DIFY_MAX_RETRIES") {
            config.retry.max_retries = retries.trim().parse().map_err(|_| {
                Error::Config(format!("DIFY_MAX_RETRIES is not a number: {retries}"))
            })?;
        }
        Ok(config)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_retry_waits(mut self, wait_min: Duration, wait_max: Duration) -> Self {
        self.retry = self.retry.with_waits(wait_min, wait_max);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check the configuration before building a client.
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "base URL must start with http:// or https://: {}",
                self.base_url
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".into()));
        }
        Ok(())
    }

    /// Full URL of `endpoint` (which starts with `/`).
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn normalize_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
