//! Resilient HTTP transport: bounded retry with backoff under an overall
//! timeout.
//!
//! [`Transport::execute`] never looks at response bodies. Retryable statuses
//! are retried while budget remains; once it runs out the last response is
//! handed back so the caller can decode the server's error.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, Response, StatusCode, multipart};
use tracing::{debug, trace, warn};

use crate::api::retry::{RetryConfig, is_retryable_status, is_transient_error};
use crate::error::{Error, Result, TransportError};

/// A file carried by a multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartFile {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub data: Bytes,
    /// Additional text fields sent alongside the file.
    pub fields: Vec<(String, String)>,
}

/// Request body, kept in a form that can be re-sent on every attempt.
#[derive(Debug, Clone)]
pub enum Payload {
    Empty,
    Json(Bytes),
    Multipart(MultipartFile),
}

/// One logical HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub payload: Payload,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            payload: Payload::Empty,
        }
    }

    /// Serialize `body` as the JSON payload.
    pub fn json<T: serde::Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(body)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.payload = Payload::Json(Bytes::from(bytes));
        Ok(self)
    }

    pub fn multipart(mut self, file: MultipartFile) -> Self {
        self.payload = Payload::Multipart(file);
        self
    }

    pub fn bearer(mut self, api_key: &str) -> Result<Self> {
        let mut value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| Error::Config("API key contains invalid header characters".into()))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }
}

/// HTTP execution with retry/backoff, shared read-only by all requests.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    retry: RetryConfig,
    timeout: Duration,
}

impl Transport {
    /// Build a transport whose attempts are bounded by `timeout` overall.
    ///
    /// The same duration bounds connection setup and the gap between body
    /// reads, so a stalled stream fails instead of hanging.
    pub fn new(retry: RetryConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dify-client/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, retry, timeout))
    }

    /// Use a preconfigured `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            client,
            retry,
            timeout,
        }
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `request`, retrying transient failures, within the overall
    /// timeout.
    pub async fn execute(&self, request: &HttpRequest) -> std::result::Result<Response, TransportError> {
        match tokio::time::timeout(self.timeout, self.execute_with_retry(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} {} timed out after {:?}", request.method, request.url, self.timeout);
                Err(TransportError::Timeout(self.timeout))
            }
        }
    }

    /// Like [`execute`](Self::execute), but also reads the whole body. The
    /// overall timeout covers the body read too.
    pub async fn execute_full(
        &self,
        request: &HttpRequest,
    ) -> std::result::Result<(StatusCode, Bytes), TransportError> {
        let exchange = async {
            let response = self.execute_with_retry(request).await?;
            let status = response.status();
            let body = response.bytes().await.map_err(TransportError::Body)?;
            Ok((status, body))
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} {} timed out after {:?}", request.method, request.url, self.timeout);
                Err(TransportError::Timeout(self.timeout))
            }
        }
    }

    async fn execute_with_retry(
        &self,
        request: &HttpRequest,
    ) -> std::result::Result<Response, TransportError> {
        let mut attempt = 0u32;
        loop {
            trace!("{} {} attempt {}", request.method, request.url, attempt + 1);
            let can_retry = attempt < self.retry.max_retries;

            match self.build(request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if can_retry && is_retryable_status(status) {
                        let delay = self.retry.delay_for_response(attempt, status, resp.headers());
                        debug!(
                            "HTTP {} from {}; retrying in {:?} ({}/{})",
                            status,
                            request.url,
                            delay,
                            attempt + 1,
                            self.retry.max_retries
                        );
                        drop(resp);
                        tokio::time::sleep(delay).await;
                    } else {
                        debug!("HTTP {} from {} after {} attempt(s)", status, request.url, attempt + 1);
                        return Ok(resp);
                    }
                }
                Err(e) => {
                    if can_retry && is_transient_error(&e) {
                        let delay = self.retry.delay_for_attempt(attempt);
                        debug!(
                            "request to {} failed: {e}; retrying in {:?} ({}/{})",
                            request.url,
                            delay,
                            attempt + 1,
                            self.retry.max_retries
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!("request to {} failed: {e}", request.url);
                        return Err(TransportError::Request {
                            attempts: attempt + 1,
                            source: e,
                        });
                    }
                }
            }
            attempt += 1;
        }
    }

    fn build(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        match &request.payload {
            Payload::Empty => builder,
            Payload::Json(body) => builder.body(body.clone()),
            Payload::Multipart(file) => builder.multipart(multipart_form(file)),
        }
    }
}

fn multipart_form(file: &MultipartFile) -> multipart::Form {
    let new_part = || multipart::Part::bytes(file.data.to_vec()).file_name(file.file_name.clone());
    // An unparseable MIME type falls back to the part's default.
    let part = match &file.mime_type {
        Some(mime) => new_part().mime_str(mime).unwrap_or_else(|e| {
            debug!("Ignoring invalid MIME type {mime:?} for {}: {e}", file.file_name);
            new_part()
        }),
        None => new_part(),
    };
    file.fields
        .iter()
        .fold(multipart::Form::new().part("file", part), |form, (k, v)| {
            form.text(k.clone(), v.clone())
        })
}
