//! Error types for the Dify client.
//!
//! [`Error`] is what every fallible client call returns. Server-reported
//! failures arrive as [`ApiError`]; failures to obtain a response at all are
//! [`TransportError`]s.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level client error.
#[derive(Error, Debug)]
pub enum Error {
    /// The request's `response_mode` was neither `blocking` nor `streaming`.
    /// Raised before any network I/O.
    #[error("invalid response_mode: {0}")]
    InvalidResponseMode(String),

    /// No response could be obtained from the server.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a non-success status and a structured body.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The server answered with a non-success status whose body could not be
    /// decoded as an [`ApiError`].
    #[error("status code: {0}")]
    Status(u16),

    /// A success body did not match the expected result shape.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Local I/O failure (e.g. reading a file to upload).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The HTTP status associated with this error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api(api) => Some(api.status),
            Error::Status(status) => Some(*status),
            _ => None,
        }
    }
}

/// Failure to obtain an HTTP response.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The request failed on every attempt the retry budget allowed.
    #[error("request failed after {attempts} attempt(s): {source}")]
    Request {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// The overall request timeout elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The response arrived but its body could not be read.
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
}

/// A structured error reported by the Dify API.
///
/// Decoded from the body of a non-success response, e.g.
/// `{"status": 400, "code": "invalid_param", "message": "..."}`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("APIError: {code} - {message} (status code: {status})")]
pub struct ApiError {
    /// HTTP status. Taken from the body's `status` (or `status_code`) when
    /// present, otherwise from the response status line.
    pub status: u16,
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Wire shape of an error body. Both status spellings may appear at once.
#[derive(Deserialize)]
struct ApiErrorBody {
    status: Option<u16>,
    status_code: Option<u16>,
    code: String,
    message: String,
}

impl ApiError {
    /// Decode an API error from a response body.
    ///
    /// Returns `None` when the body is not a JSON object carrying both
    /// `code` and `message`. `status` wins over `status_code`.
    pub fn from_body(http_status: u16, body: &[u8]) -> Option<Self> {
        let raw: ApiErrorBody = serde_json::from_slice(body).ok()?;
        let status = raw
            .status
            .or(raw.status_code)
            .filter(|s| *s != 0)
            .unwrap_or(http_status);
        Some(ApiError {
            status,
            code: raw.code,
            message: raw.message,
        })
    }
}

/// Map a non-success response body to the error the caller sees: the
/// structured [`ApiError`] when decodable, else the status-only error.
pub(crate) fn error_for_status(http_status: u16, body: &[u8]) -> Error {
    match ApiError::from_body(http_status, body) {
        Some(api) => Error::Api(api),
        None => Error::Status(http_status),
    }
}
