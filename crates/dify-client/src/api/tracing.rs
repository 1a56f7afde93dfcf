//! Correlation IDs for dispatched requests.
//!
//! Each request gets a `request_id` recorded on a `tracing` span. The span is
//! entered for blocking calls and instruments the background task of
//! streaming calls, so every log line of one request carries the same ID.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tracing::{Span, debug_span};

/// Generate a unique ID for one dispatched request.
pub fn generate_request_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter disambiguates calls within the same clock tick.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("req-{ts:x}-{count:04x}")
}

/// Span for one request against `path`.
pub fn request_span(method: &str, path: &str, request_id: &str) -> Span {
    debug_span!("dify_request", %method, %path, %request_id)
}
