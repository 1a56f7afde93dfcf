//! Request plumbing: transport, dispatch, streaming, and delivery.
//!
//! These modules handle everything between a [`DifyClient`](crate::DifyClient)
//! call and the Dify HTTP API:
//!
//! - [`retry`]: retryable status and error detection (429, 5xx, connection
//!   failures) with bounded exponential backoff. Never retries 400/401.
//! - [`transport`]: [`Transport`] runs one logical request through the retry
//!   loop under an overall timeout.
//! - [`dispatch`]: [`RequestDescriptor`] and [`Reply`], the blocking or
//!   streaming result of a generating call.
//! - [`streaming`]: the background task that turns an event-stream body into
//!   [`StreamChunk`](crate::types::StreamChunk)s.
//! - [`channel`]: the cancellable rendezvous [`ChunkStream`] the caller reads.
//! - [`tracing`]: per-request correlation IDs and spans.

pub mod channel;
pub mod dispatch;
pub mod retry;
pub mod streaming;
pub mod tracing;
pub mod transport;

// Re-export commonly used items at the module level.
pub use channel::{ChunkStream, Delivery};
pub use dispatch::{Operation, Reply, RequestDescriptor, TaskKind};
pub use retry::RetryConfig;
pub use streaming::{collect_answer, extract_usage};
pub use self::tracing::generate_request_id;
pub use transport::Transport;
