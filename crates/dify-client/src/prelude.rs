//! Convenience re-exports for common `dify-client` types.
//!
//! Meant to be glob-imported by applications:
//!
//! ```ignore
//! use dify_client::prelude::*;
//! ```
//!
//! Lower-level pieces (transport, line reader, raw channel halves) are left
//! out; import those from [`api`](crate::api) directly when needed.

// ── Client ──────────────────────────────────────────────────────────
pub use crate::{ClientConfig, DifyClient, Error, Result};

// ── Dispatch ────────────────────────────────────────────────────────
pub use crate::api::{
    ChunkStream, Operation, Reply, RequestDescriptor, RetryConfig, TaskKind, collect_answer,
    extract_usage,
};

// ── Request and response types ──────────────────────────────────────
pub use crate::types::{
    ChatCompletionResponse, ChatMessageRequest, ChunkEvent, CompletionMessageRequest,
    CompletionResponse, FileUploadInfo, FileUploadResponse, ResponseMode, StopResponse,
    StreamChunk, WorkflowCompletionResponse, WorkflowRunRequest, WorkflowStatusResponse,
};

pub use tokio_util::sync::CancellationToken;
