//! Request descriptors and the two shapes a dispatched call can return.
//!
//! A [`RequestDescriptor`] names the target [`Operation`] and carries the
//! request body as an opaque JSON value. Its `response_mode` field decides
//! whether [`DifyClient::dispatch`](crate::DifyClient::dispatch) hands back a
//! decoded [`Reply::Blocking`] value or a [`Reply::Streaming`] chunk stream.

use serde::Serialize;
use serde_json::Value;

use crate::api::channel::ChunkStream;
use crate::error::Result;
use crate::types::{ResponseMode, StreamChunk};

/// A generating endpoint that supports both response modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ChatMessages,
    CompletionMessages,
    WorkflowRun,
}

impl Operation {
    /// Path relative to the base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Operation::ChatMessages => "/chat-messages",
            Operation::CompletionMessages => "/completion-messages",
            Operation::WorkflowRun => "/workflows/run",
        }
    }
}

/// Which kind of running task a stop request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskKind {
    #[default]
    Chat,
    Completion,
    Workflow,
}

impl TaskKind {
    pub fn stop_path(&self, task_id: &str) -> String {
        match self {
            TaskKind::Chat => format!("/chat-messages/{task_id}/stop"),
            TaskKind::Completion => format!("/completion-messages/{task_id}/stop"),
            TaskKind::Workflow => format!("/workflows/tasks/{task_id}/stop"),
        }
    }
}

/// One logical request: where it goes and what it carries.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub operation: Operation,
    pub payload: Value,
}

impl RequestDescriptor {
    pub fn new(operation: Operation, payload: Value) -> Self {
        Self { operation, payload }
    }

    /// Lower a typed request body into a descriptor.
    pub fn from_body<B: Serialize>(operation: Operation, body: &B) -> Result<Self> {
        Ok(Self::new(operation, serde_json::to_value(body)?))
    }

    /// The payload's `response_mode`, or
    /// [`Error::InvalidResponseMode`](crate::Error::InvalidResponseMode) when
    /// it is missing or not one of the two known values.
    pub fn mode(&self) -> Result<ResponseMode> {
        ResponseMode::from_payload(&self.payload)
    }
}

/// Result of a dispatched call.
#[derive(Debug)]
pub enum Reply<T> {
    /// The decoded result of a blocking request.
    Blocking(T),
    /// Chunks of a streaming request, delivered as they arrive.
    Streaming(ChunkStream<StreamChunk>),
}

impl<T> Reply<T> {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Reply::Streaming(_))
    }

    pub fn into_blocking(self) -> Option<T> {
        match self {
            Reply::Blocking(value) => Some(value),
            Reply::Streaming(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<ChunkStream<StreamChunk>> {
        match self {
            Reply::Streaming(stream) => Some(stream),
            Reply::Blocking(_) => None,
        }
    }
}
