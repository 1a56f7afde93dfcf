//! Request and response shapes of the Dify application API.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

fn unix_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

// ── Response mode ──────────────────────────────────────────────────

/// How the server delivers the result of a generating request.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// One JSON document once the run has finished.
    #[default]
    Blocking,
    /// Incremental event-stream chunks while the run progresses.
    Streaming,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Blocking => "blocking",
            ResponseMode::Streaming => "streaming",
        }
    }

    /// Read the `response_mode` selector out of a raw request payload.
    pub fn from_payload(payload: &Value) -> Result<Self, Error> {
        match payload.get("response_mode") {
            Some(Value::String(mode)) => mode.parse(),
            Some(other) => Err(Error::InvalidResponseMode(other.to_string())),
            None => Err(Error::InvalidResponseMode(String::new())),
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocking" => Ok(ResponseMode::Blocking),
            "streaming" => Ok(ResponseMode::Streaming),
            other => Err(Error::InvalidResponseMode(other.to_string())),
        }
    }
}

// ── Request types ──────────────────────────────────────────────────

/// A file attached to a request, either by URL or by a prior upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileUploadInfo {
    #[serde(rename = "type")]
    pub file_type: String,
    pub transfer_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_file_id: Option<String>,
}

impl FileUploadInfo {
    /// Attach a file hosted at `url`.
    pub fn remote_url(file_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            file_type: file_type.into(),
            transfer_method: "remote_url".into(),
            url: Some(url.into()),
            upload_file_id: None,
        }
    }

    /// Attach a file previously sent with `upload_file`.
    pub fn local_file(file_type: impl Into<String>, upload_file_id: impl Into<String>) -> Self {
        Self {
            file_type: file_type.into(),
            transfer_method: "local_file".into(),
            url: None,
            upload_file_id: Some(upload_file_id.into()),
        }
    }
}

/// Body of `POST /chat-messages`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ChatMessageRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub inputs: Map<String, Value>,
    pub response_mode: ResponseMode,
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileUploadInfo>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_generate_name: bool,
}

impl ChatMessageRequest {
    pub fn new(query: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_file(mut self, file: FileUploadInfo) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_auto_generate_name(mut self, enabled: bool) -> Self {
        self.auto_generate_name = enabled;
        self
    }
}

/// Body of `POST /completion-messages`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CompletionMessageRequest {
    /// Always serialized, even when empty; the endpoint requires it.
    pub inputs: Map<String, Value>,
    pub response_mode: ResponseMode,
    pub user: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileUploadInfo>,
}

impl CompletionMessageRequest {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_file(mut self, file: FileUploadInfo) -> Self {
        self.files.push(file);
        self
    }
}

/// Body of `POST /workflows/run`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct WorkflowRunRequest {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub inputs: Map<String, Value>,
    pub response_mode: ResponseMode,
    pub user: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileUploadInfo>,
}

impl WorkflowRunRequest {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_file(mut self, file: FileUploadInfo) -> Self {
        self.files.push(file);
        self
    }
}

// ── Response types ─────────────────────────────────────────────────

/// Token usage and pricing reported with a finished message.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub prompt_unit_price: String,
    pub prompt_price_unit: String,
    pub prompt_price: String,
    pub completion_tokens: u64,
    pub completion_unit_price: String,
    pub completion_price_unit: String,
    pub completion_price: String,
    pub total_tokens: u64,
    pub total_price: String,
    pub currency: String,
    pub latency: f64,
}

/// A knowledge-base segment that contributed to an answer.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct RetrieverResource {
    pub position: u32,
    pub dataset_id: String,
    pub dataset_name: String,
    pub document_id: String,
    pub document_name: String,
    pub segment_id: String,
    pub score: f64,
    pub content: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Metadata {
    pub usage: Usage,
    pub retriever_resources: Vec<RetrieverResource>,
}

/// Blocking result of `POST /chat-messages`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ChatCompletionResponse {
    pub message_id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub mode: String,
    pub answer: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub created_at: i64,
}

impl ChatCompletionResponse {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        unix_to_utc(self.created_at)
    }
}

/// Blocking result of `POST /completion-messages`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CompletionResponse {
    #[serde(alias = "message_id")]
    pub id: String,
    pub answer: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub created_at: i64,
}

impl CompletionResponse {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        unix_to_utc(self.created_at)
    }
}

/// Execution details of one workflow run.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct WorkflowRunData {
    pub id: String,
    pub workflow_id: String,
    pub status: String,
    #[serde(default)]
    pub outputs: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub elapsed_time: f64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_steps: u32,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub finished_at: Option<i64>,
}

impl WorkflowRunData {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        unix_to_utc(self.created_at)
    }

    pub fn finished_at_utc(&self) -> Option<DateTime<Utc>> {
        self.finished_at.and_then(unix_to_utc)
    }
}

/// Blocking result of `POST /workflows/run`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct WorkflowCompletionResponse {
    pub workflow_run_id: String,
    pub task_id: String,
    pub data: WorkflowRunData,
}

/// Result of `GET /workflows/run/{workflow_run_id}`.
///
/// `inputs` and `outputs` come back JSON-encoded as strings on some server
/// versions and as objects on others, so both are kept as raw values.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct WorkflowStatusResponse {
    pub id: String,
    pub workflow_id: String,
    pub status: String,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub outputs: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub total_steps: u32,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub created_at: Value,
    #[serde(default)]
    pub finished_at: Value,
    #[serde(default)]
    pub elapsed_time: f64,
}

/// Result of `POST /files/upload`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct FileUploadResponse {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub extension: String,
    pub mime_type: String,
    pub created_by: String,
    pub created_at: i64,
}

impl FileUploadResponse {
    /// Reference this upload from a later request.
    pub fn as_attachment(&self, file_type: impl Into<String>) -> FileUploadInfo {
        FileUploadInfo::local_file(file_type, self.id.clone())
    }
}

/// Result of a task stop request.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct StopResponse {
    pub result: String,
}

// ── Streaming chunks ───────────────────────────────────────────────

/// Event kind carried by a [`StreamChunk`].
///
/// Known Dify events get their own variant; anything else is preserved in
/// [`ChunkEvent::Other`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[serde(from = "String", into = "String")]
pub enum ChunkEvent {
    #[default]
    Message,
    AgentMessage,
    AgentThought,
    MessageFile,
    MessageEnd,
    MessageReplace,
    TtsMessage,
    TtsMessageEnd,
    WorkflowStarted,
    NodeStarted,
    NodeFinished,
    WorkflowFinished,
    Ping,
    Error,
    Other(String),
}

impl ChunkEvent {
    pub fn as_str(&self) -> &str {
        match self {
            ChunkEvent::Message => "message",
            ChunkEvent::AgentMessage => "agent_message",
            ChunkEvent::AgentThought => "agent_thought",
            ChunkEvent::MessageFile => "message_file",
            ChunkEvent::MessageEnd => "message_end",
            ChunkEvent::MessageReplace => "message_replace",
            ChunkEvent::TtsMessage => "tts_message",
            ChunkEvent::TtsMessageEnd => "tts_message_end",
            ChunkEvent::WorkflowStarted => "workflow_started",
            ChunkEvent::NodeStarted => "node_started",
            ChunkEvent::NodeFinished => "node_finished",
            ChunkEvent::WorkflowFinished => "workflow_finished",
            ChunkEvent::Ping => "ping",
            ChunkEvent::Error => "error",
            ChunkEvent::Other(s) => s,
        }
    }
}

impl From<String> for ChunkEvent {
    fn from(s: String) -> Self {
        match s.as_str() {
            "message" => ChunkEvent::Message,
            "agent_message" => ChunkEvent::AgentMessage,
            "agent_thought" => ChunkEvent::AgentThought,
            "message_file" => ChunkEvent::MessageFile,
            "message_end" => ChunkEvent::MessageEnd,
            "message_replace" => ChunkEvent::MessageReplace,
            "tts_message" => ChunkEvent::TtsMessage,
            "tts_message_end" => ChunkEvent::TtsMessageEnd,
            "workflow_started" => ChunkEvent::WorkflowStarted,
            "node_started" => ChunkEvent::NodeStarted,
            "node_finished" => ChunkEvent::NodeFinished,
            "workflow_finished" => ChunkEvent::WorkflowFinished,
            "ping" => ChunkEvent::Ping,
            "error" => ChunkEvent::Error,
            _ => ChunkEvent::Other(s),
        }
    }
}

impl From<ChunkEvent> for String {
    fn from(event: ChunkEvent) -> Self {
        match event {
            ChunkEvent::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ChunkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded unit of a streaming response.
///
/// Chat, completion, and workflow streams all share this shape; fields a
/// given event does not carry are left empty. Unknown fields are kept in
/// [`extra`](Self::extra).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StreamChunk {
    #[serde(default)]
    pub event: ChunkEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Workflow and node payloads (`workflow_started`, `node_finished`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Base64 audio for `tts_message` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl StreamChunk {
    /// A synthetic error chunk. Never received from the wire as such; the
    /// client manufactures it to report failures through the stream.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            event: ChunkEvent::Error,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// An error chunk carrying a server-reported code and status.
    pub fn api_error(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: Some(code.into()),
            ..Self::error(message)
        }
    }

    pub fn is_error(&self) -> bool {
        self.event == ChunkEvent::Error
    }

    /// Whether this chunk ends the logical response (`message_end`,
    /// `workflow_finished`, `tts_message_end` or `error`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event,
            ChunkEvent::MessageEnd
                | ChunkEvent::WorkflowFinished
                | ChunkEvent::TtsMessageEnd
                | ChunkEvent::Error
        )
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        self.created_at.and_then(unix_to_utc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_mode_parses_only_known_values() {
        assert_eq!("blocking".parse::<ResponseMode>().unwrap(), ResponseMode::Blocking);
        assert_eq!("streaming".parse::<ResponseMode>().unwrap(), ResponseMode::Streaming);
        for bad in ["Streaming", "stream", "", "async"] {
            let err = bad.parse::<ResponseMode>().unwrap_err();
            assert!(matches!(err, Error::InvalidResponseMode(ref m) if m == bad));
        }
    }

    #[test]
    fn response_mode_from_payload() {
        let payload = json!({"response_mode": "streaming", "user": "u"});
        assert_eq!(ResponseMode::from_payload(&payload).unwrap(), ResponseMode::Streaming);

        assert!(ResponseMode::from_payload(&json!({"user": "u"})).is_err());
        assert!(ResponseMode::from_payload(&json!({"response_mode": 1})).is_err());
        assert!(ResponseMode::from_payload(&json!({"response_mode": "sync"})).is_err());
    }

    #[test]
    fn chat_request_omits_empty_optionals() {
        let req = ChatMessageRequest::new("hi", "abc-123").with_mode(ResponseMode::Streaming);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"query": "hi", "response_mode": "streaming", "user": "abc-123"})
        );
    }

    #[test]
    fn completion_request_always_sends_inputs() {
        let value = serde_json::to_value(CompletionMessageRequest::new("u")).unwrap();
        assert_eq!(value["inputs"], json!({}));
        assert_eq!(value["response_mode"], "blocking");
    }

    #[test]
    fn file_attachment_shapes() {
        let remote = serde_json::to_value(FileUploadInfo::remote_url("image", "https://x/y.png")).unwrap();
        assert_eq!(
            remote,
            json!({"type": "image", "transfer_method": "remote_url", "url": "https://x/y.png"})
        );
        let local = serde_json::to_value(FileUploadInfo::local_file("image", "f-1")).unwrap();
        assert_eq!(local["upload_file_id"], "f-1");
        assert!(local.get("url").is_none());
    }

    #[test]
    fn chunk_event_round_trips_unknown_tags() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"event":"iteration_started","foo":1}"#).unwrap();
        assert_eq!(chunk.event, ChunkEvent::Other("iteration_started".into()));
        assert_eq!(chunk.extra.get("foo"), Some(&json!(1)));
        assert_eq!(serde_json::to_value(&chunk).unwrap()["event"], "iteration_started");
    }

    #[test]
    fn chunk_decodes_message_end_metadata() {
        let chunk: StreamChunk = serde_json::from_value(json!({
            "event": "message_end",
            "task_id": "t1",
            "message_id": "m1",
            "metadata": {"usage": {"total_tokens": 42, "latency": 0.5}}
        }))
        .unwrap();
        assert!(chunk.is_terminal());
        assert!(!chunk.is_error());
        assert_eq!(chunk.metadata.unwrap().usage.total_tokens, 42);
    }

    #[test]
    fn synthetic_error_chunks() {
        let plain = StreamChunk::error("boom");
        assert!(plain.is_error() && plain.is_terminal());
        assert_eq!(plain.message.as_deref(), Some("boom"));
        assert!(plain.code.is_none());

        let api = StreamChunk::api_error(400, "invalid_param", "bad");
        assert_eq!(api.status, Some(400));
        assert_eq!(api.code.as_deref(), Some("invalid_param"));
    }

    #[test]
    fn timestamps_convert_to_utc() {
        let resp = ChatCompletionResponse {
            created_at: 1_705_395_332,
            ..Default::default()
        };
        assert_eq!(resp.created_at_utc().unwrap().timestamp(), 1_705_395_332);
        assert!(ChatCompletionResponse::default().created_at_utc().is_none());
    }

    #[test]
    fn workflow_status_accepts_string_or_object_io() {
        let status: WorkflowStatusResponse = serde_json::from_value(json!({
            "id": "r1", "workflow_id": "w1", "status": "succeeded",
            "inputs": "{\"q\": 1}", "outputs": {"text": "ok"},
            "total_steps": 3, "total_tokens": 10,
            "created_at": 1705395332, "finished_at": 1705395333, "elapsed_time": 1.2
        }))
        .unwrap();
        assert_eq!(status.inputs, json!("{\"q\": 1}"));
        assert_eq!(status.outputs.unwrap()["text"], "ok");
    }
}
