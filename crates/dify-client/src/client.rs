//! The Dify application API client.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, trace};

use crate::api::dispatch::{Operation, Reply, RequestDescriptor, TaskKind};
use crate::api::streaming::spawn_stream;
use crate::api::tracing::{generate_request_id, request_span};
use crate::api::transport::{HttpRequest, MultipartFile, Transport};
use crate::config::ClientConfig;
use crate::error::{Result, error_for_status};
use crate::types::{
    ChatCompletionResponse, ChatMessageRequest, CompletionMessageRequest, CompletionResponse,
    FileUploadResponse, ResponseMode, StopResponse, WorkflowCompletionResponse,
    WorkflowRunRequest, WorkflowStatusResponse,
};

/// Async client for one Dify application.
///
/// Cloning is cheap; clones share the HTTP connection pool and the
/// configuration.
#[derive(Debug, Clone)]
pub struct DifyClient {
    config: Arc<ClientConfig>,
    transport: Transport,
}

impl DifyClient {
    /// Create a client from a validated configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = Transport::new(config.retry.clone(), config.timeout)?;
        Ok(Self {
            config: Arc::new(config),
            transport,
        })
    }

    /// Create a client configured from `DIFY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Use a preconfigured `reqwest::Client` for the underlying HTTP calls.
    pub fn with_http_client(config: ClientConfig, client: reqwest::Client) -> Result<Self> {
        config.validate()?;
        let transport = Transport::with_client(client, config.retry.clone(), config.timeout);
        Ok(Self {
            config: Arc::new(config),
            transport,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn request(&self, method: Method, endpoint: &str) -> Result<HttpRequest> {
        HttpRequest::new(method, self.config.url(endpoint)).bearer(&self.config.api_key)
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Send a generating request in the mode its payload selects.
    ///
    /// An invalid `response_mode` fails here, before any network I/O.
    ///
    /// In blocking mode the call runs in the caller's task and decodes the
    /// body into `T`; it is cancelled by dropping the returned future. In
    /// streaming mode one background task is spawned and the chunk stream is
    /// returned at once; `cancel` (or dropping the stream) stops that task.
    pub async fn dispatch<T: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
        cancel: CancellationToken,
    ) -> Result<Reply<T>> {
        let mode = descriptor.mode()?;
        let path = descriptor.operation.path();
        let request = self.request(Method::POST, path)?.json(&descriptor.payload)?;

        let request_id = generate_request_id();
        let span = request_span("POST", path, &request_id);

        match mode {
            ResponseMode::Blocking => {
                let value = self.execute_json(request).instrument(span).await?;
                Ok(Reply::Blocking(value))
            }
            ResponseMode::Streaming => {
                span.in_scope(|| debug!("Dispatching streaming request"));
                let stream = spawn_stream(self.transport.clone(), request, &cancel, span);
                Ok(Reply::Streaming(stream))
            }
        }
    }

    /// Send a chat message.
    pub async fn chat_messages(
        &self,
        request: &ChatMessageRequest,
        cancel: CancellationToken,
    ) -> Result<Reply<ChatCompletionResponse>> {
        let descriptor = RequestDescriptor::from_body(Operation::ChatMessages, request)?;
        self.dispatch(descriptor, cancel).await
    }

    /// Run a text-generation (completion) application.
    pub async fn completion_messages(
        &self,
        request: &CompletionMessageRequest,
        cancel: CancellationToken,
    ) -> Result<Reply<CompletionResponse>> {
        let descriptor = RequestDescriptor::from_body(Operation::CompletionMessages, request)?;
        self.dispatch(descriptor, cancel).await
    }

    /// Run a workflow application.
    pub async fn run_workflow(
        &self,
        request: &WorkflowRunRequest,
        cancel: CancellationToken,
    ) -> Result<Reply<WorkflowCompletionResponse>> {
        let descriptor = RequestDescriptor::from_body(Operation::WorkflowRun, request)?;
        self.dispatch(descriptor, cancel).await
    }

    // ── Plumbing endpoints ─────────────────────────────────────────

    /// Fetch the state of a workflow run.
    pub async fn workflow_status(&self, workflow_run_id: &str) -> Result<WorkflowStatusResponse> {
        let path = format!("/workflows/run/{workflow_run_id}");
        let request = self.request(Method::GET, &path)?;
        let span = request_span("GET", &path, &generate_request_id());
        self.execute_json(request).instrument(span).await
    }

    /// Stop a running streaming task. Only the task's own `user` may stop it.
    pub async fn stop_task(&self, kind: TaskKind, task_id: &str, user: &str) -> Result<StopResponse> {
        let path = kind.stop_path(task_id);
        let request = self
            .request(Method::POST, &path)?
            .json(&json!({ "user": user }))?;
        let span = request_span("POST", &path, &generate_request_id());
        self.execute_json(request).instrument(span).await
    }

    /// Upload a local file for later use as a `local_file` attachment.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        user: &str,
    ) -> Result<FileUploadResponse> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime_type = mime_for_path(path).map(str::to_string);
        self.upload_bytes(file_name, Bytes::from(data), mime_type, user)
            .await
    }

    /// Upload in-memory file contents.
    pub async fn upload_bytes(
        &self,
        file_name: impl Into<String>,
        data: Bytes,
        mime_type: Option<String>,
        user: &str,
    ) -> Result<FileUploadResponse> {
        let file = MultipartFile {
            file_name: file_name.into(),
            mime_type,
            data,
            fields: vec![("user".to_string(), user.to_string())],
        };
        let request = self.request(Method::POST, "/files/upload")?.multipart(file);
        let span = request_span("POST", "/files/upload", &generate_request_id());
        self.execute_json(request).instrument(span).await
    }

    // ── Blocking execution ─────────────────────────────────────────

    /// Execute `request` and decode a success body into `T`, or map the
    /// non-success body to an API or status error. The overall timeout
    /// covers reading the body.
    async fn execute_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T> {
        debug!("Sending blocking request");
        let (status, body) = self.transport.execute_full(&request).await?;
        debug!("HTTP {} ({} bytes)", status, body.len());

        if !status.is_success() {
            let err = error_for_status(status.as_u16(), &body);
            debug!("Request rejected: {err}");
            return Err(err);
        }
        trace!("Response body: {}", String::from_utf8_lossy(&body));
        Ok(serde_json::from_slice(&body)?)
    }
}

/// MIME type for common attachment extensions. Unknown extensions are sent
/// without an explicit type.
fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn mime_lookup_is_case_insensitive() {
        assert_eq!(mime_for_path(Path::new("a/b.PNG")), Some("image/png"));
        assert_eq!(mime_for_path(Path::new("scan.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("archive.tar.gz")), None);
        assert_eq!(mime_for_path(Path::new("README")), None);
    }

    #[test]
    fn new_rejects_invalid_config() {
        let config = ClientConfig::new("localhost:5001", "k");
        assert!(matches!(DifyClient::new(config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn invalid_mode_fails_before_io() {
        // Port 9 is never contacted; the mode check fails first.
        let client = DifyClient::new(ClientConfig::new("http://127.0.0.1:9", "k")).unwrap();
        let descriptor = RequestDescriptor::new(
            Operation::ChatMessages,
            json!({"query": "hi", "user": "u", "response_mode": "eventually"}),
        );
        let result = client
            .dispatch::<ChatCompletionResponse>(descriptor, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::InvalidResponseMode(m)) if m == "eventually"));
    }
}
