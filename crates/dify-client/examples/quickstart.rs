//! End-to-end tour: blocking chat, file upload, streamed workflow, task stop.
//!
//! # Usage
//!
//! ```bash
//! DIFY_API_KEY=app-... cargo run --example quickstart -- ./logo.png
//! ```

use dify_client::api::TaskKind;
use dify_client::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("dify_client=debug")
        .init();

    // 1. Create the client from DIFY_* environment variables.
    let client = DifyClient::from_env()?;
    let user = "abc-123";

    // 2. Blocking chat message with a remote image attached.
    let request = ChatMessageRequest::new("What are the specs of the iPhone 13 Pro Max?", user)
        .with_file(FileUploadInfo::remote_url(
            "image",
            "https://cloud.dify.ai/logo/logo-site.png",
        ));
    if let Some(chat) = client
        .chat_messages(&request, CancellationToken::new())
        .await?
        .into_blocking()
    {
        println!("Chat answer: {}", chat.answer);
        println!("Tokens used: {}", chat.metadata.usage.total_tokens);
    }

    // 3. Upload a local file, if one was given.
    if let Some(path) = std::env::args().nth(1) {
        let uploaded = client.upload_file(&path, user).await?;
        println!("Uploaded {} as {}", uploaded.name, uploaded.id);
    }

    // 4. Streamed workflow run.
    let request = WorkflowRunRequest::new(user).with_mode(ResponseMode::Streaming);
    let cancel = CancellationToken::new();
    let mut task_id = None;
    if let Some(mut stream) = client.run_workflow(&request, cancel).await?.into_stream() {
        while let Some(chunk) = stream.recv().await {
            if task_id.is_none() {
                task_id = chunk.task_id.clone();
            }
            println!("Workflow chunk: {} {:?}", chunk.event, chunk.data);
            if chunk.is_error() {
                eprintln!("Stream error: {:?}", chunk.message);
            }
        }
    }

    // 5. Stop the task (a no-op once it has finished).
    if let Some(task_id) = task_id {
        let stopped = client.stop_task(TaskKind::Workflow, &task_id, user).await?;
        println!("Stop task: {}", stopped.result);
    }

    Ok(())
}
