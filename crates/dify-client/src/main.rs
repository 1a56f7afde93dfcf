//! Talk to a Dify application from the command line.
//!
//! Reads `DIFY_API_KEY` (and optionally `DIFY_BASE_URL`, `DIFY_TIMEOUT_SECS`,
//! `DIFY_MAX_RETRIES`) from the environment.
//!
//! # Examples
//!
//! ```sh
//! # Blocking chat message
//! dify chat "What are the specs of the iPhone 13 Pro Max?" --user abc-123
//!
//! # Streamed answer, printed as it arrives
//! dify chat "Tell me a story" --stream
//!
//! # Run a workflow with inputs and stream its events
//! dify workflow --input city=Berlin --stream --events
//!
//! # Upload an image, then attach it to a chat message
//! dify upload ./logo.png
//! dify chat "Describe this image" --file-id 72fa9618-...
//!
//! # Stop a running task, check a workflow run
//! dify stop 9da23599-... --kind chat
//! dify status fdlsjfjejkghjda
//! ```

use std::io::Write;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use dify_client::api::TaskKind;
use dify_client::prelude::*;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

type CliResult<T = ()> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Talk to a Dify application.
#[derive(Parser)]
#[command(name = "dify")]
struct Cli {
    /// End-user identifier sent with every request
    #[arg(long, global = true, default_value = "dify-cli")]
    user: String,

    /// Log filter, e.g. `dify_client=debug` (overrides RUST_LOG)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a chat message
    Chat {
        /// The user's question
        query: String,
        #[command(flatten)]
        generate: GenerateArgs,
        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Run a text-generation application
    Complete {
        #[command(flatten)]
        generate: GenerateArgs,
    },
    /// Run a workflow application
    Workflow {
        #[command(flatten)]
        generate: GenerateArgs,
    },
    /// Show the state of a workflow run
    Status {
        workflow_run_id: String,
    },
    /// Stop a running streaming task
    Stop {
        task_id: String,
        #[arg(long, value_enum, default_value_t = Kind::Chat)]
        kind: Kind,
    },
    /// Upload a file for use as an attachment
    Upload {
        path: std::path::PathBuf,
    },
}

#[derive(clap::Args)]
struct GenerateArgs {
    /// Input variable as KEY=VALUE (repeatable)
    #[arg(long = "input", value_parser = parse_key_value)]
    inputs: Vec<(String, String)>,

    /// Attach an uploaded file by ID (treated as an image)
    #[arg(long = "file-id")]
    file_ids: Vec<String>,

    /// Attach a remote image by URL
    #[arg(long = "image-url")]
    image_urls: Vec<String>,

    /// Stream the response instead of waiting for the full result
    #[arg(long)]
    stream: bool,

    /// With --stream, print every chunk as JSON instead of only answer text
    #[arg(long)]
    events: bool,
}

impl GenerateArgs {
    fn mode(&self) -> ResponseMode {
        if self.stream {
            ResponseMode::Streaming
        } else {
            ResponseMode::Blocking
        }
    }

    fn inputs(&self) -> Map<String, Value> {
        self.inputs
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect()
    }

    fn files(&self) -> Vec<FileUploadInfo> {
        self.file_ids
            .iter()
            .map(|id| FileUploadInfo::local_file("image", id))
            .chain(
                self.image_urls
                    .iter()
                    .map(|url| FileUploadInfo::remote_url("image", url)),
            )
            .collect()
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Chat,
    Completion,
    Workflow,
}

impl From<Kind> for TaskKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Chat => TaskKind::Chat,
            Kind::Completion => TaskKind::Completion,
            Kind::Workflow => TaskKind::Workflow,
        }
    }
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))
}

fn init_logging(filter: Option<&str>) {
    let filter = filter
        .map(EnvFilter::new)
        .unwrap_or_else(EnvFilter::from_default_env);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ── Output ─────────────────────────────────────────────────────────

fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a streaming reply. Returns an error if the stream reported one.
async fn print_stream(mut stream: ChunkStream<StreamChunk>, events: bool) -> CliResult {
    let mut stdout = std::io::stdout();
    let mut failure = None;
    while let Some(chunk) = stream.recv().await {
        if events {
            writeln!(stdout, "{}", serde_json::to_string(&chunk)?)?;
        } else if let Some(answer) = &chunk.answer
            && matches!(chunk.event, ChunkEvent::Message | ChunkEvent::AgentMessage)
        {
            write!(stdout, "{answer}")?;
            stdout.flush()?;
        }
        if chunk.is_error() {
            failure = Some(chunk);
        }
    }
    if !events {
        writeln!(stdout)?;
    }
    match failure {
        Some(chunk) => Err(format!("stream failed: {}", chunk.message.unwrap_or_default()).into()),
        None => Ok(()),
    }
}

async fn print_reply<T: serde::Serialize>(reply: Reply<T>, events: bool) -> CliResult {
    match reply {
        Reply::Blocking(value) => print_json(&value),
        Reply::Streaming(stream) => print_stream(stream, events).await,
    }
}

// ── Commands ───────────────────────────────────────────────────────

async fn run(cli: Cli, cancel: CancellationToken) -> CliResult {
    let client = DifyClient::from_env()?;

    match cli.command {
        Command::Chat {
            query,
            generate,
            conversation,
        } => {
            let mut request = ChatMessageRequest::new(query, &cli.user).with_mode(generate.mode());
            request.inputs = generate.inputs();
            request.files = generate.files();
            if let Some(id) = conversation {
                request = request.with_conversation(id);
            }
            let reply = client.chat_messages(&request, cancel).await?;
            print_reply(reply, generate.events).await
        }
        Command::Complete { generate } => {
            let mut request = CompletionMessageRequest::new(&cli.user).with_mode(generate.mode());
            request.inputs = generate.inputs();
            request.files = generate.files();
            let reply = client.completion_messages(&request, cancel).await?;
            print_reply(reply, generate.events).await
        }
        Command::Workflow { generate } => {
            let mut request = WorkflowRunRequest::new(&cli.user).with_mode(generate.mode());
            request.inputs = generate.inputs();
            request.files = generate.files();
            let reply = client.run_workflow(&request, cancel).await?;
            print_reply(reply, generate.events).await
        }
        Command::Status { workflow_run_id } => {
            print_json(&client.workflow_status(&workflow_run_id).await?)
        }
        Command::Stop { task_id, kind } => {
            print_json(&client.stop_task(kind.into(), &task_id, &cli.user).await?)
        }
        Command::Upload { path } => print_json(&client.upload_file(&path, &cli.user).await?),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    // Ctrl-C cancels the in-flight request, stopping any stream task.
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let result = tokio::select! {
        result = run(cli, cancel.clone()) => result,
        _ = cancel.cancelled() => {
            eprintln!("Interrupted");
            process::exit(130);
        }
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_inputs() {
        assert_eq!(
            parse_key_value("city=Berlin").unwrap(),
            ("city".to_string(), "Berlin".to_string())
        );
        assert_eq!(parse_key_value("expr=a=b").unwrap().1, "a=b");
        assert!(parse_key_value("city").is_err());
    }

    #[test]
    fn cli_parses_streaming_workflow() {
        let cli = Cli::parse_from([
            "dify", "workflow", "--input", "city=Berlin", "--stream", "--user", "abc-123",
        ]);
        assert_eq!(cli.user, "abc-123");
        match cli.command {
            Command::Workflow { generate } => {
                assert_eq!(generate.mode(), ResponseMode::Streaming);
                assert_eq!(generate.inputs()["city"], "Berlin");
            }
            _ => panic!("expected workflow command"),
        }
    }
}
