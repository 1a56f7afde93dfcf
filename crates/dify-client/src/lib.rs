//! Async Rust client for the [Dify](https://dify.ai/) application API.
//!
//! `dify-client` sends chat, completion, and workflow requests to a Dify
//! application and hands back either one decoded result (`blocking` mode) or
//! an incremental stream of event chunks (`streaming` mode). Every request
//! goes through a resilient transport with bounded retry and an overall
//! timeout.
//!
//! # Getting started
//!
//! ```toml
//! [dependencies]
//! dify-client = { path = "../dify-client" }
//! ```
//!
//! ```ignore
//! use dify_client::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> dify_client::Result<()> {
//!     let client = DifyClient::from_env()?;
//!
//!     let request = ChatMessageRequest::new("What is Dify?", "user-123")
//!         .with_mode(ResponseMode::Streaming);
//!
//!     let reply = client.chat_messages(&request, CancellationToken::new()).await?;
//!     if let Reply::Streaming(mut stream) = reply {
//!         while let Some(chunk) = stream.recv().await {
//!             if chunk.is_error() {
//!                 eprintln!("error: {:?}", chunk.message);
//!                 break;
//!             }
//!             print!("{}", chunk.answer.unwrap_or_default());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Configure the client:** [`ClientConfig`] (builder methods or
//!   [`ClientConfig::from_env`]) and [`RetryConfig`](api::RetryConfig).
//! - **Send generating requests:** [`DifyClient::chat_messages`],
//!   [`DifyClient::completion_messages`], [`DifyClient::run_workflow`], or the
//!   untyped [`DifyClient::dispatch`] with a
//!   [`RequestDescriptor`](api::RequestDescriptor).
//! - **Consume a stream:** [`ChunkStream`](api::ChunkStream), which is also a
//!   `futures::Stream`. Cancel through the `CancellationToken` passed at
//!   dispatch, [`ChunkStream::cancel`](api::ChunkStream::cancel), or by
//!   dropping the stream.
//! - **Handle failures:** [`Error`]. Mid-stream failures arrive as error
//!   chunks instead ([`StreamChunk::is_error`](types::StreamChunk::is_error)).
//! - **Other endpoints:** [`DifyClient::upload_file`],
//!   [`DifyClient::stop_task`], [`DifyClient::workflow_status`].

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod prelude;
pub mod types;

pub use client::DifyClient;
pub use config::ClientConfig;
pub use error::{ApiError, Error, Result, TransportError};
