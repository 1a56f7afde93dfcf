//! Event-stream decoding for streaming responses.
//!
//! [`spawn_stream`] starts one background task per streaming request. The
//! task owns the HTTP response end to end, turns every `data: ` line of the
//! body into a [`StreamChunk`], and hands chunks to the caller through a
//! rendezvous [`ChunkStream`]. Failures are reported as synthetic error
//! chunks; the channel closes when the task returns, whatever the reason.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, trace, warn};

use crate::api::channel::{ChunkSender, ChunkStream, Delivery, rendezvous};
use crate::api::transport::{HttpRequest, Transport};
use crate::error::ApiError;
use crate::types::{ChunkEvent, StreamChunk, Usage};

/// Prefix marking a significant event-stream line.
pub const DATA_PREFIX: &[u8] = b"data: ";

/// Start the background task for one streaming request and return the
/// consumer side immediately.
pub fn spawn_stream(
    transport: Transport,
    request: HttpRequest,
    cancel: &CancellationToken,
    span: Span,
) -> ChunkStream<StreamChunk> {
    let (tx, stream) = rendezvous(cancel);
    tokio::spawn(run_stream(transport, request, tx).instrument(span));
    stream
}

/// Drive one streaming request to completion. Dropping `tx` on return closes
/// the channel; dropping the response releases the body.
async fn run_stream(transport: Transport, request: HttpRequest, tx: ChunkSender<StreamChunk>) {
    debug!("Sending streaming request");

    let response = tokio::select! {
        biased;
        _ = tx.cancelled() => {
            debug!("Stream cancelled before response");
            return;
        }
        result = transport.execute(&request) => result,
    };

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            warn!("Streaming request failed: {e}");
            tx.send(StreamChunk::error(e.to_string())).await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = tokio::select! {
            biased;
            _ = tx.cancelled() => return,
            body = response.bytes() => body.unwrap_or_default(),
        };
        let chunk = error_chunk_for_status(status.as_u16(), &body);
        warn!(
            "Streaming request rejected with HTTP {status}: {}",
            chunk.message.as_deref().unwrap_or_default()
        );
        tx.send(chunk).await;
        return;
    }

    let mut lines = LineReader::new(Box::pin(response.bytes_stream()));
    let mut delivered = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = tx.cancelled() => {
                debug!("Stream cancelled after {delivered} chunks");
                return;
            }
            next = lines.next_line() => next,
        };

        match next {
            Ok(Some(line)) => {
                trace!("Stream line: {} bytes", line.len());
                let Some(chunk) = decode_line(&line) else {
                    continue;
                };
                match tx.send(chunk).await {
                    Delivery::Delivered => delivered += 1,
                    Delivery::Cancelled | Delivery::Closed => {
                        debug!("Stream stopped by consumer after {delivered} chunks");
                        return;
                    }
                }
            }
            Ok(None) => {
                debug!("Stream completed with {delivered} chunks");
                return;
            }
            Err(e) => {
                warn!("Failed to read streaming body: {e}");
                tx.send(StreamChunk::error(e.to_string())).await;
                return;
            }
        }
    }
}

/// The single chunk reported for a non-success streaming response.
pub fn error_chunk_for_status(status: u16, body: &[u8]) -> StreamChunk {
    match ApiError::from_body(status, body) {
        Some(api) => StreamChunk::api_error(api.status, api.code, api.message),
        None => StreamChunk {
            status: Some(status),
            ..StreamChunk::error(format!("status code: {status}"))
        },
    }
}

/// Decode one body line.
///
/// Returns `None` for lines that do not start with `data: ` (keep-alives,
/// comments, blank separators, other event-stream fields). A payload that is
/// not a valid chunk becomes an error chunk rather than ending the stream.
pub fn decode_line(line: &[u8]) -> Option<StreamChunk> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    Some(match serde_json::from_slice::<StreamChunk>(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(
                "Failed to parse stream chunk: {e}; data: {}",
                String::from_utf8_lossy(payload)
            );
            StreamChunk::error(format!("failed to parse stream chunk: {e}"))
        }
    })
}

/// Splits a byte stream into `\n`-terminated lines.
///
/// A trailing `\r` is stripped. A final line without a terminator is still
/// returned at end of stream.
pub struct LineReader<S> {
    inner: S,
    buffer: Vec<u8>,
    scanned: usize,
    eof: bool,
}

impl<S, E> LineReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            scanned: 0,
            eof: false,
        }
    }

    /// Next complete line, `Ok(None)` at a clean end of stream.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>, E> {
        loop {
            if let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
                let end = self.scanned + offset;
                let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
                self.scanned = 0;
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
            self.scanned = self.buffer.len();

            if self.eof {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                self.scanned = 0;
                let mut line = std::mem::take(&mut self.buffer);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }

            match self.inner.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => return Err(e),
                None => self.eof = true,
            }
        }
    }
}

/// Assemble the streamed answer text from `message` and `agent_message`
/// chunks.
pub fn collect_answer(chunks: &[StreamChunk]) -> String {
    let mut answer = String::new();
    for chunk in chunks {
        if matches!(chunk.event, ChunkEvent::Message | ChunkEvent::AgentMessage)
            && let Some(text) = &chunk.answer
        {
            answer.push_str(text);
        }
    }
    answer
}

/// Usage reported by the last `message_end` chunk, if any.
pub fn extract_usage(chunks: &[StreamChunk]) -> Option<Usage> {
    chunks
        .iter()
        .rev()
        .filter(|c| c.event == ChunkEvent::MessageEnd)
        .find_map(|c| c.metadata.as_ref().map(|m| m.usage.clone()))
}
