//! Streaming dispatch end to end against a mock Dify server.

use std::time::Duration;

use dify_client::prelude::*;
use futures::StreamExt;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, max_retries: u32) -> DifyClient {
    let config = ClientConfig::new(server.uri(), "test-key")
        .with_max_retries(max_retries)
        .with_retry_waits(Duration::from_millis(10), Duration::from_millis(20))
        .with_timeout(Duration::from_secs(5));
    DifyClient::new(config).unwrap()
}

fn event_stream(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.into())
}

async fn open_chat_stream(client: &DifyClient, cancel: CancellationToken) -> ChunkStream<StreamChunk> {
    let request = ChatMessageRequest::new("hello", "abc-123").with_mode(ResponseMode::Streaming);
    client
        .chat_messages(&request, cancel)
        .await
        .unwrap()
        .into_stream()
        .expect("streaming reply")
}

/// Accept one connection and consume the request head, leaving the socket
/// ready for a hand-written response.
async fn accept_request(listener: &TcpListener) -> TcpStream {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        assert!(n > 0, "client closed before sending a request");
        head.extend_from_slice(&buf[..n]);
    }
    socket
}

fn raw_client(listener: &TcpListener) -> DifyClient {
    let addr = listener.local_addr().unwrap();
    let config = ClientConfig::new(format!("http://{addr}"), "test-key")
        .with_max_retries(0)
        .with_timeout(Duration::from_secs(5));
    DifyClient::new(config).unwrap()
}

/// Serve an endless event stream on one connection; `released` fires once
/// the client has hung up.
async fn serve_until_disconnect(listener: TcpListener, released: oneshot::Sender<()>) {
    let mut socket = accept_request(&listener).await;
    let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";
    if socket.write_all(head.as_bytes()).await.is_err() {
        let _ = released.send(());
        return;
    }
    for i in 0u64.. {
        let line = format!("data: {{\"event\":\"message\",\"answer\":\"{i}\"}}\n\n");
        if socket.write_all(line.as_bytes()).await.is_err() {
            let _ = released.send(());
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn recv(stream: &mut ChunkStream<StreamChunk>) -> Option<StreamChunk> {
    tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("no chunk within 5s")
}

async fn drain(stream: ChunkStream<StreamChunk>) -> Vec<StreamChunk> {
    tokio::time::timeout(Duration::from_secs(5), stream.collect_all())
        .await
        .expect("stream did not close")
}

#[tokio::test]
async fn keep_alive_lines_are_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat-messages"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(event_stream(
            "data: {\"event\":\"message\",\"answer\":\"A\"}\n\
             : keep-alive\n\
             \n\
             data: {\"event\":\"message\",\"answer\":\"B\"}\n\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let stream = open_chat_stream(&client_for(&server, 0), CancellationToken::new()).await;
    let chunks = drain(stream).await;

    let answers: Vec<_> = chunks.iter().map(|c| c.answer.as_deref()).collect();
    assert_eq!(answers, vec![Some("A"), Some("B")]);
    assert!(chunks.iter().all(|c| c.event == ChunkEvent::Message));
}

#[tokio::test]
async fn full_chat_stream_collects_answer_and_usage() {
    let server = MockServer::start().await;
    let body = [
        json!({"event": "message", "task_id": "t-1", "message_id": "m-1", "conversation_id": "c-1", "answer": "Hello", "created_at": 1705395332}),
        json!({"event": "message", "task_id": "t-1", "message_id": "m-1", "conversation_id": "c-1", "answer": ", world", "created_at": 1705395332}),
        json!({"event": "message_end", "task_id": "t-1", "message_id": "m-1", "conversation_id": "c-1",
               "metadata": {"usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13, "currency": "USD"}, "retriever_resources": []}}),
    ]
    .iter()
    .map(|v| format!("data: {v}\n\n"))
    .collect::<String>();
    Mock::given(method("POST"))
        .and(path("/chat-messages"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let stream = open_chat_stream(&client_for(&server, 0), CancellationToken::new()).await;
    let chunks = drain(stream).await;

    assert_eq!(chunks.len(), 3);
    assert_eq!(collect_answer(&chunks), "Hello, world");
    assert_eq!(extract_usage(&chunks).unwrap().total_tokens, 13);
    assert!(chunks.last().unwrap().is_terminal());
    assert_eq!(chunks[0].conversation_id.as_deref(), Some("c-1"));
    assert!(chunks[0].created_at_utc().is_some());
}

#[tokio::test]
async fn malformed_line_yields_error_chunk_and_stream_continues() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat-messages"))
        .respond_with(event_stream(
            "data: {\"event\":\"message\",\"answer\":\"A\"}\n\
             data: {not json}\n\
             data: {\"event\":\"message\",\"answer\":\"B\"}",
        ))
        .mount(&server)
        .await;

    let stream = open_chat_stream(&client_for(&server, 0), CancellationToken::new()).await;
    let chunks = drain(stream).await;

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].answer.as_deref(), Some("A"));
    assert!(chunks[1].is_error());
    // The final line has no trailing newline and is still decoded.
    assert_eq!(chunks[2].answer.as_deref(), Some("B"));
}

#[tokio::test]
async fn api_error_status_yields_single_structured_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat-messages"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": 400,
            "code": "invalid_param",
            "message": "query is required"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let stream = open_chat_stream(&client_for(&server, 3), CancellationToken::new()).await;
    let chunks = drain(stream).await;

    assert_eq!(chunks.len(), 1);
    let chunk = &chunks[0];
    assert!(chunk.is_error());
    assert_eq!(chunk.status, Some(400));
    assert_eq!(chunk.code.as_deref(), Some("invalid_param"));
    assert_eq!(chunk.message.as_deref(), Some("query is required"));
}

#[tokio::test]
async fn undecodable_error_body_yields_generic_status_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat-messages"))
        .respond_with(ResponseTemplate::new(404).set_body_string("<html>not found</html>"))
        .mount(&server)
        .await;

    let stream = open_chat_stream(&client_for(&server, 0), CancellationToken::new()).await;
    let chunks = drain(stream).await;

    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].is_error());
    assert_eq!(chunks[0].message.as_deref(), Some("status code: 404"));
    assert!(chunks[0].code.is_none());
}

#[tokio::test]
async fn exhausted_retries_report_last_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workflows/run"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(3)
        .mount(&server)
        .await;

    let request = WorkflowRunRequest::new("abc-123").with_mode(ResponseMode::Streaming);
    let stream = client_for(&server, 2)
        .run_workflow(&request, CancellationToken::new())
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    let chunks = drain(stream).await;

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].message.as_deref(), Some("status code: 503"));
    assert_eq!(chunks[0].status, Some(503));
}

#[tokio::test]
async fn transport_failure_yields_single_error_chunk() {
    // Bind then release a port so nothing is listening on it.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig::new(format!("http://{addr}"), "test-key")
        .with_max_retries(0)
        .with_timeout(Duration::from_secs(5));
    let client = DifyClient::new(config).unwrap();

    let stream = open_chat_stream(&client, CancellationToken::new()).await;
    let chunks = drain(stream).await;

    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].is_error());
    assert!(chunks[0].message.as_deref().unwrap().contains("request failed"));
}

#[tokio::test]
async fn cancellation_stops_delivery() {
    let server = MockServer::start().await;
    let body: String = (0..200)
        .map(|i| format!("data: {{\"event\":\"message\",\"answer\":\"{i}\"}}\n\n"))
        .collect();
    Mock::given(method("POST"))
        .and(path("/chat-messages"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let mut stream = open_chat_stream(&client_for(&server, 0), cancel.clone()).await;

    let first = stream.recv().await.unwrap();
    assert_eq!(first.answer.as_deref(), Some("0"));

    cancel.cancel();
    // At most the one chunk already handed off can still arrive.
    let rest = drain(stream).await;
    assert!(rest.len() <= 1, "received {} chunks after cancel", rest.len());
}

#[tokio::test]
async fn stream_cancel_method_leaves_caller_token_alone() {
    let server = MockServer::start().await;
    let body: String = (0..50)
        .map(|i| format!("data: {{\"event\":\"message\",\"answer\":\"{i}\"}}\n"))
        .collect();
    Mock::given(method("POST"))
        .and(path("/chat-messages"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let mut stream = open_chat_stream(&client_for(&server, 0), cancel.clone()).await;
    assert!(stream.recv().await.is_some());

    stream.cancel();
    let rest = drain(stream).await;
    assert!(rest.len() <= 1);
    assert!(!cancel.is_cancelled());
}

#[tokio::test]
async fn dropped_stream_does_not_block_client() {
    let server = MockServer::start().await;
    let body: String = (0..50)
        .map(|i| format!("data: {{\"event\":\"message\",\"answer\":\"{i}\"}}\n"))
        .collect();
    Mock::given(method("POST"))
        .and(path("/chat-messages"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let client = client_for(&server, 0);
    let mut stream = open_chat_stream(&client, CancellationToken::new()).await;
    assert!(stream.recv().await.is_some());
    drop(stream);

    // A fresh request on the same client still completes normally.
    let stream = open_chat_stream(&client, CancellationToken::new()).await;
    assert_eq!(drain(stream).await.len(), 50);
}

#[tokio::test]
async fn chunk_stream_is_a_futures_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion-messages"))
        .respond_with(event_stream(
            "data: {\"event\":\"message\",\"answer\":\"x\"}\n\
             data: {\"event\":\"message_end\",\"metadata\":{}}\n",
        ))
        .mount(&server)
        .await;

    let request = CompletionMessageRequest::new("abc-123")
        .with_input("query", "hi")
        .with_mode(ResponseMode::Streaming);
    let stream = client_for(&server, 0)
        .completion_messages(&request, CancellationToken::new())
        .await
        .unwrap()
        .into_stream()
        .unwrap();

    let events: Vec<ChunkEvent> = stream.map(|c| c.event).collect().await;
    assert_eq!(events, vec![ChunkEvent::Message, ChunkEvent::MessageEnd]);
}

#[tokio::test]
async fn body_read_failure_ends_stream_with_error_chunk() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = raw_client(&listener);
    tokio::spawn(async move {
        let mut socket = accept_request(&listener).await;
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: 4096\r\n\r\n\
                  data: {\"event\":\"message\",\"answer\":\"A\"}\n\n",
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Hanging up short of the declared length breaks the body.
        drop(socket);
    });

    let mut stream = open_chat_stream(&client, CancellationToken::new()).await;

    let first = recv(&mut stream).await.expect("message chunk");
    assert_eq!(first.event, ChunkEvent::Message);
    assert_eq!(first.answer.as_deref(), Some("A"));

    let second = recv(&mut stream).await.expect("error chunk");
    assert!(second.is_error(), "got {second:?}");

    assert!(recv(&mut stream).await.is_none());
}

#[tokio::test]
async fn dropping_stream_releases_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = raw_client(&listener);
    let (released_tx, released) = oneshot::channel();
    tokio::spawn(serve_until_disconnect(listener, released_tx));

    let mut stream = open_chat_stream(&client, CancellationToken::new()).await;
    assert!(stream.recv().await.is_some());
    drop(stream);

    tokio::time::timeout(Duration::from_secs(5), released)
        .await
        .expect("connection still open after drop")
        .unwrap();
}

#[tokio::test]
async fn cancelling_releases_connection_while_stream_is_held() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = raw_client(&listener);
    let (released_tx, released) = oneshot::channel();
    tokio::spawn(serve_until_disconnect(listener, released_tx));

    let cancel = CancellationToken::new();
    let mut stream = open_chat_stream(&client, cancel.clone()).await;
    assert!(stream.recv().await.is_some());
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), released)
        .await
        .expect("connection still open after cancel")
        .unwrap();
    // The stream is still alive here; only the token stopped the task.
    drop(stream);
}
