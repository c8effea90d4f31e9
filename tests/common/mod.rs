//! Shared test utilities and fixtures
//!
//! A `wiremock` server stands in for the Chat Completions endpoint.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fintech_engine::{
    ApiConfig, ApiKey, ChatSession, CompletionGateway, GatewayConfig, ModelName, SendPolicy,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_KEY: &str = "sk-test-key";
pub const COMPLETIONS_PATH: &str = "/api/v1/chat/completions";

pub async fn start_mock() -> MockServer {
    MockServer::start().await
}

pub fn api_config(server: &MockServer, key: Option<&str>) -> ApiConfig {
    let base_url = format!("{}/api/v1", server.uri())
        .parse()
        .expect("mock server URI is a valid URL");
    ApiConfig::new(base_url, ModelName::default(), key.and_then(ApiKey::new))
        .with_idle_timeout(Duration::from_secs(5))
}

pub fn gateway(server: &MockServer) -> CompletionGateway {
    CompletionGateway::new(GatewayConfig::new(api_config(server, Some(TEST_KEY))))
        .expect("gateway builds")
}

pub fn keyless_gateway(server: &MockServer) -> CompletionGateway {
    CompletionGateway::new(GatewayConfig::new(api_config(server, None))).expect("gateway builds")
}

pub fn session(server: &MockServer, policy: SendPolicy) -> ChatSession {
    ChatSession::new(Arc::new(gateway(server)), policy)
}

fn completions() -> wiremock::MockBuilder {
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .and(header("authorization", format!("Bearer {TEST_KEY}").as_str()))
}

pub fn completion_body(content: &str) -> Value {
    json!({
        "id": "gen-test",
        "object": "chat.completion",
        "model": "deepseek/deepseek-chat",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30 }
    })
}

pub fn chunk(content: &str) -> Value {
    json!({
        "id": "gen-test",
        "object": "chat.completion.chunk",
        "choices": [{ "index": 0, "delta": { "content": content }, "finish_reason": null }]
    })
}

/// SSE body of text deltas, optionally closed with `data: [DONE]`.
pub fn sse_body(chunks: &[&str], done: bool) -> String {
    let mut body = String::from(": OPENROUTER PROCESSING\n\n");
    body.push_str(&format!(
        "data: {}\n\n",
        json!({ "choices": [{ "index": 0, "delta": { "role": "assistant" } }] })
    ));
    for content in chunks {
        body.push_str(&format!("data: {}\n\n", chunk(content)));
    }
    if done {
        body.push_str("data: [DONE]\n\n");
    }
    body
}

fn sse_response(body: impl Into<Vec<u8>>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into(), "text/event-stream")
}

/// Non-streaming reply with `content`.
pub async fn mount_completion(server: &MockServer, content: &str) {
    completions()
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(content)))
        .mount(server)
        .await;
}

/// Single-use non-streaming reply, for scripting a sequence of turns.
pub async fn mount_completion_once(server: &MockServer, content: &str) {
    completions()
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(content)))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

/// Streaming reply made of `chunks`, terminated by `[DONE]`.
pub async fn mount_stream(server: &MockServer, chunks: &[&str]) {
    mount_stream_body(server, sse_body(chunks, true)).await;
}

pub async fn mount_stream_body(server: &MockServer, body: String) {
    completions()
        .respond_with(sse_response(body))
        .mount(server)
        .await;
}

/// Streaming reply with a raw byte body, for framing that is not valid text.
pub async fn mount_stream_bytes(server: &MockServer, body: Vec<u8>) {
    completions()
        .respond_with(sse_response(body))
        .mount(server)
        .await;
}

/// Streaming reply that only starts after `delay`.
pub async fn mount_delayed_stream(server: &MockServer, chunks: &[&str], delay: Duration) {
    completions()
        .respond_with(sse_response(sse_body(chunks, true)).set_delay(delay))
        .mount(server)
        .await;
}

/// Error status with an OpenAI-style JSON error body.
pub async fn mount_status(server: &MockServer, status: u16, message: &str) {
    completions()
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({
            "error": { "message": message, "code": status }
        })))
        .mount(server)
        .await;
}

/// Plain TCP server that answers one request with a chunked SSE response
/// carrying `events`, then keeps the connection open without sending more.
/// Returns the API base URL to point a client at.
pub async fn start_stalling_server(events: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener address");
    let events = events.to_string();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = vec![0u8; 64 * 1024];
        let _ = socket.read(&mut request).await;

        let head = "HTTP/1.1 200 OK\r\n\
                    content-type: text/event-stream\r\n\
                    transfer-encoding: chunked\r\n\r\n";
        let chunk = format!("{:x}\r\n{events}\r\n", events.len());
        let _ = socket.write_all(head.as_bytes()).await;
        let _ = socket.write_all(chunk.as_bytes()).await;
        let _ = socket.flush().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    format!("http://{addr}/api/v1")
}

/// Gateway against `base_url` with a short stream idle timeout.
pub fn gateway_with_idle_timeout(base_url: &str, idle_timeout: Duration) -> CompletionGateway {
    let api = ApiConfig::new(
        base_url.parse().expect("valid base URL"),
        ModelName::default(),
        ApiKey::new(TEST_KEY),
    )
    .with_idle_timeout(idle_timeout);
    CompletionGateway::new(GatewayConfig::new(api)).expect("gateway builds")
}

/// Any request at all fails the test when the server is dropped.
pub async fn expect_no_requests(server: &MockServer) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(server)
        .await;
}

/// JSON bodies of every request the server has seen, oldest first.
pub async fn request_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| serde_json::from_slice(&request.body).expect("request body is JSON"))
        .collect()
}

pub fn message_contents(body: &Value) -> Vec<(String, String)> {
    body["messages"]
        .as_array()
        .expect("messages array")
        .iter()
        .map(|m| {
            (
                m["role"].as_str().unwrap_or_default().to_string(),
                m["content"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}
