//! Client for OpenAI-compatible Chat Completions services.
//!
//! # Architecture
//!
//! - [`ApiConfig`] - endpoint, model, and credential for one service
//! - [`build_http_client`] - hardened `reqwest` client for that endpoint
//! - [`chat::stream_completion`] - streaming call; emits [`StreamEvent`]s on a channel
//! - [`chat::complete`] - single non-streaming call returning the full text
//!
//! # Streaming Events
//!
//! | Event | Description |
//! |-------|-------------|
//! | `TextDelta` | Incremental text content from the model |
//! | `Done` | Stream completed successfully |
//! | `Error` | Stream terminated with a classified [`CompletionError`] |
//!
//! # Error Handling
//!
//! Streaming failures (HTTP status, transport drops, malformed payloads, idle
//! timeouts) are delivered as a final `StreamEvent::Error` so partial output
//! already sent stays with the caller. There are no retries: one attempt per call.

pub mod chat;
pub mod sse_types;

use std::time::Duration;

pub(crate) use fintech_types::{CompletionError, StreamEvent};
pub(crate) use tokio::sync::mpsc;

use fintech_types::{ApiKey, ModelName};
use url::{Host, Url};

pub use fintech_types;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;

const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

const MAX_SSE_PARSE_ERRORS: usize = 3;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Build the HTTP client for `endpoint`.
///
/// HTTPS is mandatory except for loopback hosts (local gateways and test servers).
pub fn build_http_client(endpoint: &Url) -> Result<reqwest::Client, reqwest::Error> {
    use reqwest::header::{HeaderMap, HeaderValue};

    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        "X-Title",
        HeaderValue::from_static(concat!("fintech/", env!("CARGO_PKG_VERSION"))),
    );

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .https_only(!is_loopback(endpoint))
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers)
        .build()
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Endpoint, model, and credential for one completion service.
///
/// A missing key is allowed at construction; requests then fail with
/// [`CompletionError::MissingApiKey`] without touching the network.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    base_url: Url,
    model: ModelName,
    api_key: Option<ApiKey>,
    idle_timeout: Duration,
}

impl ApiConfig {
    #[must_use]
    pub fn new(base_url: Url, model: ModelName, api_key: Option<ApiKey>) -> Self {
        Self {
            base_url,
            model,
            api_key,
            idle_timeout: Duration::from_secs(DEFAULT_STREAM_IDLE_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn model(&self) -> &ModelName {
        &self.model
    }

    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_ref().map(ApiKey::expose_secret)
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// `{base_url}/chat/completions`, tolerant of a trailing slash on the base.
    #[must_use]
    pub fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.base_url.as_str().trim_end_matches('/')
        )
    }
}

// ========================================================================
// SSE framing
// ========================================================================

fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Joins the `data:` lines of one event. Comment lines (`: ...`) are ignored.
fn extract_sse_data(event: &str) -> Option<String> {
    let mut data: Option<String> = None;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(rest);
            }
            None => data = Some(rest.to_string()),
        }
    }

    data
}

#[derive(Debug)]
pub(crate) enum SseParseAction {
    Continue,
    Emit(Vec<StreamEvent>),
    Error(CompletionError),
}

pub(crate) trait SseParser {
    fn parse(&mut self, json: &serde_json::Value) -> SseParseAction;

    /// Whether an EOF without the `[DONE]` sentinel still counts as a clean finish.
    fn completed_at_eof(&self) -> bool {
        false
    }
}

pub(crate) async fn send_event(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

async fn fail(tx: &mpsc::Sender<StreamEvent>, error: CompletionError) {
    tracing::warn!(%error, "Completion stream failed");
    let _ = send_event(tx, StreamEvent::Error(error)).await;
}

/// Drive an SSE response to completion, forwarding parsed events to `tx`.
///
/// Exactly one terminal event (`Done` or `Error`) is sent unless the receiver
/// has gone away.
pub(crate) async fn process_sse_stream<P: SseParser>(
    response: reqwest::Response,
    parser: &mut P,
    tx: &mpsc::Sender<StreamEvent>,
    idle_timeout: Duration,
) {
    use futures_util::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut parse_errors = 0usize;

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            fail(tx, CompletionError::Transport("stream idle timeout".to_string())).await;
            return;
        };

        let Some(chunk) = next else { break };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                fail(tx, CompletionError::Transport(e.to_string())).await;
                return;
            }
        };
        buffer.extend_from_slice(&chunk);

        if buffer.len() > MAX_SSE_BUFFER_BYTES {
            fail(
                tx,
                CompletionError::Stream("SSE buffer exceeded maximum size (4 MiB)".to_string()),
            )
            .await;
            return;
        }

        while let Some(event) = drain_next_sse_event(&mut buffer) {
            if event.is_empty() {
                continue;
            }

            let Ok(event) = std::str::from_utf8(&event) else {
                fail(
                    tx,
                    CompletionError::Stream("received invalid UTF-8 from SSE stream".to_string()),
                )
                .await;
                return;
            };

            let Some(data) = extract_sse_data(event) else {
                continue;
            };

            if data == "[DONE]" {
                let _ = send_event(tx, StreamEvent::Done).await;
                return;
            }

            let json = match serde_json::from_str::<serde_json::Value>(&data) {
                Ok(json) => json,
                Err(e) => {
                    parse_errors = parse_errors.saturating_add(1);
                    tracing::warn!(%e, payload_bytes = data.len(), "Invalid SSE JSON payload");
                    if parse_errors >= MAX_SSE_PARSE_ERRORS {
                        fail(
                            tx,
                            CompletionError::Stream(format!("invalid stream payload: {e}")),
                        )
                        .await;
                        return;
                    }
                    continue;
                }
            };

            parse_errors = 0;
            match parser.parse(&json) {
                SseParseAction::Continue => {}
                SseParseAction::Emit(events) => {
                    for event in events {
                        let is_terminal = event.is_terminal();
                        if !send_event(tx, event).await || is_terminal {
                            return;
                        }
                    }
                }
                SseParseAction::Error(error) => {
                    fail(tx, error).await;
                    return;
                }
            }
        }
    }

    if parser.completed_at_eof() {
        let _ = send_event(tx, StreamEvent::Done).await;
        return;
    }

    fail(
        tx,
        CompletionError::Stream("connection closed before stream completed".to_string()),
    )
    .await;
}

pub(crate) async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Pull `error.message` (or a top-level `message`) out of a JSON error body.
fn extract_error_message(body: &str) -> Option<String> {
    let payload: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    payload
        .pointer("/error/message")
        .and_then(|value| value.as_str())
        .or_else(|| payload.pointer("/message").and_then(|value| value.as_str()))
        .map(ToString::to_string)
}

/// Turn a non-2xx response into a classified error; pass 2xx through.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, CompletionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = read_capped_error_body(response).await;
    let message = extract_error_message(&body).unwrap_or(body);
    Err(CompletionError::from_status(status.as_u16(), message))
}
