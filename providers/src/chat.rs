use serde_json::{Value, json};

use fintech_types::CompletionRequest;

use crate::sse_types::{self as typed};
use crate::{
    ApiConfig, CompletionError, SseParseAction, SseParser, StreamEvent, check_status, mpsc,
    process_sse_stream, send_event,
};

// ========================================================================
// Chat Completions SSE Parser
// ========================================================================

#[derive(Default)]
struct ChatParser {
    /// A choice reported `finish_reason`; EOF after this is a clean end.
    finished: bool,
}

impl SseParser for ChatParser {
    fn parse(&mut self, json: &Value) -> SseParseAction {
        let chunk: typed::Chunk = match serde_json::from_value(json.clone()) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!("Failed to parse chat completion chunk: {e}");
                return SseParseAction::Continue;
            }
        };

        if let Some(error) = chunk.error {
            return SseParseAction::Error(in_band_error(&error));
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.and_then(|delta| delta.content)
                && !content.is_empty()
            {
                events.push(StreamEvent::TextDelta(content));
            }
            if choice.finish_reason.is_some() {
                self.finished = true;
            }
        }

        if events.is_empty() {
            SseParseAction::Continue
        } else {
            SseParseAction::Emit(events)
        }
    }

    fn completed_at_eof(&self) -> bool {
        self.finished
    }
}

fn in_band_error(error: &typed::ErrorInfo) -> CompletionError {
    let message = error.message_or_default();
    match error.status() {
        Some(status) => CompletionError::from_status(status, message),
        None => CompletionError::Stream(message),
    }
}

/// Request body in Chat Completions shape.
///
/// `stream` is only present for streaming calls; `top_p` and `response_format`
/// only when the request carries them.
pub(crate) fn build_request_body(
    config: &ApiConfig,
    request: &CompletionRequest,
    stream: bool,
) -> Value {
    let sampling = request.sampling();

    let mut body = serde_json::Map::new();
    body.insert("model".to_string(), json!(config.model().as_str()));
    body.insert("messages".to_string(), json!(request.messages()));
    body.insert("temperature".to_string(), json!(sampling.temperature));
    body.insert("max_tokens".to_string(), json!(sampling.max_tokens));

    if let Some(top_p) = sampling.top_p {
        body.insert("top_p".to_string(), json!(top_p));
    }

    if stream {
        body.insert("stream".to_string(), json!(true));
    }

    if let Some(schema) = request.schema() {
        body.insert(
            "response_format".to_string(),
            json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                },
            }),
        );
    }

    Value::Object(body)
}

async fn post(
    client: &reqwest::Client,
    config: &ApiConfig,
    body: &Value,
) -> Result<reqwest::Response, CompletionError> {
    let Some(api_key) = config.api_key() else {
        return Err(CompletionError::MissingApiKey);
    };

    let response = client
        .post(config.completions_url())
        .bearer_auth(api_key)
        .header("content-type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| CompletionError::Transport(e.to_string()))?;

    check_status(response).await
}

/// Stream a completion, forwarding text deltas to `tx`.
///
/// Every outcome, including setup failures, arrives on `tx` as a terminal
/// `Done` or `Error` event.
pub async fn stream_completion(
    client: &reqwest::Client,
    config: &ApiConfig,
    request: &CompletionRequest,
    tx: mpsc::Sender<StreamEvent>,
) {
    let body = build_request_body(config, request, true);
    tracing::debug!(
        model = %config.model(),
        messages = request.history().len() + 2,
        "Opening completion stream"
    );

    let response = match post(client, config, &body).await {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(%error, "Completion stream request failed");
            let _ = send_event(&tx, StreamEvent::Error(error)).await;
            return;
        }
    };

    let mut parser = ChatParser::default();
    process_sse_stream(response, &mut parser, &tx, config.idle_timeout()).await;
}

/// Single non-streaming completion. Returns the first choice's text.
pub async fn complete(
    client: &reqwest::Client,
    config: &ApiConfig,
    request: &CompletionRequest,
) -> Result<String, CompletionError> {
    let body = build_request_body(config, request, false);
    tracing::debug!(
        model = %config.model(),
        messages = request.history().len() + 2,
        structured = request.schema().is_some(),
        "Sending completion request"
    );

    let response = post(client, config, &body).await?;
    let completion: typed::Completion = response
        .json()
        .await
        .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;

    if let Some(error) = completion.error {
        return Err(in_band_error(&error));
    }

    completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or_else(|| CompletionError::MalformedResponse("response has no content".to_string()))
}
