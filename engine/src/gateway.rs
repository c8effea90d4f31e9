//! Completion gateway: request construction plus the three call styles.
//!
//! The gateway never touches a conversation and never produces user-facing
//! text. Every failure comes back as a classified [`CompletionError`].

use futures_util::future::{AbortRegistration, Abortable, Aborted, join};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use fintech_config::Settings;
use fintech_providers::{ApiConfig, build_http_client, chat};
use fintech_types::{
    CompletionError, CompletionRequest, RequestMode, StreamEvent, StructuredAnalysis, Turn,
    financial_analysis_schema,
};

use crate::prompts;

const STREAM_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Everything the gateway needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api: ApiConfig,
    pub history_window: usize,
    pub analysis_window: usize,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(api: ApiConfig) -> Self {
        Self {
            api,
            history_window: RequestMode::Chat.default_window(),
            analysis_window: RequestMode::Analysis.default_window(),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let api = ApiConfig::new(
            settings.base_url.clone(),
            settings.model.clone(),
            settings.api_key.clone(),
        )
        .with_idle_timeout(settings.idle_timeout);
        Self {
            api,
            history_window: settings.history_window,
            analysis_window: settings.analysis_window,
        }
    }

    #[must_use]
    pub fn window(&self, mode: RequestMode) -> usize {
        match mode {
            RequestMode::Chat => self.history_window,
            RequestMode::Analysis => self.analysis_window,
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to build HTTP client: {0}")]
pub struct GatewayInitError(#[from] reqwest::Error);

/// Why a stream ended without a complete response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStop {
    Failed(CompletionError),
    Cancelled,
}

#[derive(Debug)]
pub struct CompletionGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl CompletionGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayInitError> {
        let client = build_http_client(config.api.base_url())?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Builds the request for `mode` without sending it.
    ///
    /// Only the last `window(mode)` non-system turns of `history` are kept.
    #[must_use]
    pub fn build_request(
        &self,
        mode: RequestMode,
        user_message: &str,
        history: &[Turn],
    ) -> CompletionRequest {
        let history = last_turns(history, self.config.window(mode));
        tracing::debug!(
            mode = mode.as_str(),
            history_turns = history.len(),
            "Building completion request"
        );
        match mode {
            RequestMode::Chat => CompletionRequest::new(
                prompts::system_prompt(),
                history,
                user_message,
                mode.sampling(),
            ),
            RequestMode::Analysis => CompletionRequest::new(
                prompts::analysis_prompt(),
                history,
                user_message,
                mode.sampling(),
            )
            .with_schema(financial_analysis_schema()),
        }
    }

    pub async fn complete_once(
        &self,
        user_message: &str,
        history: &[Turn],
    ) -> Result<String, CompletionError> {
        let request = self.build_request(RequestMode::Chat, user_message, history);
        let result = chat::complete(&self.client, &self.config.api, &request).await;
        if let Err(error) = &result {
            tracing::warn!(%error, kind = ?error.kind(), "Completion failed");
        }
        result
    }

    /// Streams a chat reply, calling `on_fragment` for each non-empty delta in
    /// arrival order.
    ///
    /// Fragments delivered before a failure or cancellation are not taken back.
    pub async fn complete_streaming<F>(
        &self,
        user_message: &str,
        history: &[Turn],
        mut on_fragment: F,
        cancel: AbortRegistration,
    ) -> Result<String, StreamStop>
    where
        F: FnMut(&str),
    {
        let request = self.build_request(RequestMode::Chat, user_message, history);
        let (tx, mut rx) = mpsc::channel(STREAM_EVENT_CHANNEL_CAPACITY);

        let producer = chat::stream_completion(&self.client, &self.config.api, &request, tx);
        let consumer = async move {
            let mut text = String::new();
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::TextDelta(delta) => {
                        on_fragment(&delta);
                        text.push_str(&delta);
                    }
                    StreamEvent::Done => return Ok(text),
                    StreamEvent::Error(error) => return Err(StreamStop::Failed(error)),
                }
            }
            Err(StreamStop::Failed(CompletionError::Stream(
                "stream ended without a terminal event".to_string(),
            )))
        };

        let work = async {
            let ((), outcome) = join(producer, consumer).await;
            outcome
        };

        match Abortable::new(work, cancel).await {
            Ok(Ok(text)) => {
                tracing::info!(bytes = text.len(), "Stream completed");
                Ok(text)
            }
            Ok(Err(stop)) => {
                if let StreamStop::Failed(error) = &stop {
                    tracing::warn!(%error, kind = ?error.kind(), "Stream failed");
                }
                Err(stop)
            }
            Err(Aborted) => {
                tracing::info!("Stream cancelled");
                Err(StreamStop::Cancelled)
            }
        }
    }

    /// Requests a schema-constrained analysis and validates it on arrival.
    pub async fn complete_structured(
        &self,
        user_message: &str,
        history: &[Turn],
    ) -> Result<StructuredAnalysis, CompletionError> {
        let request = self.build_request(RequestMode::Analysis, user_message, history);
        let result = match chat::complete(&self.client, &self.config.api, &request).await {
            Ok(raw) => parse_analysis(&raw),
            Err(error) => Err(error),
        };
        if let Err(error) = &result {
            tracing::warn!(%error, kind = ?error.kind(), "Structured analysis failed");
        }
        result
    }
}

fn last_turns(history: &[Turn], window: usize) -> Vec<Turn> {
    let eligible: Vec<&Turn> = history.iter().filter(|turn| !turn.is_system()).collect();
    let start = eligible.len().saturating_sub(window);
    eligible[start..].iter().map(|turn| (*turn).clone()).collect()
}

/// Schema check, then serde, then the non-blank field rules.
pub(crate) fn parse_analysis(raw: &str) -> Result<StructuredAnalysis, CompletionError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| CompletionError::MalformedResponse(format!("analysis is not JSON: {e}")))?;

    let schema = financial_analysis_schema();
    let validator = jsonschema::validator_for(&schema.schema).map_err(|e| {
        CompletionError::MalformedResponse(format!("invalid analysis schema: {e}"))
    })?;
    if let Err(err) = validator.validate(&value) {
        return Err(CompletionError::MalformedResponse(err.to_string()));
    }

    let analysis: StructuredAnalysis = serde_json::from_value(value)
        .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;
    analysis
        .validate()
        .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;
    Ok(analysis)
}

/// Some models wrap JSON output in a Markdown fence despite `response_format`.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
