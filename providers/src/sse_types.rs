//! Typed payloads for the Chat Completions API.
//!
//! Parse errors happen at the serde boundary, not scattered through parsing logic.
//! Every field the client does not need is ignored, and every field it does need is
//! optional so partial or vendor-extended payloads still deserialize.

use serde::Deserialize;
use serde_json::Value;

/// One `data:` payload of a streamed response.
#[derive(Debug, Default, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkChoice {
    pub delta: Option<Delta>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
}

/// Body of a non-streaming response.
#[derive(Debug, Default, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompletionChoice {
    pub message: Option<CompletionMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompletionMessage {
    pub content: Option<String>,
}

/// In-band error object. Some gateways send these with a 200 status.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorInfo {
    /// Either an HTTP-like integer (`429`) or a string code.
    pub code: Option<Value>,
    #[serde(default)]
    pub message: String,
}

impl ErrorInfo {
    /// The status-like code, when the service provided a numeric one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self.code.as_ref()? {
            Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn message_or_default(&self) -> String {
        if self.message.trim().is_empty() {
            "unknown error".to_string()
        } else {
            self.message.clone()
        }
    }
}
