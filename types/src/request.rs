//! Completion request model.
//!
//! A `CompletionRequest` is built fresh for every call and never mutated afterwards.

use serde::Serialize;
use serde_json::Value;

use crate::message::{Role, Turn};

/// Sampling knobs sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: Option<f64>,
}

impl SamplingParams {
    pub const CHAT: Self = Self {
        temperature: 0.7,
        max_tokens: 1000,
        top_p: Some(0.9),
    };

    pub const ANALYSIS: Self = Self {
        temperature: 0.6,
        max_tokens: 800,
        top_p: None,
    };
}

/// Which flavor of request is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMode {
    /// Free-form chat, streamed or not.
    Chat,
    /// Schema-constrained structured analysis.
    Analysis,
}

impl RequestMode {
    /// Number of prior turns forwarded as context.
    #[must_use]
    pub const fn default_window(self) -> usize {
        match self {
            RequestMode::Chat => 10,
            RequestMode::Analysis => 5,
        }
    }

    #[must_use]
    pub const fn sampling(self) -> SamplingParams {
        match self {
            RequestMode::Chat => SamplingParams::CHAT,
            RequestMode::Analysis => SamplingParams::ANALYSIS,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RequestMode::Chat => "chat",
            RequestMode::Analysis => "analysis",
        }
    }
}

/// Named JSON schema declared as the request's `response_format`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

/// One entry of the wire-level `messages` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WireMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    system_prompt: String,
    history: Vec<Turn>,
    new_message: String,
    sampling: SamplingParams,
    schema: Option<ResponseSchema>,
}

impl CompletionRequest {
    /// System turns in `history` are dropped; the system prompt is the only system message.
    #[must_use]
    pub fn new(
        system_prompt: impl Into<String>,
        history: Vec<Turn>,
        new_message: impl Into<String>,
        sampling: SamplingParams,
    ) -> Self {
        let history = history.into_iter().filter(|turn| !turn.is_system()).collect();
        Self {
            system_prompt: system_prompt.into(),
            history,
            new_message: new_message.into(),
            sampling,
            schema: None,
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    #[must_use]
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    #[must_use]
    pub fn new_message(&self) -> &str {
        &self.new_message
    }

    #[must_use]
    pub fn sampling(&self) -> SamplingParams {
        self.sampling
    }

    #[must_use]
    pub fn schema(&self) -> Option<&ResponseSchema> {
        self.schema.as_ref()
    }

    /// Full message list: system prompt, then history, then the new user message.
    #[must_use]
    pub fn messages(&self) -> Vec<WireMessage<'_>> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(WireMessage {
            role: Role::System.as_str(),
            content: &self.system_prompt,
        });
        messages.extend(self.history.iter().map(|turn| WireMessage {
            role: turn.role().as_str(),
            content: turn.content(),
        }));
        messages.push(WireMessage {
            role: Role::User.as_str(),
            content: &self.new_message,
        });
        messages
    }
}
