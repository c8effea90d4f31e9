//! Core domain types for the FinTech advisor.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod analysis;
mod error;
mod message;
mod proofs;
mod request;

pub use analysis::{
    ANALYSIS_SCHEMA_NAME, AnalysisValidationError, Recommendation, StructuredAnalysis,
    financial_analysis_schema,
};
pub use error::{CompletionError, FailureKind};
pub use message::{Role, Turn};
pub use proofs::{EmptyStringError, NonEmptyString};
pub use request::{CompletionRequest, RequestMode, ResponseSchema, SamplingParams, WireMessage};

use serde::{Deserialize, Serialize};

// ============================================================================
// Credentials & Model
// ============================================================================

/// Bearer credential for the completion service.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey(<redacted>)")
    }
}

impl ApiKey {
    /// Returns `None` for blank input so an unset variable behaves like a missing key.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

/// Model identifier understood by the completion service (e.g. `deepseek/deepseek-chat`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelName(NonEmptyString);

impl ModelName {
    pub const DEFAULT: &'static str = "deepseek/deepseek-chat";

    pub fn parse(raw: &str) -> Result<Self, EmptyStringError> {
        Ok(Self(NonEmptyString::new(raw.trim())?))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for ModelName {
    fn default() -> Self {
        Self(NonEmptyString::from_static(Self::DEFAULT))
    }
}

impl TryFrom<String> for ModelName {
    type Error = EmptyStringError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ModelName> for String {
    fn from(value: ModelName) -> Self {
        value.0.into_inner()
    }
}

impl std::fmt::Display for ModelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Events emitted by the provider layer while a response streams in.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental text content.
    TextDelta(String),
    /// Stream completed normally.
    Done,
    /// Stream terminated with a failure. Always the last event.
    Error(CompletionError),
}

impl StreamEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }
}
