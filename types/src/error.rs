//! Completion failure taxonomy.

use thiserror::Error;

/// Coarse classification used to pick user-facing fallback text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    RateLimited,
    Unauthorized,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("no API key configured")]
    MissingApiKey,
    #[error("rate limited: {message}")]
    RateLimited { message: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("stream failed: {0}")]
    Stream(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl CompletionError {
    /// Classify an HTTP (or in-band) status code: 429 and 401 get their own variants.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => CompletionError::RateLimited { message },
            401 => CompletionError::Unauthorized { message },
            _ => CompletionError::Api { status, message },
        }
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            CompletionError::RateLimited { .. } => FailureKind::RateLimited,
            CompletionError::MissingApiKey | CompletionError::Unauthorized { .. } => {
                FailureKind::Unauthorized
            }
            CompletionError::Api { .. }
            | CompletionError::Transport(_)
            | CompletionError::Stream(_)
            | CompletionError::MalformedResponse(_) => FailureKind::Other,
        }
    }
}
