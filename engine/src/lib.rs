//! Orchestration for the FinTech advisor.
//!
//! - [`CompletionGateway`] builds requests and talks to the completion service.
//! - [`ChatSession`] owns a conversation and decides what gets committed to it.
//! - [`fallback`] holds every piece of user-facing failure text.

pub mod fallback;
mod gateway;
mod prompts;
mod session;
mod topics;

pub use gateway::{CompletionGateway, GatewayConfig, GatewayInitError, StreamStop};
pub use prompts::{analysis_prompt, system_prompt};
pub use session::{ChatSession, Reply, ReplyOutcome, SendError};
pub use topics::{SUGGESTED_TOPICS, SuggestedTopic, find_topic};

pub use fintech_config::{ConfigError, FintechConfig, SendPolicy, Settings, config_path};
pub use fintech_context::Conversation;
pub use fintech_providers::ApiConfig;
pub use fintech_types::{
    ApiKey, CompletionError, FailureKind, ModelName, Recommendation, RequestMode,
    StructuredAnalysis, Turn,
};
pub use futures_util::future::{AbortHandle, AbortRegistration};
