//! Configuration for the FinTech advisor.
//!
//! The file lives at `~/.fintech/config.toml`. Every section is optional:
//!
//! ```toml
//! [api]
//! base_url = "https://openrouter.ai/api/v1"
//! model = "deepseek/deepseek-chat"
//! api_key = "${OPENROUTER_API_KEY}"
//!
//! [chat]
//! history_window = 10
//! analysis_window = 5
//! send_policy = "reject"
//!
//! [stream]
//! idle_timeout_secs = 60
//! ```
//!
//! [`FintechConfig`] mirrors the file; [`Settings`] is the fully resolved view
//! with defaults, environment fallbacks, and validation applied.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use fintech_types::{ApiKey, ModelName, RequestMode};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Checked in order when the config file does not provide a key.
pub const API_KEY_ENV_VARS: &[&str] = &["FINTECH_API_KEY", "OPENROUTER_API_KEY", "OPENAI_API_KEY"];
pub const IDLE_TIMEOUT_ENV_VAR: &str = "FINTECH_STREAM_IDLE_TIMEOUT_SECS";

#[derive(Debug, Default, Deserialize)]
pub struct FintechConfig {
    pub api: Option<ApiConfigSection>,
    pub chat: Option<ChatConfigSection>,
    pub stream: Option<StreamConfigSection>,
}

#[derive(Default, Deserialize)]
pub struct ApiConfigSection {
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// May reference environment variables as `${NAME}`.
    pub api_key: Option<String>,
}

// Manual Debug impl to prevent leaking API keys in logs.
impl std::fmt::Debug for ApiConfigSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfigSection")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field(
                "api_key",
                &if self.api_key.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatConfigSection {
    pub history_window: Option<usize>,
    pub analysis_window: Option<usize>,
    #[serde(default)]
    pub send_policy: SendPolicy,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamConfigSection {
    pub idle_timeout_secs: Option<u64>,
}

/// What a session does when a new send arrives while a stream is still running.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SendPolicy {
    /// Refuse the new send until the in-flight one resolves.
    #[default]
    Reject,
    /// Abort the in-flight stream and proceed with the new send.
    CancelPrevious,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::Invalid { .. } => None,
        }
    }
}

/// Resolved configuration handed to the application at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: Url,
    pub model: ModelName,
    /// Absent keys are allowed; requests then fail as unauthorized.
    pub api_key: Option<ApiKey>,
    pub history_window: usize,
    pub analysis_window: usize,
    pub send_policy: SendPolicy,
    pub idle_timeout: Duration,
}

impl FintechConfig {
    /// Load from the default location. `Ok(None)` when no file exists.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve using `lookup` for every environment access.
    pub fn resolve_with<F>(&self, lookup: F) -> Result<Settings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api = self.api.as_ref();

        let base_url = api
            .and_then(|api| api.base_url.as_deref())
            .map_or_else(
                || DEFAULT_BASE_URL.to_string(),
                |raw| expand_env_vars_with(raw, &lookup),
            );
        let base_url = Url::parse(base_url.trim()).map_err(|e| ConfigError::Invalid {
            field: "api.base_url",
            reason: e.to_string(),
        })?;

        let model = match api.and_then(|api| api.model.as_deref()) {
            Some(raw) => ModelName::parse(&expand_env_vars_with(raw, &lookup)).map_err(|e| {
                ConfigError::Invalid {
                    field: "api.model",
                    reason: e.to_string(),
                }
            })?,
            None => ModelName::default(),
        };

        let api_key = api
            .and_then(|api| api.api_key.as_deref())
            .and_then(|raw| ApiKey::new(expand_env_vars_with(raw, &lookup)))
            .or_else(|| {
                API_KEY_ENV_VARS
                    .iter()
                    .find_map(|name| lookup(name).and_then(ApiKey::new))
            });
        if api_key.is_none() {
            tracing::warn!("No API key configured; completions will fail as unauthorized");
        }

        let mut history_window = RequestMode::Chat.default_window();
        let mut analysis_window = RequestMode::Analysis.default_window();
        let mut send_policy = SendPolicy::default();
        if let Some(chat) = &self.chat {
            if let Some(window) = chat.history_window {
                history_window = positive_window("chat.history_window", window)?;
            }
            if let Some(window) = chat.analysis_window {
                analysis_window = positive_window("chat.analysis_window", window)?;
            }
            send_policy = chat.send_policy;
        }

        let file_timeout = self.stream.as_ref().and_then(|s| s.idle_timeout_secs);
        let env_timeout = lookup(IDLE_TIMEOUT_ENV_VAR).and_then(|v| v.trim().parse::<u64>().ok());
        let idle_timeout_secs = env_timeout
            .or(file_timeout)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);

        Ok(Settings {
            base_url,
            model,
            api_key,
            history_window,
            analysis_window,
            send_policy,
            idle_timeout: Duration::from_secs(idle_timeout_secs),
        })
    }
}

fn positive_window(field: &'static str, window: usize) -> Result<usize, ConfigError> {
    if window == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "window must be at least 1".to_string(),
        });
    }
    Ok(window)
}

/// Replace `${NAME}` with `lookup(NAME)` (empty when unset). An unclosed
/// `${` and the literal `${}` are kept as written.
pub fn expand_env_vars_with<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let name = &after[..end];
        out.push_str(&rest[..start]);
        if name.is_empty() {
            out.push_str("${}");
        } else {
            out.push_str(&lookup(name).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".fintech").join("config.toml"))
}
