use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
}

/// Per-collaborator request timeouts. Every outbound call carries one; nothing
/// blocks indefinitely.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeouts {
    pub caption: Duration,
    pub chat: Duration,
    pub render: Duration,
    pub transcribe: Duration,
    pub transport: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            caption: Duration::from_secs(120),
            chat: Duration::from_secs(60),
            render: Duration::from_secs(300),
            transcribe: Duration::from_secs(120),
            transport: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the AI backend (captioning, chat, rendering, transcription).
    pub api_url: String,
    pub telegram_token: String,
    pub port: u16,
    /// Checked against `X-Telegram-Bot-Api-Secret-Token` when set.
    pub webhook_secret: Option<String>,
    /// Public base URL; when set the webhook is registered on start.
    pub public_url: Option<String>,
    pub chat_max_tokens: u32,
    pub transcribe_language: String,
    pub timeouts: Timeouts,
    pub model_mlsd: Option<String>,
    pub model_hed: Option<String>,
    pub model_none: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let secs = |key: &str, default: Duration| {
            non_empty(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let api_url = non_empty("API_URL").ok_or(ConfigError::Missing("API_URL"))?;
        let telegram_token = non_empty("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;
        let defaults = Timeouts::default();

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            telegram_token,
            port: non_empty("PORT").and_then(|v| v.parse().ok()).unwrap_or(8080),
            webhook_secret: non_empty("WEBHOOK_SECRET"),
            public_url: non_empty("PUBLIC_URL").map(|v| v.trim_end_matches('/').to_string()),
            chat_max_tokens: non_empty("CHAT_MAX_TOKENS").and_then(|v| v.parse().ok()).unwrap_or(150),
            transcribe_language: non_empty("TRANSCRIBE_LANGUAGE").unwrap_or_else(|| "en".to_string()),
            timeouts: Timeouts {
                caption: secs("CAPTION_TIMEOUT_SECS", defaults.caption),
                chat: secs("CHAT_TIMEOUT_SECS", defaults.chat),
                render: secs("RENDER_TIMEOUT_SECS", defaults.render),
                transcribe: secs("TRANSCRIBE_TIMEOUT_SECS", defaults.transcribe),
                transport: secs("TRANSPORT_TIMEOUT_SECS", defaults.transport),
            },
            model_mlsd: non_empty("CONTROLNET_MODEL_MLSD"),
            model_hed: non_empty("CONTROLNET_MODEL_HED"),
            model_none: non_empty("CONTROLNET_MODEL_NONE"),
        })
    }
}
