use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_optional_env, parse_secs_env, parse_string_env};
use crate::error::ConfigError;
use crate::llm::provider::{ModelTier, ProviderKind};

/// One configured backend.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Identifier used for breaker/limiter state and metrics.
    pub id: String,
    pub api_key: SecretString,
    pub model: String,
    /// Optional base URL override (proxies, OpenAI-compatible servers).
    pub base_url: Option<String>,
    pub tier: ModelTier,
    /// Lower is preferred within a tier.
    pub priority: u32,
}

impl ProviderKind {
    /// Env var holding the API key for this backend.
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GOOGLE_API_KEY",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC",
            Self::OpenAi => "OPENAI",
            Self::Gemini => "GEMINI",
        }
    }

    /// (model, tier, priority) used when nothing is configured.
    fn defaults(&self) -> (&'static str, ModelTier, u32) {
        match self {
            Self::Anthropic => ("claude-3-5-sonnet-latest", ModelTier::Premium, 0),
            Self::OpenAi => ("gpt-4o-mini", ModelTier::Standard, 1),
            Self::Gemini => ("gemini-2.0-flash", ModelTier::Economy, 2),
        }
    }
}

/// Backend credentials and HTTP client settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Backends with credentials present, in no particular order.
    pub providers: Vec<ProviderConfig>,
    pub connect_timeout: Duration,
    /// Whole-request timeout for a single provider call.
    pub request_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl LlmConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut providers = Vec::new();
        for kind in [ProviderKind::Anthropic, ProviderKind::OpenAi, ProviderKind::Gemini] {
            if let Some(provider) = resolve_provider(kind)? {
                providers.push(provider);
            }
        }

        Ok(Self {
            providers,
            connect_timeout: parse_secs_env("LLM_CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
            request_timeout: parse_secs_env("LLM_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
        })
    }
}

fn resolve_provider(kind: ProviderKind) -> Result<Option<ProviderConfig>, ConfigError> {
    let key_var = kind.api_key_env_var();
    // Gemini also accepts its own name for the key.
    let api_key = match optional_env(key_var)? {
        Some(k) => Some(k),
        None if kind == ProviderKind::Gemini => optional_env("GEMINI_API_KEY")?,
        None => None,
    };
    let Some(api_key) = api_key else {
        return Ok(None);
    };

    let prefix = kind.env_prefix();
    let (model, tier, priority) = kind.defaults();
    Ok(Some(ProviderConfig {
        kind,
        id: parse_string_env(&format!("{prefix}_PROVIDER_ID"), &kind.to_string())?,
        api_key: SecretString::from(api_key),
        model: parse_string_env(&format!("{prefix}_MODEL"), model)?,
        base_url: optional_env(&format!("{prefix}_BASE_URL"))?,
        tier: parse_optional_env(&format!("{prefix}_TIER"), tier)?,
        priority: parse_optional_env(&format!("{prefix}_PRIORITY"), priority)?,
    }))
}
