//! Uniform provider interface over heterogeneous model backends.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// The closed set of backends this engine knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Gemini,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "open_ai" | "openai_compatible" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            _ => Err(format!(
                "invalid provider '{}', expected one of: anthropic, openai, gemini",
                s
            )),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

/// Capability tier of a configured model. Ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Economy,
    Standard,
    Premium,
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "economy" | "cheap" | "small" => Ok(Self::Economy),
            "standard" | "medium" => Ok(Self::Standard),
            "premium" | "large" => Ok(Self::Premium),
            _ => Err(format!(
                "invalid model tier '{}', expected one of: economy, standard, premium",
                s
            )),
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Economy => write!(f, "economy"),
            Self::Standard => write!(f, "standard"),
            Self::Premium => write!(f, "premium"),
        }
    }
}

/// A single generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Model to invoke on the backend.
    pub model: String,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: 1024,
            temperature: 0.3,
            model: model.into(),
        }
    }

    /// Set max tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Text plus token accounting returned by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Trait for model backends.
///
/// Implementations translate [`GenerateRequest`] into their own wire format
/// and normalize every backend failure into [`LlmError`], so the retry and
/// routing layers never see provider-specific errors.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable identifier used for breaker/limiter state and metrics.
    fn id(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Default model for this provider instance.
    fn model_name(&self) -> &str;

    /// Get cost per token (input, output) in USD.
    fn cost_per_token(&self) -> (Decimal, Decimal);

    /// Run a single generation. No retries happen at this layer.
    async fn generate(&self, request: GenerateRequest) -> Result<Generation, LlmError>;

    /// Calculate cost for a completion.
    fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> Decimal {
        let (input_cost, output_cost) = self.cost_per_token();
        input_cost * Decimal::from(input_tokens) + output_cost * Decimal::from(output_tokens)
    }

    /// Blended price used to rank providers by cheapness.
    fn blended_cost(&self) -> Decimal {
        let (input_cost, output_cost) = self.cost_per_token();
        input_cost + output_cost
    }
}
