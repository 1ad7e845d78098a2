use std::collections::HashMap;

use crate::config::helpers::{invalid, parse_bool_env, parse_optional_env};
use crate::error::ConfigError;
use crate::llm::request::OperationType;

/// Generation parameters for one operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl OperationType {
    fn default_params(&self) -> GenerationParams {
        match self {
            Self::IntentDetection => GenerationParams {
                max_tokens: 256,
                temperature: 0.0,
            },
            Self::TaskAnalysis => GenerationParams {
                max_tokens: 1024,
                temperature: 0.3,
            },
            Self::ScheduleOptimization => GenerationParams {
                max_tokens: 2048,
                temperature: 0.2,
            },
            Self::DailyBriefing => GenerationParams {
                max_tokens: 1024,
                temperature: 0.5,
            },
        }
    }

    /// Upper-case env var stem, e.g. `INTENT_DETECTION`.
    pub(crate) fn env_stem(&self) -> String {
        self.as_str().to_uppercase()
    }
}

/// Routing behaviour.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Complexity-based routing. When off, the selected provider is used
    /// first regardless of complexity.
    pub enabled: bool,
    /// Prompts longer than this (in chars) are rejected as invalid.
    pub max_prompt_chars: usize,
    /// Prompts at least this long count as a complexity signal.
    pub complex_min_chars: usize,
    pub params: HashMap<OperationType, GenerationParams>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_prompt_chars: 32_000,
            complex_min_chars: 600,
            params: OperationType::ALL
                .iter()
                .map(|op| (*op, op.default_params()))
                .collect(),
        }
    }
}

impl RoutingConfig {
    pub fn params_for(&self, operation: OperationType) -> GenerationParams {
        self.params
            .get(&operation)
            .copied()
            .unwrap_or_else(|| operation.default_params())
    }

    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut params = HashMap::new();
        for op in OperationType::ALL {
            let base = op.default_params();
            let stem = op.env_stem();
            let temp_key = format!("{stem}_TEMPERATURE");
            let temperature: f32 = parse_optional_env(&temp_key, base.temperature)?;
            if !(0.0..=2.0).contains(&temperature) {
                return Err(invalid(&temp_key, "must be between 0.0 and 2.0"));
            }
            params.insert(
                op,
                GenerationParams {
                    max_tokens: parse_optional_env(&format!("{stem}_MAX_TOKENS"), base.max_tokens)?,
                    temperature,
                },
            );
        }

        let max_prompt_chars = parse_optional_env("ROUTER_MAX_PROMPT_CHARS", defaults.max_prompt_chars)?;
        if max_prompt_chars == 0 {
            return Err(invalid("ROUTER_MAX_PROMPT_CHARS", "must be greater than zero"));
        }

        Ok(Self {
            enabled: parse_bool_env("ENABLE_SMART_ROUTING", defaults.enabled)?,
            max_prompt_chars,
            complex_min_chars: parse_optional_env("ROUTER_COMPLEX_MIN_CHARS", defaults.complex_min_chars)?,
            params,
        })
    }
}
