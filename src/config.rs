//! Configuration for the routing engine.
//!
//! Everything is read from environment variables (after loading `.env`),
//! with documented defaults. See each section for its variables.

pub mod cache;
pub(crate) mod helpers;
pub mod llm;
pub mod resilience;
pub mod routing;

pub use self::cache::{CacheConfig, DurableBackend};
pub use self::llm::{LlmConfig, ProviderConfig};
pub use self::resilience::ResilienceConfig;
pub use self::routing::{GenerationParams, RoutingConfig};

use crate::error::ConfigError;
use crate::observability::ObservabilityConfig;

/// Main configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub llm: LlmConfig,
    pub routing: RoutingConfig,
    pub cache: CacheConfig,
    pub resilience: ResilienceConfig,
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            llm: LlmConfig::resolve()?,
            routing: RoutingConfig::resolve()?,
            cache: CacheConfig::resolve()?,
            resilience: ResilienceConfig::resolve()?,
            observability: ObservabilityConfig::resolve()?,
        })
    }
}
