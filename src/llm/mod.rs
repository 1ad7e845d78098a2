//! Model routing and the backends behind it.
//!
//! Backends:
//! - **Anthropic**: Messages API
//! - **OpenAI**: Chat Completions, or any OpenAI-compatible endpoint
//! - **Gemini**: Google `generateContent`
//!
//! [`Router`] sits in front of them and adds complexity-based model choice,
//! caching, per-provider rate limiting, circuit breaking and retries.

mod anthropic;
pub mod cache_store;
pub mod circuit_breaker;
pub mod classifier;
pub mod costs;
mod gemini;
mod http;
mod openai;
pub mod policy;
pub mod provider;
pub mod rate_limit;
pub mod request;
pub mod response_cache;
pub mod retry;
pub mod router;
pub mod validation;

pub use anthropic::AnthropicProvider;
pub use cache_store::{DurableStore, FileStore, MemoryStore};
#[cfg(feature = "libsql")]
pub use cache_store::LibSqlStore;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classifier::{Complexity, ComplexityClassifier, ComplexityTier};
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use policy::{ProviderSlot, RoutingPolicy};
pub use provider::{GenerateRequest, Generation, LlmProvider, ModelTier, ProviderKind};
pub use rate_limit::{RateLimiterConfig, TokenBucket};
pub use request::{OperationType, RouteDecision, RouteRequest, SubscriptionTier};
pub use response_cache::{CacheKey, ResponseCache, ResponseCacheConfig, TtlPolicy};
pub use retry::{RetryExecutor, RetryPolicy};
pub use router::{Router, RouterBuilder, RouterStats};
pub use validation::{DefaultNormalizer, ResponseNormalizer};

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{CacheConfig, Config, DurableBackend, LlmConfig, ProviderConfig};
use crate::error::{CacheIoError, ConfigError, Error};
use crate::observability::{MetricsCollector, create_sink};
use crate::settings::Settings;

/// Create a provider for one configured backend.
pub fn create_llm_provider(config: &ProviderConfig, llm: &LlmConfig) -> Arc<dyn LlmProvider> {
    tracing::info!(
        provider = %config.id,
        kind = %config.kind,
        model = %config.model,
        tier = %config.tier,
        base_url = config.base_url.as_deref().unwrap_or("default"),
        "Configuring LLM provider"
    );
    match config.kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config.clone(), llm)),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config.clone(), llm)),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(config.clone(), llm)),
    }
}

/// Build the routing policy from every configured backend.
pub fn create_policy(llm: &LlmConfig) -> Result<RoutingPolicy, ConfigError> {
    let slots = llm
        .providers
        .iter()
        .map(|p| ProviderSlot::new(create_llm_provider(p, llm), p.tier, p.priority))
        .collect();
    RoutingPolicy::new(slots)
}

/// Open the configured durable cache tier. `None` means memory only.
pub async fn create_durable_store(
    config: &CacheConfig,
) -> Result<Option<Arc<dyn DurableStore>>, CacheIoError> {
    let store: Arc<dyn DurableStore> = match config.backend {
        DurableBackend::None => return Ok(None),
        DurableBackend::Memory => Arc::new(MemoryStore::new()),
        DurableBackend::File => Arc::new(FileStore::open(&config.path).await?),
        #[cfg(feature = "libsql")]
        DurableBackend::LibSql => Arc::new(LibSqlStore::open(&config.path).await?),
        #[cfg(not(feature = "libsql"))]
        DurableBackend::LibSql => {
            return Err(CacheIoError::Backend(
                "libsql backend requires the `libsql` feature".to_string(),
            ));
        }
    };
    tracing::info!(backend = %config.backend, path = %config.path.display(), "Durable cache tier ready");
    Ok(Some(store))
}

/// Wire a [`Router`] from configuration.
///
/// A durable tier that fails to open is logged and skipped; the router
/// still starts with the memory tier.
pub async fn create_router(
    config: &Config,
    settings: Settings,
    clock: Arc<dyn Clock>,
) -> Result<Router, Error> {
    let policy = create_policy(&config.llm)?;

    let durable = match create_durable_store(&config.cache).await {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(error = %e, "Durable cache unavailable, using memory tier only");
            None
        }
    };
    let cache = ResponseCache::new(
        config.cache.response_cache_config(),
        durable,
        Arc::clone(&clock),
    );
    let metrics = MetricsCollector::new(create_sink(&config.observability));

    // ENABLE_SMART_ROUTING=false overrides the settings file.
    let settings = Settings {
        routing_enabled: settings.routing_enabled && config.routing.enabled,
        ..settings
    };

    Ok(Router::builder(policy)
        .routing(config.routing.clone())
        .resilience(config.resilience.clone())
        .cache(cache)
        .metrics(metrics)
        .settings(settings)
        .clock(clock)
        .call_timeout(config.llm.request_timeout)
        .build())
}
