//! The routing pipeline behind [`Router::route`].
//!
//! ```text
//! validate ─► classify ─► chain ─► cache? ──hit──► decision
//!                                   │ miss
//!                                   ▼
//!        for each candidate: limiter ─► breaker ─► retry(call) ─┐
//!                    ▲  denied / open / exhausted               │ ok
//!                    └──────────── next candidate ◄─────────────┤
//!                                                               ▼
//!                                   normalize ─► cache write ─► decision
//! ```
//!
//! Every call to `route()` emits exactly one [`Metric`], including calls
//! that are cancelled mid-flight.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::{ResilienceConfig, RoutingConfig};
use crate::error::{LlmError, RouteError};
use crate::llm::circuit_breaker::{BreakerStats, CircuitBreaker};
use crate::llm::classifier::{ClassifierConfig, Complexity, ComplexityClassifier, ComplexityTier};
use crate::llm::policy::{ProviderSlot, RoutingPolicy};
use crate::llm::provider::GenerateRequest;
use crate::llm::rate_limit::{RateLimiterStats, TokenBucket};
use crate::llm::request::{OperationType, RouteDecision, RouteRequest};
use crate::llm::response_cache::{CacheKey, CacheStats, ResponseCache, ResponseCacheConfig};
use crate::llm::retry::RetryExecutor;
use crate::llm::validation::{DefaultNormalizer, ResponseNormalizer};
use crate::observability::{Metric, MetricsCollector, MetricsSnapshot, NoopSink, Outcome};
use crate::settings::Settings;

/// Default bound on a single provider call.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Diagnostics returned by [`Router::get_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub total_requests: u64,
    pub cache_hit_rate: f64,
    pub breakers: BTreeMap<String, BreakerStats>,
    pub limiters: BTreeMap<String, RateLimiterStats>,
    pub cache: CacheStats,
    pub metrics: MetricsSnapshot,
}

/// What the cache stores for a request: the answer plus who produced it.
#[derive(Debug, Serialize, Deserialize)]
struct CachedAnswer {
    text: String,
    provider: String,
    model: String,
}

/// A successful provider attempt, already normalized.
struct Answer {
    text: String,
    provider: String,
    model: String,
    input_tokens: u32,
    output_tokens: u32,
    cost: Decimal,
}

/// Bookkeeping shared by the nested chain walk. Locked briefly, never
/// across an await.
#[derive(Default)]
struct WalkState {
    considered: Vec<String>,
    last_error: Option<String>,
    last_provider: Option<String>,
    retries: u32,
}

struct Walk<'a> {
    request: &'a RouteRequest,
    chain: &'a [ProviderSlot],
    state: &'a Mutex<WalkState>,
}

impl Walk<'_> {
    fn update(&self, f: impl FnOnce(&mut WalkState)) {
        f(&mut self.state.lock().unwrap_or_else(|e| e.into_inner()));
    }
}

/// Emits a `cancelled` metric if the route future is dropped before it
/// records its own outcome.
struct MetricGuard<'a> {
    metrics: &'a MetricsCollector,
    state: &'a Mutex<WalkState>,
    operation: OperationType,
    complexity: Option<ComplexityTier>,
    started: Instant,
    armed: bool,
}

impl MetricGuard<'_> {
    fn finish(mut self, metric: Metric) {
        self.armed = false;
        self.metrics.record(&metric);
    }
}

impl Drop for MetricGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (provider, retries) = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            (state.last_provider.clone(), state.retries)
        };
        tracing::debug!(operation = %self.operation, "route cancelled by caller");
        self.metrics.record(&Metric {
            operation: self.operation,
            provider,
            model: None,
            complexity: self.complexity,
            latency: self.started.elapsed(),
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: Decimal::ZERO,
            outcome: Outcome::Cancelled,
            error_kind: Some(RouteError::Cancelled.kind().to_string()),
            cache_hit: false,
            retry_count: retries,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Builder for [`Router`]. Everything except the policy has a default.
pub struct RouterBuilder {
    policy: RoutingPolicy,
    routing: RoutingConfig,
    resilience: ResilienceConfig,
    cache: Option<ResponseCache>,
    normalizer: Arc<dyn ResponseNormalizer>,
    metrics: Option<MetricsCollector>,
    settings: Settings,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
}

impl RouterBuilder {
    pub fn routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    pub fn resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }

    pub fn cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<dyn ResponseNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Clock for TTLs, breaker cool-downs and limiter refill.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Upper bound on one provider call, on top of the HTTP client's own.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn build(self) -> Router {
        let mut breakers = HashMap::new();
        let mut limiters = HashMap::new();
        for slot in self.policy.slots() {
            let id = slot.id().to_string();
            breakers.insert(
                id.clone(),
                CircuitBreaker::new(&id, self.resilience.breaker, Arc::clone(&self.clock)),
            );
            limiters.insert(
                id.clone(),
                TokenBucket::new(&id, self.resilience.limiter, Arc::clone(&self.clock)),
            );
        }

        let cache = self.cache.unwrap_or_else(|| {
            ResponseCache::in_memory(ResponseCacheConfig::default(), Arc::clone(&self.clock))
        });
        let metrics = self
            .metrics
            .unwrap_or_else(|| MetricsCollector::new(Box::new(NoopSink)));

        Router {
            classifier: ComplexityClassifier::new(ClassifierConfig {
                complex_min_chars: self.routing.complex_min_chars,
            }),
            policy: self.policy,
            routing: self.routing,
            breakers,
            limiters,
            retry: RetryExecutor::new(self.resilience.retry),
            cache,
            normalizer: self.normalizer,
            metrics,
            settings: RwLock::new(Arc::new(self.settings)),
            call_timeout: self.call_timeout,
        }
    }
}

/// Complexity-aware, failure-tolerant front door to the model backends.
///
/// Shared across callers behind an `Arc`; each provider's breaker and
/// limiter serialize only their own state.
pub struct Router {
    policy: RoutingPolicy,
    classifier: ComplexityClassifier,
    routing: RoutingConfig,
    breakers: HashMap<String, CircuitBreaker>,
    limiters: HashMap<String, TokenBucket>,
    retry: RetryExecutor,
    cache: ResponseCache,
    normalizer: Arc<dyn ResponseNormalizer>,
    metrics: MetricsCollector,
    settings: RwLock<Arc<Settings>>,
    call_timeout: Duration,
}

impl Router {
    pub fn builder(policy: RoutingPolicy) -> RouterBuilder {
        RouterBuilder {
            policy,
            routing: RoutingConfig::default(),
            resilience: ResilienceConfig::default(),
            cache: None,
            normalizer: Arc::new(DefaultNormalizer),
            metrics: None,
            settings: Settings::default(),
            clock: Arc::new(SystemClock),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.settings.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Classify without routing.
    pub fn classify(&self, prompt: &str) -> Complexity {
        self.classifier.classify(prompt)
    }

    /// Route a request to a model and return its normalized answer.
    ///
    /// Dropping the returned future cancels the request: any in-flight
    /// attempt is left out of breaker accounting and a `cancelled` metric
    /// is emitted.
    pub async fn route(&self, request: RouteRequest) -> Result<RouteDecision, RouteError> {
        let started = Instant::now();
        let state = Mutex::new(WalkState::default());
        let mut guard = MetricGuard {
            metrics: &self.metrics,
            state: &state,
            operation: request.operation,
            complexity: None,
            started,
            armed: true,
        };

        let settings = self.settings();
        if let Err(err) = self.validate(&request, &settings) {
            tracing::debug!(operation = %request.operation, error = %err, "rejected request");
            guard.finish(self.failure_metric(&request, None, &state, started, &err));
            return Err(err);
        }

        let complexity = self.classifier.classify(&request.prompt);
        guard.complexity = Some(complexity.tier);

        let chain = if settings.routing_enabled {
            self.policy.chain(complexity.tier, request.tier)
        } else {
            self.policy.fixed_chain(settings.selected_provider.as_deref())
        };
        tracing::debug!(
            operation = %request.operation,
            complexity = %complexity.tier,
            caller = %request.tier,
            chain = ?chain.iter().map(|s| s.id()).collect::<Vec<_>>(),
            "routing request"
        );

        // Keyed by the head model so a warm entry survives fallback answers.
        let head_model = chain
            .first()
            .map(|s| s.provider.model_name().to_string())
            .unwrap_or_default();
        let key = CacheKey::new(request.operation, &head_model, &request.prompt);
        let caching = self.cache.ttl_policy().is_enabled(request.operation);

        if caching && let Some(cached) = self.cached_answer(&key).await {
            let latency = started.elapsed();
            let decision = RouteDecision {
                text: cached.text,
                chosen_provider: cached.provider.clone(),
                chosen_model: cached.model.clone(),
                complexity,
                cache_hit: true,
                retry_count: 0,
                latency_ms: latency.as_millis() as u64,
                estimated_cost_usd: Decimal::ZERO,
            };
            guard.finish(Metric {
                operation: request.operation,
                provider: Some(cached.provider),
                model: Some(cached.model),
                complexity: Some(decision.complexity.tier),
                latency,
                tokens_in: 0,
                tokens_out: 0,
                cost_usd: Decimal::ZERO,
                outcome: Outcome::Success,
                error_kind: None,
                cache_hit: true,
                retry_count: 0,
                timestamp: chrono::Utc::now(),
            });
            return Ok(decision);
        }

        let walk = Walk {
            request: &request,
            chain: &chain,
            state: &state,
        };
        let result = self.walk(&walk, 0).await;

        match result {
            Ok(answer) => {
                if caching {
                    let cached = CachedAnswer {
                        text: answer.text.clone(),
                        provider: answer.provider.clone(),
                        model: answer.model.clone(),
                    };
                    match serde_json::to_string(&cached) {
                        Ok(json) => self.cache.set(&key, json).await,
                        Err(e) => tracing::warn!(error = %e, "failed to encode cache entry"),
                    }
                }

                let latency = started.elapsed();
                let retries = state.lock().unwrap_or_else(|e| e.into_inner()).retries;
                tracing::debug!(
                    operation = %request.operation,
                    provider = %answer.provider,
                    retries,
                    latency_ms = latency.as_millis() as u64,
                    "request routed"
                );
                guard.finish(Metric {
                    operation: request.operation,
                    provider: Some(answer.provider.clone()),
                    model: Some(answer.model.clone()),
                    complexity: Some(complexity.tier),
                    latency,
                    tokens_in: answer.input_tokens,
                    tokens_out: answer.output_tokens,
                    cost_usd: answer.cost,
                    outcome: Outcome::Success,
                    error_kind: None,
                    cache_hit: false,
                    retry_count: retries,
                    timestamp: chrono::Utc::now(),
                });
                Ok(RouteDecision {
                    text: answer.text,
                    chosen_provider: answer.provider,
                    chosen_model: answer.model,
                    complexity,
                    cache_hit: false,
                    retry_count: retries,
                    latency_ms: latency.as_millis() as u64,
                    estimated_cost_usd: answer.cost,
                })
            }
            Err(err) => {
                tracing::warn!(
                    operation = %request.operation,
                    kind = err.kind(),
                    stage = %err.stage(),
                    error = %err,
                    "request failed"
                );
                guard.finish(self.failure_metric(
                    &request,
                    Some(complexity.tier),
                    &state,
                    started,
                    &err,
                ));
                Err(err)
            }
        }
    }

    /// [`route`](Self::route), abandoned as soon as `cancel` fires.
    pub async fn route_with_cancel(
        &self,
        request: RouteRequest,
        cancel: &CancellationToken,
    ) -> Result<RouteDecision, RouteError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RouteError::Cancelled),
            result = self.route(request) => result,
        }
    }

    /// Aggregate counters plus per-provider breaker and limiter state.
    pub fn get_stats(&self) -> RouterStats {
        let metrics = self.metrics.snapshot();
        RouterStats {
            total_requests: metrics.total_requests,
            cache_hit_rate: metrics.cache_hit_rate,
            breakers: self
                .breakers
                .iter()
                .map(|(id, b)| (id.clone(), b.stats()))
                .collect(),
            limiters: self
                .limiters
                .iter()
                .map(|(id, l)| (id.clone(), l.stats()))
                .collect(),
            cache: self.cache.stats(),
            metrics,
        }
    }

    /// Drop every cached response.
    pub async fn invalidate_cache(&self) {
        self.cache.invalidate_all().await;
    }

    /// Reset a provider's breaker and refill its limiter. Returns `false`
    /// for an unknown provider.
    pub fn reset_provider_state(&self, provider_id: &str) -> bool {
        let (Some(breaker), Some(limiter)) = (
            self.breakers.get(provider_id),
            self.limiters.get(provider_id),
        ) else {
            return false;
        };
        breaker.reset();
        limiter.reset();
        tracing::info!(provider = provider_id, "provider state reset");
        true
    }

    /// Swap in new settings. Switching the selected provider invalidates
    /// the cache so stale answers from the old choice are not served.
    pub async fn apply_settings(&self, settings: Settings) {
        let provider_changed = {
            let mut current = self.settings.write().unwrap_or_else(|e| e.into_inner());
            let changed = current.selected_provider != settings.selected_provider;
            *current = Arc::new(settings);
            changed
        };
        if provider_changed {
            tracing::info!("selected provider changed, invalidating response cache");
            self.cache.invalidate_all().await;
        }
    }

    /// Flush the metrics sink.
    pub fn flush_metrics(&self) {
        self.metrics.flush();
    }

    fn validate(&self, request: &RouteRequest, settings: &Settings) -> Result<(), RouteError> {
        if request.prompt.trim().is_empty() {
            return Err(RouteError::Validation {
                reason: "prompt is empty".to_string(),
            });
        }
        let chars = request.prompt.chars().count();
        if chars > self.routing.max_prompt_chars {
            return Err(RouteError::Validation {
                reason: format!(
                    "prompt is {} characters, limit is {}",
                    chars, self.routing.max_prompt_chars
                ),
            });
        }
        if !settings.is_operation_enabled(request.operation) {
            return Err(RouteError::Validation {
                reason: format!("{} is disabled in settings", request.operation),
            });
        }
        Ok(())
    }

    async fn cached_answer(&self, key: &CacheKey) -> Option<CachedAnswer> {
        let entry = self.cache.get(key).await?;
        match serde_json::from_str(&entry.value) {
            Ok(answer) => Some(answer),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable cache entry, treating as miss");
                None
            }
        }
    }

    /// Try `walk.chain[idx..]` in order. Each candidate's fallback is the
    /// rest of the chain.
    fn walk<'a>(
        &'a self,
        walk: &'a Walk<'a>,
        idx: usize,
    ) -> BoxFuture<'a, Result<Answer, RouteError>> {
        async move {
            let Some(slot) = walk.chain.get(idx) else {
                let state = walk.state.lock().unwrap_or_else(|e| e.into_inner());
                return Err(RouteError::AllProvidersUnavailable {
                    attempted: state.considered.clone(),
                    last_error: state.last_error.clone(),
                });
            };
            let id = slot.id();
            walk.update(|s| s.considered.push(id.to_string()));

            let admitted = self.limiters.get(id).is_none_or(|l| l.try_acquire());
            if !admitted {
                tracing::debug!(provider = id, "local rate limit reached, trying next provider");
                walk.update(|s| {
                    s.last_error.get_or_insert_with(|| format!("{id}: local rate limit reached"));
                });
                return self.walk(walk, idx + 1).await;
            }

            let Some(breaker) = self.breakers.get(id) else {
                return self.walk(walk, idx + 1).await;
            };
            if !breaker.is_call_permitted() {
                tracing::debug!(provider = id, "circuit open, trying next provider");
                walk.update(|s| {
                    s.last_error.get_or_insert_with(|| format!("{id}: circuit open"));
                });
                return self.walk(walk, idx + 1).await;
            }

            let outcome = self
                .retry
                .execute_with_fallback(
                    breaker,
                    |_attempt| self.call_provider(slot, walk),
                    || self.walk(walk, idx + 1),
                )
                .await;
            walk.update(|s| s.retries += outcome.backoff_waits);
            outcome.result
        }
        .boxed()
    }

    /// One attempt against one provider, including normalization.
    async fn call_provider(
        &self,
        slot: &ProviderSlot,
        walk: &Walk<'_>,
    ) -> Result<Answer, RouteError> {
        let provider = &slot.provider;
        let id = provider.id();
        let params = self.routing.params_for(walk.request.operation);
        let request = GenerateRequest::new(walk.request.prompt.clone(), provider.model_name())
            .with_max_tokens(params.max_tokens)
            .with_temperature(params.temperature);

        walk.update(|s| s.last_provider = Some(id.to_string()));

        let result = match tokio::time::timeout(self.call_timeout, provider.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout {
                provider: id.to_string(),
                timeout: self.call_timeout,
            }),
        };

        let normalized = result.and_then(|generation| {
            let text = self
                .normalizer
                .normalize(walk.request.operation, id, &generation.text)?;
            Ok(Answer {
                text,
                provider: id.to_string(),
                model: provider.model_name().to_string(),
                input_tokens: generation.input_tokens,
                output_tokens: generation.output_tokens,
                cost: provider.calculate_cost(generation.input_tokens, generation.output_tokens),
            })
        });

        normalized.map_err(|e| {
            tracing::debug!(provider = id, error = %e, "provider attempt failed");
            walk.update(|s| s.last_error = Some(e.to_string()));
            RouteError::from_llm(id, e)
        })
    }

    fn failure_metric(
        &self,
        request: &RouteRequest,
        complexity: Option<ComplexityTier>,
        state: &Mutex<WalkState>,
        started: Instant,
        err: &RouteError,
    ) -> Metric {
        let (provider, retries) = {
            let state = state.lock().unwrap_or_else(|e| e.into_inner());
            (state.last_provider.clone(), state.retries)
        };
        Metric {
            operation: request.operation,
            provider,
            model: None,
            complexity,
            latency: started.elapsed(),
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: Decimal::ZERO,
            outcome: Outcome::Failure,
            error_kind: Some(err.kind().to_string()),
            cache_hit: false,
            retry_count: retries,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::clock::ManualClock;
    use crate::llm::circuit_breaker::CircuitState;
    use crate::llm::provider::{ModelTier, ProviderKind};
    use crate::llm::request::SubscriptionTier;
    use crate::llm::retry::RetryPolicy;
    use crate::observability::{RecordedMetrics, RecordingSink};
    use crate::testing::{StubOutcome, StubProvider};

    const SIMPLE: &str = "Remind me to buy milk";

    fn fast_retry() -> ResilienceConfig {
        ResilienceConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                multiplier: 2.0,
                jitter: (1.0, 1.0),
            },
            ..Default::default()
        }
    }

    struct Harness {
        router: Router,
        cheap: Arc<StubProvider>,
        standard: Arc<StubProvider>,
        metrics: RecordedMetrics,
        clock: Arc<ManualClock>,
    }

    /// `flash` (economy, cheap) and `sonnet` (standard). Simple prompts
    /// chain flash -> sonnet; free medium/complex chain sonnet -> flash.
    fn harness(cheap: StubProvider, standard: StubProvider) -> Harness {
        let cheap = Arc::new(cheap.with_cost(dec!(0.0000001), dec!(0.0000004)));
        let standard = Arc::new(standard.with_cost(dec!(0.000003), dec!(0.000015)));
        let policy = RoutingPolicy::new(vec![
            ProviderSlot::new(cheap.clone(), ModelTier::Economy, 1),
            ProviderSlot::new(standard.clone(), ModelTier::Standard, 0),
        ])
        .unwrap();
        let clock = Arc::new(ManualClock::new());
        let (sink, metrics) = RecordingSink::new();
        let router = Router::builder(policy)
            .resilience(fast_retry())
            .clock(clock.clone())
            .metrics(MetricsCollector::new(Box::new(sink)))
            .build();
        Harness {
            router,
            cheap,
            standard,
            metrics,
            clock,
        }
    }

    fn recorded(metrics: &RecordedMetrics) -> Vec<Metric> {
        metrics.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn simple_prompt_goes_to_cheapest_and_is_cached() {
        let h = harness(
            StubProvider::new("flash", ProviderKind::Gemini),
            StubProvider::new("sonnet", ProviderKind::Anthropic),
        );
        let req = || RouteRequest::new(SIMPLE, OperationType::IntentDetection, SubscriptionTier::Pro);

        let first = h.router.route(req()).await.unwrap();
        assert_eq!(first.chosen_provider, "flash");
        assert!(!first.cache_hit);
        assert!(first.estimated_cost_usd > Decimal::ZERO);

        let second = h.router.route(req()).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.chosen_provider, "flash");
        assert_eq!(second.text, first.text);
        assert_eq!(h.cheap.calls(), 1);
        assert_eq!(h.standard.calls(), 0);

        let stats = h.router.get_stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.cache_hit_rate, 0.5);
        assert_eq!(recorded(&h.metrics).len(), 2);
    }

    #[tokio::test]
    async fn generation_params_follow_operation() {
        let h = harness(
            StubProvider::new("flash", ProviderKind::Gemini),
            StubProvider::new("sonnet", ProviderKind::Anthropic),
        );
        h.router
            .route(RouteRequest::new(SIMPLE, OperationType::IntentDetection, SubscriptionTier::Free))
            .await
            .unwrap();
        let sent = h.cheap.last_request().unwrap();
        assert_eq!(sent.max_tokens, 256);
        assert_eq!(sent.temperature, 0.0);
        assert_eq!(sent.model, "flash-model");
    }

    #[tokio::test]
    async fn schedule_optimization_is_never_cached() {
        let h = harness(
            StubProvider::new("flash", ProviderKind::Gemini),
            StubProvider::new("sonnet", ProviderKind::Anthropic),
        );
        let req = || {
            RouteRequest::new(SIMPLE, OperationType::ScheduleOptimization, SubscriptionTier::Pro)
        };
        h.router.route(req()).await.unwrap();
        let second = h.router.route(req()).await.unwrap();
        assert!(!second.cache_hit);
        assert_eq!(h.router.get_stats().cache.lookups, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_on_same_provider() {
        let h = harness(
            StubProvider::new("flash", ProviderKind::Gemini).then_n(2, StubOutcome::ServerError(503)),
            StubProvider::new("sonnet", ProviderKind::Anthropic),
        );
        let decision = h
            .router
            .route(RouteRequest::new(SIMPLE, OperationType::TaskAnalysis, SubscriptionTier::Free))
            .await
            .unwrap();
        assert_eq!(decision.chosen_provider, "flash");
        assert_eq!(decision.retry_count, 2);
        assert_eq!(h.cheap.calls(), 3);

        let metric = recorded(&h.metrics).pop().unwrap();
        assert_eq!(metric.retry_count, 2);
        assert!(metric.success());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_provider_falls_back_to_next_in_chain() {
        let h = harness(
            StubProvider::new("flash", ProviderKind::Gemini).otherwise(StubOutcome::Timeout),
            StubProvider::new("sonnet", ProviderKind::Anthropic),
        );
        let decision = h
            .router
            .route(RouteRequest::new(SIMPLE, OperationType::DailyBriefing, SubscriptionTier::Pro))
            .await
            .unwrap();
        assert_eq!(decision.chosen_provider, "sonnet");
        assert_eq!(h.cheap.calls(), 3);
        assert_eq!(h.standard.calls(), 1);
    }

    #[tokio::test]
    async fn auth_error_is_not_retried_or_failed_over() {
        let h = harness(
            StubProvider::new("flash", ProviderKind::Gemini).then(StubOutcome::AuthFailed),
            StubProvider::new("sonnet", ProviderKind::Anthropic),
        );
        let err = h
            .router
            .route(RouteRequest::new(SIMPLE, OperationType::IntentDetection, SubscriptionTier::Pro))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Auth { ref provider } if provider == "flash"));
        assert!(!err.is_retryable());
        assert_eq!(h.cheap.calls(), 1);
        assert_eq!(h.standard.calls(), 0);

        let metric = recorded(&h.metrics).pop().unwrap();
        assert_eq!(metric.outcome, Outcome::Failure);
        assert_eq!(metric.error_kind.as_deref(), Some("auth"));
    }

    #[tokio::test(start_paused = true)]
    async fn whole_chain_failing_is_all_providers_unavailable() {
        let h = harness(
            StubProvider::new("flash", ProviderKind::Gemini).otherwise(StubOutcome::ServerError(500)),
            StubProvider::new("sonnet", ProviderKind::Anthropic).otherwise(StubOutcome::ServerError(502)),
        );
        let err = h
            .router
            .route(RouteRequest::new(SIMPLE, OperationType::TaskAnalysis, SubscriptionTier::Pro))
            .await
            .unwrap_err();
        match err {
            RouteError::AllProvidersUnavailable {
                attempted,
                last_error,
            } => {
                assert_eq!(attempted, vec!["flash".to_string(), "sonnet".to_string()]);
                assert!(last_error.unwrap().contains("502"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Nothing fabricated, nothing cached.
        assert!(h.router.get_stats().cache.memory_entries == 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_is_skipped_without_calls() {
        let h = harness(
            StubProvider::new("flash", ProviderKind::Gemini).then_n(5, StubOutcome::ServerError(503)),
            StubProvider::new("sonnet", ProviderKind::Anthropic),
        );
        let req = |p: &str| {
            RouteRequest::new(p, OperationType::ScheduleOptimization, SubscriptionTier::Free)
        };
        // Three failed attempts, then two more: the fifth opens the breaker.
        h.router.route(req("remind me to call mom")).await.unwrap();
        h.router.route(req("remind me to buy bread")).await.unwrap();
        assert_eq!(h.cheap.calls(), 5);
        assert_eq!(h.router.get_stats().breakers["flash"].state, CircuitState::Open);

        let decision = h.router.route(req("remind me to water plants")).await.unwrap();
        assert_eq!(decision.chosen_provider, "sonnet");
        assert_eq!(h.cheap.calls(), 5);

        // After the cool-down a trial call is let through again.
        h.clock.advance(Duration::from_secs(31));
        let decision = h.router.route(req("remind me to buy stamps")).await.unwrap();
        assert_eq!(decision.chosen_provider, "flash");
        assert_eq!(h.router.get_stats().breakers["flash"].state, CircuitState::HalfOpen);

        assert!(h.router.reset_provider_state("flash"));
        assert_eq!(h.router.get_stats().breakers["flash"].state, CircuitState::Closed);
        assert!(!h.router.reset_provider_state("nope"));
    }

    #[tokio::test]
    async fn validation_failures_emit_one_failure_metric() {
        let h = harness(
            StubProvider::new("flash", ProviderKind::Gemini),
            StubProvider::new("sonnet", ProviderKind::Anthropic),
        );
        let err = h
            .router
            .route(RouteRequest::new("   ", OperationType::IntentDetection, SubscriptionTier::Pro))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Validation { .. }));

        let too_long = "x".repeat(40_000);
        assert!(
            h.router
                .route(RouteRequest::new(too_long, OperationType::IntentDetection, SubscriptionTier::Pro))
                .await
                .is_err()
        );

        let metrics = recorded(&h.metrics);
        assert_eq!(metrics.len(), 2);
        assert!(metrics.iter().all(|m| m.error_kind.as_deref() == Some("validation")));
        assert_eq!(h.cheap.calls() + h.standard.calls(), 0);
    }

    #[tokio::test]
    async fn disabled_operation_and_fixed_provider_settings() {
        let h = harness(
            StubProvider::new("flash", ProviderKind::Gemini),
            StubProvider::new("sonnet", ProviderKind::Anthropic),
        );
        let mut settings = Settings {
            routing_enabled: false,
            selected_provider: Some("sonnet".to_string()),
            ..Default::default()
        };
        settings.set_operation_enabled(OperationType::DailyBriefing, false);
        h.router.apply_settings(settings).await;

        let decision = h
            .router
            .route(RouteRequest::new(SIMPLE, OperationType::TaskAnalysis, SubscriptionTier::Free))
            .await
            .unwrap();
        assert_eq!(decision.chosen_provider, "sonnet");

        let err = h
            .router
            .route(RouteRequest::new(SIMPLE, OperationType::DailyBriefing, SubscriptionTier::Free))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Validation { .. }));
    }

    #[tokio::test]
    async fn switching_provider_invalidates_cache() {
        let h = harness(
            StubProvider::new("flash", ProviderKind::Gemini),
            StubProvider::new("sonnet", ProviderKind::Anthropic),
        );
        h.router
            .route(RouteRequest::new(SIMPLE, OperationType::TaskAnalysis, SubscriptionTier::Pro))
            .await
            .unwrap();
        assert_eq!(h.router.get_stats().cache.memory_entries, 1);

        // Same provider: cache kept.
        h.router.apply_settings(Settings::default()).await;
        assert_eq!(h.router.get_stats().cache.memory_entries, 1);

        h.router
            .apply_settings(Settings {
                selected_provider: Some("sonnet".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(h.router.get_stats().cache.memory_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_emits_cancelled_metric_and_leaves_breaker_clean() {
        let h = harness(
            StubProvider::new("flash", ProviderKind::Gemini).then(StubOutcome::Hang),
            StubProvider::new("sonnet", ProviderKind::Anthropic),
        );
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = h
            .router
            .route_with_cancel(
                RouteRequest::new(SIMPLE, OperationType::TaskAnalysis, SubscriptionTier::Pro),
                &token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Cancelled));

        let metrics = recorded(&h.metrics);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].outcome, Outcome::Cancelled);
        assert_eq!(metrics[0].provider.as_deref(), Some("flash"));

        let breaker = &h.router.get_stats().breakers["flash"];
        assert_eq!(breaker.total_requests, 0);
        assert_eq!(breaker.total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_call_timeout_is_retryable() {
        let cheap = StubProvider::new("flash", ProviderKind::Gemini).then(StubOutcome::Hang);
        let cheap = Arc::new(cheap.with_cost(dec!(0.0000001), dec!(0.0000001)));
        let policy =
            RoutingPolicy::new(vec![ProviderSlot::new(cheap.clone(), ModelTier::Economy, 0)]).unwrap();
        let router = Router::builder(policy)
            .resilience(fast_retry())
            .call_timeout(Duration::from_secs(2))
            .build();

        let decision = router
            .route(RouteRequest::new(SIMPLE, OperationType::TaskAnalysis, SubscriptionTier::Pro))
            .await
            .unwrap();
        assert_eq!(decision.retry_count, 1);
        assert_eq!(cheap.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_answer_is_a_failed_attempt_and_never_cached() {
        let h = harness(
            StubProvider::new("flash", ProviderKind::Gemini).then(StubOutcome::Reply("   ".into())),
            StubProvider::new("sonnet", ProviderKind::Anthropic),
        );
        let decision = h
            .router
            .route(RouteRequest::new(SIMPLE, OperationType::TaskAnalysis, SubscriptionTier::Pro))
            .await
            .unwrap();
        assert_eq!(decision.text, "reply from flash");
        assert_eq!(decision.retry_count, 1);
        assert_eq!(h.router.get_stats().breakers["flash"].total_failures, 1);
    }

    /// Fails every call with a request that reqwest refuses to build.
    struct UnbuildableRequest {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl crate::llm::provider::LlmProvider for UnbuildableRequest {
        fn id(&self) -> &str {
            "broken"
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenAi
        }

        fn model_name(&self) -> &str {
            "broken-model"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (dec!(0.00000001), dec!(0.00000001))
        }

        async fn generate(
            &self,
            _request: GenerateRequest,
        ) -> Result<crate::llm::provider::Generation, LlmError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let err = reqwest::Client::new().get("not a url").build().unwrap_err();
            Err(LlmError::Http(err))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_transport_error_is_not_retried_or_failed_over() {
        let broken = Arc::new(UnbuildableRequest {
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let standard = Arc::new(
            StubProvider::new("sonnet", ProviderKind::Anthropic)
                .with_cost(dec!(0.000003), dec!(0.000015)),
        );
        let policy = RoutingPolicy::new(vec![
            ProviderSlot::new(broken.clone(), ModelTier::Economy, 1),
            ProviderSlot::new(standard.clone(), ModelTier::Standard, 0),
        ])
        .unwrap();
        let (sink, metrics) = RecordingSink::new();
        let router = Router::builder(policy)
            .resilience(fast_retry())
            .metrics(MetricsCollector::new(Box::new(sink)))
            .build();

        let err = router
            .route(RouteRequest::new(SIMPLE, OperationType::IntentDetection, SubscriptionTier::Pro))
            .await
            .unwrap_err();
        assert!(
            matches!(err, RouteError::Validation { ref reason } if reason.starts_with("broken:")),
            "unexpected error: {err:?}"
        );
        assert_eq!(broken.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(standard.calls(), 0);

        let metric = recorded(&metrics).pop().unwrap();
        assert_eq!(metric.outcome, Outcome::Failure);
        assert_eq!(metric.error_kind.as_deref(), Some("validation"));
    }
}
