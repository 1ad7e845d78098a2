//! Test doubles for exercising the router without network access.
//!
//! [`StubProvider`] plays back a scripted list of outcomes and counts how
//! often it was called. [`ManualClock`] (re-exported) pins time for TTL,
//! breaker and limiter boundaries.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub use crate::clock::ManualClock;
use crate::error::LlmError;
use crate::llm::provider::{GenerateRequest, Generation, LlmProvider, ProviderKind};

/// One scripted result of a `generate()` call.
#[derive(Debug, Clone)]
pub enum StubOutcome {
    Reply(String),
    RateLimited(Option<Duration>),
    ServerError(u16),
    Timeout,
    AuthFailed,
    InvalidRequest,
    /// Never completes; only useful with timeouts or cancellation.
    Hang,
}

impl StubOutcome {
    fn into_result(self, provider: &str) -> Result<String, LlmError> {
        let provider = provider.to_string();
        match self {
            Self::Reply(text) => Ok(text),
            Self::RateLimited(retry_after) => Err(LlmError::RateLimited {
                provider,
                retry_after,
            }),
            Self::ServerError(status) => Err(LlmError::ServerError {
                provider,
                status: Some(status),
                reason: "stubbed server error".to_string(),
            }),
            Self::Timeout => Err(LlmError::Timeout {
                provider,
                timeout: Duration::from_secs(30),
            }),
            Self::AuthFailed => Err(LlmError::AuthFailed { provider }),
            Self::InvalidRequest => Err(LlmError::InvalidRequest {
                provider,
                reason: "stubbed invalid request".to_string(),
            }),
            // Handled by the caller before reaching here.
            Self::Hang => Err(LlmError::ServerError {
                provider,
                status: None,
                reason: "hang".to_string(),
            }),
        }
    }
}

/// Scripted [`LlmProvider`].
///
/// Outcomes queued with [`then`](Self::then) are consumed in order; once the
/// script runs dry every call gets the default outcome (a reply naming the
/// provider unless changed with [`otherwise`](Self::otherwise)).
pub struct StubProvider {
    id: String,
    kind: ProviderKind,
    model: String,
    cost: (Decimal, Decimal),
    delay: Option<Duration>,
    script: Mutex<VecDeque<StubOutcome>>,
    default: StubOutcome,
    calls: AtomicU32,
    last_request: Mutex<Option<GenerateRequest>>,
}

impl StubProvider {
    pub fn new(id: impl Into<String>, kind: ProviderKind) -> Self {
        let id = id.into();
        Self {
            model: format!("{id}-model"),
            default: StubOutcome::Reply(format!("reply from {id}")),
            id,
            kind,
            cost: (dec!(0.000001), dec!(0.000002)),
            delay: None,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_cost(mut self, input: Decimal, output: Decimal) -> Self {
        self.cost = (input, output);
        self
    }

    pub fn with_model_name(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sleep (tokio time) before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue an outcome for the next unscripted call.
    pub fn then(self, outcome: StubOutcome) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
        self
    }

    /// Queue the same outcome `n` times.
    pub fn then_n(mut self, n: u32, outcome: StubOutcome) -> Self {
        for _ in 0..n {
            self = self.then(outcome.clone());
        }
        self
    }

    /// Outcome once the script is exhausted.
    pub fn otherwise(mut self, outcome: StubOutcome) -> Self {
        self.default = outcome;
        self
    }

    /// Number of `generate()` calls so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_outcome(&self) -> StubOutcome {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4).max(1)
}

#[async_trait]
impl LlmProvider for StubProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        self.cost
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Generation, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.next_outcome();
        let input_tokens = estimate_tokens(&request.prompt);
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if matches!(outcome, StubOutcome::Hang) {
            std::future::pending::<()>().await;
        }

        let text = outcome.into_result(&self.id)?;
        Ok(Generation {
            output_tokens: estimate_tokens(&text),
            input_tokens,
            text,
        })
    }
}
