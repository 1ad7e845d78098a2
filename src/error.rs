//! Error types for the AI routing engine.

use std::time::Duration;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Routing error: {0}")]
    Route(#[from] RouteError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheIoError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a single provider call, normalized across backends.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} rejected the request: {reason}")]
    InvalidRequest { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} server error (status {status:?}): {reason}")]
    ServerError {
        provider: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether a retry (same provider, after backoff) could plausibly succeed.
    ///
    /// Validation and auth failures will not change on retry; everything that
    /// signals backpressure or a transient backend fault will.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::InvalidRequest { .. } | LlmError::AuthFailed { .. } => false,
            LlmError::RateLimited { .. }
            | LlmError::ServerError { .. }
            | LlmError::Timeout { .. }
            | LlmError::InvalidResponse { .. } => true,
            LlmError::Http(e) => !e.is_builder() && !e.is_decode(),
            LlmError::Json(_) => true,
        }
    }

    /// Server-suggested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Pipeline stage at which a route request terminally failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStage {
    /// The request itself was rejected before any provider was considered.
    Validation,
    /// No provider in the fallback chain admitted the request.
    Admission,
    /// A provider was called and failed.
    Provider,
    /// A provider answered but the answer could not be normalized.
    Normalization,
}

impl std::fmt::Display for RouteStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Admission => write!(f, "admission"),
            Self::Provider => write!(f, "provider"),
            Self::Normalization => write!(f, "normalization"),
        }
    }
}

/// Typed terminal error returned by [`crate::llm::Router::route`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("Invalid request: {reason}")]
    Validation { reason: String },

    #[error("Credentials rejected by provider {provider}")]
    Auth { provider: String },

    #[error("Provider {provider} is applying backpressure, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} failed: {reason}")]
    TransientServer {
        provider: String,
        reason: String,
        stage: RouteStage,
    },

    #[error("All providers unavailable (tried: {attempted:?}){}", last_error_suffix(.last_error))]
    AllProvidersUnavailable {
        attempted: Vec<String>,
        last_error: Option<String>,
    },

    #[error("Request cancelled by caller")]
    Cancelled,
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(": {e}"))
        .unwrap_or_default()
}

impl RouteError {
    /// Stage of the pipeline that produced this error.
    pub fn stage(&self) -> RouteStage {
        match self {
            RouteError::Validation { .. } => RouteStage::Validation,
            RouteError::Auth { .. } | RouteError::RateLimited { .. } => RouteStage::Provider,
            RouteError::TransientServer { stage, .. } => *stage,
            RouteError::AllProvidersUnavailable { .. } | RouteError::Cancelled => {
                RouteStage::Admission
            }
        }
    }

    /// Whether the caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            RouteError::Validation { .. } | RouteError::Auth { .. } => false,
            RouteError::RateLimited { .. }
            | RouteError::TransientServer { .. }
            | RouteError::AllProvidersUnavailable { .. }
            | RouteError::Cancelled => true,
        }
    }

    /// Short machine-readable label, used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RouteError::Validation { .. } => "validation",
            RouteError::Auth { .. } => "auth",
            RouteError::RateLimited { .. } => "rate_limited",
            RouteError::TransientServer { .. } => "transient_server",
            RouteError::AllProvidersUnavailable { .. } => "all_providers_unavailable",
            RouteError::Cancelled => "cancelled",
        }
    }

    /// Lift a provider-level error into the terminal taxonomy.
    ///
    /// `provider` is the id of the provider that was called. Transport
    /// errors that [`LlmError::is_retryable`] rejects (malformed requests,
    /// undecodable bodies) become `Validation` so they skip retry and
    /// fallback.
    pub fn from_llm(provider: &str, err: LlmError) -> Self {
        match err {
            LlmError::InvalidRequest { provider, reason } => RouteError::Validation {
                reason: format!("{provider}: {reason}"),
            },
            LlmError::AuthFailed { provider } => RouteError::Auth { provider },
            LlmError::RateLimited {
                provider,
                retry_after,
            } => RouteError::RateLimited {
                provider,
                retry_after,
            },
            LlmError::InvalidResponse { provider, reason } => RouteError::TransientServer {
                provider,
                reason,
                stage: RouteStage::Normalization,
            },
            other if !other.is_retryable() => RouteError::Validation {
                reason: format!("{provider}: {other}"),
            },
            other => RouteError::TransientServer {
                provider: provider.to_string(),
                reason: other.to_string(),
                stage: RouteStage::Provider,
            },
        }
    }
}

/// Durable cache tier failures. Logged and absorbed by the cache; never
/// surfaced through `route()`.
#[derive(Debug, thiserror::Error)]
pub enum CacheIoError {
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "libsql")]
impl From<libsql::Error> for CacheIoError {
    fn from(e: libsql::Error) -> Self {
        CacheIoError::Backend(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(
            LlmError::RateLimited {
                provider: "p".into(),
                retry_after: None,
            }
            .is_retryable()
        );
        assert!(
            LlmError::ServerError {
                provider: "p".into(),
                status: Some(503),
                reason: "unavailable".into(),
            }
            .is_retryable()
        );
        assert!(
            LlmError::Timeout {
                provider: "p".into(),
                timeout: Duration::from_secs(1),
            }
            .is_retryable()
        );

        assert!(
            !LlmError::AuthFailed {
                provider: "p".into()
            }
            .is_retryable()
        );
        assert!(
            !LlmError::InvalidRequest {
                provider: "p".into(),
                reason: "bad".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn from_llm_preserves_taxonomy() {
        let err = RouteError::from_llm("anthropic", LlmError::AuthFailed {
            provider: "anthropic".into(),
        });
        assert!(matches!(err, RouteError::Auth { ref provider } if provider == "anthropic"));
        assert!(!err.is_retryable());

        let err = RouteError::from_llm("openai", LlmError::Timeout {
            provider: "openai".into(),
            timeout: Duration::from_secs(30),
        });
        assert_eq!(err.stage(), RouteStage::Provider);
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "transient_server");

        let err = RouteError::from_llm("gemini", LlmError::InvalidResponse {
            provider: "gemini".into(),
            reason: "empty".into(),
        });
        assert_eq!(err.stage(), RouteStage::Normalization);
    }

    #[test]
    fn non_retryable_transport_errors_become_validation() {
        let builder = reqwest::Client::new().get("not a url").build().unwrap_err();
        let llm = LlmError::Http(builder);
        assert!(!llm.is_retryable());

        let err = RouteError::from_llm("openai", llm);
        assert!(matches!(err, RouteError::Validation { ref reason } if reason.starts_with("openai:")));
        assert!(!err.is_retryable());

        let json = serde_json::from_str::<u32>("not json").unwrap_err();
        let err = RouteError::from_llm("gemini", LlmError::Json(json));
        assert!(matches!(err, RouteError::TransientServer { ref provider, .. } if provider == "gemini"));
    }

    #[test]
    fn all_unavailable_message_includes_last_error() {
        let err = RouteError::AllProvidersUnavailable {
            attempted: vec!["a".into(), "b".into()],
            last_error: Some("circuit open".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("circuit open"));
        assert_eq!(err.stage(), RouteStage::Admission);
    }
}
