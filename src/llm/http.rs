//! HTTP plumbing shared by the backend adapters: client construction and
//! mapping transport/status failures into [`LlmError`].

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};

use crate::error::LlmError;

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Build a client with connect and total-request timeouts.
pub(crate) fn build_client(connect_timeout: Duration, request_timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            Client::new()
        })
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a non-success status to the error taxonomy.
///
/// 401/403 are credentials and 429 is backpressure. 408 and 5xx are
/// transient. Every other status (remaining 4xx, stray 3xx) will not change
/// on retry and is reported as an invalid request.
pub(crate) fn status_error(
    provider: &str,
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> LlmError {
    let provider = provider.to_string();
    match status.as_u16() {
        401 | 403 => LlmError::AuthFailed { provider },
        429 => LlmError::RateLimited {
            provider,
            retry_after,
        },
        code @ (408 | 500..=599) => LlmError::ServerError {
            provider,
            status: Some(code),
            reason: truncate(body).to_string(),
        },
        _ => LlmError::InvalidRequest {
            provider,
            reason: format!("HTTP {}: {}", status, truncate(body)),
        },
    }
}

/// Map a transport failure. Client-side timeouts become [`LlmError::Timeout`].
pub(crate) fn send_error(provider: &str, timeout: Duration, err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout {
            provider: provider.to_string(),
            timeout,
        }
    } else if err.is_connect() || err.is_request() {
        LlmError::ServerError {
            provider: provider.to_string(),
            status: None,
            reason: err.to_string(),
        }
    } else {
        LlmError::Http(err)
    }
}

/// Parse a success body, reporting malformed JSON against the provider.
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(
    provider: &str,
    body: &str,
) -> Result<T, LlmError> {
    serde_json::from_str(body).map_err(|e| LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: format!("JSON parse error: {}. Raw: {}", e, truncate(body)),
    })
}

/// Send a prepared request and return the body of a successful response.
pub(crate) async fn send(
    provider: &str,
    timeout: Duration,
    builder: reqwest::RequestBuilder,
) -> Result<String, LlmError> {
    let response = builder
        .send()
        .await
        .map_err(|e| send_error(provider, timeout, e))?;

    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let body = response
        .text()
        .await
        .map_err(|e| send_error(provider, timeout, e))?;

    tracing::debug!(provider, %status, "Provider response");
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!(provider, body = %body, "Provider response body");
    }

    if !status.is_success() {
        return Err(status_error(provider, status, retry_after, &body));
    }
    Ok(body)
}

fn truncate(body: &str) -> &str {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
