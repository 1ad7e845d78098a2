//! Post-success normalization of provider output.
//!
//! Content checks that belong to the domain layer (date sanity, duplicate
//! detection, safety filtering) plug in through [`ResponseNormalizer`]; the
//! router only guarantees that what it caches and returns went through it.

use crate::error::LlmError;
use crate::llm::request::OperationType;

/// Turns raw provider text into the text handed back to callers.
///
/// Returning [`LlmError::InvalidResponse`] marks the attempt as a failed,
/// retryable call against that provider.
pub trait ResponseNormalizer: Send + Sync {
    fn normalize(
        &self,
        operation: OperationType,
        provider: &str,
        raw: &str,
    ) -> Result<String, LlmError>;
}

/// Trims whitespace, unwraps Markdown code fences for JSON-producing
/// operations and rejects blank answers.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultNormalizer;

impl ResponseNormalizer for DefaultNormalizer {
    fn normalize(
        &self,
        operation: OperationType,
        provider: &str,
        raw: &str,
    ) -> Result<String, LlmError> {
        let trimmed = raw.trim();
        let text = if operation.expects_json() {
            strip_code_fence(trimmed)
        } else {
            trimmed
        };

        if text.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: provider.to_string(),
                reason: format!("empty response for {operation}"),
            });
        }
        Ok(text.to_string())
    }
}

/// Extract the body of a fenced block (```` ```json ... ``` ```` or a bare
/// fence). Text without a leading fence is returned unchanged.
pub fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. "json") up to the first newline.
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}
