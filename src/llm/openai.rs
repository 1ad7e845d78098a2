//! OpenAI Chat Completions provider.
//!
//! Also talks to any OpenAI-compatible server (vLLM, LiteLLM, Ollama, ...)
//! when `OPENAI_BASE_URL` points elsewhere.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::{LlmConfig, ProviderConfig};
use crate::error::LlmError;
use crate::llm::costs;
use crate::llm::http;
use crate::llm::provider::{GenerateRequest, Generation, LlmProvider, ProviderKind};

const API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
    request_timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig, llm: &LlmConfig) -> Self {
        Self {
            client: http::build_client(llm.connect_timeout, llm.request_timeout),
            config,
            request_timeout: llm.request_timeout,
        }
    }

    fn url(&self) -> String {
        let base = self.config.base_url.as_deref().unwrap_or(API_BASE);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

fn build_request(req: &GenerateRequest) -> ChatRequest<'_> {
    ChatRequest {
        model: &req.model,
        messages: vec![ChatMessage {
            role: "user",
            content: &req.prompt,
        }],
        max_tokens: req.max_tokens,
        temperature: req.temperature,
    }
}

fn into_generation(provider: &str, resp: ChatResponse) -> Result<Generation, LlmError> {
    let text = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: "no message content in response".to_string(),
        })?;
    let (input_tokens, output_tokens) = resp
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));
    Ok(Generation {
        text,
        input_tokens,
        output_tokens,
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        costs::model_cost_or_default(&self.config.model)
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Generation, LlmError> {
        let body = build_request(&request);
        let builder = self
            .client
            .post(self.url())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body);

        let text = http::send(self.id(), self.request_timeout, builder).await?;
        let resp: ChatResponse = http::parse_body(self.id(), &text)?;
        into_generation(self.id(), resp)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn request_serialization() {
        let req = GenerateRequest::new("Summarize", "gpt-4o-mini").with_max_tokens(64);
        let json = serde_json::to_value(build_request(&req)).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["max_tokens"], 64);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Summarize");
    }

    #[test]
    fn first_choice_and_usage_are_extracted() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "{\"intent\":\"x\"}"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 20, "completion_tokens": 5, "total_tokens": 25}
        }"#;
        let resp: ChatResponse = http::parse_body("openai", raw).unwrap();
        let generation = into_generation("openai", resp).unwrap();
        assert_eq!(generation.text, "{\"intent\":\"x\"}");
        assert_eq!((generation.input_tokens, generation.output_tokens), (20, 5));
    }

    #[test]
    fn missing_usage_counts_zero_tokens() {
        let raw = r#"{"choices": [{"message": {"content": "hi"}}]}"#;
        let resp: ChatResponse = http::parse_body("compat", raw).unwrap();
        let generation = into_generation("compat", resp).unwrap();
        assert_eq!((generation.input_tokens, generation.output_tokens), (0, 0));
    }

    #[test]
    fn empty_choices_is_invalid() {
        let resp: ChatResponse = http::parse_body("openai", r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            into_generation("openai", resp),
            Err(LlmError::InvalidResponse { .. })
        ));
    }
}
