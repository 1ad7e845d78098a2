//! Anthropic Messages API provider.

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

const API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
    request_timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig, llm: &LlmConfig) -> Self {
        Self {
            client: http::build_client(llm.connect_timeout, llm.request_timeout),
            config,
            request_timeout: llm.request_timeout,
        }
    }

    fn url(&self) -> String {
        let base = self.config.base_url.as_deref().unwrap_or(API_BASE);
        format!("{}/v1/messages", base.trim_end_matches('/'))
    }
}

// -- Anthropic Messages API request/response types --

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

fn build_request(req: &GenerateRequest) -> MessagesRequest<'_> {
    MessagesRequest {
        model: &req.model,
        messages: vec![ApiMessage {
            role: "user",
            content: &req.prompt,
        }],
        max_tokens: req.max_tokens,
        temperature: req.temperature,
    }
}

fn into_generation(provider: &str, resp: MessagesResponse) -> Result<Generation, LlmError> {
    let text: String = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: "no text content in response".to_string(),
        });
    }
    Ok(Generation {
        text,
        input_tokens: resp.usage.input_tokens,
        output_tokens: resp.usage.output_tokens,
    })
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
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
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body);

        let text = http::send(self.id(), self.request_timeout, builder).await?;
        let resp: MessagesResponse = http::parse_body(self.id(), &text)?;
        into_generation(self.id(), resp)
    }
}
