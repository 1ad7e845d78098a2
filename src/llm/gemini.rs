//! Google Gemini `generateContent` provider.

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

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    client: Client,
    config: ProviderConfig,
    request_timeout: Duration,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig, llm: &LlmConfig) -> Self {
        Self {
            client: http::build_client(llm.connect_timeout, llm.request_timeout),
            config,
            request_timeout: llm.request_timeout,
        }
    }

    fn url(&self, model: &str) -> String {
        let base = self.config.base_url.as_deref().unwrap_or(API_BASE);
        format!("{}/models/{}:generateContent", base.trim_end_matches('/'), model)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

fn build_request(req: &GenerateRequest) -> GenerateContentRequest<'_> {
    GenerateContentRequest {
        contents: vec![Content {
            role: "user",
            parts: vec![RequestPart { text: &req.prompt }],
        }],
        generation_config: GenerationConfig {
            max_output_tokens: req.max_tokens,
            temperature: req.temperature,
        },
    }
}

fn into_generation(provider: &str, resp: GenerateContentResponse) -> Result<Generation, LlmError> {
    let Some(candidate) = resp.candidates.into_iter().next() else {
        return Err(LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: "no candidates in response".to_string(),
        });
    };
    // A safety block comes back as a candidate with no content.
    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(LlmError::InvalidRequest {
            provider: provider.to_string(),
            reason: "response blocked by safety filter".to_string(),
        });
    }
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: "candidate has no text".to_string(),
        });
    }
    let (input_tokens, output_tokens) = resp
        .usage_metadata
        .map(|u| (u.prompt_token_count, u.candidates_token_count))
        .unwrap_or((0, 0));
    Ok(Generation {
        text,
        input_tokens,
        output_tokens,
    })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
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
            .post(self.url(&request.model))
            .header("x-goog-api-key", self.config.api_key.expose_secret())
            .json(&body);

        let text = http::send(self.id(), self.request_timeout, builder).await?;
        let resp: GenerateContentResponse = http::parse_body(self.id(), &text)?;
        into_generation(self.id(), resp)
    }
}
