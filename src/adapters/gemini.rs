use crate::adapters::{http_client, rate_limit_error, GenerationDefaults};
use crate::config::toml_config::ModelConfig;
use crate::domain::model::{LlmRequest, LlmResponse, TokenUsage};
use crate::domain::ports::LlmClient;
use crate::utils::error::{Result, ReviewError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

const TOP_P: f32 = 0.95;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    response_mime_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
    include_thoughts: bool,
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
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: Option<u64>,
}

/// Gemini `generateContent` 用戶端，固定使用 JSON 輸出模式
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    defaults: GenerationDefaults,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, base_url: &str, model: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            defaults: GenerationDefaults::default(),
        })
    }

    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let mut client = Self::new(config.api_key()?, config.base_url(), &config.name)?;
        client.defaults = GenerationDefaults::from(config);
        Ok(client)
    }

    fn build_body(&self, request: &LlmRequest) -> GenerateContentRequest {
        let thinking_budget = request.thinking_budget.or(self.defaults.thinking_budget);
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(request.prompt.clone()),
                    thought: None,
                }],
            }],
            system_instruction: request.system.as_ref().map(|system| Content {
                role: None,
                parts: vec![Part {
                    text: Some(system.clone()),
                    thought: None,
                }],
            }),
            generation_config: GenerationConfig {
                temperature: request.temperature.or(self.defaults.temperature),
                top_p: TOP_P,
                max_output_tokens: request.max_tokens.or(self.defaults.max_tokens),
                response_mime_type: "application/json",
                response_schema: request.response_schema.clone(),
                thinking_config: thinking_budget.map(|budget| ThinkingConfig {
                    thinking_budget: budget,
                    include_thoughts: true,
                }),
            },
        }
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        tracing::debug!("Calling Gemini model {}", self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&self.build_body(request))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(rate_limit_error("gemini", response.headers()));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ReviewError::LlmError {
                provider: "gemini".to_string(),
                message: format!("HTTP {}: {}", status.as_u16(), error_text),
            });
        }

        let data: GenerateContentResponse = response.json().await?;
        let parts = data
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts)
            .unwrap_or_default();

        let mut text = String::new();
        let mut thinking = String::new();
        for part in parts {
            let Some(chunk) = part.text else { continue };
            if part.thought.unwrap_or(false) {
                thinking.push_str(&chunk);
            } else {
                text.push_str(&chunk);
            }
        }

        let usage = data.usage_metadata.unwrap_or_default();
        let input_tokens = usage.prompt_token_count;
        let output_tokens = usage.candidates_token_count;

        Ok(LlmResponse {
            text,
            thinking: (!thinking.is_empty()).then_some(thinking),
            usage: TokenUsage {
                input_tokens,
                output_tokens,
                total_tokens: usage
                    .total_token_count
                    .unwrap_or(input_tokens + output_tokens),
            },
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        "gemini"
    }
}
