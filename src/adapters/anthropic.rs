use crate::adapters::{http_client, rate_limit_error, GenerationDefaults};
use crate::config::toml_config::ModelConfig;
use crate::domain::model::{LlmRequest, LlmResponse, TokenUsage};
use crate::domain::ports::LlmClient;
use crate::utils::error::{Result, ReviewError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Thinking {
    r#type: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Anthropic Messages API 用戶端，支援 extended thinking
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    defaults: GenerationDefaults,
}

impl AnthropicClient {
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

    fn build_body<'a>(&'a self, request: &'a LlmRequest) -> MessageRequest<'a> {
        let thinking_budget = request.thinking_budget.or(self.defaults.thinking_budget);
        let max_tokens = request
            .max_tokens
            .or(self.defaults.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        MessageRequest {
            model: &self.model,
            max_tokens,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
            system: request.system.as_deref(),
            // thinking 模式下 API 不接受自訂 temperature
            temperature: match thinking_budget {
                Some(_) => None,
                None => request.temperature.or(self.defaults.temperature),
            },
            thinking: thinking_budget.map(|budget| Thinking {
                r#type: "enabled",
                budget_tokens: budget,
            }),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        tracing::debug!("Calling Anthropic model {}", self.model);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&self.build_body(request))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(rate_limit_error("anthropic", response.headers()));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(ReviewError::LlmError {
                provider: "anthropic".to_string(),
                message: format!("HTTP {}: {}", status.as_u16(), message),
            });
        }

        let data: MessageResponse = response.json().await?;

        let mut text = None;
        let mut thinking = None;
        for block in data.content {
            match block {
                // 以最後一個 text block 為準
                ContentBlock::Text { text: t } => text = Some(t),
                ContentBlock::Thinking { thinking: t } => thinking = Some(t),
                ContentBlock::Other => {}
            }
        }

        Ok(LlmResponse {
            text: text.unwrap_or_default(),
            thinking,
            usage: TokenUsage {
                input_tokens: data.usage.input_tokens,
                output_tokens: data.usage.output_tokens,
                total_tokens: data.usage.input_tokens + data.usage.output_tokens,
            },
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        "anthropic"
    }
}
