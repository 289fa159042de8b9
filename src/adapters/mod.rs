// Adapters layer: vendor HTTP clients behind the `LlmClient` port.

pub mod anthropic;
pub mod gemini;

use crate::config::toml_config::{ModelConfig, Provider};
use crate::domain::ports::LlmClient;
use crate::utils::error::{Result, ReviewError};
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// 模型設定中的生成參數，請求未指定時使用
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationDefaults {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub thinking_budget: Option<u32>,
}

impl From<&ModelConfig> for GenerationDefaults {
    fn from(config: &ModelConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            thinking_budget: config.thinking_budget,
        }
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// 429 回應轉成 RateLimited，`retry-after` 秒數不存在時為 0
pub(crate) fn rate_limit_error(provider: &str, headers: &HeaderMap) -> ReviewError {
    let retry_after_secs = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    ReviewError::RateLimited {
        provider: provider.to_string(),
        retry_after_ms: retry_after_secs * 1000,
    }
}

/// 依 provider 建立對應的用戶端
pub fn build_client(config: &ModelConfig) -> Result<Arc<dyn LlmClient>> {
    tracing::debug!(
        "Building {:?} client for model {}",
        config.provider,
        config.name
    );
    let client: Arc<dyn LlmClient> = match config.provider {
        Provider::Gemini => Arc::new(GeminiClient::from_config(config)?),
        Provider::Anthropic => Arc::new(AnthropicClient::from_config(config)?),
    };
    Ok(client)
}
