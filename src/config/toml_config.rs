use crate::utils::error::{Result, ReviewError};
use crate::utils::validation::{
    require_at_least, require_name, validate_base_url, validate_temperature, Validate,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    Anthropic,
}

impl Provider {
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Gemini => GEMINI_BASE_URL,
            Provider::Anthropic => ANTHROPIC_BASE_URL,
        }
    }
}

/// 單一模型的連線與生成參數
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: Provider,
    pub name: String,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub thinking_budget: Option<u32>,
    /// Layer 2 欄位前綴用的評審名稱（`L2_<label>_*`）
    pub label: Option<String>,
}

impl ModelConfig {
    pub fn new(provider: Provider, name: &str) -> Self {
        Self {
            provider,
            name: name.to_string(),
            api_key_env: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
            thinking_budget: None,
            label: None,
        }
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.provider.default_api_key_env())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// 從環境變數讀取 API key
    pub fn api_key(&self) -> Result<String> {
        let var = self.api_key_env();
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ReviewError::MissingConfigError {
                field: var.to_string(),
            }),
        }
    }

    fn validate_as(&self, field: &str) -> Result<()> {
        require_name(&format!("{}.name", field), &self.name)?;
        validate_base_url(&format!("{}.base_url", field), self.base_url())?;
        if let Some(temperature) = self.temperature {
            validate_temperature(&format!("{}.temperature", field), temperature)?;
        }
        if let (Some(budget), Some(max_tokens)) = (self.thinking_budget, self.max_tokens) {
            if budget >= max_tokens {
                return Err(ReviewError::ConfigValidationError {
                    field: format!("{}.thinking_budget", field),
                    message: format!(
                        "thinking budget {} must be lower than max_tokens {}",
                        budget, max_tokens
                    ),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub layer1: ModelConfig,
    pub layer2_primary: ModelConfig,
    pub layer2_secondary: ModelConfig,
    pub extraction: ModelConfig,
    pub validation: ModelConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let mut layer1 = ModelConfig::new(Provider::Gemini, "gemini-flash-latest");
        layer1.temperature = Some(0.0);

        let mut layer2_primary = ModelConfig::new(Provider::Gemini, "gemini-3-pro-preview");
        layer2_primary.temperature = Some(0.5);
        layer2_primary.label = Some("pro".to_string());

        let mut layer2_secondary =
            ModelConfig::new(Provider::Anthropic, "claude-sonnet-4-5-20250929");
        layer2_secondary.max_tokens = Some(16000);
        layer2_secondary.thinking_budget = Some(10000);
        layer2_secondary.label = Some("sonnet".to_string());

        let mut extraction = ModelConfig::new(Provider::Anthropic, "claude-sonnet-4-5-20250929");
        extraction.max_tokens = Some(8000);

        let mut validation = ModelConfig::new(Provider::Gemini, "gemini-3-pro-preview");
        validation.temperature = Some(0.0);

        Self {
            layer1,
            layer2_primary,
            layer2_secondary,
            extraction,
            validation,
        }
    }
}

/// 批次大小、批次間隔與重試次數（毫秒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    pub layer1_batch_size: usize,
    pub layer1_batch_delay_ms: u64,
    pub layer1_max_attempts: u32,
    pub layer1_retry_delay_ms: u64,
    pub layer2_batch_size: usize,
    pub layer2_batch_delay_ms: u64,
    pub layer2_max_attempts: u32,
    pub layer2_retry_delay_ms: u64,
    pub rescreen_batch_size: usize,
    pub rescreen_call_delay_ms: u64,
    pub rescreen_batch_delay_ms: u64,
    pub thinking_excerpt_chars: usize,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            layer1_batch_size: 50,
            layer1_batch_delay_ms: 1000,
            layer1_max_attempts: 3,
            layer1_retry_delay_ms: 2000,
            layer2_batch_size: 100,
            layer2_batch_delay_ms: 2000,
            layer2_max_attempts: 3,
            layer2_retry_delay_ms: 1000,
            rescreen_batch_size: 10,
            rescreen_call_delay_ms: 1000,
            rescreen_batch_delay_ms: 10000,
            thinking_excerpt_chars: 1000,
        }
    }
}

impl ScreeningConfig {
    /// 測試或離線重跑時關閉所有等待
    pub fn without_delays(mut self) -> Self {
        self.layer1_batch_delay_ms = 0;
        self.layer1_retry_delay_ms = 0;
        self.layer2_batch_delay_ms = 0;
        self.layer2_retry_delay_ms = 0;
        self.rescreen_call_delay_ms = 0;
        self.rescreen_batch_delay_ms = 0;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub quick_screen_max_tokens: u32,
    pub full_extraction_max_tokens: u32,
    pub rob_max_tokens: u32,
    pub overlap_check_max_tokens: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 2000,
            quick_screen_max_tokens: 2000,
            full_extraction_max_tokens: 8000,
            rob_max_tokens: 4000,
            overlap_check_max_tokens: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceConfig {
    /// 每百萬 input token 的美元價格
    pub input: f64,
    pub output: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub models: ModelsConfig,
    pub screening: ScreeningConfig,
    pub extraction: ExtractionConfig,
    pub pricing: HashMap<String, PriceConfig>,
}

impl ReviewConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(ReviewError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| ReviewError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${GEMINI_BASE_URL})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ReviewError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }
}

impl Validate for ReviewConfig {
    fn validate(&self) -> Result<()> {
        self.models.layer1.validate_as("models.layer1")?;
        self.models.layer2_primary.validate_as("models.layer2_primary")?;
        self.models.layer2_secondary.validate_as("models.layer2_secondary")?;
        self.models.extraction.validate_as("models.extraction")?;
        self.models.validation.validate_as("models.validation")?;

        if self.models.layer2_primary.label() == self.models.layer2_secondary.label() {
            return Err(ReviewError::ConfigValidationError {
                field: "models.layer2_secondary.label".to_string(),
                message: "the two Layer 2 judges need different labels".to_string(),
            });
        }

        let s = &self.screening;
        require_at_least("screening.layer1_batch_size", s.layer1_batch_size, 1)?;
        require_at_least("screening.layer2_batch_size", s.layer2_batch_size, 1)?;
        require_at_least("screening.rescreen_batch_size", s.rescreen_batch_size, 1)?;
        require_at_least(
            "screening.layer1_max_attempts",
            s.layer1_max_attempts as usize,
            1,
        )?;
        require_at_least(
            "screening.layer2_max_attempts",
            s.layer2_max_attempts as usize,
            1,
        )?;
        require_at_least(
            "extraction.max_attempts",
            self.extraction.max_attempts as usize,
            1,
        )?;

        for (model, price) in &self.pricing {
            if price.input < 0.0 || price.output < 0.0 {
                return Err(ReviewError::InvalidConfigValueError {
                    field: format!("pricing.{}", model),
                    value: format!("{}/{}", price.input, price.output),
                    reason: "prices cannot be negative".to_string(),
                });
            }
        }

        Ok(())
    }
}
