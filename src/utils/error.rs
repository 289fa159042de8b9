use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid configuration for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("{provider} API error: {message}")]
    LlmError { provider: String, message: String },

    #[error("{provider} rate limited, retry after {retry_after_ms}ms")]
    RateLimited { provider: String, retry_after_ms: u64 },

    #[error("Could not parse model response: {message}")]
    ResponseParseError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

/// 錯誤類別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Data,
    Io,
    Configuration,
    Model,
}

/// 錯誤嚴重程度，決定 CLI 的退出碼
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ReviewError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ReviewError::ApiError(_) => ErrorCategory::Network,
            ReviewError::CsvError(_)
            | ReviewError::SerializationError(_)
            | ReviewError::ProcessingError { .. }
            | ReviewError::ValidationError { .. } => ErrorCategory::Data,
            ReviewError::IoError(_) => ErrorCategory::Io,
            ReviewError::ConfigError { .. }
            | ReviewError::ConfigValidationError { .. }
            | ReviewError::InvalidConfigValueError { .. }
            | ReviewError::MissingConfigError { .. } => ErrorCategory::Configuration,
            ReviewError::LlmError { .. }
            | ReviewError::RateLimited { .. }
            | ReviewError::ResponseParseError { .. } => ErrorCategory::Model,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ReviewError::RateLimited { .. } | ReviewError::ApiError(_) => ErrorSeverity::Medium,
            ReviewError::ResponseParseError { .. } | ReviewError::LlmError { .. } => {
                ErrorSeverity::Medium
            }
            ReviewError::CsvError(_)
            | ReviewError::SerializationError(_)
            | ReviewError::ProcessingError { .. }
            | ReviewError::ValidationError { .. } => ErrorSeverity::High,
            ReviewError::IoError(_)
            | ReviewError::ConfigError { .. }
            | ReviewError::ConfigValidationError { .. }
            | ReviewError::InvalidConfigValueError { .. }
            | ReviewError::MissingConfigError { .. } => ErrorSeverity::Critical,
        }
    }

    /// 呼叫端是否值得重試
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReviewError::ApiError(_)
                | ReviewError::RateLimited { .. }
                | ReviewError::LlmError { .. }
                | ReviewError::ResponseParseError { .. }
        )
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            ReviewError::ApiError(_) => {
                "Check network connectivity and the model endpoint, then rerun; finished batches are kept in the checkpoint".to_string()
            }
            ReviewError::RateLimited { .. } => {
                "Lower --batch or raise the batch delay in the config file".to_string()
            }
            ReviewError::LlmError { provider, .. } => {
                format!("Verify the {} API key and model name", provider)
            }
            ReviewError::ResponseParseError { .. } => {
                "Rerun the stage; unparseable responses are retried and recorded in the *_error column".to_string()
            }
            ReviewError::CsvError(_) => {
                "Make sure the input CSV was produced by the previous stage and is not open in another program".to_string()
            }
            ReviewError::IoError(_) => "Check that the file exists and is writable".to_string(),
            ReviewError::SerializationError(_) => {
                "Inspect the JSON payload for malformed content".to_string()
            }
            ReviewError::MissingConfigError { field } => {
                format!("Set {} (environment variable or config file)", field)
            }
            ReviewError::ConfigError { .. }
            | ReviewError::ConfigValidationError { .. }
            | ReviewError::InvalidConfigValueError { .. } => {
                "Review the configuration file and command line flags".to_string()
            }
            ReviewError::ProcessingError { .. } | ReviewError::ValidationError { .. } => {
                "Run the earlier pipeline stages first and check their output".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Network => format!("Could not reach the model API: {}", self),
            ErrorCategory::Model => format!("The model call failed: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Io => format!("File access failed: {}", self),
            ErrorCategory::Data => format!("Data problem: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReviewError>;
