use crate::utils::error::{Result, ReviewError};
use std::path::Path;
use url::Url;

/// 含兩端點
const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);

/// 設定載入後、執行前呼叫
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field: &str, value: impl ToString, reason: impl Into<String>) -> ReviewError {
    ReviewError::InvalidConfigValueError {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// 模型端點只接受 http / https
pub fn validate_base_url(field: &str, base_url: &str) -> Result<()> {
    if base_url.trim().is_empty() {
        return Err(invalid(field, base_url, "model endpoint is not set"));
    }
    let url = Url::parse(base_url)
        .map_err(|e| invalid(field, base_url, format!("model endpoint is not a URL: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(
            field,
            base_url,
            format!("model endpoint must use http or https, got {}", url.scheme()),
        ));
    }
    Ok(())
}

pub fn require_name(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field, value, "model name is blank"));
    }
    Ok(())
}

/// 批次大小、重試次數等計數
pub fn require_at_least(field: &str, count: usize, min: usize) -> Result<()> {
    if count < min {
        return Err(invalid(field, count, format!("needs at least {}", min)));
    }
    Ok(())
}

pub fn validate_temperature(field: &str, temperature: f32) -> Result<()> {
    let (low, high) = TEMPERATURE_RANGE;
    if !(low..=high).contains(&temperature) {
        return Err(invalid(
            field,
            temperature,
            format!("sampling temperature must be within {}..={}", low, high),
        ));
    }
    Ok(())
}

/// 論文與補充資料只讀純文字；副檔名不分大小寫
pub fn validate_paper_files(field: &str, files: &[String], extensions: &[&str]) -> Result<()> {
    for file in files {
        let extension = Path::new(file)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension {
            Some(ext) if extensions.contains(&ext.as_str()) => {}
            Some(ext) => {
                return Err(invalid(
                    field,
                    file,
                    format!(".{} papers are not readable, convert to {}", ext, extensions.join(" or ")),
                ))
            }
            None => return Err(invalid(field, file, "paper file has no extension")),
        }
    }
    Ok(())
}
