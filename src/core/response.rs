use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").expect("fenced block pattern is valid")
});

/// 第一個 `{` 到最後一個 `}`
static BRACE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[\s\S]*\}").expect("brace span pattern is valid"));

/// 從模型輸出取出 JSON 物件：整段、```json 區塊、最外層大括號，依序嘗試
pub fn parse_json_response(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(block) = FENCED_JSON.captures(trimmed).and_then(|caps| caps.get(1)) {
        if let Ok(value) = serde_json::from_str::<Value>(block.as_str()) {
            return Some(value);
        }
    }

    let span = BRACE_SPAN.find(trimmed)?;
    serde_json::from_str::<Value>(span.as_str()).ok()
}

/// 取字串欄位；數字與布林轉成文字，null 與空字串視為缺值
pub fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let joined: Vec<String> = items.iter().filter_map(json_text).collect();
            (!joined.is_empty()).then(|| joined.join(", "))
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

pub fn field_text(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(json_text)
}

/// 字串陣列欄位，單一字串也接受
pub fn field_list(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(json_text).collect(),
        Some(other) => json_text(other).into_iter().collect(),
        None => Vec::new(),
    }
}

/// 截斷到指定字元數（非位元組）
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
