use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// 一列 CSV 資料，所有欄位都以字串保存（空字串代表缺值）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub data: HashMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> &str {
        self.data.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.data.insert(key.to_string(), value.into());
    }

    pub fn set_opt(&mut self, key: &str, value: Option<&str>) {
        self.set(key, value.unwrap_or_default());
    }

    pub fn has_value(&self, key: &str) -> bool {
        !self.get(key).trim().is_empty()
    }
}

/// 帶欄位順序的表格，對應每個階段讀寫的 CSV
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub records: Vec<Record>,
}

impl Table {
    pub fn new<S: AsRef<str>>(headers: &[S]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.as_ref().to_string()).collect(),
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    /// 缺少的欄位附加在最後，既有欄位順序不變
    pub fn ensure_columns<S: AsRef<str>>(&mut self, columns: &[S]) {
        for column in columns {
            if !self.has_column(column.as_ref()) {
                self.headers.push(column.as_ref().to_string());
            }
        }
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn set_cell(&mut self, row: usize, column: &str, value: impl Into<String>) {
        if !self.has_column(column) {
            self.headers.push(column.to_string());
        }
        if let Some(record) = self.records.get_mut(row) {
            record.set(column, value);
        }
    }

    pub fn count_where(&self, column: &str, value: &str) -> usize {
        self.records.iter().filter(|r| r.get(column) == value).count()
    }

    pub fn count_non_empty(&self, column: &str) -> usize {
        self.records.iter().filter(|r| r.has_value(column)).count()
    }

    /// 依列索引取子表，只保留實際存在的欄位
    pub fn select(&self, rows: &[usize], columns: &[&str]) -> Table {
        let kept: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|c| self.has_column(c))
            .collect();
        let mut table = Table::new(&kept);
        for &row in rows {
            if let Some(record) = self.records.get(row) {
                let mut selected = Record::new();
                for column in &kept {
                    selected.set(column, record.get(column));
                }
                table.push(selected);
            }
        }
        table
    }
}

/// 階段輸出：主表、文字摘要與額外的報表檔
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub table: Table,
    pub summary: String,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Layer 1 只判斷是否排除
    Layer1Decision { Exclude => "exclude", Pass => "pass" }
);

string_enum!(
    Layer2Decision { Include => "include", Exclude => "exclude" }
);

string_enum!(
    Confidence { High => "high", Low => "low" }
);

string_enum!(
    CriterionStatus { Yes => "yes", Unclear => "unclear", No => "no" }
);

string_enum!(
    /// 合併階段的自動判定
    AutoDecision {
        Include => "include",
        Exclude => "exclude",
        Uncertain => "uncertain",
        Pending => "pending",
    }
);

string_enum!(
    ReviewPriority { None => "none", Low => "low", High => "high" }
);

/// 單次模型呼叫的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// 計費用輸出 token，包含思考 token
    pub fn billable_output(&self) -> u64 {
        self.total_tokens
            .saturating_sub(self.input_tokens)
            .max(self.output_tokens)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub response_schema: Option<serde_json::Value>,
    pub thinking_budget: Option<u32>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_thinking_budget(mut self, budget: Option<u32>) -> Self {
        self.thinking_budget = budget;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub thinking: Option<String>,
    pub usage: TokenUsage,
    pub model: String,
}

/// Layer 1 單筆結果
#[derive(Debug, Clone, PartialEq)]
pub struct ExclusionResult {
    pub decision: Layer1Decision,
    pub exclusion_tags: Vec<String>,
    pub evidence: Option<String>,
    pub reasoning: Option<String>,
    pub error: Option<String>,
    pub raw_response: Option<String>,
    pub usage: TokenUsage,
}

impl ExclusionResult {
    /// 失敗時預設放行，交給 Layer 2 判斷
    pub fn fallback(reasoning: Option<&str>, error: Option<String>) -> Self {
        Self {
            decision: Layer1Decision::Pass,
            exclusion_tags: Vec::new(),
            evidence: None,
            reasoning: reasoning.map(str::to_string),
            error,
            raw_response: None,
            usage: TokenUsage::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CriterionCheck {
    pub status: CriterionStatus,
    pub evidence: Option<String>,
}

impl Default for CriterionCheck {
    fn default() -> Self {
        Self {
            status: CriterionStatus::Unclear,
            evidence: None,
        }
    }
}

/// Layer 2 單一評審的結果
#[derive(Debug, Clone, PartialEq)]
pub struct InclusionResult {
    pub decision: Layer2Decision,
    pub confidence: Confidence,
    pub reasoning: Option<String>,
    pub inclusion_check: BTreeMap<String, CriterionCheck>,
    pub error: Option<String>,
    pub raw_response: Option<String>,
    pub thinking: Option<String>,
    pub usage: TokenUsage,
}

impl InclusionResult {
    /// 重試用盡時預設納入（低信心），所有條件標為 unclear
    pub fn fallback(reasoning: Option<&str>, error: String) -> Self {
        Self {
            decision: Layer2Decision::Include,
            confidence: Confidence::Low,
            reasoning: reasoning.map(str::to_string),
            inclusion_check: crate::domain::criteria::INCLUSION_TAGS
                .iter()
                .map(|(tag, _)| (tag.to_string(), CriterionCheck::default()))
                .collect(),
            error: Some(error),
            raw_response: None,
            thinking: None,
            usage: TokenUsage::default(),
        }
    }
}
