use crate::core::prompts::{layer1_prompt, layer1_schema, layer2_prompt, layer2_schema};
use crate::core::response::{field_list, field_text, truncate_chars};
use crate::core::retry::{generate_json_with_retry, has_decision, JsonCall, RetryPolicy, UsageTag};
use crate::core::usage::UsageLedger;
use crate::domain::criteria::INCLUSION_TAGS;
use crate::domain::model::{
    Confidence, CriterionCheck, CriterionStatus, ExclusionResult, InclusionResult,
    Layer1Decision, Layer2Decision, LlmRequest, Record, TokenUsage,
};
use crate::domain::ports::LlmClient;
use serde_json::Value;
use std::sync::Arc;

pub const L1_COLUMNS: &[&str] = &[
    "L1_decision",
    "L1_exclusion_tags",
    "L1_evidence",
    "L1_reasoning",
    "L1_error",
    "L1_timestamp",
    "L1_input_tokens",
    "L1_output_tokens",
    "L1_total_tokens",
];

pub const L2_SHARED_COLUMNS: &[&str] = &["L2_models_agree", "needs_human_review", "L2_timestamp"];

const RAW_ERROR_CHARS: usize = 200;

/// ISO-8601 本地時間（微秒精度）
pub fn iso_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

pub fn bool_text(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Layer 1：判斷單筆紀錄是否明確符合排除條件
pub async fn screen_exclusion(
    client: &dyn LlmClient,
    title: &str,
    abstract_text: &str,
    policy: &RetryPolicy,
    ledger: &UsageLedger,
    record_id: &str,
) -> ExclusionResult {
    if title.trim().is_empty() {
        return ExclusionResult::fallback(Some("No title available"), None);
    }

    let request = LlmRequest::new(layer1_prompt(title, abstract_text)).with_schema(layer1_schema());
    let context = format!("L1 record {}", record_id);

    let usage = UsageTag::new(ledger, "L1", Some(record_id));

    match generate_json_with_retry(client, &request, policy, &context, usage, has_decision).await {
        JsonCall::Parsed { value, response } => {
            let mut result = exclusion_from_json(&value);
            result.usage = response.usage;
            result
        }
        JsonCall::Unparseable { response } => {
            let mut result = ExclusionResult::fallback(
                Some("JSON parsing failed"),
                Some(format!(
                    "Invalid JSON: {}",
                    truncate_chars(&response.text, RAW_ERROR_CHARS)
                )),
            );
            result.usage = response.usage;
            result.raw_response = Some(response.text);
            result
        }
        JsonCall::Failed(e) => ExclusionResult::fallback(None, Some(e.to_string())),
    }
}

/// 缺欄位時：decision 值無法辨識則 pass、tags 為空
pub fn exclusion_from_json(value: &Value) -> ExclusionResult {
    ExclusionResult {
        decision: field_text(value, "decision")
            .and_then(|d| Layer1Decision::parse(&d))
            .unwrap_or(Layer1Decision::Pass),
        exclusion_tags: field_list(value, "exclusion_tags"),
        evidence: field_text(value, "evidence"),
        reasoning: field_text(value, "reasoning"),
        error: None,
        raw_response: None,
        usage: TokenUsage::default(),
    }
}

pub fn write_exclusion(record: &mut Record, result: &ExclusionResult) {
    record.set("L1_decision", result.decision.as_str());
    record.set("L1_exclusion_tags", result.exclusion_tags.join(", "));
    record.set_opt("L1_evidence", result.evidence.as_deref());
    record.set_opt("L1_reasoning", result.reasoning.as_deref());
    record.set_opt("L1_error", result.error.as_deref());
    record.set("L1_timestamp", iso_timestamp());
    record.set("L1_input_tokens", result.usage.input_tokens.to_string());
    record.set("L1_output_tokens", result.usage.output_tokens.to_string());
    record.set("L1_total_tokens", result.usage.total_tokens.to_string());
}

/// Layer 2 的一位評審
#[derive(Clone)]
pub struct Judge {
    pub client: Arc<dyn LlmClient>,
    pub label: String,
    /// 是否保存思考摘錄到 `L2_<label>_thinking`
    pub keep_thinking: bool,
}

impl Judge {
    pub fn new(client: Arc<dyn LlmClient>, label: &str, keep_thinking: bool) -> Self {
        Self {
            client,
            label: label.to_string(),
            keep_thinking,
        }
    }

    pub fn prefix(&self) -> String {
        judge_prefix(&self.label)
    }

    pub fn columns(&self) -> Vec<String> {
        let mut columns = judge_columns(&self.label);
        if self.keep_thinking {
            columns.push(format!("{}_thinking", self.prefix()));
        }
        columns
    }
}

pub fn judge_prefix(label: &str) -> String {
    format!("L2_{}", label)
}

/// `INC-1` → `inc1`
fn criterion_key(tag: &str) -> String {
    tag.to_lowercase().replace('-', "")
}

pub fn judge_columns(label: &str) -> Vec<String> {
    let prefix = judge_prefix(label);
    let mut columns: Vec<String> = [
        "decision",
        "confidence",
        "reasoning",
        "error",
        "input_tokens",
        "output_tokens",
        "total_tokens",
    ]
    .iter()
    .map(|c| format!("{}_{}", prefix, c))
    .collect();
    for (tag, _) in INCLUSION_TAGS {
        let key = criterion_key(tag);
        columns.push(format!("{}_{}_status", prefix, key));
        columns.push(format!("{}_{}_evidence", prefix, key));
    }
    columns
}

/// Layer 2：單一評審檢查五項納入條件
pub async fn verify_inclusion(
    judge: &Judge,
    title: &str,
    abstract_text: &str,
    policy: &RetryPolicy,
    ledger: &UsageLedger,
    record_id: &str,
) -> InclusionResult {
    let request = LlmRequest::new(layer2_prompt(title, abstract_text)).with_schema(layer2_schema());
    let context = format!("L2 {} record {}", judge.label, record_id);
    let client = judge.client.as_ref();

    let usage = UsageTag::new(ledger, "L2", Some(record_id));

    match generate_json_with_retry(client, &request, policy, &context, usage, has_decision).await {
        JsonCall::Parsed { value, response } => {
            let mut result = inclusion_from_json(&value);
            result.usage = response.usage;
            result.thinking = response.thinking;
            result
        }
        JsonCall::Unparseable { response } => {
            let mut result = InclusionResult::fallback(Some("Parsing failed"), "Max retries".to_string());
            result.usage = response.usage;
            result.raw_response = Some(response.text);
            result
        }
        JsonCall::Failed(e) => InclusionResult::fallback(None, e.to_string()),
    }
}

/// 缺欄位時：include / low，條件狀態 unclear
pub fn inclusion_from_json(value: &Value) -> InclusionResult {
    let checks = value.get("inclusion_check");
    let inclusion_check = INCLUSION_TAGS
        .iter()
        .map(|(tag, _)| {
            let entry = checks.and_then(|c| c.get(*tag));
            let check = CriterionCheck {
                status: entry
                    .and_then(|e| field_text(e, "status"))
                    .and_then(|s| CriterionStatus::parse(&s))
                    .unwrap_or(CriterionStatus::Unclear),
                evidence: entry.and_then(|e| field_text(e, "evidence")),
            };
            (tag.to_string(), check)
        })
        .collect();

    InclusionResult {
        decision: field_text(value, "decision")
            .and_then(|d| Layer2Decision::parse(&d))
            .unwrap_or(Layer2Decision::Include),
        confidence: field_text(value, "confidence")
            .and_then(|c| Confidence::parse(&c))
            .unwrap_or(Confidence::Low),
        reasoning: field_text(value, "reasoning"),
        inclusion_check,
        error: None,
        raw_response: None,
        thinking: None,
        usage: TokenUsage::default(),
    }
}

pub fn write_inclusion(record: &mut Record, judge: &Judge, result: &InclusionResult, thinking_chars: usize) {
    let prefix = judge.prefix();
    record.set(&format!("{}_decision", prefix), result.decision.as_str());
    record.set(&format!("{}_confidence", prefix), result.confidence.as_str());
    record.set_opt(&format!("{}_reasoning", prefix), result.reasoning.as_deref());
    record.set_opt(&format!("{}_error", prefix), result.error.as_deref());
    record.set(
        &format!("{}_input_tokens", prefix),
        result.usage.input_tokens.to_string(),
    );
    record.set(
        &format!("{}_output_tokens", prefix),
        result.usage.output_tokens.to_string(),
    );
    record.set(
        &format!("{}_total_tokens", prefix),
        result.usage.total_tokens.to_string(),
    );
    for (tag, _) in INCLUSION_TAGS {
        let key = criterion_key(tag);
        let check = result.inclusion_check.get(*tag).cloned().unwrap_or_default();
        record.set(&format!("{}_{}_status", prefix, key), check.status.as_str());
        record.set_opt(
            &format!("{}_{}_evidence", prefix, key),
            check.evidence.as_deref(),
        );
    }
    if judge.keep_thinking {
        let excerpt = result
            .thinking
            .as_deref()
            .map(|t| truncate_chars(t, thinking_chars))
            .unwrap_or_default();
        record.set(&format!("{}_thinking", prefix), excerpt);
    }
}

/// 依兩位評審目前的 decision 欄位重算一致性與是否需人工審查
pub fn write_agreement(record: &mut Record, primary_label: &str, secondary_label: &str) -> bool {
    let first = record
        .get(&format!("{}_decision", judge_prefix(primary_label)))
        .to_string();
    let second = record
        .get(&format!("{}_decision", judge_prefix(secondary_label)))
        .to_string();
    let agree = first == second;
    let any_include = first == Layer2Decision::Include.as_str()
        || second == Layer2Decision::Include.as_str();
    record.set("L2_models_agree", bool_text(agree));
    record.set("needs_human_review", bool_text(!agree || any_include));
    agree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::ScriptedLlm;
    use crate::core::usage::Pricing;
    use crate::utils::error::ReviewError;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy::linear(3, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_empty_title_skips_model_call() {
        let llm = ScriptedLlm::new("gemini-flash-latest");
        let ledger = UsageLedger::new(Pricing::default());

        let result = screen_exclusion(&llm, "  ", "abstract", &policy(), &ledger, "1").await;

        assert_eq!(result.decision, Layer1Decision::Pass);
        assert_eq!(result.reasoning.as_deref(), Some("No title available"));
        assert_eq!(llm.calls(), 0);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_exclusion_parsed_and_logged() {
        let llm = ScriptedLlm::new("gemini-flash-latest").respond(
            r#"{"decision": "exclude", "exclusion_tags": ["EXC-1"], "evidence": "porcine livers", "reasoning": "animal study"}"#,
        );
        let ledger = UsageLedger::new(Pricing::default());

        let result = screen_exclusion(&llm, "Porcine NMP", "", &policy(), &ledger, "9").await;

        assert_eq!(result.decision, Layer1Decision::Exclude);
        assert_eq!(result.exclusion_tags, vec!["EXC-1"]);
        assert_eq!(result.usage.total_tokens, 120);
        assert_eq!(ledger.call_count(), 1);
        assert!(llm.prompts()[0].contains("[No abstract available]"));
    }

    #[tokio::test]
    async fn test_invalid_json_defaults_to_pass_with_error() {
        let garbage = "x".repeat(300);
        let llm = ScriptedLlm::new("m")
            .respond(&garbage)
            .respond(&garbage)
            .respond(&garbage);
        let ledger = UsageLedger::new(Pricing::default());

        let result = screen_exclusion(&llm, "Title", "Abstract", &policy(), &ledger, "2").await;

        assert_eq!(result.decision, Layer1Decision::Pass);
        assert_eq!(result.reasoning.as_deref(), Some("JSON parsing failed"));
        assert_eq!(
            result.error.as_deref(),
            Some(format!("Invalid JSON: {}", "x".repeat(200)).as_str())
        );
    }

    #[tokio::test]
    async fn test_exclusion_without_decision_is_retried() {
        let llm = ScriptedLlm::new("gemini-flash-latest")
            .respond(r#"{"reasoning": "no decision key"}"#)
            .respond(r#"{"decision": "exclude", "exclusion_tags": ["EXC-3"], "reasoning": "review article"}"#);
        let ledger = UsageLedger::new(Pricing::default());

        let result = screen_exclusion(&llm, "Title", "Abstract", &policy(), &ledger, "4").await;

        assert_eq!(result.decision, Layer1Decision::Exclude);
        assert_eq!(result.error, None);
        assert_eq!(llm.calls(), 2);
        assert_eq!(ledger.call_count(), 2);
    }

    #[tokio::test]
    async fn test_exclusion_never_decided_falls_back_with_error() {
        let missing = r#"{"reasoning": "no decision key"}"#;
        let llm = ScriptedLlm::new("m").respond(missing).respond(missing).respond(missing);
        let ledger = UsageLedger::new(Pricing::default());

        let result = screen_exclusion(&llm, "Title", "Abstract", &policy(), &ledger, "6").await;

        assert_eq!(result.decision, Layer1Decision::Pass);
        assert_eq!(result.reasoning.as_deref(), Some("JSON parsing failed"));
        assert!(result.error.unwrap().starts_with("Invalid JSON: "));
        assert_eq!(ledger.call_count(), 3);
    }

    #[tokio::test]
    async fn test_transport_failure_records_error() {
        let llm = ScriptedLlm::new("m")
            .fail(ReviewError::LlmError {
                provider: "gemini".to_string(),
                message: "HTTP 503: unavailable".to_string(),
            })
            .fail(ReviewError::LlmError {
                provider: "gemini".to_string(),
                message: "HTTP 503: unavailable".to_string(),
            })
            .fail(ReviewError::LlmError {
                provider: "gemini".to_string(),
                message: "HTTP 503: unavailable".to_string(),
            });
        let ledger = UsageLedger::new(Pricing::default());

        let result = screen_exclusion(&llm, "Title", "Abstract", &policy(), &ledger, "3").await;

        assert_eq!(result.decision, Layer1Decision::Pass);
        assert!(result.error.unwrap().contains("HTTP 503"));
        assert_eq!(llm.calls(), 3);
    }

    #[test]
    fn test_exclusion_defaults_for_missing_fields() {
        let result = exclusion_from_json(&serde_json::json!({"reasoning": "?"}));
        assert_eq!(result.decision, Layer1Decision::Pass);
        assert!(result.exclusion_tags.is_empty());
    }

    #[test]
    fn test_inclusion_defaults_for_partial_checks() {
        let value = serde_json::json!({
            "inclusion_check": {
                "INC-1": {"status": "yes", "evidence": "propensity score matched"},
                "INC-3": {"status": "NO"}
            },
            "decision": "exclude"
        });

        let result = inclusion_from_json(&value);

        assert_eq!(result.decision, Layer2Decision::Exclude);
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.inclusion_check["INC-1"].status, CriterionStatus::Yes);
        assert_eq!(result.inclusion_check["INC-2"].status, CriterionStatus::Unclear);
        assert_eq!(result.inclusion_check["INC-3"].status, CriterionStatus::No);
        assert_eq!(result.inclusion_check["INC-3"].evidence, None);
    }

    #[tokio::test]
    async fn test_judge_unparseable_falls_back_to_include_low() {
        let llm: Arc<dyn LlmClient> = Arc::new(
            ScriptedLlm::new("claude-sonnet-4-5-20250929")
                .respond("no")
                .respond("still no")
                .respond("never"),
        );
        let judge = Judge::new(llm, "sonnet", true);
        let ledger = UsageLedger::new(Pricing::default());

        let result = verify_inclusion(&judge, "t", "a", &policy(), &ledger, "5").await;

        assert_eq!(result.decision, Layer2Decision::Include);
        assert_eq!(result.reasoning.as_deref(), Some("Parsing failed"));
        assert_eq!(result.error.as_deref(), Some("Max retries"));
        assert_eq!(ledger.call_count(), 3);
    }

    #[tokio::test]
    async fn test_judge_retries_reply_without_decision() {
        let llm: Arc<dyn LlmClient> = Arc::new(
            ScriptedLlm::new("gemini-3-pro-preview")
                .respond(r#"{"confidence": "high", "inclusion_check": {}}"#)
                .respond(r#"{"decision": "exclude", "confidence": "high"}"#),
        );
        let judge = Judge::new(llm, "pro", false);
        let ledger = UsageLedger::new(Pricing::default());

        let result = verify_inclusion(&judge, "t", "a", &policy(), &ledger, "8").await;

        assert_eq!(result.decision, Layer2Decision::Exclude);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.error, None);
        assert_eq!(ledger.call_count(), 2);
    }

    #[tokio::test]
    async fn test_judge_never_decided_hits_max_retries() {
        let missing = r#"{"reasoning": "unsure"}"#;
        let llm: Arc<dyn LlmClient> =
            Arc::new(ScriptedLlm::new("m").respond(missing).respond(missing).respond(missing));
        let judge = Judge::new(llm, "pro", false);
        let ledger = UsageLedger::new(Pricing::default());

        let result = verify_inclusion(&judge, "t", "a", &policy(), &ledger, "9").await;

        assert_eq!(result.decision, Layer2Decision::Include);
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.error.as_deref(), Some("Max retries"));
    }

    #[test]
    fn test_write_inclusion_columns() {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new("m"));
        let judge = Judge::new(llm, "sonnet", true);
        let mut result = inclusion_from_json(&serde_json::json!({
            "decision": "include",
            "confidence": "high",
            "inclusion_check": {"INC-5": {"status": "yes", "evidence": "DCD donors"}}
        }));
        result.thinking = Some("t".repeat(1500));

        let mut record = Record::new();
        write_inclusion(&mut record, &judge, &result, 1000);

        assert_eq!(record.get("L2_sonnet_decision"), "include");
        assert_eq!(record.get("L2_sonnet_inc5_status"), "yes");
        assert_eq!(record.get("L2_sonnet_inc5_evidence"), "DCD donors");
        assert_eq!(record.get("L2_sonnet_inc1_status"), "unclear");
        assert_eq!(record.get("L2_sonnet_thinking").len(), 1000);
        assert_eq!(judge.columns().len(), 18);
    }

    #[test]
    fn test_agreement_and_review_flag() {
        let mut record = Record::new();
        record.set("L2_pro_decision", "exclude");
        record.set("L2_sonnet_decision", "exclude");
        assert!(write_agreement(&mut record, "pro", "sonnet"));
        assert_eq!(record.get("needs_human_review"), "False");

        record.set("L2_sonnet_decision", "include");
        assert!(!write_agreement(&mut record, "pro", "sonnet"));
        assert_eq!(record.get("L2_models_agree"), "False");
        assert_eq!(record.get("needs_human_review"), "True");

        record.set("L2_pro_decision", "include");
        assert!(write_agreement(&mut record, "pro", "sonnet"));
        assert_eq!(record.get("needs_human_review"), "True");
    }
}
