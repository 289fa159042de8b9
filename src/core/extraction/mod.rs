pub mod cohort;
pub mod prompts;
pub mod sheets;

use crate::config::toml_config::ExtractionConfig;
use crate::core::response::json_text;
use crate::core::retry::{any_json, generate_json_with_retry, JsonCall, RetryPolicy, UsageTag};
use crate::core::table::{read_table, write_table};
use crate::core::usage::UsageLedger;
use crate::domain::model::LlmRequest;
use crate::domain::ports::{LlmClient, Storage};
use crate::utils::error::{Result, ReviewError};
use cohort::{CohortTracker, DuplicateMatch, TrackingOutcome};
use serde::Serialize;
use serde_json::{json, Value};
use sheets::SheetRow;
use std::sync::Arc;
use std::time::Duration;

pub const PAPER_EXTENSIONS: &[&str] = &["txt", "md"];

const SUPPLEMENT_RULE_WIDTH: usize = 60;
const REVISE_RECOMMENDATION: &str = "Revise extraction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StudyType {
    #[serde(rename = "RCT")]
    Rct,
    #[serde(rename = "NRS")]
    Nrs,
}

impl StudyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudyType::Rct => "RCT",
            StudyType::Nrs => "NRS",
        }
    }

    /// 設計描述有內容且不含 RCT / RANDOM 才視為非隨機研究
    pub fn from_design(design: &str) -> Self {
        let upper = design.to_uppercase();
        if !design.trim().is_empty() && !upper.contains("RCT") && !upper.contains("RANDOM") {
            StudyType::Nrs
        } else {
            StudyType::Rct
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    Complete,
    QuickOnly,
    Error,
}

impl PaperStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperStatus::Complete => "complete",
            PaperStatus::QuickOnly => "quick_only",
            PaperStatus::Error => "error",
        }
    }
}

/// 單篇論文的處理結果（`--json` 原樣輸出）
#[derive(Debug, Clone, Serialize)]
pub struct PaperResult {
    pub file: String,
    pub status: PaperStatus,
    pub study_id: Option<String>,
    pub study_type: Option<StudyType>,
    pub quick_screen: Value,
    pub full_extraction: Value,
    pub rob_information: Value,
    pub validation: Option<Value>,
    pub needs_review: bool,
    pub tracking: Option<TrackingOutcome>,
    pub overlap_checks: Vec<Value>,
    pub error: Option<String>,
}

impl PaperResult {
    fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            status: PaperStatus::Error,
            study_id: None,
            study_type: None,
            quick_screen: Value::Null,
            full_extraction: Value::Null,
            rob_information: Value::Null,
            validation: None,
            needs_review: false,
            tracking: None,
            overlap_checks: Vec::new(),
            error: None,
        }
    }

    pub fn failed(file: &str, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(file)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    pub quick_only: bool,
    pub include_rob: bool,
    pub validate: bool,
    pub output_dir: String,
    pub tracking_dir: Option<String>,
}

pub fn is_paper_file(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| PAPER_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn file_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// 主文與補充資料合併；補充檔讀取失敗只記警告
pub async fn read_paper<S: Storage>(storage: &S, path: &str, supplementary: &[String]) -> Result<String> {
    let bytes = storage.read_file(path).await?;
    let mut content = String::from_utf8_lossy(&bytes).into_owned();
    tracing::info!("📄 Read {} characters from {}", content.chars().count(), file_name(path));

    for supplement in supplementary {
        match storage.read_file(supplement).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let rule = "=".repeat(SUPPLEMENT_RULE_WIDTH);
                content.push_str(&format!(
                    "\n\n{rule}\nSUPPLEMENTARY MATERIAL: {}\n{rule}\n\n",
                    file_name(supplement)
                ));
                content.push_str(&text);
                tracing::info!(
                    "   + Added {} characters from {}",
                    text.chars().count(),
                    file_name(supplement)
                );
            }
            Err(e) => tracing::warn!("⚠️ Could not read {}: {}", supplement, e),
        }
    }
    Ok(content)
}

/// 附加一列到 `<dir>/<sheet>.csv`，既有檔案保留原有列
pub async fn append_sheet<S: Storage>(storage: &S, dir: &str, sheet: &str, row: SheetRow) -> Result<()> {
    let path = format!("{}/{}.csv", dir.trim_end_matches('/'), sheet);
    let mut table = if storage.exists(&path).await {
        read_table(storage, &path).await?
    } else {
        crate::domain::model::Table::new(&row.headers)
    };
    table.ensure_columns(&row.headers);
    table.push(row.record);
    write_table(storage, &path, &table).await
}

/// 全文萃取：快篩 → 完整萃取 → RoB → 驗證 → 寫入工作表與追蹤檔
pub struct PaperExtractor {
    client: Arc<dyn LlmClient>,
    validator: Option<Arc<dyn LlmClient>>,
    ledger: Arc<UsageLedger>,
    config: ExtractionConfig,
    policy: RetryPolicy,
}

impl PaperExtractor {
    pub fn new(
        client: Arc<dyn LlmClient>,
        validator: Option<Arc<dyn LlmClient>>,
        ledger: Arc<UsageLedger>,
        config: ExtractionConfig,
    ) -> Self {
        let policy = RetryPolicy::linear(
            config.max_attempts,
            Duration::from_millis(config.retry_delay_ms),
        );
        Self {
            client,
            validator,
            ledger,
            config,
            policy,
        }
    }

    /// 無法解析的回應保留原文，流程照常往下
    async fn call_json(
        &self,
        client: &dyn LlmClient,
        prompt: String,
        max_tokens: u32,
        step: &str,
        file: &str,
    ) -> Result<Value> {
        let request = LlmRequest::new(prompt).with_max_tokens(max_tokens);
        let context = format!("{} {}", step, file);
        let usage = UsageTag::new(&self.ledger, step, Some(file));
        match generate_json_with_retry(client, &request, &self.policy, &context, usage, any_json).await {
            JsonCall::Parsed { value, .. } => Ok(value),
            JsonCall::Unparseable { response } => {
                tracing::warn!("⚠️ {} for {} returned no parseable JSON", step, file);
                Ok(json!({
                    "raw_response": response.text,
                    "parse_error": "no JSON object found in response",
                }))
            }
            JsonCall::Failed(e) => Err(e),
        }
    }

    pub async fn process<S: Storage>(
        &self,
        storage: &S,
        file: &str,
        paper: &str,
        options: &ExtractionOptions,
    ) -> Result<PaperResult> {
        let mut result = PaperResult::new(file);

        tracing::info!("🔎 [1/3] Quick screening {}", file);
        let quick = self
            .call_json(
                self.client.as_ref(),
                prompts::quick_screen_prompt(paper),
                self.config.quick_screen_max_tokens,
                "quick_screen",
                file,
            )
            .await?;
        let field = |key: &str| quick.get(key).and_then(json_text).unwrap_or_else(|| "Unknown".to_string());
        tracing::info!(
            "   → Study: {} | Design: {} | Intervention: {}",
            field("study_id"),
            field("design"),
            field("intervention")
        );
        if let Some(concerns) = quick.get("concerns").and_then(json_text) {
            tracing::warn!("⚠️ Concerns: {}", concerns);
        }
        result.study_id = quick.get("study_id").and_then(json_text);
        result.quick_screen = quick;

        if options.quick_only {
            result.status = PaperStatus::QuickOnly;
            return Ok(result);
        }

        tracing::info!("📑 [2/3] Full data extraction {}", file);
        let full = self
            .call_json(
                self.client.as_ref(),
                prompts::full_extraction_prompt(paper),
                self.config.full_extraction_max_tokens,
                "full_extraction",
                file,
            )
            .await?;

        let characteristics = full.get("study_characteristics").filter(|c| c.is_object());
        let design = match characteristics {
            Some(c) => c.get("study_design").and_then(json_text),
            None => full
                .get("study_design")
                .or_else(|| full.get("design"))
                .and_then(json_text),
        }
        .unwrap_or_default();
        let study_type = StudyType::from_design(&design);
        let study_id = characteristics
            .unwrap_or(&full)
            .get("study_id")
            .and_then(json_text)
            .or_else(|| result.study_id.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        let rob = if options.include_rob {
            tracing::info!("⚖️ [3/3] RoB extraction ({}) {}", study_type.as_str(), file);
            self.call_json(
                self.client.as_ref(),
                prompts::rob_prompt(paper, study_type),
                self.config.rob_max_tokens,
                "rob",
                file,
            )
            .await?
        } else {
            tracing::info!("⏭️ [3/3] RoB extraction skipped");
            Value::Null
        };

        if options.validate {
            if let Some(validator) = &self.validator {
                let validation = self.validate(validator.as_ref(), &full, file).await;
                if validation.get("final_recommendation").and_then(Value::as_str)
                    == Some(REVISE_RECOMMENDATION)
                {
                    tracing::warn!("⚠️ Validation suggests revision for {}", study_id);
                    result.needs_review = true;
                }
                result.validation = Some(validation);
            }
        }

        self.write_sheets(storage, &options.output_dir, &full, &rob, study_type, &study_id)
            .await?;

        if let Some(dir) = &options.tracking_dir {
            let tracker = CohortTracker::new(storage, dir);
            match tracker.process(&full).await {
                Ok(outcome) => {
                    tracing::info!(
                        "📋 Cohort tracking: registry {:?}, outcome matrix {:?}",
                        outcome.registry,
                        outcome.outcome_matrix
                    );
                    let characteristics = full.get("study_characteristics").unwrap_or(&full);
                    for duplicate in &outcome.duplicates {
                        let assessment = self.check_overlap(duplicate, characteristics, file).await;
                        if cohort::overlap_type(&assessment) != "No Overlap" {
                            result.needs_review = true;
                        }
                        if let Err(e) = tracker.record_overlap(&study_id, duplicate, &assessment).await {
                            tracing::warn!("⚠️ Error writing cohort linkage: {}", e);
                        }
                        result.overlap_checks.push(assessment);
                    }
                    result.tracking = Some(outcome);
                }
                Err(e) => tracing::warn!("⚠️ Error updating tracking: {}", e),
            }
        }

        result.status = PaperStatus::Complete;
        result.study_id = Some(study_id);
        result.study_type = Some(study_type);
        result.full_extraction = full;
        result.rob_information = rob;
        Ok(result)
    }

    /// 與登錄表中同註冊編號的研究比對病人重疊；呼叫失敗記為 Unknown
    async fn check_overlap(&self, duplicate: &DuplicateMatch, characteristics: &Value, file: &str) -> Value {
        tracing::info!("🔗 Checking overlap with {} for {}", duplicate.existing_study_id, file);
        let prompt = prompts::overlap_check_prompt(&cohort::registry_summary(&duplicate.existing), characteristics);
        match self
            .call_json(
                self.client.as_ref(),
                prompt,
                self.config.overlap_check_max_tokens,
                "overlap_check",
                file,
            )
            .await
        {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::warn!("⚠️ Overlap check failed for {}: {}", file, e);
                json!({"overlap_type": "Unknown", "error": e.to_string()})
            }
        }
    }

    /// 驗證失敗時回傳 Error 狀態並要求人工審查
    async fn validate(&self, validator: &dyn LlmClient, full: &Value, file: &str) -> Value {
        let text = |path: &str| {
            sheets::lookup(full, path)
                .and_then(json_text)
                .unwrap_or_default()
        };
        let title: String = text("study_characteristics.title").chars().take(100).collect();
        let summary = format!(
            "{} {}: {}",
            text("study_characteristics.first_author"),
            text("study_characteristics.year"),
            title
        );

        tracing::info!("🧪 Validating extraction for {}", file);
        let prompt = prompts::validation_prompt(&summary, full);
        match self
            .call_json(validator, prompt, self.config.full_extraction_max_tokens, "validation", file)
            .await
        {
            Ok(mut validation) => {
                if let Some(map) = validation.as_object_mut() {
                    map.insert(
                        "_metadata".to_string(),
                        json!({
                            "validated_at": chrono::Local::now().to_rfc3339(),
                            "validation_model": validator.model_name(),
                        }),
                    );
                }
                validation
            }
            Err(e) => {
                tracing::warn!("⚠️ Validation failed for {}: {}", file, e);
                json!({
                    "validation_status": "Error",
                    "error": e.to_string(),
                    "final_recommendation": "Manual review required",
                })
            }
        }
    }

    async fn write_sheets<S: Storage>(
        &self,
        storage: &S,
        dir: &str,
        full: &Value,
        rob: &Value,
        study_type: StudyType,
        study_id: &str,
    ) -> Result<()> {
        let section = |key: &str| full.get(key).cloned().unwrap_or(Value::Null);

        // 沒有 study_characteristics 區塊時整個回應視為該區塊
        let characteristics = full
            .get("study_characteristics")
            .cloned()
            .unwrap_or_else(|| full.clone());
        append_sheet(
            storage,
            dir,
            sheets::STUDY_CHARACTERISTICS,
            sheets::study_characteristics(&characteristics, study_id),
        )
        .await?;

        if full.get("perfusion_settings").is_some() {
            let row = sheets::perfusion_settings(&section("perfusion_settings"), study_id);
            append_sheet(storage, dir, sheets::PERFUSION_SETTINGS, row).await?;
        }
        if full.get("time_metrics").is_some() {
            let row = sheets::time_metrics(&section("time_metrics"), study_id);
            append_sheet(storage, dir, sheets::TIME_METRICS, row).await?;
        }
        let outcomes = full.get("outcome_data").or_else(|| full.get("outcomes"));
        if let Some(outcomes) = outcomes {
            append_sheet(storage, dir, sheets::OUTCOME_DATA, sheets::outcome_data(outcomes, study_id)).await?;
            append_sheet(
                storage,
                dir,
                sheets::CONTINUOUS_OUTCOMES,
                sheets::continuous_outcomes(outcomes, study_id),
            )
            .await?;
        }

        if rob.is_object() {
            let (sheet, row) = match study_type {
                StudyType::Rct => (sheets::ROB2_RCT, sheets::rob2(rob, study_id)),
                StudyType::Nrs => (sheets::ROBINS_I_NRS, sheets::robins_i(rob, study_id)),
            };
            append_sheet(storage, dir, sheet, row).await?;
        }

        let date = chrono::Local::now().format("%Y-%m-%d").to_string();
        append_sheet(
            storage,
            dir,
            sheets::EXTRACTION_NOTES,
            sheets::extraction_notes(&section("extraction_notes"), study_id, &date, "LLM"),
        )
        .await?;

        tracing::info!("💾 Sheets updated in {}", dir);
        Ok(())
    }
}

/// 批次結果摘要
pub fn batch_summary(results: &[PaperResult]) -> String {
    let rule = "=".repeat(SUPPLEMENT_RULE_WIDTH);
    let ok: Vec<&PaperResult> = results.iter().filter(|r| r.status != PaperStatus::Error).collect();
    let failed: Vec<&PaperResult> = results.iter().filter(|r| r.status == PaperStatus::Error).collect();

    let mut lines = vec![
        rule.clone(),
        "EXTRACTION COMPLETE".to_string(),
        rule,
        format!("Total files:    {}", results.len()),
        format!("Successful:     {}", ok.len()),
        format!("Errors:         {}", failed.len()),
    ];
    if !ok.is_empty() {
        lines.push(String::new());
        lines.push("Extracted studies:".to_string());
        for r in &ok {
            lines.push(format!(
                "  • {} ({}) - {}{}",
                r.study_id.as_deref().unwrap_or("Unknown"),
                r.study_type.map(|t| t.as_str()).unwrap_or("?"),
                r.file,
                if r.needs_review { " [needs review]" } else { "" }
            ));
        }
    }
    if !failed.is_empty() {
        lines.push(String::new());
        lines.push("Failed files:".to_string());
        for r in &failed {
            lines.push(format!(
                "  • {}: {}",
                r.file,
                r.error.as_deref().unwrap_or("Unknown error")
            ));
        }
    }
    lines.join("\n")
}

pub fn missing_paper_error(path: &str) -> ReviewError {
    ReviewError::ProcessingError {
        message: format!("No .txt or .md papers found in {}", path),
    }
}
