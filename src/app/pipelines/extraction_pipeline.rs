use super::save_output;
use crate::core::extraction::{
    batch_summary, is_paper_file, missing_paper_error, read_paper, ExtractionOptions,
    PaperExtractor, PaperResult, PAPER_EXTENSIONS,
};
use crate::core::usage::UsageLedger;
use crate::core::{Pipeline, Record, StageOutput, Storage, Table};
use crate::domain::model::Artifact;
use crate::utils::error::Result;
use crate::utils::validation::validate_paper_files;
use std::sync::Arc;

pub const EXTRACTION_LOG: &str = "Extraction_Log.csv";
pub const RESULTS_JSON: &str = "extraction_results.json";

const LOG_COLUMNS: &[&str] = &["file", "status", "study_id", "study_type", "needs_review", "error"];

/// `extract` 子命令的輸入
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// 單篇論文路徑，或 `batch` 時的目錄
    pub input: String,
    pub batch: bool,
    /// 只附加在單篇模式
    pub supplementary: Vec<String>,
    pub write_json: bool,
    pub options: ExtractionOptions,
}

pub struct ExtractionPipeline<S: Storage> {
    storage: S,
    extractor: PaperExtractor,
    ledger: Arc<UsageLedger>,
    request: ExtractionRequest,
}

impl<S: Storage> ExtractionPipeline<S> {
    pub fn new(storage: S, extractor: PaperExtractor, ledger: Arc<UsageLedger>, request: ExtractionRequest) -> Self {
        Self {
            storage,
            extractor,
            ledger,
            request,
        }
    }

    fn output_path(&self, file_name: &str) -> String {
        format!(
            "{}/{}",
            self.request.options.output_dir.trim_end_matches('/'),
            file_name
        )
    }

    async fn run_paper(&self, path: &str) -> Result<PaperResult> {
        let supplementary: &[String] = if self.request.batch {
            &[]
        } else {
            &self.request.supplementary
        };
        let paper = read_paper(&self.storage, path, supplementary).await?;
        self.extractor
            .process(&self.storage, path, &paper, &self.request.options)
            .await
    }
}

fn log_row(result: &PaperResult) -> Record {
    let mut row = Record::new();
    row.set("file", result.file.as_str());
    row.set("status", result.status.as_str());
    row.set_opt("study_id", result.study_id.as_deref());
    row.set_opt("study_type", result.study_type.map(|t| t.as_str()));
    row.set("needs_review", if result.needs_review { "True" } else { "False" });
    row.set_opt("error", result.error.as_deref());
    row
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for ExtractionPipeline<S> {
    fn name(&self) -> &str {
        "extract"
    }

    /// 待處理論文清單（欄位 `file`）
    async fn extract(&self) -> Result<Table> {
        let papers = if self.request.batch {
            let dir = self.request.input.trim_end_matches('/');
            self.storage
                .list_files(dir)
                .await?
                .into_iter()
                .filter(|name| is_paper_file(name))
                .map(|name| format!("{}/{}", dir, name))
                .collect()
        } else {
            let single = vec![self.request.input.clone()];
            validate_paper_files("input", &single, PAPER_EXTENSIONS)?;
            single
        };
        validate_paper_files("supplementary", &self.request.supplementary, PAPER_EXTENSIONS)?;
        if papers.is_empty() {
            return Err(missing_paper_error(&self.request.input));
        }

        let mut table = Table::new(&["file"]);
        for paper in papers {
            let mut record = Record::new();
            record.set("file", paper);
            table.push(record);
        }
        Ok(table)
    }

    async fn transform(&self, papers: Table) -> Result<StageOutput> {
        let total = papers.len();
        let mut results = Vec::with_capacity(total);
        for (i, paper) in papers.records.iter().enumerate() {
            let path = paper.get("file");
            tracing::info!("📄 [{}/{}] {}", i + 1, total, path);
            match self.run_paper(path).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!("❌ {} failed: {}", path, e);
                    results.push(PaperResult::failed(path, e.to_string()));
                }
            }
        }

        let mut table = Table::new(LOG_COLUMNS);
        for result in &results {
            table.push(log_row(result));
        }

        let mut artifacts = Vec::new();
        if self.request.write_json {
            artifacts.push(Artifact::new(
                self.output_path(RESULTS_JSON),
                serde_json::to_vec_pretty(&results)?,
            ));
        }
        if !self.ledger.is_empty() {
            self.ledger.log_summary();
            artifacts.extend(self.ledger.report_artifacts(&self.output_path("extraction"))?);
        }

        Ok(StageOutput {
            table,
            summary: batch_summary(&results),
            artifacts,
        })
    }

    async fn load(&self, output: StageOutput) -> Result<String> {
        save_output(&self.storage, &self.output_path(EXTRACTION_LOG), output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::toml_config::ExtractionConfig;
    use crate::core::table::parse_table;
    use crate::core::testing::{text_response, MockStorage, ScriptedLlm};
    use crate::core::usage::Pricing;
    use serde_json::json;

    fn extractor_llm() -> ScriptedLlm {
        ScriptedLlm::new("claude-sonnet-4-5-20250929").with_handler(|request| {
            if request.prompt.contains("BROKEN PAPER") {
                return Err(crate::utils::error::ReviewError::LlmError {
                    provider: "anthropic".to_string(),
                    message: "HTTP 400: prompt too long".to_string(),
                });
            }
            let body = if request.prompt.starts_with("Quickly screen") {
                json!({"study_id": "Kang_2024", "design": "RCT", "intervention": "HOPE"})
            } else if request.prompt.contains("Risk of Bias") {
                json!({"d1_randomization": {"judgment": "Low"}, "overall_judgment": "Low"})
            } else {
                json!({
                    "study_characteristics": {"study_id": "Kang_2024", "study_design": "RCT"},
                    "outcome_data": {"ead": {"reported": true}}
                })
            };
            Ok(text_response("claude-sonnet-4-5-20250929", &body.to_string()))
        })
    }

    fn pipeline(storage: MockStorage, input: &str, batch: bool) -> ExtractionPipeline<MockStorage> {
        let ledger = Arc::new(UsageLedger::new(Pricing::default()));
        let config = ExtractionConfig {
            retry_delay_ms: 0,
            max_attempts: 1,
            ..ExtractionConfig::default()
        };
        let extractor = PaperExtractor::new(Arc::new(extractor_llm()), None, Arc::clone(&ledger), config);
        ExtractionPipeline::new(
            storage,
            extractor,
            ledger,
            ExtractionRequest {
                input: input.to_string(),
                batch,
                supplementary: Vec::new(),
                write_json: true,
                options: ExtractionOptions {
                    quick_only: false,
                    include_rob: true,
                    validate: false,
                    output_dir: "sheets".to_string(),
                    tracking_dir: None,
                },
            },
        )
    }

    #[tokio::test]
    async fn test_batch_continues_after_failed_paper() {
        let storage = MockStorage::new();
        storage.put("papers/a_kang.txt", b"Kang 2024 HOPE trial").await;
        storage.put("papers/b_broken.md", b"BROKEN PAPER").await;
        storage.put("papers/c_figure.png", b"\x89PNG").await;
        let p = pipeline(storage.clone(), "papers", true);

        let papers = p.extract().await.unwrap();
        assert_eq!(papers.len(), 2);

        let output = p.transform(papers).await.unwrap();
        assert!(output.summary.contains("Successful:     1"));
        assert!(output.summary.contains("papers/b_broken.md: "));
        p.load(output).await.unwrap();

        let log = parse_table(&storage.get_file("sheets/Extraction_Log.csv").await.unwrap()).unwrap();
        assert_eq!(log.records[0].get("status"), "complete");
        assert_eq!(log.records[0].get("study_type"), "RCT");
        assert_eq!(log.records[1].get("status"), "error");
        assert!(log.records[1].get("error").contains("prompt too long"));

        assert!(storage.get_file("sheets/Study_Characteristics.csv").await.is_some());
        assert!(storage.get_file("sheets/extraction_cost_summary.csv").await.is_some());
        let results: serde_json::Value =
            serde_json::from_slice(&storage.get_file("sheets/extraction_results.json").await.unwrap()).unwrap();
        assert_eq!(results[0]["study_id"], "Kang_2024");
    }

    #[tokio::test]
    async fn test_empty_batch_directory_is_an_error() {
        let storage = MockStorage::new();
        storage.put("papers/notes.pdf", b"%PDF").await;
        let p = pipeline(storage, "papers", true);

        assert!(p.extract().await.is_err());
    }

    #[tokio::test]
    async fn test_pdf_input_is_rejected() {
        let storage = MockStorage::new();
        let p = pipeline(storage, "papers/kang.pdf", false);

        assert!(matches!(
            p.extract().await,
            Err(crate::utils::error::ReviewError::InvalidConfigValueError { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_single_paper_is_recorded() {
        let storage = MockStorage::new();
        let p = pipeline(storage, "missing.txt", false);

        let papers = p.extract().await.unwrap();
        let output = p.transform(papers).await.unwrap();

        assert_eq!(output.table.records[0].get("status"), "error");
        assert!(output.summary.contains("Errors:         1"));
    }
}
