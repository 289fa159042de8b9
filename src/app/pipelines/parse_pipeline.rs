use super::save_output;
use crate::core::ris::{parse_ris, summarize, to_screening_table};
use crate::core::{Pipeline, StageOutput, Storage, Table};
use crate::utils::error::Result;

/// RIS 匯出檔 → 篩選用 CSV
pub struct ParsePipeline<S: Storage> {
    storage: S,
    input: String,
    output: String,
}

impl<S: Storage> ParsePipeline<S> {
    pub fn new(storage: S, input: &str, output: &str) -> Self {
        Self {
            storage,
            input: input.to_string(),
            output: output.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for ParsePipeline<S> {
    fn name(&self) -> &str {
        "parse"
    }

    async fn extract(&self) -> Result<Table> {
        let bytes = self.storage.read_file(&self.input).await?;
        let content = String::from_utf8_lossy(&bytes);
        let records = parse_ris(&content);
        tracing::info!("📚 Parsed {} RIS records from {}", records.len(), self.input);
        Ok(to_screening_table(&records))
    }

    async fn transform(&self, table: Table) -> Result<StageOutput> {
        let summary = summarize(&table);
        Ok(StageOutput {
            table,
            summary,
            artifacts: Vec::new(),
        })
    }

    async fn load(&self, output: StageOutput) -> Result<String> {
        save_output(&self.storage, &self.output, output).await
    }
}
