use super::{join_error, limit_pending, load_checkpoint, pause, pending_rows, save_output, RunOptions};
use crate::config::toml_config::ScreeningConfig;
use crate::core::decision::percent;
use crate::core::retry::RetryPolicy;
use crate::core::screening::{screen_exclusion, write_exclusion, L1_COLUMNS};
use crate::core::table::{path_stem, write_table};
use crate::core::usage::UsageLedger;
use crate::core::{LlmClient, Pipeline, StageOutput, Storage, Table};
use crate::domain::criteria::{has_tag, EXCLUSION_TAGS};
use crate::domain::model::{ExclusionResult, Layer1Decision};
use crate::utils::error::Result;
use crate::utils::progress::BatchProgress;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Layer 1：以快速模型排除明顯不符的紀錄
pub struct Layer1Pipeline<S: Storage> {
    storage: S,
    client: Arc<dyn LlmClient>,
    ledger: Arc<UsageLedger>,
    options: RunOptions,
    config: ScreeningConfig,
}

impl<S: Storage> Layer1Pipeline<S> {
    pub fn new(
        storage: S,
        client: Arc<dyn LlmClient>,
        ledger: Arc<UsageLedger>,
        options: RunOptions,
        config: ScreeningConfig,
    ) -> Self {
        Self {
            storage,
            client,
            ledger,
            options,
            config,
        }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::linear(
            self.config.layer1_max_attempts,
            Duration::from_millis(self.config.layer1_retry_delay_ms),
        )
    }

    async fn screen_batch(&self, table: &Table, rows: &[usize]) -> Result<Vec<(usize, ExclusionResult)>> {
        let policy = self.policy();
        let mut tasks = JoinSet::new();
        for &row in rows {
            let record = &table.records[row];
            let client = Arc::clone(&self.client);
            let ledger = Arc::clone(&self.ledger);
            let title = record.get("title").to_string();
            let abstract_text = record.get("abstract").to_string();
            let record_id = record.get("record_id").to_string();
            tasks.spawn(async move {
                let result = screen_exclusion(
                    client.as_ref(),
                    &title,
                    &abstract_text,
                    &policy,
                    &ledger,
                    &record_id,
                )
                .await;
                (row, result)
            });
        }

        let mut results = Vec::with_capacity(rows.len());
        while let Some(joined) = tasks.join_next().await {
            results.push(joined.map_err(join_error)?);
        }
        Ok(results)
    }
}

pub fn layer1_summary(table: &Table) -> String {
    let total = table.len();
    let excluded = table.count_where("L1_decision", Layer1Decision::Exclude.as_str());
    let passed = table.count_where("L1_decision", Layer1Decision::Pass.as_str());
    let errors = table.count_non_empty("L1_error");
    let unscreened = total - table.count_non_empty("L1_decision");

    let mut lines = vec![
        "LAYER 1 SCREENING SUMMARY".to_string(),
        format!("Total records:      {}", total),
        format!("Excluded:           {} ({:.1}%)", excluded, percent(excluded, total)),
        format!("Passed to Layer 2:  {} ({:.1}%)", passed, percent(passed, total)),
        format!("Errors:             {}", errors),
    ];
    if unscreened > 0 {
        lines.push(format!("Not yet screened:   {}", unscreened));
    }
    lines.push(String::new());
    lines.push("Exclusion breakdown:".to_string());
    for (tag, description) in EXCLUSION_TAGS {
        let count = table
            .records
            .iter()
            .filter(|r| r.get("L1_decision") == Layer1Decision::Exclude.as_str())
            .filter(|r| has_tag(r.get("L1_exclusion_tags"), tag))
            .count();
        if count > 0 {
            lines.push(format!("  {} ({}): {}", tag, description, count));
        }
    }
    lines.join("\n")
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for Layer1Pipeline<S> {
    fn name(&self) -> &str {
        "layer1"
    }

    async fn extract(&self) -> Result<Table> {
        load_checkpoint(&self.storage, &self.options, "L1_decision").await
    }

    async fn transform(&self, mut table: Table) -> Result<StageOutput> {
        table.ensure_columns(L1_COLUMNS);

        let candidates: Vec<usize> = (0..table.len()).collect();
        let mut pending = pending_rows(&candidates, &table, "L1_decision", self.options.resume);
        limit_pending(&mut pending, self.options.limit);
        tracing::info!(
            "🔍 Layer 1 screening {} of {} records with {}",
            pending.len(),
            table.len(),
            self.client.model_name()
        );

        let batch_size = self.config.layer1_batch_size.max(1);
        let mut progress = BatchProgress::new("L1", pending.len());
        let batch_count = progress.total_batches(batch_size);

        for (i, rows) in pending.chunks(batch_size).enumerate() {
            progress.batch_started(i + 1, batch_count, rows.len());
            for (row, result) in self.screen_batch(&table, rows).await? {
                if let Some(error) = &result.error {
                    tracing::warn!("⚠️ Record {}: {}", table.records[row].get("record_id"), error);
                }
                write_exclusion(&mut table.records[row], &result);
            }
            progress.advance(rows.len());

            write_table(&self.storage, &self.options.output, &table).await?;
            progress.log_checkpoint(&self.options.output);

            if i + 1 < batch_count {
                pause(self.config.layer1_batch_delay_ms).await;
            }
        }

        self.ledger.log_summary();
        let artifacts = self.ledger.report_artifacts(&path_stem(&self.options.output))?;
        Ok(StageOutput {
            summary: layer1_summary(&table),
            table,
            artifacts,
        })
    }

    async fn load(&self, output: StageOutput) -> Result<String> {
        save_output(&self.storage, &self.options.output, output).await
    }
}
