use super::{pause, save_output, RunOptions};
use crate::config::toml_config::ScreeningConfig;
use crate::core::decision::{tally, JudgeLabels};
use crate::core::retry::RetryPolicy;
use crate::core::screening::{verify_inclusion, write_agreement, write_inclusion, Judge};
use crate::core::table::{path_stem, read_table, write_table};
use crate::core::usage::UsageLedger;
use crate::core::{Pipeline, StageOutput, Storage, Table};
use crate::utils::error::Result;
use crate::utils::progress::BatchProgress;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 重跑單一評審在 Layer 2 失敗的紀錄
pub struct RescreenPipeline<S: Storage> {
    storage: S,
    judge: Judge,
    /// 另一位評審，用來重算一致性
    other_label: String,
    ledger: Arc<UsageLedger>,
    options: RunOptions,
    config: ScreeningConfig,
    succeeded: AtomicUsize,
    still_failing: AtomicUsize,
}

impl<S: Storage> RescreenPipeline<S> {
    pub fn new(
        storage: S,
        judge: Judge,
        other_label: &str,
        ledger: Arc<UsageLedger>,
        options: RunOptions,
        config: ScreeningConfig,
    ) -> Self {
        Self {
            storage,
            judge,
            other_label: other_label.to_string(),
            ledger,
            options,
            config,
            succeeded: AtomicUsize::new(0),
            still_failing: AtomicUsize::new(0),
        }
    }

    fn error_column(&self) -> String {
        format!("{}_error", self.judge.prefix())
    }

    fn summary(&self, table: &Table, retried: usize) -> String {
        let labels = JudgeLabels::new(&self.other_label, &self.judge.label);
        let evaluated = table.records.iter().filter(|r| r.has_value("L2_timestamp"));
        let counts = tally(evaluated, &labels);

        [
            format!("JUDGE ERROR RETRY SUMMARY ({})", self.judge.label),
            format!("Retried:           {}", retried),
            format!("Succeeded:         {}", self.succeeded.load(Ordering::Relaxed)),
            format!("Still failing:     {}", self.still_failing.load(Ordering::Relaxed)),
            format!(
                "Remaining errors:  {}",
                table.count_non_empty(&self.error_column())
            ),
            String::new(),
            format!("Both INCLUDE:      {}", counts.both_include),
            format!("Both EXCLUDE:      {}", counts.both_exclude),
            format!("Disagreement:      {}", counts.disagree()),
            format!("Agreement rate:    {:.1}%", counts.rate()),
        ]
        .join("\n")
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for RescreenPipeline<S> {
    fn name(&self) -> &str {
        "rescreen"
    }

    async fn extract(&self) -> Result<Table> {
        read_table(&self.storage, &self.options.input).await
    }

    async fn transform(&self, mut table: Table) -> Result<StageOutput> {
        table.ensure_columns(&self.judge.columns());

        let error_column = self.error_column();
        let rows: Vec<usize> = table
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.has_value(&error_column))
            .map(|(i, _)| i)
            .collect();
        tracing::info!(
            "🔁 Retrying {} records with {} errors ({})",
            rows.len(),
            self.judge.label,
            self.judge.client.model_name()
        );

        let policy = RetryPolicy::exponential(
            self.config.layer2_max_attempts,
            Duration::from_millis(self.config.layer2_retry_delay_ms),
        );
        let batch_size = self.config.rescreen_batch_size.max(1);
        let mut progress = BatchProgress::new("rescreen", rows.len());
        let batch_count = progress.total_batches(batch_size);

        for (i, batch) in rows.chunks(batch_size).enumerate() {
            progress.batch_started(i + 1, batch_count, batch.len());
            for &row in batch {
                pause(self.config.rescreen_call_delay_ms).await;
                let record = &table.records[row];
                let record_id = record.get("record_id").to_string();
                let result = verify_inclusion(
                    &self.judge,
                    record.get("title"),
                    record.get("abstract"),
                    &policy,
                    &self.ledger,
                    &record_id,
                )
                .await;

                match &result.error {
                    None => {
                        let record = &mut table.records[row];
                        write_inclusion(record, &self.judge, &result, self.config.thinking_excerpt_chars);
                        write_agreement(record, &self.other_label, &self.judge.label);
                        self.succeeded.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("✅ Record {} rescreened: {}", record_id, result.decision);
                    }
                    Some(error) => {
                        self.still_failing.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("⚠️ Record {} still failing: {}", record_id, error);
                    }
                }
            }
            progress.advance(batch.len());

            write_table(&self.storage, &self.options.output, &table).await?;
            progress.log_checkpoint(&self.options.output);

            if i + 1 < batch_count {
                pause(self.config.rescreen_batch_delay_ms).await;
            }
        }

        let artifacts = if self.ledger.is_empty() {
            Vec::new()
        } else {
            self.ledger.log_summary();
            self.ledger
                .report_artifacts(&format!("{}_rescreen", path_stem(&self.options.output)))?
        };
        Ok(StageOutput {
            summary: self.summary(&table, rows.len()),
            table,
            artifacts,
        })
    }

    async fn load(&self, output: StageOutput) -> Result<String> {
        save_output(&self.storage, &self.options.output, output).await
    }
}
