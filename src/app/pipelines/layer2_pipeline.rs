use super::{join_error, limit_pending, load_checkpoint, pause, pending_rows, save_output, RunOptions};
use crate::config::toml_config::ScreeningConfig;
use crate::core::decision::{tally, JudgeLabels};
use crate::core::retry::RetryPolicy;
use crate::core::screening::{
    iso_timestamp, verify_inclusion, write_agreement, write_inclusion, Judge, L2_SHARED_COLUMNS,
};
use crate::core::table::{path_stem, write_table};
use crate::core::usage::UsageLedger;
use crate::core::{Pipeline, StageOutput, Storage, Table};
use crate::domain::model::{InclusionResult, Layer1Decision};
use crate::utils::error::{Result, ReviewError};
use crate::utils::progress::BatchProgress;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

type Verdicts = (usize, InclusionResult, InclusionResult);

/// Layer 2：兩位評審各自檢查納入條件，Layer 1 放行的紀錄才會送審
pub struct Layer2Pipeline<S: Storage> {
    storage: S,
    primary: Judge,
    secondary: Judge,
    ledger: Arc<UsageLedger>,
    options: RunOptions,
    config: ScreeningConfig,
}

impl<S: Storage> Layer2Pipeline<S> {
    pub fn new(
        storage: S,
        primary: Judge,
        secondary: Judge,
        ledger: Arc<UsageLedger>,
        options: RunOptions,
        config: ScreeningConfig,
    ) -> Self {
        Self {
            storage,
            primary,
            secondary,
            ledger,
            options,
            config,
        }
    }

    fn labels(&self) -> JudgeLabels {
        JudgeLabels::new(&self.primary.label, &self.secondary.label)
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.config.layer2_max_attempts,
            Duration::from_millis(self.config.layer2_retry_delay_ms),
        )
    }

    async fn verify_batch(&self, table: &Table, rows: &[usize]) -> Result<Vec<Verdicts>> {
        let policy = self.policy();
        let mut tasks = JoinSet::new();
        for &row in rows {
            let record = &table.records[row];
            let primary = self.primary.clone();
            let secondary = self.secondary.clone();
            let ledger = Arc::clone(&self.ledger);
            let title = record.get("title").to_string();
            let abstract_text = record.get("abstract").to_string();
            let record_id = record.get("record_id").to_string();
            tasks.spawn(async move {
                let (first, second) = tokio::join!(
                    verify_inclusion(&primary, &title, &abstract_text, &policy, &ledger, &record_id),
                    verify_inclusion(&secondary, &title, &abstract_text, &policy, &ledger, &record_id),
                );
                (row, first, second)
            });
        }

        let mut verdicts = Vec::with_capacity(rows.len());
        while let Some(joined) = tasks.join_next().await {
            verdicts.push(joined.map_err(join_error)?);
        }
        Ok(verdicts)
    }

    fn summary(&self, table: &Table) -> String {
        let processed: Vec<_> = table
            .records
            .iter()
            .filter(|r| r.get("L1_decision") == Layer1Decision::Pass.as_str())
            .filter(|r| r.has_value("L2_timestamp"))
            .collect();
        let counts = tally(processed.iter().copied(), &self.labels());
        let review = processed
            .iter()
            .filter(|r| r.get("needs_human_review") == "True")
            .count();
        let errors = |judge: &Judge| {
            let column = format!("{}_error", judge.prefix());
            processed.iter().filter(|r| r.has_value(&column)).count()
        };

        [
            "LAYER 2 VERIFICATION SUMMARY".to_string(),
            format!("Records evaluated:   {}", counts.evaluated),
            format!("Both INCLUDE:        {}", counts.both_include),
            format!("Both EXCLUDE:        {}", counts.both_exclude),
            format!("Disagreement:        {}", counts.disagree()),
            format!("Agreement rate:      {:.1}%", counts.rate()),
            format!("Needs human review:  {}", review),
            format!(
                "Judge errors:        {}={}, {}={}",
                self.primary.label,
                errors(&self.primary),
                self.secondary.label,
                errors(&self.secondary)
            ),
        ]
        .join("\n")
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for Layer2Pipeline<S> {
    fn name(&self) -> &str {
        "layer2"
    }

    async fn extract(&self) -> Result<Table> {
        let table = load_checkpoint(&self.storage, &self.options, "L2_timestamp").await?;
        if !table.has_column("L1_decision") {
            return Err(ReviewError::ConfigValidationError {
                field: "input".to_string(),
                message: format!(
                    "{} has no L1_decision column, run layer1 first",
                    self.options.input
                ),
            });
        }
        Ok(table)
    }

    async fn transform(&self, mut table: Table) -> Result<StageOutput> {
        table.ensure_columns(&self.primary.columns());
        table.ensure_columns(&self.secondary.columns());
        table.ensure_columns(L2_SHARED_COLUMNS);

        let passed: Vec<usize> = table
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.get("L1_decision") == Layer1Decision::Pass.as_str())
            .map(|(i, _)| i)
            .collect();
        let mut pending = pending_rows(&passed, &table, "L2_timestamp", self.options.resume);
        limit_pending(&mut pending, self.options.limit);
        tracing::info!(
            "⚖️ Layer 2 verifying {} of {} passed records ({} + {})",
            pending.len(),
            passed.len(),
            self.primary.client.model_name(),
            self.secondary.client.model_name()
        );

        let batch_size = self.config.layer2_batch_size.max(1);
        let mut progress = BatchProgress::new("L2", pending.len());
        let batch_count = progress.total_batches(batch_size);

        for (i, rows) in pending.chunks(batch_size).enumerate() {
            progress.batch_started(i + 1, batch_count, rows.len());
            for (row, first, second) in self.verify_batch(&table, rows).await? {
                let record = &mut table.records[row];
                write_inclusion(record, &self.primary, &first, self.config.thinking_excerpt_chars);
                write_inclusion(record, &self.secondary, &second, self.config.thinking_excerpt_chars);
                write_agreement(record, &self.primary.label, &self.secondary.label);
                record.set("L2_timestamp", iso_timestamp());
            }
            progress.advance(rows.len());

            write_table(&self.storage, &self.options.output, &table).await?;
            progress.log_checkpoint(&self.options.output);

            if i + 1 < batch_count {
                pause(self.config.layer2_batch_delay_ms).await;
            }
        }

        self.ledger.log_summary();
        let artifacts = self.ledger.report_artifacts(&path_stem(&self.options.output))?;
        Ok(StageOutput {
            summary: self.summary(&table),
            table,
            artifacts,
        })
    }

    async fn load(&self, output: StageOutput) -> Result<String> {
        save_output(&self.storage, &self.options.output, output).await
    }
}
