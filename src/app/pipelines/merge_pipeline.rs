use super::save_output;
use crate::core::decision::{
    apply_decisions, high_priority_columns, high_priority_rows, low_priority_sample,
    low_sample_columns, summary_report, JudgeLabels,
};
use crate::core::table::{read_table, table_to_csv};
use crate::core::{Pipeline, StageOutput, Storage, Table};
use crate::domain::model::Artifact;
use crate::utils::error::Result;

/// 合併兩層篩選結果並匯出人工審查清單
pub struct MergePipeline<S: Storage> {
    storage: S,
    input: String,
    output_prefix: String,
    labels: JudgeLabels,
}

impl<S: Storage> MergePipeline<S> {
    pub fn new(storage: S, input: &str, output_prefix: &str, labels: JudgeLabels) -> Self {
        Self {
            storage,
            input: input.to_string(),
            output_prefix: output_prefix.to_string(),
            labels,
        }
    }

    /// 沒有列時不輸出檔案
    fn export(&self, table: &Table, rows: &[usize], columns: &[String], suffix: &str) -> Result<Option<Artifact>> {
        if rows.is_empty() {
            tracing::info!("⏭️ No rows for {}, skipping export", suffix);
            return Ok(None);
        }
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        let subset = table.select(rows, &columns);
        tracing::info!("📋 {} rows for {}", subset.len(), suffix);
        Ok(Some(Artifact::new(
            format!("{}_{}.csv", self.output_prefix, suffix),
            table_to_csv(&subset)?,
        )))
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for MergePipeline<S> {
    fn name(&self) -> &str {
        "merge"
    }

    async fn extract(&self) -> Result<Table> {
        read_table(&self.storage, &self.input).await
    }

    async fn transform(&self, mut table: Table) -> Result<StageOutput> {
        apply_decisions(&mut table, &self.labels);

        let summary = summary_report(&table, &self.labels);
        let high = self.export(
            &table,
            &high_priority_rows(&table),
            &high_priority_columns(&self.labels),
            "human_review_high",
        )?;
        let low = self.export(
            &table,
            &low_priority_sample(&table),
            &low_sample_columns(&self.labels),
            "human_review_low_sample",
        )?;
        let report = Artifact::new(
            format!("{}_summary.txt", self.output_prefix),
            summary.clone().into_bytes(),
        );

        let artifacts = std::iter::once(report).chain(high).chain(low).collect();
        Ok(StageOutput {
            table,
            summary,
            artifacts,
        })
    }

    async fn load(&self, output: StageOutput) -> Result<String> {
        let path = format!("{}.csv", self.output_prefix);
        save_output(&self.storage, &path, output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::parse_table;
    use crate::core::testing::MockStorage;

    fn screened() -> String {
        let mut csv = String::from(
            "record_id,pmid,title,abstract,L1_decision,L1_exclusion_tags,L2_pro_decision,L2_sonnet_decision,human_decision\n",
        );
        csv.push_str("1,111,A,a,exclude,EXC-1,,,old\n");
        csv.push_str("2,222,B,b,pass,,include,include,\n");
        csv.push_str("3,333,C,c,pass,,include,exclude,\n");
        csv.push_str("4,444,D,d,pass,,,,\n");
        for id in 5..30 {
            csv.push_str(&format!("{},{},T{},x,pass,,exclude,exclude,\n", id, id * 100, id));
        }
        csv
    }

    #[tokio::test]
    async fn test_merge_writes_all_outputs() {
        let storage = MockStorage::new();
        storage.put("l2.csv", screened().as_bytes()).await;
        let p = MergePipeline::new(
            storage.clone(),
            "l2.csv",
            "final/screening",
            JudgeLabels::new("pro", "sonnet"),
        );

        let table = p.extract().await.unwrap();
        let output = p.transform(table).await.unwrap();
        assert!(output.summary.contains("Disagreement: 1"));
        p.load(output).await.unwrap();

        let merged = parse_table(&storage.get_file("final/screening.csv").await.unwrap()).unwrap();
        assert_eq!(merged.records[0].get("auto_decision"), "exclude");
        assert_eq!(merged.records[0].get("human_decision"), "");
        assert_eq!(merged.records[2].get("review_reason"), "Disagreement: Pro=include, Sonnet=exclude");
        assert_eq!(merged.records[3].get("auto_decision"), "pending");
        assert_eq!(merged.records[4].get("final_decision"), "exclude");

        let high = parse_table(
            &storage
                .get_file("final/screening_human_review_high.csv")
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(high.len(), 3);
        // journal/year absent in input, so not exported
        assert!(!high.has_column("journal"));
        assert!(high.has_column("L2_sonnet_decision"));

        let low = parse_table(
            &storage
                .get_file("final/screening_human_review_low_sample.csv")
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(low.len(), 10);

        let summary = storage.get_text("final/screening_summary.txt").await.unwrap();
        assert!(summary.contains("EXC-1: 1"));
    }

    #[tokio::test]
    async fn test_empty_review_lists_are_not_written() {
        let storage = MockStorage::new();
        let csv = "record_id,title,L1_decision,L1_exclusion_tags,L2_pro_decision,L2_sonnet_decision\n\
                   1,A,exclude,EXC-2,,\n\
                   2,B,exclude,EXC-5,,\n";
        storage.put("l2.csv", csv.as_bytes()).await;
        let p = MergePipeline::new(
            storage.clone(),
            "l2.csv",
            "final/screening",
            JudgeLabels::new("pro", "sonnet"),
        );

        let table = p.extract().await.unwrap();
        let output = p.transform(table).await.unwrap();
        assert_eq!(output.artifacts.len(), 1);
        p.load(output).await.unwrap();

        let paths = storage.paths().await;
        assert!(paths.contains(&"final/screening.csv".to_string()));
        assert!(paths.contains(&"final/screening_summary.txt".to_string()));
        assert!(!paths.contains(&"final/screening_human_review_high.csv".to_string()));
        assert!(!paths.contains(&"final/screening_human_review_low_sample.csv".to_string()));
    }
}
