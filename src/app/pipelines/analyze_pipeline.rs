use super::save_output;
use crate::core::decision::{percent, tally, JudgeLabels};
use crate::core::screening::judge_prefix;
use crate::core::table::{path_stem, read_table, sibling_path};
use crate::core::{Pipeline, Record, StageOutput, Storage, Table};
use crate::domain::model::{CriterionStatus, Layer2Decision};
use crate::utils::error::Result;

pub const REVIEW_LIST_FILE: &str = "human_review_list.csv";

/// 檢視 Layer 2 結果：錯誤、一致性、INC-1 分佈與成本，並列出待人工審查紀錄
pub struct AnalyzePipeline<S: Storage> {
    storage: S,
    input: String,
    labels: JudgeLabels,
}

impl<S: Storage> AnalyzePipeline<S> {
    pub fn new(storage: S, input: &str, labels: JudgeLabels) -> Self {
        Self {
            storage,
            input: input.to_string(),
            labels,
        }
    }

    fn judges(&self) -> [&str; 2] {
        [self.labels.primary.as_str(), self.labels.secondary.as_str()]
    }

    fn review_columns(&self) -> Vec<String> {
        let mut columns = vec![
            "record_id".to_string(),
            "title".to_string(),
            "review_category".to_string(),
        ];
        for label in self.judges() {
            let prefix = judge_prefix(label);
            for suffix in ["decision", "confidence", "inc1_status"] {
                columns.push(format!("{}_{}", prefix, suffix));
            }
        }
        columns
    }

    /// 先列雙方皆納入，再列意見不一致
    fn review_list(&self, table: &Table, decided: &[&Record]) -> Table {
        let (primary, secondary) = (self.labels.primary_column(), self.labels.secondary_column());
        let include = Layer2Decision::Include.as_str();
        let columns = self.review_columns();
        let mut list = Table::new(&columns);

        let both_include = decided
            .iter()
            .filter(|r| r.get(&primary) == include && r.get(&secondary) == include)
            .map(|r| (*r, "both_include"));
        let disagreement = decided
            .iter()
            .filter(|r| r.get(&primary) != r.get(&secondary))
            .map(|r| (*r, "disagreement"));

        for (record, category) in both_include.chain(disagreement) {
            let mut row = Record::new();
            for column in &columns {
                if column == "review_category" {
                    row.set(column, category);
                } else if table.has_column(column) {
                    row.set(column, record.get(column));
                }
            }
            list.push(row);
        }
        list
    }

    fn report(&self, table: &Table, decided: &[&Record], cost_summary: Option<String>) -> String {
        let rule = "=".repeat(60);
        let processed = table.count_non_empty(&self.labels.primary_column());
        let counts = tally(decided.iter().copied(), &self.labels);

        let mut lines = vec![
            rule.clone(),
            "LAYER 2 RESULT ANALYSIS".to_string(),
            rule.clone(),
            format!("Processed records: {}", processed),
            String::new(),
            "Remaining errors:".to_string(),
        ];
        for label in self.judges() {
            let column = format!("{}_error", judge_prefix(label));
            lines.push(format!("  {}: {}", label, table.count_non_empty(&column)));
        }

        lines.push(String::new());
        lines.push("Agreement:".to_string());
        lines.push(format!(
            "  Both include: {} ({:.1}%)",
            counts.both_include,
            percent(counts.both_include, counts.evaluated)
        ));
        lines.push(format!(
            "  Both exclude: {} ({:.1}%)",
            counts.both_exclude,
            percent(counts.both_exclude, counts.evaluated)
        ));
        lines.push(format!(
            "  Disagree:     {} ({:.1}%)",
            counts.disagree(),
            percent(counts.disagree(), counts.evaluated)
        ));
        lines.push(format!("  Agreement rate: {:.1}%", counts.rate()));

        lines.push(String::new());
        lines.push("INC-1 (study design) status:".to_string());
        for label in self.judges() {
            let column = format!("{}_inc1_status", judge_prefix(label));
            let distribution: Vec<String> = [CriterionStatus::Yes, CriterionStatus::No, CriterionStatus::Unclear]
                .iter()
                .map(|status| format!("{}={}", status, table.count_where(&column, status.as_str())))
                .collect();
            lines.push(format!("  {}: {}", label, distribution.join(", ")));
        }

        lines.push(String::new());
        match cost_summary {
            Some(csv) => {
                lines.push("Cost summary:".to_string());
                lines.extend(csv.lines().map(|l| format!("  {}", l)));
            }
            None => lines.push("Cost summary file not found".to_string()),
        }
        lines.push(rule);
        lines.join("\n")
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for AnalyzePipeline<S> {
    fn name(&self) -> &str {
        "analyze"
    }

    async fn extract(&self) -> Result<Table> {
        read_table(&self.storage, &self.input).await
    }

    async fn transform(&self, table: Table) -> Result<StageOutput> {
        let cost_path = format!("{}_cost_summary.csv", path_stem(&self.input));
        let cost_summary = if self.storage.exists(&cost_path).await {
            let bytes = self.storage.read_file(&cost_path).await?;
            Some(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            None
        };

        let (primary, secondary) = (self.labels.primary_column(), self.labels.secondary_column());
        let decided: Vec<&Record> = table
            .records
            .iter()
            .filter(|r| r.has_value(&primary) || r.has_value(&secondary))
            .collect();

        let summary = self.report(&table, &decided, cost_summary);
        let list = self.review_list(&table, &decided);
        tracing::info!("👀 {} records flagged for human review", list.len());

        Ok(StageOutput {
            table: list,
            summary,
            artifacts: Vec::new(),
        })
    }

    /// 主輸出是審查清單，與輸入放在同一目錄
    async fn load(&self, output: StageOutput) -> Result<String> {
        let path = sibling_path(&self.input, REVIEW_LIST_FILE);
        save_output(&self.storage, &path, output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::parse_table;
    use crate::core::testing::MockStorage;

    const L2_OUTPUT: &str = "record_id,title,L2_pro_decision,L2_pro_confidence,L2_pro_inc1_status,L2_pro_error,L2_sonnet_decision,L2_sonnet_confidence,L2_sonnet_inc1_status,L2_sonnet_error\n\
        1,Both in,include,high,yes,,include,high,yes,\n\
        2,Split,exclude,high,no,,include,low,unclear,HTTP 529\n\
        3,Both out,exclude,high,no,,exclude,high,no,\n\
        4,Not run,,,,,,,,\n";

    fn pipeline(storage: MockStorage) -> AnalyzePipeline<MockStorage> {
        AnalyzePipeline::new(storage, "out/l2.csv", JudgeLabels::new("pro", "sonnet"))
    }

    #[tokio::test]
    async fn test_report_and_review_list() {
        let storage = MockStorage::new();
        storage.put("out/l2.csv", L2_OUTPUT.as_bytes()).await;
        storage
            .put("out/l2_cost_summary.csv", b"Model,API Calls\nTOTAL,6\n")
            .await;
        let p = pipeline(storage.clone());

        let table = p.extract().await.unwrap();
        let output = p.transform(table).await.unwrap();

        assert!(output.summary.contains("Processed records: 3"));
        assert!(output.summary.contains("  sonnet: 1"));
        assert!(output.summary.contains("Disagree:     1 (33.3%)"));
        assert!(output.summary.contains("pro: yes=1, no=2, unclear=0"));
        assert!(output.summary.contains("  TOTAL,6"));

        let path = p.load(output).await.unwrap();
        assert_eq!(path, "out/human_review_list.csv");

        let list = parse_table(&storage.get_file(&path).await.unwrap()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.records[0].get("review_category"), "both_include");
        assert_eq!(list.records[1].get("record_id"), "2");
        assert_eq!(list.records[1].get("L2_sonnet_inc1_status"), "unclear");
    }

    #[tokio::test]
    async fn test_missing_cost_summary_is_reported() {
        let storage = MockStorage::new();
        storage.put("out/l2.csv", L2_OUTPUT.as_bytes()).await;
        let p = pipeline(storage);

        let table = p.extract().await.unwrap();
        let output = p.transform(table).await.unwrap();

        assert!(output.summary.contains("Cost summary file not found"));
    }
}
