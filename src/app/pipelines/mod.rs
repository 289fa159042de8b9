pub mod analyze_pipeline;
pub mod extraction_pipeline;
pub mod layer1_pipeline;
pub mod layer2_pipeline;
pub mod merge_pipeline;
pub mod parse_pipeline;
pub mod rescreen_pipeline;

pub use analyze_pipeline::AnalyzePipeline;
pub use extraction_pipeline::{ExtractionPipeline, ExtractionRequest};
pub use layer1_pipeline::Layer1Pipeline;
pub use layer2_pipeline::Layer2Pipeline;
pub use merge_pipeline::MergePipeline;
pub use parse_pipeline::ParsePipeline;
pub use rescreen_pipeline::RescreenPipeline;

use crate::core::table::{read_table, write_table};
use crate::domain::model::{StageOutput, Table};
use crate::domain::ports::Storage;
use crate::utils::error::{Result, ReviewError};
use std::collections::HashMap;
use std::time::Duration;

const RECORD_ID: &str = "record_id";

/// 篩選階段共用的輸入輸出與續跑選項
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub input: String,
    pub output: String,
    /// 本次最多處理 N 筆待處理紀錄
    pub limit: Option<usize>,
    /// 從第 N 筆（待處理清單中的索引）開始
    pub resume: Option<usize>,
    /// 忽略既有輸出檔，從頭開始
    pub fresh: bool,
}

impl RunOptions {
    pub fn new(input: &str, output: &str) -> Self {
        Self {
            input: input.to_string(),
            output: output.to_string(),
            ..Self::default()
        }
    }
}

/// 一律讀取輸入；既有輸出含有 `marker` 欄位值時把已完成的欄位合併回來
pub(crate) async fn load_checkpoint<S: Storage>(
    storage: &S,
    options: &RunOptions,
    marker: &str,
) -> Result<Table> {
    let input = read_table(storage, &options.input).await?;
    if options.fresh || !storage.exists(&options.output).await {
        return Ok(input);
    }

    let checkpoint = read_table(storage, &options.output).await?;
    if checkpoint.count_non_empty(marker) == 0 {
        return Ok(input);
    }
    let merged = merge_checkpoint(input, &checkpoint);
    tracing::info!(
        "♻️ Resuming from {} ({} of {} records already have {})",
        options.output,
        merged.count_non_empty(marker),
        merged.len(),
        marker
    );
    Ok(merged)
}

/// 欄位值全部非空且不重複時建立 值 → 列號 索引
fn unique_index(table: &Table, column: &str) -> Option<HashMap<String, usize>> {
    if !table.has_column(column) {
        return None;
    }
    let mut index = HashMap::with_capacity(table.len());
    for (row, record) in table.records.iter().enumerate() {
        let key = record.get(column).trim();
        if key.is_empty() || index.insert(key.to_string(), row).is_some() {
            return None;
        }
    }
    Some(index)
}

/// 依 `record_id` 對應檢查點的列；沒有可用的 id 時，只有列數相同才按列號對應。
/// 輸入中沒有對應到的列維持原樣，之後會被當成待處理。
pub(crate) fn merge_checkpoint(mut input: Table, checkpoint: &Table) -> Table {
    let sources: Vec<Option<usize>> = match (
        unique_index(&input, RECORD_ID),
        unique_index(checkpoint, RECORD_ID),
    ) {
        (Some(_), Some(saved)) => input
            .records
            .iter()
            .map(|r| saved.get(r.get(RECORD_ID).trim()).copied())
            .collect(),
        _ if input.len() == checkpoint.len() => (0..input.len()).map(Some).collect(),
        _ => {
            tracing::warn!(
                "⚠️ Checkpoint has {} rows but input has {} and no usable record_id, starting over",
                checkpoint.len(),
                input.len()
            );
            return input;
        }
    };

    input.ensure_columns(&checkpoint.headers);
    for (record, source) in input.records.iter_mut().zip(sources) {
        if let Some(source) = source {
            let saved = &checkpoint.records[source];
            for column in &checkpoint.headers {
                record.set(column, saved.get(column));
            }
        }
    }
    input
}

/// `--limit N` 只限制本次要處理的列，不截斷寫出的表
pub(crate) fn limit_pending(pending: &mut Vec<usize>, limit: Option<usize>) {
    if let Some(limit) = limit {
        if pending.len() > limit {
            tracing::info!("✂️ Limiting to first {} of {} pending records", limit, pending.len());
            pending.truncate(limit);
        }
    }
}

/// `--resume N` 時取索引 N 之後的全部；否則取尚未完成的列
pub(crate) fn pending_rows(candidates: &[usize], table: &Table, marker: &str, resume: Option<usize>) -> Vec<usize> {
    match resume {
        Some(start) => candidates.iter().skip(start).copied().collect(),
        None => candidates
            .iter()
            .copied()
            .filter(|&row| !table.records[row].has_value(marker))
            .collect(),
    }
}

/// 寫出主表與報表檔，回傳主表路徑
pub(crate) async fn save_output<S: Storage>(storage: &S, path: &str, output: StageOutput) -> Result<String> {
    write_table(storage, path, &output.table).await?;
    for artifact in &output.artifacts {
        storage.write_file(&artifact.path, &artifact.bytes).await?;
        tracing::info!("📁 Wrote {}", artifact.path);
    }
    Ok(path.to_string())
}

pub(crate) fn join_error(e: tokio::task::JoinError) -> ReviewError {
    ReviewError::ProcessingError {
        message: format!("screening task failed: {}", e),
    }
}

pub(crate) async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::MockStorage;
    use crate::domain::model::Record;

    fn table(decided: &[&str]) -> Table {
        let mut table = Table::new(&["record_id", "L1_decision"]);
        for (i, decision) in decided.iter().enumerate() {
            let mut record = Record::new();
            record.set("record_id", i.to_string());
            record.set("L1_decision", *decision);
            table.push(record);
        }
        table
    }

    #[test]
    fn test_pending_rows_skip_done_or_resume_index() {
        let t = table(&["pass", "", "exclude", ""]);
        let all = [0, 1, 2, 3];
        assert_eq!(pending_rows(&all, &t, "L1_decision", None), vec![1, 3]);
        assert_eq!(pending_rows(&all, &t, "L1_decision", Some(2)), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_checkpoint_merged_unless_fresh() {
        let storage = MockStorage::new();
        storage.put("in.csv", b"record_id,title\n1,a\n2,b\n").await;
        storage.put("out.csv", b"record_id,title,L1_decision\n1,a,pass\n2,b,\n").await;

        let mut options = RunOptions::new("in.csv", "out.csv");
        let resumed = load_checkpoint(&storage, &options, "L1_decision").await.unwrap();
        assert_eq!(resumed.records[0].get("L1_decision"), "pass");

        options.fresh = true;
        let fresh = load_checkpoint(&storage, &options, "L1_decision").await.unwrap();
        assert!(!fresh.has_column("L1_decision"));
    }

    #[tokio::test]
    async fn test_short_checkpoint_keeps_every_input_row() {
        let storage = MockStorage::new();
        storage.put("in.csv", b"record_id,title\n1,a\n2,b\n3,c\n").await;
        storage.put("out.csv", b"record_id,title,L1_decision\n1,a,exclude\n").await;

        let table = load_checkpoint(&storage, &RunOptions::new("in.csv", "out.csv"), "L1_decision")
            .await
            .unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.records[0].get("L1_decision"), "exclude");
        assert_eq!(table.records[2].get("title"), "c");
        assert_eq!(pending_rows(&[0, 1, 2], &table, "L1_decision", None), vec![1, 2]);
    }

    #[test]
    fn test_merge_matches_by_record_id_not_position() {
        let mut input = Table::new(&["record_id", "title"]);
        for (id, title) in [("7", "seven"), ("3", "three")] {
            let mut record = Record::new();
            record.set("record_id", id);
            record.set("title", title);
            input.push(record);
        }
        let checkpoint = table(&["", "", "", "exclude"]);

        let merged = merge_checkpoint(input, &checkpoint);

        assert_eq!(merged.records[0].get("L1_decision"), "");
        assert_eq!(merged.records[1].get("L1_decision"), "exclude");
        assert_eq!(merged.records[1].get("title"), "three");
    }

    #[test]
    fn test_merge_without_ids_needs_equal_length() {
        let mut input = Table::new(&["title"]);
        for title in ["a", "b"] {
            let mut record = Record::new();
            record.set("title", title);
            input.push(record);
        }
        let mut checkpoint = Table::new(&["title", "L1_decision"]);
        let mut saved = Record::new();
        saved.set("title", "a");
        saved.set("L1_decision", "pass");
        checkpoint.push(saved);

        let merged = merge_checkpoint(input.clone(), &checkpoint);
        assert_eq!(merged, input);
    }

    #[test]
    fn test_limit_pending() {
        let mut pending = vec![4, 5, 6];
        limit_pending(&mut pending, Some(2));
        assert_eq!(pending, vec![4, 5]);
        limit_pending(&mut pending, None);
        assert_eq!(pending, vec![4, 5]);
    }
}
