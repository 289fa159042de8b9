use crate::core::screening::judge_prefix;
use crate::domain::criteria::split_tags;
use crate::domain::model::{AutoDecision, Layer1Decision, Layer2Decision, Record, ReviewPriority, Table};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

pub const DECISION_COLUMNS: &[&str] = &["auto_decision", "review_priority", "review_reason"];

const SAMPLE_SEED: u64 = 42;
const MIN_LOW_SAMPLE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalDecision {
    pub auto_decision: AutoDecision,
    pub review_priority: ReviewPriority,
    pub review_reason: Option<String>,
}

impl FinalDecision {
    fn new(auto_decision: AutoDecision, review_priority: ReviewPriority, reason: Option<String>) -> Self {
        Self {
            auto_decision,
            review_priority,
            review_reason: reason,
        }
    }
}

/// 兩位評審的標籤（決定讀取 `L2_<label>_decision` 欄位）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeLabels {
    pub primary: String,
    pub secondary: String,
}

impl JudgeLabels {
    pub fn new(primary: &str, secondary: &str) -> Self {
        Self {
            primary: primary.to_string(),
            secondary: secondary.to_string(),
        }
    }

    pub fn primary_column(&self) -> String {
        format!("{}_decision", judge_prefix(&self.primary))
    }

    pub fn secondary_column(&self) -> String {
        format!("{}_decision", judge_prefix(&self.secondary))
    }

    /// 首字大寫，用於 review_reason
    fn display(label: &str) -> String {
        let mut chars = label.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

pub fn decide(record: &Record, labels: &JudgeLabels) -> FinalDecision {
    if Layer1Decision::parse(record.get("L1_decision")) == Some(Layer1Decision::Exclude) {
        return FinalDecision::new(AutoDecision::Exclude, ReviewPriority::None, None);
    }

    let first = record.get(&labels.primary_column()).trim();
    let second = record.get(&labels.secondary_column()).trim();

    if first.is_empty() && second.is_empty() {
        return FinalDecision::new(
            AutoDecision::Pending,
            ReviewPriority::High,
            Some("Layer 2 not run".to_string()),
        );
    }

    if first == second {
        if Layer2Decision::parse(first) == Some(Layer2Decision::Include) {
            FinalDecision::new(
                AutoDecision::Include,
                ReviewPriority::High,
                Some("Both models include - verify".to_string()),
            )
        } else {
            FinalDecision::new(
                AutoDecision::Exclude,
                ReviewPriority::Low,
                Some("Both models exclude".to_string()),
            )
        }
    } else {
        FinalDecision::new(
            AutoDecision::Uncertain,
            ReviewPriority::High,
            Some(format!(
                "Disagreement: {}={}, {}={}",
                JudgeLabels::display(&labels.primary),
                first,
                JudgeLabels::display(&labels.secondary),
                second
            )),
        )
    }
}

/// 寫入自動判定並重設人工欄位；final_decision 先等於 auto_decision
pub fn apply_decisions(table: &mut Table, labels: &JudgeLabels) {
    table.ensure_columns(DECISION_COLUMNS);
    table.ensure_columns(&["human_decision", "resolution_note", "final_decision"]);
    for record in &mut table.records {
        let decision = decide(record, labels);
        record.set("auto_decision", decision.auto_decision.as_str());
        record.set("review_priority", decision.review_priority.as_str());
        record.set_opt("review_reason", decision.review_reason.as_deref());
        record.set("human_decision", "");
        record.set("resolution_note", "");
        record.set("final_decision", decision.auto_decision.as_str());
    }
}

/// 以逗號拆開 L1_exclusion_tags 後逐一計數
pub fn exclusion_breakdown(table: &Table) -> BTreeMap<String, usize> {
    let mut breakdown = BTreeMap::new();
    for record in &table.records {
        for tag in split_tags(record.get("L1_exclusion_tags")) {
            *breakdown.entry(tag.to_string()).or_insert(0) += 1;
        }
    }
    breakdown
}

pub fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * part as f64 / total as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgreementTally {
    pub evaluated: usize,
    pub both_include: usize,
    pub both_exclude: usize,
}

impl AgreementTally {
    pub fn disagree(&self) -> usize {
        self.evaluated - self.both_include - self.both_exclude
    }

    pub fn rate(&self) -> f64 {
        percent(self.both_include + self.both_exclude, self.evaluated)
    }
}

/// 只統計 Layer 1 放行且至少一位評審有結果的列
pub fn agreement_tally(table: &Table, labels: &JudgeLabels) -> AgreementTally {
    let (primary, secondary) = (labels.primary_column(), labels.secondary_column());
    tally(
        table
            .records
            .iter()
            .filter(|r| r.get("L1_decision") == Layer1Decision::Pass.as_str())
            .filter(|r| r.has_value(&primary) || r.has_value(&secondary)),
        labels,
    )
}

pub fn tally<'a>(records: impl IntoIterator<Item = &'a Record>, labels: &JudgeLabels) -> AgreementTally {
    let primary = labels.primary_column();
    let secondary = labels.secondary_column();
    let mut tally = AgreementTally::default();
    for record in records {
        tally.evaluated += 1;
        let (first, second) = (record.get(&primary), record.get(&secondary));
        if first == Layer2Decision::Include.as_str() && second == Layer2Decision::Include.as_str() {
            tally.both_include += 1;
        } else if first == Layer2Decision::Exclude.as_str()
            && second == Layer2Decision::Exclude.as_str()
        {
            tally.both_exclude += 1;
        }
    }
    tally
}

pub fn summary_report(table: &Table, labels: &JudgeLabels) -> String {
    let rule = "=".repeat(60);
    let total = table.len();
    let l1_exclude = table.count_where("L1_decision", Layer1Decision::Exclude.as_str());
    let l1_pass = table.count_where("L1_decision", Layer1Decision::Pass.as_str());
    let tally = agreement_tally(table, labels);

    let final_include = table.count_where("auto_decision", AutoDecision::Include.as_str());
    let final_exclude = table.count_where("auto_decision", AutoDecision::Exclude.as_str());
    let final_uncertain = table.count_where("auto_decision", AutoDecision::Uncertain.as_str());
    let final_pending = table.count_where("auto_decision", AutoDecision::Pending.as_str());

    let mut out = String::new();
    out.push_str(&format!(
        "\n{rule}\nSCREENING SUMMARY REPORT\nGenerated: {}\n{rule}\n\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!(
        "OVERVIEW\n--------\nTotal records screened: {}\n\n",
        total
    ));
    out.push_str(&format!(
        "LAYER 1: EXCLUSION SCREENING\n----------------------------\nExcluded: {} ({:.1}%)\nPassed to Layer 2: {} ({:.1}%)\n\nExclusion breakdown:\n",
        l1_exclude,
        percent(l1_exclude, total),
        l1_pass,
        percent(l1_pass, total)
    ));
    for (tag, count) in exclusion_breakdown(table) {
        out.push_str(&format!("  {}: {}\n", tag, count));
    }
    out.push_str(&format!(
        "\nLAYER 2: INCLUSION VERIFICATION\n-------------------------------\nRecords evaluated: {}\nBoth models INCLUDE: {}\nBoth models EXCLUDE: {}\nDisagreement: {}\nInter-model agreement: {:.1}%\n\n",
        tally.evaluated,
        tally.both_include,
        tally.both_exclude,
        tally.disagree(),
        tally.rate()
    ));
    out.push_str(&format!(
        "FINAL DECISIONS (Auto)\n----------------------\nInclude (pending human review): {}\nExclude: {}\nUncertain (needs review): {}\n",
        final_include, final_exclude, final_uncertain
    ));
    if final_pending > 0 {
        out.push_str(&format!("Pending (Layer 2 not run): {}\n", final_pending));
    }
    out.push_str(&format!(
        "\nHUMAN REVIEW REQUIRED\n---------------------\nHigh priority (include/uncertain): {}\nLow priority (spot-check excludes): ~{} (10% sample)\n\n{rule}\n",
        final_include + final_uncertain + final_pending,
        tally.both_exclude / 10
    ));
    out
}

pub fn high_priority_columns(labels: &JudgeLabels) -> Vec<String> {
    let mut columns: Vec<String> = [
        "record_id",
        "pmid",
        "title",
        "abstract",
        "year",
        "journal",
        "L1_decision",
        "L1_exclusion_tags",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();
    for label in [&labels.primary, &labels.secondary] {
        let prefix = judge_prefix(label);
        for suffix in ["decision", "confidence", "reasoning"] {
            columns.push(format!("{}_{}", prefix, suffix));
        }
    }
    columns.push("auto_decision".to_string());
    columns.push("review_reason".to_string());
    columns
}

pub fn low_sample_columns(labels: &JudgeLabels) -> Vec<String> {
    let mut columns: Vec<String> = ["record_id", "pmid", "title", "abstract"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    for label in [&labels.primary, &labels.secondary] {
        let prefix = judge_prefix(label);
        columns.push(format!("{}_decision", prefix));
        columns.push(format!("{}_reasoning", prefix));
    }
    columns.push("auto_decision".to_string());
    columns
}

fn rows_with_priority(table: &Table, priority: ReviewPriority) -> Vec<usize> {
    table
        .records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.get("review_priority") == priority.as_str())
        .map(|(i, _)| i)
        .collect()
}

pub fn high_priority_rows(table: &Table) -> Vec<usize> {
    rows_with_priority(table, ReviewPriority::High)
}

pub fn low_sample_size(population: usize) -> usize {
    population.min(MIN_LOW_SAMPLE.max(population / 10))
}

/// 固定種子抽樣，結果依原表順序排列
pub fn low_priority_sample(table: &Table) -> Vec<usize> {
    let low = rows_with_priority(table, ReviewPriority::Low);
    let amount = low_sample_size(low.len());
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
    let mut picked: Vec<usize> = rand::seq::index::sample(&mut rng, low.len(), amount)
        .into_iter()
        .map(|i| low[i])
        .collect();
    picked.sort_unstable();
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> JudgeLabels {
        JudgeLabels::new("pro", "sonnet")
    }

    fn row(l1: &str, pro: &str, sonnet: &str) -> Record {
        let mut record = Record::new();
        record.set("L1_decision", l1);
        record.set("L2_pro_decision", pro);
        record.set("L2_sonnet_decision", sonnet);
        record
    }

    #[test]
    fn test_decision_table() {
        let l = labels();
        assert_eq!(
            decide(&row("exclude", "", ""), &l),
            FinalDecision::new(AutoDecision::Exclude, ReviewPriority::None, None)
        );
        assert_eq!(decide(&row("pass", "", ""), &l).auto_decision, AutoDecision::Pending);

        let include = decide(&row("pass", "include", "include"), &l);
        assert_eq!(include.auto_decision, AutoDecision::Include);
        assert_eq!(include.review_priority, ReviewPriority::High);

        let exclude = decide(&row("pass", "exclude", "exclude"), &l);
        assert_eq!(exclude.review_priority, ReviewPriority::Low);

        let split = decide(&row("pass", "include", "exclude"), &l);
        assert_eq!(split.auto_decision, AutoDecision::Uncertain);
        assert_eq!(
            split.review_reason.as_deref(),
            Some("Disagreement: Pro=include, Sonnet=exclude")
        );
    }

    #[test]
    fn test_apply_resets_human_columns() {
        let mut table = Table::new(&["record_id", "L1_decision", "human_decision"]);
        let mut record = row("pass", "include", "include");
        record.set("human_decision", "exclude");
        table.push(record);

        apply_decisions(&mut table, &labels());

        assert_eq!(table.records[0].get("human_decision"), "");
        assert_eq!(table.records[0].get("final_decision"), "include");
        assert!(table.has_column("review_reason"));
    }

    #[test]
    fn test_breakdown_counts_each_tag() {
        let mut table = Table::new(&["L1_exclusion_tags"]);
        for tags in ["EXC-1, EXC-10", "EXC-10", ""] {
            let mut record = Record::new();
            record.set("L1_exclusion_tags", tags);
            table.push(record);
        }
        let breakdown = exclusion_breakdown(&table);
        assert_eq!(breakdown["EXC-1"], 1);
        assert_eq!(breakdown["EXC-10"], 2);
    }

    #[test]
    fn test_summary_of_empty_table() {
        let summary = summary_report(&Table::new(&["L1_decision"]), &labels());
        assert!(summary.contains("Total records screened: 0"));
        assert!(summary.contains("Excluded: 0 (0.0%)"));
        assert!(summary.contains("Inter-model agreement: 0.0%"));
    }

    #[test]
    fn test_sample_size_bounds() {
        assert_eq!(low_sample_size(0), 0);
        assert_eq!(low_sample_size(4), 4);
        assert_eq!(low_sample_size(50), 10);
        assert_eq!(low_sample_size(250), 25);
    }

    #[test]
    fn test_low_sample_is_deterministic() {
        let mut table = Table::new(&["review_priority"]);
        for i in 0..120 {
            let mut record = Record::new();
            record.set("review_priority", if i % 2 == 0 { "low" } else { "high" });
            table.push(record);
        }

        let first = low_priority_sample(&table);
        let second = low_priority_sample(&table);

        assert_eq!(first.len(), 10);
        assert_eq!(first, second);
        assert!(first.iter().all(|&i| i % 2 == 0));
        assert_eq!(high_priority_rows(&table).len(), 60);
    }
}
