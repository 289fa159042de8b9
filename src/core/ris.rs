use crate::domain::model::{Record, Table};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// 篩選 CSV 的欄位順序
pub const SCREENING_COLUMNS: &[&str] = &[
    "record_id",
    "pmid",
    "doi",
    "title",
    "abstract",
    "authors",
    "year",
    "journal",
    "source",
    "llm_decision",
    "llm_confidence",
    "llm_reasoning",
    "evidence_quote",
    "human_decision",
    "discrepancy",
    "resolution_note",
    "final_decision",
    "timestamp",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RisRecord {
    pub reference_type: String,
    pub record_id: Option<String>,
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<String>,
    pub journal: Option<String>,
    pub doi: Option<String>,
    pub accession: Option<String>,
    pub database: Option<String>,
}

impl RisRecord {
    /// 依資料庫名稱判斷來源
    pub fn source(&self) -> &'static str {
        let db = self.database.as_deref().unwrap_or("").to_lowercase();
        if db.contains("pubmed") || db.contains("nlm") || db.contains("medline") {
            "PubMed"
        } else if db.contains("embase") || db.contains("ovid") {
            "EMBASE"
        } else {
            "Other"
        }
    }

    /// Accession number 全為數字且至少 7 碼才視為 PMID
    pub fn pmid(&self) -> Option<&str> {
        self.accession
            .as_deref()
            .filter(|a| a.len() >= 7 && a.chars().all(|c| c.is_ascii_digit()))
    }

    pub fn has_abstract(&self) -> bool {
        self.abstract_text
            .as_deref()
            .is_some_and(|a| !a.is_empty())
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new();
        for column in SCREENING_COLUMNS {
            record.set(column, "");
        }
        record.set_opt("record_id", self.record_id.as_deref());
        record.set_opt("pmid", self.pmid());
        record.set_opt("doi", self.doi.as_deref());
        record.set_opt("title", self.title.as_deref());
        record.set_opt("abstract", self.abstract_text.as_deref());
        record.set("authors", self.authors.join("; "));
        record.set_opt("year", self.year.as_deref());
        record.set_opt("journal", self.journal.as_deref());
        record.set("source", self.source());
        record
    }
}

/// `XX  - value`；`ER  -` 行尾的空白常被匯出工具去掉，值可省略
static TAG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][A-Z0-9])  -(?: (.*))?$").expect("RIS tag pattern is valid")
});

fn split_tag_line(line: &str) -> Option<(&str, &str)> {
    let caps = TAG_LINE.captures(line)?;
    let tag = caps.get(1)?.as_str();
    let value = caps.get(2).map_or("", |m| m.as_str());
    Some((tag, value))
}

/// 解析 RIS 文字；只有以 ER 結尾的紀錄會被輸出
pub fn parse_ris(content: &str) -> Vec<RisRecord> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut records = Vec::new();
    let mut current = RisRecord::default();
    let mut current_tag: Option<String> = None;

    for raw_line in content.lines() {
        let line = raw_line.trim_end_matches(['\r', '\n']);
        match split_tag_line(line) {
            Some((tag, value)) => {
                current_tag = Some(tag.to_string());
                let value = value.to_string();
                match tag {
                    "TY" => {
                        current = RisRecord {
                            reference_type: value,
                            ..RisRecord::default()
                        }
                    }
                    "ER" => {
                        records.push(std::mem::take(&mut current));
                        current_tag = None;
                    }
                    "TI" => current.title = Some(value),
                    "AB" => current.abstract_text = Some(value),
                    "AU" => current.authors.push(value),
                    "PY" => current.year = Some(value),
                    "T2" => current.journal = Some(value),
                    "DO" => current.doi = Some(value),
                    "AN" => current.accession = Some(value),
                    "ID" => current.record_id = Some(value),
                    "DB" => current.database = Some(value),
                    _ => {}
                }
            }
            None => {
                let continuation = line.trim();
                let target = match current_tag.as_deref() {
                    Some("AB") => current.abstract_text.as_mut(),
                    Some("TI") => current.title.as_mut(),
                    _ => None,
                };
                if let Some(field) = target {
                    field.push(' ');
                    field.push_str(continuation);
                }
            }
        }
    }

    records
}

pub fn to_screening_table(records: &[RisRecord]) -> Table {
    let mut table = Table::new(SCREENING_COLUMNS);
    for record in records {
        table.push(record.to_record());
    }
    table
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * part as f64 / total as f64
    }
}

/// 解析摘要：總數、摘要與 PMID 比例、來源與年份分佈
pub fn summarize(table: &Table) -> String {
    let total = table.len();
    let with_abstract = table.count_non_empty("abstract");
    let with_pmid = table.count_non_empty("pmid");

    let mut sources: BTreeMap<&str, usize> = BTreeMap::new();
    let mut years: BTreeMap<&str, usize> = BTreeMap::new();
    for record in &table.records {
        *sources.entry(record.get("source")).or_default() += 1;
        let year = match record.get("year").trim() {
            "" => "Unknown",
            year => year,
        };
        *years.entry(year).or_default() += 1;
    }

    let mut lines = vec![
        "RIS PARSING SUMMARY".to_string(),
        format!("Total records:        {}", total),
        format!(
            "With abstract:        {} ({:.1}%)",
            with_abstract,
            percent(with_abstract, total)
        ),
        format!(
            "With PMID:            {} ({:.1}%)",
            with_pmid,
            percent(with_pmid, total)
        ),
        String::new(),
        "By source:".to_string(),
    ];
    lines.extend(sources.iter().map(|(s, c)| format!("  {}: {}", s, c)));
    lines.push(String::new());
    lines.push("By year:".to_string());
    lines.extend(years.iter().rev().map(|(y, c)| format!("  {}: {}", y, c)));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\u{feff}TY  - JOUR\r
ID  - 101\r
TI  - Hypothermic oxygenated perfusion versus static cold storage\r
  in DCD liver transplantation\r
AU  - Kang, J.\r
AU  - Lee, S.\r
AB  - Background: ECD livers were randomized.\r
Results were favourable.\r
PY  - 2024\r
T2  - Int J Surg\r
DO  - 10.1000/ijs.2024.1\r
AN  - 38765432\r
DB  - PubMed\r
ER  - \r
TY  - JOUR\r
ID  - 102\r
TI  - Porcine NMP model\r
AN  - EMB-55\r
DB  - Embase\r
ER  -\r
TY  - JOUR\r
TI  - Unterminated record\r
";

    #[test]
    fn test_parse_ris_fields_and_continuations() {
        let records = parse_ris(SAMPLE);
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.reference_type, "JOUR");
        assert_eq!(first.record_id.as_deref(), Some("101"));
        assert_eq!(
            first.title.as_deref(),
            Some("Hypothermic oxygenated perfusion versus static cold storage in DCD liver transplantation")
        );
        assert_eq!(
            first.abstract_text.as_deref(),
            Some("Background: ECD livers were randomized. Results were favourable.")
        );
        assert_eq!(first.authors, vec!["Kang, J.", "Lee, S."]);
        assert_eq!(first.pmid(), Some("38765432"));
        assert_eq!(first.source(), "PubMed");

        let second = &records[1];
        assert_eq!(second.pmid(), None);
        assert_eq!(second.source(), "EMBASE");
        assert!(!second.has_abstract());
    }

    #[test]
    fn test_tag_line_shapes() {
        assert_eq!(split_tag_line("TI  - HOPE"), Some(("TI", "HOPE")));
        assert_eq!(split_tag_line("T2  - "), Some(("T2", "")));
        assert_eq!(split_tag_line("ER  -"), Some(("ER", "")));
        assert_eq!(split_tag_line("AB  -no space"), None);
        assert_eq!(split_tag_line("ti  - lower"), None);
        assert_eq!(split_tag_line("TI - one space"), None);
        assert_eq!(split_tag_line("  continued text"), None);
    }

    #[test]
    fn test_screening_table_columns() {
        let table = to_screening_table(&parse_ris(SAMPLE));
        assert_eq!(table.headers, SCREENING_COLUMNS);
        assert_eq!(table.records[0].get("authors"), "Kang, J.; Lee, S.");
        assert_eq!(table.records[0].get("llm_decision"), "");
        assert_eq!(table.records[1].get("source"), "EMBASE");
    }

    #[test]
    fn test_source_classification() {
        let mut record = RisRecord::default();
        assert_eq!(record.source(), "Other");
        record.database = Some("Ovid MEDLINE(R)".to_string());
        assert_eq!(record.source(), "PubMed");
        record.database = Some("OVID Embase".to_string());
        assert_eq!(record.source(), "EMBASE");
    }

    #[test]
    fn test_summary_of_empty_input_has_zero_percentages() {
        let summary = summarize(&to_screening_table(&[]));
        assert!(summary.contains("Total records:        0"));
        assert!(summary.contains("(0.0%)"));
    }

    #[test]
    fn test_summary_counts() {
        let summary = summarize(&to_screening_table(&parse_ris(SAMPLE)));
        assert!(summary.contains("With abstract:        1 (50.0%)"));
        assert!(summary.contains("  PubMed: 1"));
        assert!(summary.contains("  Unknown: 1"));
    }
}
