use crate::core::extraction::sheets::lookup;
use crate::core::response::json_text;
use crate::core::table::{read_table, write_table};
use crate::domain::model::{Record, Table};
use crate::domain::ports::Storage;
use crate::utils::error::Result;
use serde::Serialize;
use serde_json::Value;

pub const STUDY_REGISTRY_FILE: &str = "Study_Registry.csv";
pub const OUTCOME_MATRIX_FILE: &str = "Outcome_Matrix.csv";
pub const CHANGE_LOG_FILE: &str = "Change_Log.csv";
pub const COHORT_LINKAGE_FILE: &str = "Cohort_Linkage.csv";

pub const REGISTRY_COLUMNS: &[&str] = &[
    "Study_ID",
    "First_Author",
    "Year",
    "Title",
    "Journal",
    "DOI",
    "Study_Design",
    "Centers",
    "Countries",
    "Enrollment_Period",
    "Registry ID (NCT)",
    "Parent_Study_ID",
    "Relationship_Type",
    "N_Total",
    "N_Intervention",
    "N_Control",
    "Intervention_Type",
    "Notes",
];

pub const OUTCOME_COLUMNS: &[&str] = &[
    "EAD",
    "NAS",
    "TBC",
    "ACR",
    "PNF",
    "HAT",
    "Retx",
    "RRT",
    "1yr Graft",
    "1yr Patient",
    "AKI",
    "PRS",
    "Major Comp",
    "Hospital Stay",
    "ICU Stay",
];

/// outcome_data 欄位 → Outcome_Matrix 欄名
const OUTCOME_FIELDS: &[(&str, &str)] = &[
    ("ead", "EAD"),
    ("nas", "NAS"),
    ("tbc", "TBC"),
    ("pnf", "PNF"),
    ("acr", "ACR"),
    ("hat", "HAT"),
    ("retransplantation", "Retx"),
    ("rrt", "RRT"),
    ("aki", "AKI"),
    ("prs", "PRS"),
    ("major_complications", "Major Comp"),
    ("graft_survival_1yr", "1yr Graft"),
    ("patient_survival_1yr", "1yr Patient"),
    ("hospital_stay_days", "Hospital Stay"),
    ("icu_stay_days", "ICU Stay"),
];

pub const CHANGE_LOG_COLUMNS: &[&str] = &["Date", "Author", "Study_IDs", "Action", "Rationale", "Status"];

/// Selected_Study 與 Verified_By 留給人工填寫
pub const LINKAGE_COLUMNS: &[&str] = &[
    "Study_ID_A",
    "Study_ID_B",
    "Overlap_Type",
    "Overlap_Evidence",
    "Shared_Centers",
    "Enrollment_Overlap",
    "Estimated_Overlap_Percent",
    "Resolution_Recommendation",
    "Selected_Study",
    "Resolution_Rationale",
    "Verified_By",
];

const NCT_COLUMN: &str = "Registry ID (NCT)";
const NO_OVERLAP: &str = "No Overlap";
const UNKNOWN_OVERLAP: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMatch {
    pub existing_study_id: String,
    pub match_type: String,
    pub existing_nct: String,
    pub new_nct: String,
    /// 既有研究在登錄表中的整列，供重疊評估使用
    #[serde(skip)]
    pub existing: Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryStatus {
    Registered,
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixStatus {
    Added,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingOutcome {
    pub study_id: String,
    pub registry: RegistryStatus,
    pub outcome_matrix: MatrixStatus,
    pub duplicates: Vec<DuplicateMatch>,
}

/// 研究登錄、結果矩陣與變更紀錄三張 CSV
pub struct CohortTracker<'a, S: Storage> {
    storage: &'a S,
    dir: String,
}

impl<'a, S: Storage> CohortTracker<'a, S> {
    pub fn new(storage: &'a S, dir: &str) -> Self {
        Self {
            storage,
            dir: dir.trim_end_matches('/').to_string(),
        }
    }

    fn path(&self, file: &str) -> String {
        format!("{}/{}", self.dir, file)
    }

    /// 檔案不存在時建立只有標題列的表
    async fn load(&self, file: &str, columns: &[&str]) -> Result<Table> {
        let path = self.path(file);
        if self.storage.exists(&path).await {
            let mut table = read_table(self.storage, &path).await?;
            table.ensure_columns(columns);
            Ok(table)
        } else {
            Ok(Table::new(columns))
        }
    }

    /// 登錄研究、更新結果矩陣；新登錄的研究寫入變更紀錄
    pub async fn process(&self, full_extraction: &Value) -> Result<TrackingOutcome> {
        let characteristics = full_extraction
            .get("study_characteristics")
            .cloned()
            .unwrap_or(Value::Null);
        let study_id = lookup(&characteristics, "study_id")
            .and_then(json_text)
            .unwrap_or_else(|| "Unknown".to_string());

        let mut registry = self.load(STUDY_REGISTRY_FILE, REGISTRY_COLUMNS).await?;
        let (registry_status, duplicates) = if registry
            .records
            .iter()
            .any(|r| r.get("Study_ID") == study_id)
        {
            tracing::info!("📋 Study {} already exists in registry", study_id);
            (RegistryStatus::Exists, Vec::new())
        } else {
            let duplicates = find_duplicates(&registry, &characteristics);
            registry.push(registry_row(&study_id, &characteristics, &duplicates));
            write_table(self.storage, &self.path(STUDY_REGISTRY_FILE), &registry).await?;
            (RegistryStatus::Registered, duplicates)
        };

        let mut matrix = self.load(OUTCOME_MATRIX_FILE, &matrix_columns()).await?;
        let row = outcome_matrix_row(&study_id, full_extraction.get("outcome_data"));
        let matrix_status = match matrix
            .records
            .iter()
            .position(|r| r.get("Study_ID") == study_id)
        {
            Some(index) => {
                matrix.records[index] = row;
                MatrixStatus::Updated
            }
            None => {
                matrix.push(row);
                MatrixStatus::Added
            }
        };
        write_table(self.storage, &self.path(OUTCOME_MATRIX_FILE), &matrix).await?;

        if registry_status == RegistryStatus::Registered {
            let mut log = self.load(CHANGE_LOG_FILE, CHANGE_LOG_COLUMNS).await?;
            let mut entry = Record::new();
            entry.set("Date", chrono::Local::now().format("%Y-%m-%d").to_string());
            entry.set("Author", "LLM");
            entry.set("Study_IDs", study_id.as_str());
            entry.set("Action", "Auto-registered from LLM extraction");
            entry.set("Rationale", "Extracted with review-etl extract");
            entry.set("Status", "Pending");
            log.push(entry);
            write_table(self.storage, &self.path(CHANGE_LOG_FILE), &log).await?;
        }

        for duplicate in &duplicates {
            tracing::warn!(
                "⚠️ Potential duplicate: {} ({})",
                duplicate.existing_study_id,
                duplicate.match_type
            );
        }

        Ok(TrackingOutcome {
            study_id,
            registry: registry_status,
            outcome_matrix: matrix_status,
            duplicates,
        })
    }
}

impl<S: Storage> CohortTracker<'_, S> {
    /// 重疊評估寫入世代連結表；確認有重疊時，新研究的登錄列改記母研究與關係類型
    pub async fn record_overlap(
        &self,
        study_id: &str,
        duplicate: &DuplicateMatch,
        assessment: &Value,
    ) -> Result<()> {
        let mut linkage = self.load(COHORT_LINKAGE_FILE, LINKAGE_COLUMNS).await?;
        linkage.push(linkage_row(&duplicate.existing_study_id, study_id, assessment));
        write_table(self.storage, &self.path(COHORT_LINKAGE_FILE), &linkage).await?;

        let kind = overlap_type(assessment);
        if kind == NO_OVERLAP || kind == UNKNOWN_OVERLAP {
            return Ok(());
        }
        let mut registry = self.load(STUDY_REGISTRY_FILE, REGISTRY_COLUMNS).await?;
        if let Some(index) = registry
            .records
            .iter()
            .position(|r| r.get("Study_ID") == study_id)
        {
            registry.set_cell(index, "Parent_Study_ID", duplicate.existing_study_id.as_str());
            registry.set_cell(index, "Relationship_Type", kind);
            write_table(self.storage, &self.path(STUDY_REGISTRY_FILE), &registry).await?;
        }
        tracing::warn!(
            "🔗 {} vs {}: {}",
            duplicate.existing_study_id,
            study_id,
            kind
        );
        Ok(())
    }
}

/// 評估缺少 overlap_type 時視為 Unknown
pub fn overlap_type(assessment: &Value) -> &str {
    assessment
        .get("overlap_type")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(UNKNOWN_OVERLAP)
}

/// 登錄列只保留有值的欄位，依登錄表欄序
pub fn registry_summary(record: &Record) -> Value {
    let fields: serde_json::Map<String, Value> = REGISTRY_COLUMNS
        .iter()
        .filter(|column| record.has_value(column))
        .map(|column| (column.to_string(), Value::String(record.get(column).to_string())))
        .collect();
    Value::Object(fields)
}

pub fn linkage_row(study_a: &str, study_b: &str, assessment: &Value) -> Record {
    let text = |path: &str| lookup(assessment, path).and_then(json_text);
    let mut record = Record::new();
    record.set("Study_ID_A", text("study_id_a").unwrap_or_else(|| study_a.to_string()));
    record.set("Study_ID_B", text("study_id_b").unwrap_or_else(|| study_b.to_string()));
    record.set("Overlap_Type", overlap_type(assessment));
    record.set_opt(
        "Overlap_Evidence",
        text("overlap_evidence").or_else(|| text("error")).as_deref(),
    );
    record.set_opt("Shared_Centers", text("shared_elements.centers").as_deref());
    record.set_opt("Enrollment_Overlap", text("shared_elements.enrollment_overlap").as_deref());
    record.set_opt("Estimated_Overlap_Percent", text("estimated_overlap_percent").as_deref());
    record.set_opt("Resolution_Recommendation", text("resolution_recommendation").as_deref());
    record.set("Selected_Study", "");
    record.set_opt("Resolution_Rationale", text("resolution_rationale").as_deref());
    record.set("Verified_By", "");
    record
}

fn matrix_columns() -> Vec<&'static str> {
    std::iter::once("Study_ID")
        .chain(OUTCOME_COLUMNS.iter().copied())
        .collect()
}

/// 以註冊編號（不分大小寫）包含關係比對既有研究
pub fn find_duplicates(registry: &Table, characteristics: &Value) -> Vec<DuplicateMatch> {
    let registry_id = match lookup(characteristics, "registry_id").and_then(json_text) {
        Some(id) => id,
        None => return Vec::new(),
    };
    let needle = registry_id.to_uppercase();

    registry
        .records
        .iter()
        .filter(|r| r.has_value(NCT_COLUMN) && r.get(NCT_COLUMN).to_uppercase().contains(&needle))
        .map(|r| DuplicateMatch {
            existing_study_id: r.get("Study_ID").to_string(),
            match_type: "NCT Match".to_string(),
            existing_nct: r.get(NCT_COLUMN).to_string(),
            new_nct: registry_id.clone(),
            existing: r.clone(),
        })
        .collect()
}

fn registry_row(study_id: &str, chars: &Value, duplicates: &[DuplicateMatch]) -> Record {
    let text = |path: &str| lookup(chars, path).and_then(json_text);
    // 巢狀 enrollment_period 或攤平的 enrollment_period_start/end
    let start = text("enrollment_period.start").or_else(|| text("enrollment_period_start"));
    let end = text("enrollment_period.end").or_else(|| text("enrollment_period_end"));
    let period = match (start, end) {
        (None, None) => String::new(),
        (start, end) => format!("{}/{}", start.unwrap_or_default(), end.unwrap_or_default()),
    };

    let mut record = Record::new();
    record.set("Study_ID", study_id);
    record.set_opt("First_Author", text("first_author").as_deref());
    record.set_opt("Year", text("year").as_deref());
    record.set_opt("Title", text("title").as_deref());
    record.set_opt("Journal", text("journal").as_deref());
    record.set_opt("DOI", text("doi").as_deref());
    record.set_opt("Study_Design", text("study_design").as_deref());
    record.set_opt("Centers", text("centers").as_deref());
    record.set_opt("Countries", text("countries").as_deref());
    record.set("Enrollment_Period", period);
    record.set_opt(NCT_COLUMN, text("registry_id").as_deref());
    record.set("Parent_Study_ID", "-");
    record.set("Relationship_Type", "Primary");
    record.set_opt("N_Total", text("n_total").as_deref());
    record.set_opt("N_Intervention", text("n_intervention").as_deref());
    record.set_opt("N_Control", text("n_control").as_deref());
    record.set_opt("Intervention_Type", text("intervention_type").as_deref());
    let notes: Vec<String> = duplicates
        .iter()
        .map(|d| format!("⚠️ Potential duplicate: {} ({})", d.existing_study_id, d.match_type))
        .collect();
    record.set("Notes", notes.join("; "));
    record
}

/// reported 為真 → Include，其餘 → N/A
pub fn outcome_matrix_row(study_id: &str, outcome_data: Option<&Value>) -> Record {
    let mut record = Record::new();
    record.set("Study_ID", study_id);
    for (field, column) in OUTCOME_FIELDS {
        let reported = outcome_data
            .and_then(|o| lookup(o, &format!("{}.reported", field)))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        record.set(column, if reported { "Include" } else { "N/A" });
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::parse_table;
    use crate::core::testing::MockStorage;
    use serde_json::json;

    fn extraction(study_id: &str, nct: &str) -> Value {
        json!({
            "study_characteristics": {
                "study_id": study_id,
                "first_author": "Kang",
                "year": 2024,
                "countries": ["Korea"],
                "enrollment_period": {"start": "2019", "end": null},
                "registry_id": nct,
                "n_total": 110
            },
            "outcome_data": {
                "ead": {"reported": true},
                "nas": {"reported": false},
                "hospital_stay_days": "n/a"
            }
        })
    }

    #[tokio::test]
    async fn test_register_then_exists() {
        let storage = MockStorage::new();
        let tracker = CohortTracker::new(&storage, "tracking");

        let first = tracker.process(&extraction("Kang_2024", "NCT04000001")).await.unwrap();
        assert_eq!(first.registry, RegistryStatus::Registered);
        assert_eq!(first.outcome_matrix, MatrixStatus::Added);

        let second = tracker.process(&extraction("Kang_2024", "NCT04000001")).await.unwrap();
        assert_eq!(second.registry, RegistryStatus::Exists);
        assert_eq!(second.outcome_matrix, MatrixStatus::Updated);

        let registry = storage.get_text("tracking/Study_Registry.csv").await.unwrap();
        assert_eq!(registry.lines().count(), 2);
        assert!(registry.contains("2019/"));
        let log = storage.get_text("tracking/Change_Log.csv").await.unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.contains("Auto-registered from LLM extraction"));
    }

    #[tokio::test]
    async fn test_duplicate_registry_id_flagged() {
        let storage = MockStorage::new();
        let tracker = CohortTracker::new(&storage, "tracking");
        tracker.process(&extraction("Kang_2024", "NCT04000001")).await.unwrap();

        let outcome = tracker.process(&extraction("Kang_2025", "nct04000001")).await.unwrap();

        assert_eq!(outcome.duplicates.len(), 1);
        assert_eq!(outcome.duplicates[0].existing_study_id, "Kang_2024");
        let registry = storage.get_text("tracking/Study_Registry.csv").await.unwrap();
        assert!(registry.contains("⚠️ Potential duplicate: Kang_2024 (NCT Match)"));
    }

    #[tokio::test]
    async fn test_confirmed_overlap_links_parent_study() {
        let storage = MockStorage::new();
        let tracker = CohortTracker::new(&storage, "tracking");
        tracker.process(&extraction("Kang_2024", "NCT04000001")).await.unwrap();
        let outcome = tracker.process(&extraction("Kang_2025", "NCT04000001")).await.unwrap();
        let assessment = json!({
            "overlap_type": "Subset",
            "overlap_evidence": "Same trial, extended follow-up",
            "shared_elements": {"centers": ["Seoul", "Busan"], "enrollment_overlap": "2019-2021"},
            "resolution_recommendation": "Outcome-specific"
        });

        tracker
            .record_overlap("Kang_2025", &outcome.duplicates[0], &assessment)
            .await
            .unwrap();

        let linkage = parse_table(&storage.get_file("tracking/Cohort_Linkage.csv").await.unwrap()).unwrap();
        assert_eq!(linkage.records[0].get("Study_ID_A"), "Kang_2024");
        assert_eq!(linkage.records[0].get("Study_ID_B"), "Kang_2025");
        assert_eq!(linkage.records[0].get("Shared_Centers"), "Seoul, Busan");
        assert_eq!(linkage.records[0].get("Selected_Study"), "");
        let registry = parse_table(&storage.get_file("tracking/Study_Registry.csv").await.unwrap()).unwrap();
        assert_eq!(registry.records[0].get("Relationship_Type"), "Primary");
        assert_eq!(registry.records[1].get("Parent_Study_ID"), "Kang_2024");
        assert_eq!(registry.records[1].get("Relationship_Type"), "Subset");
    }

    #[tokio::test]
    async fn test_unknown_overlap_keeps_registry_row() {
        let storage = MockStorage::new();
        let tracker = CohortTracker::new(&storage, "tracking");
        tracker.process(&extraction("Kang_2024", "NCT04000001")).await.unwrap();
        let outcome = tracker.process(&extraction("Kang_2025", "NCT04000001")).await.unwrap();

        tracker
            .record_overlap("Kang_2025", &outcome.duplicates[0], &json!({"error": "timeout"}))
            .await
            .unwrap();

        let linkage = parse_table(&storage.get_file("tracking/Cohort_Linkage.csv").await.unwrap()).unwrap();
        assert_eq!(linkage.records[0].get("Overlap_Type"), "Unknown");
        assert_eq!(linkage.records[0].get("Overlap_Evidence"), "timeout");
        let registry = parse_table(&storage.get_file("tracking/Study_Registry.csv").await.unwrap()).unwrap();
        assert_eq!(registry.records[1].get("Parent_Study_ID"), "-");
        assert_eq!(registry.records[1].get("Relationship_Type"), "Primary");
    }

    #[test]
    fn test_registry_summary_skips_blank_fields() {
        let mut record = Record::new();
        record.set("Study_ID", "Kang_2024");
        record.set("Centers", "");
        record.set("N_Total", "110");
        let summary = registry_summary(&record);
        assert_eq!(summary, json!({"Study_ID": "Kang_2024", "N_Total": "110"}));
    }

    #[test]
    fn test_outcome_matrix_values() {
        let data = extraction("X", "");
        let row = outcome_matrix_row("X", data.get("outcome_data"));
        assert_eq!(row.get("EAD"), "Include");
        assert_eq!(row.get("NAS"), "N/A");
        assert_eq!(row.get("Hospital Stay"), "N/A");
        assert_eq!(row.get("Retx"), "N/A");
    }
}
