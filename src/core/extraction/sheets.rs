//! 把模型回傳的巢狀 JSON 攤平成固定欄位的工作表列。
//!
//! 欄位名稱即 JSON 路徑（`donor_age.intervention`）；路徑上任一層不是物件時該格留白。

use crate::core::response::json_text;
use crate::domain::model::{Record, Table};
use serde_json::Value;

pub const STUDY_CHARACTERISTICS: &str = "Study_Characteristics";
pub const PERFUSION_SETTINGS: &str = "Perfusion_Settings";
pub const TIME_METRICS: &str = "Time_Metrics";
pub const OUTCOME_DATA: &str = "Outcome_Data";
pub const CONTINUOUS_OUTCOMES: &str = "Continuous_Outcomes";
pub const ROB2_RCT: &str = "RoB2_RCT";
pub const ROBINS_I_NRS: &str = "ROBINS_I_NRS";
pub const EXTRACTION_NOTES: &str = "Extraction_Notes";

/// 依路徑取值，中途遇到非物件即回傳 None
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, key| current.as_object()?.get(key))
}

/// 陣列以指定分隔符串接，其他型別同 `json_text`
fn list_text(value: Option<&Value>, separator: &str) -> Option<String> {
    match value? {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(json_text).collect();
            (!parts.is_empty()).then(|| parts.join(separator))
        }
        other => json_text(other),
    }
}

/// 一張工作表的一列，欄位依加入順序排列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetRow {
    pub headers: Vec<String>,
    pub record: Record,
}

impl SheetRow {
    fn new() -> Self {
        Self::default()
    }

    fn put(&mut self, column: &str, value: Option<String>) {
        self.headers.push(column.to_string());
        self.record.set(column, value.unwrap_or_default());
    }

    fn field(&mut self, data: &Value, path: &str) {
        self.put(path, lookup(data, path).and_then(json_text));
    }

    fn fields(&mut self, data: &Value, paths: &[&str]) {
        for path in paths {
            self.field(data, path);
        }
    }

    fn joined(&mut self, data: &Value, path: &str, separator: &str) {
        self.put(path, list_text(lookup(data, path), separator));
    }

    pub fn into_table(self) -> Table {
        let mut table = Table::new(&self.headers);
        table.push(self.record);
        table
    }
}

pub fn study_characteristics(data: &Value, study_id: &str) -> SheetRow {
    let mut row = SheetRow::new();
    row.put("study_id", Some(study_id.to_string()));
    row.fields(
        data,
        &[
            "first_author",
            "year",
            "title",
            "journal",
            "doi",
            "study_design",
            "is_multicenter",
        ],
    );
    row.joined(data, "countries", ", ");
    row.fields(
        data,
        &[
            "enrollment_period.start",
            "enrollment_period.end",
            "registry_id",
            "intervention_type",
            "comparator",
            "n_intervention",
            "n_control",
            "n_total",
            "donor_type",
            "ecd_definition_used",
            "ecd_percentage",
            "donor_age.intervention",
            "donor_age.control",
            "donor_bmi.intervention",
            "donor_bmi.control",
            "donor_risk_score.score_type",
            "donor_risk_score.intervention",
            "donor_risk_score.control",
            "recipient_age.intervention",
            "recipient_age.control",
            "meld_score.intervention",
            "meld_score.control",
            "matching_method",
        ],
    );
    row.joined(data, "matching_variables", ", ");
    row.field(data, "notes");
    row
}

/// 共同介入可能是字串陣列，也可能是 `{agent, dose, timing}` 物件陣列
fn co_interventions(value: Option<&Value>) -> (Option<String>, Option<String>) {
    let items = match value {
        Some(Value::Array(items)) if !items.is_empty() => items,
        Some(other) => return (json_text(other), None),
        None => return (None, None),
    };

    if items[0].is_object() {
        let text = |item: &Value, key: &str| item.get(key).and_then(json_text).unwrap_or_default();
        let agents: Vec<String> = items.iter().map(|c| text(c, "agent")).collect();
        let details: Vec<String> = items
            .iter()
            .map(|c| format!("{}: {} ({})", text(c, "agent"), text(c, "dose"), text(c, "timing")))
            .collect();
        (Some(agents.join(", ")), Some(details.join("; ")))
    } else {
        (list_text(value, ", "), None)
    }
}

pub fn perfusion_settings(data: &Value, study_id: &str) -> SheetRow {
    let mut row = SheetRow::new();
    row.put("study_id", Some(study_id.to_string()));
    row.fields(
        data,
        &["device_name", "device_portable", "cannulation", "perfusate_type"],
    );
    row.joined(data, "perfusate_additives", ", ");
    row.fields(
        data,
        &[
            "temperature_setting",
            "temperature_celsius",
            "oxygenation.active",
            "oxygenation.pO2_target",
            "oxygenation.flow_rate",
            "pressure_settings.portal_vein_mmHg",
            "pressure_settings.hepatic_artery_mmHg",
        ],
    );
    let (agents, details) = co_interventions(lookup(data, "co_interventions"));
    row.put("co_interventions", agents);
    row.put("co_intervention_details", details);
    row.field(data, "viability_assessment.performed");
    row.joined(data, "viability_assessment.criteria_used", ", ");
    row.fields(
        data,
        &[
            "viability_assessment.discard_rate_intervention",
            "viability_assessment.discard_rate_control",
            "notes",
        ],
    );
    row
}

pub fn time_metrics(data: &Value, study_id: &str) -> SheetRow {
    let mut row = SheetRow::new();
    row.put("study_id", Some(study_id.to_string()));
    row.fields(
        data,
        &[
            "perfusion_initiation",
            "functional_wit_minutes.intervention",
            "functional_wit_minutes.control",
            "functional_wit_minutes.measure",
            "cold_ischemia_time_hours.intervention",
            "cold_ischemia_time_hours.control",
            "cold_ischemia_time_hours.measure",
        ],
    );
    // 灌流時間可能直接是數值
    let perfusion_time = match data.get("perfusion_time_hours") {
        Some(Value::Object(_)) => lookup(data, "perfusion_time_hours.value").and_then(json_text),
        Some(other) => json_text(other),
        None => None,
    };
    row.put("perfusion_time_hours.value", perfusion_time);
    row.fields(
        data,
        &[
            "perfusion_time_hours.measure",
            "perfusion_time_hours.range_or_sd",
            "total_preservation_time_hours.intervention",
            "total_preservation_time_hours.control",
            "perfusion_to_preservation_ratio",
            "long_short_classification",
            "notes",
        ],
    );
    row
}

/// 二元結果的描述欄位
#[derive(Clone, Copy)]
enum Descriptor {
    Definition,
    DefinitionWithFollowUp,
    Timeframe,
    None,
}

const BINARY_OUTCOMES: &[(&str, Descriptor)] = &[
    ("ead", Descriptor::Definition),
    ("nas", Descriptor::DefinitionWithFollowUp),
    ("tbc", Descriptor::Definition),
    ("major_complications", Descriptor::Definition),
    ("acr", Descriptor::Definition),
    ("pnf", Descriptor::Definition),
    ("hat", Descriptor::None),
    ("retransplantation", Descriptor::Timeframe),
    ("aki", Descriptor::Definition),
    ("rrt", Descriptor::None),
    ("prs", Descriptor::Definition),
];

pub fn outcome_data(data: &Value, study_id: &str) -> SheetRow {
    let mut row = SheetRow::new();
    row.put("study_id", Some(study_id.to_string()));
    row.field(data, "follow_up_months");

    for (outcome, descriptor) in BINARY_OUTCOMES {
        let path = |field: &str| format!("{}.{}", outcome, field);
        row.field(data, &path("reported"));
        match descriptor {
            Descriptor::Definition => row.field(data, &path("definition")),
            Descriptor::DefinitionWithFollowUp => {
                row.field(data, &path("definition"));
                row.field(data, &path("follow_up_for_nas_months"));
            }
            Descriptor::Timeframe => row.field(data, &path("timeframe")),
            Descriptor::None => {}
        }
        for field in [
            "intervention_events",
            "intervention_total",
            "control_events",
            "control_total",
        ] {
            row.field(data, &path(field));
        }
        let estimate = lookup(data, &path("rr"))
            .and_then(json_text)
            .or_else(|| lookup(data, &path("effect_estimate")).and_then(json_text));
        row.put(&path("effect_estimate"), estimate);
        for field in ["ci_lower", "ci_upper", "p_value", "source_quote", "source_location"] {
            row.field(data, &path(field));
        }
    }
    row
}

pub fn continuous_outcomes(data: &Value, study_id: &str) -> SheetRow {
    let mut row = SheetRow::new();
    row.put("study_id", Some(study_id.to_string()));

    for outcome in ["hospital_stay_days", "icu_stay_days"] {
        for field in [
            "reported",
            "intervention_mean_or_median",
            "intervention_sd_or_iqr",
            "control_mean_or_median",
            "control_sd_or_iqr",
            "measure",
            "p_value",
            "source_quote",
            "source_location",
        ] {
            row.field(data, &format!("{}.{}", outcome, field));
        }
    }
    for outcome in ["graft_survival_1yr", "patient_survival_1yr"] {
        for field in [
            "reported",
            "intervention_percent",
            "control_percent",
            "intervention_events",
            "intervention_total",
            "control_events",
            "control_total",
            "hr",
            "ci_lower",
            "ci_upper",
            "p_value",
            "source_quote",
            "source_location",
        ] {
            row.field(data, &format!("{}.{}", outcome, field));
        }
    }
    for field in [
        "reported",
        "intervention_utilized",
        "intervention_offered",
        "control_utilized",
        "control_offered",
        "source_quote",
        "source_location",
    ] {
        row.field(data, &format!("utilization_rate.{}", field));
    }
    row.field(data, "notes");
    row
}

/// `support_quotes` 可以是 `{quote}` 物件或字串
fn quotes(domain: Option<&Value>) -> Option<String> {
    match domain?.get("support_quotes")? {
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|q| match q.get("quote") {
                    Some(quote) => json_text(quote),
                    None => json_text(q),
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        other => json_text(other),
    }
}

struct Domain {
    key: &'static str,
    questions: &'static [&'static str],
}

const ROB2_DOMAINS: &[Domain] = &[
    Domain {
        key: "d1_randomization",
        questions: &[
            "random_sequence_generation",
            "allocation_concealment",
            "baseline_imbalances",
        ],
    },
    Domain {
        key: "d2_deviations",
        questions: &[
            "participants_blinded",
            "personnel_blinded",
            "intention_to_treat",
            "deviations_occurred",
        ],
    },
    Domain {
        key: "d3_missing_data",
        questions: &[
            "outcome_data_available",
            "dropout_rate_intervention",
            "dropout_rate_control",
            "dropout_reasons_balanced",
        ],
    },
    Domain {
        key: "d4_measurement",
        questions: &["outcome_assessor_blinded", "outcome_objective"],
    },
    Domain {
        key: "d5_selection",
        questions: &["preregistered_protocol", "outcomes_match_protocol"],
    },
];

const ROBINS_I_DOMAINS: &[Domain] = &[
    Domain {
        key: "d1_confounding",
        questions: &[
            "confounders_considered",
            "adjustment_method",
            "residual_confounding_likely",
        ],
    },
    Domain {
        key: "d2_selection",
        questions: &["selection_into_study", "exclusions_post_intervention"],
    },
    Domain {
        key: "d3_classification",
        questions: &["classification_based_on", "misclassification_possible"],
    },
    Domain {
        key: "d4_deviations",
        questions: &["co_interventions_balanced", "switches_between_groups"],
    },
    Domain {
        key: "d5_missing_data",
        questions: &["data_available_for_all", "differential_missingness"],
    },
    Domain {
        key: "d6_measurement",
        questions: &[
            "outcome_assessors_aware",
            "outcome_ascertainment_comparable",
        ],
    },
    Domain {
        key: "d7_selection",
        questions: &["prespecified_analysis", "multiple_analyses_performed"],
    },
];

fn rob_row(data: &Value, study_id: &str, domains: &[Domain]) -> SheetRow {
    let mut row = SheetRow::new();
    row.put("study_id", Some(study_id.to_string()));
    for domain in domains {
        let section = data.get(domain.key).filter(|d| d.is_object());
        row.field(data, &format!("{}.judgment", domain.key));
        for question in domain.questions {
            row.field(
                data,
                &format!("{}.signaling_questions.{}", domain.key, question),
            );
            // RoB 2 的試驗註冊編號放在頂層
            if domain.key == "d5_selection" && *question == "preregistered_protocol" {
                row.field(data, "registry_id");
            }
        }
        row.put(&format!("{}.quotes", domain.key), quotes(section));
    }
    row.fields(data, &["overall_judgment", "overall_rationale"]);
    row
}

pub fn rob2(data: &Value, study_id: &str) -> SheetRow {
    rob_row(data, study_id, ROB2_DOMAINS)
}

pub fn robins_i(data: &Value, study_id: &str) -> SheetRow {
    rob_row(data, study_id, ROBINS_I_DOMAINS)
}

pub fn extraction_notes(data: &Value, study_id: &str, date: &str, extractor: &str) -> SheetRow {
    let mut row = SheetRow::new();
    row.put("study_id", Some(study_id.to_string()));
    row.put("date", Some(date.to_string()));
    row.put("extractor", Some(extractor.to_string()));
    row.joined(data, "data_quality_concerns", "; ");
    row.joined(data, "unclear_items_for_review", "; ");

    let first_overlap = match data.get("potential_overlaps") {
        Some(Value::Array(items)) => items.first(),
        _ => None,
    };
    let (overlap_study, overlap_reason) = match first_overlap {
        Some(item @ Value::Object(_)) => (
            item.get("study_id").and_then(json_text),
            item.get("overlap_reason").and_then(json_text),
        ),
        Some(other) => (json_text(other), None),
        None => (None, None),
    };
    row.put("overlap_study_id", overlap_study);
    row.put("overlap_reason", overlap_reason);
    row.fields(
        data,
        &["eligibility_status", "exclusion_reason", "general_notes"],
    );
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_tolerates_non_objects() {
        let data = json!({"donor_age": "not an object", "meld_score": {"control": 18}});
        assert_eq!(lookup(&data, "donor_age.intervention"), None);
        assert_eq!(lookup(&data, "meld_score.control"), Some(&json!(18)));
        assert_eq!(lookup(&Value::Null, "anything"), None);
    }

    #[test]
    fn test_study_characteristics_columns() {
        let data = json!({
            "first_author": "Kang",
            "year": 2024,
            "countries": ["Korea", "Japan"],
            "is_multicenter": true,
            "enrollment_period": {"start": "2019-01", "end": "2022-12"},
            "matching_variables": ["donor age", "MELD"]
        });

        let row = study_characteristics(&data, "Kang_2024");

        assert_eq!(row.headers.len(), 34);
        assert_eq!(row.headers[0], "study_id");
        assert_eq!(row.record.get("countries"), "Korea, Japan");
        assert_eq!(row.record.get("is_multicenter"), "True");
        assert_eq!(row.record.get("enrollment_period.end"), "2022-12");
        assert_eq!(row.record.get("matching_variables"), "donor age, MELD");
        assert_eq!(row.record.get("donor_age.control"), "");
    }

    #[test]
    fn test_co_interventions_objects_and_strings() {
        let objects = json!({"co_interventions": [
            {"agent": "tPA", "dose": "2 mg", "timing": "start of perfusion"},
            {"agent": "defatting cocktail", "dose": null, "timing": "NMP"}
        ]});
        let row = perfusion_settings(&objects, "X");
        assert_eq!(row.record.get("co_interventions"), "tPA, defatting cocktail");
        assert_eq!(
            row.record.get("co_intervention_details"),
            "tPA: 2 mg (start of perfusion); defatting cocktail:  (NMP)"
        );

        let strings = json!({"co_interventions": ["heparin", "epoprostenol"]});
        let row = perfusion_settings(&strings, "X");
        assert_eq!(row.record.get("co_interventions"), "heparin, epoprostenol");
        assert_eq!(row.record.get("co_intervention_details"), "");
    }

    #[test]
    fn test_time_metrics_scalar_perfusion_time() {
        let row = time_metrics(&json!({"perfusion_time_hours": 2.5}), "X");
        assert_eq!(row.record.get("perfusion_time_hours.value"), "2.5");
        assert_eq!(row.record.get("perfusion_time_hours.measure"), "");
    }

    #[test]
    fn test_outcome_layout_and_effect_fallback() {
        let data = json!({
            "follow_up_months": 12,
            "ead": {"reported": true, "intervention_events": 12, "rr": null, "effect_estimate": 0.5},
            "hat": "not reported"
        });

        let row = outcome_data(&data, "X");

        // 2 + 8 outcomes × 12 + nas 13 + hat/rrt 11 each
        assert_eq!(row.headers.len(), 2 + 8 * 12 + 13 + 2 * 11);
        assert_eq!(row.record.get("ead.effect_estimate"), "0.5");
        assert_eq!(row.record.get("ead.reported"), "True");
        assert_eq!(row.record.get("hat.reported"), "");
        assert!(row.headers.contains(&"nas.follow_up_for_nas_months".to_string()));
        assert!(row.headers.contains(&"retransplantation.timeframe".to_string()));
        assert!(!row.headers.contains(&"hat.definition".to_string()));
    }

    #[test]
    fn test_continuous_outcome_width() {
        let row = continuous_outcomes(&Value::Null, "X");
        assert_eq!(row.headers.len(), 1 + 9 * 2 + 13 * 2 + 7 + 1);
    }

    #[test]
    fn test_rob2_quotes_and_registry() {
        let data = json!({
            "registry_id": "NCT01234567",
            "d1_randomization": {
                "judgment": "Low",
                "signaling_questions": {"random_sequence_generation": "computer generated"},
                "support_quotes": [{"quote": "randomised 1:1", "location": "Methods"}, "sealed envelopes"]
            },
            "d5_selection": {"signaling_questions": "none"},
            "overall_judgment": "Some concerns"
        });

        let row = rob2(&data, "Smith_2023");

        assert_eq!(row.record.get("d1_randomization.quotes"), "randomised 1:1; sealed envelopes");
        assert_eq!(
            row.record.get("d1_randomization.signaling_questions.random_sequence_generation"),
            "computer generated"
        );
        assert_eq!(row.record.get("registry_id"), "NCT01234567");
        assert_eq!(
            row.record.get("d5_selection.signaling_questions.preregistered_protocol"),
            ""
        );
        let registry_at = row.headers.iter().position(|h| h == "registry_id").unwrap();
        assert_eq!(
            row.headers[registry_at - 1],
            "d5_selection.signaling_questions.preregistered_protocol"
        );
        assert_eq!(row.record.get("overall_judgment"), "Some concerns");
    }

    #[test]
    fn test_robins_i_confounders_joined() {
        let data = json!({"d1_confounding": {"signaling_questions": {"confounders_considered": ["age", "DRI"]}}});
        let row = robins_i(&data, "X");
        assert_eq!(
            row.record.get("d1_confounding.signaling_questions.confounders_considered"),
            "age, DRI"
        );
        assert_eq!(row.headers.len(), 1 + 7 * 2 + 2 * 6 + 3 + 2);
    }

    #[test]
    fn test_notes_overlap_variants() {
        let data = json!({
            "data_quality_concerns": ["small sample", "unclear denominators"],
            "potential_overlaps": [{"study_id": "Lee_2022", "overlap_reason": "same center"}]
        });
        let row = extraction_notes(&data, "X", "2026-10-16", "LLM");
        assert_eq!(row.record.get("data_quality_concerns"), "small sample; unclear denominators");
        assert_eq!(row.record.get("overlap_study_id"), "Lee_2022");

        let row = extraction_notes(&json!({"potential_overlaps": ["Park_2021"]}), "X", "d", "LLM");
        assert_eq!(row.record.get("overlap_study_id"), "Park_2021");
        assert_eq!(row.record.get("overlap_reason"), "");
    }
}
