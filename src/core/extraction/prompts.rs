use super::StudyType;
use serde_json::Value;

const PAPER_PLACEHOLDER: &str = "{{PAPER_CONTENT}}";

const QUICK_SCREEN_PROMPT: &str = r#"Quickly screen this paper for basic eligibility and data availability.

## QUESTIONS TO ANSWER

1. Study design: RCT, prospective cohort, retrospective cohort, case series, or other?
2. Intervention: which machine perfusion? (HOPE, NMP, HMP, other)
3. Comparator: what is the control group? (SCS, another perfusion type, none)
4. Population: adult liver transplant? Donor type (DCD, DBD, ECD)? ECD subgroup available?
5. Sample size: N per arm, and is it matched?
6. Co-interventions: any mentioned? (tPA, defatting agents, etc.)
7. Outcomes available: EAD, NAS, TBC, major complications, ACR, PNF, HAT,
   retransplantation, AKI, RRT, hospital stay, survival
8. Potential concerns: overlapping cohort, unusual protocol, high risk of bias indicators

## OUTPUT FORMAT
Respond with JSON only:
{
  "study_id": "FirstAuthor_Year",
  "design": "...",
  "intervention": "...",
  "comparator": "...",
  "n_intervention": 0,
  "n_control": 0,
  "donor_type": "...",
  "ecd_relevant": true,
  "co_interventions": ["..."] or null,
  "outcomes_available": ["ead", "nas"],
  "concerns": ["..."] or null,
  "proceed_to_full_extraction": true,
  "notes": "..."
}

## PAPER CONTENT
<paper>
{{PAPER_CONTENT}}
</paper>"#;

const DATA_EXTRACTION_PROMPT: &str = r#"You are a systematic review data extractor for liver transplantation machine perfusion studies.

## YOUR TASK
Extract ALL available data from this paper for meta-analysis. Do NOT make eligibility judgments. Mark missing data as null.

## STUDY CONTEXT
- HOPE (hypothermic oxygenated perfusion) vs SCS (static cold storage)
- NMP (normothermic machine perfusion) vs SCS
- In extended criteria donor (ECD) liver transplantation

## SECTIONS

### study_characteristics
study_id (FirstAuthor_Year), first_author, year, title, journal, doi, study_design,
is_multicenter, countries [list], enrollment_period {start, end}, registry_id (NCT),
intervention_type, comparator, n_intervention, n_control, n_total, donor_type,
ecd_definition_used, ecd_percentage, donor_age {intervention, control},
donor_bmi {intervention, control}, donor_risk_score {score_type, intervention, control},
recipient_age {intervention, control}, meld_score {intervention, control},
matching_method, matching_variables [list], notes

### perfusion_settings
device_name, device_portable, cannulation, perfusate_type, perfusate_additives [list],
temperature_setting, temperature_celsius, oxygenation {active, pO2_target, flow_rate},
pressure_settings {portal_vein_mmHg, hepatic_artery_mmHg},
co_interventions [list of {agent, dose, timing}],
viability_assessment {performed, criteria_used [list], discard_rate_intervention, discard_rate_control},
notes

### time_metrics
perfusion_initiation, functional_wit_minutes {intervention, control, measure},
cold_ischemia_time_hours {intervention, control, measure},
perfusion_time_hours {value, measure, range_or_sd},
total_preservation_time_hours {intervention, control},
perfusion_to_preservation_ratio, long_short_classification, notes

### outcome_data
follow_up_months, then one object per outcome:
ead, nas (add follow_up_for_nas_months), tbc, major_complications, acr, pnf, hat,
retransplantation (timeframe instead of definition), aki, rrt, prs.
Each binary outcome: reported, definition, intervention_events, intervention_total,
control_events, control_total, rr (or effect_estimate), ci_lower, ci_upper, p_value,
source_quote, source_location.
Continuous: hospital_stay_days, icu_stay_days with reported, intervention_mean_or_median,
intervention_sd_or_iqr, control_mean_or_median, control_sd_or_iqr, measure, p_value,
source_quote, source_location.
Survival: graft_survival_1yr, patient_survival_1yr with reported, intervention_percent,
control_percent, intervention_events, intervention_total, control_events, control_total,
hr, ci_lower, ci_upper, p_value, source_quote, source_location.
utilization_rate: reported, intervention_utilized, intervention_offered, control_utilized,
control_offered, source_quote, source_location.

Every outcome with data MUST include source_quote (exact sentence) and source_location
(e.g. "Table 2", "Results p.5").

### rob_information
Information (not judgments) about randomization, allocation concealment, blinding,
ITT analysis, dropouts, protocol registration, confounding control and selection,
with direct quotes.

### extraction_notes
data_quality_concerns [list], unclear_items_for_review [list],
potential_overlaps [list of {study_id, overlap_reason}], eligibility_status,
exclusion_reason, general_notes

## OUTPUT FORMAT
Return one JSON object:
{
  "study_characteristics": {...},
  "perfusion_settings": {...},
  "time_metrics": {...},
  "outcome_data": {...},
  "rob_information": {...},
  "extraction_notes": {...}
}

## PAPER CONTENT
<paper>
{{PAPER_CONTENT}}
</paper>

Extract all available data now. Use null for missing values."#;

const ROB2_SECTION: &str = r#"## FOR RANDOMIZED CONTROLLED TRIALS (RoB 2)

- d1_randomization: random_sequence_generation, allocation_concealment, baseline_imbalances
- d2_deviations: participants_blinded, personnel_blinded, intention_to_treat, deviations_occurred
- d3_missing_data: outcome_data_available, dropout_rate_intervention, dropout_rate_control, dropout_reasons_balanced
- d4_measurement: outcome_assessor_blinded, outcome_objective
- d5_selection: preregistered_protocol, outcomes_match_protocol

Also report the top-level registry_id (NCT number) if the trial was registered."#;

const ROBINS_I_SECTION: &str = r#"## FOR NON-RANDOMIZED STUDIES (ROBINS-I)

- d1_confounding: confounders_considered (list), adjustment_method, residual_confounding_likely
- d2_selection: selection_into_study, exclusions_post_intervention
- d3_classification: classification_based_on, misclassification_possible
- d4_deviations: co_interventions_balanced, switches_between_groups
- d5_missing_data: data_available_for_all, differential_missingness
- d6_measurement: outcome_assessors_aware, outcome_ascertainment_comparable
- d7_selection: prespecified_analysis, multiple_analyses_performed"#;

const ROB_EXTRACTION_PROMPT: &str = r#"You are extracting Risk of Bias information for a systematic review.

## TASK
Extract INFORMATION and QUOTES that will help human reviewers assess risk of bias.
Suggest a judgment per domain, but always back it with quotes from the paper.

## STUDY TYPE: {{STUDY_TYPE}}

{{DOMAINS}}

## OUTPUT FORMAT
Respond with JSON only. One object per domain key listed above:
{
  "study_id": "FirstAuthor_Year",
  "study_type": "{{STUDY_TYPE}}",
  "<domain key>": {
    "judgment": "Low|Some concerns|High|Moderate|Serious|Critical|No information",
    "signaling_questions": {"<question key>": "answer"},
    "support_quotes": [{"quote": "exact text from paper", "location": "section/page"}]
  },
  "overall_judgment": "...",
  "overall_rationale": "..."
}

## PAPER CONTENT
<paper>
{{PAPER_CONTENT}}
</paper>

Extract all risk of bias relevant information now."#;

const VALIDATION_PROMPT: &str = r#"## Task
Validate the following data extraction for accuracy and completeness.

## Original Study Summary
{{SUMMARY}}

## Extracted Data
{{EXTRACTED_JSON}}

## Validation Checklist
1. Factual accuracy: do extracted values match the source?
2. Completeness: are all available fields populated?
3. Eligibility decision: is the decision justified by the rationale?
4. PICO alignment: does the study actually match our criteria?
5. Red flags: were all co-interventions and selection issues identified?

## Known Problematic Patterns
- tPA, alteplase, or thrombolytic therapy during perfusion → exclude (co-intervention)
- FMN-guided, viability-based discard decisions → exclude (viability-guided selection)
- Different utilization rates between groups suggesting selection → flag for review
- Same institution appearing in multiple studies → check for overlap

## Output Format
{
  "validation_status": "Confirmed|Needs revision|Major concerns",
  "accuracy_issues": [{"field": "...", "extracted_value": "...", "correct_value": "...", "source": "..."}],
  "missing_information": ["..."],
  "eligibility_agreement": true,
  "eligibility_concerns": "...",
  "additional_red_flags": ["..."],
  "final_recommendation": "Accept extraction|Revise extraction|Manual review required",
  "confidence": "High|Medium|Low"
}

Validate now:"#;

const OVERLAP_CHECK_PROMPT: &str = r#"## Task
Assess potential patient overlap between studies for meta-analysis.

## Study A
{{STUDY_A}}

## Study B
{{STUDY_B}}

## Overlap Assessment Criteria
High probability of overlap if:
- Same institution(s)
- Overlapping enrollment periods
- Similar sample sizes with same intervention
- Same trial registry ID
- Shared authorship with same center

Check for:
- Post-hoc analyses of RCTs
- Extended follow-up publications
- Subgroup publications
- Registry studies including trial patients

## Output Format
{
  "study_id_a": "...",
  "study_id_b": "...",
  "overlap_type": "Confirmed Duplicate|Likely Overlap|Subset|No Overlap|Unknown",
  "overlap_evidence": "...",
  "shared_elements": {
    "centers": ["..."],
    "enrollment_overlap": "...",
    "registry_id": "...",
    "author_overlap": ["..."]
  },
  "estimated_overlap_percent": null,
  "resolution_recommendation": "Use A only|Use B only|Outcome-specific|Pending author contact",
  "resolution_rationale": "...",
  "confidence": "High|Medium|Low"
}

Assess overlap now:"#;

pub fn quick_screen_prompt(paper: &str) -> String {
    QUICK_SCREEN_PROMPT.replace(PAPER_PLACEHOLDER, paper)
}

pub fn full_extraction_prompt(paper: &str) -> String {
    DATA_EXTRACTION_PROMPT.replace(PAPER_PLACEHOLDER, paper)
}

/// 依研究類型只放入對應工具的 domain 說明
pub fn rob_prompt(paper: &str, study_type: StudyType) -> String {
    let domains = match study_type {
        StudyType::Rct => ROB2_SECTION,
        StudyType::Nrs => ROBINS_I_SECTION,
    };
    ROB_EXTRACTION_PROMPT
        .replace("{{DOMAINS}}", domains)
        .replace("{{STUDY_TYPE}}", study_type.as_str())
        .replace(PAPER_PLACEHOLDER, paper)
}

pub fn validation_prompt(summary: &str, extraction: &Value) -> String {
    VALIDATION_PROMPT
        .replace("{{SUMMARY}}", summary)
        .replace("{{EXTRACTED_JSON}}", &pretty(extraction))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// A 為登錄表中既有研究，B 為本次萃取的研究特徵
pub fn overlap_check_prompt(study_a: &Value, study_b: &Value) -> String {
    OVERLAP_CHECK_PROMPT
        .replace("{{STUDY_A}}", &pretty(study_a))
        .replace("{{STUDY_B}}", &pretty(study_b))
}
