use serde_json::{json, Value};

pub const NO_ABSTRACT: &str = "[No abstract available]";

const LAYER1_EXCLUSION_PROMPT: &str = r#"# LAYER 1: EXCLUSION SCREENING

You are performing first-pass screening for a systematic review update on ex vivo machine perfusion in extended criteria donor liver transplantation.

Your ONLY task is to identify records that should be EXCLUDED.

## EXCLUSION CRITERIA

Non-comparative, non-human, multi-organ transplant studies, and studies with combinatorial perfusion methods are excluded.

| Tag | Criterion | Key terms |
|-----|-----------|-----------|
| EXC-1 | Non-human study | porcine, rat, mouse, canine, swine, rabbit, sheep, pig, rodent, animal model |
| EXC-2 | Multi-organ transplant only | kidney/heart/lung transplant WITHOUT liver |
| EXC-3 | Combinatorial perfusion | sequential HOPE then NMP, NMP then HOPE, combined perfusion |
| EXC-4 | Retransplantation population | retransplantation only, re-LT only |
| EXC-5 | Review/meta-analysis | systematic review, meta-analysis, narrative review |
| EXC-6 | Editorial/letter/commentary | editorial, letter to editor, commentary, correspondence |
| EXC-7 | Case report | case report, single case, <5 patients |
| EXC-8 | Conference abstract only | abstract only, meeting abstract |
| EXC-9 | Pediatric only | pediatric, children, infant, neonatal |
| EXC-10 | Insufficient data | no abstract, protocol only |

## CLARIFICATIONS

- EXC-2: If the study includes liver (even with other organs), do NOT exclude
- EXC-3: A single perfusion method (HOPE or NMP alone) is NOT an exclusion
- EXC-4: If retransplantation is part of a larger cohort, do NOT exclude
- Non-comparative studies pass to Layer 2 for study design verification

## DECISION LOGIC

- If ANY exclusion criterion is CLEARLY met: "exclude"
- If UNCERTAIN whether an exclusion applies: "pass" (Layer 2 decides)
- If NO exclusion criterion applies: "pass"

When in doubt, choose "pass". Passing an irrelevant study is better than wrongly excluding a relevant one.

## OUTPUT FORMAT

Respond with valid JSON only:

{
  "decision": "exclude" | "pass",
  "exclusion_tags": ["EXC-1"],
  "evidence": "exact quote from title or abstract",
  "reasoning": "brief explanation"
}

If the decision is "pass":
{
  "decision": "pass",
  "exclusion_tags": [],
  "evidence": null,
  "reasoning": "No clear exclusion criteria met"
}

---

TITLE: {title}

ABSTRACT: {abstract}
"#;

const LAYER2_INCLUSION_PROMPT: &str = r#"# LAYER 2: INCLUSION VERIFICATION

This record passed Layer 1 exclusion screening. Verify whether ALL inclusion criteria are met for a systematic review update on ex vivo machine perfusion in extended criteria donor liver transplantation.

Randomized controlled trials (RCTs) and matched non-randomized studies (NRSs) comparing HOPE or NMP with SCS in adult liver transplants are included.

## INCLUSION CRITERIA

| Tag | Criterion | Definition |
|-----|-----------|------------|
| INC-1 | Study design | RCTs OR matched non-randomized studies (NRSs) |
| INC-2 | Intervention | HOPE (hypothermic oxygenated perfusion) OR NMP (normothermic machine perfusion) |
| INC-3 | Comparator | SCS (static cold storage) |
| INC-4 | Population | Adult liver transplants |
| INC-5 | Donor type | ECD (extended criteria donor), includes DCD, high DRI, donor-specific indications |

## EVALUATION GUIDELINES

INC-1 Study design
- "yes": RCT, randomized, propensity score matching, matched cohort, matched pairs
- "no": unmatched cohort, retrospective cohort WITHOUT matching, registry study without PSM
- "unclear": matching implied but not explicit (rare)

INC-2 Intervention
- "yes": HOPE, HMP, D-HOPE, NMP, ex vivo machine perfusion
- "no": NRP alone, in-situ perfusion, combinatorial perfusion (sequential HOPE+NMP)

INC-3 Comparator
- "yes": SCS, static cold storage, cold storage, conventional preservation
- "no": no control group, HOPE vs NMP without an SCS arm

INC-4 Population
- "yes": adult liver transplantation, deceased donor LT
- "no": pediatric, multi-organ transplant without liver, retransplantation only

INC-5 Donor type
- "yes": ECD, DCD, high DRI, marginal donor, steatotic liver, elderly donor
- "no": only standard/optimal DBD donors explicitly
- "unclear": donor criteria not specified

## DECISION LOGIC

| Scenario | Decision |
|----------|----------|
| All criteria "yes" | include (high confidence) |
| Mix of "yes"/"unclear", no "no" | include (low confidence) |
| Any criterion is "no" | exclude |

INC-1 is critical: unmatched cohort studies MUST be excluded.

## OUTPUT FORMAT

Respond with valid JSON only:

{
  "inclusion_check": {
    "INC-1": {"status": "yes|unclear|no", "evidence": "quote or null"},
    "INC-2": {"status": "yes|unclear|no", "evidence": "quote or null"},
    "INC-3": {"status": "yes|unclear|no", "evidence": "quote or null"},
    "INC-4": {"status": "yes|unclear|no", "evidence": "quote or null"},
    "INC-5": {"status": "yes|unclear|no", "evidence": "quote or null"}
  },
  "decision": "include" | "exclude",
  "confidence": "high" | "low",
  "reasoning": "one sentence summary"
}

---

TITLE: {title}

ABSTRACT: {abstract}
"#;

fn fill(template: &str, title: &str, abstract_text: &str) -> String {
    let abstract_text = if abstract_text.trim().is_empty() {
        NO_ABSTRACT
    } else {
        abstract_text
    };
    template
        .replace("{title}", title)
        .replace("{abstract}", abstract_text)
}

pub fn layer1_prompt(title: &str, abstract_text: &str) -> String {
    fill(LAYER1_EXCLUSION_PROMPT, title, abstract_text)
}

pub fn layer2_prompt(title: &str, abstract_text: &str) -> String {
    fill(LAYER2_INCLUSION_PROMPT, title, abstract_text)
}

/// Gemini responseSchema（OpenAPI 子集）
pub fn layer1_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "decision": {"type": "STRING", "enum": ["exclude", "pass"]},
            "exclusion_tags": {"type": "ARRAY", "items": {"type": "STRING"}},
            "evidence": {"type": "STRING", "nullable": true},
            "reasoning": {"type": "STRING"}
        },
        "required": ["decision", "exclusion_tags", "reasoning"]
    })
}

pub fn layer2_schema() -> Value {
    let criterion = json!({
        "type": "OBJECT",
        "properties": {
            "status": {"type": "STRING", "enum": ["yes", "unclear", "no"]},
            "evidence": {"type": "STRING", "nullable": true}
        },
        "required": ["status"]
    });
    json!({
        "type": "OBJECT",
        "properties": {
            "inclusion_check": {
                "type": "OBJECT",
                "properties": {
                    "INC-1": criterion.clone(),
                    "INC-2": criterion.clone(),
                    "INC-3": criterion.clone(),
                    "INC-4": criterion.clone(),
                    "INC-5": criterion
                },
                "required": ["INC-1", "INC-2", "INC-3", "INC-4", "INC-5"]
            },
            "decision": {"type": "STRING", "enum": ["include", "exclude"]},
            "confidence": {"type": "STRING", "enum": ["high", "low"]},
            "reasoning": {"type": "STRING"}
        },
        "required": ["inclusion_check", "decision", "confidence", "reasoning"]
    })
}
