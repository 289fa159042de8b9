use crate::config::toml_config::PriceConfig;
use crate::domain::model::{Artifact, TokenUsage};
use crate::utils::error::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

const FALLBACK_PRICE: PriceConfig = PriceConfig {
    input: 1.00,
    output: 5.00,
};

/// 每百萬 token 的價格表
#[derive(Debug, Clone)]
pub struct Pricing {
    table: BTreeMap<String, PriceConfig>,
}

impl Default for Pricing {
    fn default() -> Self {
        let table = [
            ("gemini-flash-latest", 0.40, 2.50),
            ("gemini-3-pro-preview", 2.00, 12.00),
            ("claude-sonnet-4-5-20250929", 3.00, 15.00),
        ]
        .into_iter()
        .map(|(model, input, output)| (model.to_string(), PriceConfig { input, output }))
        .collect();
        Self { table }
    }
}

impl Pricing {
    pub fn with_overrides(overrides: &HashMap<String, PriceConfig>) -> Self {
        let mut pricing = Self::default();
        for (model, price) in overrides {
            pricing.table.insert(model.clone(), *price);
        }
        pricing
    }

    /// 完全相符優先，其次雙向子字串比對，最後使用保守預設值
    pub fn price_for(&self, model: &str) -> PriceConfig {
        if let Some(price) = self.table.get(model) {
            return *price;
        }
        self.table
            .iter()
            .find(|(key, _)| model.contains(key.as_str()) || key.contains(model))
            .map(|(_, price)| *price)
            .unwrap_or(FALLBACK_PRICE)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub timestamp: String,
    pub model: String,
    pub layer: String,
    pub record_id: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub api_calls: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<UsageRecord>,
    totals: BTreeMap<String, ModelTotals>,
}

/// 跨並行呼叫共用的 token 用量帳本
#[derive(Debug, Default)]
pub struct UsageLedger {
    pricing: Pricing,
    state: Mutex<LedgerState>,
}

#[derive(Serialize)]
struct TokenTotals {
    input: u64,
    output: u64,
}

#[derive(Serialize)]
struct ReportSummary<'a> {
    total_cost: f64,
    total_tokens: TokenTotals,
    by_model: &'a BTreeMap<String, ModelTotals>,
}

#[derive(Serialize)]
struct CostReport<'a> {
    generated_at: String,
    summary: ReportSummary<'a>,
    pricing_used: &'a BTreeMap<String, PriceConfig>,
    detailed_records: &'a [UsageRecord],
}

impl UsageLedger {
    pub fn new(pricing: Pricing) -> Self {
        Self {
            pricing,
            state: Mutex::new(LedgerState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 記錄一次呼叫；輸出 token 以含思考的計費量計算
    pub fn log(&self, model: &str, layer: &str, record_id: Option<&str>, usage: &TokenUsage) {
        let price = self.pricing.price_for(model);
        let output_tokens = usage.billable_output();
        let input_cost = usage.input_tokens as f64 / 1_000_000.0 * price.input;
        let output_cost = output_tokens as f64 / 1_000_000.0 * price.output;
        let record = UsageRecord {
            timestamp: chrono::Local::now().to_rfc3339(),
            model: model.to_string(),
            layer: layer.to_string(),
            record_id: record_id.map(str::to_string),
            input_tokens: usage.input_tokens,
            output_tokens,
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        };

        let mut state = self.state();
        let totals = state.totals.entry(model.to_string()).or_default();
        totals.input_tokens += record.input_tokens;
        totals.output_tokens += record.output_tokens;
        totals.input_cost += record.input_cost;
        totals.output_cost += record.output_cost;
        totals.total_cost += record.total_cost;
        totals.api_calls += 1;
        state.records.push(record);
    }

    pub fn totals(&self) -> BTreeMap<String, ModelTotals> {
        self.state().totals.clone()
    }

    pub fn total_cost(&self) -> f64 {
        self.state().totals.values().map(|t| t.total_cost).sum()
    }

    pub fn call_count(&self) -> u64 {
        self.state().totals.values().map(|t| t.api_calls).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.state().records.is_empty()
    }

    pub fn json_report(&self) -> Result<Vec<u8>> {
        let state = self.state();
        let report = CostReport {
            generated_at: chrono::Local::now().to_rfc3339(),
            summary: ReportSummary {
                total_cost: state.totals.values().map(|t| t.total_cost).sum(),
                total_tokens: TokenTotals {
                    input: state.totals.values().map(|t| t.input_tokens).sum(),
                    output: state.totals.values().map(|t| t.output_tokens).sum(),
                },
                by_model: &state.totals,
            },
            pricing_used: &self.pricing.table,
            detailed_records: &state.records,
        };
        Ok(serde_json::to_vec_pretty(&report)?)
    }

    pub fn csv_summary(&self) -> Result<Vec<u8>> {
        let totals = self.totals();
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record([
            "Model",
            "API Calls",
            "Input Tokens",
            "Output Tokens",
            "Input Cost ($)",
            "Output Cost ($)",
            "Total Cost ($)",
        ])?;

        let mut sum = ModelTotals::default();
        for (model, t) in &totals {
            writer.write_record([
                model.clone(),
                t.api_calls.to_string(),
                t.input_tokens.to_string(),
                t.output_tokens.to_string(),
                format!("{:.4}", t.input_cost),
                format!("{:.4}", t.output_cost),
                format!("{:.4}", t.total_cost),
            ])?;
            sum.api_calls += t.api_calls;
            sum.input_tokens += t.input_tokens;
            sum.output_tokens += t.output_tokens;
            sum.input_cost += t.input_cost;
            sum.output_cost += t.output_cost;
            sum.total_cost += t.total_cost;
        }

        writer.write_record([
            "TOTAL".to_string(),
            sum.api_calls.to_string(),
            sum.input_tokens.to_string(),
            sum.output_tokens.to_string(),
            format!("{:.4}", sum.input_cost),
            format!("{:.4}", sum.output_cost),
            format!("{:.4}", sum.total_cost),
        ])?;

        writer.into_inner().map_err(|e| e.into_error().into())
    }

    /// `<stem>_cost_report.json` 與 `<stem>_cost_summary.csv`
    pub fn report_artifacts(&self, stem: &str) -> Result<Vec<Artifact>> {
        Ok(vec![
            Artifact::new(format!("{}_cost_report.json", stem), self.json_report()?),
            Artifact::new(format!("{}_cost_summary.csv", stem), self.csv_summary()?),
        ])
    }

    pub fn log_summary(&self) {
        let totals = self.totals();
        tracing::info!("💰 Token usage & cost summary");
        for (model, t) in &totals {
            tracing::info!(
                "   {:<35} calls={:>6} input={:>10} output={:>10} cost=${:.4}",
                model,
                t.api_calls,
                t.input_tokens,
                t.output_tokens,
                t.total_cost
            );
        }
        tracing::info!(
            "   {:<35} calls={:>6} estimated total cost=${:.4}",
            "TOTAL",
            self.call_count(),
            self.total_cost()
        );
    }
}
