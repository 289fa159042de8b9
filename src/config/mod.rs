#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

pub use toml_config::{ReviewConfig, ScreeningConfig};

#[cfg(feature = "cli")]
use clap::{Args, Parser, Subcommand};

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "review-etl")]
#[command(about = "LLM-assisted systematic review: RIS parsing, two-layer screening and full-text extraction")]
pub struct CliConfig {
    #[command(subcommand)]
    pub command: Command,

    /// TOML 設定檔（模型、批次、價格）
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub log_json: bool,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// RIS 匯出檔轉成篩選用 CSV
    Parse {
        #[arg(long, short)]
        input: String,
        #[arg(long, short, default_value = "screening_records.csv")]
        output: String,
    },
    /// Layer 1 排除篩選
    Layer1(ScreenArgs),
    /// Layer 2 雙評審納入驗證
    Layer2(ScreenArgs),
    /// 重跑單一評審出錯的紀錄
    Rescreen {
        #[arg(long, short, default_value = "layer2_results.csv")]
        input: String,
        /// 預設覆寫輸入檔
        #[arg(long, short)]
        output: Option<String>,
        #[arg(long, default_value = "sonnet")]
        judge: String,
        #[arg(long)]
        batch: Option<usize>,
    },
    /// 合併結果並匯出人工審查清單
    Merge {
        #[arg(long, short, default_value = "layer2_results.csv")]
        input: String,
        #[arg(long, default_value = "final_screening")]
        output_prefix: String,
    },
    /// Layer 2 結果分析
    Analyze {
        #[arg(long, short, default_value = "layer2_results.csv")]
        input: String,
    },
    /// 全文資料萃取
    Extract(ExtractArgs),
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Args)]
pub struct ScreenArgs {
    #[arg(long, short)]
    pub input: String,
    #[arg(long, short)]
    pub output: String,
    /// 本次最多處理 N 筆待處理紀錄
    #[arg(long)]
    pub limit: Option<usize>,
    /// 從待處理清單的第 N 筆開始
    #[arg(long)]
    pub resume: Option<usize>,
    /// 忽略既有輸出，從頭開始
    #[arg(long)]
    pub fresh: bool,
    #[arg(long)]
    pub batch: Option<usize>,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Args)]
pub struct ExtractArgs {
    /// 論文檔案，或 `--batch` 時的目錄
    #[arg(long, short)]
    pub input: String,
    #[arg(long, short, num_args = 1..)]
    pub supplementary: Vec<String>,
    /// 工作表輸出目錄
    #[arg(long, short, default_value = "extraction_results")]
    pub output: String,
    #[arg(long)]
    pub quick: bool,
    #[arg(long)]
    pub no_rob: bool,
    #[arg(long)]
    pub batch: bool,
    #[arg(long)]
    pub json: bool,
    /// 以第二個模型驗證萃取結果
    #[arg(long)]
    pub validate: bool,
    /// 世代追蹤檔所在目錄
    #[arg(long)]
    pub tracking_dir: Option<String>,
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 有指定設定檔就載入，否則使用預設值
    pub fn review_config(&self) -> crate::utils::error::Result<ReviewConfig> {
        match &self.config {
            Some(path) => ReviewConfig::from_file(path),
            None => Ok(ReviewConfig::default()),
        }
    }
}
