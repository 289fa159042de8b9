use clap::Parser;
use review_etl::adapters::build_client;
use review_etl::config::toml_config::ModelConfig;
use review_etl::config::{Command, ExtractArgs, ScreenArgs};
use review_etl::core::decision::JudgeLabels;
use review_etl::core::extraction::{ExtractionOptions, PaperExtractor};
use review_etl::core::screening::Judge;
use review_etl::core::usage::{Pricing, UsageLedger};
use review_etl::core::Pipeline;
use review_etl::utils::error::ErrorSeverity;
use review_etl::utils::{logger, validation::Validate};
use review_etl::{
    AnalyzePipeline, CliConfig, EtlEngine, ExtractionPipeline, ExtractionRequest, Layer1Pipeline,
    Layer2Pipeline, LocalStorage, MergePipeline, ParsePipeline, RescreenPipeline, Result,
    ReviewConfig, ReviewError, RunOptions,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.log_json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting review-etl CLI");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    // 載入並驗證配置
    let config = match cli.review_config().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };

    match dispatch(cli.command, config).await {
        Ok(output_path) => {
            tracing::info!("✅ Stage completed successfully!");
            println!("✅ Stage completed successfully!");
            println!("📁 Output saved to: {}", output_path);
        }
        Err(e) => {
            tracing::error!(
                "❌ Stage failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            // 根據錯誤嚴重程度決定退出碼
            let exit_code = match e.severity() {
                ErrorSeverity::Low => 0,      // 警告，但成功
                ErrorSeverity::Medium => 2,   // 重試錯誤
                ErrorSeverity::High => 1,     // 處理錯誤
                ErrorSeverity::Critical => 3, // 系統錯誤
            };

            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}

async fn run<P: Pipeline>(pipeline: P) -> Result<String> {
    EtlEngine::new(pipeline).run().await
}

fn storage() -> LocalStorage {
    LocalStorage::new(".".to_string())
}

fn ledger(config: &ReviewConfig) -> Arc<UsageLedger> {
    Arc::new(UsageLedger::new(Pricing::with_overrides(&config.pricing)))
}

fn judge(model: &ModelConfig) -> Result<Judge> {
    Ok(Judge::new(
        build_client(model)?,
        model.label(),
        model.thinking_budget.is_some(),
    ))
}

fn run_options(args: &ScreenArgs) -> RunOptions {
    RunOptions {
        input: args.input.clone(),
        output: args.output.clone(),
        limit: args.limit,
        resume: args.resume,
        fresh: args.fresh,
    }
}

async fn dispatch(command: Command, mut config: ReviewConfig) -> Result<String> {
    let labels = JudgeLabels::new(
        config.models.layer2_primary.label(),
        config.models.layer2_secondary.label(),
    );

    match command {
        Command::Parse { input, output } => run(ParsePipeline::new(storage(), &input, &output)).await,
        Command::Layer1(args) => {
            if let Some(batch) = args.batch {
                config.screening.layer1_batch_size = batch;
            }
            let client = build_client(&config.models.layer1)?;
            run(Layer1Pipeline::new(
                storage(),
                client,
                ledger(&config),
                run_options(&args),
                config.screening.clone(),
            ))
            .await
        }
        Command::Layer2(args) => {
            if let Some(batch) = args.batch {
                config.screening.layer2_batch_size = batch;
            }
            run(Layer2Pipeline::new(
                storage(),
                judge(&config.models.layer2_primary)?,
                judge(&config.models.layer2_secondary)?,
                ledger(&config),
                run_options(&args),
                config.screening.clone(),
            ))
            .await
        }
        Command::Rescreen {
            input,
            output,
            judge: label,
            batch,
        } => {
            if let Some(batch) = batch {
                config.screening.rescreen_batch_size = batch;
            }
            let (model, other) = if label == labels.primary {
                (&config.models.layer2_primary, labels.secondary.clone())
            } else if label == labels.secondary {
                (&config.models.layer2_secondary, labels.primary.clone())
            } else {
                return Err(ReviewError::InvalidConfigValueError {
                    field: "judge".to_string(),
                    value: label,
                    reason: format!("expected '{}' or '{}'", labels.primary, labels.secondary),
                });
            };
            let output = output.unwrap_or_else(|| input.clone());
            run(RescreenPipeline::new(
                storage(),
                judge(model)?,
                &other,
                ledger(&config),
                RunOptions::new(&input, &output),
                config.screening.clone(),
            ))
            .await
        }
        Command::Merge {
            input,
            output_prefix,
        } => run(MergePipeline::new(storage(), &input, &output_prefix, labels)).await,
        Command::Analyze { input } => run(AnalyzePipeline::new(storage(), &input, labels)).await,
        Command::Extract(args) => run_extraction(args, &config).await,
    }
}

async fn run_extraction(args: ExtractArgs, config: &ReviewConfig) -> Result<String> {
    let ledger = ledger(config);
    let client = build_client(&config.models.extraction)?;
    let validator = if args.validate {
        Some(build_client(&config.models.validation)?)
    } else {
        None
    };
    let extractor = PaperExtractor::new(client, validator, Arc::clone(&ledger), config.extraction.clone());
    let request = ExtractionRequest {
        input: args.input,
        batch: args.batch,
        supplementary: args.supplementary,
        write_json: args.json,
        options: ExtractionOptions {
            quick_only: args.quick,
            include_rob: !args.no_rob,
            validate: args.validate,
            output_dir: args.output,
            tracking_dir: args.tracking_dir,
        },
    };
    run(ExtractionPipeline::new(storage(), extractor, ledger, request)).await
}
