pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{cli::LocalStorage, CliConfig};

pub use app::pipelines::{
    AnalyzePipeline, ExtractionPipeline, ExtractionRequest, Layer1Pipeline, Layer2Pipeline,
    MergePipeline, ParsePipeline, RescreenPipeline, RunOptions,
};
pub use config::ReviewConfig;
pub use core::etl::EtlEngine;
pub use utils::error::{Result, ReviewError};
