use crate::core::Pipeline;
use crate::utils::error::Result;

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    pub async fn run(&self) -> Result<String> {
        let stage = self.pipeline.name();
        tracing::info!("🚀 Starting {} stage", stage);

        // Extract
        let table = self.pipeline.extract().await?;
        tracing::info!("📥 Extracted {} records", table.len());

        // Transform
        let output = self.pipeline.transform(table).await?;
        tracing::info!(
            "🔄 Transformed {} records ({} extra artifacts)",
            output.table.len(),
            output.artifacts.len()
        );
        for line in output.summary.lines() {
            tracing::info!("{}", line);
        }

        // Load
        let output_path = self.pipeline.load(output).await?;
        tracing::info!("📁 {} output saved to: {}", stage, output_path);

        Ok(output_path)
    }
}
