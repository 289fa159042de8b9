use crate::domain::model::{LlmRequest, LlmResponse, StageOutput, Table};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
    /// 列出目錄下的檔名（不含子目錄），依名稱排序
    fn list_files(
        &self,
        dir: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
}

/// 模型供應商介面，每個實作負責一家廠商的 HTTP 協定
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse>;
    fn model_name(&self) -> &str;
    fn provider(&self) -> &str;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    fn name(&self) -> &str;
    async fn extract(&self) -> Result<Table>;
    async fn transform(&self, data: Table) -> Result<StageOutput>;
    async fn load(&self, result: StageOutput) -> Result<String>;
}
