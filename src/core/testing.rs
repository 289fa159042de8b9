// Test doubles shared by the unit tests of the stage pipelines.

use crate::domain::model::{LlmRequest, LlmResponse, TokenUsage};
use crate::domain::ports::{LlmClient, Storage};
use crate::utils::error::{Result, ReviewError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

type Handler = Box<dyn Fn(&LlmRequest) -> Result<LlmResponse> + Send + Sync>;

/// 依序回傳預先排好的回應，排完後交給 handler（依 prompt 決定回應）
pub struct ScriptedLlm {
    model: String,
    script: Mutex<VecDeque<Result<LlmResponse>>>,
    handler: Option<Handler>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            script: Mutex::new(VecDeque::new()),
            handler: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(self, text: &str) -> Self {
        let response = text_response(&self.model, text);
        self.script.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn fail(self, error: ReviewError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&LlmRequest) -> Result<LlmResponse> + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

pub fn text_response(model: &str, text: &str) -> LlmResponse {
    LlmResponse {
        text: text.to_string(),
        thinking: None,
        usage: TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            total_tokens: 120,
        },
        model: model.to_string(),
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        match &self.handler {
            Some(handler) => handler(request),
            None => Err(ReviewError::LlmError {
                provider: "scripted".to_string(),
                message: "script exhausted".to_string(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        "scripted"
    }
}

#[derive(Clone, Default)]
pub struct MockStorage {
    files: Arc<tokio::sync::Mutex<HashMap<String, Vec<u8>>>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, path: &str, data: &[u8]) {
        self.files
            .lock()
            .await
            .insert(path.to_string(), data.to_vec());
    }

    pub async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().await.get(path).cloned()
    }

    pub async fn get_text(&self, path: &str) -> Option<String> {
        self.get_file(path)
            .await
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl Storage for MockStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let files = self.files.lock().await;
        files.get(path).cloned().ok_or_else(|| {
            ReviewError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", path),
            ))
        })
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut files = self.files.lock().await;
        files.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        self.files.lock().await.contains_key(path)
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut names: Vec<String> = self
            .files
            .lock()
            .await
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }
}
