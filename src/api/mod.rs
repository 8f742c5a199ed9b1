use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

pub mod elevenlabs;
pub mod fal;
pub mod gemini;

#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub parts: Vec<String>,
    pub schema: Value,
}

impl JsonRequest {
    pub fn new(parts: Vec<String>, schema: Value) -> Self {
        Self { parts, schema }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    Text(String),
    InlineImage { mime_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageCandidate {
    pub images: Vec<InlineImage>,
    pub finish_reason: Option<String>,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_json(&self, request: &JsonRequest) -> Result<String>;

    // Fragments are forwarded in arrival order and concatenate to the returned text.
    async fn stream_json(
        &self,
        request: &JsonRequest,
        fragments: UnboundedSender<String>,
    ) -> Result<String>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, parts: &[PromptPart]) -> Result<ImageCandidate>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait VideoGenerator: Send + Sync {
    async fn image_to_video(&self, prompt: &str, image_url: &str) -> Result<Value>;
}

pub(crate) fn body_snippet(raw: &str) -> String {
    raw.chars().take(800).collect()
}
