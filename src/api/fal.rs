use crate::api::{VideoGenerator, body_snippet};
use crate::error::{MangaError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

const SERVICE: &str = "fal";
const IMAGE_TO_VIDEO_URL: &str = "https://fal.run/fal-ai/minimax-video/image-to-video";

#[derive(Debug, Clone)]
pub struct FalClient {
    client: Client,
    api_key: String,
}

impl FalClient {
    pub fn new(client: Client, api_key: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl VideoGenerator for FalClient {
    async fn image_to_video(&self, prompt: &str, image_url: &str) -> Result<Value> {
        let body = json!({
            "prompt": prompt,
            "image_url": image_url,
        });

        let resp = self
            .client
            .post(IMAGE_TO_VIDEO_URL)
            .header("Authorization", format!("Key {}", self.api_key))
            .json(&body)
            .timeout(std::time::Duration::from_secs(600))
            .send()
            .await
            .map_err(|source| MangaError::Transport {
                service: SERVICE,
                source,
            })?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(MangaError::Http {
                service: SERVICE,
                status: status.as_u16(),
                body: body_snippet(&raw),
            });
        }

        serde_json::from_str(&raw).map_err(|e| MangaError::MalformedResponse {
            service: SERVICE,
            detail: format!("{}. Body: {}", e, body_snippet(&raw)),
        })
    }
}
