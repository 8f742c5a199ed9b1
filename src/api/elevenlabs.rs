use crate::api::{SpeechSynthesizer, body_snippet};
use crate::config::Config;
use crate::error::{MangaError, Result};
use crate::logi;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

const SERVICE: &str = "ElevenLabs";

#[derive(Debug, Clone)]
pub struct ElevenLabsClient {
    client: Client,
    api_key: String,
    voice_id: String,
    model_id: String,
    stability: f32,
    similarity_boost: f32,
}

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

impl ElevenLabsClient {
    pub fn from_config(client: Client, cfg: &Config) -> Option<Self> {
        let api_key = cfg.elevenlabs_key.as_deref().filter(|k| !k.is_empty())?;
        Some(Self {
            client,
            api_key: api_key.to_string(),
            voice_id: cfg.eleven_voice_id.clone(),
            model_id: cfg.eleven_model_id.clone(),
            stability: cfg.voice_stability,
            similarity_boost: cfg.voice_similarity_boost,
        })
    }

    fn request_body<'a>(&'a self, text: &'a str) -> TtsRequest<'a> {
        TtsRequest {
            text,
            model_id: &self.model_id,
            voice_settings: VoiceSettings {
                stability: self.stability,
                similarity_boost: self.similarity_boost,
            },
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            self.voice_id
        );
        logi(format!(
            "[TTS] {} characters with voice {}",
            text.chars().count(),
            self.voice_id
        ));

        let resp = self
            .client
            .post(url)
            .header("Accept", "audio/mpeg")
            .header("xi-api-key", &self.api_key)
            .json(&self.request_body(text))
            .timeout(std::time::Duration::from_secs(300))
            .send()
            .await
            .map_err(|source| MangaError::Transport {
                service: SERVICE,
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            return Err(MangaError::Http {
                service: SERVICE,
                status: status.as_u16(),
                body: body_snippet(&raw),
            });
        }

        let bytes = resp.bytes().await.map_err(|source| MangaError::Transport {
            service: SERVICE,
            source,
        })?;
        logi(format!("[TTS] Audio received: {}KB", bytes.len() / 1024));
        Ok(bytes.to_vec())
    }
}
