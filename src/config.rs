use crate::credentials::CredentialStore;
use crate::error::MangaError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "gemini_api_key", default)]
    pub gemini_key: Option<String>,
    #[serde(rename = "elevenlabs_api_key", default)]
    pub elevenlabs_key: Option<String>,
    #[serde(rename = "fal_api_key", default)]
    pub fal_key: Option<String>,
    #[serde(default = "default_voice_id")]
    pub eleven_voice_id: String,
    #[serde(default = "default_model_id")]
    pub eleven_model_id: String,
    #[serde(default = "default_stability")]
    pub voice_stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub voice_similarity_boost: f32,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_output")]
    pub output_folder: PathBuf,
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
}

fn default_voice_id() -> String {
    "Mv8AjrYZCBkdsmDHNwcB".to_string()
}

fn default_model_id() -> String {
    "eleven_multilingual_v2".to_string()
}

fn default_stability() -> f32 {
    0.5
}

fn default_similarity_boost() -> f32 {
    0.8
}

fn default_text_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_image_model() -> String {
    "gemini-2.5-flash-image-preview".to_string()
}

fn default_output() -> PathBuf {
    PathBuf::from("output")
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("credentials.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_key: None,
            elevenlabs_key: None,
            fal_key: None,
            eleven_voice_id: default_voice_id(),
            eleven_model_id: default_model_id(),
            voice_stability: default_stability(),
            voice_similarity_boost: default_similarity_boost(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            output_folder: default_output(),
            credentials_file: default_credentials_file(),
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;

        if !(0.0..=1.0).contains(&config.voice_stability) {
            anyhow::bail!("config.json: voice_stability must be between 0 and 1");
        }
        if !(0.0..=1.0).contains(&config.voice_similarity_boost) {
            anyhow::bail!("config.json: voice_similarity_boost must be between 0 and 1");
        }

        Ok(config)
    }

    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if fs::metadata(&path).await.is_err() {
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    pub fn audio_folder(&self) -> PathBuf {
        self.output_folder.join("audio")
    }

    pub async fn ensure_directories(&self) -> Result<()> {
        for dir in [self.output_folder.clone(), self.audio_folder()] {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create dir {}", dir.display()))?;
        }
        Ok(())
    }

    pub async fn resolve_gemini_key(&self, store: &CredentialStore) -> Result<String> {
        let stored = store.load_api_key().await?;
        pick_gemini_key(self.gemini_key.as_deref(), stored, |var| std::env::var(var).ok())
            .context("set gemini_api_key in config.json, run `key set`, or export GEMINI_API_KEY")
    }
}

// Config value first, then the stored key, then the environment.
fn pick_gemini_key(
    configured: Option<&str>,
    stored: Option<String>,
    env: impl Fn(&str) -> Option<String>,
) -> std::result::Result<String, MangaError> {
    configured
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .or(stored)
        .or_else(|| {
            ["GEMINI_API_KEY", "API_KEY"]
                .into_iter()
                .filter_map(&env)
                .find(|k| !k.is_empty())
        })
        .ok_or(MangaError::MissingCredential("Gemini API key"))
}
