use crate::error::{MangaError, Result};
use crate::{logi, logok};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const API_KEY_STORAGE: &str = "gemini_api_key";
pub const API_KEY_PREFIX: &str = "AI";
pub const API_KEY_MIN_LEN: usize = 30;

pub fn validate_api_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(MangaError::InvalidApiKey("Please enter an API key".into()));
    }
    if !key.starts_with(API_KEY_PREFIX) {
        return Err(MangaError::InvalidApiKey(format!(
            "Invalid API key format. Gemini API keys start with \"{}\"",
            API_KEY_PREFIX
        )));
    }
    if key.len() < API_KEY_MIN_LEN {
        return Err(MangaError::InvalidApiKey(
            "API key appears too short. Please check your key".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(entries)?).await?;
        Ok(())
    }

    pub async fn load_api_key(&self) -> Result<Option<String>> {
        let mut entries = self.read_entries().await?;
        Ok(entries.remove(API_KEY_STORAGE).filter(|k| !k.is_empty()))
    }

    pub async fn accept_api_key(&self, key: &str) -> Result<()> {
        validate_api_key(key)?;
        let mut entries = self.read_entries().await?;
        entries.insert(API_KEY_STORAGE.to_string(), key.to_string());
        self.write_entries(&entries).await?;
        logok(format!("API key saved to {}", self.path.display()));
        Ok(())
    }

    pub async fn clear_api_key(&self) -> Result<()> {
        let mut entries = self.read_entries().await?;
        if entries.remove(API_KEY_STORAGE).is_some() {
            self.write_entries(&entries).await?;
            logi("API key cleared.");
        }
        Ok(())
    }
}
