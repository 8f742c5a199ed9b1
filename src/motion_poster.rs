use crate::api::VideoGenerator;
use crate::error::{MangaError, Result};
use crate::{logi, logok, logw};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

pub const MOTION_PROMPT: &str = "Extremely subtle and minimal motion. Only tiny movements like: \
characters blinking slowly, very slight head movement, gentle hair swaying, or clothes moving \
slightly in a breeze. Keep all major elements completely static. No camera movement. Maintain \
the exact same manga art style and composition.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionPosterResult {
    pub video_url: String,
    pub seed: u64,
}

#[derive(Debug, Default)]
pub struct MotionPosterCache {
    entries: Mutex<HashMap<String, MotionPosterResult>>,
}

impl MotionPosterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, image_url: &str) -> Option<MotionPosterResult> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(image_url).cloned())
    }

    pub fn insert(&self, image_url: &str, result: MotionPosterResult) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(image_url.to_string(), result);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

pub fn extract_video_url(response: &Value) -> Option<String> {
    [
        response.pointer("/video/url"),
        response.pointer("/data/video/url"),
        response.get("url"),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_str)
    .find(|url| !url.is_empty())
    .map(str::to_string)
}

pub struct MotionPosterEnhancer {
    video: Arc<dyn VideoGenerator>,
    cache: Arc<MotionPosterCache>,
}

impl MotionPosterEnhancer {
    pub fn new(video: Arc<dyn VideoGenerator>, cache: Arc<MotionPosterCache>) -> Self {
        Self { video, cache }
    }

    pub fn cache(&self) -> &Arc<MotionPosterCache> {
        &self.cache
    }

    pub async fn generate(&self, image_url: &str) -> Result<MotionPosterResult> {
        if let Some(hit) = self.cache.get(image_url) {
            return Ok(hit);
        }

        logi("[MOTION_POSTER] Requesting image-to-video clip...");
        let response = self.video.image_to_video(MOTION_PROMPT, image_url).await?;
        let video_url = extract_video_url(&response).ok_or_else(|| {
            logw(format!(
                "[MOTION_POSTER] No video URL in response: {}",
                crate::api::body_snippet(&response.to_string())
            ));
            MangaError::MissingVideoUrl
        })?;
        let seed = response
            .get("seed")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..1_000_000));

        let result = MotionPosterResult { video_url, seed };
        self.cache.insert(image_url, result.clone());
        logok(format!("[MOTION_POSTER] Ready: {}", result.video_url));
        Ok(result)
    }

    pub fn preload(self: &Arc<Self>, image_url: String) -> JoinHandle<()> {
        let enhancer = Arc::clone(self);
        tokio::spawn(async move {
            if enhancer.cache.get(&image_url).is_some() {
                return;
            }
            if let Err(e) = enhancer.generate(&image_url).await {
                logw(format!("[MOTION_POSTER] Preload failed: {}", e));
            }
        })
    }

    pub fn cached(&self, image_url: &str) -> Option<MotionPosterResult> {
        self.cache.get(image_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeVideo;
    use serde_json::json;

    const IMAGE: &str = "data:image/png;base64,PANEL1";

    fn enhancer(response: Value) -> (Arc<MotionPosterEnhancer>, Arc<FakeVideo>) {
        let video = Arc::new(FakeVideo::new(response));
        let enhancer = Arc::new(MotionPosterEnhancer::new(
            Arc::clone(&video) as Arc<dyn VideoGenerator>,
            Arc::new(MotionPosterCache::new()),
        ));
        (enhancer, video)
    }

    #[test]
    fn video_url_probed_across_shapes() {
        assert_eq!(
            extract_video_url(&json!({ "video": { "url": "https://v/a.mp4" } })).as_deref(),
            Some("https://v/a.mp4")
        );
        assert_eq!(
            extract_video_url(&json!({ "data": { "video": { "url": "https://v/b.mp4" } } }))
                .as_deref(),
            Some("https://v/b.mp4")
        );
        assert_eq!(
            extract_video_url(&json!({ "url": "https://v/c.mp4" })).as_deref(),
            Some("https://v/c.mp4")
        );
        assert_eq!(extract_video_url(&json!({ "video": {} })), None);
    }

    #[tokio::test]
    async fn second_request_for_same_image_is_served_from_cache() {
        let (enhancer, video) = enhancer(json!({ "video": { "url": "https://v/a.mp4" }, "seed": 42 }));

        let first = enhancer.generate(IMAGE).await.unwrap();
        let second = enhancer.generate(IMAGE).await.unwrap();
        assert_eq!(video.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(first.seed, 42);
        assert_eq!(enhancer.cached(IMAGE), Some(first));
        assert_eq!(enhancer.cached("data:image/png;base64,OTHER"), None);
    }

    #[tokio::test]
    async fn missing_url_fails_and_is_not_cached() {
        let (enhancer, video) = enhancer(json!({ "status": "done" }));
        let err = enhancer.generate(IMAGE).await.unwrap_err();
        assert!(matches!(err, MangaError::MissingVideoUrl));
        assert!(enhancer.cache().is_empty());

        enhancer.generate(IMAGE).await.unwrap_err();
        assert_eq!(video.calls(), 2);
    }

    #[tokio::test]
    async fn preload_swallows_errors_and_fills_cache_on_success() {
        let (failing, _) = enhancer(json!({}));
        failing.preload(IMAGE.to_string()).await.unwrap();
        assert_eq!(failing.cached(IMAGE), None);

        let (working, video) = enhancer(json!({ "url": "https://v/c.mp4" }));
        working.preload(IMAGE.to_string()).await.unwrap();
        working.preload(IMAGE.to_string()).await.unwrap();
        assert_eq!(video.calls(), 1);
        let cached = working.cached(IMAGE).unwrap();
        assert_eq!(cached.video_url, "https://v/c.mp4");
        assert!(cached.seed < 1_000_000);

        working.cache().clear();
        assert_eq!(working.cached(IMAGE), None);
    }
}
