use crate::api::{JsonRequest, SpeechSynthesizer, TextGenerator};
use crate::error::{MangaError, Result};
use crate::model::{Panel, TextKind};
use crate::{logi, logok};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NarrationReply {
    narration_text: String,
}

pub fn summarize_panels(panels: &[Panel]) -> String {
    let mut scenes = Vec::new();
    let mut asides = Vec::new();

    for panel in panels {
        scenes.push(format!("Panel {}: {}", panel.panel_number, panel.input.description));
        for block in &panel.input.text {
            match block.kind {
                TextKind::Dialogue => {
                    let speaker = block.speaker.as_deref().unwrap_or("Someone");
                    scenes.push(format!("  {} says: \"{}\"", speaker, block.content));
                }
                TextKind::Narration => asides.push(format!("Narration: {}", block.content)),
                TextKind::Thought => asides.push(format!("Thought: {}", block.content)),
                TextKind::Action => {}
            }
        }
    }

    let mut summary = scenes.join("\n");
    if !asides.is_empty() {
        summary.push_str("\n\n");
        summary.push_str(&asides.join("\n"));
    }
    summary
}

pub fn narration_request(
    strip_description: &str,
    panels: &[Panel],
    character_names: &[String],
) -> JsonRequest {
    let prompt = format!(
        "You are the narrator of an audio manga. Retell this strip as one flowing piece of \
narrator-voice prose, suitable for reading aloud. Weave the dialogue in naturally, keep the \
events in order, and stay under 500 words.\n\n\
Scene: {}\n\
Characters: {}\n\n\
Panels:\n{}",
        strip_description,
        if character_names.is_empty() {
            "none named".to_string()
        } else {
            character_names.join(", ")
        },
        summarize_panels(panels)
    );
    JsonRequest::new(
        vec![prompt],
        json!({
            "type": "OBJECT",
            "properties": { "narrationText": { "type": "STRING" } },
            "required": ["narrationText"]
        }),
    )
}

#[derive(Debug, Clone)]
pub struct AudioStore {
    dir: PathBuf,
}

impl AudioStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn save(&self, strip_number: usize, audio: &[u8]) -> Result<String> {
        fs::create_dir_all(&self.dir).await?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S%3f");
        let path = self.dir.join(format!("strip_{}_{}.mp3", strip_number, stamp));
        fs::write(&path, audio).await?;
        let absolute = fs::canonicalize(&path).await.unwrap_or(path);
        Ok(format!("file://{}", absolute.display()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Narration {
    pub text: String,
    pub audio_url: String,
}

#[derive(Clone)]
pub struct NarrationComposer {
    text_gen: Arc<dyn TextGenerator>,
    speech: Arc<dyn SpeechSynthesizer>,
    audio: AudioStore,
}

impl NarrationComposer {
    pub fn new(
        text_gen: Arc<dyn TextGenerator>,
        speech: Arc<dyn SpeechSynthesizer>,
        audio: AudioStore,
    ) -> Self {
        Self {
            text_gen,
            speech,
            audio,
        }
    }

    pub async fn write_script(
        &self,
        strip_description: &str,
        panels: &[Panel],
        character_names: &[String],
    ) -> Result<String> {
        let raw = self
            .text_gen
            .generate_json(&narration_request(strip_description, panels, character_names))
            .await?;
        let reply: NarrationReply =
            serde_json::from_str(&raw).map_err(MangaError::InvalidNarration)?;
        Ok(reply.narration_text)
    }

    pub async fn narrate(
        &self,
        strip_number: usize,
        strip_description: &str,
        panels: &[Panel],
        character_names: &[String],
    ) -> Result<Narration> {
        logi(format!("[NARRATION] Writing script for strip {}", strip_number));
        let text = self
            .write_script(strip_description, panels, character_names)
            .await?;
        let audio = self.speech.synthesize(&text).await?;
        let audio_url = self.audio.save(strip_number, &audio).await?;
        logok(format!(
            "[NARRATION] Strip {}: {} words -> {}",
            strip_number,
            text.split_whitespace().count(),
            audio_url
        ));
        Ok(Narration { text, audio_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InputStrip, MangaStripData};
    use crate::testing::{FakeSpeech, FakeText, two_strip_storyboard};

    fn chase_strip() -> MangaStripData {
        let strips: Vec<InputStrip> = serde_json::from_str(&two_strip_storyboard()).unwrap();
        MangaStripData::skeleton(&strips[1])
    }

    #[test]
    fn summary_attributes_dialogue_and_collects_asides() {
        let strips: Vec<InputStrip> = serde_json::from_str(&two_strip_storyboard()).unwrap();
        let market = MangaStripData::skeleton(&strips[0]);
        let summary = summarize_panels(&market.panels);
        assert!(summary.starts_with("Panel 1: Mika walks between stalls."));
        assert!(summary.ends_with("Thought: That's Ren's purse..."));

        let chase = summarize_panels(&chase_strip().panels);
        assert!(chase.contains("  Ren says: \"Going somewhere?\""));
        assert!(!chase.contains("DASH!"));
    }

    #[test]
    fn request_constrains_reply_shape() {
        let strip = chase_strip();
        let request = narration_request(&strip.description, &strip.panels, &["Mika".to_string()]);
        assert!(request.parts[0].contains("Characters: Mika"));
        assert!(request.parts[0].contains("under 500 words"));
        assert_eq!(request.schema["required"], json!(["narrationText"]));
    }

    #[tokio::test]
    async fn narrate_writes_audio_and_returns_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let text = Arc::new(FakeText::new(vec![Ok(
            r#"{ "narrationText": "Mika ran. Ren waited." }"#.to_string(),
        )]));
        let speech = Arc::new(FakeSpeech::new(false));
        let composer = NarrationComposer::new(
            text,
            Arc::clone(&speech) as Arc<dyn SpeechSynthesizer>,
            AudioStore::new(dir.path().join("audio")),
        );

        let strip = chase_strip();
        let narration = composer
            .narrate(2, &strip.description, &strip.panels, &["Mika".to_string(), "Ren".to_string()])
            .await
            .unwrap();

        assert_eq!(narration.text, "Mika ran. Ren waited.");
        assert_eq!(speech.texts(), vec!["Mika ran. Ren waited.".to_string()]);
        let path = narration.audio_url.strip_prefix("file://").unwrap();
        assert!(path.contains("strip_2_"));
        assert_eq!(fs::read(path).await.unwrap(), b"ID3-fake-mpeg");
    }

    #[tokio::test]
    async fn bad_script_reply_skips_speech() {
        let dir = tempfile::tempdir().unwrap();
        let speech = Arc::new(FakeSpeech::new(false));
        let composer = NarrationComposer::new(
            Arc::new(FakeText::new(vec![Ok("{}".to_string())])),
            Arc::clone(&speech) as Arc<dyn SpeechSynthesizer>,
            AudioStore::new(dir.path()),
        );
        let strip = chase_strip();
        let err = composer
            .narrate(1, &strip.description, &strip.panels, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MangaError::InvalidNarration(_)));
        assert!(speech.texts().is_empty());
    }
}
