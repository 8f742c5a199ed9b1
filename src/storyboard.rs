use crate::api::{JsonRequest, TextGenerator};
use crate::error::{MangaError, Result};
use crate::model::{Character, InputStrip};
use crate::{logi, logok, logw};
use serde_json::{Value, json};
use std::collections::HashSet;
use tokio::sync::mpsc::UnboundedSender;

const STORYBOARD_PROMPT: &str = "\
You are an expert manga creator. Turn the chapter text that follows into a sequence of manga strips \
that together cover the whole chapter in chronological order.

Story fidelity:
- Keep every important event, in the order it happens. Do not invent plot.
- Break the chapter at natural scene changes; each strip should have a beginning, a development and a hand-off to the next.

Strips:
- Each strip holds 3-6 panels and a description that sets scene, setting and mood.
- List the named characters who appear in the strip. Leave out unnamed extras and background figures.

Panels:
- Describe the composition of each panel so an artist can draw it; vary shots between close-ups, wide shots and dramatic angles.
- For every character in a panel give their name and what they are doing: pose, expression, position.
- Character names and visual traits must stay identical across all strips.

Text:
- Dialogue: at most 200 characters per panel, always with the speaker's name exactly as listed.
- Narration: at most 150 characters. Thought: at most 100. Action (sound effects): at most 50.
- Leave the speaker empty for narration, thought and action.";

fn text_block_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "type": { "type": "STRING", "enum": ["narration", "dialogue", "thought", "action"] },
            "content": { "type": "STRING" },
            "speaker": { "type": "STRING", "nullable": true }
        },
        "required": ["type", "content"]
    })
}

fn character_action_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "name": { "type": "STRING" },
            "description": { "type": "STRING" }
        },
        "required": ["name", "description"]
    })
}

pub fn storyboard_schema() -> Value {
    let panel = json!({
        "type": "OBJECT",
        "properties": {
            "title": { "type": "STRING", "nullable": true },
            "description": { "type": "STRING" },
            "characters": { "type": "ARRAY", "items": character_action_schema(), "nullable": true },
            "text": { "type": "ARRAY", "items": text_block_schema() }
        },
        "required": ["description", "text"]
    });
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "description": { "type": "STRING" },
                "panels": { "type": "ARRAY", "items": panel },
                "characters": { "type": "ARRAY", "items": { "type": "STRING" }, "nullable": true }
            },
            "required": ["description", "panels"]
        }
    })
}

pub fn storyboard_request(chapter_text: &str) -> JsonRequest {
    JsonRequest::new(
        vec![STORYBOARD_PROMPT.to_string(), chapter_text.to_string()],
        storyboard_schema(),
    )
}

pub fn parse_storyboard(text: &str) -> Result<Vec<InputStrip>> {
    serde_json::from_str(text).map_err(|e| {
        logw(format!(
            "[STORYBOARD] Failed to parse storyboard ({} chars): {}",
            text.len(),
            e
        ));
        MangaError::InvalidStoryboard(e)
    })
}

pub async fn generate_storyboard(
    text_gen: &dyn TextGenerator,
    chapter_text: &str,
    progress: Option<UnboundedSender<String>>,
) -> Result<Vec<InputStrip>> {
    if chapter_text.trim().is_empty() {
        return Err(MangaError::EmptyChapter);
    }
    logi(format!(
        "[STORYBOARD] Chapter text length: {} characters",
        chapter_text.chars().count()
    ));

    let request = storyboard_request(chapter_text);
    let raw = match progress {
        Some(tx) => text_gen.stream_json(&request, tx).await?,
        None => text_gen.generate_json(&request).await?,
    };

    let strips = parse_storyboard(&raw)?;
    let total_panels: usize = strips.iter().map(|s| s.panels.len()).sum();
    let roster = character_roster(&strips);
    logok(format!(
        "[STORYBOARD] {} strips, {} panels, characters: {}",
        strips.len(),
        total_panels,
        roster
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    Ok(strips)
}

pub fn character_roster(strips: &[InputStrip]) -> Vec<Character> {
    let mut seen = HashSet::new();
    strips
        .iter()
        .flat_map(|s| s.character_names())
        .filter(|name| seen.insert(name.as_str()))
        .map(|name| Character::named(name.clone()))
        .collect()
}
