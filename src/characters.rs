use crate::api::{JsonRequest, TextGenerator};
use crate::error::{MangaError, Result};
use crate::model::Character;
use crate::{logi, logok, logw};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterDesign {
    pub name: String,
    pub description: String,
}

fn design_schema() -> serde_json::Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "name": { "type": "STRING" },
                "description": { "type": "STRING" }
            },
            "required": ["name", "description"]
        }
    })
}

pub fn design_request(names: &[String], story_context: &str) -> JsonRequest {
    let prompt = format!(
        "Using the story below, write a consistent visual description for each listed character, \
detailed enough for an artist to draw them: appearance, clothing and general demeanor.\n\
Return a JSON array of objects with \"name\" and \"description\" fields, one per character, \
using the names exactly as given.\n\n\
Story Context: \"{}\"\n\n\
Characters to design: {}",
        story_context,
        names.join(", ")
    );
    JsonRequest::new(vec![prompt], design_schema())
}

pub async fn design_characters(
    text_gen: &dyn TextGenerator,
    names: &[String],
    story_context: &str,
) -> Result<Vec<CharacterDesign>> {
    logi(format!("[CHARACTER] Designing characters: {}", names.join(", ")));
    let raw = text_gen
        .generate_json(&design_request(names, story_context))
        .await?;
    let designs: Vec<CharacterDesign> =
        serde_json::from_str(&raw).map_err(MangaError::InvalidCharacterDesigns)?;
    logok(format!("[CHARACTER] Received {} designs", designs.len()));
    Ok(designs)
}

pub fn apply_designs(roster: &[Character], designs: &[CharacterDesign]) -> Vec<Character> {
    for design in designs {
        if !roster.iter().any(|c| c.name == design.name) {
            logw(format!(
                "[CHARACTER] Ignoring design for unknown character \"{}\"",
                design.name
            ));
        }
    }
    roster
        .iter()
        .map(|c| match designs.iter().find(|d| d.name == c.name) {
            Some(design) => Character {
                generated_description: Some(design.description.clone()),
                ..c.clone()
            },
            None => c.clone(),
        })
        .collect()
}

pub fn names_to_design(roster: &[Character]) -> Vec<String> {
    roster
        .iter()
        .filter(|c| !c.has_reference_image())
        .map(|c| c.name.clone())
        .collect()
}

pub fn merge_into_roster(roster: &mut [Character], update: Character) -> bool {
    match roster.iter_mut().find(|c| c.name == update.name) {
        Some(existing) => {
            existing.merge(update);
            true
        }
        None => false,
    }
}

pub fn clear_reference_image(roster: &mut [Character], name: &str) -> bool {
    match roster.iter_mut().find(|c| c.name == name) {
        Some(existing) => {
            existing.base64_image = None;
            existing.mime_type = None;
            existing.preview_url = None;
            true
        }
        None => false,
    }
}

fn data_uri_regex() -> Result<&'static Regex, regex::Error> {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_try_init(|| Regex::new(r"^data:([A-Za-z0-9.+-]+/[A-Za-z0-9.+-]+);base64,(.+)$"))
}

pub fn split_data_uri(uri: &str) -> Option<(String, String)> {
    let re = data_uri_regex().ok()?;
    let caps = re.captures(uri.trim())?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

pub fn reference_image_update(name: &str, mime_type: &str, base64_data: &str) -> Character {
    Character {
        name: name.to_string(),
        preview_url: Some(format!("data:{};base64,{}", mime_type, base64_data)),
        base64_image: Some(base64_data.to_string()),
        mime_type: Some(mime_type.to_string()),
        generated_description: None,
    }
}
