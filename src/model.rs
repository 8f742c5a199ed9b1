use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextKind {
    Dialogue,
    Narration,
    Thought,
    Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(rename = "type")]
    pub kind: TextKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterAction {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPanel {
    #[serde(default)]
    pub title: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<Vec<CharacterAction>>,
    pub text: Vec<TextBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputStrip {
    pub description: String,
    pub panels: Vec<InputPanel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<Vec<String>>,
}

impl InputStrip {
    pub fn character_names(&self) -> &[String] {
        self.characters.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_description: Option<String>,
}

impl Character {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn reference_image(&self) -> Option<(&str, &str)> {
        match (&self.base64_image, &self.mime_type) {
            (Some(data), Some(mime)) => Some((data.as_str(), mime.as_str())),
            _ => None,
        }
    }

    pub fn has_reference_image(&self) -> bool {
        self.base64_image.is_some()
    }

    pub fn merge(&mut self, update: Character) {
        if update.preview_url.is_some() {
            self.preview_url = update.preview_url;
        }
        if update.base64_image.is_some() {
            self.base64_image = update.base64_image;
        }
        if update.mime_type.is_some() {
            self.mime_type = update.mime_type;
        }
        if update.generated_description.is_some() {
            self.generated_description = update.generated_description;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    #[serde(flatten)]
    pub input: InputPanel,
    pub panel_number: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_poster_url: Option<String>,
}

impl Panel {
    pub fn is_rendered(&self) -> bool {
        self.image_url.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MangaStripData {
    pub description: String,
    pub panels: Vec<Panel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

impl MangaStripData {
    pub fn skeleton(strip: &InputStrip) -> Self {
        Self {
            description: strip.description.clone(),
            panels: strip
                .panels
                .iter()
                .enumerate()
                .map(|(idx, panel)| Panel {
                    input: panel.clone(),
                    panel_number: idx + 1,
                    image_url: None,
                    motion_poster_url: None,
                })
                .collect(),
            narration_text: None,
            audio_url: None,
        }
    }
}
