use crate::api::{ImageGenerator, PromptPart};
use crate::error::{MangaError, Result};
use crate::model::{Character, CharacterAction};
use crate::{logi, logok, logw};
use std::sync::Arc;
use std::time::Duration;

pub const MAX_ATTEMPTS: usize = 2;
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

const STYLE_INSTRUCTION: &str = "Style: A dynamic black and white manga panel with screentones. \
Vertical 9:16 aspect ratio. DO NOT add any text, speech bubbles, or titles into the image.";

const FALLBACK_SCENE: &str = "A calm, peaceful everyday scene with the characters standing \
together in a quiet setting, neutral expressions, soft lighting. Family-friendly.";

const CONTENT_POLICY_REASONS: &[&str] = &["PROHIBITED_CONTENT", "SAFETY", "IMAGE_SAFETY", "BLOCKLIST"];

pub fn is_content_policy_block(finish_reason: &str) -> bool {
    CONTENT_POLICY_REASONS.contains(&finish_reason)
}

#[derive(Debug, Clone, Copy)]
pub struct PanelRequest<'a> {
    pub panel_description: &'a str,
    pub strip_description: &'a str,
    pub roster: &'a [Character],
    pub actions: &'a [CharacterAction],
}

pub fn build_prompt(request: &PanelRequest<'_>) -> Vec<PromptPart> {
    let mut parts: Vec<PromptPart> = request
        .roster
        .iter()
        .filter_map(|c| c.reference_image())
        .map(|(data, mime)| PromptPart::InlineImage {
            mime_type: mime.to_string(),
            data: data.to_string(),
        })
        .collect();

    let actions = if request.actions.is_empty() {
        "No specific character actions described.".to_string()
    } else {
        request
            .actions
            .iter()
            .map(|a| format!("- {}: {}", a.name, a.description))
            .collect::<Vec<_>>()
            .join("\n")
    };

    parts.push(PromptPart::Text(STYLE_INSTRUCTION.to_string()));
    parts.push(PromptPart::Text(format!("Strip Theme: {}", request.strip_description)));
    parts.push(PromptPart::Text(format!(
        "Panel Description: {}",
        request.panel_description
    )));
    parts.push(PromptPart::Text(format!(
        "Character Actions in this Panel:\n{}",
        actions
    )));
    parts.push(PromptPart::Text(format!(
        "Overall Character Designs:\n{}",
        character_designs(request.roster)
    )));
    parts
}

fn character_designs(roster: &[Character]) -> String {
    roster
        .iter()
        .map(|c| {
            let look = if c.reference_image().is_some() {
                "Use the provided reference image for this character."
            } else {
                c.generated_description
                    .as_deref()
                    .unwrap_or("No design available; keep this character consistent across panels.")
            };
            format!("- {}: {}", c.name, look)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_fallback_prompt(request: &PanelRequest<'_>) -> Vec<PromptPart> {
    let mut parts: Vec<PromptPart> = request
        .roster
        .iter()
        .filter_map(|c| c.reference_image())
        .map(|(data, mime)| PromptPart::InlineImage {
            mime_type: mime.to_string(),
            data: data.to_string(),
        })
        .collect();
    parts.push(PromptPart::Text(STYLE_INSTRUCTION.to_string()));
    parts.push(PromptPart::Text(format!("Panel Description: {}", FALLBACK_SCENE)));
    parts.push(PromptPart::Text(format!(
        "Overall Character Designs:\n{}",
        character_designs(request.roster)
    )));
    parts
}

#[derive(Clone)]
pub struct PanelRenderer {
    image_gen: Arc<dyn ImageGenerator>,
    retry_delay: Duration,
}

impl PanelRenderer {
    pub fn new(image_gen: Arc<dyn ImageGenerator>) -> Self {
        Self {
            image_gen,
            retry_delay: RETRY_DELAY,
        }
    }

    // A content-policy block gets one immediate retry with the fallback prompt;
    // anything else retryable waits RETRY_DELAY first.
    pub async fn render(&self, request: &PanelRequest<'_>) -> Result<String> {
        let snippet: String = request.panel_description.chars().take(100).collect();
        logi(format!("[PANEL] Rendering: {}", snippet));

        let mut use_fallback = false;
        let mut last_err = MangaError::NoImage;

        for attempt in 1..=MAX_ATTEMPTS {
            let parts = if use_fallback {
                build_fallback_prompt(request)
            } else {
                build_prompt(request)
            };

            let err = match self.image_gen.generate_image(&parts).await {
                Ok(candidate) => {
                    if let Some(image) = candidate.images.first() {
                        logok(format!(
                            "[PANEL] Image {} ({}KB) on attempt {}",
                            image.mime_type,
                            image.data.len() / 1024,
                            attempt
                        ));
                        return Ok(image.to_data_uri());
                    }
                    match candidate.finish_reason {
                        Some(reason) if is_content_policy_block(&reason) => {
                            MangaError::ContentBlocked { reason }
                        }
                        _ => MangaError::NoImage,
                    }
                }
                Err(e) => e,
            };

            let blocked = matches!(err, MangaError::ContentBlocked { .. });
            let fallback_retry = blocked && !use_fallback;
            if attempt == MAX_ATTEMPTS || !(fallback_retry || err.is_retryable()) {
                last_err = err;
                break;
            }

            if fallback_retry {
                logw(format!(
                    "[PANEL] {}; retrying with a conservative prompt",
                    err
                ));
                use_fallback = true;
            } else {
                logw(format!(
                    "[PANEL] Attempt {} failed: {}; retrying in {}s",
                    attempt,
                    err,
                    self.retry_delay.as_secs_f32()
                ));
                tokio::time::sleep(self.retry_delay).await;
            }
            last_err = err;
        }

        logw(format!("[PANEL] Giving up: {}", last_err));
        Err(last_err)
    }
}
