use crate::api::{ImageGenerator, TextGenerator};
use crate::characters;
use crate::error::{MangaError, Result};
use crate::model::{Character, InputStrip, MangaStripData};
use crate::motion_poster::MotionPosterEnhancer;
use crate::narration::NarrationComposer;
use crate::panel::{PanelRenderer, PanelRequest};
use crate::storyboard;
use crate::{logi, logok, logw};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationState {
    Input,
    GeneratingStoryboard,
    CharacterSetup,
    Generating,
    Viewing,
}

impl GenerationState {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationState::Input => "waiting for chapter text",
            GenerationState::GeneratingStoryboard => "generating the storyboard",
            GenerationState::CharacterSetup => "setting up characters",
            GenerationState::Generating => "generating",
            GenerationState::Viewing => "viewing",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryContext {
    pub strip_index: usize,
    pub panel_index: usize,
    pub strips_to_render: Vec<MangaStripData>,
    pub final_characters: Vec<Character>,
}

impl RetryContext {
    fn start(final_characters: Vec<Character>) -> Self {
        Self {
            strip_index: 0,
            panel_index: 0,
            strips_to_render: Vec::new(),
            final_characters,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "retry from strip {}, panel {}",
            self.strip_index + 1,
            self.panel_index + 1
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StudioEvent {
    StateChanged(GenerationState),
    Progress(String),
    StripStarted { strip_index: usize },
    PanelRendered { strip_index: usize, panel_index: usize },
    StripNarrated { strip_index: usize, has_audio: bool },
    Failed { message: String, retry: Option<(usize, usize)> },
}

#[derive(Clone)]
pub struct Services {
    pub text: Arc<dyn TextGenerator>,
    pub image: Arc<dyn ImageGenerator>,
    pub narration: Option<NarrationComposer>,
    pub motion: Option<Arc<MotionPosterEnhancer>>,
}

pub struct Studio {
    services: Services,
    renderer: PanelRenderer,
    state: GenerationState,
    chapter_text: String,
    input_strips: Vec<InputStrip>,
    characters: Vec<Character>,
    generated_strips: Vec<MangaStripData>,
    error: Option<String>,
    retry_context: Option<RetryContext>,
    events: Option<UnboundedSender<StudioEvent>>,
    pending_preload: Option<JoinHandle<()>>,
}

impl Studio {
    pub fn new(services: Services) -> Self {
        let renderer = PanelRenderer::new(Arc::clone(&services.image));
        Self {
            services,
            renderer,
            state: GenerationState::Input,
            chapter_text: String::new(),
            input_strips: Vec::new(),
            characters: Vec::new(),
            generated_strips: Vec::new(),
            error: None,
            retry_context: None,
            events: None,
            pending_preload: None,
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<StudioEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    pub fn chapter_text(&self) -> &str {
        &self.chapter_text
    }

    pub fn input_strips(&self) -> &[InputStrip] {
        &self.input_strips
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn generated_strips(&self) -> &[MangaStripData] {
        &self.generated_strips
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn retry_context(&self) -> Option<&RetryContext> {
        self.retry_context.as_ref()
    }

    fn emit(&self, event: StudioEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn set_state(&mut self, state: GenerationState) {
        self.state = state;
        self.emit(StudioEvent::StateChanged(state));
    }

    fn progress(&self, message: String) {
        logi(&message);
        self.emit(StudioEvent::Progress(message));
    }

    fn require(&self, action: &'static str, allowed: &[GenerationState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(MangaError::InvalidState {
                action,
                state: self.state.as_str(),
            })
        }
    }

    pub async fn submit_chapter(&mut self, text: &str) -> Result<()> {
        self.submit(text, None).await
    }

    pub async fn submit_chapter_streaming(
        &mut self,
        text: &str,
        fragments: UnboundedSender<String>,
    ) -> Result<()> {
        self.submit(text, Some(fragments)).await
    }

    async fn submit(&mut self, text: &str, fragments: Option<UnboundedSender<String>>) -> Result<()> {
        self.require("submit a chapter", &[GenerationState::Input])?;

        self.chapter_text = text.to_string();
        self.error = None;
        self.retry_context = None;
        self.generated_strips.clear();
        self.set_state(GenerationState::GeneratingStoryboard);
        self.progress("Creating storyboard from your chapter...".to_string());

        match storyboard::generate_storyboard(self.services.text.as_ref(), text, fragments).await {
            Ok(strips) => {
                self.characters = storyboard::character_roster(&strips);
                self.input_strips = strips;
                self.set_state(GenerationState::CharacterSetup);
                Ok(())
            }
            Err(e) => {
                logw(format!("Storyboard failed: {}", e));
                self.error = Some(e.to_string());
                self.set_state(GenerationState::Input);
                Err(e)
            }
        }
    }

    pub fn back_to_input(&mut self) -> Result<()> {
        self.require(
            "go back to text entry",
            &[GenerationState::CharacterSetup, GenerationState::Viewing],
        )?;
        self.set_state(GenerationState::Input);
        Ok(())
    }

    pub fn update_character(&mut self, update: Character) -> Result<bool> {
        self.require(
            "edit characters",
            &[GenerationState::CharacterSetup, GenerationState::Viewing],
        )?;
        Ok(characters::merge_into_roster(&mut self.characters, update))
    }

    pub fn set_reference_image(&mut self, name: &str, mime_type: &str, base64_data: &str) -> Result<bool> {
        self.update_character(characters::reference_image_update(name, mime_type, base64_data))
    }

    pub fn clear_reference_image(&mut self, name: &str) -> Result<bool> {
        self.require(
            "edit characters",
            &[GenerationState::CharacterSetup, GenerationState::Viewing],
        )?;
        Ok(characters::clear_reference_image(&mut self.characters, name))
    }

    pub async fn generate(&mut self) -> Result<()> {
        self.require(
            "generate",
            &[GenerationState::CharacterSetup, GenerationState::Viewing],
        )?;
        self.error = None;
        self.retry_context = None;
        self.generated_strips.clear();
        self.set_state(GenerationState::Generating);

        let mut final_characters = self.characters.clone();
        let to_design = characters::names_to_design(&final_characters);
        if !to_design.is_empty() {
            self.progress(format!("Designing {} character(s)...", to_design.len()));
            match characters::design_characters(
                self.services.text.as_ref(),
                &to_design,
                &self.chapter_text,
            )
            .await
            {
                Ok(designs) => {
                    final_characters = characters::apply_designs(&final_characters, &designs);
                    self.characters = final_characters.clone();
                }
                Err(e) => {
                    logw(format!("Character design failed: {}", e));
                    self.error = Some(e.to_string());
                    self.set_state(GenerationState::CharacterSetup);
                    self.emit(StudioEvent::Failed {
                        message: e.to_string(),
                        retry: None,
                    });
                    return Err(e);
                }
            }
        }

        self.render_from(RetryContext::start(final_characters)).await
    }

    pub async fn retry(&mut self) -> Result<()> {
        self.require(
            "retry",
            &[GenerationState::CharacterSetup, GenerationState::Viewing],
        )?;
        let Some(ctx) = self.retry_context.take() else {
            return Err(MangaError::InvalidState {
                action: "retry",
                state: "there is nothing to resume",
            });
        };
        logi(format!("Resuming: {}", ctx.describe()));
        self.error = None;
        self.set_state(GenerationState::Generating);
        self.render_from(ctx).await
    }

    pub fn clear_error(&mut self) {
        self.error = None;
        self.retry_context = None;
    }

    async fn render_from(&mut self, ctx: RetryContext) -> Result<()> {
        let RetryContext {
            strip_index: start_strip,
            panel_index: start_panel,
            strips_to_render: mut strips,
            final_characters,
        } = ctx;
        self.generated_strips = strips.clone();

        for i in start_strip..self.input_strips.len() {
            if strips.len() <= i {
                strips.push(MangaStripData::skeleton(&self.input_strips[i]));
                self.generated_strips = strips.clone();
                self.emit(StudioEvent::StripStarted { strip_index: i });
            }

            let first_panel = if i == start_strip { start_panel } else { 0 };
            for j in first_panel..strips[i].panels.len() {
                if strips[i].panels[j].is_rendered() {
                    continue;
                }
                self.progress(format!("Drawing strip {}, panel {}...", i + 1, j + 1));

                let rendered = {
                    let strip = &self.input_strips[i];
                    let panel = &strip.panels[j];
                    let request = PanelRequest {
                        panel_description: &panel.description,
                        strip_description: &strip.description,
                        roster: &final_characters,
                        actions: panel.characters.as_deref().unwrap_or(&[]),
                    };
                    self.renderer.render(&request).await
                };

                match rendered {
                    Ok(image_url) => {
                        if i == 0 && j == 0 {
                            self.preload_motion_poster(&image_url);
                        }
                        strips[i].panels[j].image_url = Some(image_url);
                        self.generated_strips = strips.clone();
                        self.emit(StudioEvent::PanelRendered {
                            strip_index: i,
                            panel_index: j,
                        });
                    }
                    Err(e) => {
                        self.fail_panel(i, j, strips, final_characters, &e);
                        return Err(e);
                    }
                }
            }

            self.narrate_strip(i, &mut strips[i]).await;
            self.generated_strips = strips.clone();
        }

        self.refresh_motion_posters();
        self.set_state(GenerationState::Viewing);
        logok(format!(
            "Manga ready: {} strips, {} panels",
            self.generated_strips.len(),
            self.generated_strips.iter().map(|s| s.panels.len()).sum::<usize>()
        ));
        Ok(())
    }

    fn fail_panel(
        &mut self,
        strip_index: usize,
        panel_index: usize,
        strips: Vec<MangaStripData>,
        final_characters: Vec<Character>,
        err: &MangaError,
    ) {
        let ctx = RetryContext {
            strip_index,
            panel_index,
            strips_to_render: strips,
            final_characters,
        };
        logw(format!("Panel failed ({}): {}", ctx.describe(), err));

        let any_rendered = ctx
            .strips_to_render
            .iter()
            .any(|s| s.panels.iter().any(|p| p.is_rendered()));
        self.generated_strips = ctx.strips_to_render.clone();
        self.error = Some(err.to_string());
        self.retry_context = Some(ctx);
        self.set_state(if any_rendered {
            GenerationState::Viewing
        } else {
            GenerationState::CharacterSetup
        });
        self.emit(StudioEvent::Failed {
            message: err.to_string(),
            retry: Some((strip_index, panel_index)),
        });
    }

    async fn narrate_strip(&self, strip_index: usize, strip: &mut MangaStripData) {
        let Some(composer) = &self.services.narration else {
            return;
        };
        self.progress(format!("Narrating strip {}...", strip_index + 1));
        let names = self.input_strips[strip_index].character_names();
        match composer
            .narrate(strip_index + 1, &strip.description, &strip.panels, names)
            .await
        {
            Ok(narration) => {
                strip.narration_text = Some(narration.text);
                strip.audio_url = Some(narration.audio_url);
            }
            Err(e) => {
                logw(format!(
                    "Narration failed for strip {}: {}",
                    strip_index + 1,
                    e
                ));
            }
        }
        self.emit(StudioEvent::StripNarrated {
            strip_index,
            has_audio: strip.audio_url.is_some(),
        });
    }

    fn preload_motion_poster(&mut self, image_url: &str) {
        if let Some(motion) = &self.services.motion {
            self.pending_preload = Some(motion.preload(image_url.to_string()));
        }
    }

    pub fn motion_poster_for(&self, strip_index: usize, panel_index: usize) -> Option<String> {
        if strip_index != 0 || panel_index != 0 {
            return None;
        }
        let motion = self.services.motion.as_ref()?;
        let image_url = self
            .generated_strips
            .first()?
            .panels
            .first()?
            .image_url
            .as_deref()?;
        motion.cached(image_url).map(|r| r.video_url)
    }

    pub fn refresh_motion_posters(&mut self) {
        let poster = self.motion_poster_for(0, 0);
        if let Some(panel) = self
            .generated_strips
            .first_mut()
            .and_then(|s| s.panels.first_mut())
        {
            panel.motion_poster_url = poster;
        }
    }

    pub async fn wait_for_motion_poster(&mut self) {
        if let Some(handle) = self.pending_preload.take() {
            if let Err(e) = handle.await {
                logw(format!("Motion poster task ended abnormally: {}", e));
            }
        }
        self.refresh_motion_posters();
    }
}
