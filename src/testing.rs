use crate::api::{
    ImageCandidate, ImageGenerator, InlineImage, JsonRequest, PromptPart, SpeechSynthesizer,
    TextGenerator, VideoGenerator,
};
use crate::error::{MangaError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::UnboundedSender;

pub fn one_strip_storyboard() -> String {
    r#"[
        {
            "description": "A hero confronts a villain on a rooftop.",
            "characters": ["Hero", "Villain"],
            "panels": [
                {
                    "title": "Arrival",
                    "description": "Hero lands on the rooftop.",
                    "characters": [{ "name": "Hero", "description": "landing in a crouch" }],
                    "text": [{ "type": "narration", "content": "The city sleeps." }]
                },
                {
                    "title": null,
                    "description": "Villain turns to face the hero.",
                    "characters": [{ "name": "Villain", "description": "smirking" }],
                    "text": [{ "type": "dialogue", "content": "You came.", "speaker": "Villain" }]
                }
            ]
        }
    ]"#
    .to_string()
}

pub fn two_strip_storyboard() -> String {
    r#"[
        {
            "description": "Morning market.",
            "characters": ["Mika"],
            "panels": [
                { "description": "Mika walks between stalls.", "text": [] },
                { "description": "Mika spots a stolen purse.", "text": [
                    { "type": "thought", "content": "That's Ren's purse..." }
                ] }
            ]
        },
        {
            "description": "The chase.",
            "characters": ["Mika", "Ren"],
            "panels": [
                { "description": "Mika sprints after the thief.", "text": [
                    { "type": "action", "content": "DASH!" }
                ] },
                { "description": "Ren blocks the alley.", "text": [
                    { "type": "dialogue", "content": "Going somewhere?", "speaker": "Ren" }
                ] },
                { "description": "The thief drops the purse.", "text": [] }
            ]
        }
    ]"#
    .to_string()
}

fn scripted_failure() -> MangaError {
    MangaError::MalformedResponse {
        service: "fake",
        detail: "no scripted response".into(),
    }
}

pub fn transport_failure() -> MangaError {
    MangaError::Http {
        service: "fake",
        status: 503,
        body: "upstream unavailable".into(),
    }
}

pub struct FakeText {
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<JsonRequest>>,
    streamed: AtomicUsize,
}

impl FakeText {
    pub fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            streamed: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, response: Result<String>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn streamed_calls(&self) -> usize {
        self.streamed.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<JsonRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &JsonRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(scripted_failure()))
    }
}

#[async_trait]
impl TextGenerator for FakeText {
    async fn generate_json(&self, request: &JsonRequest) -> Result<String> {
        self.next(request)
    }

    async fn stream_json(
        &self,
        request: &JsonRequest,
        fragments: UnboundedSender<String>,
    ) -> Result<String> {
        self.streamed.fetch_add(1, Ordering::SeqCst);
        let full = self.next(request)?;
        let chars: Vec<char> = full.chars().collect();
        for piece in chars.chunks(40) {
            let _ = fragments.send(piece.iter().collect());
        }
        Ok(full)
    }
}

#[derive(Debug)]
pub enum ImageOutcome {
    Image,
    Blocked,
    Empty,
    Fail,
}

pub struct FakeImage {
    script: Mutex<VecDeque<ImageOutcome>>,
    fail_on: Mutex<Option<String>>,
    calls: Mutex<Vec<Vec<PromptPart>>>,
    call_times: Mutex<Vec<tokio::time::Instant>>,
}

impl FakeImage {
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(script: Vec<ImageOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fail_on: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            call_times: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_on(&self, needle: Option<&str>) {
        *self.fail_on.lock().unwrap() = needle.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<Vec<PromptPart>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub fn panel_descriptions(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|parts| {
                parts.iter().find_map(|p| match p {
                    PromptPart::Text(t) => t.strip_prefix("Panel Description: ").map(str::to_string),
                    _ => None,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ImageGenerator for FakeImage {
    async fn generate_image(&self, parts: &[PromptPart]) -> Result<ImageCandidate> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(parts.to_vec());
            calls.len()
        };
        self.call_times.lock().unwrap().push(tokio::time::Instant::now());

        let scripted = self.script.lock().unwrap().pop_front();
        let outcome = match scripted {
            Some(outcome) => outcome,
            None => {
                let fail_on = self.fail_on.lock().unwrap().clone();
                let hit = fail_on.is_some_and(|needle| {
                    parts
                        .iter()
                        .any(|p| matches!(p, PromptPart::Text(t) if t.contains(&needle)))
                });
                if hit { ImageOutcome::Fail } else { ImageOutcome::Image }
            }
        };

        match outcome {
            ImageOutcome::Image => Ok(ImageCandidate {
                images: vec![InlineImage {
                    mime_type: "image/png".into(),
                    data: format!("PANEL{}", n),
                }],
                finish_reason: Some("STOP".into()),
            }),
            ImageOutcome::Blocked => Ok(ImageCandidate {
                images: Vec::new(),
                finish_reason: Some("PROHIBITED_CONTENT".into()),
            }),
            ImageOutcome::Empty => Ok(ImageCandidate {
                images: Vec::new(),
                finish_reason: Some("STOP".into()),
            }),
            ImageOutcome::Fail => Err(transport_failure()),
        }
    }
}

pub struct FakeSpeech {
    fail: bool,
    texts: Mutex<Vec<String>>,
}

impl FakeSpeech {
    pub fn new(fail: bool) -> Self {
        Self {
            fail,
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.texts.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(transport_failure());
        }
        Ok(b"ID3-fake-mpeg".to_vec())
    }
}

pub struct FakeVideo {
    response: Value,
    calls: AtomicUsize,
}

impl FakeVideo {
    pub fn new(response: Value) -> Self {
        Self {
            response,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoGenerator for FakeVideo {
    async fn image_to_video(&self, _prompt: &str, _image_url: &str) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}
