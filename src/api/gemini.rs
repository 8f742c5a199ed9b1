use crate::api::{
    ImageCandidate, ImageGenerator, InlineImage, JsonRequest, PromptPart, TextGenerator,
    body_snippet,
};
use crate::error::{MangaError, Result};
use crate::logw;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::pin;
use tokio::sync::mpsc::UnboundedSender;

const SERVICE: &str = "Gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    text_model: String,
    image_model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, text_model: &str, image_model: &str) -> Self {
        Self::with_client(reqwest::Client::new(), api_key, text_model, image_model)
    }

    pub fn with_client(
        client: reqwest::Client,
        api_key: &str,
        text_model: &str,
        image_model: &str,
    ) -> Self {
        Self {
            api_key: api_key.to_string(),
            text_model: text_model.to_string(),
            image_model: image_model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        }
    }

    async fn post(&self, url: &str, body: &GeminiRequest) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|source| MangaError::Transport {
                service: SERVICE,
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            return Err(MangaError::Http {
                service: SERVICE,
                status: status.as_u16(),
                body: body_snippet(&raw),
            });
        }
        Ok(resp)
    }

    async fn generate_content(&self, model: &str, body: &GeminiRequest) -> Result<GeminiResponse> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let resp = self.post(&url, body).await?;
        let raw = resp.text().await.map_err(|source| MangaError::Transport {
            service: SERVICE,
            source,
        })?;
        parse_response(&raw)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: GeminiBlob,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    text: Option<String>,
    inline_data: Option<GeminiBlob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

impl GeminiResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn finish_reason(&self) -> Option<String> {
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.clone())
            .or_else(|| {
                self.prompt_feedback
                    .as_ref()
                    .and_then(|f| f.block_reason.clone())
            })
    }

    fn into_image_candidate(self) -> ImageCandidate {
        let finish_reason = self.finish_reason();
        let images = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.inline_data)
                    .map(|blob| InlineImage {
                        mime_type: blob.mime_type,
                        data: blob.data,
                    })
                    .collect()
            })
            .unwrap_or_default();
        ImageCandidate {
            images,
            finish_reason,
        }
    }
}

fn parse_response(raw: &str) -> Result<GeminiResponse> {
    let resp: GeminiResponse =
        serde_json::from_str(raw).map_err(|e| MangaError::MalformedResponse {
            service: SERVICE,
            detail: format!("{}. Body: {}", e, body_snippet(raw)),
        })?;
    if let Some(err) = &resp.error {
        return Err(MangaError::MalformedResponse {
            service: SERVICE,
            detail: err.message.clone(),
        });
    }
    Ok(resp)
}

fn json_request_body(request: &JsonRequest) -> GeminiRequest {
    GeminiRequest {
        contents: vec![GeminiContent {
            role: "user",
            parts: request
                .parts
                .iter()
                .map(|text| GeminiPart::Text { text: text.clone() })
                .collect(),
        }],
        generation_config: GenerationConfig {
            response_mime_type: Some("application/json"),
            response_schema: Some(request.schema.clone()),
            ..GenerationConfig::default()
        },
    }
}

fn image_request_body(parts: &[PromptPart]) -> GeminiRequest {
    GeminiRequest {
        contents: vec![GeminiContent {
            role: "user",
            parts: parts
                .iter()
                .map(|part| match part {
                    PromptPart::Text(text) => GeminiPart::Text { text: text.clone() },
                    PromptPart::InlineImage { mime_type, data } => GeminiPart::Inline {
                        inline_data: GeminiBlob {
                            mime_type: mime_type.clone(),
                            data: data.clone(),
                        },
                    },
                })
                .collect(),
        }],
        generation_config: GenerationConfig {
            response_modalities: vec!["IMAGE", "TEXT"],
            ..GenerationConfig::default()
        },
    }
}

fn sse_fragment(line: &str) -> Result<Option<String>> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(None);
    }
    let chunk = parse_response(payload)?;
    let text = chunk.text();
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

fn reply_text(resp: &GeminiResponse) -> String {
    let text = resp.text();
    if text.is_empty() {
        let reason = resp.finish_reason().unwrap_or_else(|| "UNKNOWN".to_string());
        logw(format!("[GEMINI] Empty reply. Finish reason: {}", reason));
    }
    text
}

async fn collect_sse<S, B>(stream: S, fragments: &UnboundedSender<String>) -> Result<String>
where
    S: Stream<Item = Result<B>>,
    B: AsRef<[u8]>,
{
    let mut stream = pin!(stream);
    let mut full = String::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut receiver_gone = false;

    let mut forward = |line: &[u8], full: &mut String| -> Result<()> {
        let line = String::from_utf8_lossy(line);
        if let Some(text) = sse_fragment(line.trim_end())? {
            full.push_str(&text);
            if fragments.send(text).is_err() && !receiver_gone {
                receiver_gone = true;
                logw("[GEMINI] Progress receiver dropped; still collecting response.");
            }
        }
        Ok(())
    };

    while let Some(chunk) = stream.next().await {
        pending.extend_from_slice(chunk?.as_ref());

        // Decode only complete lines so a multi-byte character split across
        // chunks stays intact.
        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            forward(&line, &mut full)?;
        }
    }

    if !pending.is_empty() {
        forward(&pending, &mut full)?;
    }
    Ok(full)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate_json(&self, request: &JsonRequest) -> Result<String> {
        let resp = self
            .generate_content(&self.text_model, &json_request_body(request))
            .await?;
        Ok(reply_text(&resp))
    }

    async fn stream_json(
        &self,
        request: &JsonRequest,
        fragments: UnboundedSender<String>,
    ) -> Result<String> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.text_model
        );
        let resp = self.post(&url, &json_request_body(request)).await?;
        let chunks = resp.bytes_stream().map(|chunk| {
            chunk.map_err(|source| MangaError::Transport {
                service: SERVICE,
                source,
            })
        });
        let full = collect_sse(chunks, &fragments).await?;
        if full.is_empty() {
            logw("[GEMINI] Empty streamed reply.");
        }
        Ok(full)
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate_image(&self, parts: &[PromptPart]) -> Result<ImageCandidate> {
        let resp = self
            .generate_content(&self.image_model, &image_request_body(parts))
            .await?;
        if resp.candidates.is_empty() && resp.prompt_feedback.is_none() {
            return Err(MangaError::MalformedResponse {
                service: SERVICE,
                detail: "no candidates in image response".to_string(),
            });
        }
        Ok(resp.into_image_candidate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    fn sse_event(text: &str) -> String {
        let chunk = json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] });
        format!("data: {}\r\n\r\n", chunk)
    }

    #[test]
    fn json_request_serializes_schema_config() {
        let request = JsonRequest::new(
            vec!["system".into(), "chapter".into()],
            json!({ "type": "ARRAY", "items": { "type": "STRING" } }),
        );
        let body = serde_json::to_value(json_request_body(&request)).unwrap();
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][1]["text"], "chapter");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "ARRAY");
        assert!(body["generationConfig"].get("responseModalities").is_none());
    }

    #[test]
    fn image_request_puts_inline_data_in_order() {
        let parts = vec![
            PromptPart::InlineImage {
                mime_type: "image/png".into(),
                data: "QUJD".into(),
            },
            PromptPart::Text("Panel Description: a duel".into()),
        ];
        let body = serde_json::to_value(image_request_body(&parts)).unwrap();
        let sent = &body["contents"][0]["parts"];
        assert_eq!(sent[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(sent[0]["inlineData"]["data"], "QUJD");
        assert_eq!(sent[1]["text"], "Panel Description: a duel");
        assert_eq!(body["generationConfig"]["responseModalities"], json!(["IMAGE", "TEXT"]));
    }

    #[test]
    fn image_response_takes_inline_parts_of_first_candidate() {
        let raw = r#"{
            "candidates": [{
                "content": { "parts": [
                    { "text": "Here is your panel." },
                    { "inlineData": { "mimeType": "image/png", "data": "iVBORw0" } }
                ]},
                "finishReason": "STOP"
            }]
        }"#;
        let candidate = parse_response(raw).unwrap().into_image_candidate();
        assert_eq!(candidate.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(candidate.images.len(), 1);
        assert_eq!(candidate.images[0].to_data_uri(), "data:image/png;base64,iVBORw0");
    }

    #[test]
    fn prompt_block_surfaces_as_finish_reason() {
        let raw = r#"{ "promptFeedback": { "blockReason": "PROHIBITED_CONTENT" } }"#;
        let candidate = parse_response(raw).unwrap().into_image_candidate();
        assert!(candidate.images.is_empty());
        assert_eq!(candidate.finish_reason.as_deref(), Some("PROHIBITED_CONTENT"));
    }

    #[test]
    fn error_body_is_malformed_response() {
        let raw = r#"{ "error": { "message": "API key not valid" } }"#;
        let err = parse_response(raw).unwrap_err();
        assert!(err.to_string().contains("API key not valid"));
    }

    #[test]
    fn sse_lines_yield_text_fragments() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"[{\"desc"}]}}]}"#;
        assert_eq!(sse_fragment(line).unwrap().as_deref(), Some("[{\"desc"));
        assert_eq!(sse_fragment("").unwrap(), None);
        assert_eq!(sse_fragment(": keep-alive").unwrap(), None);
    }

    #[tokio::test]
    async fn sse_collector_reassembles_split_chunks() {
        let body = format!("{}{}", sse_event("[{\"d\":\"é"), sse_event("x\"}]"));
        let bytes = body.trim_end().as_bytes().to_vec();
        let accent = bytes.iter().position(|b| *b == 0xC3).unwrap();
        let mid_second = bytes.len() - 10;
        let chunks = vec![
            bytes[..accent + 1].to_vec(),
            bytes[accent + 1..mid_second].to_vec(),
            bytes[mid_second..].to_vec(),
        ];

        let (tx, mut rx) = unbounded_channel();
        let full = collect_sse(stream::iter(chunks.into_iter().map(Ok::<_, MangaError>)), &tx)
            .await
            .unwrap();
        drop(tx);
        let mut fragments = Vec::new();
        while let Some(fragment) = rx.recv().await {
            fragments.push(fragment);
        }

        assert_eq!(full, "[{\"d\":\"éx\"}]");
        assert_eq!(fragments, vec!["[{\"d\":\"é".to_string(), "x\"}]".to_string()]);
        assert_eq!(fragments.concat(), full);
    }

    #[tokio::test]
    async fn sse_transport_error_stops_collection() {
        let (tx, _rx) = unbounded_channel();
        let chunks = vec![
            Ok(sse_event("[")),
            Err(MangaError::MalformedResponse {
                service: SERVICE,
                detail: "connection reset".into(),
            }),
        ];
        let err = collect_sse(stream::iter(chunks), &tx).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn blocked_reply_reads_as_empty_on_both_paths() {
        let raw = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let one_shot = reply_text(&parse_response(raw).unwrap());

        let (tx, _rx) = unbounded_channel();
        let event = format!("data: {}\n\n", raw);
        let streamed = collect_sse(stream::iter(vec![Ok::<_, MangaError>(event)]), &tx)
            .await
            .unwrap();

        assert_eq!(one_shot, "");
        assert_eq!(streamed, "");
        for reply in [one_shot, streamed] {
            assert!(matches!(
                crate::storyboard::parse_storyboard(&reply),
                Err(MangaError::InvalidStoryboard(_))
            ));
        }
    }
}
