//! HTTP implementations of the model traits against an inference sidecar.
//!
//! The sidecar multiplexes ASR, VLM, LLM, and encoder models behind a small
//! JSON API. Clip media is referenced by path (the sidecar shares the
//! filesystem with this process); sampled frames are shipped inline as
//! base64 JPEGs.

use super::{Captioner, LlmClient, MultimodalEncoder, ScoredCaption, TextEncoder, Transcriber};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Shared reqwest client plus the sidecar base URL.
#[derive(Clone)]
pub struct InferenceClient {
    client: Client,
    base_url: String,
}

impl InferenceClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Resp>().await?)
    }
}

fn encode_frames(frames: &[PathBuf]) -> Result<Vec<String>> {
    frames
        .iter()
        .map(|p| {
            let bytes = std::fs::read(p).map_err(|e| {
                Error::CaptionModel(format!("failed to read frame '{}': {e}", p.display()))
            })?;
            Ok(STANDARD.encode(bytes))
        })
        .collect()
}

// ===== Transcription =====

#[derive(Debug, Serialize)]
struct TranscribeRequest {
    model: String,
    media_path: String,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

pub struct HttpTranscriber {
    client: InferenceClient,
    model: String,
}

impl HttpTranscriber {
    pub fn new(client: InferenceClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, media_path: &Path) -> Result<String> {
        let request = TranscribeRequest {
            model: self.model.clone(),
            media_path: media_path.display().to_string(),
        };
        let response: TranscribeResponse = self
            .client
            .post_json("/v1/audio/transcriptions", &request)
            .await
            .map_err(|e| Error::Transcription(e.to_string()))?;
        Ok(response.text)
    }
}

// ===== Captioning =====

#[derive(Debug, Serialize)]
struct CaptionRequest {
    model: String,
    frames: Vec<String>,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    caption: String,
    /// Relevance estimate in [0, 1]; present only for query-aware requests
    #[serde(default)]
    relevance: Option<f32>,
}

pub struct HttpCaptioner {
    client: InferenceClient,
    model: String,
}

impl HttpCaptioner {
    pub fn new(client: InferenceClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    async fn caption(&self, frames: &[PathBuf], prompt: String) -> Result<CaptionResponse> {
        let request = CaptionRequest {
            model: self.model.clone(),
            frames: encode_frames(frames)?,
            prompt,
        };
        self.client
            .post_json("/v1/caption", &request)
            .await
            .map_err(|e| match e {
                e @ Error::CaptionModel(_) => e,
                other => Error::CaptionModel(other.to_string()),
            })
    }
}

#[async_trait]
impl Captioner for HttpCaptioner {
    async fn caption_initial(&self, frames: &[PathBuf], transcript: &str) -> Result<String> {
        let prompt = format!(
            "Context from transcript: '{transcript}'. Based on the provided frames and \
             transcript, describe the key visual elements, actions, and overall scene."
        );
        let response = self.caption(frames, prompt).await?;
        Ok(response.caption)
    }

    async fn caption_query_aware(
        &self,
        frames: &[PathBuf],
        transcript: &str,
        query: &str,
        keywords: &[String],
    ) -> Result<ScoredCaption> {
        let prompt = format!(
            "Given the transcript: '{transcript}'. Focusing on keywords: {}. Provide a highly \
             detailed visual description relevant to the question '{query}', and rate how \
             relevant this clip is to the question.",
            keywords.join(", ")
        );
        let response = self.caption(frames, prompt).await?;
        Ok(ScoredCaption {
            caption: response.caption,
            score: response.relevance.unwrap_or(0.5).clamp(0.0, 1.0),
        })
    }
}

// ===== Text embedding =====

#[derive(Debug, Serialize)]
struct EmbedTextRequest {
    model: String,
    inputs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedTextResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct HttpTextEncoder {
    client: InferenceClient,
    model: String,
    dimension: usize,
}

impl HttpTextEncoder {
    pub fn new(client: InferenceClient, model: &str, dimension: usize) -> Self {
        Self {
            client,
            model: model.to_string(),
            dimension,
        }
    }
}

fn validate_dimension(embeddings: &[Vec<f32>], expected: usize, model: &str) -> Result<()> {
    if let Some(mismatch) = embeddings.iter().find(|v| v.len() != expected) {
        return Err(Error::Embedding(format!(
            "Embedding dimension mismatch for model '{model}': expected {expected}, got {}",
            mismatch.len()
        )));
    }
    Ok(())
}

#[async_trait]
impl TextEncoder for HttpTextEncoder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbedTextRequest {
            model: self.model.clone(),
            inputs: texts,
        };
        let response: EmbedTextResponse = self
            .client
            .post_json("/v1/embed/text", &request)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        validate_dimension(&response.embeddings, self.dimension, &self.model)?;
        Ok(response.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ===== Multi-modal embedding =====

#[derive(Debug, Serialize)]
struct EmbedClipRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    clip_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedClipResponse {
    embedding: Vec<f32>,
}

pub struct HttpMultimodalEncoder {
    client: InferenceClient,
    model: String,
    dimension: usize,
}

impl HttpMultimodalEncoder {
    pub fn new(client: InferenceClient, model: &str, dimension: usize) -> Self {
        Self {
            client,
            model: model.to_string(),
            dimension,
        }
    }

    async fn encode(&self, clip_path: Option<&Path>, text: Option<&str>) -> Result<Vec<f32>> {
        let request = EmbedClipRequest {
            model: self.model.clone(),
            clip_path: clip_path.map(|p| p.display().to_string()),
            text: text.map(|t| t.to_string()),
        };
        let response: EmbedClipResponse = self
            .client
            .post_json("/v1/embed/multimodal", &request)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        validate_dimension(
            std::slice::from_ref(&response.embedding),
            self.dimension,
            &self.model,
        )?;
        Ok(response.embedding)
    }
}

#[async_trait]
impl MultimodalEncoder for HttpMultimodalEncoder {
    async fn encode_clip(&self, clip_path: &Path, caption: &str) -> Result<Vec<f32>> {
        let aux = if caption.is_empty() { None } else { Some(caption) };
        self.encode(Some(clip_path), aux).await
    }

    async fn encode_text(&self, text: &str) -> Result<Vec<f32>> {
        self.encode(None, Some(text)).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ===== LLM generation =====

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    json_mode: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
}

pub struct HttpLlmClient {
    client: InferenceClient,
    indexer_model: String,
    generator_model: String,
}

impl HttpLlmClient {
    pub fn new(client: InferenceClient, indexer_model: &str, generator_model: &str) -> Self {
        Self {
            client,
            indexer_model: indexer_model.to_string(),
            generator_model: generator_model.to_string(),
        }
    }

    async fn generate_with(&self, model: &str, prompt: &str, json_mode: bool) -> Result<String> {
        let request = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            json_mode,
        };
        let response: GenerateResponse = self
            .client
            .post_json("/v1/generate", &request)
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        Ok(response.text)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with(&self.indexer_model, prompt, false).await
    }

    async fn generate_json(&self, prompt: &str) -> Result<serde_json::Value> {
        let text = self
            .generate_with(&self.indexer_model, prompt, true)
            .await?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Llm(format!("backend returned invalid JSON: {e}")))
    }

    async fn generate_answer(&self, prompt: &str) -> Result<String> {
        self.generate_with(&self.generator_model, prompt, false)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_embed_text_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embed/text"))
            .and(body_partial_json(json!({"model": "test-encoder"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embeddings": [[0.1, 0.2, 0.3]]
            })))
            .mount(&server)
            .await;

        let client = InferenceClient::new(&server.uri()).unwrap();
        let encoder = HttpTextEncoder::new(client, "test-encoder", 3);

        let embeddings = encoder.embed(vec!["hello".to_string()]).await.unwrap();
        assert_eq!(embeddings.len(), 1);
        assert_eq!(embeddings[0].len(), 3);
    }

    #[tokio::test]
    async fn test_embed_text_dimension_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embed/text"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embeddings": [[0.1, 0.2]]
            })))
            .mount(&server)
            .await;

        let client = InferenceClient::new(&server.uri()).unwrap();
        let encoder = HttpTextEncoder::new(client, "test-encoder", 3);

        let result = encoder.embed(vec!["hello".to_string()]).await;
        assert!(matches!(result, Err(Error::Embedding(_))));
    }

    #[tokio::test]
    async fn test_transcribe_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = InferenceClient::new(&server.uri()).unwrap();
        let transcriber = HttpTranscriber::new(client, "whisper-1");

        let result = transcriber.transcribe(Path::new("/tmp/clip.mp4")).await;
        assert!(matches!(result, Err(Error::Transcription(_))));
    }

    #[tokio::test]
    async fn test_generate_json_parses_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "text": "{\"entities\": []}"
            })))
            .mount(&server)
            .await;

        let client = InferenceClient::new(&server.uri()).unwrap();
        let llm = HttpLlmClient::new(client, "indexer", "generator");

        let value = llm.generate_json("extract").await.unwrap();
        assert!(value.get("entities").is_some());
    }
}
