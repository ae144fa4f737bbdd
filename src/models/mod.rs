//! Inference model abstractions
//!
//! Trait seams for every model the pipelines call: ASR transcription,
//! vision-language captioning, text and multi-modal embedding, and LLM
//! generation. The concrete implementations talk to an inference sidecar over
//! HTTP; orchestrators depend only on the traits so tests can substitute
//! stubs.

mod http;
pub mod retry;

pub use http::*;

use crate::config::ModelsConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Caption plus the model's relevance estimate for the conditioning query.
#[derive(Debug, Clone)]
pub struct ScoredCaption {
    pub caption: String,
    /// Relevance of the clip to the query, in [0, 1]
    pub score: f32,
}

/// Speech-to-text over a clip's audio track.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio of a media file. An empty string is a valid
    /// result (silent clip).
    async fn transcribe(&self, media_path: &Path) -> Result<String>;
}

/// Vision-language captioning in two modes: cheap unconditioned description at
/// index time and query-aware re-captioning at query time.
#[async_trait]
pub trait Captioner: Send + Sync {
    /// Describe sampled frames, using the clip transcript as context.
    async fn caption_initial(&self, frames: &[std::path::PathBuf], transcript: &str)
        -> Result<String>;

    /// Describe sampled frames conditioned on a query, returning the refined
    /// caption and a relevance score.
    async fn caption_query_aware(
        &self,
        frames: &[std::path::PathBuf],
        transcript: &str,
        query: &str,
        keywords: &[String],
    ) -> Result<ScoredCaption>;
}

/// Text embedding into the chunk/entity vector space.
#[async_trait]
pub trait TextEncoder: Send + Sync {
    /// Embed a batch of texts
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Multi-modal embedding into the shared text/vision space used by the clip
/// index. Text and clips land in the same space, which is what lets a textual
/// query search the visual index.
#[async_trait]
pub trait MultimodalEncoder: Send + Sync {
    /// Embed a clip's audio/visual content, with its initial caption as
    /// auxiliary text.
    async fn encode_clip(&self, clip_path: &Path, caption: &str) -> Result<Vec<f32>>;

    /// Embed text into the same space as clip vectors.
    async fn encode_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// LLM generation, split between the cheaper indexing model (extraction,
/// reformulation, keywords) and the generator model (final answers).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate with the indexing model.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate a JSON object with the indexing model.
    async fn generate_json(&self, prompt: &str) -> Result<serde_json::Value>;

    /// Generate with the answer-synthesis model.
    async fn generate_answer(&self, prompt: &str) -> Result<String>;
}

/// The full set of models shared by the indexing and retrieval pipelines.
#[derive(Clone)]
pub struct ModelSet {
    pub transcriber: Arc<dyn Transcriber>,
    pub captioner: Arc<dyn Captioner>,
    pub text_encoder: Arc<dyn TextEncoder>,
    pub multimodal_encoder: Arc<dyn MultimodalEncoder>,
    pub llm: Arc<dyn LlmClient>,
}

impl ModelSet {
    /// Build HTTP-backed models from configuration.
    pub fn connect(config: &ModelsConfig, clip_dim: usize, text_dim: usize) -> Result<Self> {
        let client = InferenceClient::new(&config.backend_url)?;
        Ok(Self {
            transcriber: Arc::new(HttpTranscriber::new(client.clone(), &config.asr_model)),
            captioner: Arc::new(HttpCaptioner::new(client.clone(), &config.vlm_model)),
            text_encoder: Arc::new(HttpTextEncoder::new(
                client.clone(),
                &config.text_encoder_model,
                text_dim,
            )),
            multimodal_encoder: Arc::new(HttpMultimodalEncoder::new(
                client.clone(),
                &config.multimodal_model,
                clip_dim,
            )),
            llm: Arc::new(HttpLlmClient::new(
                client,
                &config.llm_indexer_model,
                &config.llm_generator_model,
            )),
        })
    }
}
