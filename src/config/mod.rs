//! Configuration management for videorag
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Inference backend configuration
    #[serde(default)]
    pub models: ModelsConfig,

    /// Indexing pipeline configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Retrieval pipeline configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Vector collection configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Retry policy for transient backend failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Inference backend endpoints and model identifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Base URL of the inference sidecar serving ASR/VLM/LLM/encoders
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// ASR model for clip transcription
    #[serde(default = "default_asr_model")]
    pub asr_model: String,

    /// Vision-language model for captioning
    #[serde(default = "default_vlm_model")]
    pub vlm_model: String,

    /// LLM used for extraction, reformulation, and keyword prompts
    #[serde(default = "default_llm_indexer_model")]
    pub llm_indexer_model: String,

    /// LLM used for final answer synthesis
    #[serde(default = "default_llm_generator_model")]
    pub llm_generator_model: String,

    /// Text embedding model (chunk/entity vectors)
    #[serde(default = "default_text_encoder_model")]
    pub text_encoder_model: String,

    /// Multi-modal embedding model (clip vectors, shared text/vision space)
    #[serde(default = "default_multimodal_model")]
    pub multimodal_model: String,
}

/// Indexing pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Clip length in seconds (D)
    #[serde(default = "default_clip_duration_secs")]
    pub clip_duration_secs: u32,

    /// Frames sampled per clip for initial captioning (k)
    #[serde(default = "default_initial_frames_k")]
    pub initial_frames_k: usize,

    /// Frames sampled per clip for query-aware re-captioning (k', must exceed k)
    #[serde(default = "default_query_frames_k_prime")]
    pub query_frames_k_prime: usize,

    /// Number of consecutive clips aggregated into one text chunk
    #[serde(default = "default_chunk_size_clips")]
    pub chunk_size_clips: usize,

    /// Concurrent per-clip work units (bounds backend load)
    #[serde(default = "default_worker_pool")]
    pub worker_pool: usize,
}

/// Retrieval pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Nearest clips fetched from the visual index
    #[serde(default = "default_visual_top_k")]
    pub visual_top_k: usize,

    /// Seed entities fetched from the entity embedding space
    #[serde(default = "default_graph_top_k_entities")]
    pub graph_top_k_entities: usize,

    /// Cap on entities gathered during one-hop graph expansion
    #[serde(default = "default_graph_expansion_cap")]
    pub graph_expansion_cap: usize,

    /// Candidates scoring below this after re-captioning are dropped
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,
}

/// Vector collection names and dimensions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Clip (multi-modal) vector collection
    #[serde(default = "default_clip_collection")]
    pub clip_collection: String,

    /// Clip embedding dimension (must match the multi-modal encoder)
    #[serde(default = "default_clip_dimension")]
    pub clip_dimension: usize,

    /// Chunk (text) vector collection
    #[serde(default = "default_chunk_collection")]
    pub chunk_collection: String,

    /// Chunk embedding dimension (must match the text encoder)
    #[serde(default = "default_chunk_dimension")]
    pub chunk_dimension: usize,
}

/// Bounded exponential backoff for transient backend failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts before the unit of work is degraded
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between attempts in milliseconds (doubles each retry)
    #[serde(default = "default_retry_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for videorag data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

impl PathsConfig {
    /// Directory holding the persisted clip files for a video.
    pub fn clips_dir(&self, video_id: &str) -> PathBuf {
        self.base_dir.join("clips").join(video_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            models: ModelsConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            storage: StorageConfig::default(),
            retry: RetryConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            asr_model: default_asr_model(),
            vlm_model: default_vlm_model(),
            llm_indexer_model: default_llm_indexer_model(),
            llm_generator_model: default_llm_generator_model(),
            text_encoder_model: default_text_encoder_model(),
            multimodal_model: default_multimodal_model(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            clip_duration_secs: default_clip_duration_secs(),
            initial_frames_k: default_initial_frames_k(),
            query_frames_k_prime: default_query_frames_k_prime(),
            chunk_size_clips: default_chunk_size_clips(),
            worker_pool: default_worker_pool(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            visual_top_k: default_visual_top_k(),
            graph_top_k_entities: default_graph_top_k_entities(),
            graph_expansion_cap: default_graph_expansion_cap(),
            min_relevance: default_min_relevance(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            clip_collection: default_clip_collection(),
            clip_dimension: default_clip_dimension(),
            chunk_collection: default_chunk_collection(),
            chunk_dimension: default_chunk_dimension(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_delay_ms: default_retry_initial_delay_ms(),
        }
    }
}

impl Config {
    /// Get the default base directory for videorag (~/.videorag)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".videorag")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("metadata.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        // Set up paths based on config file location
        let base = config_path
            .parent()
            .unwrap_or(Path::new("."))
            .to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("metadata.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if videorag is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.indexing.clip_duration_secs == 0 {
            return Err(Error::Config(
                "indexing.clip_duration_secs must be positive".to_string(),
            ));
        }

        if self.indexing.initial_frames_k == 0 {
            return Err(Error::Config(
                "indexing.initial_frames_k must be at least 1".to_string(),
            ));
        }

        if self.indexing.query_frames_k_prime <= self.indexing.initial_frames_k {
            return Err(Error::Config(
                "indexing.query_frames_k_prime must exceed indexing.initial_frames_k".to_string(),
            ));
        }

        if self.indexing.chunk_size_clips == 0 {
            return Err(Error::Config(
                "indexing.chunk_size_clips must be at least 1".to_string(),
            ));
        }

        if self.indexing.worker_pool == 0 {
            return Err(Error::Config(
                "indexing.worker_pool must be at least 1".to_string(),
            ));
        }

        if self.retrieval.min_relevance < 0.0 || self.retrieval.min_relevance > 1.0 {
            return Err(Error::Config(
                "retrieval.min_relevance must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.storage.clip_dimension == 0 || self.storage.chunk_dimension == 0 {
            return Err(Error::Config(
                "storage dimensions must be positive".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
