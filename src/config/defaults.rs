//! Default values for configuration

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default inference backend URL (ASR/VLM/LLM/encoder sidecar)
pub fn default_backend_url() -> String {
    std::env::var("VIDEORAG_BACKEND_URL").unwrap_or_else(|_| "http://127.0.0.1:8192".to_string())
}

/// Default ASR model deployment
pub fn default_asr_model() -> String {
    "whisper-1".to_string()
}

/// Default vision-language model for captioning
pub fn default_vlm_model() -> String {
    "openbmb/MiniCPM-Llama3-V-2_5".to_string()
}

/// Default LLM used for extraction and filtering at index time
pub fn default_llm_indexer_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Default LLM used for final answer synthesis
pub fn default_llm_generator_model() -> String {
    "gpt-4o".to_string()
}

/// Default text embedding model
pub fn default_text_encoder_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Default multi-modal (shared text/vision space) embedding model
pub fn default_multimodal_model() -> String {
    "imagebind-huge".to_string()
}

/// Default clip length in seconds
pub fn default_clip_duration_secs() -> u32 {
    30
}

/// Default frame count for initial captioning (k)
pub fn default_initial_frames_k() -> usize {
    5
}

/// Default frame count for query-aware re-captioning (k')
pub fn default_query_frames_k_prime() -> usize {
    15
}

/// Default number of clips aggregated into one text chunk
pub fn default_chunk_size_clips() -> usize {
    3
}

/// Default worker pool size for per-clip stages
pub fn default_worker_pool() -> usize {
    4
}

/// Default number of nearest clips fetched from the visual index
pub fn default_visual_top_k() -> usize {
    5
}

/// Default number of seed entities for graph retrieval
pub fn default_graph_top_k_entities() -> usize {
    5
}

/// Default cap on entities gathered during one-hop graph expansion
pub fn default_graph_expansion_cap() -> usize {
    50
}

/// Default relevance floor for re-captioned candidates
pub fn default_min_relevance() -> f32 {
    0.2
}

/// Default clip vector collection name
pub fn default_clip_collection() -> String {
    "videorag_clips".to_string()
}

/// Default clip (multi-modal) embedding dimension
pub fn default_clip_dimension() -> usize {
    1024
}

/// Default chunk vector collection name
pub fn default_chunk_collection() -> String {
    "videorag_chunks".to_string()
}

/// Default chunk (text) embedding dimension
pub fn default_chunk_dimension() -> usize {
    1536
}

/// Default maximum attempts for transient backend calls
pub fn default_retry_max_attempts() -> u32 {
    3
}

/// Default initial retry delay in milliseconds
pub fn default_retry_initial_delay_ms() -> u64 {
    500
}
