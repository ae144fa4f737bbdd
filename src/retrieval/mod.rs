//! Retrieval pipeline
//!
//! Answers a natural-language question over the indexed library: reformulate
//! and embed the query, seed and expand the knowledge graph, gather visual
//! clip candidates, re-caption them with query-aware prompts at the higher
//! frame rate, then synthesize the final answer from the ranked evidence.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::{GraphContext, GraphStore};
use crate::media::MediaProcessor;
use crate::meta::{ClipRecord, MetaDb};
use crate::models::retry::with_backoff;
use crate::models::{ModelSet, ScoredCaption};
use crate::store::{ChunkPayload, SearchHit, VectorStores};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Answer returned when nothing relevant is indexed or retrieved
pub const NO_EVIDENCE_ANSWER: &str =
    "I could not find any relevant video content to answer this question.";

/// One piece of evidence backing an answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedSource {
    pub clip_id: String,
    pub video_id: String,
    /// Clip span as `MM:SS - MM:SS`
    pub timestamp: String,
    pub caption: String,
    pub score: f32,
}

/// The full response to one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    pub answer: String,
    pub retrieved_sources: Vec<RetrievedSource>,
}

/// Format a clip span as `MM:SS - MM:SS`.
pub fn format_timestamp(start_secs: f64, end_secs: f64) -> String {
    fn mmss(secs: f64) -> String {
        let total = secs.max(0.0).round() as u64;
        format!("{:02}:{:02}", total / 60, total % 60)
    }
    format!("{} - {}", mmss(start_secs), mmss(end_secs))
}

/// Merge visual search hits with graph-provenance clip ids, deduplicating by
/// clip id while preserving the visual ranking. Graph-only clips join at the
/// tail in their given order.
pub fn merge_candidates(visual_hits: &[SearchHit], graph_clip_ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for hit in visual_hits {
        if seen.insert(hit.record_id.clone()) {
            merged.push(hit.record_id.clone());
        }
    }
    for clip_id in graph_clip_ids {
        if seen.insert(clip_id.clone()) {
            merged.push(clip_id.clone());
        }
    }
    merged
}

/// A candidate that survived query-aware re-captioning
struct RankedClip {
    clip: ClipRecord,
    refined: ScoredCaption,
}

/// The retrieval pipeline with all its collaborators
#[derive(Clone)]
pub struct RetrievalPipeline {
    config: Config,
    meta: MetaDb,
    stores: VectorStores,
    graph: GraphStore,
    models: ModelSet,
    media: Arc<dyn MediaProcessor>,
}

impl RetrievalPipeline {
    pub fn new(
        config: Config,
        meta: MetaDb,
        stores: VectorStores,
        graph: GraphStore,
        models: ModelSet,
        media: Arc<dyn MediaProcessor>,
    ) -> Self {
        Self {
            config,
            meta,
            stores,
            graph,
            models,
            media,
        }
    }

    /// Answer a question over the indexed library.
    pub async fn answer(&self, query: &str) -> Result<QueryResponse> {
        let stats = self.meta.get_global_stats().await?;
        if stats.clip_count == 0 {
            debug!("Query against empty library");
            return Ok(QueryResponse {
                query: query.to_string(),
                answer: NO_EVIDENCE_ANSWER.to_string(),
                retrieved_sources: Vec::new(),
            });
        }

        // Stage 1: reformulate and embed
        let reformulated = self.reformulate(query).await;
        let query_vec = with_backoff("query embedding", &self.config.retry, || {
            self.models.text_encoder.embed(vec![reformulated.clone()])
        })
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Embedding("empty embedding batch".to_string()))?;

        // Stages 2-3: graph seeds and one-hop expansion
        let seeds = self
            .graph
            .seed_entities(&query_vec, self.config.retrieval.graph_top_k_entities)
            .await?;
        let seed_entities: Vec<_> = seeds.into_iter().map(|s| s.entity).collect();
        let context = self
            .graph
            .expand_one_hop(&seed_entities, self.config.retrieval.graph_expansion_cap)
            .await?;

        // Stage 4: visual candidates unioned with text-chunk hits and graph
        // provenance
        let visual_hits = self.visual_candidates(query).await?;
        let mut text_clip_ids = self.chunk_candidates(query_vec.clone()).await?;
        text_clip_ids.extend(context.provenance_clip_ids());
        let candidate_ids = merge_candidates(&visual_hits, &text_clip_ids);
        debug!(
            "Retrieval candidates: {} visual, {} after text and graph union",
            visual_hits.len(),
            candidate_ids.len()
        );

        // Stage 5: query-aware re-captioning
        let keywords = self.keywords(query).await;
        let mut ranked = self
            .recaption_candidates(query, &keywords, &candidate_ids)
            .await;

        if ranked.is_empty() {
            info!("No candidates survived re-captioning for query");
            return Ok(QueryResponse {
                query: query.to_string(),
                answer: NO_EVIDENCE_ANSWER.to_string(),
                retrieved_sources: Vec::new(),
            });
        }

        ranked.sort_by(|a, b| {
            b.refined
                .score
                .partial_cmp(&a.refined.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.clip.id.cmp(&b.clip.id))
        });

        // Stage 6: synthesize the answer from the evidence bundle
        let answer = self.synthesize(query, &ranked, &context).await?;
        let retrieved_sources = ranked
            .iter()
            .map(|r| RetrievedSource {
                clip_id: r.clip.id.clone(),
                video_id: r.clip.video_id.clone(),
                timestamp: format_timestamp(r.clip.start_secs, r.clip.end_secs),
                caption: r.refined.caption.clone(),
                score: r.refined.score,
            })
            .collect();

        Ok(QueryResponse {
            query: query.to_string(),
            answer,
            retrieved_sources,
        })
    }

    /// Rewrite the question as a declarative sentence for embedding; falls
    /// back to the raw query.
    async fn reformulate(&self, query: &str) -> String {
        let prompt = format!(
            "Rewrite the following question as a single declarative sentence describing \
             the content that would answer it. Respond with the sentence only.\n\nQuestion: {query}"
        );
        match self.models.llm.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!("Query reformulation failed: {e}; using the raw query");
                query.to_string()
            }
        }
    }

    /// Extract comma-separated keywords for the VLM prompt; failure yields an
    /// empty list.
    async fn keywords(&self, query: &str) -> Vec<String> {
        let prompt = format!(
            "List the most important visual keywords for answering this question, \
             comma-separated, no other text.\n\nQuestion: {query}"
        );
        match self.models.llm.generate(&prompt).await {
            Ok(text) => text
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            Err(e) => {
                warn!("Keyword extraction failed: {e}");
                Vec::new()
            }
        }
    }

    /// Search the clip collection with a scene description embedded into the
    /// shared text/vision space.
    async fn visual_candidates(&self, query: &str) -> Result<Vec<SearchHit>> {
        let prompt = format!(
            "Describe, in one sentence, the visual scene that would answer this \
             question.\n\nQuestion: {query}"
        );
        let scene = match self.models.llm.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => query.to_string(),
        };

        let scene_vec = with_backoff("scene embedding", &self.config.retry, || {
            self.models.multimodal_encoder.encode_text(&scene)
        })
        .await?;

        self.stores
            .clips
            .search(scene_vec, self.config.retrieval.visual_top_k, None)
            .await
    }

    /// Search the chunk collection with the query embedding and expand hits to
    /// the clips they aggregate, best chunk first.
    async fn chunk_candidates(&self, query_vec: Vec<f32>) -> Result<Vec<String>> {
        let hits = self
            .stores
            .chunks
            .search(query_vec, self.config.retrieval.visual_top_k, None)
            .await?;

        let mut clip_ids = Vec::new();
        for hit in hits {
            if let Some(payload) = ChunkPayload::from_map(&hit.payload) {
                clip_ids.extend(payload.clip_ids);
            }
        }
        Ok(clip_ids)
    }

    /// Re-caption each candidate at k' frames, conditioned on the query.
    /// Any failure drops that candidate; candidates below the relevance floor
    /// are filtered out.
    async fn recaption_candidates(
        &self,
        query: &str,
        keywords: &[String],
        candidate_ids: &[String],
    ) -> Vec<RankedClip> {
        let results: Vec<Option<RankedClip>> = stream::iter(candidate_ids)
            .map(|clip_id| async move {
                match self.recaption_one(query, keywords, clip_id).await {
                    Ok(ranked) => ranked,
                    Err(e) => {
                        warn!("Re-captioning failed for clip {clip_id}: {e}; dropping candidate");
                        None
                    }
                }
            })
            .buffer_unordered(self.config.indexing.worker_pool)
            .collect()
            .await;

        results
            .into_iter()
            .flatten()
            .filter(|r| r.refined.score >= self.config.retrieval.min_relevance)
            .collect()
    }

    async fn recaption_one(
        &self,
        query: &str,
        keywords: &[String],
        clip_id: &str,
    ) -> Result<Option<RankedClip>> {
        let clip = match self.meta.get_clip(clip_id).await? {
            Some(clip) => clip,
            None => {
                warn!("Candidate clip {clip_id} has no metadata row; skipping");
                return Ok(None);
            }
        };

        let clip_path = self
            .config
            .paths
            .clips_dir(&clip.video_id)
            .join(format!("clip_{:04}.mp4", clip.ordinal));

        let scratch = tempfile::TempDir::new()?;
        let frames = self
            .media
            .extract_frames(
                &clip_path,
                scratch.path(),
                self.config.indexing.query_frames_k_prime,
            )
            .await?;

        let refined = with_backoff("query-aware caption", &self.config.retry, || {
            self.models
                .captioner
                .caption_query_aware(&frames, &clip.transcript, query, keywords)
        })
        .await?;

        Ok(Some(RankedClip { clip, refined }))
    }

    async fn synthesize(
        &self,
        query: &str,
        ranked: &[RankedClip],
        context: &GraphContext,
    ) -> Result<String> {
        let evidence: Vec<String> = ranked
            .iter()
            .map(|r| {
                format!(
                    "Clip {} ({}):\nVISUALS: {}\nAUDIO: {}",
                    r.clip.id,
                    format_timestamp(r.clip.start_secs, r.clip.end_secs),
                    r.refined.caption,
                    r.clip.transcript
                )
            })
            .collect();

        let graph_section = if context.is_empty() {
            String::new()
        } else {
            format!("\n\nKnowledge graph context:\n{}", context.textualize())
        };

        let prompt = format!(
            "Answer the question using only the video evidence below. Cite clips by \
             their timestamp when relevant. If the evidence is insufficient, say \
             so.\n\nQuestion: {query}\n\nEvidence:\n{}{graph_section}",
            evidence.join("\n\n")
        );

        self.models.llm.generate_answer(&prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::testing::{stub_models, FlakyFrameMedia, StubMedia};
    use crate::index::IndexingPipeline;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0, 30.0), "00:00 - 00:30");
        assert_eq!(format_timestamp(90.0, 95.0), "01:30 - 01:35");
        assert_eq!(format_timestamp(3599.6, 3605.0), "60:00 - 60:05");
    }

    #[test]
    fn test_merge_candidates_dedupes_preserving_rank() {
        let hits = vec![
            SearchHit {
                record_id: "a".to_string(),
                score: 0.9,
                payload: Default::default(),
            },
            SearchHit {
                record_id: "b".to_string(),
                score: 0.8,
                payload: Default::default(),
            },
        ];
        let graph = vec!["b".to_string(), "c".to_string()];

        let merged = merge_candidates(&hits, &graph);
        assert_eq!(merged, vec!["a", "b", "c"]);
    }

    async fn indexed_fixture() -> (RetrievalPipeline, TempDir) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.base_dir = tmp.path().to_path_buf();
        config.paths.db_file = tmp.path().join("meta.db");

        let meta = MetaDb::new(&config.paths.db_file).await.unwrap();
        let graph = GraphStore::new(meta.pool().clone());
        let stores = VectorStores::in_memory();
        let models = stub_models();
        let media = Arc::new(StubMedia { duration: 95.0 });

        let indexer = IndexingPipeline::new(
            config.clone(),
            meta.clone(),
            stores.clone(),
            graph.clone(),
            models.clone(),
            media.clone(),
        );
        let job = indexer.submit(Path::new("/videos/factory_tour.mp4")).await.unwrap();
        indexer.run(&job.id).await.unwrap();

        let retrieval = RetrievalPipeline::new(config, meta, stores, graph, models, media);
        (retrieval, tmp)
    }

    #[tokio::test]
    async fn test_answer_over_indexed_library() {
        let (pipeline, _tmp) = indexed_fixture().await;

        let response = pipeline.answer("What is being assembled?").await.unwrap();
        assert_eq!(response.answer, "The video shows widgets being assembled.");
        assert!(!response.retrieved_sources.is_empty());

        let top = &response.retrieved_sources[0];
        assert_eq!(top.video_id, "factory_tour");
        assert_eq!(top.timestamp, "00:00 - 00:30");
        assert_eq!(top.caption, "a detailed view of the widget press");
        assert!((top.score - 0.9).abs() < 1e-6);

        // Ranked output is sorted best-first with deterministic ties
        let ids: Vec<&str> = response
            .retrieved_sources
            .iter()
            .map(|s| s.clip_id.as_str())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn test_empty_library_returns_canned_answer() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.base_dir = tmp.path().to_path_buf();
        config.paths.db_file = tmp.path().join("meta.db");

        let meta = MetaDb::new(&config.paths.db_file).await.unwrap();
        let graph = GraphStore::new(meta.pool().clone());
        let pipeline = RetrievalPipeline::new(
            config,
            meta,
            VectorStores::in_memory(),
            graph,
            stub_models(),
            Arc::new(StubMedia { duration: 95.0 }),
        );

        let response = pipeline.answer("Anything?").await.unwrap();
        assert_eq!(response.answer, NO_EVIDENCE_ANSWER);
        assert!(response.retrieved_sources.is_empty());
    }

    #[tokio::test]
    async fn test_recaption_failure_drops_only_that_candidate() {
        let (mut pipeline, _tmp) = indexed_fixture().await;
        // One clip's frames refuse to extract at query time; the rest of the
        // candidates must still make it into the answer
        pipeline.config.retry.max_attempts = 1;
        pipeline.media = Arc::new(FlakyFrameMedia {
            duration: 95.0,
            fail_marker: "clip_0001",
        });

        let response = pipeline.answer("What is being assembled?").await.unwrap();
        assert_eq!(response.answer, "The video shows widgets being assembled.");
        assert_eq!(response.retrieved_sources.len(), 3);
        assert!(response
            .retrieved_sources
            .iter()
            .all(|s| !s.clip_id.ends_with("_clip_0001")));
    }

    #[tokio::test]
    async fn test_relevance_floor_filters_candidates() {
        let (mut pipeline, _tmp) = indexed_fixture().await;
        // Stub captioner scores everything 0.9; a floor above that drops all
        pipeline.config.retrieval.min_relevance = 0.95;

        let response = pipeline.answer("What is being assembled?").await.unwrap();
        assert_eq!(response.answer, NO_EVIDENCE_ANSWER);
        assert!(response.retrieved_sources.is_empty());
    }
}
