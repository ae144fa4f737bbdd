//! Indexing pipeline
//!
//! Drives one video through the full indexing flow: segment into clips,
//! transcribe and caption each clip under bounded concurrency, aggregate
//! clips into text chunks, embed clips and chunks into their collections,
//! extract the knowledge graph per chunk, and write the library summary.
//! Job state and progress are tracked in the metadata store; model failures
//! degrade the affected unit while storage failures fail the job.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::extract::build_chunk_graph;
use crate::graph::GraphStore;
use crate::media::{MediaProcessor, SegmentedClip};
use crate::meta::{
    ChunkRecord, ClipRecord, JobRecord, MetaDb, VideoRecord, VideoStatus,
};
use crate::models::retry::with_backoff;
use crate::models::ModelSet;
use crate::store::{ChunkPayload, ClipPayload, VectorStores};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

// Progress milestones; the per-clip stage fills 15..=75
const PROGRESS_PROBED: u8 = 5;
const PROGRESS_SEGMENTED: u8 = 15;
const PROGRESS_CLIPS_DONE: u8 = 75;
const PROGRESS_CHUNKS_EMBEDDED: u8 = 85;
const PROGRESS_GRAPH_BUILT: u8 = 95;

/// Render the text block a chunk contributes to retrieval and extraction.
pub fn chunk_text(clips: &[ClipRecord]) -> String {
    clips
        .iter()
        .map(|clip| {
            format!(
                "CLIP_ID: {}\nVISUALS: {}\nAUDIO: {}",
                clip.id, clip.caption, clip.transcript
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// Group consecutive clips into chunks of `chunk_size` clips; the final chunk
/// holds the remainder.
pub fn build_chunks(
    video_id: &str,
    clips: &[ClipRecord],
    chunk_size: usize,
) -> Vec<ChunkRecord> {
    clips
        .chunks(chunk_size.max(1))
        .enumerate()
        .map(|(index, group)| {
            let clip_ids: Vec<String> = group.iter().map(|c| c.id.clone()).collect();
            ChunkRecord::new(video_id, index, &clip_ids, chunk_text(group))
        })
        .collect()
}

/// The indexing pipeline with all its collaborators
#[derive(Clone)]
pub struct IndexingPipeline {
    config: Config,
    meta: MetaDb,
    stores: VectorStores,
    graph: GraphStore,
    models: ModelSet,
    media: Arc<dyn MediaProcessor>,
}

impl IndexingPipeline {
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

    /// Register a video and create its pending job. No media work happens
    /// here; `run` performs the pipeline.
    pub async fn submit(&self, source: &Path) -> Result<JobRecord> {
        let video_id = crate::media::video_id_from_path(source)?;
        let size_bytes = std::fs::metadata(source).map(|m| m.len() as i64).unwrap_or(0);

        let mut video = VideoRecord::new(
            video_id.clone(),
            prettify_title(&video_id),
            source.display().to_string(),
            size_bytes,
        );
        video.status = VideoStatus::Indexing.to_string();
        self.meta.upsert_video(&video).await?;

        let job = self.meta.create_job(&video_id).await?;
        info!("Submitted indexing job {} for video {}", job.id, video_id);
        Ok(job)
    }

    /// Run a pending job to a terminal state. Fatal errors move the job to
    /// `error` and are returned to the caller.
    pub async fn run(&self, job_id: &str) -> Result<()> {
        let job = self.meta.get_job(job_id).await?;
        if !self.meta.start_job(job_id).await? {
            return Err(Error::Other(format!(
                "job {job_id} is not pending (status: {})",
                job.status
            )));
        }

        match self.run_inner(&job).await {
            Ok(()) => {
                self.meta.complete_job(job_id).await?;
                self.meta
                    .set_video_status(&job.video_id, VideoStatus::Indexed)
                    .await?;
                info!("Indexing job {job_id} completed");
                Ok(())
            }
            Err(e) => {
                warn!("Indexing job {job_id} failed: {e}");
                self.meta.fail_job(job_id, &e.to_string()).await?;
                self.meta
                    .set_video_status(&job.video_id, VideoStatus::Error)
                    .await?;
                Err(e)
            }
        }
    }

    async fn run_inner(&self, job: &JobRecord) -> Result<()> {
        let video_id = &job.video_id;
        let video = self
            .meta
            .get_video(video_id)
            .await?
            .ok_or_else(|| Error::VideoNotFound(video_id.clone()))?;
        let source = Path::new(&video.source_path);

        self.stores.ensure_ready().await?;

        self.progress(&job.id, PROGRESS_PROBED, "probing source").await;
        let duration = self.media.probe_duration(source).await?;
        self.meta.set_video_duration(video_id, duration).await?;

        let clips_dir = self.config.paths.clips_dir(video_id);
        let segments = self
            .media
            .segment(source, self.config.indexing.clip_duration_secs, &clips_dir)
            .await?;
        self.progress(
            &job.id,
            PROGRESS_SEGMENTED,
            &format!("segmented into {} clips", segments.len()),
        )
        .await;

        // Re-index replace: drop anything a shorter cut would orphan
        self.stores.clips.delete_by_video(video_id).await?;
        self.stores.chunks.delete_by_video(video_id).await?;
        self.graph.delete_video_provenance(video_id).await?;
        self.meta.clear_video_content(video_id).await?;

        let clips = self.process_clips(&job.id, video_id, segments).await?;

        let chunks = build_chunks(video_id, &clips, self.config.indexing.chunk_size_clips);
        self.embed_and_persist_chunks(video_id, &chunks).await?;
        self.progress(
            &job.id,
            PROGRESS_CHUNKS_EMBEDDED,
            &format!("embedded {} chunks", chunks.len()),
        )
        .await;

        self.extract_graph(&chunks).await;
        self.progress(&job.id, PROGRESS_GRAPH_BUILT, "knowledge graph built")
            .await;

        self.write_summary(video_id, &clips, duration).await?;
        Ok(())
    }

    /// Transcribe, caption, embed, and persist every clip, bounded by the
    /// configured worker pool. Model failures degrade the clip; storage and
    /// embedding failures are fatal.
    async fn process_clips(
        &self,
        job_id: &str,
        video_id: &str,
        segments: Vec<SegmentedClip>,
    ) -> Result<Vec<ClipRecord>> {
        let total = segments.len();
        let done = AtomicUsize::new(0);

        let results: Vec<Result<ClipRecord>> = stream::iter(segments)
            .map(|segment| {
                let done = &done;
                async move {
                    let record = self.process_clip(video_id, &segment).await?;
                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    let span = PROGRESS_CLIPS_DONE - PROGRESS_SEGMENTED;
                    let progress = PROGRESS_SEGMENTED
                        + (usize::from(span) * finished / total.max(1)) as u8;
                    self.progress(
                        job_id,
                        progress,
                        &format!("processed clip {finished}/{total}"),
                    )
                    .await;
                    Ok(record)
                }
            })
            .buffer_unordered(self.config.indexing.worker_pool)
            .collect()
            .await;

        let mut clips = results.into_iter().collect::<Result<Vec<_>>>()?;
        clips.sort_by_key(|c| c.ordinal);
        Ok(clips)
    }

    async fn process_clip(&self, video_id: &str, segment: &SegmentedClip) -> Result<ClipRecord> {
        let retry = &self.config.retry;

        let transcript = match with_backoff("transcription", retry, || {
            self.models.transcriber.transcribe(&segment.path)
        })
        .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    "Transcription failed for clip {} of {video_id}: {e}; continuing without audio",
                    segment.ordinal
                );
                String::new()
            }
        };

        let caption = self.caption_clip(video_id, segment, &transcript).await;

        let embedding = with_backoff("clip embedding", retry, || {
            self.models
                .multimodal_encoder
                .encode_clip(&segment.path, &caption)
        })
        .await?;

        let record = ClipRecord::new(
            video_id,
            segment.ordinal,
            segment.span.start_secs,
            segment.span.end_secs,
            transcript,
            caption,
        );
        self.meta.upsert_clip(&record).await?;

        let payload = ClipPayload {
            record_id: record.id.clone(),
            video_id: video_id.to_string(),
            clip_ordinal: segment.ordinal,
            start_secs: record.start_secs,
            end_secs: record.end_secs,
            caption: record.caption.clone(),
            transcript: record.transcript.clone(),
            indexed_at: Utc::now().to_rfc3339(),
        };
        self.stores.clips.upsert(vec![payload.into_point(embedding)]).await?;

        debug!("Indexed clip {} of {video_id}", segment.ordinal);
        Ok(record)
    }

    /// Initial captioning at k frames; any failure degrades to an empty
    /// caption so indexing continues.
    async fn caption_clip(
        &self,
        video_id: &str,
        segment: &SegmentedClip,
        transcript: &str,
    ) -> String {
        let frames = async {
            let scratch = tempfile::TempDir::new()?;
            let frames = self
                .media
                .extract_frames(
                    &segment.path,
                    scratch.path(),
                    self.config.indexing.initial_frames_k,
                )
                .await?;
            let caption = with_backoff("initial caption", &self.config.retry, || {
                self.models.captioner.caption_initial(&frames, transcript)
            })
            .await?;
            Ok::<_, Error>(caption)
        };

        match frames.await {
            Ok(caption) => caption,
            Err(e) => {
                warn!(
                    "Captioning failed for clip {} of {video_id}: {e}; continuing without visuals",
                    segment.ordinal
                );
                String::new()
            }
        }
    }

    async fn embed_and_persist_chunks(
        &self,
        video_id: &str,
        chunks: &[ChunkRecord],
    ) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        for chunk in chunks {
            self.meta.upsert_chunk(chunk).await?;
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.chunk_text.clone()).collect();
        let vectors = with_backoff("chunk embedding", &self.config.retry, || {
            self.models.text_encoder.embed(texts.clone())
        })
        .await?;

        let now = Utc::now().to_rfc3339();
        let points = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                ChunkPayload {
                    record_id: chunk.id.clone(),
                    video_id: video_id.to_string(),
                    chunk_index: chunk.chunk_index as usize,
                    clip_ids: chunk.clip_ids(),
                    text: chunk.chunk_text.clone(),
                    indexed_at: now.clone(),
                }
                .into_point(vector)
            })
            .collect();
        self.stores.chunks.upsert(points).await?;
        Ok(())
    }

    /// Per-chunk graph extraction, concurrent. Failures are logged and the
    /// chunk contributes nothing.
    async fn extract_graph(&self, chunks: &[ChunkRecord]) {
        stream::iter(chunks)
            .map(|chunk| async move {
                let result = build_chunk_graph(
                    &self.graph,
                    self.models.llm.as_ref(),
                    self.models.text_encoder.as_ref(),
                    chunk,
                )
                .await;
                if let Err(e) = result {
                    warn!("Graph extraction failed for chunk {}: {e}", chunk.id);
                }
            })
            .buffer_unordered(self.config.indexing.worker_pool)
            .collect::<Vec<_>>()
            .await;
    }

    /// Generate the library description and tags; degrades to a mechanical
    /// summary when the LLM is unavailable.
    async fn write_summary(
        &self,
        video_id: &str,
        clips: &[ClipRecord],
        duration: f64,
    ) -> Result<()> {
        let captions: Vec<&str> = clips
            .iter()
            .map(|c| c.caption.as_str())
            .filter(|c| !c.is_empty())
            .take(12)
            .collect();

        let prompt = format!(
            r#"Summarize this video for a library listing based on its clip descriptions. Respond with a single JSON object: {{"description": "<one or two sentences>", "tags": ["..."]}}.

Clip descriptions:
{}"#,
            captions.join("\n")
        );

        let (description, tags) = match self.models.llm.generate_json(&prompt).await {
            Ok(value) => {
                let description = value
                    .get("description")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let tags: Vec<String> = value
                    .get("tags")
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|t| t.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                (description, tags)
            }
            Err(e) => {
                warn!("Summary generation failed for {video_id}: {e}");
                (None, Vec::new())
            }
        };

        let description = description.unwrap_or_else(|| {
            format!("{} clips, {:.0} minutes", clips.len(), duration / 60.0)
        });
        self.meta
            .set_video_summary(video_id, &description, &tags)
            .await
    }

    async fn progress(&self, job_id: &str, progress: u8, message: &str) {
        if let Err(e) = self.meta.update_job_progress(job_id, progress, message).await {
            warn!("Failed to record progress for job {job_id}: {e}");
        }
    }
}

fn prettify_title(video_id: &str) -> String {
    video_id
        .split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}


#[cfg(test)]
mod tests {
    use super::testing::{stub_models, FailingCaptioner, FailingTranscriber, StubMedia};
    use super::*;
    use crate::meta::{clip_id, JobStatus};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn make_clips(video_id: &str, count: usize) -> Vec<ClipRecord> {
        (0..count)
            .map(|i| {
                ClipRecord::new(
                    video_id,
                    i,
                    i as f64 * 30.0,
                    (i + 1) as f64 * 30.0,
                    format!("audio {i}"),
                    format!("visuals {i}"),
                )
            })
            .collect()
    }

    #[test]
    fn test_build_chunks_with_remainder() {
        let clips = make_clips("v1", 10);
        let chunks = build_chunks("v1", &clips, 3);

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].clip_ids().len(), 3);
        assert_eq!(chunks[3].clip_ids().len(), 1);
        assert_eq!(chunks[3].clip_ids()[0], clip_id("v1", 9));

        // Runs are contiguous and non-overlapping
        let all: Vec<String> = chunks.iter().flat_map(|c| c.clip_ids()).collect();
        let expected: Vec<String> = (0..10).map(|i| clip_id("v1", i)).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_chunk_text_format() {
        let clips = make_clips("v1", 2);
        let text = chunk_text(&clips);
        assert!(text.contains("CLIP_ID: v1_clip_0000"));
        assert!(text.contains("VISUALS: visuals 1"));
        assert!(text.contains("AUDIO: audio 0"));
        assert!(text.contains("\n---\n"));
    }

    #[test]
    fn test_prettify_title() {
        assert_eq!(prettify_title("lecture_01"), "Lecture 01");
        assert_eq!(prettify_title("my-video-tour"), "My Video Tour");
    }

    async fn make_pipeline(tmp: &TempDir, duration: f64) -> IndexingPipeline {
        let mut config = Config::default();
        config.paths.base_dir = tmp.path().to_path_buf();
        config.paths.db_file = tmp.path().join("meta.db");
        config.indexing.worker_pool = 2;

        let meta = MetaDb::new(&config.paths.db_file).await.unwrap();
        let graph = GraphStore::new(meta.pool().clone());
        IndexingPipeline::new(
            config,
            meta,
            VectorStores::in_memory(),
            graph,
            stub_models(),
            Arc::new(StubMedia { duration }),
        )
    }

    #[tokio::test]
    async fn test_full_indexing_run() {
        let tmp = TempDir::new().unwrap();
        let pipeline = make_pipeline(&tmp, 95.0).await;

        let job = pipeline
            .submit(Path::new("/videos/factory_tour.mp4"))
            .await
            .unwrap();
        assert_eq!(job.get_status().unwrap(), JobStatus::Pending);

        pipeline.run(&job.id).await.unwrap();

        let finished = pipeline.meta.get_job(&job.id).await.unwrap();
        assert_eq!(finished.get_status().unwrap(), JobStatus::Completed);
        assert_eq!(finished.progress, 100);

        // 95s at 30s clips -> 4 clips -> 2 chunks of (3, 1)
        let clips = pipeline.meta.list_clips("factory_tour").await.unwrap();
        assert_eq!(clips.len(), 4);
        assert_eq!(clips[0].caption, "a machine assembling widgets");
        assert_eq!(clips[0].transcript, "spoken words");

        let chunks = pipeline.meta.list_chunks("factory_tour").await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].clip_ids().len(), 1);

        assert_eq!(pipeline.stores.clips.count().await.unwrap(), 4);
        assert_eq!(pipeline.stores.chunks.count().await.unwrap(), 2);

        // Graph extraction merged the stub entity across both chunks
        let entity = pipeline
            .graph
            .find_by_name("widget press")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.chunk_ids().len(), 2);

        // Library row carries the generated summary
        let items = pipeline.meta.list_library(None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, "indexed");
        assert_eq!(items[0].tags(), vec!["factory", "widgets"]);
        assert!((items[0].duration_secs - 95.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_model_failures_degrade_to_empty_fields() {
        let tmp = TempDir::new().unwrap();
        let mut pipeline = make_pipeline(&tmp, 95.0).await;
        // Retries exhaust immediately so the run stays fast
        pipeline.config.retry.max_attempts = 1;
        pipeline.models.transcriber = Arc::new(FailingTranscriber);
        pipeline.models.captioner = Arc::new(FailingCaptioner);

        let job = pipeline
            .submit(Path::new("/videos/silent_film.mp4"))
            .await
            .unwrap();
        pipeline.run(&job.id).await.unwrap();

        // Transcription and captioning exhaustion degrades, never aborts
        let finished = pipeline.meta.get_job(&job.id).await.unwrap();
        assert_eq!(finished.get_status().unwrap(), JobStatus::Completed);
        assert_eq!(finished.progress, 100);

        let clips = pipeline.meta.list_clips("silent_film").await.unwrap();
        assert_eq!(clips.len(), 4);
        for clip in &clips {
            assert_eq!(clip.transcript, "");
            assert_eq!(clip.caption, "");
        }

        // Clips were still encoded and indexed
        assert_eq!(pipeline.stores.clips.count().await.unwrap(), 4);
        assert_eq!(pipeline.stores.chunks.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_run_fails_on_unreadable_source() {
        let tmp = TempDir::new().unwrap();
        let pipeline = make_pipeline(&tmp, 0.0).await;

        let job = pipeline.submit(Path::new("/videos/broken.mp4")).await.unwrap();
        let result = pipeline.run(&job.id).await;
        assert!(result.is_err());

        let finished = pipeline.meta.get_job(&job.id).await.unwrap();
        assert_eq!(finished.get_status().unwrap(), JobStatus::Error);
        assert!(finished.error.is_some());

        let video = pipeline.meta.get_video("broken").await.unwrap().unwrap();
        assert_eq!(video.get_status().unwrap(), VideoStatus::Error);
    }

    #[tokio::test]
    async fn test_run_requires_pending_job() {
        let tmp = TempDir::new().unwrap();
        let pipeline = make_pipeline(&tmp, 95.0).await;

        let job = pipeline.submit(Path::new("/videos/v.mp4")).await.unwrap();
        pipeline.run(&job.id).await.unwrap();

        // Second run on the same job is rejected
        assert!(pipeline.run(&job.id).await.is_err());
    }
}
