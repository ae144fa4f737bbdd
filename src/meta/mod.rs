//! Metadata storage using SQLite
//!
//! This module handles all local metadata storage including:
//! - Videos (the indexed library)
//! - Clips (fixed-duration segments with transcripts and captions)
//! - Chunks (aggregated clip text used for retrieval)
//! - Jobs (async indexing job state machine)
//!
//! Knowledge graph tables live in the same database; see `crate::graph`.

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Derive the clip record id for a video and clip ordinal.
pub fn clip_id(video_id: &str, ordinal: usize) -> String {
    format!("{video_id}_clip_{ordinal:04}")
}

/// Derive the chunk record id for a video and chunk index.
pub fn chunk_id(video_id: &str, index: usize) -> String {
    format!("{video_id}_chunk_{index:04}")
}

/// Indexing job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            _ => Err(Error::Config(format!("Unknown job status: {}", s))),
        }
    }
}

/// Video library status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Indexing,
    Indexed,
    Error,
}

impl std::fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoStatus::Indexing => write!(f, "indexing"),
            VideoStatus::Indexed => write!(f, "indexed"),
            VideoStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for VideoStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "indexing" => Ok(VideoStatus::Indexing),
            "indexed" => Ok(VideoStatus::Indexed),
            "error" => Ok(VideoStatus::Error),
            _ => Err(Error::Config(format!("Unknown video status: {}", s))),
        }
    }
}

/// An indexed (or currently indexing) video
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub source_path: String,
    pub duration_secs: f64,
    pub size_bytes: i64,
    pub status: String,
    pub tags_json: Option<String>,
    pub description: Option<String>,
    pub indexed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl VideoRecord {
    pub fn new(id: String, title: String, source_path: String, size_bytes: i64) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id,
            title,
            source_path,
            duration_secs: 0.0,
            size_bytes,
            status: VideoStatus::Indexing.to_string(),
            tags_json: None,
            description: None,
            indexed_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }

    pub fn get_status(&self) -> Result<VideoStatus> {
        self.status.parse()
    }
}

/// A clip row: one fixed-duration segment of a video
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ClipRecord {
    pub id: String,
    pub video_id: String,
    pub ordinal: i64,
    pub start_secs: f64,
    pub end_secs: f64,
    pub transcript: String,
    pub caption: String,
    pub created_at: String,
}

impl ClipRecord {
    pub fn new(
        video_id: &str,
        ordinal: usize,
        start_secs: f64,
        end_secs: f64,
        transcript: String,
        caption: String,
    ) -> Self {
        Self {
            id: clip_id(video_id, ordinal),
            video_id: video_id.to_string(),
            ordinal: ordinal as i64,
            start_secs,
            end_secs,
            transcript,
            caption,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// A chunk row: consecutive clips aggregated into one retrieval unit
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub video_id: String,
    pub chunk_index: i64,
    pub clip_ids_json: String,
    pub chunk_text: String,
    pub created_at: String,
}

impl ChunkRecord {
    pub fn new(video_id: &str, chunk_index: usize, clip_ids: &[String], text: String) -> Self {
        Self {
            id: chunk_id(video_id, chunk_index),
            video_id: video_id.to_string(),
            chunk_index: chunk_index as i64,
            clip_ids_json: serde_json::to_string(clip_ids).unwrap_or_default(),
            chunk_text: text,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn clip_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.clip_ids_json).unwrap_or_default()
    }
}

/// An indexing job row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub video_id: String,
    pub status: String,
    pub progress: i64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRecord {
    pub fn new(video_id: String) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            video_id,
            status: JobStatus::Pending.to_string(),
            progress: 0,
            message: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn get_status(&self) -> Result<JobStatus> {
        self.status.parse()
    }
}

/// One row of the library listing
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: String,
    pub title: String,
    pub duration_secs: f64,
    pub size_bytes: i64,
    pub status: String,
    pub tags_json: Option<String>,
    pub description: Option<String>,
    pub indexed_at: Option<String>,
    pub clip_count: i64,
}

impl LibraryItem {
    pub fn tags(&self) -> Vec<String> {
        self.tags_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }
}

/// Global statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub video_count: usize,
    pub clip_count: usize,
    pub chunk_count: usize,
    pub entity_count: usize,
    pub relationship_count: usize,
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the metadata database
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(&config.paths.db_file).await
    }

    /// Create database with path directly (without full config)
    pub async fn new(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        if !db.is_initialized().await? {
            db.init_schema().await?;
        }
        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='videos'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    /// The underlying pool, shared with the graph store.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ===== Video Operations =====

    /// Insert or update a video (re-indexing replaces the old row)
    pub async fn upsert_video(&self, video: &VideoRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO videos (id, title, source_path, duration_secs, size_bytes, status, tags_json, description, indexed_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                source_path = excluded.source_path,
                duration_secs = excluded.duration_secs,
                size_bytes = excluded.size_bytes,
                status = excluded.status,
                tags_json = excluded.tags_json,
                description = excluded.description,
                indexed_at = excluded.indexed_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&video.id)
        .bind(&video.title)
        .bind(&video.source_path)
        .bind(video.duration_secs)
        .bind(video.size_bytes)
        .bind(&video.status)
        .bind(&video.tags_json)
        .bind(&video.description)
        .bind(&video.indexed_at)
        .bind(&video.created_at)
        .bind(&video.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get video by ID
    pub async fn get_video(&self, id: &str) -> Result<Option<VideoRecord>> {
        let video = sqlx::query_as::<_, VideoRecord>("SELECT * FROM videos WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(video)
    }

    /// Update a video's status; on `Indexed`, stamp `indexed_at`.
    pub async fn set_video_status(&self, id: &str, status: VideoStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let indexed_at = matches!(status, VideoStatus::Indexed).then(|| now.clone());
        sqlx::query(
            r#"
            UPDATE videos SET status = ?, indexed_at = COALESCE(?, indexed_at), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.to_string())
        .bind(indexed_at)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update the generated library summary fields for a video.
    pub async fn set_video_summary(
        &self,
        id: &str,
        description: &str,
        tags: &[String],
    ) -> Result<()> {
        sqlx::query("UPDATE videos SET description = ?, tags_json = ?, updated_at = ? WHERE id = ?")
            .bind(description)
            .bind(serde_json::to_string(tags)?)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Update a video's probed duration.
    pub async fn set_video_duration(&self, id: &str, duration_secs: f64) -> Result<()> {
        sqlx::query("UPDATE videos SET duration_secs = ?, updated_at = ? WHERE id = ?")
            .bind(duration_secs)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// List the library, optionally filtered by a case-insensitive search over
    /// title, description, and tags.
    pub async fn list_library(&self, search: Option<&str>) -> Result<Vec<LibraryItem>> {
        let base = r#"
            SELECT v.id, v.title, v.duration_secs, v.size_bytes, v.status,
                   v.tags_json, v.description, v.indexed_at,
                   (SELECT COUNT(*) FROM clips c WHERE c.video_id = v.id) AS clip_count
            FROM videos v
        "#;

        let items = match search {
            Some(term) if !term.trim().is_empty() => {
                let pattern = format!("%{}%", term.trim().to_lowercase());
                sqlx::query_as::<_, LibraryItem>(&format!(
                    r#"{base}
                    WHERE lower(v.title) LIKE ?
                       OR lower(COALESCE(v.description, '')) LIKE ?
                       OR lower(COALESCE(v.tags_json, '')) LIKE ?
                    ORDER BY v.created_at DESC
                    "#
                ))
                .bind(&pattern)
                .bind(&pattern)
                .bind(&pattern)
                .fetch_all(&self.pool)
                .await?
            }
            _ => {
                sqlx::query_as::<_, LibraryItem>(&format!(
                    "{base} ORDER BY v.created_at DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(items)
    }

    /// Delete a video's clips and chunks, keeping the video row and jobs.
    /// Used when re-indexing to drop rows a shorter cut would orphan.
    pub async fn clear_video_content(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE video_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM clips WHERE video_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a video and all its clips, chunks, and jobs.
    pub async fn delete_video(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE video_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM clips WHERE video_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM jobs WHERE video_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM videos WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===== Clip Operations =====

    /// Insert or update a clip
    pub async fn upsert_clip(&self, clip: &ClipRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO clips (id, video_id, ordinal, start_secs, end_secs, transcript, caption, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(video_id, ordinal) DO UPDATE SET
                transcript = excluded.transcript,
                caption = excluded.caption,
                start_secs = excluded.start_secs,
                end_secs = excluded.end_secs
            "#,
        )
        .bind(&clip.id)
        .bind(&clip.video_id)
        .bind(clip.ordinal)
        .bind(clip.start_secs)
        .bind(clip.end_secs)
        .bind(&clip.transcript)
        .bind(&clip.caption)
        .bind(&clip.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get clip by ID
    pub async fn get_clip(&self, id: &str) -> Result<Option<ClipRecord>> {
        let clip = sqlx::query_as::<_, ClipRecord>("SELECT * FROM clips WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(clip)
    }

    /// Get clips by ID, preserving the order of `ids`. Missing ids are skipped.
    pub async fn get_clips_by_ids(&self, ids: &[String]) -> Result<Vec<ClipRecord>> {
        let mut clips = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(clip) = self.get_clip(id).await? {
                clips.push(clip);
            }
        }
        Ok(clips)
    }

    /// List clips for a video in ordinal order
    pub async fn list_clips(&self, video_id: &str) -> Result<Vec<ClipRecord>> {
        let clips = sqlx::query_as::<_, ClipRecord>(
            "SELECT * FROM clips WHERE video_id = ? ORDER BY ordinal",
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(clips)
    }

    // ===== Chunk Operations =====

    /// Insert or update a chunk
    pub async fn upsert_chunk(&self, chunk: &ChunkRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, video_id, chunk_index, clip_ids_json, chunk_text, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(video_id, chunk_index) DO UPDATE SET
                clip_ids_json = excluded.clip_ids_json,
                chunk_text = excluded.chunk_text
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.video_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.clip_ids_json)
        .bind(&chunk.chunk_text)
        .bind(&chunk.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get chunk by ID
    pub async fn get_chunk(&self, id: &str) -> Result<Option<ChunkRecord>> {
        let chunk = sqlx::query_as::<_, ChunkRecord>("SELECT * FROM chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(chunk)
    }

    /// List chunks for a video in index order
    pub async fn list_chunks(&self, video_id: &str) -> Result<Vec<ChunkRecord>> {
        let chunks = sqlx::query_as::<_, ChunkRecord>(
            "SELECT * FROM chunks WHERE video_id = ? ORDER BY chunk_index",
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(chunks)
    }

    // ===== Job Operations =====

    /// Create a new pending job
    pub async fn create_job(&self, video_id: &str) -> Result<JobRecord> {
        let job = JobRecord::new(video_id.to_string());
        sqlx::query(
            r#"
            INSERT INTO jobs (id, video_id, status, progress, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.video_id)
        .bind(&job.status)
        .bind(job.progress)
        .bind(&job.created_at)
        .bind(&job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: &str) -> Result<JobRecord> {
        sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    /// List jobs, newest first
    pub async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let jobs = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    /// Transition a pending job to processing. Returns false if the job was
    /// not pending (already claimed or terminal).
    pub async fn start_job(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'processing', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Advance a processing job's progress. Regressions and updates to
    /// terminal jobs are ignored, so observed progress is monotonic.
    pub async fn update_job_progress(
        &self,
        id: &str,
        progress: u8,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs SET progress = ?, message = ?, updated_at = ?
            WHERE id = ? AND status = 'processing' AND progress <= ?
            "#,
        )
        .bind(i64::from(progress.min(100)))
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(i64::from(progress.min(100)))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a processing job to completed with progress 100.
    pub async fn complete_job(&self, id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs SET status = 'completed', progress = 100, message = 'done', updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a non-terminal job to the error state, recording the cause.
    pub async fn fail_job(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs SET status = 'error', error = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ===== Statistics =====

    /// Get global statistics
    pub async fn get_global_stats(&self) -> Result<GlobalStats> {
        let video_count: i32 = sqlx::query_scalar("SELECT COUNT(*) FROM videos")
            .fetch_one(&self.pool)
            .await?;
        let clip_count: i32 = sqlx::query_scalar("SELECT COUNT(*) FROM clips")
            .fetch_one(&self.pool)
            .await?;
        let chunk_count: i32 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let entity_count: i32 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
            .fetch_one(&self.pool)
            .await?;
        let relationship_count: i32 = sqlx::query_scalar("SELECT COUNT(*) FROM relationships")
            .fetch_one(&self.pool)
            .await?;

        Ok(GlobalStats {
            video_count: video_count as usize,
            clip_count: clip_count as usize,
            chunk_count: chunk_count as usize,
            entity_count: entity_count as usize,
            relationship_count: relationship_count as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_test_db() -> (MetaDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();
        (db, tmp)
    }

    #[tokio::test]
    async fn test_video_upsert_and_library() {
        let (db, _tmp) = setup_test_db().await;

        let mut video = VideoRecord::new(
            "lecture_01".to_string(),
            "lecture_01".to_string(),
            "/videos/lecture_01.mp4".to_string(),
            1024,
        );
        db.upsert_video(&video).await.unwrap();

        db.upsert_clip(&ClipRecord::new(
            "lecture_01",
            0,
            0.0,
            30.0,
            "hello".to_string(),
            "a person speaking".to_string(),
        ))
        .await
        .unwrap();

        db.set_video_summary("lecture_01", "Intro lecture about Rust", &["rust".to_string()])
            .await
            .unwrap();
        db.set_video_status("lecture_01", VideoStatus::Indexed)
            .await
            .unwrap();

        let items = db.list_library(None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].clip_count, 1);
        assert_eq!(items[0].status, "indexed");
        assert!(items[0].indexed_at.is_some());

        // Search hits on tags and description, case-insensitive
        assert_eq!(db.list_library(Some("RUST")).await.unwrap().len(), 1);
        assert_eq!(db.list_library(Some("piano")).await.unwrap().len(), 0);

        // Re-index replaces the row
        video.size_bytes = 2048;
        db.upsert_video(&video).await.unwrap();
        assert_eq!(db.list_library(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clip_and_chunk_ordering() {
        let (db, _tmp) = setup_test_db().await;

        let video = VideoRecord::new(
            "v1".to_string(),
            "v1".to_string(),
            "/v1.mp4".to_string(),
            0,
        );
        db.upsert_video(&video).await.unwrap();

        for ordinal in [2usize, 0, 1] {
            let start = ordinal as f64 * 30.0;
            db.upsert_clip(&ClipRecord::new(
                "v1",
                ordinal,
                start,
                start + 30.0,
                String::new(),
                format!("caption {ordinal}"),
            ))
            .await
            .unwrap();
        }

        let clips = db.list_clips("v1").await.unwrap();
        assert_eq!(clips.len(), 3);
        assert_eq!(clips[0].ordinal, 0);
        assert_eq!(clips[2].id, clip_id("v1", 2));

        let chunk = ChunkRecord::new(
            "v1",
            0,
            &[clip_id("v1", 0), clip_id("v1", 1)],
            "combined text".to_string(),
        );
        db.upsert_chunk(&chunk).await.unwrap();

        let loaded = db.get_chunk(&chunk.id).await.unwrap().unwrap();
        assert_eq!(loaded.clip_ids(), vec![clip_id("v1", 0), clip_id("v1", 1)]);
    }

    #[tokio::test]
    async fn test_job_state_machine() {
        let (db, _tmp) = setup_test_db().await;

        let job = db.create_job("v1").await.unwrap();
        assert_eq!(db.get_job(&job.id).await.unwrap().get_status().unwrap(), JobStatus::Pending);

        // pending -> processing, exactly once
        assert!(db.start_job(&job.id).await.unwrap());
        assert!(!db.start_job(&job.id).await.unwrap());

        db.update_job_progress(&job.id, 30, "captioning").await.unwrap();
        assert_eq!(db.get_job(&job.id).await.unwrap().progress, 30);

        // Progress never regresses
        db.update_job_progress(&job.id, 15, "stale").await.unwrap();
        let loaded = db.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.progress, 30);
        assert_eq!(loaded.message.as_deref(), Some("captioning"));

        db.complete_job(&job.id).await.unwrap();
        let loaded = db.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.get_status().unwrap(), JobStatus::Completed);
        assert_eq!(loaded.progress, 100);

        // Terminal state is immutable
        db.update_job_progress(&job.id, 50, "late").await.unwrap();
        db.fail_job(&job.id, "boom").await.unwrap();
        let loaded = db.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.get_status().unwrap(), JobStatus::Completed);
        assert_eq!(loaded.progress, 100);
        assert!(loaded.error.is_none());
    }

    #[tokio::test]
    async fn test_fail_job_from_pending() {
        let (db, _tmp) = setup_test_db().await;

        let job = db.create_job("v1").await.unwrap();
        db.fail_job(&job.id, "source video not found").await.unwrap();

        let loaded = db.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.get_status().unwrap(), JobStatus::Error);
        assert_eq!(loaded.error.as_deref(), Some("source video not found"));
    }

    #[tokio::test]
    async fn test_job_not_found() {
        let (db, _tmp) = setup_test_db().await;
        assert!(matches!(
            db.get_job("missing").await,
            Err(Error::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_video_cascades() {
        let (db, _tmp) = setup_test_db().await;

        let video = VideoRecord::new("v1".to_string(), "v1".to_string(), "/v1.mp4".to_string(), 0);
        db.upsert_video(&video).await.unwrap();
        db.upsert_clip(&ClipRecord::new("v1", 0, 0.0, 30.0, String::new(), String::new()))
            .await
            .unwrap();
        db.upsert_chunk(&ChunkRecord::new("v1", 0, &[clip_id("v1", 0)], "t".to_string()))
            .await
            .unwrap();
        db.create_job("v1").await.unwrap();

        db.delete_video("v1").await.unwrap();

        let stats = db.get_global_stats().await.unwrap();
        assert_eq!(stats.video_count, 0);
        assert_eq!(stats.clip_count, 0);
        assert_eq!(stats.chunk_count, 0);
        assert!(db.list_jobs().await.unwrap().is_empty());
    }
}
