//! Clip segmentation and frame sampling via FFmpeg
//!
//! This module splits source videos into fixed-duration clips and samples
//! representative frames from them. The timestamp arithmetic is kept in pure
//! functions (`plan_clips`, `frame_timestamps`) so it stays deterministic and
//! testable without media files; subprocess I/O lives in the async wrappers.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Media subprocess operations, behind a trait so orchestrators can be tested
/// without ffmpeg installed.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Duration of a media file in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// Split a source video into fixed-duration clip files under `out_dir`.
    async fn segment(
        &self,
        source: &Path,
        clip_duration_secs: u32,
        out_dir: &Path,
    ) -> Result<Vec<SegmentedClip>>;

    /// Extract `k` evenly spaced JPEG frames from a clip into `out_dir`.
    async fn extract_frames(
        &self,
        clip_path: &Path,
        out_dir: &Path,
        k: usize,
    ) -> Result<Vec<PathBuf>>;
}

/// Production implementation shelling out to ffprobe/ffmpeg
pub struct FfmpegProcessor;

#[async_trait]
impl MediaProcessor for FfmpegProcessor {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        probe_duration(path).await
    }

    async fn segment(
        &self,
        source: &Path,
        clip_duration_secs: u32,
        out_dir: &Path,
    ) -> Result<Vec<SegmentedClip>> {
        segment_video(source, clip_duration_secs, out_dir).await
    }

    async fn extract_frames(
        &self,
        clip_path: &Path,
        out_dir: &Path,
        k: usize,
    ) -> Result<Vec<PathBuf>> {
        extract_frames(clip_path, out_dir, k).await
    }
}

/// Timestamp span of one clip within its source video, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipSpan {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl ClipSpan {
    pub fn duration(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

/// A clip that has been materialized to disk.
#[derive(Debug, Clone)]
pub struct SegmentedClip {
    /// Position of the clip within the video, starting at 0
    pub ordinal: usize,
    pub span: ClipSpan,
    /// Path to the clip file inside the job's working directory
    pub path: PathBuf,
}

/// Plan clip spans covering `[0, duration)` at fixed length `clip_duration_secs`,
/// with the final clip truncated to the remainder.
pub fn plan_clips(duration_secs: f64, clip_duration_secs: u32) -> Result<Vec<ClipSpan>> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Err(Error::MediaRead(format!(
            "source has zero or invalid duration: {duration_secs}"
        )));
    }
    let step = f64::from(clip_duration_secs);

    let mut spans = Vec::new();
    let mut start = 0.0;
    while start < duration_secs {
        let end = (start + step).min(duration_secs);
        spans.push(ClipSpan {
            start_secs: start,
            end_secs: end,
        });
        start += step;
    }
    Ok(spans)
}

/// Timestamps for `k` frames spread evenly across `[0, duration)`.
///
/// Uses the interior-point spacing `duration / (k + 1)` so the first and last
/// frames avoid the clip boundaries. Deterministic for a given (duration, k).
pub fn frame_timestamps(duration_secs: f64, k: usize) -> Vec<f64> {
    if duration_secs <= 0.0 || k == 0 {
        return Vec::new();
    }
    let interval = duration_secs / (k as f64 + 1.0);
    (0..k).map(|i| interval * (i as f64 + 1.0)).collect()
}

/// Probe a media file's duration in seconds using ffprobe.
pub async fn probe_duration(path: &Path) -> Result<f64> {
    if !path.exists() {
        return Err(Error::MediaRead(format!(
            "source video not found: {}",
            path.display()
        )));
    }

    let output = Command::new("ffprobe")
        .args(["-v", "error"])
        .args(["-show_entries", "format=duration"])
        .args(["-of", "default=noprint_wrappers=1:nokey=1"])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::MediaRead(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(Error::MediaRead(format!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let duration: f64 = String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .map_err(|_| Error::MediaRead(format!("unparsable duration for {}", path.display())))?;

    if duration <= 0.0 {
        return Err(Error::MediaRead(format!(
            "source has zero duration: {}",
            path.display()
        )));
    }
    Ok(duration)
}

/// Split a source video into fixed-duration clip files under `work_dir`.
///
/// The working directory is owned by the indexing job and released when the
/// job reaches a terminal state.
pub async fn segment_video(
    source: &Path,
    clip_duration_secs: u32,
    work_dir: &Path,
) -> Result<Vec<SegmentedClip>> {
    let duration = probe_duration(source).await?;
    let spans = plan_clips(duration, clip_duration_secs)?;
    tokio::fs::create_dir_all(work_dir).await?;
    info!(
        "Segmenting {} ({duration:.1}s) into {} clips",
        source.display(),
        spans.len()
    );

    let mut clips = Vec::with_capacity(spans.len());
    for (ordinal, span) in spans.into_iter().enumerate() {
        let clip_path = work_dir.join(format!("clip_{ordinal:04}.mp4"));
        let status = Command::new("ffmpeg")
            .args(["-ss", &span.start_secs.to_string()])
            .arg("-i")
            .arg(source)
            .args(["-t", &span.duration().to_string()])
            .args(["-c", "copy", "-y"])
            .arg(&clip_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::MediaRead(format!("failed to run ffmpeg: {e}")))?;

        if !status.success() {
            return Err(Error::MediaRead(format!(
                "ffmpeg failed cutting clip {ordinal} of {}",
                source.display()
            )));
        }

        debug!("Cut clip {ordinal}: {:.1}s-{:.1}s", span.start_secs, span.end_secs);
        clips.push(SegmentedClip {
            ordinal,
            span,
            path: clip_path,
        });
    }

    Ok(clips)
}

/// Extract `k` evenly spaced JPEG frames from a clip into `out_dir`.
///
/// Returns exactly `k` frame paths in timestamp order. Fails with
/// `EmptyMedia` if any frame cannot be decoded; callers decide whether the
/// failure degrades the clip or drops the candidate.
pub async fn extract_frames(clip_path: &Path, out_dir: &Path, k: usize) -> Result<Vec<PathBuf>> {
    let duration = probe_duration(clip_path)
        .await
        .map_err(|_| Error::EmptyMedia(clip_path.display().to_string()))?;

    let timestamps = frame_timestamps(duration, k);
    if timestamps.is_empty() {
        return Err(Error::EmptyMedia(clip_path.display().to_string()));
    }

    tokio::fs::create_dir_all(out_dir).await?;

    let mut frames = Vec::with_capacity(timestamps.len());
    for (i, ts) in timestamps.iter().enumerate() {
        let frame_path = out_dir.join(format!("frame_{i:04}.jpg"));
        let status = Command::new("ffmpeg")
            .args(["-ss", &ts.to_string()])
            .arg("-i")
            .arg(clip_path)
            .args(["-vframes", "1"])
            .args(["-q:v", "2", "-y"])
            .arg(&frame_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::MediaRead(format!("failed to run ffmpeg: {e}")))?;

        if !status.success() || !frame_path.exists() {
            warn!("Frame extraction failed at {ts:.2}s in {}", clip_path.display());
            return Err(Error::EmptyMedia(clip_path.display().to_string()));
        }
        frames.push(frame_path);
    }

    Ok(frames)
}

/// Derive the video id from a source path (file stem).
pub fn video_id_from_path(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_clips_exact_multiple() {
        let spans = plan_clips(90.0, 30).unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[2].end_secs, 90.0);
    }

    #[test]
    fn test_plan_clips_remainder() {
        // 95s at D=30 -> [0,30) [30,60) [60,90) [90,95)
        let spans = plan_clips(95.0, 30).unwrap();
        assert_eq!(spans.len(), 4);
        assert_eq!(spans[0].start_secs, 0.0);
        assert_eq!(spans[0].end_secs, 30.0);
        assert_eq!(spans[3].start_secs, 90.0);
        assert_eq!(spans[3].end_secs, 95.0);

        // Contiguous and non-overlapping
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end_secs, pair[1].start_secs);
        }
    }

    #[test]
    fn test_plan_clips_short_video() {
        let spans = plan_clips(12.5, 30).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].end_secs, 12.5);
    }

    #[test]
    fn test_plan_clips_zero_duration() {
        assert!(plan_clips(0.0, 30).is_err());
        assert!(plan_clips(-5.0, 30).is_err());
    }

    #[test]
    fn test_frame_timestamps_even_spacing() {
        let ts = frame_timestamps(30.0, 5);
        assert_eq!(ts.len(), 5);
        assert!((ts[0] - 5.0).abs() < 1e-9);
        assert!((ts[4] - 25.0).abs() < 1e-9);
        // Strictly increasing, inside (0, duration)
        for pair in ts.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(ts[0] > 0.0 && ts[4] < 30.0);
    }

    #[test]
    fn test_frame_timestamps_deterministic() {
        assert_eq!(frame_timestamps(47.3, 7), frame_timestamps(47.3, 7));
        assert_eq!(frame_timestamps(47.3, 1).len(), 1);
        assert!(frame_timestamps(47.3, 0).is_empty());
    }

    #[test]
    fn test_video_id_from_path() {
        let id = video_id_from_path(Path::new("/data/videos/lecture_01.mp4")).unwrap();
        assert_eq!(id, "lecture_01");
    }

    #[tokio::test]
    async fn test_extract_frames_unreadable_clip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = extract_frames(Path::new("/nonexistent/clip.mp4"), tmp.path(), 3).await;
        assert!(matches!(result, Err(Error::EmptyMedia(_))));
    }
}
