//! Job record and status vocabulary for the download queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Output format for a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadMode {
    /// Audio only, extracted to mp3 (requires ffmpeg)
    Mp3,
    /// Muxed video, mp4 container
    Mp4,
}

impl DownloadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadMode::Mp3 => "mp3",
            DownloadMode::Mp4 => "mp4",
        }
    }

    /// File extension yt-dlp produces for this mode
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp3" => Ok(DownloadMode::Mp3),
            "mp4" => Ok(DownloadMode::Mp4),
            other => Err(format!("unsupported mode: {other} (expected mp3 or mp4)")),
        }
    }
}

/// Job status
///
/// The failure message travels inside the `Failed` variant, so an errored
/// job always carries a non-empty reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed(String),
    Cancelled,
}

impl JobStatus {
    /// Completed, failed and cancelled jobs never run again without a retry
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed(_) | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "Queued",
            JobStatus::Downloading => "Downloading",
            JobStatus::Paused => "Paused",
            JobStatus::Completed => "Completed",
            JobStatus::Failed(_) => "Failed",
            JobStatus::Cancelled => "Cancelled",
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Queued
    }
}

/// Payload for `QueueManager::add`
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub url: String,
    pub title: String,
    pub output_dir: PathBuf,
    pub mode: DownloadMode,
    /// Site-side content id, used to correlate with persisted history
    pub video_id: Option<String>,
}

/// One requested download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: String,
    pub url: String,
    pub title: String,
    pub output_dir: PathBuf,
    pub mode: DownloadMode,
    pub status: JobStatus,
    /// Percent complete, 0-100
    pub progress: f64,
    /// Resolved output file, set once the job completes
    pub file_path: Option<PathBuf>,
    pub video_id: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl DownloadJob {
    /// Create a new queued job with a fresh id
    pub fn new(request: JobRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: request.url,
            title: request.title,
            output_dir: request.output_dir,
            mode: request.mode,
            status: JobStatus::Queued,
            progress: 0.0,
            file_path: None,
            video_id: request.video_id,
            added_at: Utc::now(),
        }
    }

    /// Failure reason, when the job is in the failed state
    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Failed(msg) => Some(msg),
            _ => None,
        }
    }

    /// Record a progress update.
    ///
    /// Progress never moves backwards while a download is running; stale or
    /// out-of-order reports from the executor are clamped away.
    pub fn record_progress(&mut self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        if percent > self.progress {
            self.progress = percent;
        }
    }

    /// Reset the job for another run and mark it queued
    pub fn reset_for_retry(&mut self) {
        self.status = JobStatus::Queued;
        self.progress = 0.0;
        self.file_path = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        JobRequest {
            url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            title: "Test Video".to_string(),
            output_dir: PathBuf::from("/tmp"),
            mode: DownloadMode::Mp4,
            video_id: Some("dQw4w9WgXcQ".to_string()),
        }
    }

    #[test]
    fn test_new_job_starts_queued() {
        let job = DownloadJob::new(request());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0.0);
        assert!(job.file_path.is_none());
        assert!(!job.id.is_empty());
    }

    #[test]
    fn test_fresh_ids() {
        let a = DownloadJob::new(request());
        let b = DownloadJob::new(request());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("mp3".parse::<DownloadMode>(), Ok(DownloadMode::Mp3));
        assert_eq!("MP4".parse::<DownloadMode>(), Ok(DownloadMode::Mp4));
        assert!("flac".parse::<DownloadMode>().is_err());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = DownloadJob::new(request());
        job.record_progress(42.0);
        job.record_progress(17.0);
        assert_eq!(job.progress, 42.0);
        job.record_progress(250.0);
        assert_eq!(job.progress, 100.0);
    }

    #[test]
    fn test_retry_reset() {
        let mut job = DownloadJob::new(request());
        job.status = JobStatus::Failed("403 Forbidden".to_string());
        job.progress = 60.0;

        job.reset_for_retry();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0.0);
        assert!(job.error_message().is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed("x".to_string()).is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Downloading.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
    }
}
