//! ytqueue library
//!
//! A sequential download queue for yt-dlp backed media downloads: jobs are
//! accepted from any task, executed one at a time by a background worker,
//! and controlled (pause/resume/retry/remove) while they run. State changes
//! are published on a broadcast channel and recorded into a SQLite history.

pub mod database;
pub mod executor;
pub mod queue;
pub mod utils;

// Re-export main types for easier use
pub use executor::{ExecuteOutcome, ExecuteRequest, JobExecutor, ProgressUpdate, YtDlpDownloader};
pub use queue::{DownloadJob, DownloadMode, JobRequest, JobStatus, QueueEvent, QueueManager};
pub use utils::{AppConfig, YtQueueError};
