//! Queue state-change events
//!
//! Instead of threading progress/completion callbacks through every job,
//! the queue publishes these events on a single broadcast channel. The GUI,
//! the CLI renderer and the history recorder all attach at one subscription
//! point; they receive events from the worker's context and marshal onto
//! their own execution context as needed.

use crate::queue::job::DownloadJob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Events that describe changes in the download queue state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    /// A new job was accepted into the queue
    JobQueued {
        job: DownloadJob,
        timestamp: DateTime<Utc>,
    },
    /// The worker handed a job to the executor
    JobStarted {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Progress report from the running download (high-frequency, no timestamp)
    JobProgress {
        job_id: String,
        percent: f64,
        message: String,
    },
    /// The running job was paused
    JobPaused {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A paused job went back to downloading
    JobResumed {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A job finished successfully
    JobCompleted {
        job_id: String,
        file_path: PathBuf,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// A job finished with an error
    JobFailed {
        job_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The running job was cancelled
    JobCancelled {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A job was removed from the queue by a caller
    JobRemoved {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    pub fn queued(job: &DownloadJob) -> Self {
        Self::JobQueued {
            job: job.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn started(job_id: &str) -> Self {
        Self::JobStarted {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn progress(job_id: &str, percent: f64, message: &str) -> Self {
        Self::JobProgress {
            job_id: job_id.to_string(),
            percent,
            message: message.to_string(),
        }
    }

    pub fn paused(job_id: &str) -> Self {
        Self::JobPaused {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn resumed(job_id: &str) -> Self {
        Self::JobResumed {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn completed(job_id: &str, file_path: PathBuf, message: &str) -> Self {
        Self::JobCompleted {
            job_id: job_id.to_string(),
            file_path,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn failed(job_id: &str, error: &str) -> Self {
        Self::JobFailed {
            job_id: job_id.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn cancelled(job_id: &str) -> Self {
        Self::JobCancelled {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn removed(job_id: &str) -> Self {
        Self::JobRemoved {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Job id the event refers to
    pub fn job_id(&self) -> &str {
        match self {
            QueueEvent::JobQueued { job, .. } => &job.id,
            QueueEvent::JobStarted { job_id, .. }
            | QueueEvent::JobProgress { job_id, .. }
            | QueueEvent::JobPaused { job_id, .. }
            | QueueEvent::JobResumed { job_id, .. }
            | QueueEvent::JobCompleted { job_id, .. }
            | QueueEvent::JobFailed { job_id, .. }
            | QueueEvent::JobCancelled { job_id, .. }
            | QueueEvent::JobRemoved { job_id, .. } => job_id,
        }
    }
}
