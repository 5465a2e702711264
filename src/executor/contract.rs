use crate::queue::job::DownloadMode;
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// What the queue hands an executor for one job
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub url: String,
    pub output_dir: PathBuf,
    pub mode: DownloadMode,
}

/// Progress report emitted while a download runs
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Percent complete, 0-100
    pub percent: f64,
    /// Short human-readable status, e.g. a speed readout
    pub message: String,
}

/// Result of a successful download
#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    /// Where the finished file landed
    pub file_path: PathBuf,
    /// Human-readable completion message
    pub message: String,
}

/// Contract between the queue and whatever performs downloads.
///
/// The worker loop invokes `execute` on a dedicated task; the returned
/// future resolving is the completion signal, exactly once per invocation.
/// Progress may be reported zero or more times before that. The queue may
/// abandon a job mid-flight (cooperative cancellation), which drops the
/// progress receiver; implementations must ignore send failures and simply
/// finish on their own. Failed invocations are never retried automatically;
/// retry is an explicit caller action.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        request: ExecuteRequest,
        progress: mpsc::Sender<ProgressUpdate>,
    ) -> Result<ExecuteOutcome>;
}
