//! History recorder
//!
//! Subscribes to queue events and records each download attempt into the
//! database: a row is opened when a job starts and closed out on
//! completion, failure or cancellation. Database trouble is logged and
//! never propagates back into the queue.

use crate::database::operations::{DatabaseManager, HistoryRecord, VideoRecord};
use crate::queue::events::QueueEvent;
use crate::queue::job::DownloadJob;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Per-job bookkeeping between JobQueued and the terminal event
struct JobContext {
    job: DownloadJob,
    history_id: Option<i64>,
}

/// Spawn the recorder task. It runs until the event channel closes.
pub fn spawn_history_recorder(
    db: Arc<DatabaseManager>,
    mut events: broadcast::Receiver<QueueEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut contexts: HashMap<String, JobContext> = HashMap::new();
        debug!("history recorder started");

        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("history recorder lagged, {} events dropped", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            handle_event(&db, &mut contexts, event).await;
        }

        debug!("history recorder stopped");
    })
}

async fn handle_event(
    db: &DatabaseManager,
    contexts: &mut HashMap<String, JobContext>,
    event: QueueEvent,
) {
    match event {
        QueueEvent::JobQueued { job, .. } => {
            if let Some(video_id) = &job.video_id {
                let record = VideoRecord {
                    id: video_id.clone(),
                    title: job.title.clone(),
                    url: job.url.clone(),
                    file_path: None,
                };
                if let Err(e) = db.upsert_video(&record).await {
                    warn!("failed to upsert video {}: {}", video_id, e);
                }
            }
            // A requeue (retry) resets the context; the next start opens a
            // fresh history row for the new attempt.
            contexts.insert(
                job.id.clone(),
                JobContext {
                    job,
                    history_id: None,
                },
            );
        }

        QueueEvent::JobStarted { job_id, .. } => {
            let Some(ctx) = contexts.get_mut(&job_id) else {
                return;
            };
            let record = HistoryRecord {
                video_id: ctx.job.video_id.clone(),
                status: "downloading".to_string(),
                file_path: None,
                file_size: None,
                started_at: Some(Utc::now()),
                completed_at: None,
                error_message: None,
            };
            match db.add_history(&record).await {
                Ok(id) => ctx.history_id = Some(id),
                Err(e) => warn!("failed to record download start: {}", e),
            }
        }

        QueueEvent::JobCompleted {
            job_id, file_path, ..
        } => {
            let Some(ctx) = contexts.remove(&job_id) else {
                return;
            };
            let file_size = tokio::fs::metadata(&file_path).await.ok().map(|m| m.len());

            if let Some(video_id) = &ctx.job.video_id {
                let record = VideoRecord {
                    id: video_id.clone(),
                    title: ctx.job.title.clone(),
                    url: ctx.job.url.clone(),
                    file_path: Some(file_path.clone()),
                };
                if let Err(e) = db.upsert_video(&record).await {
                    warn!("failed to update video {}: {}", video_id, e);
                }
            }

            close_history(db, &ctx, "completed", Some(file_path), file_size, None).await;
        }

        QueueEvent::JobFailed { job_id, error, .. } => {
            let Some(ctx) = contexts.remove(&job_id) else {
                return;
            };
            close_history(db, &ctx, "failed", None, None, Some(error)).await;
        }

        QueueEvent::JobCancelled { job_id, .. } => {
            let Some(ctx) = contexts.remove(&job_id) else {
                return;
            };
            close_history(db, &ctx, "cancelled", None, None, None).await;
        }

        QueueEvent::JobRemoved { job_id, .. } => {
            contexts.remove(&job_id);
        }

        // Not persisted
        QueueEvent::JobProgress { .. }
        | QueueEvent::JobPaused { .. }
        | QueueEvent::JobResumed { .. } => {}
    }
}

async fn close_history(
    db: &DatabaseManager,
    ctx: &JobContext,
    status: &str,
    file_path: Option<PathBuf>,
    file_size: Option<u64>,
    error_message: Option<String>,
) {
    // A job cancelled before it ever started has no open row to close
    let Some(history_id) = ctx.history_id else {
        return;
    };
    if let Err(e) = db
        .finish_history(
            history_id,
            status,
            file_path.as_ref(),
            file_size,
            error_message.as_deref(),
        )
        .await
    {
        warn!("failed to close history row {}: {}", history_id, e);
    }
}
