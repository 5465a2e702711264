//! End-to-end persistence: queue events flowing into the history database.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use ytqueue::database::{initialize_database, spawn_history_recorder, DatabaseManager, HistoryEntry};
use ytqueue::executor::{ExecuteOutcome, ExecuteRequest, JobExecutor, ProgressUpdate};
use ytqueue::queue::{DownloadMode, JobRequest, QueueManager};

struct FixedExecutor {
    fail_with: Option<String>,
}

#[async_trait]
impl JobExecutor for FixedExecutor {
    async fn execute(
        &self,
        request: ExecuteRequest,
        _progress: mpsc::Sender<ProgressUpdate>,
    ) -> Result<ExecuteOutcome> {
        match &self.fail_with {
            Some(error) => Err(anyhow::anyhow!("{error}")),
            None => Ok(ExecuteOutcome {
                file_path: request.output_dir.join("clip.mp4"),
                message: "ok".to_string(),
            }),
        }
    }
}

async fn setup(dir: &Path, fail_with: Option<String>) -> (Arc<DatabaseManager>, Arc<QueueManager>) {
    let url = format!("sqlite://{}", dir.join("history.db").display());
    let pool = initialize_database(&url).await.expect("init db");
    let db = Arc::new(DatabaseManager::new(pool));

    let queue = Arc::new(QueueManager::new(Arc::new(FixedExecutor { fail_with })));
    // Detached; it lives as long as the queue's event channel
    let _ = spawn_history_recorder(Arc::clone(&db), queue.subscribe());
    (db, queue)
}

async fn wait_for_entry<F>(db: &DatabaseManager, what: &str, pred: F) -> HistoryEntry
where
    F: Fn(&HistoryEntry) -> bool,
{
    for _ in 0..240 {
        if let Some(entry) = db
            .get_history(10)
            .await
            .expect("get history")
            .into_iter()
            .find(&pred)
        {
            return entry;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for history entry: {what}");
}

#[tokio::test]
async fn completed_download_is_recorded() {
    let temp = tempfile::tempdir().expect("temp dir");
    let (db, queue) = setup(temp.path(), None).await;

    queue
        .add(JobRequest {
            url: "https://youtu.be/vid123".to_string(),
            title: "Recorded Video".to_string(),
            output_dir: temp.path().to_path_buf(),
            mode: DownloadMode::Mp4,
            video_id: Some("vid123".to_string()),
        })
        .await;

    let entry = wait_for_entry(&db, "completed row", |e| e.status == "completed").await;
    assert_eq!(entry.video_id.as_deref(), Some("vid123"));
    assert_eq!(entry.video_title.as_deref(), Some("Recorded Video"));
    assert_eq!(entry.file_path, Some(temp.path().join("clip.mp4")));
    assert!(entry.started_at.is_some());
    assert!(entry.completed_at.is_some());
}

#[tokio::test]
async fn failed_download_is_recorded_with_its_error() {
    let temp = tempfile::tempdir().expect("temp dir");
    let (db, queue) = setup(temp.path(), Some("403 Forbidden".to_string())).await;

    queue
        .add(JobRequest {
            url: "https://youtu.be/blocked".to_string(),
            title: "Blocked Video".to_string(),
            output_dir: temp.path().to_path_buf(),
            mode: DownloadMode::Mp3,
            video_id: Some("blocked".to_string()),
        })
        .await;

    let entry = wait_for_entry(&db, "failed row", |e| e.status == "failed").await;
    assert_eq!(entry.error_message.as_deref(), Some("403 Forbidden"));
    assert!(entry.file_path.is_none());
}

#[tokio::test]
async fn each_retry_gets_its_own_history_row() {
    let temp = tempfile::tempdir().expect("temp dir");
    let (db, queue) = setup(temp.path(), Some("network unreachable".to_string())).await;

    let id = queue
        .add(JobRequest {
            url: "https://youtu.be/flaky".to_string(),
            title: "Flaky Video".to_string(),
            output_dir: temp.path().to_path_buf(),
            mode: DownloadMode::Mp4,
            video_id: Some("flaky".to_string()),
        })
        .await;

    wait_for_entry(&db, "first failed row", |e| e.status == "failed").await;
    queue.retry(&id).await;

    for _ in 0..240 {
        let failed = db
            .get_history(10)
            .await
            .expect("get history")
            .into_iter()
            .filter(|e| e.status == "failed")
            .count();
        if failed == 2 {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("expected two failed history rows after retry");
}
