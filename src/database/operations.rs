//! Database CRUD operations

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};
use std::path::PathBuf;
use tracing::debug;

/// Database manager owning the connection pool handle
pub struct DatabaseManager {
    pool: Pool<Sqlite>,
}

/// Known video, keyed by its site-side id
#[derive(Debug, Clone)]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    pub file_path: Option<PathBuf>,
}

/// One download attempt
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub video_id: Option<String>,
    pub status: String,
    pub file_path: Option<PathBuf>,
    pub file_size: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// History row joined with the video it refers to
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: i64,
    pub video_id: Option<String>,
    pub video_title: Option<String>,
    pub video_url: Option<String>,
    pub status: String,
    pub file_path: Option<PathBuf>,
    pub file_size: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DatabaseManager {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Insert or refresh a video row
    pub async fn upsert_video(&self, record: &VideoRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO videos (id, title, url, file_path)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                url = excluded.url,
                file_path = COALESCE(excluded.file_path, videos.file_path),
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&record.id)
        .bind(&record.title)
        .bind(&record.url)
        .bind(record.file_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .execute(&self.pool)
        .await?;

        debug!("upserted video {}", record.id);
        Ok(())
    }

    /// Record a download attempt; returns the new history row id
    pub async fn add_history(&self, record: &HistoryRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO download_history
            (video_id, status, file_path, file_size, started_at, completed_at, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.video_id)
        .bind(&record.status)
        .bind(record.file_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .bind(record.file_size.map(|v| v as i64))
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        let history_id = result.last_insert_rowid();
        debug!("added history row {}", history_id);
        Ok(history_id)
    }

    /// Close out a download attempt with its terminal state
    pub async fn finish_history(
        &self,
        history_id: i64,
        status: &str,
        file_path: Option<&PathBuf>,
        file_size: Option<u64>,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE download_history
            SET status = ?, completed_at = ?, file_path = ?, file_size = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(Utc::now())
        .bind(file_path.map(|p| p.to_string_lossy().into_owned()))
        .bind(file_size.map(|v| v as i64))
        .bind(error_message)
        .bind(history_id)
        .execute(&self.pool)
        .await?;

        debug!("finished history row {} as {}", history_id, status);
        Ok(())
    }

    /// Most recent download attempts, newest first
    pub async fn get_history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT h.*, v.title AS video_title, v.url AS video_url
            FROM download_history h
            LEFT JOIN videos v ON h.video_id = v.id
            ORDER BY h.created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(row_into_history_entry(row));
        }
        Ok(entries)
    }

    /// Delete one history row
    pub async fn delete_history(&self, history_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM download_history WHERE id = ?")
            .bind(history_id)
            .execute(&self.pool)
            .await?;

        debug!("deleted history row {}", history_id);
        Ok(())
    }
}

fn row_into_history_entry(row: sqlx::sqlite::SqliteRow) -> HistoryEntry {
    HistoryEntry {
        id: row.get("id"),
        video_id: row.get("video_id"),
        video_title: row.get("video_title"),
        video_url: row.get("video_url"),
        status: row.get("status"),
        file_path: row
            .get::<Option<String>, _>("file_path")
            .map(PathBuf::from),
        file_size: row.get::<Option<i64>, _>("file_size").map(|v| v as u64),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::initialize_database;

    async fn test_db() -> (tempfile::TempDir, DatabaseManager) {
        let temp = tempfile::tempdir().expect("temp dir");
        let url = format!("sqlite://{}", temp.path().join("test.db").display());
        let pool = initialize_database(&url).await.expect("init db");
        (temp, DatabaseManager::new(pool))
    }

    #[tokio::test]
    async fn test_history_roundtrip() {
        let (_temp, db) = test_db().await;

        db.upsert_video(&VideoRecord {
            id: "vid123".to_string(),
            title: "Test Video".to_string(),
            url: "https://youtu.be/vid123".to_string(),
            file_path: None,
        })
        .await
        .expect("upsert");

        let history_id = db
            .add_history(&HistoryRecord {
                video_id: Some("vid123".to_string()),
                status: "downloading".to_string(),
                file_path: None,
                file_size: None,
                started_at: Some(Utc::now()),
                completed_at: None,
                error_message: None,
            })
            .await
            .expect("add history");

        db.finish_history(
            history_id,
            "completed",
            Some(&PathBuf::from("/tmp/test.mp4")),
            Some(1024),
            None,
        )
        .await
        .expect("finish history");

        let entries = db.get_history(10).await.expect("get history");
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.status, "completed");
        assert_eq!(entry.video_title.as_deref(), Some("Test Video"));
        assert_eq!(entry.file_size, Some(1024));
        assert!(entry.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_upsert_keeps_existing_file_path() {
        let (_temp, db) = test_db().await;

        db.upsert_video(&VideoRecord {
            id: "v1".to_string(),
            title: "First".to_string(),
            url: "https://youtu.be/v1".to_string(),
            file_path: Some(PathBuf::from("/tmp/first.mp4")),
        })
        .await
        .expect("upsert");

        // Re-upsert without a file path; the stored one must survive
        db.upsert_video(&VideoRecord {
            id: "v1".to_string(),
            title: "First (updated)".to_string(),
            url: "https://youtu.be/v1".to_string(),
            file_path: None,
        })
        .await
        .expect("upsert again");

        let history_id = db
            .add_history(&HistoryRecord {
                video_id: Some("v1".to_string()),
                status: "completed".to_string(),
                file_path: None,
                file_size: None,
                started_at: None,
                completed_at: None,
                error_message: None,
            })
            .await
            .expect("add history");

        let entries = db.get_history(10).await.expect("get history");
        assert_eq!(entries[0].id, history_id);
        assert_eq!(entries[0].video_title.as_deref(), Some("First (updated)"));
    }

    #[tokio::test]
    async fn test_delete_history() {
        let (_temp, db) = test_db().await;

        let history_id = db
            .add_history(&HistoryRecord {
                video_id: None,
                status: "failed".to_string(),
                file_path: None,
                file_size: None,
                started_at: None,
                completed_at: None,
                error_message: Some("403 Forbidden".to_string()),
            })
            .await
            .expect("add history");

        db.delete_history(history_id).await.expect("delete");
        let entries = db.get_history(10).await.expect("get history");
        assert!(entries.is_empty());
    }
}
