//! Application configuration

use crate::utils::error::YtQueueError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings, built once at startup and passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where downloaded files land
    pub download_dir: PathBuf,

    /// SQLite database file
    pub db_path: PathBuf,

    /// Explicit ffmpeg location; when unset the executor searches PATH
    pub ffmpeg_path: Option<PathBuf>,

    /// Default row limit when listing download history
    pub history_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_dir: dirs::download_dir()
                .unwrap_or_else(|| PathBuf::from("./downloads"))
                .join("yt-downloads"),
            db_path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("./data"))
                .join("ytqueue")
                .join("ytqueue.db"),
            ffmpeg_path: None,
            history_limit: 50,
        }
    }
}

impl AppConfig {
    /// Build settings from defaults plus environment overrides
    /// (`YTQUEUE_DOWNLOAD_DIR`, `YTQUEUE_DB_PATH`, `FFMPEG_PATH`).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("YTQUEUE_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("YTQUEUE_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("FFMPEG_PATH") {
            config.ffmpeg_path = Some(PathBuf::from(path));
        }

        config
    }

    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self, YtQueueError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persist settings as JSON
    pub fn save(&self, path: &Path) -> Result<(), YtQueueError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// sqlx connection URL for the configured database file
    pub fn db_url(&self) -> String {
        format!("sqlite://{}", self.db_path.display())
    }

    /// Create the download and database directories if missing
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.download_dir)?;
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.history_limit > 0);
        assert!(config.db_path.ends_with("ytqueue/ytqueue.db"));
    }

    #[test]
    fn test_db_url_points_at_db_path() {
        let mut config = AppConfig::default();
        config.db_path = PathBuf::from("/tmp/q.db");
        assert_eq!(config.db_url(), "sqlite:///tmp/q.db");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("conf").join("ytqueue.json");

        let mut config = AppConfig::default();
        config.history_limit = 7;
        config.ffmpeg_path = Some(PathBuf::from("/opt/ffmpeg"));
        config.save(&path).expect("save");

        let loaded = AppConfig::load(&path).expect("load");
        assert_eq!(loaded.history_limit, 7);
        assert_eq!(loaded.ffmpeg_path, Some(PathBuf::from("/opt/ffmpeg")));
        assert_eq!(loaded.download_dir, config.download_dir);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Path::new("/nonexistent/ytqueue.json")).is_err());
    }

    #[test]
    fn test_ensure_directories() {
        let temp = tempfile::tempdir().expect("temp dir");
        let mut config = AppConfig::default();
        config.download_dir = temp.path().join("downloads");
        config.db_path = temp.path().join("data").join("q.db");

        config.ensure_directories().expect("create dirs");
        assert!(config.download_dir.is_dir());
        assert!(temp.path().join("data").is_dir());
    }
}
