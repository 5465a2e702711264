//! yt-dlp backed job executor
//!
//! Spawns the yt-dlp binary per job, streams its `--newline` progress
//! output into the queue's progress channel, and maps the well-known
//! failure modes to messages a user can act on.

use crate::executor::contract::{ExecuteOutcome, ExecuteRequest, JobExecutor, ProgressUpdate};
use crate::queue::job::DownloadMode;
use crate::utils::error::YtQueueError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::SystemTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// `[download]  42.3% of ~10.5MiB at 2.31MiB/s ETA 00:05`
static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%(?:.*?\bat\s+(\S+))?").expect("static pattern")
});

/// Fallback locations checked when yt-dlp is not on PATH
const COMMON_YTDLP_PATHS: [&str; 4] = [
    "/opt/homebrew/bin/yt-dlp",
    "/usr/local/bin/yt-dlp",
    "/usr/bin/yt-dlp",
    "~/.local/bin/yt-dlp",
];

/// Downloads media by driving the yt-dlp binary
pub struct YtDlpDownloader {
    ytdlp_path: PathBuf,
    ffmpeg_path: Option<PathBuf>,
}

impl YtDlpDownloader {
    /// Locate yt-dlp (and ffmpeg, if present) and build the executor.
    ///
    /// ffmpeg is only required for mp3 extraction; when missing we warn and
    /// let audio jobs fail with a pointed message instead of refusing to
    /// start.
    pub fn new() -> Result<Self> {
        let ytdlp_path = find_ytdlp().ok_or(YtQueueError::YtDlpNotFound)?;
        info!("using yt-dlp at {}", ytdlp_path.display());

        let ffmpeg_path = which::which("ffmpeg").ok();
        if ffmpeg_path.is_none() {
            warn!("ffmpeg not found; mp3 downloads will fail");
        }

        Ok(Self {
            ytdlp_path,
            ffmpeg_path,
        })
    }

    /// Override the ffmpeg location (e.g. from configuration)
    pub fn with_ffmpeg_path(mut self, path: PathBuf) -> Self {
        self.ffmpeg_path = Some(path);
        self
    }
}

#[async_trait]
impl JobExecutor for YtDlpDownloader {
    async fn execute(
        &self,
        request: ExecuteRequest,
        progress: mpsc::Sender<ProgressUpdate>,
    ) -> Result<ExecuteOutcome> {
        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .with_context(|| {
                format!("creating output dir {}", request.output_dir.display())
            })?;

        let args = build_args(
            &request.url,
            &request.output_dir,
            request.mode,
            self.ffmpeg_path.as_deref(),
        );
        debug!("yt-dlp {}", args.join(" "));

        let mut child = Command::new(&self.ytdlp_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawning yt-dlp")?;

        let stderr = child.stderr.take().context("capturing yt-dlp stderr")?;
        let stderr_task = tokio::spawn(async move {
            let mut collected = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push_str(&line);
                collected.push('\n');
            }
            collected
        });

        let stdout = child.stdout.take().context("capturing yt-dlp stdout")?;
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(update) = parse_progress_line(&line) {
                // The queue may have abandoned this job; keep going regardless
                let _ = progress.send(update).await;
            }
        }

        let status = child.wait().await.context("waiting for yt-dlp")?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(YtQueueError::DownloadError(friendly_error(&stderr_output)).into());
        }

        let _ = progress
            .send(ProgressUpdate {
                percent: 100.0,
                message: "Download finished".to_string(),
            })
            .await;

        let file_path = resolve_output_file(&request.output_dir, request.mode).ok_or_else(|| {
            YtQueueError::DownloadError(
                "yt-dlp reported success but no output file was found".to_string(),
            )
        })?;

        let message = match file_path.file_name() {
            Some(name) => format!("Download finished: {}", name.to_string_lossy()),
            None => "Download finished".to_string(),
        };

        Ok(ExecuteOutcome { file_path, message })
    }
}

/// Assemble the yt-dlp argument list for one job
fn build_args(url: &str, output_dir: &Path, mode: DownloadMode, ffmpeg: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "--newline".to_string(),
        "--no-warnings".to_string(),
        "-o".to_string(),
        output_dir
            .join("%(title)s.%(ext)s")
            .to_string_lossy()
            .into_owned(),
    ];

    match mode {
        DownloadMode::Mp3 => {
            args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                "mp3".to_string(),
                "--audio-quality".to_string(),
                "192K".to_string(),
            ]);
        }
        DownloadMode::Mp4 => {
            args.extend([
                "-f".to_string(),
                "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string(),
                "--merge-output-format".to_string(),
                "mp4".to_string(),
            ]);
        }
    }

    if let Some(ffmpeg) = ffmpeg {
        args.push("--ffmpeg-location".to_string());
        args.push(ffmpeg.to_string_lossy().into_owned());
    }

    args.push(url.to_string());
    args
}

/// Pull percent and speed out of a yt-dlp progress line
fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let caps = PROGRESS_RE.captures(line)?;
    let percent: f64 = caps.get(1)?.as_str().parse().ok()?;

    let message = match caps.get(2) {
        Some(speed) if speed.as_str() != "Unknown" => {
            format!("Downloading... {}", speed.as_str())
        }
        _ => "Downloading...".to_string(),
    };

    Some(ProgressUpdate { percent, message })
}

/// Map yt-dlp stderr to a message worth showing to a user
fn friendly_error(stderr: &str) -> String {
    if stderr.contains("403") || stderr.contains("Forbidden") {
        return "YouTube blocked the download (403 Forbidden). \
                Update yt-dlp or try again in a few minutes."
            .to_string();
    }
    if stderr.contains("Private video") {
        return "This video is private and cannot be downloaded.".to_string();
    }
    if stderr.contains("Sign in to confirm your age") {
        return "This video is age-restricted and cannot be downloaded.".to_string();
    }
    if stderr.contains("unavailable") {
        return "Video is unavailable or has been removed.".to_string();
    }
    if stderr.to_lowercase().contains("ffmpeg") {
        return "ffmpeg not found or misconfigured. \
                Audio (mp3) downloads require ffmpeg."
            .to_string();
    }

    stderr
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| format!("Download error: {}", line.trim()))
        .unwrap_or_else(|| "Download error: yt-dlp exited with a failure".to_string())
}

/// Find the file the download produced: newest entry in the output
/// directory with an extension this mode can yield. yt-dlp names the file
/// after the video title, so the exact name is not known up front.
fn resolve_output_file(output_dir: &Path, mode: DownloadMode) -> Option<PathBuf> {
    let extensions: &[&str] = match mode {
        DownloadMode::Mp3 => &["mp3"],
        // A single-format fallback can skip the mp4 merge
        DownloadMode::Mp4 => &["mp4", "mkv", "webm"],
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(output_dir).ok()? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();

        let matches_ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.contains(&ext.to_lowercase().as_str()));
        if !matches_ext {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }

    newest.map(|(_, path)| path)
}

/// Locate yt-dlp: PATH first, then common install locations
fn find_ytdlp() -> Option<PathBuf> {
    if let Ok(path) = which::which("yt-dlp") {
        return Some(path);
    }

    for candidate in COMMON_YTDLP_PATHS {
        let expanded = if let Some(rest) = candidate.strip_prefix("~/") {
            match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => continue,
            }
        } else {
            PathBuf::from(candidate)
        };

        if expanded.is_file() {
            return Some(expanded);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mp3_args() {
        let args = build_args(
            "https://youtu.be/abc",
            Path::new("/tmp/out"),
            DownloadMode::Mp3,
            Some(Path::new("/usr/bin/ffmpeg")),
        );
        assert!(args.contains(&"-x".to_string()));
        assert!(args.contains(&"mp3".to_string()));
        assert!(args.contains(&"--ffmpeg-location".to_string()));
        assert_eq!(args.last().unwrap(), "https://youtu.be/abc");
    }

    #[test]
    fn test_mp4_args() {
        let args = build_args(
            "https://youtu.be/abc",
            Path::new("/tmp/out"),
            DownloadMode::Mp4,
            None,
        );
        assert!(args.contains(&"--merge-output-format".to_string()));
        assert!(!args.contains(&"--ffmpeg-location".to_string()));
        assert!(args.iter().any(|a| a.contains("%(title)s")));
    }

    #[test]
    fn test_parse_progress_line() {
        let update =
            parse_progress_line("[download]  42.3% of ~10.51MiB at 2.31MiB/s ETA 00:05").unwrap();
        assert!((update.percent - 42.3).abs() < f64::EPSILON);
        assert_eq!(update.message, "Downloading... 2.31MiB/s");

        let done = parse_progress_line("[download] 100% of 10.51MiB in 00:04").unwrap();
        assert_eq!(done.percent, 100.0);

        assert!(parse_progress_line("[info] Writing video metadata").is_none());
        assert!(parse_progress_line("random noise").is_none());
    }

    #[test]
    fn test_friendly_errors() {
        assert!(friendly_error("HTTP Error 403: Forbidden").contains("403"));
        assert!(friendly_error("ERROR: Private video").contains("private"));
        assert!(friendly_error("ERROR: Video unavailable").contains("unavailable"));
        assert!(friendly_error("Sign in to confirm your age").contains("age-restricted"));
        assert!(friendly_error("ffmpeg not found").contains("ffmpeg"));
        assert!(friendly_error("something odd\n").contains("something odd"));
        assert!(!friendly_error("").is_empty());
    }

    #[test]
    fn test_resolve_output_file_filters_by_mode() {
        let temp = tempfile::tempdir().expect("temp dir");
        std::fs::write(temp.path().join("song.mp3"), b"x").unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"x").unwrap();

        let found = resolve_output_file(temp.path(), DownloadMode::Mp3).unwrap();
        assert!(found.ends_with("song.mp3"));
        assert!(resolve_output_file(temp.path(), DownloadMode::Mp4).is_none());
    }

    #[test]
    fn test_resolve_output_file_picks_newest() {
        let temp = tempfile::tempdir().expect("temp dir");
        std::fs::write(temp.path().join("old.mp4"), b"x").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        std::fs::write(temp.path().join("new.mp4"), b"x").unwrap();

        let found = resolve_output_file(temp.path(), DownloadMode::Mp4).unwrap();
        assert!(found.ends_with("new.mp4"));
    }

    #[test]
    fn test_find_ytdlp() {
        // Don't assert - yt-dlp might not be installed in CI
        let result = find_ytdlp();
        println!("yt-dlp found at: {:?}", result);
    }
}
