//! ytqueue - queued yt-dlp downloads from the command line
//!
//! Validates and enqueues the given URLs, then renders queue events until
//! every job reaches a terminal state. All components (config, database,
//! executor, queue) are constructed here and passed down explicitly.

use anyhow::{bail, Result};
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use ytqueue::database::{initialize_database, spawn_history_recorder, DatabaseManager};
use ytqueue::executor::YtDlpDownloader;
use ytqueue::queue::{DownloadMode, JobRequest, QueueEvent, QueueManager};
use ytqueue::utils::{validate_download_url, AppConfig};

#[derive(Parser)]
#[command(name = "ytqueue", about = "Queue YouTube downloads through yt-dlp")]
struct Args {
    /// URLs to download
    urls: Vec<String>,

    /// Output format (mp3 or mp4)
    #[arg(long, default_value = "mp4")]
    mode: DownloadMode,

    /// Settings file (JSON); defaults plus env overrides when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Destination directory (defaults to the configured download dir)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Database file location
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Print recent download history and exit
    #[arg(long)]
    history: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::from_env(),
    };
    if let Some(output) = args.output {
        config.download_dir = output;
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    config.ensure_directories()?;

    let pool = initialize_database(&config.db_url()).await?;
    let db = Arc::new(DatabaseManager::new(pool));

    if args.history {
        return print_history(&db, config.history_limit).await;
    }

    if args.urls.is_empty() {
        bail!("no URLs given; see --help");
    }

    let mut downloader = YtDlpDownloader::new()?;
    if let Some(ffmpeg) = &config.ffmpeg_path {
        downloader = downloader.with_ffmpeg_path(ffmpeg.clone());
    }
    let queue = Arc::new(QueueManager::new(Arc::new(downloader)));

    // Subscribe before adding anything so no event is missed
    let recorder = spawn_history_recorder(Arc::clone(&db), queue.subscribe());
    let mut events = queue.subscribe();

    let mut outstanding = HashSet::new();
    for url in &args.urls {
        if let Err(e) = validate_download_url(url) {
            eprintln!("skipping {url}: {e}");
            continue;
        }
        let job_id = queue
            .add(JobRequest {
                url: url.clone(),
                title: url.clone(),
                output_dir: config.download_dir.clone(),
                mode: args.mode,
                video_id: None,
            })
            .await;
        outstanding.insert(job_id);
    }

    if outstanding.is_empty() {
        bail!("nothing to download");
    }

    while !outstanding.is_empty() {
        match events.recv().await {
            Ok(event) => render_event(&event, &mut outstanding),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    // Dropping the queue closes the event channel, letting the recorder
    // flush its final rows and exit
    drop(events);
    drop(queue);
    let _ = recorder.await;

    Ok(())
}

fn render_event(event: &QueueEvent, outstanding: &mut HashSet<String>) {
    match event {
        QueueEvent::JobStarted { job_id, .. } => {
            println!("[{}] starting", &job_id[..8.min(job_id.len())]);
        }
        QueueEvent::JobProgress {
            job_id,
            percent,
            message,
        } => {
            println!("[{}] {percent:5.1}% {message}", &job_id[..8.min(job_id.len())]);
        }
        QueueEvent::JobCompleted {
            job_id, file_path, ..
        } => {
            println!(
                "[{}] completed -> {}",
                &job_id[..8.min(job_id.len())],
                file_path.display()
            );
            outstanding.remove(job_id);
        }
        QueueEvent::JobFailed { job_id, error, .. } => {
            eprintln!("[{}] failed: {error}", &job_id[..8.min(job_id.len())]);
            outstanding.remove(job_id);
        }
        QueueEvent::JobCancelled { job_id, .. } => {
            outstanding.remove(job_id);
        }
        _ => {}
    }
}

async fn print_history(db: &DatabaseManager, limit: usize) -> Result<()> {
    let entries = db.get_history(limit).await?;
    if entries.is_empty() {
        println!("no download history");
        return Ok(());
    }

    for entry in entries {
        let what = entry
            .video_title
            .or(entry.video_url)
            .unwrap_or_else(|| "<unknown>".to_string());
        let detail = match (&entry.file_path, &entry.error_message) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(error)) => error.clone(),
            (None, None) => String::new(),
        };
        println!(
            "{}  {:11}  {}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.status,
            what,
            detail
        );
    }
    Ok(())
}
