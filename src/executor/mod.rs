//! Job executor contract and the yt-dlp implementation

pub mod contract;
pub mod ytdlp;

pub use contract::{ExecuteOutcome, ExecuteRequest, JobExecutor, ProgressUpdate};
pub use ytdlp::YtDlpDownloader;
