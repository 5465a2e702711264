pub mod events;
pub mod job;
pub mod manager;

pub use events::QueueEvent;
pub use job::{DownloadJob, DownloadMode, JobRequest, JobStatus};
pub use manager::QueueManager;
