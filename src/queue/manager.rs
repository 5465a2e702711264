//! Download queue manager
//!
//! Jobs are serialized through a single background worker: at most one
//! download runs at any instant, and jobs execute in the order they were
//! added unless reordered by retry or removal. Control operations
//! (pause/resume/retry/remove) are cooperative: they flip flags the worker
//! observes at its next poll and never kill an in-flight executor call.

use crate::executor::{ExecuteOutcome, ExecuteRequest, JobExecutor, ProgressUpdate};
use crate::queue::events::QueueEvent;
use crate::queue::job::{DownloadJob, JobRequest, JobStatus};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time;
use tracing::{debug, error, info, warn};

/// How often the worker re-checks the paused flag while idle
const PAUSE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How often the worker checks for stop/pause while a download runs
const DONE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Terminal jobs kept around for `get`/`retry`; oldest dropped beyond this
const FINISHED_CAPACITY: usize = 100;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Everything the queue knows, guarded by one lock
struct QueueState {
    pending: VecDeque<DownloadJob>,
    current: Option<DownloadJob>,
    finished: Vec<DownloadJob>,
    paused: bool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            finished: Vec::new(),
            paused: false,
        }
    }

    fn find(&self, job_id: &str) -> Option<&DownloadJob> {
        self.current
            .iter()
            .chain(self.pending.iter())
            .chain(self.finished.iter())
            .find(|job| job.id == job_id)
    }

    fn push_finished(&mut self, job: DownloadJob) {
        if self.finished.len() >= FINISHED_CAPACITY {
            self.finished.remove(0);
        }
        self.finished.push(job);
    }
}

/// Download queue manager
pub struct QueueManager {
    state: Arc<Mutex<QueueState>>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    executor: Arc<dyn JobExecutor>,
    events: broadcast::Sender<QueueEvent>,
}

impl QueueManager {
    /// Create a queue manager driving the given executor
    pub fn new(executor: Arc<dyn JobExecutor>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(QueueState::new())),
            stop: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            executor,
            events,
        }
    }

    /// Subscribe to queue events. One subscription covers every job.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Accept a job into the queue and return its id.
    ///
    /// Never blocks on I/O; the URL and destination are taken as-is
    /// (validation happens before submission). Starts the worker if none
    /// is alive.
    pub async fn add(&self, request: JobRequest) -> String {
        let title = request.title.clone();
        let job = DownloadJob::new(request);
        let job_id = job.id.clone();
        let event = QueueEvent::queued(&job);

        {
            let mut st = self.state.lock().await;
            st.pending.push_back(job);
        }

        let _ = self.events.send(event);
        info!("job queued: {} ({})", title, short_id(&job_id));

        self.ensure_worker().await;
        job_id
    }

    /// Snapshot of a single job, wherever it currently lives
    pub async fn get(&self, job_id: &str) -> Option<DownloadJob> {
        let st = self.state.lock().await;
        st.find(job_id).cloned()
    }

    /// Snapshot of the active queue: current job first, then pending in
    /// FIFO order. Safe to iterate without holding any lock.
    pub async fn list_all(&self) -> Vec<DownloadJob> {
        let st = self.state.lock().await;
        let mut jobs = Vec::with_capacity(st.pending.len() + 1);
        if let Some(current) = &st.current {
            jobs.push(current.clone());
        }
        jobs.extend(st.pending.iter().cloned());
        jobs
    }

    /// Stop pulling new jobs from the queue.
    ///
    /// A currently running job is marked paused but its executor call is
    /// left to finish on its own; the worker keeps waiting for it.
    pub async fn pause(&self) {
        let event = {
            let mut st = self.state.lock().await;
            st.paused = true;
            match st.current.as_mut() {
                Some(current) if current.status == JobStatus::Downloading => {
                    current.status = JobStatus::Paused;
                    Some(QueueEvent::paused(&current.id))
                }
                _ => None,
            }
        };

        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        info!("queue paused");
    }

    /// Resume processing, restarting the worker if it has exited
    pub async fn resume(&self) {
        let event = {
            let mut st = self.state.lock().await;
            st.paused = false;
            match st.current.as_mut() {
                Some(current) if current.status == JobStatus::Paused => {
                    current.status = JobStatus::Downloading;
                    Some(QueueEvent::resumed(&current.id))
                }
                _ => None,
            }
        };

        self.stop.store(false, Ordering::SeqCst);
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        info!("queue resumed");

        self.ensure_worker().await;
    }

    /// Put a job back in line: status reset to queued, progress and error
    /// cleared, moved to the tail of the pending order. Unknown ids and the
    /// currently running job are ignored.
    pub async fn retry(&self, job_id: &str) {
        let event = {
            let mut st = self.state.lock().await;

            if st.current.as_ref().is_some_and(|c| c.id == job_id) {
                warn!("retry ignored, job {} is running", short_id(job_id));
                return;
            }

            let job = if let Some(pos) = st.pending.iter().position(|j| j.id == job_id) {
                st.pending.remove(pos)
            } else if let Some(pos) = st.finished.iter().position(|j| j.id == job_id) {
                Some(st.finished.remove(pos))
            } else {
                None
            };

            match job {
                Some(mut job) => {
                    job.reset_for_retry();
                    let event = QueueEvent::queued(&job);
                    st.pending.push_back(job);
                    event
                }
                None => {
                    warn!("retry ignored, job {} not found", short_id(job_id));
                    return;
                }
            }
        };

        let _ = self.events.send(event);
        info!("job {} requeued for retry", short_id(job_id));

        self.ensure_worker().await;
    }

    /// Remove a job. A pending or finished job is deleted outright; the
    /// currently running job is marked cancelled and the worker is
    /// signalled to abandon it at its next poll (the executor call itself
    /// is not killed). Returns false for unknown ids.
    pub async fn remove(&self, job_id: &str) -> bool {
        let event = {
            let mut st = self.state.lock().await;

            if let Some(pos) = st.pending.iter().position(|j| j.id == job_id) {
                st.pending.remove(pos);
                Some(QueueEvent::removed(job_id))
            } else if st.current.as_ref().is_some_and(|c| c.id == job_id) {
                if let Some(current) = st.current.as_mut() {
                    current.status = JobStatus::Cancelled;
                }
                self.stop.store(true, Ordering::SeqCst);
                Some(QueueEvent::cancelled(job_id))
            } else if let Some(pos) = st.finished.iter().position(|j| j.id == job_id) {
                st.finished.remove(pos);
                Some(QueueEvent::removed(job_id))
            } else {
                None
            }
        };

        match event {
            Some(event) => {
                let _ = self.events.send(event);
                info!("job {} removed", short_id(job_id));
                true
            }
            None => false,
        }
    }

    /// Drop completed jobs from the pending order and the finished list.
    /// Returns how many were removed.
    pub async fn clear_completed(&self) -> usize {
        let removed = {
            let mut st = self.state.lock().await;
            let before = st.pending.len() + st.finished.len();
            st.pending.retain(|job| job.status != JobStatus::Completed);
            st.finished.retain(|job| job.status != JobStatus::Completed);
            before - st.pending.len() - st.finished.len()
        };

        info!("cleared {} completed jobs", removed);
        removed
    }

    /// Spawn the worker task if none is running
    async fn ensure_worker(&self) {
        let mut slot = self.worker.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        self.stop.store(false, Ordering::SeqCst);
        let worker = Worker {
            state: Arc::clone(&self.state),
            stop: Arc::clone(&self.stop),
            executor: Arc::clone(&self.executor),
            events: self.events.clone(),
        };
        *slot = Some(tokio::spawn(worker.run()));
        debug!("queue worker spawned");
    }
}

/// The single background control loop that drains the queue
struct Worker {
    state: Arc<Mutex<QueueState>>,
    stop: Arc<AtomicBool>,
    executor: Arc<dyn JobExecutor>,
    events: broadcast::Sender<QueueEvent>,
}

impl Worker {
    async fn run(self) {
        debug!("queue worker started");
        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            {
                let st = self.state.lock().await;
                if st.paused {
                    drop(st);
                    time::sleep(PAUSE_POLL_INTERVAL).await;
                    continue;
                }
            }

            let job = {
                let mut st = self.state.lock().await;
                match st.pending.pop_front() {
                    Some(job) => {
                        st.current = Some(job.clone());
                        job
                    }
                    None => break,
                }
            };

            // Cancelled while still queued: drop it without invoking the executor
            if matches!(job.status, JobStatus::Cancelled) {
                self.state.lock().await.current = None;
                continue;
            }

            self.process_job(job).await;
        }
        debug!("queue worker finished");
    }

    /// Run one job through the executor and wait for its outcome.
    ///
    /// The executor runs on its own task; we wait in bounded ticks so the
    /// stop signal and paused flag are observed mid-flight.
    async fn process_job(&self, job: DownloadJob) {
        let job_id = job.id.clone();

        {
            let mut st = self.state.lock().await;
            if let Some(current) = st.current.as_mut() {
                current.status = JobStatus::Downloading;
            }
        }
        let _ = self.events.send(QueueEvent::started(&job_id));
        info!("download started: {} ({})", job.title, short_id(&job_id));

        let request = ExecuteRequest {
            url: job.url.clone(),
            output_dir: job.output_dir.clone(),
            mode: job.mode,
        };
        let (progress_tx, mut progress_rx) =
            mpsc::channel::<ProgressUpdate>(PROGRESS_CHANNEL_CAPACITY);
        let executor = Arc::clone(&self.executor);
        let mut handle = tokio::spawn(async move { executor.execute(request, progress_tx).await });

        let mut progress_open = true;
        loop {
            tokio::select! {
                result = &mut handle => {
                    // Apply progress still sitting in the channel before
                    // closing the job out
                    while let Ok(update) = progress_rx.try_recv() {
                        self.apply_progress(&job_id, update).await;
                    }
                    self.finish_job(&job_id, result).await;
                    return;
                }
                update = progress_rx.recv(), if progress_open => {
                    match update {
                        Some(update) => self.apply_progress(&job_id, update).await,
                        None => progress_open = false,
                    }
                }
                _ = time::sleep(DONE_POLL_INTERVAL) => {
                    if self.stop.load(Ordering::SeqCst) {
                        // Cooperative cancellation: the executor keeps
                        // running detached and its eventual result is
                        // discarded.
                        self.drop_current(&job_id).await;
                        return;
                    }
                }
            }
        }
    }

    /// Apply the executor's outcome to the current job and retire it
    async fn finish_job(
        &self,
        job_id: &str,
        result: Result<anyhow::Result<ExecuteOutcome>, JoinError>,
    ) {
        let event = {
            let mut st = self.state.lock().await;
            let mut job = match st.current.take() {
                Some(job) if job.id == job_id => job,
                other => {
                    st.current = other;
                    return;
                }
            };

            // Removed while in flight: the late result is a no-op
            if matches!(job.status, JobStatus::Cancelled) {
                debug!("discarding result of cancelled job {}", short_id(job_id));
                return;
            }

            let event = match result {
                Ok(Ok(outcome)) => {
                    job.status = JobStatus::Completed;
                    job.progress = 100.0;
                    job.file_path = Some(outcome.file_path.clone());
                    info!(
                        "download completed: {} -> {}",
                        short_id(job_id),
                        outcome.file_path.display()
                    );
                    QueueEvent::completed(job_id, outcome.file_path, &outcome.message)
                }
                Ok(Err(e)) => {
                    let message = e.to_string();
                    job.status = JobStatus::Failed(message.clone());
                    job.progress = 0.0;
                    warn!("download failed: {} ({})", message, short_id(job_id));
                    QueueEvent::failed(job_id, &message)
                }
                Err(e) => {
                    // The executor task itself died; the queue moves on
                    let message = format!("download task died: {e}");
                    job.status = JobStatus::Failed(message.clone());
                    job.progress = 0.0;
                    error!("{}", message);
                    QueueEvent::failed(job_id, &message)
                }
            };

            st.push_finished(job);
            event
        };

        let _ = self.events.send(event);
    }

    /// Record a progress report against the current job
    async fn apply_progress(&self, job_id: &str, update: ProgressUpdate) {
        let percent = {
            let mut st = self.state.lock().await;
            match st.current.as_mut() {
                Some(current) if current.id == job_id && !current.status.is_terminal() => {
                    current.record_progress(update.percent);
                    current.progress
                }
                // Stale report for a job that is no longer ours
                _ => return,
            }
        };

        let _ = self
            .events
            .send(QueueEvent::progress(job_id, percent, &update.message));
    }

    /// Forget the cancelled current job; remove() already emitted its event
    async fn drop_current(&self, job_id: &str) {
        let mut st = self.state.lock().await;
        if st.current.as_ref().is_some_and(|c| c.id == job_id) {
            st.current = None;
            debug!("abandoned cancelled job {}", short_id(job_id));
        }
    }
}

/// First 8 characters of a job id, for log lines
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
