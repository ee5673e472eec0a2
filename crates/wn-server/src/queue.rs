//! Bounded job queue and the worker pool that drains it.
//!
//! Handlers submit a [`Job`] and await its [`JobHandle`]; a fixed set of
//! workers dequeues jobs, runs one normalize attempt each and sends exactly
//! one result back. Submission waits while the queue is full, so a burst of
//! uploads slows down producers instead of being rejected.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wn_av::{normalize, NormalizeRequest, NormalizedOutput, OutputFormat, Transcoder};
use wn_core::{CancelScope, ContentKey, Error, JobId};

/// What a worker sends back for one job.
pub type JobResult = wn_core::Result<NormalizedOutput>;

/// One normalize attempt for a claimed key.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub key: ContentKey,
    /// Source extension with leading dot, lower-cased.
    pub extension: String,
    pub payload: Bytes,
    /// Claim marker path the transcoder writes into.
    pub output: PathBuf,
    pub scope: CancelScope,
    reply: oneshot::Sender<JobResult>,
}

impl Job {
    pub fn new(
        key: ContentKey,
        extension: impl Into<String>,
        payload: Bytes,
        output: PathBuf,
        scope: CancelScope,
    ) -> (Self, JobHandle) {
        let (reply, rx) = oneshot::channel();
        let id = JobId::new();
        let job = Self {
            id,
            key,
            extension: extension.into(),
            payload,
            output,
            scope,
            reply,
        };
        (job, JobHandle { id, rx })
    }
}

/// Receiving end of a job's result.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    rx: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Wait for the worker's result.
    ///
    /// A job dropped without a result (worker panic, or the pool shut down
    /// while it was still queued) yields [`Error::Internal`].
    pub async fn wait(self) -> JobResult {
        self.rx.await.unwrap_or_else(|_| {
            Err(Error::Internal(format!(
                "job {} was dropped before completing",
                self.id
            )))
        })
    }
}

/// Producer side of the bounded queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

/// Consumer side of the queue, shared by every worker.
#[derive(Debug, Clone)]
pub struct JobReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` waiting jobs.
    pub fn bounded(capacity: usize) -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self { tx },
            JobReceiver {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }

    /// Enqueue `job`, waiting for space while the queue is full.
    ///
    /// Gives up with the scope's error if the job's scope ends first; the
    /// job is dropped unsent in that case.
    pub async fn submit(&self, job: Job) -> wn_core::Result<()> {
        let scope = job.scope.clone();
        let job_id = job.id;

        tokio::select! {
            biased;
            sent = self.tx.send(job) => {
                sent.map_err(|_| Error::Internal("job queue is closed".into()))
            }
            err = scope.done() => {
                tracing::debug!(job_id = %job_id, "gave up waiting for queue space: {err}");
                Err(err)
            }
        }
    }

    /// Jobs currently waiting.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl JobReceiver {
    async fn recv(&self) -> Option<Job> {
        self.rx.lock().await.recv().await
    }
}

/// Runs dequeued jobs against a transcoder.
pub struct JobRunner {
    transcoder: Arc<dyn Transcoder>,
    scratch_dir: PathBuf,
    format: OutputFormat,
}

impl JobRunner {
    pub fn new(transcoder: Arc<dyn Transcoder>, scratch_dir: PathBuf, format: OutputFormat) -> Self {
        Self {
            transcoder,
            scratch_dir,
            format,
        }
    }

    /// Run `job` and deliver its result.
    async fn execute(&self, job: Job) {
        let started = Instant::now();
        tracing::info!(job_id = %job.id, file_id = %job.key, "Processing job");

        let result = normalize(
            self.transcoder.as_ref(),
            NormalizeRequest {
                key: &job.key,
                extension: &job.extension,
                payload: &job.payload,
                output: &job.output,
                scratch_dir: &self.scratch_dir,
                format: self.format,
                scope: &job.scope,
            },
        )
        .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(out) => tracing::info!(
                job_id = %job.id,
                size_bytes = out.size_bytes,
                elapsed_ms,
                "Job completed"
            ),
            Err(e) => tracing::warn!(job_id = %job.id, elapsed_ms, "Job failed: {e}"),
        }

        if job.reply.send(result).is_err() {
            tracing::debug!(job_id = %job.id, "Requester went away before the result arrived");
        }
    }
}

/// Shared view of the pool for the stats endpoint.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    count: usize,
    busy: Arc<AtomicUsize>,
}

impl WorkerStatus {
    pub fn count(&self) -> usize {
        self.count
    }

    /// Workers currently executing a job.
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::Relaxed)
    }
}

/// The running workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    status: WorkerStatus,
}

impl WorkerPool {
    /// Spawn `count` workers draining `jobs` until `cancel` fires.
    pub fn spawn(
        count: usize,
        jobs: JobReceiver,
        runner: JobRunner,
        cancel: CancellationToken,
    ) -> Self {
        let count = count.max(1);
        let runner = Arc::new(runner);
        let busy = Arc::new(AtomicUsize::new(0));

        let handles = (0..count)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    jobs.clone(),
                    Arc::clone(&runner),
                    Arc::clone(&busy),
                    cancel.clone(),
                ))
            })
            .collect();

        tracing::info!(workers = count, "Worker pool started");
        Self {
            handles,
            status: WorkerStatus { count, busy },
        }
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.clone()
    }

    /// Wait for every worker to exit. Call after canceling the pool's token.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed: {e}");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

/// Worker loop: dequeue, execute to completion, repeat.
async fn run_worker(
    worker: usize,
    jobs: JobReceiver,
    runner: Arc<JobRunner>,
    busy: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    tracing::debug!(worker, "Worker started");

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.recv() => job,
        };
        let Some(job) = job else {
            break;
        };

        busy.fetch_add(1, Ordering::Relaxed);
        let runner = Arc::clone(&runner);
        // A panicking transcoder loses its job, not the worker.
        if let Err(e) = tokio::spawn(async move { runner.execute(job).await }).await {
            tracing::error!(worker, "Job task panicked: {e}");
        }
        busy.fetch_sub(1, Ordering::Relaxed);
    }

    tracing::debug!(worker, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Writes a fixed body, optionally after a delay bounded by the scope.
    #[derive(Default)]
    struct Fake {
        calls: AtomicU32,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Transcoder for Fake {
        fn name(&self) -> &str {
            "fake"
        }

        async fn transcode(
            &self,
            _input: &Path,
            output: &Path,
            _format: &OutputFormat,
            scope: &CancelScope,
        ) -> wn_core::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                scope.run(tokio::time::sleep(delay)).await?;
            }
            tokio::fs::write(output, b"RIFF....WAVE").await?;
            Ok(())
        }
    }

    fn job(dir: &Path, name: &str, scope: CancelScope) -> (Job, JobHandle) {
        Job::new(
            ContentKey::of(name.as_bytes()),
            ".wav",
            Bytes::from(name.to_string()),
            dir.join(format!("{name}.wav.tmp")),
            scope,
        )
    }

    fn scope() -> CancelScope {
        CancelScope::new(Duration::from_secs(5))
    }

    fn pool(dir: &Path, fake: Arc<Fake>, count: usize) -> (JobQueue, WorkerPool, CancellationToken) {
        let (queue, jobs) = JobQueue::bounded(4);
        let cancel = CancellationToken::new();
        let runner = JobRunner::new(fake, dir.join("scratch"), OutputFormat::mono(16_000));
        let pool = WorkerPool::spawn(count, jobs, runner, cancel.clone());
        (queue, pool, cancel)
    }

    #[tokio::test]
    async fn submit_blocks_while_full() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, jobs) = JobQueue::bounded(1);

        let (first, _h1) = job(dir.path(), "a", scope());
        queue.submit(first).await.unwrap();
        assert_eq!(queue.depth(), 1);
        assert_eq!(queue.capacity(), 1);

        let (second, _h2) = job(dir.path(), "b", scope());
        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.submit(second).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished(), "submit must wait for space");

        let drained = jobs.recv().await.unwrap();
        assert_eq!(drained.key, ContentKey::of(b"a"));
        producer.await.unwrap().unwrap();
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn submit_gives_up_when_scope_ends() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _jobs) = JobQueue::bounded(1);
        let (first, _h1) = job(dir.path(), "a", scope());
        queue.submit(first).await.unwrap();

        let canceled = scope();
        let (second, _h2) = job(dir.path(), "b", canceled.clone());
        canceled.cancel();
        assert!(matches!(queue.submit(second).await, Err(Error::Canceled)));

        let short = CancelScope::new(Duration::from_millis(30));
        let (third, _h3) = job(dir.path(), "c", short);
        assert!(matches!(
            queue.submit(third).await,
            Err(Error::TimedOut { .. })
        ));
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn closed_queue_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, jobs) = JobQueue::bounded(1);
        drop(jobs);
        let (j, _h) = job(dir.path(), "a", scope());
        assert!(matches!(queue.submit(j).await, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn workers_reply_once_per_job() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(Fake::default());
        let (queue, pool, cancel) = pool(dir.path(), fake.clone(), 2);
        assert_eq!(pool.status().count(), 2);

        let mut handles = Vec::new();
        for name in ["a", "b", "c"] {
            let (j, h) = job(dir.path(), name, scope());
            queue.submit(j).await.unwrap();
            handles.push(h);
        }
        for h in handles {
            let out = h.wait().await.unwrap();
            assert_eq!(out.size_bytes, 12);
        }
        assert_eq!(fake.calls.load(Ordering::SeqCst), 3);

        cancel.cancel();
        pool.join().await;
    }

    #[tokio::test]
    async fn canceled_job_skips_transcoder() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(Fake::default());
        let (queue, pool, cancel) = pool(dir.path(), fake.clone(), 1);

        let s = scope();
        s.cancel();
        let (j, h) = job(dir.path(), "a", s);
        queue.submit(j).await.unwrap();

        assert!(matches!(h.wait().await, Err(Error::Canceled)));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);

        cancel.cancel();
        pool.join().await;
    }

    #[tokio::test]
    async fn deadline_and_cancel_are_reported_distinctly() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(Fake {
            calls: AtomicU32::new(0),
            delay: Some(Duration::from_secs(30)),
        });
        let (queue, pool, cancel) = pool(dir.path(), fake, 2);

        let (slow, timed_out) = job(dir.path(), "a", CancelScope::new(Duration::from_millis(50)));
        queue.submit(slow).await.unwrap();

        let s = scope();
        let (abandoned, canceled) = job(dir.path(), "b", s.clone());
        queue.submit(abandoned).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        s.cancel();

        assert!(matches!(
            timed_out.wait().await,
            Err(Error::TimedOut { .. })
        ));
        assert!(matches!(canceled.wait().await, Err(Error::Canceled)));

        cancel.cancel();
        pool.join().await;
    }

    #[tokio::test]
    async fn queued_job_dropped_at_shutdown_reports_internal() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, jobs) = JobQueue::bounded(2);
        let (j, h) = job(dir.path(), "a", scope());
        queue.submit(j).await.unwrap();
        drop(jobs);
        drop(queue);

        assert!(matches!(h.wait().await, Err(Error::Internal(_))));
    }
}
