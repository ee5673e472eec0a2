//! Service-oriented application context.
//!
//! [`AppContext`] is the central struct shared across all route handlers via
//! Axum state. It owns the handles every ingest needs (store, queue, flight
//! registry) and is cheap to clone.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use wn_av::{OutputFormat, Transcoder};
use wn_core::config::Config;
use wn_store::ContentStore;

use crate::flight::FlightRegistry;
use crate::ingest::Ingested;
use crate::queue::{JobQueue, JobRunner, WorkerPool, WorkerStatus};
use crate::stats::Stats;

/// Application context shared by all request handlers (via Axum state).
///
/// This is cheaply cloneable because it only holds `Arc`s and channel
/// handles.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    /// Content-addressed store of normalized entries.
    pub store: ContentStore,
    /// Producer side of the job queue.
    pub queue: JobQueue,
    /// Worker pool view for stats.
    pub workers: WorkerStatus,
    /// In-process flights keyed by content.
    pub flights: Arc<FlightRegistry<Ingested>>,
    /// Outcome counters.
    pub stats: Arc<Stats>,
    /// Output format every entry is produced in.
    pub format: OutputFormat,
}

impl AppContext {
    /// Open the store, recover orphaned claims if configured, and start the
    /// worker pool.
    ///
    /// Workers run until `workers_cancel` fires; the caller owns the returned
    /// [`WorkerPool`] and joins it at shutdown.
    pub async fn build(
        config: Config,
        transcoder: Arc<dyn Transcoder>,
        workers_cancel: CancellationToken,
    ) -> wn_core::Result<(Self, WorkerPool)> {
        let store = ContentStore::open(config.storage.dir.clone()).await?;
        tracing::info!("Content store at {}", store.root().display());

        if config.storage.recover_on_start {
            match store.recover_orphaned_claims().await? {
                Some(0) => {}
                Some(removed) => {
                    tracing::warn!(removed, "Removed orphaned claim markers from a previous run");
                }
                None => tracing::info!("Store is shared with another running process; skipping recovery"),
            }
        }

        let format = OutputFormat::mono(config.normalize.sample_rate);
        let (queue, jobs) = JobQueue::bounded(config.workers.effective_capacity());
        let runner = JobRunner::new(transcoder, config.storage.scratch_dir(), format);
        let pool = WorkerPool::spawn(
            config.workers.effective_count(),
            jobs,
            runner,
            workers_cancel,
        );

        let ctx = Self {
            config: Arc::new(config),
            store,
            queue,
            workers: pool.status(),
            flights: Arc::new(FlightRegistry::default()),
            stats: Arc::new(Stats::default()),
            format,
        };

        Ok((ctx, pool))
    }
}
