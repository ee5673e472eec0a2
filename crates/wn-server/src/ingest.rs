//! Ingest orchestration for one accepted upload.
//!
//! Hash the payload, then either answer from the store, follow another
//! request's in-flight normalization, or claim the key and run a job. Every
//! claim taken here is finalized or abandoned before [`ingest`] returns.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use wn_core::{CancelScope, ContentKey, Error};
use wn_store::{Claim, ClaimOutcome, ContentStore, StoredEntry};

use crate::context::AppContext;
use crate::flight::Flight;
use crate::queue::Job;

/// A validated upload.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Client-supplied file name, echoed back.
    pub filename: String,
    /// Lower-cased extension with leading dot.
    pub extension: String,
    pub payload: Bytes,
}

/// How a request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// This request transcoded and finalized the entry.
    Done,
    /// The entry already existed or was produced by a concurrent request.
    Skipped,
}

/// Result of a successful ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub key: ContentKey,
    pub status: Status,
    pub file_name: String,
    /// `None` only when answering optimistically while another attempt is
    /// still running.
    pub size_bytes: Option<u64>,
    /// Digest of the output, when it was hashed by this request's flight.
    pub sha256: Option<String>,
}

impl Ingested {
    fn stored(entry: &StoredEntry) -> Self {
        Self {
            key: entry.key.clone(),
            status: Status::Skipped,
            file_name: entry.file_name.clone(),
            size_bytes: Some(entry.size_bytes),
            sha256: None,
        }
    }

    fn skipped(self) -> Self {
        Self {
            status: Status::Skipped,
            ..self
        }
    }
}

/// Run the full ingest for `upload` within `scope`.
pub async fn ingest(ctx: &AppContext, upload: &Upload, scope: &CancelScope) -> wn_core::Result<Ingested> {
    let key = ContentKey::of(&upload.payload);
    tracing::debug!(file_id = %key, size = upload.payload.len(), "Ingesting upload");

    let result = settle(ctx, &key, upload, scope).await;
    match &result {
        Ok(ingested) => ctx.stats.record(ingested.status),
        Err(_) => ctx.stats.record_failure(),
    }
    result
}

async fn settle(
    ctx: &AppContext,
    key: &ContentKey,
    upload: &Upload,
    scope: &CancelScope,
) -> wn_core::Result<Ingested> {
    loop {
        match ctx.flights.join(key) {
            Flight::Follower(follow) => {
                ctx.stats.record_join();
                if !ctx.config.normalize.wait_for_inflight {
                    return optimistic_skip(ctx, key).await;
                }

                tracing::debug!(file_id = %key, "Joining in-flight normalization");
                match scope.run(follow.outcome()).await? {
                    Some(Ok(ingested)) => return Ok(ingested.skipped()),
                    Some(Err(shared)) => return Err(Error::Shared(shared)),
                    None => {
                        tracing::debug!(file_id = %key, "Leader went away; retrying");
                        continue;
                    }
                }
            }
            Flight::Leader(lead) => {
                return match lead_flight(ctx, key, upload, scope).await {
                    Ok(ingested) => {
                        lead.complete(Ok(ingested.clone()));
                        Ok(ingested)
                    }
                    // Only this request went away. Dropping the lead sends
                    // followers back to the top.
                    Err(Error::Canceled) => Err(Error::Canceled),
                    Err(err) => {
                        let shared = Arc::new(err);
                        lead.complete(Err(Arc::clone(&shared)));
                        Err(Error::Shared(shared))
                    }
                };
            }
        }
    }
}

async fn lead_flight(
    ctx: &AppContext,
    key: &ContentKey,
    upload: &Upload,
    scope: &CancelScope,
) -> wn_core::Result<Ingested> {
    if let Some(entry) = ctx.store.entry(key).await? {
        tracing::debug!(file_id = %key, "Already normalized");
        return Ok(Ingested::stored(&entry));
    }

    loop {
        match ctx.store.try_claim(key).await? {
            ClaimOutcome::Stored(entry) => return Ok(Ingested::stored(&entry)),
            ClaimOutcome::Acquired(claim) => return run_claimed(ctx, claim, upload, scope).await,
            ClaimOutcome::Held if !ctx.config.normalize.wait_for_inflight => {
                return optimistic_skip(ctx, key).await;
            }
            ClaimOutcome::Held => {
                if let Some(entry) = wait_for_foreign_claim(ctx, key, scope).await? {
                    return Ok(Ingested::stored(&entry));
                }
                tracing::debug!(file_id = %key, "Foreign claim released; claiming again");
            }
        }
    }
}

/// Submit a job for a claimed key and settle the claim with its result.
async fn run_claimed(
    ctx: &AppContext,
    claim: Claim,
    upload: &Upload,
    scope: &CancelScope,
) -> wn_core::Result<Ingested> {
    let job_scope = CancelScope::child_of(scope.token(), ctx.config.workers.job_timeout());
    let (job, handle) = Job::new(
        claim.key().clone(),
        upload.extension.clone(),
        upload.payload.clone(),
        claim.path().to_path_buf(),
        job_scope,
    );
    let job_id = handle.id();

    if let Err(e) = ctx.queue.submit(job).await {
        ctx.store.abandon(claim).await;
        return Err(e);
    }

    match handle.wait().await {
        Ok(output) => {
            let entry = ctx.store.finalize(claim).await?;
            tracing::info!(
                job_id = %job_id,
                file_id = %entry.key,
                size_bytes = entry.size_bytes,
                "Normalized"
            );
            Ok(Ingested {
                key: entry.key,
                status: Status::Done,
                file_name: entry.file_name,
                size_bytes: Some(entry.size_bytes),
                sha256: Some(output.sha256),
            })
        }
        Err(e) => {
            ctx.store.abandon(claim).await;
            Err(e)
        }
    }
}

/// Wait on a claim held outside this process.
///
/// `Some(entry)` once it is finalized, `None` once it is released without an
/// entry. The scope's deadline surfaces as [`Error::ClaimTimeout`].
async fn wait_for_foreign_claim(
    ctx: &AppContext,
    key: &ContentKey,
    scope: &CancelScope,
) -> wn_core::Result<Option<StoredEntry>> {
    tracing::info!(file_id = %key, "Claim held outside this process; waiting");
    let poll = ctx.config.normalize.claim_poll_interval();

    match scope.run(poll_foreign_claim(&ctx.store, key, poll)).await {
        Ok(settled) => settled,
        Err(Error::TimedOut { after }) => Err(Error::ClaimTimeout {
            key: key.to_string(),
            waited: after,
        }),
        Err(e) => Err(e),
    }
}

async fn poll_foreign_claim(
    store: &ContentStore,
    key: &ContentKey,
    poll: std::time::Duration,
) -> wn_core::Result<Option<StoredEntry>> {
    loop {
        tokio::time::sleep(poll).await;
        if let Some(entry) = store.entry(key).await? {
            return Ok(Some(entry));
        }
        if !store.claim_held(key).await? {
            return Ok(None);
        }
    }
}

/// Answer "skipped" without waiting for the attempt in progress.
async fn optimistic_skip(ctx: &AppContext, key: &ContentKey) -> wn_core::Result<Ingested> {
    let size_bytes = ctx.store.entry(key).await?.map(|e| e.size_bytes);
    Ok(Ingested {
        key: key.clone(),
        status: Status::Skipped,
        file_name: ContentStore::entry_name(key),
        size_bytes,
        sha256: None,
    })
}
