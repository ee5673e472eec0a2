//! Process-lifetime ingest counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::ingest::Status;

/// Outcome counters, updated once per finished request.
#[derive(Debug, Default)]
pub struct Stats {
    done: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    joined: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct StatsSnapshot {
    /// Requests that transcoded and finalized a new entry.
    pub done: u64,
    /// Requests answered from an existing or concurrently produced entry.
    pub skipped: u64,
    /// Requests that ended in an error after validation.
    pub failed: u64,
    /// Requests that waited on another request's in-flight normalization.
    pub joined: u64,
}

impl Stats {
    pub fn record(&self, status: Status) {
        let counter = match status {
            Status::Done => &self.done,
            Status::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_join(&self) {
        self.joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            done: self.done.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_outcomes() {
        let stats = Stats::default();
        stats.record(Status::Done);
        stats.record(Status::Skipped);
        stats.record(Status::Skipped);
        stats.record_failure();
        stats.record_join();

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                done: 1,
                skipped: 2,
                failed: 1,
                joined: 1,
            }
        );
    }
}
