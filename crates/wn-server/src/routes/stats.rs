//! Queue, worker and outcome statistics.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::context::AppContext;
use crate::stats::StatsSnapshot;

/// Runtime statistics.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub queue: QueueStats,
    pub workers: WorkerStats,
    /// Content keys with a normalization in progress in this process.
    pub inflight: usize,
    pub totals: StatsSnapshot,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct WorkerStats {
    pub count: usize,
    pub busy: usize,
}

/// GET /api/stats
#[utoipa::path(
    get,
    path = "/api/stats",
    responses(
        (status = 200, description = "Queue, worker and outcome statistics", body = StatsResponse)
    )
)]
pub async fn stats(State(ctx): State<AppContext>) -> Json<StatsResponse> {
    Json(StatsResponse {
        queue: QueueStats {
            depth: ctx.queue.depth(),
            capacity: ctx.queue.capacity(),
        },
        workers: WorkerStats {
            count: ctx.workers.count(),
            busy: ctx.workers.busy(),
        },
        inflight: ctx.flights.len(),
        totals: ctx.stats.snapshot(),
    })
}
