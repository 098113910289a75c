//! REST surface (`SPEC_FULL.md` §6): enqueue, inspect, and cancel operations;
//! admin-only sync interval configuration and monitoring snapshots.

use crate::auth::{Authenticated, AuthenticatedAdmin};
use crate::error::ApiError;
use crate::jobs::{EnqueueOptions, JobId, JobSchedule, OperationType};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: JobId,
}

/// `POST /api/operations/{type}`
///
/// # Errors
/// `400` if `type` is not a recognized operation, any `QueueError` bubbles up
/// through [`ApiError`].
pub async fn enqueue_operation(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    Path(op_type): Path<String>,
    Json(body): Json<EnqueueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let operation = OperationType::from_str(&op_type)
        .map_err(|err| ApiError::Validation(err.to_string()))?;

    let job_id = state
        .queue
        .enqueue(
            claims.user_id(),
            operation,
            body.payload,
            EnqueueOptions { idempotency_key: body.idempotency_key, priority_override: None },
        )
        .await?;

    info!(%job_id, user_id = claims.user_id(), %operation, "operation enqueued");
    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse { job_id })))
}

#[derive(Debug, Serialize)]
pub struct JobStateResponse {
    #[serde(flatten)]
    pub job: crate::jobs::JobEnvelope,
}

/// `GET /api/operations/{jobId}`
///
/// # Errors
/// `404` if the job doesn't exist or belongs to another user.
pub async fn get_operation(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    Path(job_id): Path<JobId>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .queue
        .get(job_id)
        .await?
        .filter(|job| job.user_id == claims.user_id())
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;

    Ok(Json(JobStateResponse { job }))
}

/// `POST /api/operations/{jobId}/cancel`
///
/// # Errors
/// `404` if the job doesn't exist, belongs to another user, or has already
/// reached a terminal state.
pub async fn cancel_operation(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    Path(job_id): Path<JobId>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .queue
        .get(job_id)
        .await?
        .filter(|job| job.user_id == claims.user_id())
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;

    if job.state.is_active() {
        // Job-id-keyed, distinct from `AgentLock`'s preemption callback, so
        // this is classified as `CancelReason::UserCancelled` rather than
        // being mistaken for a preemption and requeued.
        state.cancellation.cancel_job(&job_id);
    }
    let removed = state.queue.cancel(job_id).await?;

    Ok(Json(serde_json::json!({ "cancelled": removed || job.state.is_active() })))
}

/// Admin-configurable scheduled sync intervals, in minutes, keyed by
/// `OperationType::key()`. A real deployment would persist this; here it's
/// process-local state shared across requests.
#[derive(Default)]
pub struct SyncIntervals {
    intervals: RwLock<std::collections::HashMap<String, JobSchedule>>,
}

pub type SharedSyncIntervals = Arc<SyncIntervals>;

#[derive(Debug, Serialize)]
pub struct SyncIntervalEntry {
    pub operation: String,
    pub description: String,
}

/// `GET /api/sync/intervals` (admin-only)
pub async fn list_sync_intervals(
    State(intervals): State<SharedSyncIntervals>,
    AuthenticatedAdmin(_claims): AuthenticatedAdmin,
) -> impl IntoResponse {
    let guard = intervals.intervals.read().await;
    let entries: Vec<_> = guard
        .iter()
        .map(|(operation, schedule)| SyncIntervalEntry {
            operation: operation.clone(),
            description: schedule.description(),
        })
        .collect();
    Json(entries)
}

#[derive(Debug, Deserialize)]
pub struct SetSyncIntervalRequest {
    pub minutes: u32,
}

/// `POST /api/sync/intervals/{type}` (admin-only). Clamps to the
/// 5-1440 minute admin-configurable range.
///
/// # Errors
/// `400` if `type` is not a `sync-*` operation.
pub async fn set_sync_interval(
    State(intervals): State<SharedSyncIntervals>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
    Path(op_type): Path<String>,
    Json(body): Json<SetSyncIntervalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let operation = OperationType::from_str(&op_type)
        .map_err(|err| ApiError::Validation(err.to_string()))?;
    if !matches!(operation, OperationType::Sync(_)) {
        return Err(ApiError::Validation(format!("{operation} is not a scheduled sync operation")));
    }

    let schedule = JobSchedule::every_minutes(body.minutes);
    intervals.intervals.write().await.insert(operation.key().to_string(), schedule.clone());

    info!(admin = claims.user_id(), %operation, minutes = body.minutes, "sync interval updated");
    Ok(Json(SyncIntervalEntry { operation: operation.key().to_string(), description: schedule.description() }))
}

#[derive(Debug, Serialize)]
pub struct MonitoringStatus {
    pub active_locks: usize,
    pub tracked_users: usize,
}

/// `GET /api/sync/monitoring/status` (admin-only): a coarse health snapshot.
/// Per-sync-type history is intentionally out of scope (no persistence
/// layer is part of this crate's Non-goals).
pub async fn monitoring_status(
    State(state): State<AppState>,
    AuthenticatedAdmin(_claims): AuthenticatedAdmin,
) -> impl IntoResponse {
    Json(MonitoringStatus {
        active_locks: state.lock.active_count(),
        tracked_users: state.hub.tracked_user_count(),
    })
}
