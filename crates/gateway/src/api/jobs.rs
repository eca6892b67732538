//! Job inspection.
//!
//! - `GET /v1/jobs/:id` — shared job record, plus this gateway's own
//!   timeout marker if a waiter gave up on it

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use ch_jobs::JobStatus;

use crate::state::AppState;

pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let waiter_timed_out = state.orchestrator.local_status(&id) == Some(JobStatus::TimedOut);

    match state.jobs.get(&id).await {
        Ok(Some(job)) => Json(serde_json::json!({
            "job": job,
            "waiter_timed_out": waiter_timed_out,
        }))
        .into_response(),
        // Evicted, but a local waiter still remembers giving up on it.
        Ok(None) if waiter_timed_out => Json(serde_json::json!({
            "job": { "id": id, "status": JobStatus::TimedOut },
            "waiter_timed_out": true,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "job not found" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
