//! `GET /health` — liveness plus a vector-store check. Public.
//!
//! The gateway is up as long as it answers; a failing memory check only
//! downgrades `status` to `degraded` because recall degrades gracefully.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (memory, degraded) = match &state.memory {
        None => (serde_json::json!({ "enabled": false }), false),
        Some(provider) => match provider.health().await {
            Ok(detail) => (
                serde_json::json!({ "enabled": true, "healthy": true, "detail": detail }),
                false,
            ),
            Err(e) => {
                tracing::warn!(error = %e, "memory health check failed");
                (
                    serde_json::json!({ "enabled": true, "healthy": false, "error": e.to_string() }),
                    true,
                )
            }
        },
    };

    Json(serde_json::json!({
        "status": if degraded { "degraded" } else { "ok" },
        "version": env!("CARGO_PKG_VERSION"),
        "memory": memory,
        "providers": state.llm.list_providers(),
        "worker_concurrency": state.config.pipeline.worker_concurrency,
    }))
}
