//! Generation endpoint.
//!
//! - `POST /v1/generate` — submit one inbound message and wait for the reply
//!
//! The caller either names the acting `user_id` directly or passes the raw
//! sender with the platform metadata, in which case relay indirection is
//! resolved here before the pipeline sees the request.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use ch_domain::error::GenerationError;
use ch_domain::identity::{resolve_acting_identity, IdentityResolution, MessageMetadata};
use ch_domain::request::GenerationRequest;

use crate::orchestrator::SubmitOutcome;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub channel_id: String,
    pub personality_id: String,
    /// Already-resolved acting user. Takes precedence over `sender_id`.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image_refs: Vec<String>,
}

pub async fn generate(State(state): State<AppState>, Json(body): Json<GenerateBody>) -> Response {
    let request = match into_request(body) {
        Ok(r) => r,
        Err(rejection) => return rejection,
    };

    let outcome = state.orchestrator.submit(request).await;
    outcome_response(outcome)
}

fn into_request(body: GenerateBody) -> Result<GenerationRequest, Response> {
    if body.channel_id.trim().is_empty() || body.personality_id.trim().is_empty() {
        return Err(bad_request("channel_id and personality_id are required"));
    }
    if body.text.trim().is_empty() && body.image_refs.is_empty() {
        return Err(bad_request("text or image_refs must be non-empty"));
    }

    let user_id = match (body.user_id, body.sender_id) {
        (Some(user), _) if !user.trim().is_empty() => user,
        (_, Some(sender)) => match resolve_acting_identity(&sender, &body.metadata) {
            IdentityResolution::Resolved(identity) => identity.user_id,
            IdentityResolution::Unresolvable(reason) => {
                return Err((
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(serde_json::json!({
                        "error": {
                            "kind": "unresolvable_identity",
                            "detail": reason,
                            "retryable": false,
                        }
                    })),
                )
                    .into_response())
            }
        },
        _ => return Err(bad_request("user_id or sender_id is required")),
    };

    Ok(GenerationRequest::new(body.channel_id, body.personality_id, user_id, body.text)
        .with_images(body.image_refs))
}

fn outcome_response(outcome: SubmitOutcome) -> Response {
    match outcome.result {
        Ok(result) => Json(serde_json::json!({
            "job_id": outcome.job_id,
            "result_text": result.result_text,
            "model_used": result.model_used,
            "duplicate": outcome.duplicate,
        }))
        .into_response(),
        Err(error) => (
            error_status(&error),
            Json(serde_json::json!({
                "job_id": outcome.job_id,
                "duplicate": outcome.duplicate,
                "error": {
                    "kind": error.kind(),
                    "detail": error.to_string(),
                    "retryable": error.is_retryable(),
                }
            })),
        )
            .into_response(),
    }
}

pub(crate) fn error_status(error: &GenerationError) -> StatusCode {
    match error {
        GenerationError::ProviderError { .. } => StatusCode::BAD_GATEWAY,
        GenerationError::ContextBuildError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        GenerationError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        GenerationError::QueueError { .. } | GenerationError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}
