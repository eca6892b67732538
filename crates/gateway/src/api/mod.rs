pub mod auth;
pub mod generate;
pub mod health;
pub mod jobs;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the API router.
///
/// `/health` is public; everything under `/v1` sits behind the bearer-token
/// middleware.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(health::health));

    let protected = Router::new()
        .route("/v1/generate", post(generate::generate))
        .route("/v1/jobs/:id", get(jobs::get_job))
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public.merge(protected)
}
