//! `chorus run` — one-shot submission.
//!
//! Boots the same pipeline as `serve` without the HTTP listener, submits a
//! single message, prints the reply and exits. Useful for scripting and
//! for checking a snapshot and provider setup end to end.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ch_domain::config::Config;
use ch_domain::request::GenerationRequest;

use crate::bootstrap;

pub async fn run(
    config: Arc<Config>,
    channel: String,
    personality: String,
    user: String,
    message: String,
    json_output: bool,
) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config).await?;
    let background = bootstrap::spawn_background_tasks(&state, CancellationToken::new());

    let request = GenerationRequest::new(channel, personality, user, message);
    let outcome = state.orchestrator.submit(request).await;
    background.shutdown().await;

    match outcome.result {
        Ok(result) if json_output => {
            let json = serde_json::json!({
                "job_id": outcome.job_id,
                "result_text": result.result_text,
                "model_used": result.model_used,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
            Ok(())
        }
        Ok(result) => {
            println!("{}", result.result_text);
            eprintln!("\x1b[2m[{} · job {}]\x1b[0m", result.model_used, outcome.job_id);
            Ok(())
        }
        Err(error) => {
            if json_output {
                let json = serde_json::json!({ "job_id": outcome.job_id, "error": error });
                println!("{}", serde_json::to_string_pretty(&json)?);
            }
            anyhow::bail!("{} ({})", error, error.kind())
        }
    }
}
