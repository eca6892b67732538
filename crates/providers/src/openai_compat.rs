//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, Together, and any other
//! endpoint that follows the OpenAI chat completions contract.

use std::time::Duration;

use serde_json::Value;

use ch_domain::config::{AuthMode, ProviderConfig};
use ch_domain::error::{Error, Result};
use ch_domain::message::{ContentPart, Message, MessageContent};

use crate::traits::{ChatRequest, ChatResponse, LlmProvider, Usage};
use crate::credentials::{resolve_provider_key, SystemSecrets};

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    /// `None` when the endpoint takes no credentials (local servers).
    auth_header: Option<(String, String)>,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider from its config entry. The API key is resolved here,
    /// once, so a missing credential fails at startup rather than per request.
    pub fn from_config(cfg: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let auth_header = match cfg.auth.mode {
            AuthMode::None => None,
            AuthMode::ApiKey | AuthMode::Keychain => {
                let key = resolve_provider_key(&cfg.id, &cfg.auth, &SystemSecrets)?.secret;
                let header = cfg.auth.header.clone().unwrap_or_else(|| "Authorization".into());
                let prefix = cfg.auth.prefix.clone().unwrap_or_else(|| "Bearer ".into());
                Some((header, format!("{prefix}{key}")))
            }
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            auth_header,
            default_model: cfg.default_model.clone().unwrap_or_else(|| "gpt-4o-mini".into()),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let rb = self.client.post(url).header("Content-Type", "application/json");
        match &self.auth_header {
            Some((name, value)) => rb.header(name, value),
            None => rb,
        }
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": messages,
            "stream": false,
        });

        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(top_p) = req.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(fp) = req.frequency_penalty {
            body["frequency_penalty"] = serde_json::json!(fp);
        }
        if let Some(pp) = req.presence_penalty {
            body["presence_penalty"] = serde_json::json!(pp);
        }
        body
    }

    fn provider_error(&self, message: String, retryable: bool) -> Error {
        Error::Provider {
            provider: self.id.clone(),
            message,
            retryable,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_openai(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(text) => serde_json::json!({
            "role": msg.role.as_str(),
            "content": text,
        }),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => serde_json::json!({ "type": "text", "text": text }),
                    ContentPart::Image { url, .. } => serde_json::json!({
                        "type": "image_url",
                        "image_url": { "url": url },
                    }),
                })
                .collect();
            serde_json::json!({ "role": msg.role.as_str(), "content": content })
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(body: &Value) -> std::result::Result<ChatResponse, String> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or("no choices in response")?;

    let message = choice.get("message").ok_or("no message in choice")?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .ok_or("message has no text content")?
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(ChatResponse {
        content,
        usage: body.get("usage").and_then(parse_usage),
        model,
        finish_reason,
    })
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

/// Rate limits and upstream failures may clear up; other 4xx will not.
fn status_is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req);

        tracing::debug!(provider = %self.id, url = %url, "openai_compat chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(self.provider_error(
                format!("HTTP {} - {}", status.as_u16(), resp_text),
                status_is_retryable(status),
            ));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)
            .map_err(|e| self.provider_error(format!("malformed response body: {e}"), false))?;
        parse_chat_response(&resp_json).map_err(|m| self.provider_error(m, false))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use ch_domain::config::AuthConfig;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn provider(base_url: String) -> OpenAiCompatProvider {
        let cfg = ProviderConfig {
            id: "local".into(),
            kind: Default::default(),
            base_url,
            auth: AuthConfig {
                mode: AuthMode::None,
                ..Default::default()
            },
            default_model: Some("tiny".into()),
        };
        OpenAiCompatProvider::from_config(&cfg, Duration::from_secs(5)).unwrap()
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![Message::system("be nice"), Message::user("hi")],
            temperature: Some(0.7),
            ..Default::default()
        }
    }

    #[test]
    fn body_includes_sampling_and_images() {
        let p = provider("http://unused".into());
        let mut req = request();
        req.top_p = Some(0.9);
        req.messages
            .push(Message::user_with_images("look", &["https://img/1.png".to_string()]));
        let body = p.build_chat_body(&req);

        assert_eq!(body["model"], "tiny");
        assert!((body["top_p"].as_f64().unwrap() - 0.9).abs() < 1e-6);
        assert!(body.get("max_tokens").is_none());
        let parts = body["messages"][2]["content"].as_array().unwrap();
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "https://img/1.png");
    }

    #[tokio::test]
    async fn parses_successful_completion() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                Json(serde_json::json!({
                    "model": "tiny-2026",
                    "choices": [{ "message": { "role": "assistant", "content": "hello!" }, "finish_reason": "stop" }],
                    "usage": { "prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12 }
                }))
            }),
        );
        let resp = provider(spawn(router).await).chat(&request()).await.unwrap();
        assert_eq!(resp.content, "hello!");
        assert_eq!(resp.model, "tiny-2026");
        assert_eq!(resp.usage.unwrap().total_tokens, 12);
    }

    #[tokio::test]
    async fn rate_limit_is_retryable() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (AxumStatus::TOO_MANY_REQUESTS, "slow down") }),
        );
        let err = provider(spawn(router).await).chat(&request()).await.unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }

    #[tokio::test]
    async fn bad_request_is_not_retryable() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (AxumStatus::BAD_REQUEST, "unknown model") }),
        );
        let err = provider(spawn(router).await).chat(&request()).await.unwrap_err();
        assert!(matches!(err, Error::Provider { retryable: false, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn malformed_body_is_not_retryable() {
        let router = Router::new().route("/chat/completions", post(|| async { "<html>oops</html>" }));
        let err = provider(spawn(router).await).chat(&request()).await.unwrap_err();
        match err {
            Error::Provider {
                provider,
                retryable,
                message,
            } => {
                assert_eq!(provider, "local");
                assert!(!retryable);
                assert!(message.contains("malformed"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
