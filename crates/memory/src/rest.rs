//! REST implementation of [`VectorMemoryProvider`].
//!
//! Wraps one pooled `reqwest::Client`, retries transient failures (5xx,
//! timeouts, connection errors) with exponential back-off and never
//! retries 4xx.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use uuid::Uuid;

use ch_domain::config::MemoryConfig;
use ch_domain::error::{Error, Result};
use ch_domain::trace::TraceEvent;

use crate::provider::VectorMemoryProvider;
use crate::types::{
    IngestResponse, MemoryHit, MemoryIngestRequest, MemorySearchRequest, MemorySearchResponse,
};

#[derive(Debug, Clone)]
pub struct RestVectorMemoryClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl RestVectorMemoryClient {
    pub fn new(cfg: &MemoryConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key: cfg.api_key.clone(),
            max_retries: cfg.max_retries,
        })
    }

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        let mut rb = rb
            .header("X-Client-Type", "chorus")
            .header("X-Trace-Id", Uuid::new_v4().to_string());
        if let Some(ref key) = self.api_key {
            rb = rb.header("X-Api-Key", key);
        }
        rb
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send with retry + exponential back-off.
    ///
    /// 5xx and transport errors are retried; 4xx returns immediately, with
    /// 401/403 mapped to `Error::Auth`. Every attempt emits a
    /// `VectorStoreCall` trace event.
    async fn execute_with_retry(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let start = Instant::now();
            let result = self.decorate(build_request()).send().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    TraceEvent::VectorStoreCall {
                        endpoint: endpoint.to_owned(),
                        status: status.as_u16(),
                        duration_ms,
                    }
                    .emit();

                    if status.is_server_error() {
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some(Error::Memory(format!("{endpoint} returned {status}: {body}")));
                        continue;
                    }

                    if status.is_client_error() {
                        let body = resp.text().await.unwrap_or_default();
                        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                            return Err(Error::Auth(format!("{endpoint} auth failed ({status}): {body}")));
                        }
                        return Err(Error::Memory(format!("{endpoint} returned {status}: {body}")));
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    TraceEvent::VectorStoreCall {
                        endpoint: endpoint.to_owned(),
                        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                        duration_ms,
                    }
                    .emit();
                    last_err = Some(from_reqwest(e));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Memory(format!("{endpoint}: all retries exhausted"))))
    }

    async fn parse<T: serde::de::DeserializeOwned>(resp: Response, what: &str) -> Result<T> {
        let body = resp.text().await.map_err(from_reqwest)?;
        serde_json::from_str(&body)
            .map_err(|e| Error::Memory(format!("failed to parse {what} response: {e}: {body}")))
    }
}

#[async_trait]
impl VectorMemoryProvider for RestVectorMemoryClient {
    async fn search(&self, req: MemorySearchRequest) -> Result<Vec<MemoryHit>> {
        let url = self.url("/api/memories/search");
        let resp = self
            .execute_with_retry("POST /api/memories/search", || self.http.post(&url).json(&req))
            .await?;
        let parsed: MemorySearchResponse = Self::parse(resp, "search").await?;
        Ok(parsed.memories)
    }

    async fn ingest(&self, req: MemoryIngestRequest) -> Result<IngestResponse> {
        let url = self.url("/api/memories");
        let resp = self
            .execute_with_retry("POST /api/memories", || self.http.post(&url).json(&req))
            .await?;
        Self::parse(resp, "ingest").await
    }

    async fn health(&self) -> Result<serde_json::Value> {
        let url = self.url("/health");
        let resp = self
            .execute_with_retry("GET /health", || self.http.get(&url))
            .await?;
        Self::parse(resp, "health").await
    }
}

/// Convert a `reqwest::Error` into a domain `Error`.
///
/// Timeouts become `Error::Timeout`; everything else `Error::Http`.
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
