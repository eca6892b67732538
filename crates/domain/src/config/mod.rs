mod context;
mod defaults;
mod llm;
mod memory;
mod observability;
mod pipeline;
mod server;
mod store;

pub use context::*;
pub use defaults::*;
pub use llm::*;
pub use memory::*;
pub use observability::*;
pub use pipeline::*;
pub use server::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub system_defaults: SystemDefaultsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |severity, field: &str, message: &str| {
            errors.push(ConfigError {
                severity,
                field: field.into(),
                message: message.into(),
            })
        };

        if self.server.port == 0 {
            push(ConfigSeverity::Error, "server.port", "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            push(ConfigSeverity::Error, "server.host", "host must not be empty");
        }
        if self.server.max_concurrent_requests == 0 {
            push(
                ConfigSeverity::Error,
                "server.max_concurrent_requests",
                "must be greater than 0",
            );
        }
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*" {
            push(
                ConfigSeverity::Warning,
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            );
        }

        // ── pipeline ────────────────────────────────────────────────
        if self.pipeline.worker_concurrency == 0 {
            push(
                ConfigSeverity::Error,
                "pipeline.worker_concurrency",
                "at least one worker slot is required",
            );
        }
        if self.pipeline.job_timeout_secs == 0 {
            push(
                ConfigSeverity::Error,
                "pipeline.job_timeout_secs",
                "timeout must be greater than 0",
            );
        }
        if self.pipeline.dedup_ttl_secs == 0 {
            push(
                ConfigSeverity::Warning,
                "pipeline.dedup_ttl_secs",
                "a zero TTL disables duplicate suppression",
            );
        }
        if self.pipeline.poll_interval_ms == 0 {
            push(
                ConfigSeverity::Error,
                "pipeline.poll_interval_ms",
                "poll interval must be greater than 0",
            );
        }
        if self.pipeline.job_retention_secs < self.pipeline.dedup_ttl_secs {
            push(
                ConfigSeverity::Warning,
                "pipeline.job_retention_secs",
                "jobs may be evicted while their dedup reservation is still live",
            );
        }

        // ── memory ──────────────────────────────────────────────────
        if self.memory.enabled
            && self.memory.backend == MemoryBackend::Rest
            && self.memory.base_url.is_empty()
        {
            push(ConfigSeverity::Error, "memory.base_url", "base_url must not be empty");
        }
        if self.memory.enabled && self.memory.recall_timeout_ms == 0 {
            push(
                ConfigSeverity::Warning,
                "memory.recall_timeout_ms",
                "every recall will time out and run degraded",
            );
        }
        let threshold = self.system_defaults.memory.score_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            push(
                ConfigSeverity::Warning,
                "system_defaults.memory.score_threshold",
                "scores are usually in 0.0..=1.0",
            );
        }

        // ── llm ─────────────────────────────────────────────────────
        if self.llm.providers.is_empty() {
            push(ConfigSeverity::Warning, "llm.providers", "no LLM providers configured");
        }
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                push(
                    ConfigSeverity::Error,
                    format!("llm.providers[{i}].id").as_str(),
                    "provider id must not be empty",
                );
            }
            if provider.base_url.is_empty() {
                push(
                    ConfigSeverity::Error,
                    format!("llm.providers[{i}].base_url").as_str(),
                    "provider base_url must not be empty",
                );
            }
        }
        if self.system_defaults.model.trim().is_empty() {
            push(
                ConfigSeverity::Error,
                "system_defaults.model",
                "a system default model is required",
            );
        }

        // ── observability ───────────────────────────────────────────
        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            push(
                ConfigSeverity::Warning,
                "observability.sample_rate",
                "clamped into 0.0..=1.0",
            );
        }

        errors
    }

    /// True when any issue has `Error` severity.
    pub fn has_errors(issues: &[ConfigError]) -> bool {
        issues.iter().any(|e| e.severity == ConfigSeverity::Error)
    }
}
