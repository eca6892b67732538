use serde::{Deserialize, Serialize};

/// Shared error type used across all Chorus crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider {
        provider: String,
        message: String,
        /// Rate limits, upstream 5xx and transport hiccups are retryable;
        /// malformed responses and rejected requests are not.
        retryable: bool,
    },

    #[error("vector memory: {0}")]
    Memory(String),

    #[error("store: {0}")]
    Store(String),

    #[error("no persona for user {user_id}")]
    PersonaNotFound { user_id: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("schema mismatch in {path}: {message}")]
    Schema { path: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether retrying the same call later could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Provider { retryable, .. } => *retryable,
            Error::Http(_) | Error::Timeout(_) => true,
            _ => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generation failures (recorded on jobs, returned to callers)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The closed set of failures a `submit` caller can observe.
///
/// Duplicate suppression and degraded memory are deliberately absent:
/// neither is an error from the caller's point of view.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationError {
    /// The LLM call itself failed.
    #[error("provider error ({provider}): {detail}")]
    ProviderError {
        provider: String,
        detail: String,
        retryable: bool,
    },

    /// Persona resolution or a hard data dependency failed before the
    /// provider was called.
    #[error("context build failed: {detail}")]
    ContextBuildError { detail: String },

    /// The waiting side gave up. Says nothing about the worker.
    #[error("timed out after {waited_ms}ms waiting for job {job_id}")]
    Timeout { job_id: String, waited_ms: u64 },

    /// The job could not be handed to the worker pool.
    #[error("queue error: {detail}")]
    QueueError { detail: String },

    #[error("internal error: {detail}")]
    Internal { detail: String },
}

impl GenerationError {
    /// Short machine-readable tag, matches the serde `kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProviderError { .. } => "provider_error",
            Self::ContextBuildError { .. } => "context_build_error",
            Self::Timeout { .. } => "timeout",
            Self::QueueError { .. } => "queue_error",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderError { retryable, .. } => *retryable,
            Self::Timeout { .. } | Self::QueueError { .. } => true,
            Self::ContextBuildError { .. } | Self::Internal { .. } => false,
        }
    }

    /// Classify a failure raised while building the context.
    ///
    /// Everything before the provider call is a context failure, whatever
    /// the underlying cause.
    pub fn context(err: &Error) -> Self {
        Self::ContextBuildError {
            detail: err.to_string(),
        }
    }

    /// Classify a failure raised by the provider call.
    pub fn provider(provider: &str, err: &Error) -> Self {
        match err {
            Error::Provider {
                provider,
                message,
                retryable,
            } => Self::ProviderError {
                provider: provider.clone(),
                detail: message.clone(),
                retryable: *retryable,
            },
            other => Self::ProviderError {
                provider: provider.to_owned(),
                detail: other.to_string(),
                retryable: other.is_retryable(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_keeps_retryability() {
        let err = Error::Provider {
            provider: "openai".into(),
            message: "HTTP 429".into(),
            retryable: true,
        };
        let gen = GenerationError::provider("fallback", &err);
        assert!(gen.is_retryable());
        match gen {
            GenerationError::ProviderError { provider, .. } => assert_eq!(provider, "openai"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn transport_failure_is_retryable_provider_error() {
        let gen = GenerationError::provider("openai", &Error::Timeout("read".into()));
        assert_eq!(gen.kind(), "provider_error");
        assert!(gen.is_retryable());
    }

    #[test]
    fn context_error_is_not_retryable() {
        let gen = GenerationError::context(&Error::PersonaNotFound {
            user_id: "u1".into(),
        });
        assert_eq!(gen.kind(), "context_build_error");
        assert!(!gen.is_retryable());
    }

    #[test]
    fn generation_error_serializes_with_kind_tag() {
        let gen = GenerationError::Timeout {
            job_id: "j1".into(),
            waited_ms: 120_000,
        };
        let json = serde_json::to_value(&gen).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["waited_ms"], 120_000);
    }
}
