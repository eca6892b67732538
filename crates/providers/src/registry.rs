//! Provider registry.
//!
//! Constructs and holds every configured LLM provider and resolves a model
//! spec (`provider_id/model_name`, or a bare model name) to a provider and
//! the model name to send it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ch_domain::config::{LlmConfig, LlmStartupPolicy, ProviderKind};
use ch_domain::error::{Error, Result};

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    /// First registered provider; receives bare model names.
    default_id: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from [`LlmConfig`].
    ///
    /// Providers that fail to initialize are logged and skipped; with
    /// `startup_policy = require_one` an empty result aborts startup.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut registry = Self::new();
        let timeout = Duration::from_millis(config.default_timeout_ms);

        for pc in &config.providers {
            let result: Result<Arc<dyn LlmProvider>> = match pc.kind {
                ProviderKind::OpenaiCompat => {
                    OpenAiCompatProvider::from_config(pc, timeout).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
            };

            match result {
                Ok(provider) => {
                    tracing::info!(provider_id = %pc.id, kind = ?pc.kind, "registered LLM provider");
                    registry.register(provider);
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %e,
                        "failed to initialize LLM provider, skipping"
                    );
                }
            }
        }

        if registry.is_empty() {
            if config.startup_policy == LlmStartupPolicy::RequireOne {
                return Err(Error::Config("no LLM provider initialized".into()));
            }
            tracing::warn!("no LLM providers initialized; jobs will fail until auth is configured");
        }

        Ok(registry)
    }

    /// Add a provider under its own id. The first one becomes the default.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let id = provider.provider_id().to_owned();
        if self.default_id.is_none() {
            self.default_id = Some(id.clone());
        }
        self.providers.insert(id, provider);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Resolve a model spec to `(provider, model_name)`.
    ///
    /// `openai/gpt-4o` goes to provider `openai` with model `gpt-4o`. When
    /// the prefix is not a registered provider id the whole spec is a model
    /// name for the default provider (model names may contain `/`).
    pub fn resolve(&self, model_spec: &str) -> Result<(Arc<dyn LlmProvider>, String)> {
        if let Some((prefix, model)) = model_spec.split_once('/') {
            if let Some(provider) = self.providers.get(prefix) {
                return Ok((provider.clone(), model.to_owned()));
            }
        }

        let provider = self
            .default_id
            .as_deref()
            .and_then(|id| self.providers.get(id))
            .ok_or_else(|| Error::Provider {
                provider: "registry".into(),
                message: format!("no LLM provider available for model '{model_spec}'"),
                retryable: false,
            })?;
        Ok((provider.clone(), model_spec.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// All registered provider ids (sorted).
    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}
