//! Per-provider API key lookup.
//!
//! Each registry entry resolves its own key once, at construction. The
//! candidates are tried in a fixed order and the first hit wins:
//!
//! 1. `auth.key`, inline in the config (logged as a warning)
//! 2. the OS keychain entry `auth.service` / `auth.account`
//! 3. the env var named by `auth.env`
//! 4. `{SERVICE}_{ACCOUNT}` in the environment, for hosts without a keychain
//!
//! A keychain failure is not fatal; lookup moves on to the next candidate.

use std::fmt;

use ch_domain::config::{AuthConfig, AuthMode};
use ch_domain::error::{Error, Result};

/// Where a provider's key came from. Never carries the secret itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Inline,
    Keychain { service: String, account: String },
    Env(String),
    /// `{SERVICE}_{ACCOUNT}` derived from the keychain coordinates.
    HeadlessEnv(String),
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => f.write_str("inline"),
            Self::Keychain { service, account } => write!(f, "keychain:{service}/{account}"),
            Self::Env(name) => write!(f, "env:{name}"),
            Self::HeadlessEnv(name) => write!(f, "env:{name} (headless)"),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProviderKey {
    pub secret: String,
    pub source: KeySource,
}

impl fmt::Debug for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderKey")
            .field("secret", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// Secret backends. [`SystemSecrets`] in production.
pub trait SecretLookup {
    fn env(&self, name: &str) -> Option<String>;
    fn keychain(&self, service: &str, account: &str) -> std::result::Result<String, String>;
}

/// Process environment plus the OS keychain via `keyring`.
pub struct SystemSecrets;

impl SecretLookup for SystemSecrets {
    fn env(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }

    fn keychain(&self, service: &str, account: &str) -> std::result::Result<String, String> {
        keyring::Entry::new(service, account)
            .and_then(|entry| entry.get_password())
            .map_err(|e| e.to_string())
    }
}

/// `("chorus", "openai-api-key")` → `CHORUS_OPENAI_API_KEY`.
pub fn headless_env_name(service: &str, account: &str) -> String {
    format!("{service}_{account}").to_uppercase().replace('-', "_")
}

fn candidates(auth: &AuthConfig) -> Vec<KeySource> {
    let keychain = auth.service.as_ref().zip(auth.account.as_ref());

    let mut out = Vec::with_capacity(4);
    if auth.key.is_some() {
        out.push(KeySource::Inline);
    }
    if let Some((service, account)) = keychain {
        out.push(KeySource::Keychain {
            service: service.clone(),
            account: account.clone(),
        });
    }
    if let Some(name) = &auth.env {
        out.push(KeySource::Env(name.clone()));
    }
    if let Some((service, account)) = keychain {
        out.push(KeySource::HeadlessEnv(headless_env_name(service, account)));
    }
    out
}

/// Resolve the key for provider `provider_id`. Errors name the provider and
/// every place that was tried.
pub fn resolve_provider_key(provider_id: &str, auth: &AuthConfig, secrets: &dyn SecretLookup) -> Result<ProviderKey> {
    if auth.mode == AuthMode::Keychain && (auth.service.is_none() || auth.account.is_none()) {
        return Err(Error::Auth(format!(
            "provider '{provider_id}': keychain mode needs auth.service and auth.account"
        )));
    }

    let candidates = candidates(auth);
    if candidates.is_empty() {
        return Err(Error::Auth(format!(
            "provider '{provider_id}': no credentials configured (set auth.env, auth.key or auth.service + auth.account)"
        )));
    }

    for source in &candidates {
        let found = match source {
            KeySource::Inline => {
                tracing::warn!(
                    provider = provider_id,
                    "API key read from inline config; prefer auth.env or the keychain"
                );
                auth.key.clone()
            }
            KeySource::Keychain { service, account } => match secrets.keychain(service, account) {
                Ok(secret) => Some(secret),
                Err(e) => {
                    tracing::warn!(provider = provider_id, %service, %account, error = %e, "keychain lookup failed");
                    None
                }
            },
            KeySource::Env(name) | KeySource::HeadlessEnv(name) => secrets.env(name),
        };

        if let Some(secret) = found {
            tracing::debug!(provider = provider_id, source = %source, "API key resolved");
            return Ok(ProviderKey {
                secret,
                source: source.clone(),
            });
        }
    }

    let tried: Vec<String> = candidates.iter().map(ToString::to_string).collect();
    Err(Error::Auth(format!(
        "provider '{provider_id}': no API key found (tried {})",
        tried.join(", ")
    )))
}
