//! Effective persona / system prompt / LLM settings for a request.
//!
//! Persona: per-(user, personality) override, then the user's default,
//! then [`Error::PersonaNotFound`]. System prompt and LLM settings resolve
//! independently: per-user override, then the personality's own template,
//! then the system default from config.
//!
//! Nothing is cached here; every call reads the repository's current state.

use std::sync::Arc;

use ch_domain::config::SystemDefaultsConfig;
use ch_domain::error::{Error, Result};
use ch_domain::model::{LlmSettings, Persona, Personality, SystemPrompt};
use ch_store::ConfigRepository;

use crate::report::ConfigSource;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub personality: Personality,
    pub persona: Persona,
    pub persona_source: ConfigSource,
    pub system_prompt: SystemPrompt,
    pub system_prompt_source: ConfigSource,
    pub llm_settings: LlmSettings,
    pub llm_settings_source: ConfigSource,
}

pub struct ConfigResolver {
    repo: Arc<dyn ConfigRepository>,
    defaults: SystemDefaultsConfig,
}

impl ConfigResolver {
    pub fn new(repo: Arc<dyn ConfigRepository>, defaults: SystemDefaultsConfig) -> Self {
        Self { repo, defaults }
    }

    pub fn repository(&self) -> &Arc<dyn ConfigRepository> {
        &self.repo
    }

    pub async fn resolve(&self, user_id: &str, personality_id: &str) -> Result<ResolvedConfig> {
        let personality = self
            .repo
            .personality(personality_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("personality '{personality_id}'")))?;

        let (persona, persona_source) = self.resolve_persona(user_id, personality_id).await?;
        let (system_prompt, system_prompt_source) = self.resolve_system_prompt(user_id, &personality).await?;
        let (llm_settings, llm_settings_source) = self.resolve_llm_settings(user_id, &personality).await?;

        tracing::debug!(
            user_id,
            personality_id,
            persona_id = %persona.id,
            ?persona_source,
            system_prompt_id = %system_prompt.id,
            ?system_prompt_source,
            llm_settings_id = %llm_settings.id,
            ?llm_settings_source,
            "config resolved"
        );

        Ok(ResolvedConfig {
            personality,
            persona,
            persona_source,
            system_prompt,
            system_prompt_source,
            llm_settings,
            llm_settings_source,
        })
    }

    async fn resolve_persona(&self, user_id: &str, personality_id: &str) -> Result<(Persona, ConfigSource)> {
        if let Some(p) = self.repo.persona_override(user_id, personality_id).await? {
            return Ok((p, ConfigSource::UserOverride));
        }
        if let Some(p) = self.repo.default_persona(user_id).await? {
            return Ok((p, ConfigSource::UserDefault));
        }
        Err(Error::PersonaNotFound {
            user_id: user_id.to_owned(),
        })
    }

    async fn resolve_system_prompt(
        &self,
        user_id: &str,
        personality: &Personality,
    ) -> Result<(SystemPrompt, ConfigSource)> {
        if let Some(p) = self.repo.user_system_prompt_override(user_id, &personality.id).await? {
            return Ok((p, ConfigSource::UserOverride));
        }
        match &personality.system_prompt_id {
            Some(id) => {
                let prompt = self.repo.system_prompt(id).await?.ok_or_else(|| {
                    Error::NotFound(format!(
                        "system prompt '{id}' referenced by personality '{}'",
                        personality.id
                    ))
                })?;
                Ok((prompt, ConfigSource::Personality))
            }
            None => Ok((self.defaults.system_prompt(), ConfigSource::SystemDefault)),
        }
    }

    async fn resolve_llm_settings(
        &self,
        user_id: &str,
        personality: &Personality,
    ) -> Result<(LlmSettings, ConfigSource)> {
        if let Some(s) = self.repo.user_llm_override(user_id, &personality.id).await? {
            return Ok((s, ConfigSource::UserOverride));
        }
        match &personality.llm_settings_id {
            Some(id) => {
                let settings = self.repo.llm_settings(id).await?.ok_or_else(|| {
                    Error::NotFound(format!(
                        "LLM settings '{id}' referenced by personality '{}'",
                        personality.id
                    ))
                })?;
                Ok((settings, ConfigSource::Personality))
            }
            None => Ok((self.defaults.llm_settings(), ConfigSource::SystemDefault)),
        }
    }
}
