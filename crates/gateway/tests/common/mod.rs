#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use ch_domain::config::Config;
use ch_domain::error::{Error, Result};
use ch_domain::model::{LlmSettings, MemorySearchSettings, Persona, Personality, SystemPrompt};
use ch_gateway::bootstrap::{self, BackgroundTasks, Components};
use ch_gateway::state::AppState;
use ch_memory::{InMemoryVectorStore, VectorMemoryProvider};
use ch_providers::{ChatRequest, ChatResponse, LlmProvider, ProviderRegistry};
use ch_store::{InMemoryHistoryStore, InMemoryRepository};

// ── scripted provider ───────────────────────────────────────────────

/// Replies with a fixed text once a permit is available. `open()` lets
/// every call through; `closed()` holds calls until `release` is called.
pub struct GatedProvider {
    reply: std::result::Result<&'static str, bool>,
    gate: Semaphore,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl GatedProvider {
    pub fn open(reply: &'static str) -> Arc<Self> {
        Self::build(Ok(reply), Semaphore::MAX_PERMITS)
    }

    pub fn closed(reply: &'static str) -> Arc<Self> {
        Self::build(Ok(reply), 0)
    }

    /// Every call fails with a provider error of the given retryability.
    pub fn failing(retryable: bool) -> Arc<Self> {
        Self::build(Err(retryable), Semaphore::MAX_PERMITS)
    }

    fn build(reply: std::result::Result<&'static str, bool>, permits: usize) -> Arc<Self> {
        Arc::new(Self {
            reply,
            gate: Semaphore::new(permits),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    /// Poll until `n` calls have started.
    pub async fn wait_for_calls(&self, n: usize) {
        for _ in 0..400 {
            if self.calls() >= n {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("provider saw {} calls, expected {n}", self.calls());
    }
}

#[async_trait::async_trait]
impl LlmProvider for GatedProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(req.clone());

        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| Error::Other(e.to_string()))?;
        permit.forget();

        match self.reply {
            Ok(text) => Ok(ChatResponse {
                content: text.to_string(),
                usage: None,
                model: req.model.clone().unwrap_or_default(),
                finish_reason: Some("stop".into()),
            }),
            Err(retryable) => Err(Error::Provider {
                provider: "openai".into(),
                message: "HTTP 429 - slow down".into(),
                retryable,
            }),
        }
    }

    fn provider_id(&self) -> &str {
        "openai"
    }
}

// ── fixtures ────────────────────────────────────────────────────────

/// Personality `P` with its own prompt and settings; user `U` whose
/// default persona is Lila.
pub fn repository() -> Arc<InMemoryRepository> {
    let repo = InMemoryRepository::new();
    repo.upsert_system_prompt(SystemPrompt {
        id: "sp-p".into(),
        name: "P default".into(),
        content: "You are the keeper of the tide tables.".into(),
    });
    repo.upsert_llm_settings(LlmSettings {
        id: "llm-p".into(),
        name: "P default".into(),
        model: "openai/gpt-4o".into(),
        temperature: Some(0.7),
        top_p: None,
        max_tokens: Some(400),
        frequency_penalty: None,
        presence_penalty: None,
        memory: MemorySearchSettings::default(),
    });
    repo.upsert_personality(Personality {
        id: "P".into(),
        name: "tidekeeper".into(),
        display_name: "The Tidekeeper".into(),
        character: Default::default(),
        system_prompt_id: Some("sp-p".into()),
        llm_settings_id: Some("llm-p".into()),
    });
    repo.upsert_persona(Persona {
        id: "lila".into(),
        owner_user_id: "U".into(),
        name: "Lila".into(),
        preferred_name: None,
        pronouns: Some("she/her".into()),
        content: "Keeps the lighthouse on the north cape.".into(),
    });
    repo.set_default_persona("U", "lila").expect("persona exists");
    Arc::new(repo)
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.pipeline.worker_concurrency = 2;
    config.pipeline.poll_interval_ms = 5;
    config.pipeline.poll_max_interval_ms = 50;
    config
}

pub struct Pipeline {
    pub state: AppState,
    pub provider: Arc<GatedProvider>,
    pub history: Arc<InMemoryHistoryStore>,
    pub memory: Arc<InMemoryVectorStore>,
    pub background: BackgroundTasks,
}

/// Build and start the full pipeline around `provider`.
pub fn start(config: Config, provider: Arc<GatedProvider>) -> Pipeline {
    let history = Arc::new(InMemoryHistoryStore::new());
    let memory = Arc::new(InMemoryVectorStore::new());
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());

    let state = bootstrap::assemble(
        Arc::new(config),
        Components {
            repository: repository(),
            history: history.clone(),
            memory: Some(memory.clone() as Arc<dyn VectorMemoryProvider>),
            llm: Arc::new(registry),
        },
    );
    let background = bootstrap::spawn_background_tasks(&state, CancellationToken::new());

    Pipeline {
        state,
        provider,
        history,
        memory,
        background,
    }
}
