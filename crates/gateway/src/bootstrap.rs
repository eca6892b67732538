//! AppState construction and background-task spawning extracted from `main.rs`.
//!
//! `serve` and `run` share [`build_app_state`]; only `serve` calls
//! [`spawn_background_tasks`] with a long-lived shutdown token, `run` starts
//! the same tasks for the duration of one request.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ch_contextpack::{ConfigResolver, ContextBuilder};
use ch_domain::config::{Config, ConfigSeverity};
use ch_jobs::{InMemoryDedupCache, InMemoryJobQueue, InMemoryJobStore};
use ch_memory::{create_provider as create_memory_provider, MemoryRecallService, VectorMemoryProvider};
use ch_providers::ProviderRegistry;
use ch_store::{ConfigRepository, HistoryRepository, InMemoryRepository, JsonSnapshotStore, JsonlHistoryStore};
use ch_worker::{JobProcessor, WorkerPool, WorkerPoolHandle};

use crate::orchestrator::{GenerationOrchestrator, WaitPolicy};
use crate::scheduler::Maintenance;
use crate::state::AppState;

/// The externally backed pieces of the pipeline. Everything else is
/// derived from these and the config.
pub struct Components {
    pub repository: Arc<dyn ConfigRepository>,
    pub history: Arc<dyn HistoryRepository>,
    /// `None` disables recall and write-back.
    pub memory: Option<Arc<dyn VectorMemoryProvider>>,
    pub llm: Arc<ProviderRegistry>,
}

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if Config::has_errors(&issues) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Configuration repository ─────────────────────────────────────
    let repository: Arc<dyn ConfigRepository> = match &config.store.snapshot_path {
        Some(path) => {
            let store = JsonSnapshotStore::load(path)
                .with_context(|| format!("loading config snapshot {}", path.display()))?;
            tracing::info!(path = %path.display(), "config snapshot loaded");
            Arc::new(store)
        }
        None => {
            tracing::warn!("no store.snapshot_path configured; starting with an empty repository");
            Arc::new(InMemoryRepository::new())
        }
    };

    // ── Conversation history ─────────────────────────────────────────
    let history: Arc<dyn HistoryRepository> = Arc::new(
        JsonlHistoryStore::with_cache_capacity(&config.store.history_dir, config.store.history_cache_conversations)
            .with_context(|| format!("opening history dir {}", config.store.history_dir.display()))?,
    );
    tracing::info!(dir = %config.store.history_dir.display(), "history store ready");

    // ── Long-term memory ─────────────────────────────────────────────
    let memory = create_memory_provider(&config.memory).context("creating vector memory client")?;

    // ── LLM providers ────────────────────────────────────────────────
    let llm = Arc::new(ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?);
    tracing::info!(providers = ?llm.list_providers(), "LLM providers ready");

    let mut state = assemble(
        config.clone(),
        Components {
            repository,
            history,
            memory,
            llm,
        },
    );
    state.api_token_hash = read_api_token_hash(&config);
    Ok(state)
}

/// Wire the pipeline around already-constructed components.
pub fn assemble(config: Arc<Config>, components: Components) -> AppState {
    let pipeline = &config.pipeline;

    let recall = Arc::new(MemoryRecallService::from_config(
        components.memory.clone(),
        &config.memory,
    ));
    let resolver = ConfigResolver::new(components.repository, config.system_defaults.clone());
    let builder = Arc::new(ContextBuilder::new(
        resolver,
        components.history.clone(),
        recall,
        config.context.clone(),
    ));

    // A job nobody finished is dropped once no waiter can still be on it.
    let jobs = Arc::new(InMemoryJobStore::new(
        pipeline.job_retention(),
        pipeline.job_timeout() + pipeline.job_retention(),
    ));
    let in_flight = jobs.clone();
    let dedup = Arc::new(
        InMemoryDedupCache::new(pipeline.dedup_ttl())
            .with_in_flight_check(Arc::new(move |job_id: &str| in_flight.is_in_flight(job_id))),
    );
    let queue = Arc::new(InMemoryJobQueue::new(pipeline.queue_visibility_timeout()));

    let write_back = if config.memory.enabled {
        components.memory.clone()
    } else {
        None
    };
    let processor = Arc::new(JobProcessor::new(
        jobs.clone(),
        builder,
        components.llm.clone(),
        components.history,
        write_back,
        pipeline.history_window,
    ));

    let orchestrator = Arc::new(GenerationOrchestrator::new(
        dedup.clone(),
        jobs.clone(),
        queue.clone(),
        WaitPolicy::from_config(pipeline),
        pipeline.job_retention(),
    ));

    AppState {
        config,
        orchestrator,
        memory: components.memory,
        llm: components.llm,
        dedup,
        jobs,
        queue,
        processor,
        api_token_hash: None,
    }
}

/// Read the API token from the env var named in the config and hash it.
fn read_api_token_hash(config: &Config) -> Option<Vec<u8>> {
    let env_name = &config.server.api_token_env;
    match std::env::var(env_name) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env = %env_name, "API bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env = %env_name,
                "API token not set; /v1/* endpoints are unauthenticated (dev mode)"
            );
            None
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Worker pool plus maintenance scheduler.
pub struct BackgroundTasks {
    shutdown: CancellationToken,
    workers: WorkerPoolHandle,
    maintenance: JoinHandle<()>,
}

impl BackgroundTasks {
    /// Stop taking new jobs, let in-flight ones finish, stop the scheduler.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.workers.shutdown().await;
        if let Err(e) = self.maintenance.await {
            tracing::error!(error = %e, "maintenance task panicked");
        }
    }
}

/// Start the worker pool and the maintenance scheduler.
pub fn spawn_background_tasks(state: &AppState, shutdown: CancellationToken) -> BackgroundTasks {
    let pipeline = &state.config.pipeline;

    let workers = WorkerPool::new(
        state.queue.clone(),
        state.processor.clone(),
        pipeline.worker_concurrency,
    )
    .start(shutdown.child_token());

    let maintenance = Maintenance::new(
        state.dedup.clone(),
        state.jobs.clone(),
        state.queue.clone(),
        state.orchestrator.clone(),
    )
    .spawn(pipeline.tick_interval(), shutdown.child_token());

    tracing::info!("background tasks spawned");
    BackgroundTasks {
        shutdown,
        workers,
        maintenance,
    }
}
