use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use ch_contextpack::{ConfigResolver, ContextBuilder};
use ch_domain::config::{ContextConfig, SystemDefaultsConfig};
use ch_domain::error::{Error, GenerationError, Result};
use ch_domain::model::{LlmSettings, MemorySearchSettings, Persona, Personality};
use ch_domain::request::GenerationRequest;
use ch_jobs::{
    fingerprint, InMemoryJobQueue, InMemoryJobStore, Job, JobMessage, JobQueue, JobStatus, JobStore,
};
use ch_memory::{InMemoryVectorStore, MemoryRecallService, VectorMemoryProvider};
use ch_providers::{ChatRequest, ChatResponse, LlmProvider, ProviderRegistry, Usage};
use ch_store::{HistoryRepository, InMemoryHistoryStore, InMemoryRepository};
use ch_worker::{JobProcessor, ProcessOutcome, WorkerPool};

// ── test doubles ────────────────────────────────────────────────────

enum Script {
    Reply(&'static str),
    Fail { retryable: bool },
    /// Wait for the gate, then reply.
    Gated(Arc<Notify>),
    Slow(Duration),
}

struct ScriptedProvider {
    script: Script,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let outcome = match &self.script {
            Script::Reply(text) => Ok(text.to_string()),
            Script::Fail { retryable } => Err(Error::Provider {
                provider: "openai".into(),
                message: "HTTP 503 - overloaded".into(),
                retryable: *retryable,
            }),
            Script::Gated(gate) => {
                gate.notified().await;
                Ok("eventually".to_string())
            }
            Script::Slow(d) => {
                tokio::time::sleep(*d).await;
                Ok("slow reply".to_string())
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        outcome.map(|content| ChatResponse {
            content,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 3,
                total_tokens: 13,
            }),
            model: req.model.clone().unwrap_or_default(),
            finish_reason: Some("stop".into()),
        })
    }

    fn provider_id(&self) -> &str {
        "openai"
    }
}

// ── harness ─────────────────────────────────────────────────────────

struct Harness {
    jobs: Arc<InMemoryJobStore>,
    history: Arc<InMemoryHistoryStore>,
    memory: Arc<InMemoryVectorStore>,
    provider: Arc<ScriptedProvider>,
    processor: Arc<JobProcessor>,
}

fn repo() -> Arc<InMemoryRepository> {
    let repo = InMemoryRepository::new();
    repo.upsert_llm_settings(LlmSettings {
        id: "llm-captain".into(),
        name: "captain".into(),
        model: "openai/gpt-4o".into(),
        temperature: Some(0.7),
        top_p: None,
        max_tokens: None,
        frequency_penalty: None,
        presence_penalty: None,
        memory: MemorySearchSettings::default(),
    });
    repo.upsert_personality(Personality {
        id: "captain".into(),
        name: "captain".into(),
        display_name: "The Captain".into(),
        character: Default::default(),
        system_prompt_id: None,
        llm_settings_id: Some("llm-captain".into()),
    });
    repo.upsert_persona(Persona {
        id: "lila".into(),
        owner_user_id: "u1".into(),
        name: "Lila".into(),
        preferred_name: None,
        pronouns: None,
        content: "Keeps the lighthouse.".into(),
    });
    repo.set_default_persona("u1", "lila").unwrap();
    Arc::new(repo)
}

fn harness(script: Script) -> Harness {
    let jobs = Arc::new(InMemoryJobStore::new(Duration::from_secs(600), Duration::from_secs(900)));
    let history = Arc::new(InMemoryHistoryStore::new());
    let memory = Arc::new(InMemoryVectorStore::new());
    let provider = ScriptedProvider::new(script);

    let recall = Arc::new(MemoryRecallService::new(
        Some(memory.clone() as Arc<dyn VectorMemoryProvider>),
        Duration::from_secs(10),
        Duration::from_secs(1),
    ));
    let resolver = ConfigResolver::new(repo(), SystemDefaultsConfig::default());
    let builder = Arc::new(ContextBuilder::new(
        resolver,
        history.clone(),
        recall,
        ContextConfig::default(),
    ));
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());

    let processor = Arc::new(JobProcessor::new(
        jobs.clone(),
        builder,
        Arc::new(registry),
        history.clone(),
        Some(memory.clone() as Arc<dyn VectorMemoryProvider>),
        20,
    ));

    Harness {
        jobs,
        history,
        memory,
        provider,
        processor,
    }
}

async fn enqueue(jobs: &InMemoryJobStore, id: &str, user: &str, text: &str) {
    let request = GenerationRequest::new("C", "captain", user, text);
    let job = Job::new(id.into(), fingerprint(&request), request, Utc::now());
    assert!(jobs.create(job).await.unwrap());
}

// ── processor ───────────────────────────────────────────────────────

#[tokio::test]
async fn successful_job_completes_and_writes_back() {
    let h = harness(Script::Reply("Aye, I'm here."));
    enqueue(&h.jobs, "j1", "u1", "hi, are you there?").await;

    assert_eq!(h.processor.process("j1").await, ProcessOutcome::Completed);

    let job = h.jobs.get("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.unwrap();
    assert_eq!(result.result_text, "Aye, I'm here.");
    assert_eq!(result.model_used, "gpt-4o");

    let history = h.history.recent("C", "captain", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "Aye, I'm here.");
    assert_eq!(history[1].content, "hi, are you there?");

    // Memory ingest is detached; give it a moment.
    for _ in 0..50 {
        if !h.memory.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.memory.len(), 1);
}

#[tokio::test]
async fn redelivered_job_is_skipped() {
    let h = harness(Script::Reply("once"));
    enqueue(&h.jobs, "j1", "u1", "hello").await;

    assert_eq!(h.processor.process("j1").await, ProcessOutcome::Completed);
    assert_eq!(
        h.processor.process("j1").await,
        ProcessOutcome::Skipped(JobStatus::Completed)
    );
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn unknown_job_is_missing() {
    let h = harness(Script::Reply("never"));
    assert_eq!(h.processor.process("nope").await, ProcessOutcome::Missing);
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn provider_failure_is_recorded_with_retryability() {
    let h = harness(Script::Fail { retryable: true });
    enqueue(&h.jobs, "j1", "u1", "hello").await;

    assert_eq!(h.processor.process("j1").await, ProcessOutcome::Failed);

    let job = h.jobs.get("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    match job.error.unwrap() {
        GenerationError::ProviderError {
            provider, retryable, ..
        } => {
            assert_eq!(provider, "openai");
            assert!(retryable);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.history.recent("C", "captain", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_persona_fails_before_the_provider_is_called() {
    let h = harness(Script::Reply("never"));
    enqueue(&h.jobs, "j1", "nobody", "hello").await;

    assert_eq!(h.processor.process("j1").await, ProcessOutcome::Failed);

    let job = h.jobs.get("j1").await.unwrap().unwrap();
    assert!(matches!(job.error, Some(GenerationError::ContextBuildError { .. })));
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn completion_after_eviction_is_ignored() {
    let gate = Arc::new(Notify::new());
    let h = harness(Script::Gated(gate.clone()));
    enqueue(&h.jobs, "j1", "u1", "hello").await;

    let processor = h.processor.clone();
    let running = tokio::spawn(async move { processor.process("j1").await });

    // Wait until the job is claimed, then evict it from under the worker.
    for _ in 0..100 {
        if h.provider.calls() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.jobs.evict("j1").await.unwrap());
    gate.notify_one();

    assert_eq!(running.await.unwrap(), ProcessOutcome::Superseded);
    assert!(h.jobs.get("j1").await.unwrap().is_none());
    assert!(h.history.recent("C", "captain", 10).await.unwrap().is_empty());
}

// ── pool ────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_processes_queue_within_its_concurrency() {
    let h = harness(Script::Slow(Duration::from_millis(40)));
    let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(300)));

    for i in 0..8 {
        let id = format!("j{i}");
        enqueue(&h.jobs, &id, "u1", &format!("message {i}")).await;
        queue.publish(JobMessage { job_id: id }).await.unwrap();
    }

    let pool = WorkerPool::new(queue.clone(), h.processor.clone(), 3);
    let handle = pool.start(CancellationToken::new());

    for i in 0..8 {
        let job = tokio::time::timeout(Duration::from_secs(5), h.jobs.wait_terminal(&format!("j{i}")))
            .await
            .expect("job did not finish")
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    handle.shutdown().await;
    assert_eq!(h.provider.calls(), 8);
    assert!(h.provider.max_in_flight.load(Ordering::SeqCst) <= 3);
    assert_eq!(queue.in_flight_len(), 0);
}

#[tokio::test]
async fn shutdown_stops_idle_workers() {
    let h = harness(Script::Reply("unused"));
    let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new(Duration::from_secs(300)));
    let handle = WorkerPool::new(queue, h.processor.clone(), 5).start(CancellationToken::new());

    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .expect("idle workers should stop promptly");
}
