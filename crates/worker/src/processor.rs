//! One job, start to finish.
//!
//! Claims the job with a `Queued → Processing` compare-and-set, builds the
//! context, calls the provider and records `Completed` or `Failed`. Nothing
//! here propagates an error to the caller: whatever goes wrong after the
//! claim ends up on the job record, so the queue never redelivers a job
//! whose side effects may already have happened.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use ch_contextpack::{ContextBuilder, PromptContext};
use ch_domain::error::GenerationError;
use ch_domain::model::{HistoryEntry, HistoryRole};
use ch_domain::request::GenerationResult;
use ch_domain::trace::TraceEvent;
use ch_jobs::{Job, JobPatch, JobStatus, JobStore, Transition};
use ch_memory::{MemoryIngestRequest, VectorMemoryProvider};
use ch_providers::{ChatRequest, ProviderRegistry};
use ch_store::HistoryRepository;

/// What happened to a job id handed to [`JobProcessor::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    Failed,
    /// Another delivery already claimed or finished the job.
    Skipped(JobStatus),
    /// The job is not in the store.
    Missing,
    /// The job was evicted while it ran; the terminal write went nowhere.
    Superseded,
}

pub struct JobProcessor {
    jobs: Arc<dyn JobStore>,
    builder: Arc<ContextBuilder>,
    providers: Arc<ProviderRegistry>,
    history: Arc<dyn HistoryRepository>,
    /// `None` disables memory write-back.
    memory: Option<Arc<dyn VectorMemoryProvider>>,
    history_window: usize,
}

impl JobProcessor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        builder: Arc<ContextBuilder>,
        providers: Arc<ProviderRegistry>,
        history: Arc<dyn HistoryRepository>,
        memory: Option<Arc<dyn VectorMemoryProvider>>,
        history_window: usize,
    ) -> Self {
        Self {
            jobs,
            builder,
            providers,
            history,
            memory,
            history_window,
        }
    }

    pub async fn process(&self, job_id: &str) -> ProcessOutcome {
        let claimed = self
            .jobs
            .transition(job_id, JobStatus::Queued, JobStatus::Processing, JobPatch::default())
            .await;

        let job = match claimed {
            Ok(Transition::Applied(job)) => job,
            Ok(Transition::Rejected { current }) => {
                TraceEvent::JobSkipped {
                    job_id: job_id.to_owned(),
                    status: current.to_string(),
                }
                .emit();
                return ProcessOutcome::Skipped(current);
            }
            Ok(Transition::NotFound) => {
                tracing::warn!(job_id, "job not found in store; dropping delivery");
                return ProcessOutcome::Missing;
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "failed to claim job");
                return ProcessOutcome::Missing;
            }
        };

        match self.run(&job).await {
            Ok((ctx, result)) => self.finish_ok(&job, &ctx, result).await,
            Err(error) => self.finish_err(&job, error).await,
        }
    }

    async fn run(&self, job: &Job) -> Result<(PromptContext, GenerationResult), GenerationError> {
        let ctx = self
            .builder
            .build(&job.request, self.history_window)
            .await
            .map_err(|e| {
                tracing::warn!(job_id = %job.id, error = %e, "context build failed");
                GenerationError::context(&e)
            })?;

        TraceEvent::ContextBuilt {
            job_id: job.id.clone(),
            participants: ctx.report.participants,
            history_entries: ctx.report.history_entries,
            memory_snippets: ctx.report.memory_snippets,
            memory_degraded: ctx.report.memory_degraded,
            total_chars: ctx.report.total_chars,
        }
        .emit();

        let settings = &ctx.llm_settings;
        let (provider, model) = self
            .providers
            .resolve(&settings.model)
            .map_err(|e| GenerationError::provider("registry", &e))?;

        let req = ChatRequest {
            messages: ctx.to_messages(),
            model: Some(model.clone()),
            temperature: settings.temperature,
            top_p: settings.top_p,
            max_tokens: settings.max_tokens,
            frequency_penalty: settings.frequency_penalty,
            presence_penalty: settings.presence_penalty,
        };

        let start = Instant::now();
        let response = provider.chat(&req).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let usage = response.as_ref().ok().and_then(|r| r.usage);
        TraceEvent::LlmRequest {
            provider: provider.provider_id().to_owned(),
            model: model.clone(),
            duration_ms,
            prompt_tokens: usage.map(|u| u.prompt_tokens),
            completion_tokens: usage.map(|u| u.completion_tokens),
        }
        .emit();

        let response = response.map_err(|e| {
            tracing::warn!(job_id = %job.id, provider = provider.provider_id(), error = %e, "provider call failed");
            GenerationError::provider(provider.provider_id(), &e)
        })?;

        let model_used = if response.model.is_empty() || response.model == "unknown" {
            model
        } else {
            response.model
        };

        Ok((
            ctx,
            GenerationResult {
                result_text: response.content,
                model_used,
            },
        ))
    }

    async fn finish_ok(&self, job: &Job, ctx: &PromptContext, result: GenerationResult) -> ProcessOutcome {
        let reply = result.result_text.clone();
        match self.jobs.complete(&job.id, result).await {
            Ok(Transition::Applied(_)) => {}
            Ok(other) => {
                self.late_write(job, &other);
                return ProcessOutcome::Superseded;
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "failed to record completion");
                return ProcessOutcome::Superseded;
            }
        }

        self.append_history(job, ctx, &reply).await;
        self.spawn_memory_ingest(job, ctx, &reply);
        ProcessOutcome::Completed
    }

    async fn finish_err(&self, job: &Job, error: GenerationError) -> ProcessOutcome {
        match self.jobs.fail(&job.id, error).await {
            Ok(Transition::Applied(_)) => ProcessOutcome::Failed,
            Ok(other) => {
                self.late_write(job, &other);
                ProcessOutcome::Superseded
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "failed to record failure");
                ProcessOutcome::Superseded
            }
        }
    }

    fn late_write(&self, job: &Job, transition: &Transition) {
        let status = match transition {
            Transition::Rejected { current } => current.to_string(),
            _ => "evicted".to_string(),
        };
        TraceEvent::LateCompletionIgnored {
            job_id: job.id.clone(),
            status,
        }
        .emit();
    }

    async fn append_history(&self, job: &Job, ctx: &PromptContext, reply: &str) {
        let req = &job.request;
        let now = Utc::now();
        let entries = [
            HistoryEntry {
                channel_id: req.channel_id.clone(),
                personality_id: req.personality_id.clone(),
                persona_id: ctx.persona.id.clone(),
                role: HistoryRole::User,
                content: req.text.clone(),
                created_at: now,
            },
            HistoryEntry {
                channel_id: req.channel_id.clone(),
                personality_id: req.personality_id.clone(),
                persona_id: ctx.persona.id.clone(),
                role: HistoryRole::Assistant,
                content: reply.to_owned(),
                created_at: now + chrono::Duration::milliseconds(1),
            },
        ];
        if let Err(e) = self.history.append(&entries).await {
            tracing::warn!(job_id = %job.id, error = %e, "history append failed");
        }
    }

    /// Detached: the reply has already been recorded, so a slow or failing
    /// vector store never delays it.
    fn spawn_memory_ingest(&self, job: &Job, ctx: &PromptContext, reply: &str) {
        let Some(memory) = self.memory.clone() else {
            return;
        };
        let req = MemoryIngestRequest {
            text: format!(
                "{}: {}\n{}: {}",
                ctx.persona.addressed_as(),
                job.request.text,
                ctx.personality.display_name,
                reply
            ),
            persona_id: ctx.persona.id.clone(),
            personality_id: job.request.personality_id.clone(),
            channel_id: job.request.channel_id.clone(),
            timestamp: Utc::now(),
        };
        let job_id = job.id.clone();
        tokio::spawn(async move {
            if let Err(e) = memory.ingest(req).await {
                tracing::warn!(job_id = %job_id, error = %e, "memory ingest failed");
            }
        });
    }
}
