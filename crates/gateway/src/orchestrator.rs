//! Generation orchestrator.
//!
//! `submit` is the only entry point into the pipeline. It reserves the
//! request's fingerprint, enqueues a job the first time a fingerprint is
//! seen and then waits, bounded by the job timeout, for the shared job
//! record to turn terminal. Duplicates skip the enqueue and wait on the
//! job that won the reservation.
//!
//! The orchestrator never calls a provider and never writes `TimedOut` to
//! the shared store. A timeout is recorded in its own waiter table only,
//! so the worker's late write stays a plain `Processing → Completed`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use ch_domain::config::PipelineConfig;
use ch_domain::error::GenerationError;
use ch_domain::request::{GenerationRequest, GenerationResult};
use ch_domain::trace::TraceEvent;
use ch_jobs::{fingerprint, job_id_for, DedupCache, Job, JobMessage, JobPatch, JobQueue, JobStatus, JobStore};

/// How long and how often a submitter waits for its job.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub timeout: Duration,
    /// First backoff step of the store poll.
    pub poll_interval: Duration,
    /// Backoff ceiling.
    pub poll_max_interval: Duration,
}

impl WaitPolicy {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            timeout: cfg.job_timeout(),
            poll_interval: cfg.poll_interval(),
            poll_max_interval: cfg.poll_max_interval(),
        }
    }
}

/// What one `submit` call observed.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    /// Empty when the request never got a reservation.
    pub job_id: String,
    /// True when another submission already owned the fingerprint.
    pub duplicate: bool,
    pub result: Result<GenerationResult, GenerationError>,
}

pub struct GenerationOrchestrator {
    dedup: Arc<dyn DedupCache>,
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    policy: WaitPolicy,
    /// Jobs this orchestrator gave up on, keyed by id, with the time of
    /// the timeout. Never shared with the worker side.
    timed_out: Mutex<HashMap<String, DateTime<Utc>>>,
    /// How long a `TimedOut` marker stays in the waiter table.
    marker_retention: chrono::Duration,
}

impl GenerationOrchestrator {
    pub fn new(
        dedup: Arc<dyn DedupCache>,
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        policy: WaitPolicy,
        marker_retention: Duration,
    ) -> Self {
        Self {
            dedup,
            jobs,
            queue,
            policy,
            timed_out: Mutex::new(HashMap::new()),
            marker_retention: chrono::Duration::from_std(marker_retention).unwrap_or(chrono::Duration::zero()),
        }
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    pub async fn submit(&self, request: GenerationRequest) -> SubmitOutcome {
        self.submit_at(request, Utc::now()).await
    }

    /// `submit` with an explicit reservation time. The dedup TTL is
    /// measured against `now`; the wait itself runs on the runtime clock.
    pub async fn submit_at(&self, request: GenerationRequest, now: DateTime<Utc>) -> SubmitOutcome {
        let fp = fingerprint(&request);

        let reservation = match self.dedup.reserve(&fp, now, &|| job_id_for(&fp, now)).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(fingerprint = %fp, error = %e, "dedup reservation failed");
                return SubmitOutcome {
                    job_id: String::new(),
                    duplicate: false,
                    result: Err(GenerationError::Internal {
                        detail: format!("dedup reservation failed: {e}"),
                    }),
                };
            }
        };
        let job_id = reservation.job_id;

        if reservation.created {
            if let Err(error) = self.enqueue(&job_id, &fp, request, now).await {
                return SubmitOutcome {
                    job_id,
                    duplicate: false,
                    result: Err(error),
                };
            }
        } else {
            TraceEvent::DuplicateSuppressed {
                fingerprint: fp,
                job_id: job_id.clone(),
            }
            .emit();
        }

        let result = self.await_outcome(&job_id).await;
        SubmitOutcome {
            job_id,
            duplicate: !reservation.created,
            result,
        }
    }

    async fn enqueue(
        &self,
        job_id: &str,
        fp: &str,
        request: GenerationRequest,
        now: DateTime<Utc>,
    ) -> Result<(), GenerationError> {
        let channel_id = request.channel_id.clone();
        let personality_id = request.personality_id.clone();
        let job = Job::new(job_id.to_owned(), fp.to_owned(), request, now);

        match self.jobs.create(job).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job_id, "job id already present in store; not enqueueing again");
                return Ok(());
            }
            Err(e) => {
                return Err(GenerationError::QueueError {
                    detail: format!("could not record job: {e}"),
                })
            }
        }

        let message = JobMessage {
            job_id: job_id.to_owned(),
        };
        if let Err(e) = self.queue.publish(message).await {
            tracing::error!(job_id, error = %e, "publish failed, failing job");
            let error = GenerationError::QueueError { detail: e.to_string() };
            // Duplicates already holding this job id read the failure from
            // the shared record.
            let patch = JobPatch {
                result: None,
                error: Some(error.clone()),
            };
            if let Err(store_err) = self
                .jobs
                .transition(job_id, JobStatus::Queued, JobStatus::Failed, patch)
                .await
            {
                tracing::error!(job_id, error = %store_err, "could not record publish failure");
            }
            return Err(error);
        }

        TraceEvent::JobEnqueued {
            job_id: job_id.to_owned(),
            channel_id,
            personality_id,
        }
        .emit();
        Ok(())
    }

    async fn await_outcome(&self, job_id: &str) -> Result<GenerationResult, GenerationError> {
        let waited = tokio::time::timeout(self.policy.timeout, self.wait_terminal(job_id)).await;

        let job = match waited {
            Ok(Ok(Some(job))) => job,
            Ok(Ok(None)) => {
                return Err(GenerationError::Internal {
                    detail: format!("job {job_id} was evicted before it finished"),
                })
            }
            Ok(Err(detail)) => return Err(GenerationError::Internal { detail }),
            Err(_) => return Err(self.mark_timed_out(job_id)),
        };

        job.outcome().unwrap_or_else(|| {
            Err(GenerationError::Internal {
                detail: format!("job {job_id} woke the waiter while still {}", job.status),
            })
        })
    }

    /// Store poll with exponential backoff, short-circuited by the store's
    /// own terminal notification once the job record exists.
    async fn wait_terminal(&self, job_id: &str) -> Result<Option<Job>, String> {
        let mut interval = self.policy.poll_interval;
        let mut seen = false;

        loop {
            match self.jobs.get(job_id).await {
                Ok(Some(job)) if job.status.is_terminal() => return Ok(Some(job)),
                Ok(Some(_)) => seen = true,
                Ok(None) if seen => return Ok(None),
                // The reserving submitter may not have created the record yet.
                Ok(None) => {}
                Err(e) => tracing::warn!(job_id, error = %e, "job store read failed while waiting"),
            }

            if seen {
                tokio::select! {
                    notified = self.jobs.wait_terminal(job_id) => match notified {
                        Ok(Some(job)) => return Ok(Some(job)),
                        Ok(None) => return Ok(None),
                        Err(e) => return Err(format!("waiting on job {job_id}: {e}")),
                    },
                    _ = tokio::time::sleep(interval) => {}
                }
            } else {
                tokio::time::sleep(interval).await;
            }
            interval = (interval * 2).min(self.policy.poll_max_interval);
        }
    }

    fn mark_timed_out(&self, job_id: &str) -> GenerationError {
        let waited_ms = self.policy.timeout.as_millis() as u64;
        self.timed_out.lock().insert(job_id.to_owned(), Utc::now());
        tracing::warn!(job_id, waited_ms, "gave up waiting for job");
        TraceEvent::JobTimedOut {
            job_id: job_id.to_owned(),
            waited_ms,
        }
        .emit();
        GenerationError::Timeout {
            job_id: job_id.to_owned(),
            waited_ms,
        }
    }

    /// `TimedOut` if a waiter here gave up on the job, else `None`.
    pub fn local_status(&self, job_id: &str) -> Option<JobStatus> {
        self.timed_out
            .lock()
            .contains_key(job_id)
            .then_some(JobStatus::TimedOut)
    }

    /// Forget timeout markers older than the retention window.
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.marker_retention;
        let (evicted, remaining) = {
            let mut markers = self.timed_out.lock();
            let before = markers.len();
            markers.retain(|_, at| *at > cutoff);
            (before - markers.len(), markers.len())
        };
        if evicted > 0 {
            TraceEvent::CacheSwept {
                cache: "timed_out_waiters".into(),
                evicted,
                remaining,
            }
            .emit();
        }
        evicted
    }
}
