//! Shared job-state store.
//!
//! All writes go through compare-and-set [`JobStore::transition`], so a
//! redelivered message can never move a job backwards and a late write to
//! an evicted job is a no-op.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;

use ch_domain::error::{Error, GenerationError, Result};
use ch_domain::request::GenerationResult;
use ch_domain::trace::TraceEvent;

use crate::job::{Job, JobPatch, JobStatus, Transition};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Returns false (and writes nothing) if the id exists.
    async fn create(&self, job: Job) -> Result<bool>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// Move `job_id` from `from` to `to` and apply `patch`, only if the job
    /// is currently in `from`.
    async fn transition(&self, job_id: &str, from: JobStatus, to: JobStatus, patch: JobPatch) -> Result<Transition>;

    async fn complete(&self, job_id: &str, result: GenerationResult) -> Result<Transition> {
        let patch = JobPatch {
            result: Some(result),
            error: None,
        };
        self.transition(job_id, JobStatus::Processing, JobStatus::Completed, patch)
            .await
    }

    async fn fail(&self, job_id: &str, error: GenerationError) -> Result<Transition> {
        let patch = JobPatch {
            result: None,
            error: Some(error),
        };
        self.transition(job_id, JobStatus::Processing, JobStatus::Failed, patch)
            .await
    }

    /// Resolve once the job is terminal. `None` if the job is unknown or is
    /// evicted while waiting.
    async fn wait_terminal(&self, job_id: &str) -> Result<Option<Job>>;

    async fn evict(&self, job_id: &str) -> Result<bool>;

    /// Evict terminal jobs past retention and jobs stuck in flight for too
    /// long. Returns how many were removed.
    fn tick(&self, now: DateTime<Utc>) -> usize;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Slot {
    job: Job,
    /// Dropped with the slot, which wakes waiters with `None`.
    status_tx: watch::Sender<JobStatus>,
}

pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Slot>>,
    retention: chrono::Duration,
    orphan_after: chrono::Duration,
}

impl InMemoryJobStore {
    /// `retention` applies to terminal jobs from completion; `orphan_after`
    /// to queued or processing jobs from enqueue.
    pub fn new(retention: Duration, orphan_after: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero()),
            orphan_after: chrono::Duration::from_std(orphan_after).unwrap_or(chrono::Duration::zero()),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// True while the job exists and is queued or processing.
    pub fn is_in_flight(&self, job_id: &str) -> bool {
        self.jobs
            .read()
            .get(job_id)
            .is_some_and(|slot| !slot.job.status.is_terminal())
    }

    fn subscribe(&self, job_id: &str) -> Option<watch::Receiver<JobStatus>> {
        self.jobs.read().get(job_id).map(|s| s.status_tx.subscribe())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<bool> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Ok(false);
        }
        let (status_tx, _) = watch::channel(job.status);
        jobs.insert(job.id.clone(), Slot { job, status_tx });
        Ok(true)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.read().get(job_id).map(|s| s.job.clone()))
    }

    async fn transition(&self, job_id: &str, from: JobStatus, to: JobStatus, patch: JobPatch) -> Result<Transition> {
        if !from.can_transition_to(to) {
            return Err(Error::Store(format!("illegal job transition {from} -> {to}")));
        }

        let applied = {
            let mut jobs = self.jobs.write();
            let Some(slot) = jobs.get_mut(job_id) else {
                return Ok(Transition::NotFound);
            };
            if slot.job.status != from {
                return Ok(Transition::Rejected {
                    current: slot.job.status,
                });
            }

            let now = Utc::now();
            let job = &mut slot.job;
            job.status = to;
            match to {
                JobStatus::Processing => job.started_at = Some(now),
                _ => job.completed_at = Some(now),
            }
            if patch.result.is_some() {
                job.result = patch.result;
            }
            if patch.error.is_some() {
                job.error = patch.error;
            }
            slot.status_tx.send_replace(to);
            job.clone()
        };

        TraceEvent::JobTransition {
            job_id: job_id.to_owned(),
            from: from.to_string(),
            to: to.to_string(),
        }
        .emit();
        Ok(Transition::Applied(applied))
    }

    async fn wait_terminal(&self, job_id: &str) -> Result<Option<Job>> {
        let Some(mut rx) = self.subscribe(job_id) else {
            return Ok(None);
        };
        loop {
            let terminal = rx.borrow_and_update().is_terminal();
            if terminal {
                return self.get(job_id).await;
            }
            if rx.changed().await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn evict(&self, job_id: &str) -> Result<bool> {
        Ok(self.jobs.write().remove(job_id).is_some())
    }

    fn tick(&self, now: DateTime<Utc>) -> usize {
        let retention_cutoff = now - self.retention;
        let orphan_cutoff = now - self.orphan_after;

        let (evicted, remaining) = {
            let mut jobs = self.jobs.write();
            let before = jobs.len();
            jobs.retain(|id, slot| {
                let job = &slot.job;
                let keep = if job.status.is_terminal() {
                    job.completed_at.map_or(true, |ts| ts > retention_cutoff)
                } else {
                    job.enqueued_at > orphan_cutoff
                };
                if !keep && !job.status.is_terminal() {
                    tracing::warn!(job_id = %id, status = %job.status, "evicting orphaned job");
                }
                keep
            });
            (before - jobs.len(), jobs.len())
        };

        if evicted > 0 {
            TraceEvent::CacheSwept {
                cache: "jobs".into(),
                evicted,
                remaining,
            }
            .emit();
        }
        evicted
    }
}
