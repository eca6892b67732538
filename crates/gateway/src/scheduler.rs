//! Maintenance scheduler.
//!
//! Every expiry in the pipeline is an explicit `tick(now)` on the component
//! that owns it. This module is the only place that calls them on a timer;
//! tests call [`Maintenance::tick`] directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ch_jobs::{DedupCache, JobQueue, JobStore};

use crate::orchestrator::GenerationOrchestrator;

/// What one maintenance pass removed or requeued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub dedup_expired: usize,
    pub jobs_evicted: usize,
    pub deliveries_requeued: usize,
    pub timeout_markers: usize,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Maintenance {
    dedup: Arc<dyn DedupCache>,
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    orchestrator: Arc<GenerationOrchestrator>,
}

impl Maintenance {
    pub fn new(
        dedup: Arc<dyn DedupCache>,
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        orchestrator: Arc<GenerationOrchestrator>,
    ) -> Self {
        Self {
            dedup,
            jobs,
            queue,
            orchestrator,
        }
    }

    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        TickReport {
            dedup_expired: self.dedup.tick(now),
            jobs_evicted: self.jobs.tick(now),
            deliveries_requeued: self.queue.tick(now),
            timeout_markers: self.orchestrator.tick(now),
        }
    }

    /// Run [`tick`](Self::tick) every `period` until `shutdown` fires.
    pub fn spawn(self, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let report = self.tick(Utc::now());
                if !report.is_empty() {
                    tracing::debug!(?report, "maintenance pass");
                }
            }
            tracing::info!("maintenance scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use ch_domain::request::GenerationRequest;
    use ch_jobs::{InMemoryDedupCache, InMemoryJobQueue, InMemoryJobStore, Job, JobMessage};

    use super::*;
    use crate::orchestrator::WaitPolicy;

    #[tokio::test]
    async fn one_pass_drives_every_expiry() {
        let dedup = Arc::new(InMemoryDedupCache::new(Duration::from_secs(30)));
        let jobs = Arc::new(InMemoryJobStore::new(Duration::from_secs(600), Duration::from_secs(720)));
        let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(300)));
        let orchestrator = Arc::new(GenerationOrchestrator::new(
            dedup.clone(),
            jobs.clone(),
            queue.clone(),
            WaitPolicy {
                timeout: Duration::from_secs(120),
                poll_interval: Duration::from_millis(50),
                poll_max_interval: Duration::from_secs(2),
            },
            Duration::from_secs(600),
        ));

        let now = Utc::now();
        dedup.reserve("fp", now, &|| "j1".to_string()).await.unwrap();
        let job = Job::new("j1".into(), "fp".into(), GenerationRequest::new("C", "P", "U", "hi"), now);
        jobs.create(job).await.unwrap();
        queue.publish(JobMessage { job_id: "j1".into() }).await.unwrap();
        queue.receive().await.unwrap();

        let maintenance = Maintenance::new(dedup.clone(), jobs.clone(), queue.clone(), orchestrator);
        assert!(maintenance.tick(now).is_empty());

        let report = maintenance.tick(now + chrono::Duration::seconds(301));
        assert_eq!(report.dedup_expired, 1);
        assert_eq!(report.deliveries_requeued, 1);
        assert_eq!(report.jobs_evicted, 0);

        let report = maintenance.tick(now + chrono::Duration::seconds(721));
        assert_eq!(report.jobs_evicted, 1);
        assert!(dedup.is_empty());
    }
}
