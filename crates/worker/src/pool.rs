use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use ch_jobs::JobQueue;

use crate::processor::JobProcessor;

/// Fixed-size pool of queue consumers.
///
/// Each slot runs one job to completion before receiving the next one.
/// Shutdown is observed between jobs, never in the middle of one.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    processor: Arc<JobProcessor>,
    concurrency: usize,
}

pub struct WorkerPoolHandle {
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, processor: Arc<JobProcessor>, concurrency: usize) -> Self {
        Self {
            queue,
            processor,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Spawn the workers. They stop once `shutdown` is cancelled.
    pub fn start(self, shutdown: CancellationToken) -> WorkerPoolHandle {
        tracing::info!(concurrency = self.concurrency, "starting worker pool");
        let workers = (0..self.concurrency)
            .map(|slot| {
                let queue = self.queue.clone();
                let processor = self.processor.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(
                    run_worker(queue, processor, shutdown).instrument(tracing::info_span!("worker", slot)),
                )
            })
            .collect();
        WorkerPoolHandle { shutdown, workers }
    }
}

impl WorkerPoolHandle {
    /// Cancel and wait for every worker to finish its current job.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

async fn run_worker(queue: Arc<dyn JobQueue>, processor: Arc<JobProcessor>, shutdown: CancellationToken) {
    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = queue.receive() => match received {
                Ok(d) => d,
                Err(e) => {
                    tracing::info!(error = %e, "queue closed, worker exiting");
                    break;
                }
            },
        };

        let job_id = delivery.message.job_id.clone();
        let outcome = processor
            .process(&job_id)
            .instrument(tracing::info_span!("job", %job_id, attempt = delivery.attempt))
            .await;
        tracing::debug!(%job_id, ?outcome, "job processed");

        if let Err(e) = queue.ack(&delivery).await {
            tracing::warn!(%job_id, error = %e, "ack failed; job may be redelivered");
        }
    }
}
