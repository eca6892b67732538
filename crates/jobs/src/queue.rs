//! At-least-once job queue.
//!
//! Messages carry only a job id; the job store is the source of truth for
//! everything else. A delivery that is not acked within the visibility
//! timeout is put back on the queue by `tick`, so consumers must tolerate
//! seeing the same job twice.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use ch_domain::error::{Error, Result};
use ch_domain::trace::TraceEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_id: u64,
    pub message: JobMessage,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, message: JobMessage) -> Result<()>;

    /// Wait for the next message. Errors once the queue is closed and drained.
    async fn receive(&self) -> Result<Delivery>;

    /// Acknowledge a delivery. Acking twice, or after redelivery, is harmless.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Requeue deliveries whose visibility timeout has passed. Returns how
    /// many were requeued.
    fn tick(&self, now: DateTime<Utc>) -> usize;
}

// ── in-memory ───────────────────────────────────────────────────────

struct InFlight {
    message: JobMessage,
    attempt: u32,
    delivered_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<(JobMessage, u32)>,
    in_flight: HashMap<u64, InFlight>,
    next_delivery_id: u64,
    closed: bool,
}

pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    visibility_timeout: chrono::Duration,
}

impl InMemoryJobQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            visibility_timeout: chrono::Duration::from_std(visibility_timeout).unwrap_or(chrono::Duration::zero()),
        }
    }

    /// Messages waiting to be received.
    pub fn ready_len(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Deliveries handed out but not yet acked.
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Stop accepting publishes. Receivers drain what is left, then error.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    fn try_receive(&self) -> Option<std::result::Result<Delivery, ()>> {
        let mut state = self.state.lock();
        match state.ready.pop_front() {
            Some((message, attempt)) => {
                state.next_delivery_id += 1;
                let delivery_id = state.next_delivery_id;
                state.in_flight.insert(
                    delivery_id,
                    InFlight {
                        message: message.clone(),
                        attempt,
                        delivered_at: Utc::now(),
                    },
                );
                if !state.ready.is_empty() {
                    // Hand the wakeup on so another consumer picks up the rest.
                    self.notify.notify_one();
                }
                Some(Ok(Delivery {
                    delivery_id,
                    message,
                    attempt,
                }))
            }
            None if state.closed => Some(Err(())),
            None => None,
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn publish(&self, message: JobMessage) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Other("job queue is closed".into()));
            }
            state.ready.push_back((message, 1));
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self) -> Result<Delivery> {
        loop {
            let notified = self.notify.notified();
            match self.try_receive() {
                Some(Ok(delivery)) => return Ok(delivery),
                Some(Err(())) => return Err(Error::Other("job queue is closed".into())),
                None => notified.await,
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        if self.state.lock().in_flight.remove(&delivery.delivery_id).is_none() {
            tracing::debug!(
                delivery_id = delivery.delivery_id,
                job_id = %delivery.message.job_id,
                "ack for unknown delivery (already acked or redelivered)"
            );
        }
        Ok(())
    }

    fn tick(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.visibility_timeout;
        let (requeued, remaining) = {
            let mut state = self.state.lock();
            let expired: Vec<u64> = state
                .in_flight
                .iter()
                .filter(|(_, f)| f.delivered_at <= cutoff)
                .map(|(id, _)| *id)
                .collect();
            for id in &expired {
                if let Some(f) = state.in_flight.remove(id) {
                    tracing::warn!(
                        job_id = %f.message.job_id,
                        attempt = f.attempt,
                        "delivery not acked within visibility timeout, redelivering"
                    );
                    state.ready.push_back((f.message, f.attempt + 1));
                }
            }
            (expired.len(), state.in_flight.len())
        };

        if requeued > 0 {
            self.notify.notify_one();
            TraceEvent::CacheSwept {
                cache: "queue_in_flight".into(),
                evicted: requeued,
                remaining,
            }
            .emit();
        }
        requeued
    }
}
