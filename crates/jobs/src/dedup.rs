//! Short-TTL map from request fingerprint to job id.
//!
//! A reservation lives for the TTL from its creation. Expired entries
//! count as absent on `reserve` even before a `tick` sweeps them, unless
//! the job they point at is still queued or processing: a fingerprint never
//! has two live jobs, however long the first one runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use ch_domain::error::Result;
use ch_domain::trace::TraceEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reservation {
    /// True when this call created the entry.
    pub created: bool,
    pub job_id: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait DedupCache: Send + Sync {
    /// Atomic create-if-absent. `new_job_id` is only called when a fresh
    /// entry is created.
    async fn reserve(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
        new_job_id: &(dyn Fn() -> String + Send + Sync),
    ) -> Result<Reservation>;

    /// Drop expired entries. Returns how many were removed.
    fn tick(&self, now: DateTime<Utc>) -> usize;
}

// ── in-memory ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Entry {
    job_id: String,
    expires_at: DateTime<Utc>,
}

/// Answers "is this job still queued or processing?". Called with the
/// cache lock held, so it must not call back into the cache.
pub type InFlightCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub struct InMemoryDedupCache {
    ttl: chrono::Duration,
    entries: Mutex<HashMap<String, Entry>>,
    in_flight: Option<InFlightCheck>,
}

impl InMemoryDedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
            entries: Mutex::new(HashMap::new()),
            in_flight: None,
        }
    }

    /// Keep expired entries bound while `check` reports their job in flight.
    pub fn with_in_flight_check(mut self, check: InFlightCheck) -> Self {
        self.in_flight = Some(check);
        self
    }

    fn is_live(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        entry.expires_at > now || self.in_flight.as_ref().is_some_and(|check| check(&entry.job_id))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl DedupCache for InMemoryDedupCache {
    async fn reserve(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
        new_job_id: &(dyn Fn() -> String + Send + Sync),
    ) -> Result<Reservation> {
        let reservation = {
            let mut entries = self.entries.lock();
            match entries.get(fingerprint) {
                Some(live) if self.is_live(live, now) => Reservation {
                    created: false,
                    job_id: live.job_id.clone(),
                    expires_at: live.expires_at,
                },
                _ => {
                    let entry = Entry {
                        job_id: new_job_id(),
                        expires_at: now + self.ttl,
                    };
                    entries.insert(fingerprint.to_owned(), entry.clone());
                    Reservation {
                        created: true,
                        job_id: entry.job_id,
                        expires_at: entry.expires_at,
                    }
                }
            }
        };

        TraceEvent::JobReserved {
            fingerprint: fingerprint.to_owned(),
            job_id: reservation.job_id.clone(),
            created: reservation.created,
        }
        .emit();
        Ok(reservation)
    }

    fn tick(&self, now: DateTime<Utc>) -> usize {
        let (evicted, remaining) = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|_, e| self.is_live(e, now));
            (before - entries.len(), entries.len())
        };
        if evicted > 0 {
            TraceEvent::CacheSwept {
                cache: "dedup".into(),
                evicted,
                remaining,
            }
            .emit();
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counter_ids() -> (Arc<AtomicUsize>, impl Fn() -> String + Send + Sync) {
        let n = Arc::new(AtomicUsize::new(0));
        let n2 = n.clone();
        (n, move || format!("job-{}", n2.fetch_add(1, Ordering::SeqCst)))
    }

    #[tokio::test]
    async fn second_reserve_within_ttl_returns_existing_id() {
        let cache = InMemoryDedupCache::new(Duration::from_secs(30));
        let (calls, ids) = counter_ids();
        let t0 = Utc::now();

        let first = cache.reserve("fp", t0, &ids).await.unwrap();
        let second = cache
            .reserve("fp", t0 + chrono::Duration::milliseconds(50), &ids)
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.job_id, second.job_id);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_counts_as_absent_before_sweep() {
        let cache = InMemoryDedupCache::new(Duration::from_secs(30));
        let (_, ids) = counter_ids();
        let t0 = Utc::now();

        let first = cache.reserve("fp", t0, &ids).await.unwrap();
        let later = cache
            .reserve("fp", t0 + chrono::Duration::seconds(30), &ids)
            .await
            .unwrap();

        assert!(later.created);
        assert_ne!(first.job_id, later.job_id);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn expired_entry_stays_bound_while_its_job_runs() {
        let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let running_flag = running.clone();
        let cache = InMemoryDedupCache::new(Duration::from_secs(30))
            .with_in_flight_check(Arc::new(move |_: &str| running_flag.load(Ordering::SeqCst)));
        let (calls, ids) = counter_ids();
        let t0 = Utc::now();

        let first = cache.reserve("fp", t0, &ids).await.unwrap();
        let late = cache
            .reserve("fp", t0 + chrono::Duration::seconds(31), &ids)
            .await
            .unwrap();
        assert!(!late.created);
        assert_eq!(late.job_id, first.job_id);
        assert_eq!(cache.tick(t0 + chrono::Duration::seconds(31)), 0);

        // Once the job is terminal the expired entry is released.
        running.store(false, Ordering::SeqCst);
        let fresh = cache
            .reserve("fp", t0 + chrono::Duration::seconds(32), &ids)
            .await
            .unwrap();
        assert!(fresh.created);
        assert_ne!(fresh.job_id, first.job_id);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tick_sweeps_only_expired() {
        let cache = InMemoryDedupCache::new(Duration::from_secs(30));
        let (_, ids) = counter_ids();
        let t0 = Utc::now();
        cache.reserve("old", t0, &ids).await.unwrap();
        cache
            .reserve("new", t0 + chrono::Duration::seconds(20), &ids)
            .await
            .unwrap();

        assert_eq!(cache.tick(t0 + chrono::Duration::seconds(31)), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.tick(t0 + chrono::Duration::seconds(31)), 0);
    }

    #[tokio::test]
    async fn concurrent_reservations_create_exactly_one() {
        let cache = Arc::new(InMemoryDedupCache::new(Duration::from_secs(30)));
        let now = Utc::now();
        let mut handles = Vec::new();
        for i in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let id = move || format!("job-{i}");
                cache.reserve("fp", now, &id).await.unwrap()
            }));
        }

        let mut created = 0;
        let mut ids = std::collections::HashSet::new();
        for h in handles {
            let r = h.await.unwrap();
            created += usize::from(r.created);
            ids.insert(r.job_id);
        }
        assert_eq!(created, 1);
        assert_eq!(ids.len(), 1);
    }
}
