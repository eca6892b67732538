use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generation pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Operational knobs for dedup, queueing, waiting and the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Lifetime of a dedup reservation, measured from creation.
    #[serde(default = "d_30")]
    pub dedup_ttl_secs: u64,
    /// How long a submitter waits for a terminal job state.
    #[serde(default = "d_120")]
    pub job_timeout_secs: u64,
    /// First poll interval of the waiter's backoff.
    #[serde(default = "d_50")]
    pub poll_interval_ms: u64,
    /// Backoff ceiling for the waiter.
    #[serde(default = "d_2000")]
    pub poll_max_interval_ms: u64,
    #[serde(default = "d_5")]
    pub worker_concurrency: usize,
    /// History entries loaded per build unless the settings bundle says otherwise.
    #[serde(default = "d_20")]
    pub history_window: usize,
    /// How long terminal jobs stay readable after completion.
    #[serde(default = "d_600")]
    pub job_retention_secs: u64,
    /// Period of the maintenance scheduler.
    #[serde(default = "d_5u")]
    pub tick_interval_secs: u64,
    /// Un-acked deliveries are redelivered after this long.
    #[serde(default = "d_300")]
    pub queue_visibility_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_secs: d_30(),
            job_timeout_secs: d_120(),
            poll_interval_ms: d_50(),
            poll_max_interval_ms: d_2000(),
            worker_concurrency: d_5(),
            history_window: d_20(),
            job_retention_secs: d_600(),
            tick_interval_secs: d_5u(),
            queue_visibility_timeout_secs: d_300(),
        }
    }
}

impl PipelineConfig {
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_max_interval(&self) -> Duration {
        Duration::from_millis(self.poll_max_interval_ms.max(self.poll_interval_ms))
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn queue_visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_visibility_timeout_secs)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_30() -> u64 {
    30
}
fn d_120() -> u64 {
    120
}
fn d_50() -> u64 {
    50
}
fn d_2000() -> u64 {
    2_000
}
fn d_5() -> usize {
    5
}
fn d_20() -> usize {
    20
}
fn d_600() -> u64 {
    600
}
fn d_5u() -> u64 {
    5
}
fn d_300() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_ceiling_never_below_floor() {
        let cfg = PipelineConfig {
            poll_interval_ms: 500,
            poll_max_interval_ms: 100,
            ..Default::default()
        };
        assert_eq!(cfg.poll_max_interval(), Duration::from_millis(500));
    }

    #[test]
    fn zero_tick_interval_is_clamped() {
        let cfg = PipelineConfig {
            tick_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(cfg.tick_interval(), Duration::from_secs(1));
    }
}
