use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ch_domain::error::GenerationError;
use ch_domain::request::{GenerationRequest, GenerationResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `Queued → Processing → {Completed | Failed}`.
///
/// `TimedOut` is only ever recorded by a waiter in its own table; the
/// shared job record never holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    /// Edges the shared job store accepts. `Queued → Failed` is the
    /// submitter recording a job that never reached the queue.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (Self::Queued, Self::Processing)
                | (Self::Queued, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub fingerprint: String,
    pub request: GenerationRequest,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GenerationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GenerationError>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: String, fingerprint: String, request: GenerationRequest, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id,
            fingerprint,
            request,
            status: JobStatus::Queued,
            result: None,
            error: None,
            enqueued_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// The caller-facing outcome of a terminal job.
    ///
    /// `None` while the job is still in flight.
    pub fn outcome(&self) -> Option<Result<GenerationResult, GenerationError>> {
        match self.status {
            JobStatus::Completed => Some(self.result.clone().ok_or_else(|| GenerationError::Internal {
                detail: format!("job {} completed without a result", self.id),
            })),
            JobStatus::Failed => Some(Err(self.error.clone().unwrap_or_else(|| GenerationError::Internal {
                detail: format!("job {} failed without an error", self.id),
            }))),
            JobStatus::TimedOut => Some(Err(GenerationError::Timeout {
                job_id: self.id.clone(),
                waited_ms: 0,
            })),
            JobStatus::Queued | JobStatus::Processing => None,
        }
    }
}

/// Fields written alongside a status change.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub result: Option<GenerationResult>,
    pub error: Option<GenerationError>,
}

/// Outcome of a compare-and-set transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(Job),
    /// The job was not in the expected state; nothing was written.
    Rejected { current: JobStatus },
    /// No such job (never created, or already evicted).
    NotFound,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}
