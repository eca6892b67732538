//! `ch-jobs` — the job machinery shared by the gateway and the workers.
//!
//! - [`DedupCache`]: fingerprint → job id with a fixed TTL
//! - [`JobStore`]: job records with compare-and-set transitions
//! - [`JobQueue`]: at-least-once delivery of job ids
//!
//! Each seam has an in-memory implementation. None of them run timers of
//! their own; expiry, eviction and redelivery happen in `tick(now)`, which
//! the host process calls from its maintenance scheduler.

pub mod dedup;
pub mod fingerprint;
pub mod job;
pub mod queue;
pub mod store;

pub use dedup::{DedupCache, InFlightCheck, InMemoryDedupCache, Reservation};
pub use fingerprint::{fingerprint, job_id_for};
pub use job::{Job, JobPatch, JobStatus, Transition};
pub use queue::{Delivery, InMemoryJobQueue, JobMessage, JobQueue};
pub use store::{InMemoryJobStore, JobStore};
