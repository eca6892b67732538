//! `ch-worker` — turns queued job ids into provider completions.

pub mod pool;
pub mod processor;

pub use pool::{WorkerPool, WorkerPoolHandle};
pub use processor::{JobProcessor, ProcessOutcome};
