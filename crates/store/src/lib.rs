//! Storage seams for the generation pipeline.
//!
//! Two read paths feed prompt assembly: configuration templates and
//! overrides (`ConfigRepository`) and conversation history
//! (`HistoryRepository`). Both are traits so the pipeline can run against
//! the file-backed stores here or an in-memory fake in tests.

pub mod history;
pub mod in_memory;
pub mod repository;
pub mod snapshot;

pub use history::{InMemoryHistoryStore, JsonlHistoryStore};
pub use in_memory::InMemoryRepository;
pub use repository::{ConfigRepository, HistoryRepository};
pub use snapshot::{JsonSnapshotStore, Snapshot};
