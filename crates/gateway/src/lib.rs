//! `ch-gateway` — the Chorus process.
//!
//! Hosts the [`orchestrator::GenerationOrchestrator`], the HTTP API, the
//! worker pool and the maintenance scheduler in one binary (`chorus`).

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod orchestrator;
pub mod scheduler;
pub mod server;
pub mod state;
