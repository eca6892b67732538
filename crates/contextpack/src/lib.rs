//! `ch-contextpack` — prompt context assembly.
//!
//! [`ConfigResolver`] applies the persona / system prompt / LLM settings
//! override chains; [`ContextBuilder`] combines the result with the
//! conversation history window, the distinct participant set and recalled
//! memory into a [`PromptContext`] plus a machine-readable [`ContextReport`].

pub mod builder;
pub mod injection;
pub mod report;
pub mod resolver;
pub mod truncation;

pub use builder::{ContextBuilder, PromptContext};
pub use report::{ConfigSource, ContextReport, SectionReport};
pub use resolver::{ConfigResolver, ResolvedConfig};
