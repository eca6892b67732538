pub mod credentials;
pub mod openai_compat;
pub mod registry;
pub mod traits;

// Re-exports for convenience.
pub use openai_compat::OpenAiCompatProvider;
pub use registry::ProviderRegistry;
pub use traits::{ChatRequest, ChatResponse, LlmProvider, Usage};
