//! Chat-completion layer.
//!
//! - [`base_llm`] - The [`ChatLLM`] trait and shared provider state
//! - [`streaming`] - Stream chunks, receivers and the SSE decoder
//! - [`providers`] - Mistral and OpenAI implementations
//! - [`gate`] - Concurrency limit and retry policy in front of a provider

pub mod base_llm;
pub mod gate;
pub mod providers;
pub mod streaming;

// Re-exports for convenience
pub use base_llm::{ChatLLM, ChatMessage, Role, TokenUsage};
pub use gate::RequestGate;
pub use providers::build_provider;
pub use streaming::{StreamAccumulator, StreamChunk, StreamReceiver};
