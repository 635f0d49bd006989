// llm-adapter - Provider-agnostic LLM execution engine
// Library exports

pub mod auth; // Token records and refresh hooks
pub mod config;
pub mod errors;
pub mod exchange; // Retry, SSE framing, stream accumulation
pub mod providers; // Multi-provider LLM support
pub mod tools; // Tool registry boundary
pub mod turns; // Tool-calling turn loop

pub use errors::{ProviderError, RetryClass};
pub use providers::{Attachment, FallbackChain, Provider, Turn};
