// Multi-provider LLM support
//
// This module provides an abstraction layer over different LLM providers
// (Anthropic, OpenAI-compatible endpoints, etc.) behind a unified
// interface. The fallback chain composes providers; the factory builds
// the configured lineup.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod types;

// Provider implementations
pub mod anthropic;
pub mod openai;

pub mod fallback;
pub mod factory;

// Re-export commonly used types
pub use fallback::FallbackChain;
pub use types::{Attachment, AttachmentKind, ContentPart, Role, Turn, Usage};

/// Trait for LLM providers
///
/// Every provider (and the fallback chain itself) implements this,
/// giving callers one interface for blocking and streaming generation
/// with attachments and a built-in tool loop.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name (e.g. "anthropic", "lmstudio")
    fn name(&self) -> &str;

    /// Override the model for subsequent calls. Empty input is a no-op.
    fn set_model(&mut self, model: &str);

    /// Replace the system prompt, effective from the next call
    fn set_system_prompt(&mut self, prompt: &str);

    /// Run the full tool loop and return the final plain-text answer
    async fn generate(&self, prompt: &str, attachments: &[Attachment]) -> Result<String>;

    /// Streaming variant: text deltas arrive on `tokens` in order as
    /// they are produced, all delivered before this returns. Channel
    /// close signals completion; the return value reflects only
    /// transport or loop failure.
    async fn generate_stream(
        &self,
        prompt: &str,
        attachments: &[Attachment],
        tokens: mpsc::Sender<String>,
    ) -> Result<()>;
}

/// Which wire protocol a configured provider name speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAiCompatible,
}

/// Canonical form of a user-supplied provider name
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace(['-', '_'], "")
}

/// Map a provider name to the protocol its adapter speaks
pub fn classify(name: &str) -> Option<ProviderKind> {
    match normalize_name(name).as_str() {
        "anthropic" | "claude" => Some(ProviderKind::Anthropic),
        "openai" | "lmstudio" | "qwen" | "ollama" | "gemini" => {
            Some(ProviderKind::OpenAiCompatible)
        }
        _ => None,
    }
}

/// Whether a provider's default endpoint accepts image attachments.
/// Local servers usually run text-only models; config can override.
pub fn supports_images(name: &str) -> bool {
    !matches!(normalize_name(name).as_str(), "lmstudio" | "ollama")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  LM-Studio "), "lmstudio");
        assert_eq!(normalize_name("Claude"), "claude");
    }

    #[test]
    fn test_classify_known_providers() {
        assert_eq!(classify("anthropic"), Some(ProviderKind::Anthropic));
        assert_eq!(classify("Claude"), Some(ProviderKind::Anthropic));
        assert_eq!(classify("lm_studio"), Some(ProviderKind::OpenAiCompatible));
        assert_eq!(classify("qwen"), Some(ProviderKind::OpenAiCompatible));
        assert_eq!(classify("mystery"), None);
    }

    #[test]
    fn test_local_endpoints_default_text_only() {
        assert!(!supports_images("lmstudio"));
        assert!(!supports_images("Ollama"));
        assert!(supports_images("openai"));
        assert!(supports_images("anthropic"));
        assert!(supports_images("qwen"));
    }
}
