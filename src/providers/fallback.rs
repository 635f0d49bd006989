// Fallback chain for automatic provider retry
//
// Tries providers in priority order until one succeeds. The chain is
// itself a Provider, so callers and composition treat it like any
// single backend.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::{Attachment, Provider};

/// A chain of providers to try in order
pub struct FallbackChain {
    providers: Vec<Box<dyn Provider>>,
    /// "Fallback(a,b,c)"
    label: String,
    verbose: bool,
    /// Index of the provider that answered the most recent call
    active: Mutex<Option<usize>>,
}

impl FallbackChain {
    /// Build a chain from candidate providers in priority order.
    /// Candidates that failed construction arrive as None and are
    /// dropped without shifting the order of the rest.
    pub fn new(candidates: Vec<Option<Box<dyn Provider>>>, verbose: bool) -> Self {
        let providers: Vec<Box<dyn Provider>> = candidates.into_iter().flatten().collect();
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        let label = format!("Fallback({})", names.join(","));
        Self {
            providers,
            label,
            verbose,
            active: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Name of the provider that served the most recent successful
    /// call, if any call has succeeded yet
    pub fn active_provider_name(&self) -> Option<String> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.map(|idx| self.providers[idx].name().to_string())
    }

    fn record_active(&self, idx: usize) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        *active = Some(idx);
    }

    fn aggregate_error(&self, failures: Vec<(String, anyhow::Error)>) -> anyhow::Error {
        let joined = failures
            .iter()
            .map(|(name, err)| format!("{}: {}", name, err))
            .collect::<Vec<_>>()
            .join("; ");
        anyhow!("all providers failed: {}", joined)
    }
}

#[async_trait]
impl Provider for FallbackChain {
    fn name(&self) -> &str {
        &self.label
    }

    fn set_model(&mut self, model: &str) {
        if model.is_empty() {
            return;
        }
        for provider in &mut self.providers {
            provider.set_model(model);
        }
    }

    fn set_system_prompt(&mut self, prompt: &str) {
        for provider in &mut self.providers {
            provider.set_system_prompt(prompt);
        }
    }

    async fn generate(&self, prompt: &str, attachments: &[Attachment]) -> Result<String> {
        let mut failures = Vec::new();

        for (idx, provider) in self.providers.iter().enumerate() {
            if self.verbose {
                tracing::info!(
                    "Trying provider {} ({}/{})",
                    provider.name(),
                    idx + 1,
                    self.providers.len()
                );
            }

            match provider.generate(prompt, attachments).await {
                Ok(response) => {
                    self.record_active(idx);
                    if idx > 0 {
                        tracing::info!(
                            "Provider {} succeeded after {} failed attempts",
                            provider.name(),
                            idx
                        );
                    }
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!("Provider {} failed: {}", provider.name(), e);
                    failures.push((provider.name().to_string(), e));
                }
            }
        }

        Err(self.aggregate_error(failures))
    }

    /// Streaming fallback. Tokens a failing provider already delivered
    /// are not retracted; the next provider starts a fresh stream.
    async fn generate_stream(
        &self,
        prompt: &str,
        attachments: &[Attachment],
        tokens: mpsc::Sender<String>,
    ) -> Result<()> {
        let mut failures = Vec::new();

        for (idx, provider) in self.providers.iter().enumerate() {
            if self.verbose {
                tracing::info!(
                    "Trying streaming with provider {} ({}/{})",
                    provider.name(),
                    idx + 1,
                    self.providers.len()
                );
            }

            match provider
                .generate_stream(prompt, attachments, tokens.clone())
                .await
            {
                Ok(()) => {
                    self.record_active(idx);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Provider {} streaming failed: {}", provider.name(), e);
                    failures.push((provider.name().to_string(), e));
                }
            }
        }

        Err(self.aggregate_error(failures))
    }
}
