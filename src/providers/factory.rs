// Provider factory
//
// Builds the configured fallback lineup. A provider that cannot be
// constructed (missing key, unknown name) is logged and dropped; the
// rest of the lineup keeps its order.

use std::sync::Arc;

use anyhow::{bail, Result};

use super::anthropic::AnthropicProvider;
use super::openai::OpenAiProvider;
use super::{classify, normalize_name, supports_images, FallbackChain, Provider, ProviderKind};
use crate::config::Settings;
use crate::tools::ToolRegistry;

/// Default endpoints for OpenAI-compatible providers
fn default_base_url(name: &str) -> Option<&'static str> {
    match name {
        "openai" => Some("https://api.openai.com"),
        "lmstudio" => Some("http://localhost:1234"),
        "ollama" => Some("http://localhost:11434"),
        _ => None,
    }
}

/// Build one provider from its settings entry
fn build_provider(
    name: &str,
    settings: &Settings,
    registry: Arc<dyn ToolRegistry>,
) -> Result<Box<dyn Provider>> {
    let normalized = normalize_name(name);
    let entry = settings.provider(name).cloned().unwrap_or_default();

    let Some(kind) = classify(&normalized) else {
        bail!("Unknown provider: {}", name);
    };

    match kind {
        ProviderKind::Anthropic => {
            let Some(api_key) = entry.api_key else {
                bail!("Provider {} requires an api_key", name);
            };
            let mut provider = AnthropicProvider::new(api_key, registry)?;
            if let Some(base_url) = entry.base_url {
                provider = provider.with_base_url(base_url);
            }
            if let Some(model) = entry.model {
                provider = provider.with_model(model);
            }
            Ok(Box::new(provider))
        }

        ProviderKind::OpenAiCompatible => {
            let base_url = match entry.base_url {
                Some(url) => url,
                None => match default_base_url(&normalized) {
                    Some(url) => url.to_string(),
                    None => bail!("Provider {} requires a base_url", name),
                },
            };
            let images = entry
                .supports_images
                .unwrap_or_else(|| supports_images(&normalized));
            let mut provider =
                OpenAiProvider::new(normalized, base_url, entry.api_key, registry)?;
            if let Some(model) = entry.model {
                provider = provider.with_model(model);
            }
            if !images {
                provider = provider.text_only();
            }
            Ok(Box::new(provider))
        }
    }
}

/// Build the full fallback chain from configuration
pub fn build_lineup(
    settings: &Settings,
    registry: Arc<dyn ToolRegistry>,
    verbose: bool,
) -> Result<FallbackChain> {
    let candidates: Vec<Option<Box<dyn Provider>>> = settings
        .lineup
        .iter()
        .map(
            |name| match build_provider(name, settings, registry.clone()) {
                Ok(provider) => {
                    tracing::info!("Configured provider {}", provider.name());
                    Some(provider)
                }
                Err(e) => {
                    tracing::warn!("Skipping provider {}: {}", name, e);
                    None
                }
            },
        )
        .collect();

    let mut chain = FallbackChain::new(candidates, verbose);
    if chain.is_empty() {
        bail!("No usable providers in lineup {:?}", settings.lineup);
    }
    if let Some(system) = &settings.system_prompt {
        chain.set_system_prompt(system);
    }
    Ok(chain)
}
