// Configuration loading
// Loads provider settings from ~/.llm-adapter/config.toml or environment

use std::collections::HashMap;
use std::fs;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Per-provider connection settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Override the per-provider default for image attachment support
    pub supports_images: Option<bool>,
}

/// Full adapter configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Provider names in fallback priority order
    #[serde(default)]
    pub lineup: Vec<String>,

    /// System prompt applied to every provider
    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
}

impl Settings {
    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.get(name)
    }
}

/// Load configuration from the config file or environment
pub fn load_settings() -> Result<Settings> {
    if let Some(settings) = try_load_from_file()? {
        return Ok(settings);
    }

    if let Some(settings) = settings_from_env() {
        return Ok(settings);
    }

    bail!(
        "No configuration found. Create ~/.llm-adapter/config.toml:\n\n\
        lineup = [\"anthropic\", \"lmstudio\"]\n\n\
        [providers.anthropic]\n\
        api_key = \"sk-ant-...\"\n\n\
        [providers.lmstudio]\n\
        base_url = \"http://localhost:1234\"\n\n\
        Alternatively, set environment variable:\n\
        export ANTHROPIC_API_KEY=\"sk-ant-...\""
    );
}

fn try_load_from_file() -> Result<Option<Settings>> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let config_path = home.join(".llm-adapter/config.toml");

    if !config_path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    let settings = parse_settings(&contents)?;
    Ok(Some(settings))
}

/// Parse a config.toml document
pub fn parse_settings(contents: &str) -> Result<Settings> {
    let settings: Settings = toml::from_str(contents).context("Failed to parse config.toml")?;
    if settings.lineup.is_empty() {
        bail!("Config is missing a lineup. List at least one provider name.");
    }
    Ok(settings)
}

/// Build a lineup from API-key environment variables alone
fn settings_from_env() -> Option<Settings> {
    let mut settings = Settings::default();

    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        if !key.is_empty() {
            settings.lineup.push("anthropic".to_string());
            settings.providers.insert(
                "anthropic".to_string(),
                ProviderSettings {
                    api_key: Some(key),
                    ..Default::default()
                },
            );
        }
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            settings.lineup.push("openai".to_string());
            settings.providers.insert(
                "openai".to_string(),
                ProviderSettings {
                    api_key: Some(key),
                    ..Default::default()
                },
            );
        }
    }

    if settings.lineup.is_empty() {
        None
    } else {
        Some(settings)
    }
}
