// OAuth-style credential handling
//
// Some OpenAI-compatible endpoints authenticate with short-lived bearer
// tokens instead of static api keys. TokenSource is the refresh hook the
// resilient executor invokes on auth expiry; CredentialStore persists
// token records between runs.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::exchange::CredentialRefresher;

const CONFIG_DIR: &str = ".llm-adapter";

/// One persisted token grant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expiry) => Utc::now() >= expiry,
            None => false,
        }
    }
}

/// Provider-scoped token records stored as JSON under `~/.llm-adapter/`
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(Self {
            dir: home.join(CONFIG_DIR),
        })
    }

    /// Use an explicit directory instead of the home default
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, provider: &str) -> PathBuf {
        self.dir.join(format!("{}_credentials.json", provider))
    }

    /// Load the record for a provider, None when nothing is stored yet
    pub fn load(&self, provider: &str) -> Result<Option<TokenRecord>> {
        let path = self.path_for(provider);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read credentials for {}", provider))?;
        let record = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt credential file for {}", provider))?;
        Ok(Some(record))
    }

    pub fn save(&self, provider: &str, record: &TokenRecord) -> Result<()> {
        fs::create_dir_all(&self.dir).context("Failed to create credential directory")?;
        let path = self.path_for(provider);
        let raw = serde_json::to_string_pretty(record)?;
        fs::write(&path, raw)
            .with_context(|| format!("Failed to write credentials for {}", provider))?;

        // Token files are secrets
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

/// The refresh hook an OAuth-managed adapter consumes
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current bearer token for the Authorization header
    async fn bearer(&self) -> Result<String, ProviderError>;

    /// Obtain a fresh token after the current one was rejected
    async fn refresh(&self) -> Result<(), ProviderError>;
}

/// Adapts a TokenSource into the executor's refresh hook
pub struct SourceRefresher<'a>(pub &'a dyn TokenSource);

#[async_trait]
impl CredentialRefresher for SourceRefresher<'_> {
    async fn refresh(&self) -> Result<(), ProviderError> {
        self.0.refresh().await
    }
}
