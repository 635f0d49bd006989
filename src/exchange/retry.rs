// Resilient request execution
//
// Wraps one logical vendor exchange in a bounded retry loop: exponential
// backoff on rate limits and transport failures, a single credential
// refresh on auth expiry, immediate propagation of everything else.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::errors::{ProviderError, RetryClass};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 2000;

/// Retry budget for one logical exchange
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries on top of the original attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before the nth retry (1-based): base * 2^(n-1)
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

/// Hook an adapter supplies to refresh expired credentials
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self) -> Result<(), ProviderError>;
}

/// Run `attempt` under `policy`, refreshing credentials at most once.
///
/// `attempt` is re-invoked fresh on every try so the request body can be
/// re-serialized (credentials or derived fields may have changed). A
/// successful refresh retries immediately without consuming a backoff
/// slot; a second auth failure after refresh is fatal.
pub async fn execute<T, A, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut attempt: A,
    refresher: Option<&dyn CredentialRefresher>,
) -> Result<T, ProviderError>
where
    A: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, ProviderError>> + Send,
{
    let mut retries_used = 0u32;
    let mut refreshed = false;

    loop {
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match err.class() {
            RetryClass::Transport | RetryClass::RateLimited => {
                if retries_used >= policy.max_retries {
                    tracing::warn!("{}: retry budget exhausted: {}", label, err);
                    return Err(err);
                }
                retries_used += 1;
                let delay = policy.delay_for(retries_used);
                tracing::warn!(
                    "{}: attempt {} failed ({}), retrying in {:?}",
                    label,
                    retries_used,
                    err,
                    delay
                );
                sleep(delay).await;
            }

            RetryClass::AuthExpired => {
                if refreshed {
                    // Refresh already happened once; the new credentials
                    // are bad too.
                    return Err(err);
                }
                let Some(refresher) = refresher else {
                    return Err(err);
                };
                tracing::info!("{}: credentials expired, refreshing", label);
                match refresher.refresh().await {
                    Ok(()) => {
                        refreshed = true;
                        tracing::info!("{}: credentials refreshed", label);
                        // Retry immediately, no backoff slot consumed
                    }
                    Err(refresh_err) => {
                        return Err(ProviderError::RefreshFailed(format!(
                            "token expired and refresh failed: {}",
                            refresh_err
                        )));
                    }
                }
            }

            RetryClass::Fatal => return Err(err),
        }
    }
}
