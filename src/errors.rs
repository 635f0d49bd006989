// Provider error taxonomy
//
// Every failure a vendor exchange can produce is classified so the
// resilient executor knows whether to back off, refresh, or give up.

use std::time::Duration;

use thiserror::Error;

/// How the resilient executor should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Connection-level failure, retry with backoff
    Transport,
    /// HTTP 429 or vendor rate-limit signal, retry with exponential backoff
    RateLimited,
    /// HTTP 401 or vendor auth-expired signal, refresh credentials then retry once
    AuthExpired,
    /// Everything else: no retry, propagate immediately
    Fatal,
}

/// Errors produced by a vendor exchange attempt
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited ({status}): {body}")]
    RateLimited { status: u16, body: String },

    #[error("authorization expired: {0}")]
    AuthExpired(String),

    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("no candidates in response")]
    EmptyResponse,

    #[error("{provider} does not support {capability}")]
    CapabilityUnsupported {
        provider: String,
        capability: String,
    },

    #[error("tool loop error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Classify this error for the retry executor
    pub fn class(&self) -> RetryClass {
        match self {
            ProviderError::Transport(_) => RetryClass::Transport,
            ProviderError::RateLimited { .. } => RetryClass::RateLimited,
            ProviderError::AuthExpired(_) => RetryClass::AuthExpired,
            // A timeout means the caller's deadline is already spent
            ProviderError::Timeout(_) => RetryClass::Fatal,
            _ => RetryClass::Fatal,
        }
    }

    /// Classify an HTTP status + body into the right variant
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => ProviderError::RateLimited { status, body },
            401 => ProviderError::AuthExpired(body),
            _ => ProviderError::Api { status, body },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured deadline on the error
            ProviderError::Timeout(Duration::from_secs(0))
        } else if err.is_connect() || err.is_request() {
            ProviderError::Transport(err.to_string())
        } else {
            ProviderError::MalformedResponse(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = ProviderError::from_status(429, "slow down".to_string());
        assert_eq!(err.class(), RetryClass::RateLimited);

        let err = ProviderError::from_status(401, "expired".to_string());
        assert_eq!(err.class(), RetryClass::AuthExpired);

        let err = ProviderError::from_status(500, "boom".to_string());
        assert_eq!(err.class(), RetryClass::Fatal);

        let err = ProviderError::from_status(403, "forbidden".to_string());
        assert_eq!(err.class(), RetryClass::Fatal);
    }

    #[test]
    fn test_transport_is_retryable() {
        let err = ProviderError::Transport("connection refused".to_string());
        assert_eq!(err.class(), RetryClass::Transport);
    }

    #[test]
    fn test_timeout_is_fatal() {
        let err = ProviderError::Timeout(Duration::from_secs(60));
        assert_eq!(err.class(), RetryClass::Fatal);
    }

    #[test]
    fn test_capability_is_fatal() {
        let err = ProviderError::CapabilityUnsupported {
            provider: "lmstudio".to_string(),
            capability: "image attachments".to_string(),
        };
        assert_eq!(err.class(), RetryClass::Fatal);
        assert!(err.to_string().contains("image attachments"));
    }
}
