//! Engine error types.

use reqwest::StatusCode;
use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors that can occur while delivering notifications.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Connection-level failure on either channel (refused, dropped, reset).
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// HTTP client failure from reqwest.
    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    /// Non-success HTTP response.
    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    /// Malformed payload. Swallowed at the channel boundary, never escalated
    /// to a connection-level failure.
    #[error("malformed payload: {reason}")]
    Parse { reason: String },

    /// An attempt (connect or heartbeat window) ran out of time.
    #[error("timed out: {reason}")]
    Timeout { reason: String },

    /// The push retry budget was exhausted. Terminal until an explicit restart.
    #[error("reconnect budget exhausted after {attempts} attempts")]
    BudgetExhausted { attempts: u32 },

    /// Invalid engine configuration.
    #[error("configuration error: {reason}")]
    InvalidConfig { reason: String },
}

impl NotifyError {
    /// Create a transport error.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::Timeout {
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>, operation: &'static str) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    /// Whether the reconnect/fallback machinery should treat this error as
    /// transient. Transport drops, network failures and heartbeat silence all
    /// drive the same retry path; parse and configuration errors never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Network { source } => is_retryable_reqwest_error(source),
            Self::HttpStatus { status, .. } => status.is_server_error(),
            Self::Parse { .. } | Self::BudgetExhausted { .. } | Self::InvalidConfig { .. } => {
                false
            }
        }
    }
}

/// Classify a reqwest error as retryable or non-retryable.
///
/// Retryable: connect, timeout, request, body read, and decode errors.
/// Non-retryable: redirect and builder errors.
pub(crate) fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}
