//! Error types for the broker client
//!
//! Construction and handshake failures abort a connect attempt, an unexpected
//! close is surfaced once per occurrence, and callback failures are isolated
//! per subscriber during dispatch.

use crate::transport::BackendError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Longest error text kept after sanitizing
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok());

static SENSITIVE_PATH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+").ok()
});

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to create broker client for {endpoint}: {reason}")]
    Construction { endpoint: String, reason: String },

    #[error("Failed to connect to {endpoint}: {reason}")]
    Handshake { endpoint: String, reason: String },

    #[error("Connection to broker closed unexpectedly")]
    UnexpectedClose,

    #[error("Subscriber callback for filter '{filter}' failed on topic '{topic}': {reason}")]
    Callback {
        filter: String,
        topic: String,
        reason: String,
    },

    #[error("Broker operation failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("A broker client is already installed")]
    AlreadyInstalled,

    #[error("No broker client is installed")]
    NotInstalled,
}

impl ClientError {
    /// Create construction error with a sanitized reason
    pub fn construction<S: Into<String>>(endpoint: S, reason: &str) -> Self {
        Self::Construction {
            endpoint: endpoint.into(),
            reason: sanitize_error_message(reason),
        }
    }

    /// Create handshake error with a sanitized reason
    pub fn handshake<S: Into<String>>(endpoint: S, reason: &str) -> Self {
        Self::Handshake {
            endpoint: endpoint.into(),
            reason: sanitize_error_message(reason),
        }
    }

    /// Create callback error
    pub fn callback<F: Into<String>, T: Into<String>>(filter: F, topic: T, reason: &str) -> Self {
        Self::Callback {
            filter: filter.into(),
            topic: topic.into(),
            reason: sanitize_error_message(reason),
        }
    }

    /// True for failures that end a connect attempt
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Construction { .. } | ClientError::Handshake { .. }
        )
    }
}

/// Strip credentials and sensitive paths from broker-provided error text
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(secrets) = SECRET_PATTERN.as_ref() {
        sanitized = secrets.replace_all(&sanitized, "${1}=***").into_owned();
    }

    if let Some(paths) = SENSITIVE_PATH_PATTERN.as_ref() {
        sanitized = paths.replace_all(&sanitized, "/***REDACTED***/").into_owned();
    }

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
