//! Error types for Inbox Assist.

use std::time::Duration;

/// Startup error: loading configuration and wiring providers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mail store and relay errors.
///
/// Per-message parse failures never show up here: the normalizer absorbs them
/// into default field values.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// Network, TLS, greeting or timeout failure.
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    /// The server rejected the credentials.
    #[error("Authentication failed for {user}: {reason}")]
    Auth { user: String, reason: String },

    /// Search, fetch, select or flag failure on an open session.
    #[error("Store operation {operation} failed: {reason}")]
    StoreOperation { operation: String, reason: String },

    /// Relay submission failure. Nothing was delivered.
    #[error("Failed to send reply to {to}: {reason}")]
    Send { to: String, reason: String },
}

impl MailError {
    pub(crate) fn timeout(host: &str, after: Duration) -> Self {
        Self::Connection {
            host: host.to_string(),
            reason: format!("timed out after {after:?}"),
        }
    }

    /// Whether a caller-side retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Reply suggestion provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },
}

/// Result type alias for Inbox Assist.
pub type Result<T> = std::result::Result<T, Error>;
