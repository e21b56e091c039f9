//! Error types for the registration bot

use thiserror::Error;

/// Result type for bot operations
pub type BotResult<T> = Result<T, BotError>;

/// Errors that can occur in the registration bot
#[derive(Debug, Error)]
pub enum BotError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Neither SRV nor address records could be resolved for a reseller domain
    #[error("Unable to resolve {domain}: {message}")]
    Resolution { domain: String, message: String },

    /// REGISTER could not be sent or no response was correlated
    #[error("Signaling error: {message}")]
    Signaling { message: String },

    /// Transaction timed out waiting for a final response
    #[error("No final response after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Upstream sent something we cannot use
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Bus or key-value backend failure
    #[error(transparent)]
    Infra(#[from] infra_common::Error),

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BotError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a resolution error
    pub fn resolution(domain: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            domain: domain.into(),
            message: message.into(),
        }
    }

    /// Create a signaling error
    pub fn signaling(message: impl Into<String>) -> Self {
        Self::Signaling {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for BotError {
    fn from(err: std::io::Error) -> Self {
        Self::signaling(err.to_string())
    }
}
