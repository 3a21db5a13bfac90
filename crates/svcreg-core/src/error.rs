//! Error types for service registration
//!
//! Setup and configuration paths return [`Error`]. Failures that happen once a
//! registration is in flight are reported as an opaque provider
//! [`ErrorCode`](crate::record::ErrorCode) through
//! [`RegistrarEvent::Error`](crate::registrar::RegistrarEvent::Error).

use thiserror::Error;

/// Result type alias for svcreg operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for svcreg
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = Error::provider("mdns-sd", "daemon unavailable");
        assert_eq!(err.to_string(), "Provider error (mdns-sd): daemon unavailable");
    }

    #[test]
    fn test_config_error_display() {
        let err = Error::config("Service port must be > 0");
        assert_eq!(err.to_string(), "Configuration error: Service port must be > 0");
    }
}
