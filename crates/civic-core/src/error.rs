//! Error types for the CivicSense engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// The one error type shared by every CivicSense crate.
///
/// Collaborator failures (inference, snapshots, nearby search, document
/// stores) are mapped onto these variants where the adapter returns, so the
/// dialogue layer only reasons about this type.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum CivicError {
    /// A proposal or other record is missing from the store.
    #[error("{entity_type} '{id}' does not exist")]
    NotFound { entity_type: &'static str, id: String },

    #[error("File system failure: {message}")]
    Io { message: String },

    /// The proposal store rejected or could not serve a request.
    #[error("Proposal store failure: {0}")]
    DataAccess(String),

    #[error("Could not decode {format}: {message}")]
    Serialization { format: String, message: String },

    #[error("Bad configuration: {0}")]
    Config(String),

    /// Input rejected before any network call was made.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dialogue session is busy processing another message")]
    SessionBusy,

    /// The session already produced its proposal.
    #[error("Dialogue session is closed")]
    SessionClosed,

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    /// A hosted collaborator (model, maps, document store) failed.
    #[error("Gateway error from {backend}: {message}")]
    Gateway {
        backend: String,
        message: String,
        retryable: bool,
    },

    #[error("Unexpected state: {0}")]
    Internal(String),
}

impl CivicError {
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn data_access(message: impl Into<String>) -> Self {
        Self::DataAccess(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after_ms: after.as_millis() as u64,
        }
    }

    pub fn gateway(backend: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Gateway {
            backend: backend.into(),
            message: message.into(),
            retryable,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Whether the same request may succeed when attempted again.
    ///
    /// Timeouts, store hiccups and gateway failures flagged retryable are
    /// recoverable. Validation and configuration problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Io { .. } | Self::DataAccess(_) => true,
            Self::Gateway { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<std::io::Error> for CivicError {
    fn from(err: std::io::Error) -> Self {
        Self::io(format!("{err} ({:?})", err.kind()))
    }
}

impl From<serde_json::Error> for CivicError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".into(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for CivicError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CivicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let err = CivicError::timeout("proposal write", Duration::from_secs(5));
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "proposal write timed out after 5000ms");
    }

    #[test]
    fn test_invalid_input_is_not_retryable() {
        let err = CivicError::invalid_input("message is empty");
        assert!(err.is_invalid_input());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_gateway_retryable_flag() {
        assert!(CivicError::gateway("gemini", "503", true).is_retryable());
        assert!(!CivicError::gateway("gemini", "400", false).is_retryable());
    }
}
