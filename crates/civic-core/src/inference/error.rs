//! Errors raised by inference backends.

use crate::error::CivicError;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single model call, or of every backend in a gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// Transport failure or non-success HTTP status.
    #[error("Request failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Http {
        status: Option<u16>,
        message: String,
        retryable: bool,
        retry_after: Option<Duration>,
    },

    /// The model answered without usable text or image parts.
    #[error("Model returned an empty response")]
    EmptyResponse,

    /// The request was rejected before reaching any backend.
    #[error("Invalid inference request: {0}")]
    InvalidRequest(String),

    #[error("Inference timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// Every configured backend failed; failures are in attempt order.
    #[error("All inference backends failed: {}", summarize(.0))]
    Exhausted(Vec<(String, InferenceError)>),
}

fn summarize(failures: &[(String, InferenceError)]) -> String {
    failures
        .iter()
        .map(|(backend, error)| format!("{backend}: {error}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl InferenceError {
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { retryable, .. } => *retryable,
            Self::Timeout { .. } | Self::EmptyResponse => true,
            Self::InvalidRequest(_) => false,
            Self::Exhausted(failures) => failures.iter().any(|(_, e)| e.is_retryable()),
        }
    }
}

impl From<InferenceError> for CivicError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Timeout { after_ms } => CivicError::Timeout {
                operation: "inference".to_string(),
                after_ms,
            },
            InferenceError::InvalidRequest(message) => CivicError::InvalidInput(message),
            other => {
                let retryable = other.is_retryable();
                CivicError::gateway("inference", other.to_string(), retryable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_conversion() {
        let http = InferenceError::Http {
            status: Some(503),
            message: "UNAVAILABLE: overloaded".to_string(),
            retryable: true,
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(http.to_string(), "Request failed (503): UNAVAILABLE: overloaded");

        let exhausted = InferenceError::Exhausted(vec![
            ("gemini-2.5-flash".to_string(), http),
            ("gemini-2.0-flash".to_string(), InferenceError::EmptyResponse),
        ]);
        assert!(exhausted.is_retryable());
        assert!(exhausted.to_string().contains("gemini-2.0-flash: Model returned an empty response"));

        let civic: CivicError = InferenceError::timeout(Duration::from_millis(1500)).into();
        assert!(civic.is_timeout());

        let civic: CivicError = InferenceError::InvalidRequest("empty".into()).into();
        assert!(civic.is_invalid_input());
    }
}
