//! Inference gateway with ordered backend fallback.

use super::error::InferenceError;
use super::types::{InferenceRequest, InferenceResponse};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A hosted model endpoint.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Stable name used in logs and responses (usually the model id).
    fn name(&self) -> &str;

    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError>;
}

/// Tries an ordered list of backends within one shared time budget.
///
/// The first backend producing a non-empty response wins. Each attempt may
/// use only what is left of the budget; once it is spent the remaining
/// backends are skipped.
#[derive(Clone)]
pub struct InferenceGateway {
    backends: Vec<Arc<dyn InferenceBackend>>,
    budget: Duration,
}

impl InferenceGateway {
    pub fn new(budget: Duration) -> Self {
        Self {
            backends: Vec::new(),
            budget,
        }
    }

    pub fn from_backends(backends: Vec<Arc<dyn InferenceBackend>>, budget: Duration) -> Self {
        Self { backends, budget }
    }

    /// Appends a backend after the existing ones.
    pub fn with_backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Same backends with a different budget.
    pub fn with_budget(&self, budget: Duration) -> Self {
        Self {
            backends: self.backends.clone(),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub async fn generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError> {
        if self.backends.is_empty() {
            return Err(InferenceError::InvalidRequest(
                "no inference backend configured".to_string(),
            ));
        }
        if request.message.trim().is_empty() && request.attachments.is_empty() {
            return Err(InferenceError::InvalidRequest(
                "request has neither text nor attachments".to_string(),
            ));
        }

        let started = Instant::now();
        let deadline = started + self.budget;
        let mut failures: Vec<(String, InferenceError)> = Vec::new();

        for backend in &self.backends {
            let name = backend.name().to_string();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                failures.push((name, InferenceError::timeout(self.budget)));
                break;
            }

            match tokio::time::timeout(remaining, backend.generate(request)).await {
                Ok(Ok(response)) if !response.is_empty() => {
                    debug!(
                        backend = %name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Inference succeeded"
                    );
                    return Ok(response);
                }
                Ok(Ok(_)) => {
                    warn!(backend = %name, "Backend returned an empty response, trying next");
                    failures.push((name, InferenceError::EmptyResponse));
                }
                Ok(Err(InferenceError::InvalidRequest(message))) => {
                    return Err(InferenceError::InvalidRequest(message));
                }
                Ok(Err(error)) => {
                    warn!(backend = %name, error = %error, "Backend failed, trying next");
                    failures.push((name, error));
                }
                Err(_) => {
                    warn!(backend = %name, budget_ms = self.budget.as_millis() as u64, "Inference budget exhausted");
                    failures.push((name, InferenceError::timeout(self.budget)));
                    break;
                }
            }
        }

        if failures.len() == 1 {
            let (_, error) = failures.remove(0);
            Err(error)
        } else {
            Err(InferenceError::Exhausted(failures))
        }
    }
}

impl std::fmt::Debug for InferenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceGateway")
            .field("backends", &self.backend_names())
            .field("budget", &self.budget)
            .finish()
    }
}
