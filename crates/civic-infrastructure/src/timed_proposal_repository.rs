//! Time-bounded proposal store.
//!
//! Wraps any [`ProposalRepository`] so every call gives up after a fixed
//! limit instead of hanging on a stalled connection.

use async_trait::async_trait;
use civic_core::error::{CivicError, Result};
use civic_core::geo::LatLng;
use civic_core::proposal::{NewProposal, Proposal, ProposalChange, ProposalRepository};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::warn;

pub struct TimedProposalRepository {
    inner: Arc<dyn ProposalRepository>,
    limit: Duration,
}

impl TimedProposalRepository {
    pub fn new(inner: Arc<dyn ProposalRepository>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.limit, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, limit_ms = self.limit.as_millis() as u64, "Proposal store call timed out");
                Err(CivicError::timeout(format!("proposal {operation}"), self.limit))
            }
        }
    }
}

#[async_trait]
impl ProposalRepository for TimedProposalRepository {
    async fn create(&self, proposal: NewProposal) -> Result<String> {
        self.bounded("create", self.inner.create(proposal)).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Proposal>> {
        self.bounded("lookup", self.inner.find_by_id(id)).await
    }

    async fn upvote(&self, id: &str) -> Result<u64> {
        self.bounded("upvote", self.inner.upvote(id)).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.bounded("delete", self.inner.delete(id)).await
    }

    async fn list_all(&self) -> Result<Vec<Proposal>> {
        self.bounded("listing", self.inner.list_all()).await
    }

    async fn list_near(&self, center: LatLng, radius_km: f64) -> Result<Vec<Proposal>> {
        self.bounded("listing", self.inner.list_near(center, radius_km))
            .await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Proposal>> {
        self.bounded("listing", self.inner.list_recent(limit)).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ProposalChange> {
        self.inner.subscribe()
    }
}
