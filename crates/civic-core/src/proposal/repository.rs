//! Proposal repository trait.
//!
//! Defines the interface of the shared document store holding proposals
//! ("pins").

use super::model::{NewProposal, Proposal, ProposalChange};
use crate::error::Result;
use crate::geo::LatLng;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// An abstract repository for the proposal collection.
///
/// This trait decouples the dialogue core from the concrete document store
/// (in-memory, local JSON directory, Firestore).
///
/// # Implementation Notes
///
/// Implementations should handle:
/// - Idempotent creates keyed by `NewProposal::submission_key`
/// - Atomic single-document increments for upvotes
/// - Broadcasting every successful mutation to subscribers
#[async_trait]
pub trait ProposalRepository: Send + Sync {
    /// Writes a new proposal and returns its id.
    ///
    /// Writing the same `submission_key` twice must not create a second
    /// document; the id of the existing one is returned instead.
    async fn create(&self, proposal: NewProposal) -> Result<String>;

    /// Finds a proposal by its ID.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Proposal))`: Proposal found
    /// - `Ok(None)`: Proposal not found
    /// - `Err(_)`: Error occurred during retrieval
    async fn find_by_id(&self, id: &str) -> Result<Option<Proposal>>;

    /// Increments `agreement_count` by exactly one and returns the new value.
    async fn upvote(&self, id: &str) -> Result<u64>;

    /// Deletes a proposal (no-op if it does not exist).
    async fn delete(&self, id: &str) -> Result<()>;

    /// Lists every stored proposal.
    async fn list_all(&self) -> Result<Vec<Proposal>>;

    /// Lists proposals within `radius_km` of `center`.
    async fn list_near(&self, center: LatLng, radius_km: f64) -> Result<Vec<Proposal>> {
        let all = self.list_all().await?;
        Ok(all
            .into_iter()
            .filter(|p| p.location.distance_km(&center) <= radius_km)
            .collect())
    }

    /// Lists the most recently created proposals, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Proposal>> {
        let mut all = self.list_all().await?;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }

    /// Subscribes to changes made through this repository.
    fn subscribe(&self) -> broadcast::Receiver<ProposalChange>;
}

/// Broadcast channel shared by repository implementations.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ProposalChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, change: ProposalChange) {
        // No subscribers is not an error
        let _ = self.sender.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProposalChange> {
        self.sender.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(64)
    }
}
