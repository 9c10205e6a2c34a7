//! In-memory ProposalRepository, used by tests and `storage.backend = "memory"`.

use async_trait::async_trait;
use chrono::Utc;
use civic_core::error::{CivicError, Result};
use civic_core::proposal::{
    ChangeFeed, NewProposal, Proposal, ProposalChange, ProposalRepository,
};
use std::collections::HashMap;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    proposals: HashMap<String, Proposal>,
    /// submission_key -> proposal id
    submissions: HashMap<String, String>,
    order: Vec<String>,
}

/// Process-local proposal store.
#[derive(Default)]
pub struct InMemoryProposalRepository {
    inner: RwLock<Inner>,
    feed: ChangeFeed,
}

impl InMemoryProposalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProposalRepository for InMemoryProposalRepository {
    async fn create(&self, proposal: NewProposal) -> Result<String> {
        let created = {
            let mut inner = self.inner.write().await;
            if let Some(existing) = inner.submissions.get(&proposal.submission_key) {
                return Ok(existing.clone());
            }

            let id = Uuid::new_v4().to_string();
            let submission_key = proposal.submission_key.clone();
            let created = proposal.into_proposal(id.clone(), Utc::now());
            inner.submissions.insert(submission_key, id.clone());
            inner.order.push(id.clone());
            inner.proposals.insert(id, created.clone());
            created
        };

        let id = created.id.clone();
        self.feed.publish(ProposalChange::Created(created));
        Ok(id)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Proposal>> {
        Ok(self.inner.read().await.proposals.get(id).cloned())
    }

    async fn upvote(&self, id: &str) -> Result<u64> {
        let agreement_count = {
            let mut inner = self.inner.write().await;
            let proposal = inner
                .proposals
                .get_mut(id)
                .ok_or_else(|| CivicError::not_found("Proposal", id))?;
            proposal.agreement_count += 1;
            proposal.agreement_count
        };

        self.feed.publish(ProposalChange::Upvoted {
            id: id.to_string(),
            agreement_count,
        });
        Ok(agreement_count)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let removed = {
            let mut inner = self.inner.write().await;
            let removed = inner.proposals.remove(id);
            if removed.is_some() {
                inner.order.retain(|existing| existing != id);
                inner.submissions.retain(|_, existing| existing != id);
            }
            removed.is_some()
        };

        if removed {
            self.feed.publish(ProposalChange::Deleted { id: id.to_string() });
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Proposal>> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.proposals.get(id).cloned())
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProposalChange> {
        self.feed.subscribe()
    }
}
