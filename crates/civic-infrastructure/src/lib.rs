//! Persistence and configuration for CivicSense.
//!
//! Proposal stores (in-memory, JSON directory, Firestore), path resolution,
//! config/secret loading and a static identity provider.

mod atomic_json;
pub mod config_service;
pub mod firestore_codec;
pub mod firestore_proposal_repository;
pub mod in_memory_proposal_repository;
pub mod json_dir_proposal_repository;
pub mod paths;
pub mod static_identity;
pub mod timed_proposal_repository;

pub use crate::config_service::ConfigService;
pub use crate::firestore_proposal_repository::FirestoreProposalRepository;
pub use crate::in_memory_proposal_repository::InMemoryProposalRepository;
pub use crate::json_dir_proposal_repository::JsonDirProposalRepository;
pub use crate::paths::CivicPaths;
pub use crate::static_identity::StaticIdentity;
pub use crate::timed_proposal_repository::TimedProposalRepository;

use civic_core::config::{FirestoreConfig, StorageBackend};
use civic_core::error::{CivicError, Result};
use civic_core::identity::IdentityProvider;
use civic_core::proposal::ProposalRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Opens the proposal store selected by `storage.backend`, with every call
/// bounded by `call_timeout`.
pub async fn open_repository(
    backend: StorageBackend,
    paths: &CivicPaths,
    firestore: Option<&FirestoreConfig>,
    identity: Arc<dyn IdentityProvider>,
    call_timeout: Duration,
) -> Result<Arc<dyn ProposalRepository>> {
    let repository: Arc<dyn ProposalRepository> = match backend {
        StorageBackend::Memory => Arc::new(InMemoryProposalRepository::new()),
        StorageBackend::JsonDir => Arc::new(JsonDirProposalRepository::at(paths.pins_dir()?).await?),
        StorageBackend::Firestore => {
            let config = firestore.cloned().ok_or_else(|| {
                CivicError::config("storage.backend is firestore but secret.json has no firestore section")
            })?;
            Arc::new(FirestoreProposalRepository::new(config, identity))
        }
    };
    info!(%backend, timeout_ms = call_timeout.as_millis() as u64, "Proposal store opened");
    Ok(Arc::new(TimedProposalRepository::new(repository, call_timeout)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_core::identity::GuestIdentity;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_repository() {
        let temp_dir = TempDir::new().unwrap();
        let paths = CivicPaths::new(Some(temp_dir.path()));

        let repo = open_repository(
            StorageBackend::JsonDir,
            &paths,
            None,
            Arc::new(GuestIdentity),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(repo.list_all().await.unwrap().is_empty());
        assert!(temp_dir.path().join("pins").is_dir());

        let missing = open_repository(
            StorageBackend::Firestore,
            &paths,
            None,
            Arc::new(GuestIdentity),
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(missing, Err(CivicError::Config(_))));
    }
}
