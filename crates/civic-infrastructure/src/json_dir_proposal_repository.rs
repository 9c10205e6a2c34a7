//! Directory-of-JSON-files ProposalRepository implementation.

use crate::atomic_json::AtomicJsonFile;
use crate::paths::CivicPaths;
use async_trait::async_trait;
use chrono::Utc;
use civic_core::error::{CivicError, Result};
use civic_core::proposal::{
    ChangeFeed, NewProposal, Proposal, ProposalChange, ProposalRepository,
};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::warn;

/// Proposal store keeping one pretty-printed JSON document per pin.
///
/// Directory structure:
/// ```text
/// pins/
/// ├── <submission-key-1>.json
/// └── <submission-key-2>.json
/// ```
///
/// The document id is the submission key, so a repeated create for the
/// same dialogue session finds the existing file instead of writing a
/// second one.
pub struct JsonDirProposalRepository {
    dir: PathBuf,
    feed: ChangeFeed,
}

impl JsonDirProposalRepository {
    /// Creates a repository under `pins/` of the given config base (for testing),
    /// or of `~/.config/civicsense` when `None`.
    pub async fn new(base_dir: Option<&Path>) -> Result<Self> {
        let dir = CivicPaths::new(base_dir).pins_dir()?;
        Self::at(dir).await
    }

    /// Creates a repository storing documents directly in `dir`.
    pub async fn at(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CivicError::io(format!("Failed to create pins directory: {}", e)))?;
        Ok(Self {
            dir,
            feed: ChangeFeed::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document(&self, id: &str) -> Result<AtomicJsonFile<Proposal>> {
        validate_id(id)?;
        Ok(AtomicJsonFile::new(self.dir.join(format!("{id}.json"))))
    }
}

/// Ids become file names; only a conservative character set is accepted.
fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CivicError::invalid_input(format!("Invalid proposal id '{id}'")))
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CivicError::internal(format!("Storage task failed: {}", e)))?
}

#[async_trait]
impl ProposalRepository for JsonDirProposalRepository {
    async fn create(&self, proposal: NewProposal) -> Result<String> {
        let id = proposal.submission_key.clone();
        let document = self.document(&id)?;
        let created = proposal.into_proposal(id.clone(), Utc::now());

        let (written, created) = blocking(move || {
            let written = document.create_if_absent(&created)?;
            Ok((written, created))
        })
        .await?;

        if written {
            self.feed.publish(ProposalChange::Created(created));
        }
        Ok(id)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Proposal>> {
        if validate_id(id).is_err() {
            return Ok(None);
        }
        let document = self.document(id)?;
        blocking(move || document.load()).await
    }

    async fn upvote(&self, id: &str) -> Result<u64> {
        let document = self.document(id)?;
        let owned_id = id.to_string();
        let agreement_count = blocking(move || {
            document.update(|current| {
                let mut proposal =
                    current.ok_or_else(|| CivicError::not_found("Proposal", owned_id))?;
                proposal.agreement_count += 1;
                let count = proposal.agreement_count;
                Ok((proposal, count))
            })
        })
        .await?;

        self.feed.publish(ProposalChange::Upvoted {
            id: id.to_string(),
            agreement_count,
        });
        Ok(agreement_count)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let document = self.document(id)?;
        if blocking(move || document.remove()).await? {
            self.feed.publish(ProposalChange::Deleted { id: id.to_string() });
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Proposal>> {
        let dir = self.dir.clone();
        let mut proposals = blocking(move || {
            let mut proposals = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                let is_document = path.extension().is_some_and(|ext| ext == "json")
                    && !path
                        .file_name()
                        .is_some_and(|name| name.to_string_lossy().starts_with('.'));
                if !is_document {
                    continue;
                }
                // One unreadable document does not hide the rest
                match AtomicJsonFile::<Proposal>::new(path.clone()).load() {
                    Ok(Some(proposal)) => proposals.push(proposal),
                    Ok(None) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable proposal"),
                }
            }
            Ok(proposals)
        })
        .await?;

        proposals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(proposals)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProposalChange> {
        self.feed.subscribe()
    }
}
