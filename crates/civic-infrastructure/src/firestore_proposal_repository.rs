//! Firestore-backed ProposalRepository over the REST API.
//!
//! Writes go through `documents:commit` so creates can carry an
//! `exists: false` precondition (one document per submission key) and
//! upvotes can use a server-side `increment` transform.

use crate::firestore_codec::{
    self, CommitResponse, Document, FIELD_AGREEMENT_COUNT, FIELD_CREATED_AT, ListResponse,
};
use async_trait::async_trait;
use chrono::Utc;
use civic_core::config::FirestoreConfig;
use civic_core::error::{CivicError, Result};
use civic_core::identity::IdentityProvider;
use civic_core::proposal::{
    ChangeFeed, NewProposal, Proposal, ProposalChange, ProposalRepository,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const COLLECTION: &str = "pins";
const PAGE_SIZE: &str = "300";
const BACKEND_NAME: &str = "firestore";

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Failed Firestore call, keeping the canonical status for decisions.
#[derive(Debug)]
struct ApiFailure {
    http: Option<StatusCode>,
    status: String,
    message: String,
}

impl ApiFailure {
    fn is_already_exists(&self) -> bool {
        self.http == Some(StatusCode::CONFLICT) || self.status == "ALREADY_EXISTS"
    }

    fn is_missing_document(&self) -> bool {
        self.http == Some(StatusCode::NOT_FOUND)
            || self.status == "NOT_FOUND"
            || self.status == "FAILED_PRECONDITION"
    }

    fn into_error(self) -> CivicError {
        let retryable = match self.http {
            None => true,
            Some(code) => code.is_server_error() || code == StatusCode::TOO_MANY_REQUESTS,
        };
        let code = self
            .http
            .map(|c| c.as_u16().to_string())
            .unwrap_or_else(|| "transport".to_string());
        CivicError::gateway(
            BACKEND_NAME,
            format!("{} {}: {}", code, self.status, self.message),
            retryable,
        )
    }
}

impl From<reqwest::Error> for ApiFailure {
    fn from(err: reqwest::Error) -> Self {
        Self {
            http: err.status(),
            status: String::new(),
            // The URL may carry the API key
            message: err.without_url().to_string(),
        }
    }
}

/// Shared proposal store in a Firestore `pins` collection.
pub struct FirestoreProposalRepository {
    client: Client,
    config: FirestoreConfig,
    identity: Arc<dyn IdentityProvider>,
    base_url: String,
    feed: ChangeFeed,
}

impl FirestoreProposalRepository {
    pub fn new(config: FirestoreConfig, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            client: Client::new(),
            config,
            identity,
            base_url: FIRESTORE_BASE_URL.to_string(),
            feed: ChangeFeed::default(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Overrides the API root, e.g. to point at the Firestore emulator.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `projects/{p}/databases/{d}/documents`
    fn database_path(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.config.project_id, self.config.database
        )
    }

    fn document_name(&self, id: &str) -> String {
        format!("{}/{}/{}", self.database_path(), COLLECTION, id)
    }

    fn document_url(&self, id: &str) -> String {
        format!("{}/{}", self.base_url, self.document_name(id))
    }

    fn collection_url(&self) -> String {
        format!("{}/{}/{}", self.base_url, self.database_path(), COLLECTION)
    }

    fn commit_url(&self) -> String {
        format!("{}/{}:commit", self.base_url, self.database_path())
    }

    /// Adds the signed-in user's bearer token and the optional API key.
    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = match self.identity.current().and_then(|i| i.id_token) {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        match &self.config.api_key {
            Some(key) => builder.query(&[("key", key.as_str())]),
            None => builder,
        }
    }

    fn create_body(&self, proposal: &NewProposal) -> Value {
        json!({
            "writes": [{
                "update": {
                    "name": self.document_name(&proposal.submission_key),
                    "fields": firestore_codec::encode_new(proposal),
                },
                "currentDocument": { "exists": false },
                "updateTransforms": [{
                    "fieldPath": FIELD_CREATED_AT,
                    "setToServerValue": "REQUEST_TIME",
                }],
            }]
        })
    }

    fn upvote_body(&self, id: &str) -> Value {
        json!({
            "writes": [{
                "transform": {
                    "document": self.document_name(id),
                    "fieldTransforms": [{
                        "fieldPath": FIELD_AGREEMENT_COUNT,
                        "increment": { "integerValue": "1" },
                    }],
                },
                "currentDocument": { "exists": true },
            }]
        })
    }

    async fn send(&self, builder: RequestBuilder) -> std::result::Result<reqwest::Response, ApiFailure> {
        let response = self.authorize(builder).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let (canonical, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => (envelope.error.status, envelope.error.message),
            Err(_) => (String::new(), body),
        };
        Err(ApiFailure {
            http: Some(status),
            status: canonical,
            message,
        })
    }

    async fn commit(&self, body: &Value) -> std::result::Result<CommitResponse, ApiFailure> {
        let response = self
            .send(self.client.post(self.commit_url()).json(body))
            .await?;
        Ok(response.json().await?)
    }
}

fn decode_failure(err: reqwest::Error) -> CivicError {
    CivicError::data_access(format!(
        "Malformed Firestore response: {}",
        err.without_url()
    ))
}

#[async_trait]
impl ProposalRepository for FirestoreProposalRepository {
    async fn create(&self, proposal: NewProposal) -> Result<String> {
        let id = proposal.submission_key.clone();
        match self.commit(&self.create_body(&proposal)).await {
            Ok(response) => {
                let created_at = response
                    .first_transform()
                    .and_then(|v| v.get("timestampValue"))
                    .and_then(Value::as_str)
                    .or(response.commit_time.as_deref())
                    .and_then(firestore_codec::parse_timestamp)
                    .unwrap_or_else(Utc::now);
                debug!(id = %id, "Proposal document created");
                self.feed
                    .publish(ProposalChange::Created(proposal.into_proposal(id.clone(), created_at)));
                Ok(id)
            }
            Err(failure) if failure.is_already_exists() || failure.status == "FAILED_PRECONDITION" => {
                debug!(id = %id, "Proposal document already written");
                Ok(id)
            }
            Err(failure) => Err(failure.into_error()),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Proposal>> {
        match self.send(self.client.get(self.document_url(id))).await {
            Ok(response) => {
                let document: Document = response.json().await.map_err(decode_failure)?;
                Ok(Some(firestore_codec::decode(&document)?))
            }
            Err(failure) if failure.http == Some(StatusCode::NOT_FOUND) => Ok(None),
            Err(failure) => Err(failure.into_error()),
        }
    }

    async fn upvote(&self, id: &str) -> Result<u64> {
        let response = match self.commit(&self.upvote_body(id)).await {
            Ok(response) => response,
            Err(failure) if failure.is_missing_document() => {
                return Err(CivicError::not_found("Proposal", id));
            }
            Err(failure) => return Err(failure.into_error()),
        };

        let agreement_count = response
            .first_transform()
            .and_then(firestore_codec::value_as_u64)
            .ok_or_else(|| CivicError::data_access("Increment returned no value"))?;

        self.feed.publish(ProposalChange::Upvoted {
            id: id.to_string(),
            agreement_count,
        });
        Ok(agreement_count)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.send(self.client.delete(self.document_url(id))).await {
            Ok(_) => {}
            Err(failure) if failure.http == Some(StatusCode::NOT_FOUND) => return Ok(()),
            Err(failure) => return Err(failure.into_error()),
        }
        self.feed.publish(ProposalChange::Deleted { id: id.to_string() });
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Proposal>> {
        let mut proposals = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut builder = self
                .client
                .get(self.collection_url())
                .query(&[("pageSize", PAGE_SIZE)]);
            if let Some(token) = &page_token {
                builder = builder.query(&[("pageToken", token.as_str())]);
            }

            let page: ListResponse = self
                .send(builder)
                .await
                .map_err(ApiFailure::into_error)?
                .json()
                .await
                .map_err(decode_failure)?;

            for document in &page.documents {
                match firestore_codec::decode(document) {
                    Ok(proposal) => proposals.push(proposal),
                    Err(e) => warn!(name = %document.name, error = %e, "Skipping malformed proposal"),
                }
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(proposals)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProposalChange> {
        self.feed.subscribe()
    }
}
