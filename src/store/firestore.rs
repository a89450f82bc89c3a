use super::document::{self, Document, VOTE_COUNTS_FIELD};
use super::{PollStore, StoreError};
use crate::models::{PollSnapshot, VoteAssignment, VoteTally};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

const FIRESTORE_API: &str = "https://firestore.googleapis.com/v1";

/// Poll store backed by the Firestore REST API.
///
/// Polls live at `polls/{pollId}`, vote documents at `polls/{pollId}/votes/{docId}`.
pub struct FirestoreStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl FirestoreStore {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(500)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn documents_url(project_id: &str) -> String {
        format!("{}/projects/{}/databases/(default)/documents", FIRESTORE_API, project_id)
    }

    fn poll_url(&self, poll_id: &str) -> String {
        format!("{}/polls/{}", self.base_url, poll_id)
    }

    fn with_key(&self, mut query: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        if let Some(key) = &self.api_key {
            query.push(("key", key.clone()));
        }
        query
    }
}

fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(StoreError::HttpStatus(status.as_u16()))
    }
}

#[async_trait]
impl PollStore for FirestoreStore {
    async fn fetch_poll(&self, poll_id: &str) -> Result<PollSnapshot, StoreError> {
        let response = self
            .client
            .get(self.poll_url(poll_id))
            .query(&self.with_key(Vec::new()))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(poll_id.to_string()));
        }

        let doc: Document = check_status(response)?.json().await?;
        document::decode_poll(poll_id, &doc)
    }

    async fn insert_vote(&self, poll_id: &str, vote: &VoteAssignment) -> Result<(), StoreError> {
        let doc_id = vote.document_id();
        let response = self
            .client
            .post(format!("{}/votes", self.poll_url(poll_id)))
            .query(&self.with_key(vec![("documentId", doc_id.clone())]))
            .json(&document::encode_vote(vote))
            .send()
            .await?;

        check_status(response)?;
        debug!("Inserted vote document {} on poll {}", doc_id, poll_id);
        Ok(())
    }

    async fn patch_vote_counts(&self, poll_id: &str, counts: &VoteTally) -> Result<(), StoreError> {
        let body = document::encode_vote_counts(counts)?;
        let response = self
            .client
            .patch(self.poll_url(poll_id))
            .query(&self.with_key(vec![("updateMask.fieldPaths", VOTE_COUNTS_FIELD.to_string())]))
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(poll_id.to_string()));
        }

        check_status(response)?;
        Ok(())
    }
}
