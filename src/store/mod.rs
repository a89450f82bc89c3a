mod document;
mod firestore;
#[cfg(test)]
pub mod memory;

pub use firestore::FirestoreStore;

use crate::models::{FailureReason, PollSnapshot, VoteAssignment, VoteTally};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("poll {0} not found")]
    NotFound(String),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
    #[error("malformed poll document: {0}")]
    Decode(String),
}

impl StoreError {
    // How a failed vote insert is recorded in its outcome.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            StoreError::Timeout => FailureReason::Timeout,
            StoreError::Network(detail) => FailureReason::Network(detail.clone()),
            StoreError::HttpStatus(code) => FailureReason::HttpStatus(*code),
            StoreError::NotFound(_) => FailureReason::HttpStatus(404),
            StoreError::Decode(detail) => FailureReason::Network(detail.clone()),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            StoreError::HttpStatus(status.as_u16())
        } else {
            StoreError::Network(err.to_string())
        }
    }
}

/// The three operations the load generator needs from a poll backend.
///
/// There is no increment primitive: vote counts can only be replaced wholesale
/// through [`PollStore::patch_vote_counts`].
#[async_trait]
pub trait PollStore: Send + Sync {
    async fn fetch_poll(&self, poll_id: &str) -> Result<PollSnapshot, StoreError>;

    /// Inserts one vote document under `vote.document_id()`. A duplicate id is an error.
    async fn insert_vote(&self, poll_id: &str, vote: &VoteAssignment) -> Result<(), StoreError>;

    /// Replaces the poll's vote-count field and nothing else.
    async fn patch_vote_counts(&self, poll_id: &str, counts: &VoteTally) -> Result<(), StoreError>;
}
