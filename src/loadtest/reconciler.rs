use super::fetcher::fetch_snapshot;
use super::metrics::RunMetrics;
use crate::models::VoteTally;
use crate::store::{PollStore, StoreError};
use log::{debug, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Nothing to merge; no request was made.
    Skipped,
    Merged {
        /// The full tally written back to the store.
        written: VoteTally,
        voting_open: bool,
    },
}

/// Folds local vote deltas into the store's vote counts by read-then-patch.
///
/// The store has no increment, so the sequence is fetch, add, replace. Another
/// writer landing between the fetch and the patch is overwritten and its votes
/// are lost. Reconciling after every sub-batch keeps that window small; it
/// cannot close it.
pub struct Reconciler<S: PollStore + ?Sized> {
    store: Arc<S>,
    poll_id: String,
    metrics: Arc<RunMetrics>,
}

impl<S: PollStore + ?Sized> Reconciler<S> {
    pub fn new(store: Arc<S>, poll_id: impl Into<String>, metrics: Arc<RunMetrics>) -> Self {
        Self {
            store,
            poll_id: poll_id.into(),
            metrics,
        }
    }

    pub async fn reconcile(&self, delta: &VoteTally) -> Result<Reconciliation, StoreError> {
        if delta.is_empty() {
            debug!("Nothing to reconcile on poll {}", self.poll_id);
            return Ok(Reconciliation::Skipped);
        }

        let result = self.read_merge_write(delta).await;
        self.metrics.record_reconciliation(result.is_ok());
        match &result {
            Ok(Reconciliation::Merged { written, .. }) => {
                info!("Merged {} votes into poll {} (tally now {})", delta.total(), self.poll_id, written.total());
            }
            Ok(Reconciliation::Skipped) => {}
            Err(e) => warn!("Failed to merge {} votes into poll {}: {}", delta.total(), self.poll_id, e),
        }
        result
    }

    async fn read_merge_write(&self, delta: &VoteTally) -> Result<Reconciliation, StoreError> {
        let snapshot = fetch_snapshot(&*self.store, &self.poll_id, &self.metrics).await?;

        let mut updated = snapshot.vote_counts;
        updated.merge(delta);

        self.metrics.record_write();
        self.store.patch_vote_counts(&self.poll_id, &updated).await?;

        Ok(Reconciliation::Merged {
            written: updated,
            voting_open: snapshot.voting_open,
        })
    }
}
