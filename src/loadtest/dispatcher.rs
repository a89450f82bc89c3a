use super::metrics::RunMetrics;
use crate::models::{FailureReason, VoteAssignment, VoteOutcome};
use crate::store::PollStore;
use futures::future::join_all;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyMode {
    /// Every assignment of a question in flight at once.
    Full,
    /// Fixed-size sub-batches, each fully concurrent, run one after another.
    Batched { batch_size: usize },
}

impl ConcurrencyMode {
    pub fn sub_batches<'a>(&self, assignments: &'a [VoteAssignment]) -> Vec<&'a [VoteAssignment]> {
        match *self {
            _ if assignments.is_empty() => Vec::new(),
            ConcurrencyMode::Full => vec![assignments],
            ConcurrencyMode::Batched { batch_size } => assignments.chunks(batch_size.max(1)).collect(),
        }
    }
}

/// Fires vote inserts against the store, one independent task per attempt.
pub struct Dispatcher<S: PollStore + ?Sized> {
    store: Arc<S>,
    poll_id: String,
    attempt_timeout: Duration,
    metrics: Arc<RunMetrics>,
    cancel: CancellationToken,
}

impl<S: PollStore + ?Sized + 'static> Dispatcher<S> {
    pub fn new(
        store: Arc<S>,
        poll_id: impl Into<String>,
        attempt_timeout: Duration,
        metrics: Arc<RunMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            poll_id: poll_id.into(),
            attempt_timeout,
            metrics,
            cancel,
        }
    }

    /// Runs every assignment concurrently and returns one outcome per assignment, in order.
    ///
    /// Never fails as a whole: a failed attempt becomes a failed outcome.
    pub async fn dispatch(&self, assignments: &[VoteAssignment]) -> Vec<VoteOutcome> {
        let handles: Vec<_> = assignments
            .iter()
            .cloned()
            .map(|assignment| {
                let store = Arc::clone(&self.store);
                let metrics = Arc::clone(&self.metrics);
                let cancel = self.cancel.clone();
                let poll_id = self.poll_id.clone();
                let timeout = self.attempt_timeout;
                tokio::spawn(async move { cast_vote(&*store, &poll_id, assignment, timeout, &metrics, &cancel).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(assignments)
            .map(|(joined, assignment)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Vote task for participant {} did not complete: {}", assignment.participant_id, e);
                    let reason = if e.is_cancelled() {
                        FailureReason::Cancelled
                    } else {
                        FailureReason::Network(format!("vote task failed: {}", e))
                    };
                    VoteOutcome::failed(assignment, reason)
                }
            })
            .collect()
    }
}

async fn cast_vote<S: PollStore + ?Sized>(
    store: &S,
    poll_id: &str,
    assignment: VoteAssignment,
    timeout: Duration,
    metrics: &RunMetrics,
    cancel: &CancellationToken,
) -> VoteOutcome {
    if cancel.is_cancelled() {
        return VoteOutcome::failed(&assignment, FailureReason::Cancelled);
    }

    metrics.record_write();
    let result = tokio::select! {
        _ = cancel.cancelled() => return VoteOutcome::failed(&assignment, FailureReason::Cancelled),
        result = tokio::time::timeout(timeout, store.insert_vote(poll_id, &assignment)) => result,
    };

    match result {
        Ok(Ok(())) => VoteOutcome::success(&assignment),
        Ok(Err(e)) => {
            debug!("Vote {} failed: {}", assignment.document_id(), e);
            VoteOutcome::failed(&assignment, e.failure_reason())
        }
        Err(_) => VoteOutcome::failed(&assignment, FailureReason::Timeout),
    }
}
