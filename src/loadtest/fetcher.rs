use super::metrics::RunMetrics;
use crate::models::PollSnapshot;
use crate::store::{PollStore, StoreError};

/// Reads the poll as it is right now. Counts one read whether or not it succeeds.
pub async fn fetch_snapshot<S: PollStore + ?Sized>(
    store: &S,
    poll_id: &str,
    metrics: &RunMetrics,
) -> Result<PollSnapshot, StoreError> {
    metrics.record_read();
    store.fetch_poll(poll_id).await
}
