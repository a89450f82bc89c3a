use crate::loadtest::RunMetrics;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

// Logs live run totals on a fixed tick until `stop` fires.
pub async fn report_progress_task(metrics: Arc<RunMetrics>, every: Duration, stop: CancellationToken) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let live = metrics.snapshot();
                info!(
                    "Live: {} reads | {} writes | {} votes ok | {} errors | {:.1}s",
                    live.reads, live.writes, live.successes, live.errors, live.elapsed_secs
                );
            }
        }
    }
}
