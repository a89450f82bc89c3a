use crate::models::{BatchDistribution, VoteOutcome};
use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const MAX_SAMPLE_ERRORS: usize = 5;

/// Running totals for one load-test run, shared by every component that does I/O.
pub struct RunMetrics {
    reads: AtomicU64,
    writes: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    reconciliations: AtomicU64,
    failed_reconciliations: AtomicU64,
    sample_errors: Mutex<Vec<String>>,
    started: Instant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub successes: u64,
    pub errors: u64,
    pub reconciliations: u64,
    pub failed_reconciliations: u64,
    pub elapsed_secs: f64,
    pub sample_errors: Vec<String>,
}

impl MetricsSnapshot {
    pub fn total_operations(&self) -> u64 {
        self.reads + self.writes
    }

    pub fn votes_per_second(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.successes as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            reconciliations: AtomicU64::new(0),
            failed_reconciliations: AtomicU64::new(0),
            sample_errors: Mutex::new(Vec::new()),
            started: Instant::now(),
        }
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconciliation(&self, succeeded: bool) {
        if succeeded {
            self.reconciliations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_reconciliations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_sample_error(&self, message: String) {
        if let Ok(mut samples) = self.sample_errors.lock() {
            if samples.len() < MAX_SAMPLE_ERRORS {
                samples.push(message);
            }
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            reconciliations: self.reconciliations.load(Ordering::Relaxed),
            failed_reconciliations: self.failed_reconciliations.load(Ordering::Relaxed),
            elapsed_secs: self.elapsed().as_secs_f64(),
            sample_errors: self
                .sample_errors
                .lock()
                .map(|samples| samples.clone())
                .unwrap_or_default(),
        }
    }
}

/// Per-batch totals produced by [`aggregate`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub size: usize,
    pub successes: usize,
    pub failures: usize,
    pub distribution: BatchDistribution,
}

/// Folds a joined batch of outcomes into the run totals and a per-option distribution.
///
/// Called once per batch after every attempt has completed, so each outcome is
/// counted exactly once whatever order the attempts finished in.
pub fn aggregate(question_index: usize, outcomes: &[VoteOutcome], metrics: &RunMetrics) -> BatchSummary {
    let mut distribution = BatchDistribution::new(question_index);
    let mut successes = 0;

    for outcome in outcomes {
        match &outcome.failure {
            None => {
                successes += 1;
                distribution.record(outcome.option_index);
            }
            Some(reason) => {
                metrics.record_sample_error(format!("P{}: {}", outcome.participant_id, reason));
            }
        }
    }
    debug_assert_eq!(distribution.total(), successes as u64);

    let failures = outcomes.len() - successes;
    metrics.successes.fetch_add(successes as u64, Ordering::Relaxed);
    metrics.errors.fetch_add(failures as u64, Ordering::Relaxed);

    BatchSummary {
        size: outcomes.len(),
        successes,
        failures,
        distribution,
    }
}
