use super::dispatcher::Dispatcher;
use super::fetcher::fetch_snapshot;
use super::generator::AssignmentGenerator;
use super::metrics::{BatchSummary, MetricsSnapshot, RunMetrics, aggregate};
use super::reconciler::{Reconciler, Reconciliation};
use crate::config::{QuestionTarget, RunConfig};
use crate::models::{FailureReason, PollSnapshot, Question, VoteAssignment, VoteTally};
use crate::store::{PollStore, StoreError};
use chrono::Utc;
use log::{debug, error, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    SnapshotFetched,
    Generating,
    Dispatching,
    Aggregating,
    Reconciling,
    Reporting,
    Done,
    Aborted,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("poll {0} not found")]
    NotFound(String),
    #[error("voting is not open on poll {0}")]
    Inactive(String),
    #[error("poll {0} has no question with options to vote on")]
    NoQuestions(String),
    #[error("could not read poll: {0}")]
    Fetch(#[source] StoreError),
    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::NotFound(_) => "not_found",
            RunError::Inactive(_) => "inactive",
            RunError::NoQuestions(_) => "no_questions",
            RunError::Fetch(_) => "fetch",
            RunError::Cancelled => "cancelled",
        }
    }
}

impl Serialize for RunError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RunError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionReport {
    pub question_index: usize,
    pub text: String,
    pub options: Vec<String>,
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
    pub batches: usize,
    /// Successful votes per option, indexed like `options`.
    pub distribution: Vec<u64>,
    pub elapsed_ms: u128,
}

impl QuestionReport {
    fn new(question_index: usize, question: &Question) -> Self {
        Self {
            question_index,
            text: question.text.clone(),
            options: question.options.clone(),
            attempts: 0,
            successes: 0,
            failures: 0,
            batches: 0,
            distribution: vec![0; question.options.len()],
            elapsed_ms: 0,
        }
    }

    fn record(&mut self, summary: &BatchSummary) {
        self.attempts += summary.size;
        self.successes += summary.successes;
        self.failures += summary.failures;
        self.batches += 1;
        for (option, count) in self.distribution.iter_mut().enumerate() {
            *count += summary.distribution.get(option);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub poll_id: String,
    pub title: String,
    pub participants: usize,
    pub target: QuestionTarget,
    pub questions: Vec<QuestionReport>,
    pub metrics: MetricsSnapshot,
    /// Votes that landed but never made it into the store's counts.
    pub unreconciled: VoteTally,
}

#[derive(Debug, Serialize)]
pub struct RunAbort {
    pub poll_id: String,
    pub reason: RunError,
    pub questions: Vec<QuestionReport>,
    pub metrics: MetricsSnapshot,
    pub unreconciled: VoteTally,
}

/// Drives one run: fetch the poll, then per question generate, dispatch,
/// aggregate and reconcile, sub-batch by sub-batch.
pub struct RunController<S: PollStore + ?Sized> {
    store: Arc<S>,
    config: RunConfig,
    metrics: Arc<RunMetrics>,
    cancel: CancellationToken,
    generator: AssignmentGenerator,
    dispatcher: Dispatcher<S>,
    reconciler: Reconciler<S>,
    rng: StdRng,
    phases: Vec<RunPhase>,
    // Batch counts whose merge failed; they ride along with the next reconciliation
    pending: VoteTally,
    title: Option<String>,
    questions: Vec<QuestionReport>,
}

impl<S: PollStore + ?Sized + 'static> RunController<S> {
    pub fn new(store: Arc<S>, config: RunConfig, metrics: Arc<RunMetrics>, cancel: CancellationToken) -> Self {
        let run_tag = Uuid::new_v4().simple().to_string();
        let generator = AssignmentGenerator::new(format!("loadtest_{}", &run_tag[..8]));
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            config.poll_id.clone(),
            config.attempt_timeout,
            Arc::clone(&metrics),
            cancel.clone(),
        );
        let reconciler = Reconciler::new(Arc::clone(&store), config.poll_id.clone(), Arc::clone(&metrics));
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            store,
            config,
            metrics,
            cancel,
            generator,
            dispatcher,
            reconciler,
            rng,
            phases: vec![RunPhase::Idle],
            pending: VoteTally::new(),
            title: None,
            questions: Vec::new(),
        }
    }

    /// Every phase entered so far, in order.
    pub fn phases(&self) -> &[RunPhase] {
        &self.phases
    }

    pub async fn run(&mut self) -> Result<RunReport, RunAbort> {
        match self.execute().await {
            Ok(()) => {
                self.enter(RunPhase::Reporting);
                let report = RunReport {
                    poll_id: self.config.poll_id.clone(),
                    title: self.title.clone().unwrap_or_default(),
                    participants: self.config.participants,
                    target: self.config.target,
                    questions: std::mem::take(&mut self.questions),
                    metrics: self.metrics.snapshot(),
                    unreconciled: self.pending.clone(),
                };
                self.enter(RunPhase::Done);
                Ok(report)
            }
            Err(reason) => {
                self.enter(RunPhase::Aborted);
                error!("Load test on poll {} aborted: {}", self.config.poll_id, reason);
                Err(RunAbort {
                    poll_id: self.config.poll_id.clone(),
                    reason,
                    questions: std::mem::take(&mut self.questions),
                    metrics: self.metrics.snapshot(),
                    unreconciled: self.pending.clone(),
                })
            }
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!("Run phase: {:?}", phase);
        self.phases.push(phase);
    }

    fn check_cancelled(&self) -> Result<(), RunError> {
        if self.cancel.is_cancelled() {
            Err(RunError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn execute(&mut self) -> Result<(), RunError> {
        let poll_id = self.config.poll_id.clone();
        let snapshot = fetch_snapshot(&*self.store, &poll_id, &self.metrics)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(id) => RunError::NotFound(id),
                other => RunError::Fetch(other),
            })?;
        self.enter(RunPhase::SnapshotFetched);
        self.title = Some(snapshot.title.clone());
        info!(
            "Found poll \"{}\" with {} question(s), active question {}",
            snapshot.title,
            snapshot.questions.len(),
            snapshot.active_question_index + 1
        );

        if !snapshot.voting_open {
            return Err(RunError::Inactive(poll_id));
        }

        let targets = self.target_questions(&snapshot)?;
        for (n, question_index) in targets.into_iter().enumerate() {
            if n > 0 && !self.config.question_pause.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.question_pause) => {}
                }
            }
            self.check_cancelled()?;
            self.run_question(question_index, &snapshot.questions[question_index]).await?;
        }

        if !self.pending.is_empty() {
            self.enter(RunPhase::Reconciling);
            self.reconcile_pending().await?;
            if !self.pending.is_empty() {
                warn!("{} votes were recorded but could not be merged into the vote counts", self.pending.total());
            }
        }
        Ok(())
    }

    fn target_questions(&self, snapshot: &PollSnapshot) -> Result<Vec<usize>, RunError> {
        let candidates: Vec<usize> = match self.config.target {
            QuestionTarget::Active => vec![snapshot.active_question_index],
            QuestionTarget::Sweep => (0..snapshot.questions.len()).collect(),
        };

        let targets: Vec<usize> = candidates
            .into_iter()
            .filter(|&q| match snapshot.questions.get(q) {
                Some(question) if !question.options.is_empty() => true,
                Some(_) => {
                    warn!("Skipping question {}: it has no options", q + 1);
                    false
                }
                None => {
                    warn!("Poll has no question {}", q + 1);
                    false
                }
            })
            .collect();

        if targets.is_empty() {
            return Err(RunError::NoQuestions(snapshot.id.clone()));
        }
        Ok(targets)
    }

    async fn run_question(&mut self, question_index: usize, question: &Question) -> Result<(), RunError> {
        info!(
            "Question {}: \"{}\" - casting {} votes",
            question_index + 1,
            question.text,
            self.config.participants
        );
        let started = Instant::now();
        let mut report = QuestionReport::new(question_index, question);

        self.enter(RunPhase::Generating);
        let assignments = self.generator.generate(
            self.config.participants,
            question_index,
            question.options.len(),
            Utc::now(),
            &mut self.rng,
        );

        let mut result = Ok(());
        for sub_batch in self.config.mode.sub_batches(&assignments) {
            result = self.run_sub_batch(question_index, sub_batch.to_vec(), &mut report).await;
            if result.is_err() {
                break;
            }
        }

        report.elapsed_ms = started.elapsed().as_millis();
        info!(
            "Question {}: {} succeeded, {} failed in {}ms",
            question_index + 1,
            report.successes,
            report.failures,
            report.elapsed_ms
        );
        self.questions.push(report);
        result
    }

    async fn run_sub_batch(
        &mut self,
        question_index: usize,
        mut batch: Vec<VoteAssignment>,
        report: &mut QuestionReport,
    ) -> Result<(), RunError> {
        let mut round = 0;
        loop {
            self.check_cancelled()?;

            self.enter(RunPhase::Dispatching);
            let outcomes = self.dispatcher.dispatch(&batch).await;

            self.enter(RunPhase::Aggregating);
            let summary = aggregate(question_index, &outcomes, &self.metrics);
            debug!(
                "Batch {} of question {}: {}/{} votes sent",
                report.batches + 1,
                question_index + 1,
                summary.successes,
                summary.size
            );
            report.record(&summary);

            self.enter(RunPhase::Reconciling);
            self.pending.merge(&summary.distribution.to_tally());
            self.reconcile_pending().await?;

            if round >= self.config.max_retries {
                return Ok(());
            }
            let generator = &self.generator;
            let rng = &mut self.rng;
            let retry: Vec<_> = batch
                .iter()
                .zip(&outcomes)
                .filter(|(_, outcome)| outcome.failure.as_ref().is_some_and(FailureReason::is_retryable))
                .map(|(assignment, _)| generator.reissue(assignment, Utc::now(), rng))
                .collect();
            if retry.is_empty() {
                return Ok(());
            }

            round += 1;
            info!("Retrying {} failed votes (round {} of {})", retry.len(), round, self.config.max_retries);
            batch = retry;
        }
    }

    async fn reconcile_pending(&mut self) -> Result<(), RunError> {
        match self.reconciler.reconcile(&self.pending).await {
            Ok(Reconciliation::Skipped) => Ok(()),
            Ok(Reconciliation::Merged { voting_open, .. }) => {
                self.pending.clear();
                if voting_open {
                    Ok(())
                } else {
                    Err(RunError::Inactive(self.config.poll_id.clone()))
                }
            }
            Err(StoreError::NotFound(id)) => Err(RunError::NotFound(id)),
            Err(e) => {
                warn!(
                    "Keeping {} unmerged votes for the next reconciliation ({})",
                    self.pending.total(),
                    e
                );
                Ok(())
            }
        }
    }
}
