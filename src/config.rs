use crate::loadtest::ConcurrencyMode;
use crate::store::FirestoreStore;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QuestionTarget {
    /// Only the question the presenter has active
    Active,
    /// Every question in order
    Sweep,
}

/// Fire synthetic votes at a live poll and fold them into its vote counts.
#[derive(Debug, Parser)]
#[command(name = "poll-bombard", version)]
pub struct Cli {
    /// Id of the poll to vote on
    pub poll_id: String,

    /// Firestore project holding the polls collection
    #[arg(long, env = "FIRESTORE_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Documents root URL, e.g. an emulator; overrides --project-id
    #[arg(long, env = "FIRESTORE_BASE_URL")]
    pub base_url: Option<String>,

    #[arg(long, env = "FIRESTORE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Synthetic participants per question
    #[arg(short, long, env = "LOADTEST_PARTICIPANTS", default_value_t = 50)]
    pub participants: usize,

    #[arg(long, env = "LOADTEST_TARGET", value_enum, default_value_t = QuestionTarget::Active)]
    pub target: QuestionTarget,

    /// Votes in flight per sub-batch; every vote at once when unset
    #[arg(short, long, env = "LOADTEST_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Per-vote request timeout
    #[arg(long, env = "LOADTEST_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Extra rounds for votes that failed with a retryable error
    #[arg(long, env = "LOADTEST_MAX_RETRIES", default_value_t = 0)]
    pub max_retries: u32,

    #[arg(long, default_value_t = 500)]
    pub question_pause_ms: u64,

    #[arg(long, default_value_t = 2000)]
    pub start_delay_ms: u64,

    /// Seconds between live metric lines; 0 turns them off
    #[arg(long, default_value_t = 5)]
    pub progress_interval_secs: u64,

    /// Seed for reproducible vote choices
    #[arg(long, env = "LOADTEST_SEED")]
    pub seed: Option<u64>,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no poll store configured: set FIRESTORE_PROJECT_ID or --base-url")]
    MissingStore,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub poll_id: String,
    pub participants: usize,
    pub target: QuestionTarget,
    pub mode: ConcurrencyMode,
    pub attempt_timeout: Duration,
    pub max_retries: u32,
    pub question_pause: Duration,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub run: RunConfig,
    pub base_url: String,
    pub api_key: Option<String>,
    pub start_delay: Duration,
    pub progress_interval: Option<Duration>,
    pub json: bool,
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        if self.participants == 0 {
            return Err(ConfigError::Zero("participants"));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Zero("timeout-secs"));
        }
        let mode = match self.batch_size {
            Some(0) => return Err(ConfigError::Zero("batch-size")),
            Some(batch_size) => ConcurrencyMode::Batched { batch_size },
            None => ConcurrencyMode::Full,
        };
        let base_url = match (self.base_url, self.project_id) {
            (Some(url), _) => url,
            (None, Some(project)) => FirestoreStore::documents_url(&project),
            (None, None) => return Err(ConfigError::MissingStore),
        };

        Ok(Settings {
            run: RunConfig {
                poll_id: self.poll_id,
                participants: self.participants,
                target: self.target,
                mode,
                attempt_timeout: Duration::from_secs(self.timeout_secs),
                max_retries: self.max_retries,
                question_pause: Duration::from_millis(self.question_pause_ms),
                seed: self.seed,
            },
            base_url,
            api_key: self.api_key,
            start_delay: Duration::from_millis(self.start_delay_ms),
            progress_interval: (self.progress_interval_secs > 0)
                .then(|| Duration::from_secs(self.progress_interval_secs)),
            json: self.json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("poll-bombard").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn poll_id_is_required() {
        let err = Cli::try_parse_from(["poll-bombard"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn batch_size_selects_batched_mode() {
        let settings = parse(&["ABC123", "--base-url", "http://localhost:8080/v1/documents", "-b", "10"])
            .into_settings()
            .unwrap();

        assert_eq!(settings.run.poll_id, "ABC123");
        assert_eq!(settings.run.mode, ConcurrencyMode::Batched { batch_size: 10 });
        assert_eq!(settings.base_url, "http://localhost:8080/v1/documents");
    }

    #[test]
    fn project_id_builds_firestore_url() {
        let settings = parse(&["ABC123", "--project-id", "live-poll", "--target", "sweep", "--progress-interval-secs", "0"])
            .into_settings()
            .unwrap();

        assert!(settings.base_url.ends_with("/projects/live-poll/databases/(default)/documents"));
        assert_eq!(settings.run.target, QuestionTarget::Sweep);
        assert_eq!(settings.progress_interval, None);
    }

    #[test]
    fn rejects_zero_values() {
        let cli = parse(&["ABC123", "--base-url", "http://x", "--batch-size", "0"]);
        assert_eq!(cli.into_settings().unwrap_err(), ConfigError::Zero("batch-size"));

        let cli = parse(&["ABC123", "--base-url", "http://x", "-p", "0"]);
        assert_eq!(cli.into_settings().unwrap_err(), ConfigError::Zero("participants"));
    }
}
