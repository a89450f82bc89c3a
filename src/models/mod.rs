use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone)]
pub struct PollSnapshot {
    pub id: String,
    pub title: String,
    pub questions: Vec<Question>,
    pub active_question_index: usize,
    pub voting_open: bool,
    pub vote_counts: VoteTally,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
}

/// A `(question, option)` pair. Serialized as `"{question}_{option}"` only at the store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TallyKey {
    pub question: usize,
    pub option: usize,
}

impl TallyKey {
    pub fn new(question: usize, option: usize) -> Self {
        Self { question, option }
    }

    pub fn wire_key(&self) -> String {
        self.to_string()
    }

    pub fn parse_wire_key(key: &str) -> Option<Self> {
        let (question, option) = key.split_once('_')?;
        Some(Self {
            question: question.parse().ok()?,
            option: option.parse().ok()?,
        })
    }
}

impl fmt::Display for TallyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.question, self.option)
    }
}

/// Vote counts per `(question, option)`. A missing key counts as zero.
///
/// Entries read from the store under keys that are not a canonical `q_o` are
/// kept verbatim in `foreign` so that writing the tally back leaves them as
/// they were. They never take part in arithmetic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTally {
    counts: BTreeMap<TallyKey, u64>,
    foreign: BTreeMap<String, serde_json::Value>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn get(&self, key: TallyKey) -> u64 {
        self.counts.get(&key).copied().unwrap_or(0)
    }

    pub fn set(&mut self, key: TallyKey, count: u64) {
        self.counts.insert(key, count);
    }

    // Additive: counts only ever grow, zero entries leave the map untouched.
    pub fn add(&mut self, key: TallyKey, count: u64) {
        if count == 0 {
            return;
        }
        *self.counts.entry(key).or_insert(0) += count;
    }

    pub fn merge(&mut self, delta: &VoteTally) {
        for (key, count) in delta.iter() {
            self.add(key, count);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (TallyKey, u64)> + '_ {
        self.counts.iter().map(|(key, count)| (*key, *count))
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// True when the tally would not change anything if merged.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn clear(&mut self) {
        self.counts.clear();
        self.foreign.clear();
    }

    pub fn keep_foreign(&mut self, key: impl Into<String>, raw: serde_json::Value) {
        self.foreign.insert(key.into(), raw);
    }

    pub fn foreign(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> + '_ {
        self.foreign.iter().map(|(key, raw)| (key.as_str(), raw))
    }

    /// Counts for one question, indexed by option.
    #[cfg(test)]
    pub fn question_counts(&self, question: usize, option_count: usize) -> Vec<u64> {
        (0..option_count)
            .map(|option| self.get(TallyKey::new(question, option)))
            .collect()
    }
}

impl Serialize for VoteTally {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.counts.iter().map(|(key, count)| (key.wire_key(), count)))
    }
}

impl FromIterator<(TallyKey, u64)> for VoteTally {
    fn from_iter<I: IntoIterator<Item = (TallyKey, u64)>>(iter: I) -> Self {
        let mut tally = VoteTally::new();
        for (key, count) in iter {
            tally.set(key, count);
        }
        tally
    }
}

/// One synthetic participant's intention to vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteAssignment {
    pub participant_id: usize,
    pub question_index: usize,
    pub option_index: usize,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl VoteAssignment {
    pub fn document_id(&self) -> String {
        format!("{}_{}", self.session_id, self.question_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    Network(String),
    HttpStatus(u16),
    Cancelled,
}

impl FailureReason {
    // Worth another attempt with a fresh session id.
    pub fn is_retryable(&self) -> bool {
        match self {
            FailureReason::Timeout | FailureReason::Network(_) => true,
            FailureReason::HttpStatus(code) => *code == 429 || *code >= 500,
            FailureReason::Cancelled => false,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Network(detail) => write!(f, "network: {}", detail),
            FailureReason::HttpStatus(code) => write!(f, "HTTP {}", code),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    pub participant_id: usize,
    pub option_index: usize,
    pub failure: Option<FailureReason>,
}

impl VoteOutcome {
    pub fn success(assignment: &VoteAssignment) -> Self {
        Self {
            participant_id: assignment.participant_id,
            option_index: assignment.option_index,
            failure: None,
        }
    }

    pub fn failed(assignment: &VoteAssignment, reason: FailureReason) -> Self {
        Self {
            participant_id: assignment.participant_id,
            option_index: assignment.option_index,
            failure: Some(reason),
        }
    }

    #[cfg(test)]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Successful votes per option within one batch of a single question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDistribution {
    pub question_index: usize,
    counts: BTreeMap<usize, u64>,
}

impl BatchDistribution {
    pub fn new(question_index: usize) -> Self {
        Self {
            question_index,
            counts: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, option_index: usize) {
        *self.counts.entry(option_index).or_insert(0) += 1;
    }

    pub fn get(&self, option_index: usize) -> u64 {
        self.counts.get(&option_index).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    #[cfg(test)]
    pub fn absorb(&mut self, other: &BatchDistribution) {
        for (option, count) in &other.counts {
            *self.counts.entry(*option).or_insert(0) += count;
        }
    }

    pub fn to_tally(&self) -> VoteTally {
        let mut tally = VoteTally::new();
        for (option, count) in &self.counts {
            tally.add(TallyKey::new(self.question_index, *option), *count);
        }
        tally
    }
}
