use super::{PollStore, StoreError};
use crate::models::{PollSnapshot, Question, VoteAssignment, VoteTally};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Interleave = Box<dyn FnOnce(&mut PollSnapshot) + Send>;

// Holds one slot of the in-flight insert gauge until the insert returns or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(current)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-process poll store with failure injection for exercising the run engine.
#[derive(Default)]
pub struct MemoryStore {
    polls: Mutex<HashMap<String, PollSnapshot>>,
    votes: Mutex<HashSet<(String, String)>>,
    fetches: AtomicUsize,
    insert_attempts: AtomicUsize,
    patches: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    // Inserts finished when each patch arrived
    inserts_at_patch: Mutex<Vec<usize>>,
    completed_inserts: AtomicUsize,
    fail_every_nth_insert: Option<(usize, u16)>,
    failing_patches: AtomicUsize,
    insert_delay: Option<Duration>,
    // Runs against the stored poll right after the next fetch returns its copy
    after_next_fetch: Mutex<Option<Interleave>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll(self, poll: PollSnapshot) -> Self {
        self.polls.lock().unwrap().insert(poll.id.clone(), poll);
        self
    }

    pub fn failing_every_nth_insert(mut self, n: usize, status: u16) -> Self {
        self.fail_every_nth_insert = Some((n, status));
        self
    }

    pub fn with_insert_delay(mut self, delay: Duration) -> Self {
        self.insert_delay = Some(delay);
        self
    }

    pub fn reject_next_patches(&self, count: usize) {
        self.failing_patches.store(count, Ordering::SeqCst);
    }

    pub fn interleave_after_next_fetch(&self, writer: impl FnOnce(&mut PollSnapshot) + Send + 'static) {
        *self.after_next_fetch.lock().unwrap() = Some(Box::new(writer));
    }

    pub fn poll(&self, poll_id: &str) -> PollSnapshot {
        self.polls.lock().unwrap()[poll_id].clone()
    }

    pub fn update_poll(&self, poll_id: &str, update: impl FnOnce(&mut PollSnapshot)) {
        update(self.polls.lock().unwrap().get_mut(poll_id).unwrap());
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    pub fn patches(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }

    /// Most inserts ever running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn inserts_at_each_patch(&self) -> Vec<usize> {
        self.inserts_at_patch.lock().unwrap().clone()
    }

    pub fn stored_votes(&self) -> usize {
        self.votes.lock().unwrap().len()
    }
}

#[async_trait]
impl PollStore for MemoryStore {
    async fn fetch_poll(&self, poll_id: &str) -> Result<PollSnapshot, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut polls = self.polls.lock().unwrap();
        let poll = polls
            .get_mut(poll_id)
            .ok_or_else(|| StoreError::NotFound(poll_id.to_string()))?;
        let snapshot = poll.clone();
        if let Some(writer) = self.after_next_fetch.lock().unwrap().take() {
            writer(poll);
        }
        Ok(snapshot)
    }

    async fn insert_vote(&self, poll_id: &str, vote: &VoteAssignment) -> Result<(), StoreError> {
        let attempt = self.insert_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let _slot = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }
        self.completed_inserts.fetch_add(1, Ordering::SeqCst);
        if let Some((n, status)) = self.fail_every_nth_insert {
            if attempt % n == 0 {
                return Err(StoreError::HttpStatus(status));
            }
        }
        if !self.polls.lock().unwrap().contains_key(poll_id) {
            return Err(StoreError::NotFound(poll_id.to_string()));
        }
        let inserted = self
            .votes
            .lock()
            .unwrap()
            .insert((poll_id.to_string(), vote.document_id()));
        if inserted { Ok(()) } else { Err(StoreError::HttpStatus(409)) }
    }

    async fn patch_vote_counts(&self, poll_id: &str, counts: &VoteTally) -> Result<(), StoreError> {
        self.patches.fetch_add(1, Ordering::SeqCst);
        self.inserts_at_patch
            .lock()
            .unwrap()
            .push(self.completed_inserts.load(Ordering::SeqCst));
        let rejected = self
            .failing_patches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(StoreError::HttpStatus(503));
        }
        let mut polls = self.polls.lock().unwrap();
        let poll = polls
            .get_mut(poll_id)
            .ok_or_else(|| StoreError::NotFound(poll_id.to_string()))?;
        poll.vote_counts = counts.clone();
        Ok(())
    }
}

/// A poll with `option_counts[i]` options on question `i`, voting open.
pub fn sample_poll(poll_id: &str, option_counts: &[usize], vote_counts: VoteTally) -> PollSnapshot {
    PollSnapshot {
        id: poll_id.to_string(),
        title: "Load test poll".to_string(),
        questions: option_counts
            .iter()
            .enumerate()
            .map(|(q, &n)| Question {
                text: format!("Question {}", q + 1),
                options: (0..n).map(|o| format!("Option {}", o + 1)).collect(),
            })
            .collect(),
        active_question_index: 0,
        voting_open: true,
        vote_counts,
    }
}
