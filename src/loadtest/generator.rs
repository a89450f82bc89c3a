use crate::models::VoteAssignment;
use chrono::{DateTime, Utc};
use rand::Rng;

/// Builds synthetic vote assignments. Session ids start with a per-run prefix so
/// repeated runs never collide with each other or with real participants.
#[derive(Debug, Clone)]
pub struct AssignmentGenerator {
    session_prefix: String,
}

impl AssignmentGenerator {
    pub fn new(session_prefix: impl Into<String>) -> Self {
        Self {
            session_prefix: session_prefix.into(),
        }
    }

    /// One assignment per participant, option chosen uniformly from `0..option_count`.
    ///
    /// Deterministic for a given rng state and `now`. Yields nothing when the
    /// question has no options.
    pub fn generate<R: Rng>(
        &self,
        participants: usize,
        question_index: usize,
        option_count: usize,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<VoteAssignment> {
        if option_count == 0 {
            return Vec::new();
        }

        (0..participants)
            .map(|participant_id| {
                let option_index = rng.gen_range(0..option_count);
                VoteAssignment {
                    participant_id,
                    question_index,
                    option_index,
                    session_id: self.session_id(participant_id, question_index, now, rng),
                    timestamp: now,
                }
            })
            .collect()
    }

    /// Same participant and choice under a fresh session id, for a retry.
    pub fn reissue<R: Rng>(
        &self,
        prior: &VoteAssignment,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> VoteAssignment {
        VoteAssignment {
            session_id: self.session_id(prior.participant_id, prior.question_index, now, rng),
            timestamp: now,
            ..prior.clone()
        }
    }

    fn session_id<R: Rng>(
        &self,
        participant_id: usize,
        question_index: usize,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> String {
        format!(
            "{}_p{}_q{}_{}_{}",
            self.session_prefix,
            participant_id,
            question_index,
            now.timestamp_millis(),
            rng.gen_range(1000..=9999)
        )
    }
}
