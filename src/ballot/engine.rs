use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rocket::tokio::time::{sleep, timeout_at, Instant};
use thiserror::Error;

use crate::model::api::{ballot::Ballot, tally::TallyView};
use crate::model::db::election::Election;
use crate::store::{DocumentStore, StoreError, StoreTransaction};

use super::validation::{validate, Rejection};

/// Bounds on how hard the engine tries to record a ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total transaction attempts, including the first.
    pub max_attempts: u32,
    /// Backoff ceiling after the first conflict; doubles on each further one.
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Overall time limit for a single ballot, retries included.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(250),
            deadline: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Random delay before the retry that follows the given failed attempt.
    fn backoff(&self, failed_attempt: u32) -> Duration {
        let ceiling = self
            .base_backoff
            .saturating_mul(1_u32 << failed_attempt.saturating_sub(1).min(16))
            .min(self.max_backoff);
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }
}

#[derive(Debug, Error)]
pub enum CastError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    /// Every attempt lost a race with another writer. Nothing was written.
    #[error("Gave up after {attempts} conflicting attempts")]
    Contention { attempts: u32 },
    /// The deadline passed before the ballot was sent for commit. Nothing was
    /// written.
    #[error("Ballot could not be recorded within {0:?}")]
    DeadlineExceeded(Duration),
    #[error("{0}")]
    StoreUnavailable(String),
}

impl CastError {
    /// Whether the caller may simply try again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Contention { .. } | Self::DeadlineExceeded(_))
    }
}

/// Result of one transaction attempt that did not hit a store error.
enum Attempt {
    Committed(TallyView),
    Rejected(Rejection),
    /// The deadline passed before a commit was sent.
    OutOfTime,
}

/// A validated ballot, applied to the election snapshot but not committed.
enum Prepared {
    Ready {
        txn: Box<dyn StoreTransaction>,
        election: Election,
        read_version: u64,
    },
    Rejected(Rejection),
}

/// Records ballots so that each accepted ballot is counted exactly once,
/// however many requests race on the same election.
///
/// Every attempt reads, validates and writes inside one store transaction,
/// and the write only lands if the election is unchanged since the read.
/// Losing that race throws the attempt away and starts again from scratch.
pub struct BallotEngine {
    store: Arc<dyn DocumentStore>,
    policy: RetryPolicy,
}

impl BallotEngine {
    pub fn new(store: Arc<dyn DocumentStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// The store this engine writes to, for plain reads.
    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Cast a ballot, returning the election tally including it.
    ///
    /// The deadline is only enforced up to the point where a commit is sent.
    /// A commit in flight is always waited for, since it may already have
    /// been applied; the store bounds it with whatever time was left.
    pub async fn cast_vote(&self, ballot: &Ballot) -> Result<TallyView, CastError> {
        let deadline = Instant::now() + self.policy.deadline;
        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.attempt(ballot, deadline).await {
                Ok(Attempt::Committed(tally)) => {
                    info!(
                        "Recorded ballot of student {} in election {} (attempt {attempt})",
                        ballot.student_id, ballot.election_id
                    );
                    return Ok(tally);
                }
                Ok(Attempt::Rejected(rejection)) => {
                    debug!(
                        "Rejected ballot of student {} in election {}: {rejection}",
                        ballot.student_id, ballot.election_id
                    );
                    return Err(rejection.into());
                }
                Ok(Attempt::OutOfTime) => return Err(self.deadline_exceeded(ballot)),
                Err(StoreError::Conflict) => {
                    if attempt < max_attempts {
                        let delay = self.policy.backoff(attempt);
                        if Instant::now() + delay >= deadline {
                            return Err(self.deadline_exceeded(ballot));
                        }
                        debug!(
                            "Conflict on election {} (attempt {attempt}/{max_attempts}), retrying in {delay:?}",
                            ballot.election_id
                        );
                        sleep(delay).await;
                    }
                }
                Err(StoreError::Unavailable(e)) => {
                    error!("Store failure casting ballot in election {}: {e}", ballot.election_id);
                    return Err(CastError::StoreUnavailable(e));
                }
            }
        }

        warn!(
            "Gave up on ballot of student {} in election {} after {max_attempts} conflicts",
            ballot.student_id, ballot.election_id
        );
        Err(CastError::Contention {
            attempts: max_attempts,
        })
    }

    fn deadline_exceeded(&self, ballot: &Ballot) -> CastError {
        warn!(
            "Deadline of {:?} passed casting ballot of student {} in election {}",
            self.policy.deadline, ballot.student_id, ballot.election_id
        );
        CastError::DeadlineExceeded(self.policy.deadline)
    }

    /// One read-validate-write cycle inside a single transaction.
    async fn attempt(&self, ballot: &Ballot, deadline: Instant) -> Result<Attempt, StoreError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(Attempt::OutOfTime);
        }

        // Nothing has been sent for commit yet, so the reads can be abandoned.
        let prepared = match timeout_at(deadline, self.prepare(ballot, remaining)).await {
            Ok(prepared) => prepared?,
            Err(_) => return Ok(Attempt::OutOfTime),
        };
        let (txn, election, read_version) = match prepared {
            Prepared::Ready {
                txn,
                election,
                read_version,
            } => (txn, election, read_version),
            Prepared::Rejected(rejection) => return Ok(Attempt::Rejected(rejection)),
        };

        txn.commit_election(read_version, &election).await?;
        Ok(Attempt::Committed(TallyView::project(&election)))
    }

    /// Open a transaction, read both snapshots, validate, and compute the
    /// election as it should be committed.
    async fn prepare(&self, ballot: &Ballot, remaining: Duration) -> Result<Prepared, StoreError> {
        let mut txn = self.store.begin(remaining).await?;
        let election = txn.election(&ballot.election_id).await?;
        let student = txn.student(&ballot.student_id).await?;

        let mut election = match validate(election.as_ref(), student.as_ref(), &ballot.candidate_id) {
            Ok(valid) => valid.clone(),
            Err(rejection) => {
                if let Err(e) = txn.abort().await {
                    warn!("Failed to abort read-only transaction: {e}");
                }
                return Ok(Prepared::Rejected(rejection));
            }
        };

        let read_version = election.version();
        election.record_ballot(&ballot.student_id, &ballot.candidate_id);
        Ok(Prepared::Ready {
            txn,
            election,
            read_version,
        })
    }
}
