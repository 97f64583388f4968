use thiserror::Error;

use crate::model::db::{election::Election, student::Student};

/// Why a ballot was refused. All of these are final: retrying the same
/// ballot will be refused again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("The election does not exist")]
    ElectionNotFound,
    #[error("The student does not exist")]
    StudentNotFound,
    #[error("The candidate is not standing in this election")]
    InvalidCandidate,
    #[error("The student has already voted in this election")]
    AlreadyVoted,
}

impl Rejection {
    /// Machine-readable name, as reported to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ElectionNotFound => "election_not_found",
            Self::StudentNotFound => "student_not_found",
            Self::InvalidCandidate => "invalid_candidate",
            Self::AlreadyVoted => "already_voted",
        }
    }
}

/// Check a ballot against snapshots taken inside the transaction that will
/// record it. The first failing check wins.
///
/// On success, returns the election the ballot may be recorded in.
pub fn validate<'e>(
    election: Option<&'e Election>,
    student: Option<&Student>,
    candidate_id: &str,
) -> Result<&'e Election, Rejection> {
    let election = election.ok_or(Rejection::ElectionNotFound)?;
    let student = student.ok_or(Rejection::StudentNotFound)?;
    if !election.is_candidate(candidate_id) {
        return Err(Rejection::InvalidCandidate);
    }
    if election.has_voted(&student.id) {
        return Err(Rejection::AlreadyVoted);
    }
    Ok(election)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ballot() {
        let election = Election::example();
        let student = Student::example("S1");
        let result = validate(Some(&election), Some(&student), "A");
        assert_eq!(result, Ok(&election));
    }

    #[test]
    fn missing_election_is_reported_first() {
        let result = validate(None, None, "Z");
        assert_eq!(result, Err(Rejection::ElectionNotFound));
    }

    #[test]
    fn missing_student() {
        let election = Election::example();
        let result = validate(Some(&election), None, "Z");
        assert_eq!(result, Err(Rejection::StudentNotFound));
    }

    #[test]
    fn unknown_candidate() {
        let election = Election::example();
        let student = Student::example("S1");
        let result = validate(Some(&election), Some(&student), "Z");
        assert_eq!(result, Err(Rejection::InvalidCandidate));
    }

    #[test]
    fn candidate_is_checked_before_previous_vote() {
        let mut election = Election::example();
        election.record_ballot("S1", "A");
        let student = Student::example("S1");

        let result = validate(Some(&election), Some(&student), "Z");
        assert_eq!(result, Err(Rejection::InvalidCandidate));

        let result = validate(Some(&election), Some(&student), "B");
        assert_eq!(result, Err(Rejection::AlreadyVoted));
    }

    #[test]
    fn candidate_ids_are_case_sensitive() {
        let election = Election::example();
        let student = Student::example("S1");
        let result = validate(Some(&election), Some(&student), "a");
        assert_eq!(result, Err(Rejection::InvalidCandidate));
    }
}
