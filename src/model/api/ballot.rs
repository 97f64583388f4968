use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::common::{CandidateId, ElectionId, StudentId};

/// A cast-ballot request body exactly as submitted.
/// Every field is optional so that a missing one can be reported by name.
#[derive(Debug, Default, Deserialize)]
pub struct BallotRequest {
    pub election_id: Option<String>,
    pub student_id: Option<String>,
    pub candidate_id: Option<String>,
}

/// A well-formed ballot attempt: one student choosing one candidate in one
/// election. Never stored; it either becomes part of the election tally or
/// is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub election_id: ElectionId,
    pub student_id: StudentId,
    pub candidate_id: CandidateId,
}

impl Ballot {
    pub fn new(
        election_id: impl Into<ElectionId>,
        student_id: impl Into<StudentId>,
        candidate_id: impl Into<CandidateId>,
    ) -> Self {
        Self {
            election_id: election_id.into(),
            student_id: student_id.into(),
            candidate_id: candidate_id.into(),
        }
    }
}

impl TryFrom<BallotRequest> for Ballot {
    type Error = Error;

    fn try_from(request: BallotRequest) -> Result<Self> {
        Ok(Self {
            election_id: required(request.election_id, "election_id")?,
            student_id: required(request.student_id, "student_id")?,
            candidate_id: required(request.candidate_id, "candidate_id")?,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(Error::MalformedRequest(format!("Field `{field}` is empty"))),
        None => Err(Error::MalformedRequest(format!("Missing field `{field}`"))),
    }
}
