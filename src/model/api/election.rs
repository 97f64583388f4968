use std::collections::BTreeMap;

use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{CandidateId, ElectionId, StudentId},
    db::election::Election,
};

/// An election as returned to API clients: the stored document without the
/// concurrency token.
#[derive(Debug, Serialize, Deserialize)]
pub struct ElectionView {
    pub election_id: ElectionId,
    pub candidates: Vec<CandidateId>,
    pub votes: BTreeMap<CandidateId, u64>,
    pub students_voted: Vec<StudentId>,
    #[serde(flatten)]
    pub details: Document,
}

impl From<Election> for ElectionView {
    fn from(election: Election) -> Self {
        let votes = election.votes().clone();
        let students_voted = election.students_voted().to_vec();
        let mut details = election.details;
        // Older documents repeat their key as a plain field.
        details.remove("election_id");
        Self {
            election_id: election.id,
            candidates: election.candidates,
            votes,
            students_voted,
            details,
        }
    }
}
