use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{
    common::{CandidateId, StudentId},
    db::election::Election,
};

/// The externally visible result of an election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyView {
    pub votes: BTreeMap<CandidateId, u64>,
    pub students_voted: Vec<StudentId>,
    pub voter_count: usize,
}

impl TallyView {
    /// Project the tally out of a committed election document.
    pub fn project(election: &Election) -> Self {
        Self {
            votes: election.votes().clone(),
            students_voted: election.students_voted().to_vec(),
            voter_count: election.students_voted().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_election() {
        let tally = TallyView::project(&Election::example());
        assert!(tally.votes.is_empty());
        assert!(tally.students_voted.is_empty());
        assert_eq!(tally.voter_count, 0);
    }

    #[test]
    fn projection_is_pure() {
        let mut election = Election::example();
        election.record_ballot("S1", "A");
        election.record_ballot("S2", "A");

        let first = TallyView::project(&election);
        let second = TallyView::project(&election);
        assert_eq!(first, second);
        assert_eq!(first.votes.get("A"), Some(&2));
        assert_eq!(first.voter_count, 2);
    }
}
