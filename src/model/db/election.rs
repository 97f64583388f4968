use std::collections::BTreeMap;

use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use crate::model::common::{CandidateId, ElectionId, StudentId};

/// An election as stored in the database.
///
/// The tally fields are private: the only way to change them is
/// [`Election::record_ballot`], which the ballot engine calls on a snapshot
/// it is about to commit conditionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: ElectionId,
    pub candidates: Vec<CandidateId>,
    #[serde(default)]
    votes: BTreeMap<CandidateId, u64>,
    #[serde(default)]
    students_voted: Vec<StudentId>,
    /// Optimistic concurrency token. Documents written before versioning
    /// existed have no such field and read as version 0.
    #[serde(default)]
    version: u64,
    /// Any other election fields, preserved untouched.
    #[serde(flatten)]
    pub details: Document,
}

impl Election {
    /// Create a new election that nobody has voted in yet.
    pub fn new(id: impl Into<ElectionId>, candidates: Vec<CandidateId>) -> Self {
        Self {
            id: id.into(),
            candidates,
            votes: BTreeMap::new(),
            students_voted: Vec::new(),
            version: 0,
            details: Document::new(),
        }
    }

    /// Attach extra descriptive fields (title, dates, ...).
    pub fn with_details(mut self, details: Document) -> Self {
        self.details = details;
        self
    }

    pub fn votes(&self) -> &BTreeMap<CandidateId, u64> {
        &self.votes
    }

    pub fn students_voted(&self) -> &[StudentId] {
        &self.students_voted
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_candidate(&self, candidate_id: &str) -> bool {
        self.candidates.iter().any(|c| c == candidate_id)
    }

    pub fn has_voted(&self, student_id: &str) -> bool {
        self.students_voted.iter().any(|s| s == student_id)
    }

    /// Count one accepted ballot and bump the version.
    ///
    /// The caller must already have validated the ballot against this very
    /// snapshot.
    pub(crate) fn record_ballot(&mut self, student_id: &str, candidate_id: &str) {
        *self.votes.entry(candidate_id.to_string()).or_insert(0) += 1;
        self.students_voted.push(student_id.to_string());
        self.version += 1;
    }
}

#[cfg(test)]
impl Election {
    /// Check the tally invariants: every counted candidate is standing, the
    /// counts sum to the number of voters, and nobody appears twice.
    pub fn is_consistent(&self) -> bool {
        use std::collections::HashSet;

        let known_candidates = self.votes.keys().all(|c| self.is_candidate(c));
        let total: u64 = self.votes.values().sum();
        let unique: HashSet<_> = self.students_voted.iter().collect();
        known_candidates
            && total == self.students_voted.len() as u64
            && unique.len() == self.students_voted.len()
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use mongodb::bson::doc;

    use super::*;

    impl Election {
        pub fn example() -> Self {
            Self::new("E1", vec!["A".to_string(), "B".to_string()])
                .with_details(doc! { "title": "Student Council 2026" })
        }
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::{self, doc};

    use super::*;

    #[test]
    fn record_ballot_increments_only_the_chosen_candidate() {
        let mut election = Election::example();
        election.record_ballot("S1", "A");
        election.record_ballot("S2", "B");
        election.record_ballot("S3", "A");

        assert_eq!(election.votes().get("A"), Some(&2));
        assert_eq!(election.votes().get("B"), Some(&1));
        assert_eq!(election.students_voted(), ["S1", "S2", "S3"]);
        assert_eq!(election.version(), 3);
        assert!(election.is_consistent());
    }

    #[test]
    fn legacy_document_without_tally_fields() {
        let document = doc! {
            "_id": "E9",
            "election_id": "E9",
            "candidates": ["A", "B"],
            "title": "Legacy",
        };
        let election: Election = bson::from_document(document).unwrap();

        assert_eq!(election.version(), 0);
        assert!(election.votes().is_empty());
        assert!(election.students_voted().is_empty());
        assert_eq!(election.details.get_str("title").unwrap(), "Legacy");
        assert_eq!(election.details.get_str("election_id").unwrap(), "E9");
    }

    #[test]
    fn details_survive_a_round_trip_through_bson() {
        let mut election = Election::example();
        election.record_ballot("S1", "B");

        let document = bson::to_document(&election).unwrap();
        assert_eq!(document.get_str("_id").unwrap(), "E1");
        assert_eq!(document.get_str("title").unwrap(), "Student Council 2026");

        let read_back: Election = bson::from_document(document).unwrap();
        assert_eq!(read_back, election);
    }

    #[test]
    fn inconsistent_tally_is_detected() {
        let document = doc! {
            "_id": "E2",
            "candidates": ["A"],
            "votes": { "A": 2_i64 },
            "students_voted": ["S1"],
        };
        let election: Election = bson::from_document(document).unwrap();
        assert!(!election.is_consistent());
    }
}
