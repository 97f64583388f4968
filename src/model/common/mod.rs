/// Elections are keyed by the ID chosen when they were created.
pub type ElectionId = String;
/// Students are keyed by their student number.
pub type StudentId = String;
/// Our candidate IDs are strings.
pub type CandidateId = String;
