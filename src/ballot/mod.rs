//! Ballot casting: validation of a ballot against election and student
//! snapshots, and the engine that records accepted ballots atomically.

mod engine;
mod validation;

pub use engine::{BallotEngine, CastError, RetryPolicy};
pub use validation::{validate, Rejection};
