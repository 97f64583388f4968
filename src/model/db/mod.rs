pub mod election;
pub mod student;
