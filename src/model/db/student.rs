use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use crate::model::common::StudentId;

/// A registered student, keyed by student ID. The ballot engine only ever
/// reads these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    #[serde(rename = "_id")]
    pub id: StudentId,
    /// Name and any other profile fields.
    #[serde(flatten)]
    pub profile: Document,
}

impl Student {
    pub fn new(id: impl Into<StudentId>, profile: Document) -> Self {
        Self {
            id: id.into(),
            profile,
        }
    }
}
