//! The document store the ballot engine runs against.
//!
//! The engine never writes blindly: it opens a [`StoreTransaction`], reads
//! its snapshots through it, and hands the updated election back to
//! [`StoreTransaction::commit_election`], which only applies the write if the
//! election is still at the version the transaction read.

use std::time::Duration;

use mongodb::error::{Error as DbError, TRANSIENT_TRANSACTION_ERROR};
use thiserror::Error;

use crate::model::db::{election::Election, student::Student};

mod memory;
mod mongo;

pub use memory::InMemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another transaction changed a document this one read.
    /// Nothing was written; the whole transaction may be retried.
    #[error("Conflicting concurrent write")]
    Conflict,
    #[error("Document store unavailable: {0}")]
    Unavailable(String),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if err.contains_label(TRANSIENT_TRANSACTION_ERROR) {
            Self::Conflict
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// A key-document store with optimistic transactions.
#[rocket::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open a new transaction whose commit the server may spend at most
    /// `max_commit_time` on.
    async fn begin(
        &self,
        max_commit_time: Duration,
    ) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Read an election outside of any transaction.
    async fn election(&self, id: &str) -> Result<Option<Election>, StoreError>;
}

/// An open transaction. Dropping it without committing discards it.
#[rocket::async_trait]
pub trait StoreTransaction: Send {
    /// Read an election as seen by this transaction.
    async fn election(&mut self, id: &str) -> Result<Option<Election>, StoreError>;

    /// Read a student as seen by this transaction.
    async fn student(&mut self, id: &str) -> Result<Option<Student>, StoreError>;

    /// Replace the election and commit, provided the stored election is still
    /// at `expected_version`. Fails with [`StoreError::Conflict`] otherwise, in
    /// which case nothing is written.
    ///
    /// Once the commit has been sent it may be applied even if this future is
    /// dropped, so callers must let it run to completion.
    async fn commit_election(
        self: Box<Self>,
        expected_version: u64,
        election: &Election,
    ) -> Result<(), StoreError>;

    /// Abandon the transaction without writing anything.
    async fn abort(self: Box<Self>) -> Result<(), StoreError>;
}
