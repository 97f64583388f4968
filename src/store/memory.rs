use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use rocket::tokio::{sync::Mutex, task, time::sleep};

use crate::model::{
    common::{ElectionId, StudentId},
    db::{election::Election, student::Student},
};

use super::{DocumentStore, StoreError, StoreTransaction};

/// A store that keeps everything in memory, with the same conditional
/// commit semantics as [`super::MongoStore`]. Used by the tests and for
/// running the server without a database.
///
/// Clones share the same underlying data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    elections: Mutex<HashMap<ElectionId, Election>>,
    students: Mutex<HashMap<StudentId, Student>>,
    /// Number of upcoming commits to fail with a conflict.
    forced_conflicts: AtomicUsize,
    unavailable: AtomicBool,
    /// Simulated round trip time, in milliseconds.
    read_latency_ms: AtomicU64,
    commit_latency_ms: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an election.
    pub async fn insert_election(&self, election: Election) {
        self.inner
            .elections
            .lock()
            .await
            .insert(election.id.clone(), election);
    }

    /// Insert or replace a student.
    pub async fn insert_student(&self, student: Student) {
        self.inner
            .students
            .lock()
            .await
            .insert(student.id.clone(), student);
    }

    /// Make the next `count` commits fail as if another writer got there
    /// first.
    pub fn force_conflicts(&self, count: usize) {
        self.inner.forced_conflicts.store(count, Ordering::SeqCst);
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every transactional read take at least this long.
    pub fn set_read_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.inner.read_latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Make every commit take at least this long before it is applied.
    pub fn set_commit_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.inner.commit_latency_ms.store(ms, Ordering::SeqCst);
    }
}

impl Inner {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }

    /// Stand in for a network round trip. Always yields, so that concurrent
    /// requests interleave.
    async fn round_trip(latency_ms: &AtomicU64) {
        match latency_ms.load(Ordering::SeqCst) {
            0 => task::yield_now().await,
            ms => sleep(Duration::from_millis(ms)).await,
        }
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[rocket::async_trait]
impl DocumentStore for InMemoryStore {
    async fn begin(
        &self,
        _max_commit_time: Duration,
    ) -> Result<Box<dyn StoreTransaction>, StoreError> {
        self.inner.check_available()?;
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
        }))
    }

    async fn election(&self, id: &str) -> Result<Option<Election>, StoreError> {
        self.inner.check_available()?;
        Ok(self.inner.elections.lock().await.get(id).cloned())
    }
}

/// Reads see the latest committed state; isolation comes entirely from the
/// version check at commit time. Students are never written, so only the
/// election needs checking.
struct MemoryTransaction {
    inner: Arc<Inner>,
}

#[rocket::async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn election(&mut self, id: &str) -> Result<Option<Election>, StoreError> {
        self.inner.check_available()?;
        Inner::round_trip(&self.inner.read_latency_ms).await;
        Ok(self.inner.elections.lock().await.get(id).cloned())
    }

    async fn student(&mut self, id: &str) -> Result<Option<Student>, StoreError> {
        self.inner.check_available()?;
        Inner::round_trip(&self.inner.read_latency_ms).await;
        Ok(self.inner.students.lock().await.get(id).cloned())
    }

    async fn commit_election(
        self: Box<Self>,
        expected_version: u64,
        election: &Election,
    ) -> Result<(), StoreError> {
        self.inner.check_available()?;
        Inner::round_trip(&self.inner.commit_latency_ms).await;
        if self.inner.take_forced_conflict() {
            return Err(StoreError::Conflict);
        }

        let mut elections = self.inner.elections.lock().await;
        let current_version = elections.get(&election.id).map(Election::version);
        if current_version != Some(expected_version) {
            return Err(StoreError::Conflict);
        }
        elections.insert(election.id.clone(), election.clone());
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
