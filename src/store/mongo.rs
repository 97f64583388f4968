use std::time::Duration;

use mongodb::{
    bson::{doc, Document},
    error::UNKNOWN_TRANSACTION_COMMIT_RESULT,
    options::{Acknowledgment, ReadConcern, TransactionOptions, WriteConcern},
    Client, ClientSession, Database,
};

use crate::model::{
    db::{election::Election, student::Student},
    mongodb::Coll,
};

use super::{DocumentStore, StoreError, StoreTransaction};

/// How many times to re-send a commit whose outcome the server could not
/// report.
const COMMIT_RETRIES: usize = 3;

/// The production store: elections and students in MongoDB, written through
/// multi-document transactions. Requires a replica set.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    elections: Coll<Election>,
    students: Coll<Student>,
}

impl MongoStore {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            elections: Coll::from_db(db),
            students: Coll::from_db(db),
        }
    }
}

#[rocket::async_trait]
impl DocumentStore for MongoStore {
    async fn begin(
        &self,
        max_commit_time: Duration,
    ) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let mut session = self.client.start_session(None).await?;
        let options = TransactionOptions::builder()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            // The server reads a zero limit as no limit at all.
            .max_commit_time(max_commit_time.max(Duration::from_millis(1)))
            .build();
        session.start_transaction(options).await?;
        Ok(Box::new(MongoTransaction {
            session,
            elections: self.elections.clone(),
            students: self.students.clone(),
        }))
    }

    async fn election(&self, id: &str) -> Result<Option<Election>, StoreError> {
        Ok(self.elections.find_one(doc! { "_id": id }, None).await?)
    }
}

/// A snapshot transaction. If dropped while still open, the driver aborts it.
struct MongoTransaction {
    session: ClientSession,
    elections: Coll<Election>,
    students: Coll<Student>,
}

#[rocket::async_trait]
impl StoreTransaction for MongoTransaction {
    async fn election(&mut self, id: &str) -> Result<Option<Election>, StoreError> {
        Ok(self
            .elections
            .find_one_with_session(doc! { "_id": id }, None, &mut self.session)
            .await?)
    }

    async fn student(&mut self, id: &str) -> Result<Option<Student>, StoreError> {
        Ok(self
            .students
            .find_one_with_session(doc! { "_id": id }, None, &mut self.session)
            .await?)
    }

    async fn commit_election(
        self: Box<Self>,
        expected_version: u64,
        election: &Election,
    ) -> Result<(), StoreError> {
        let MongoTransaction {
            mut session,
            elections,
            ..
        } = *self;

        let filter = version_filter(&election.id, expected_version);
        let result = match elections
            .replace_one_with_session(filter, election, None, &mut session)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                abort_quietly(&mut session).await;
                return Err(e.into());
            }
        };
        if result.matched_count != 1 {
            // Someone else committed first.
            abort_quietly(&mut session).await;
            return Err(StoreError::Conflict);
        }

        let mut retries = 0;
        loop {
            match session.commit_transaction().await {
                Ok(()) => return Ok(()),
                Err(e) if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                    && retries < COMMIT_RETRIES =>
                {
                    retries += 1;
                    debug!("Commit outcome unknown for election {}, retrying: {e}", election.id);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn abort(mut self: Box<Self>) -> Result<(), StoreError> {
        self.session.abort_transaction().await?;
        Ok(())
    }
}

/// Match the election only if it is still at the given version.
/// Version 0 also matches documents that predate versioning.
fn version_filter(id: &str, version: u64) -> Document {
    let version = i64::try_from(version).unwrap_or(i64::MAX);
    if version == 0 {
        doc! {
            "_id": id,
            "$or": [{"version": 0_i64}, {"version": {"$exists": false}}],
        }
    } else {
        doc! {
            "_id": id,
            "version": version,
        }
    }
}

async fn abort_quietly(session: &mut ClientSession) {
    if let Err(e) = session.abort_transaction().await {
        warn!("Failed to abort transaction: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use mongodb::Database;
    use rocket::{
        futures::future::join_all,
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json,
    };

    use crate::ballot::{BallotEngine, RetryPolicy};
    use crate::model::api::{ballot::Ballot, tally::TallyView};

    use super::*;

    fn store_for(client: &Client, db: &Database) -> MongoStore {
        let mongo = client.rocket().state::<mongodb::Client>().unwrap().clone();
        MongoStore::new(mongo, db)
    }

    #[test]
    fn version_zero_matches_legacy_documents() {
        let filter = version_filter("E1", 0);
        assert!(filter.contains_key("$or"));
        assert!(!filter.contains_key("version"));

        let filter = version_filter("E1", 7);
        assert_eq!(filter.get_i64("version").unwrap(), 7);
    }

    #[backend_test]
    async fn stale_commit_is_a_conflict(
        client: Client,
        db: Database,
        elections: Coll<Election>,
        students: Coll<Student>,
    ) {
        elections.insert_one(Election::example(), None).await.unwrap();
        students.insert_one(Student::example("S1"), None).await.unwrap();
        let store = store_for(&client, &db);

        // Two transactions read the same snapshot.
        let mut first = store.begin(Duration::from_secs(5)).await.unwrap();
        let mut second = store.begin(Duration::from_secs(5)).await.unwrap();
        let mut from_first = first.election("E1").await.unwrap().unwrap();
        let mut from_second = second.election("E1").await.unwrap().unwrap();

        from_first.record_ballot("S1", "A");
        first.commit_election(0, &from_first).await.unwrap();

        from_second.record_ballot("S1", "B");
        let result = second.commit_election(0, &from_second).await;
        assert!(matches!(result, Err(StoreError::Conflict)));

        // Only the first write is visible.
        let stored = store.election("E1").await.unwrap().unwrap();
        assert_eq!(stored, from_first);
    }

    #[backend_test]
    async fn concurrent_votes_are_all_counted(
        client: Client,
        db: Database,
        elections: Coll<Election>,
        students: Coll<Student>,
    ) {
        const VOTERS: usize = 10;

        elections.insert_one(Election::example(), None).await.unwrap();
        let roll = (0..VOTERS)
            .map(|i| Student::example(&format!("S{i}")))
            .collect::<Vec<_>>();
        students.insert_many(roll, None).await.unwrap();

        let policy = RetryPolicy {
            max_attempts: 100,
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(50),
            deadline: Duration::from_secs(60),
        };
        let engine = BallotEngine::new(Arc::new(store_for(&client, &db)), policy);

        let ballots = (0..VOTERS)
            .map(|i| Ballot::new("E1", format!("S{i}"), if i % 2 == 0 { "A" } else { "B" }))
            .collect::<Vec<_>>();
        let results = join_all(ballots.iter().map(|b| engine.cast_vote(b))).await;
        assert!(results.iter().all(Result::is_ok));

        let stored = elections
            .find_one(doc! { "_id": "E1" }, None)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_consistent());
        assert_eq!(stored.students_voted().len(), VOTERS);
        assert_eq!(stored.votes().get("A"), Some(&5));
        assert_eq!(stored.votes().get("B"), Some(&5));
        assert_eq!(stored.version(), VOTERS as u64);
    }

    #[backend_test]
    async fn vote_over_http(client: Client, elections: Coll<Election>, students: Coll<Student>) {
        elections.insert_one(Election::example(), None).await.unwrap();
        students.insert_one(Student::example("S1"), None).await.unwrap();

        let response = client
            .patch("/elections/vote")
            .header(ContentType::JSON)
            .body(r#"{"election_id": "E1", "student_id": "S1", "candidate_id": "B"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let tally: TallyView =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(tally.votes.get("B"), Some(&1));
        assert_eq!(tally.students_voted, ["S1"]);

        // Extra election fields are left alone.
        let stored = elections
            .find_one(doc! { "_id": "E1" }, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.details, Election::example().details);
    }
}
