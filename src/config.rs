use std::sync::Arc;
use std::time::Duration;

use mongodb::{bson::doc, Client as MongoClient};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::ballot::{BallotEngine, RetryPolicy};
use crate::store::{DocumentStore, MongoStore};

/// Name of the production database.
const DATABASE: &str = "voter_api";

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::vote_max_attempts")]
    vote_max_attempts: u32,
    #[serde(default = "defaults::vote_backoff_ms")]
    vote_backoff_ms: u64,
    #[serde(default = "defaults::vote_max_backoff_ms")]
    vote_max_backoff_ms: u64,
    #[serde(default = "defaults::vote_deadline_ms")]
    vote_deadline_ms: u64,
}

mod defaults {
    pub fn vote_max_attempts() -> u32 {
        5
    }

    pub fn vote_backoff_ms() -> u64 {
        20
    }

    pub fn vote_max_backoff_ms() -> u64 {
        250
    }

    pub fn vote_deadline_ms() -> u64 {
        2000
    }
}

impl Config {
    /// How many transaction attempts a single ballot gets before the
    /// request fails with contention.
    pub fn vote_max_attempts(&self) -> u32 {
        self.vote_max_attempts
    }

    /// Upper bound on the first backoff after a conflict.
    pub fn vote_backoff(&self) -> Duration {
        Duration::from_millis(self.vote_backoff_ms)
    }

    /// Upper bound on any single backoff.
    pub fn vote_max_backoff(&self) -> Duration {
        Duration::from_millis(self.vote_max_backoff_ms)
    }

    /// Time limit for casting a single ballot, retries included.
    pub fn vote_deadline(&self) -> Duration {
        Duration::from_millis(self.vote_deadline_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.vote_max_attempts(),
            base_backoff: self.vote_backoff(),
            max_backoff: self.vote_max_backoff(),
            deadline: self.vote_deadline(),
        }
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        debug!("Ballot retry policy: {:?}", config.retry_policy());

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that loads the MongoDB config, connects to the database, and
/// places a `Client`, a `Database` and a MongoDB-backed `BallotEngine` into
/// managed state. Must be attached after [`ConfigFairing`].
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        // Construct the connection.
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(DATABASE);

        // The driver connects lazily; make sure the server is really there.
        if let Err(e) = db.run_command(doc! { "ping": 1 }, None).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        let store = MongoStore::new(client.clone(), &db);
        rocket = rocket.manage(client).manage(db);
        manage_engine(rocket, Arc::new(store))
    }
}

/// A fairing that places a `BallotEngine` over an already constructed store
/// into managed state. Must be attached after [`ConfigFairing`].
pub struct EngineFairing {
    store: Arc<dyn DocumentStore>,
}

impl EngineFairing {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[rocket::async_trait]
impl Fairing for EngineFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ballot Engine",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        manage_engine(rocket, self.store.clone())
    }
}

/// Build the ballot engine from the managed config and manage it.
fn manage_engine(rocket: Rocket<Build>, store: Arc<dyn DocumentStore>) -> rocket::fairing::Result {
    let policy = match rocket.state::<Config>() {
        Some(config) => config.retry_policy(),
        None => {
            error!("Config was not available when building the ballot engine");
            return Err(rocket);
        }
    };
    info!("Ballot engine ready");
    Ok(rocket.manage(BallotEngine::new(store, policy)))
}

#[cfg(test)]
mod tests {
    use rocket::figment::{providers::Serialized, Figment};

    use super::*;

    #[test]
    fn defaults_match_retry_policy_defaults() {
        let config: Config = Figment::new().extract().unwrap();
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn overrides() {
        let figment = Figment::new()
            .merge(Serialized::default("vote_max_attempts", 9))
            .merge(Serialized::default("vote_deadline_ms", 500));
        let config: Config = figment.extract().unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 9);
        assert_eq!(policy.deadline, Duration::from_millis(500));
        assert_eq!(policy.base_backoff, Duration::from_millis(20));
    }
}
