#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use std::sync::Arc;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, DatabaseFairing, EngineFairing};
use crate::logging::LoggerFairing;
use crate::store::DocumentStore;

pub mod api;
pub mod ballot;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod store;

pub use config::Config;

/// Build a server backed by MongoDB, configured from `Rocket.toml` and the
/// environment.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .mount("/", api::routes())
}

/// Build a server around an already constructed store, such as an
/// [`store::InMemoryStore`].
pub fn build_with_store(store: Arc<dyn DocumentStore>) -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(EngineFairing::new(store))
        .mount("/", api::routes())
}

/// Connect to the test database server named by `db_uri`.
#[cfg(test)]
pub(crate) async fn db_client() -> mongodb::Client {
    let db_uri = rocket::Config::figment()
        .extract_inner::<String>("db_uri")
        .expect("`db_uri` not set");
    mongodb::Client::with_uri_str(&db_uri)
        .await
        .unwrap_or_else(|e| panic!("Could not connect to database at \"{db_uri}\": {e}"))
}

/// A random database name, so that tests don't collide.
#[cfg(test)]
pub(crate) fn database() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}

/// A MongoDB-backed server using the given database.
#[cfg(test)]
pub(crate) fn rocket_for_db(client: mongodb::Client, db_name: &str) -> Rocket<Build> {
    let db = client.database(db_name);
    let store = store::MongoStore::new(client.clone(), &db);
    build_with_store(Arc::new(store)).manage(client).manage(db)
}
