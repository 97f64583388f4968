mod collection;

pub use collection::{Coll, MongoCollection};
