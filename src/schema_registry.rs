//! Dialect registry.
//!
//! The database-specific capabilities — reflector, data fetcher, mutator
//! and subscription source — are looked up together once at startup, keyed
//! by [`DatabaseType`]. A second dialect would add a match arm here and
//! nowhere else.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, DatabaseType};
use crate::db::Database;
use crate::fetch::DataFetcher;
use crate::graphql::subscriptions::ChangeBroker;
use crate::meta::SchemaReflector;
use crate::mutate::Mutator;

/// Events buffered per change-feed subscriber before lagging ones drop.
const CHANGE_FEED_CAPACITY: usize = 256;

/// One dialect's capability bundle.
pub struct DialectBundle {
    pub reflector: Arc<SchemaReflector>,
    pub fetcher: DataFetcher,
    pub mutator: Mutator,
    pub broker: Arc<ChangeBroker>,
}

/// Resolve the capability bundle for the configured dialect.
pub fn dialect_bundle(db: &Database, config: &Config) -> DialectBundle {
    let ttl: Duration = config.schema_ttl();
    match config.database_type {
        DatabaseType::Postgres => {
            let broker = ChangeBroker::new(CHANGE_FEED_CAPACITY);
            DialectBundle {
                reflector: Arc::new(SchemaReflector::new(db.clone(), ttl)),
                fetcher: DataFetcher::new(db.clone(), config.allowed_schema.clone()),
                mutator: Mutator::new(
                    db.clone(),
                    config.allowed_schema.clone(),
                    broker.clone(),
                ),
                broker,
            }
        }
    }
}
