//! SQLite backend for the dgen secure session core
//!
//! Lets several OS processes share one database file the way browser tabs
//! share an origin: `vault_entries` holds salts and encrypted records,
//! `shared_kv` holds the wallet lock record.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod database;
pub mod error;
pub mod migrations;
pub mod shared_storage;
pub mod vault_store;

pub use database::Database;
pub use error::{Error, Result};
pub use shared_storage::SqliteSharedStorage;
pub use vault_store::SqliteVaultStore;

use dgen_security::{Clock, Environment, LocalBus, MemoryStorage, SystemClock};
use std::path::Path;
use std::sync::Arc;

/// Environment for one process backed by the database at `path`.
///
/// The bus is process-local; cross-process coordination relies on the lock
/// record alone.
pub fn sqlite_environment<P: AsRef<Path>>(path: P) -> Result<Environment> {
    sqlite_environment_with_clock(path, Arc::new(SystemClock))
}

/// [`sqlite_environment`] on an explicit clock
pub fn sqlite_environment_with_clock<P: AsRef<Path>>(
    path: P,
    clock: Arc<dyn Clock>,
) -> Result<Environment> {
    let db = Arc::new(Database::open(path)?);
    Ok(Environment {
        clock,
        vault_store: Arc::new(SqliteVaultStore::new(Arc::clone(&db))),
        shared_storage: Arc::new(SqliteSharedStorage::new(db)),
        tab_storage: Arc::new(MemoryStorage::new()),
        bus: Arc::new(LocalBus::new(Environment::CHANNEL_NAME)),
    })
}
