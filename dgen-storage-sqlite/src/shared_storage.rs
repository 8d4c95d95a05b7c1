//! SQLite key-value storage shared by every process using the file

use crate::Database;
use dgen_security::KeyValueStorage;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

/// [`KeyValueStorage`] over the `shared_kv` table
///
/// Plays the role of origin-wide storage for the wallet lock record when
/// several processes share one database file. Writes are last-writer-wins.
#[derive(Clone)]
pub struct SqliteSharedStorage {
    db: Arc<Database>,
}

impl SqliteSharedStorage {
    /// Wrap an open database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// All keys, sorted
    pub fn keys(&self) -> dgen_security::Result<Vec<String>> {
        let keys = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM shared_kv ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(keys)
        })?;
        Ok(keys)
    }
}

impl KeyValueStorage for SqliteSharedStorage {
    fn get(&self, key: &str) -> dgen_security::Result<Option<String>> {
        let value = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM shared_kv WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> dgen_security::Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO shared_kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn remove(&self, key: &str) -> dgen_security::Result<()> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM shared_kv WHERE key = ?1", params![key])?;
            Ok(())
        })?;
        Ok(())
    }
}
