//! SQLite block storage behind the vault

use crate::Database;
use async_trait::async_trait;
use dgen_security::crypto::IV_LEN;
use dgen_security::{EncryptedRecord, VaultStore};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

/// [`VaultStore`] over the `vault_entries` table
///
/// Only ever sees salts and ciphertext.
#[derive(Clone)]
pub struct SqliteVaultStore {
    db: Arc<Database>,
}

impl SqliteVaultStore {
    /// Wrap an open database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VaultStore for SqliteVaultStore {
    async fn open(&self) -> dgen_security::Result<()> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM vault_entries", [], |row| {
                row.get::<_, i64>(0)
            })?;
            Ok(())
        })?;
        Ok(())
    }

    async fn load_salt(&self, key: &str) -> dgen_security::Result<Option<Vec<u8>>> {
        let salt = self.db.with_conn(|conn| {
            let salt: Option<Option<Vec<u8>>> = conn
                .query_row(
                    "SELECT salt FROM vault_entries WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(salt.flatten())
        })?;
        Ok(salt)
    }

    async fn save_salt(&self, key: &str, salt: &[u8]) -> dgen_security::Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO vault_entries (key, salt, iv, ciphertext) VALUES (?1, ?2, NULL, NULL)
                 ON CONFLICT(key) DO UPDATE SET salt = excluded.salt, iv = NULL, ciphertext = NULL",
                params![key, salt],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    async fn load_record(&self, key: &str) -> dgen_security::Result<Option<EncryptedRecord>> {
        let row = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT iv, ciphertext FROM vault_entries
                     WHERE key = ?1 AND iv IS NOT NULL",
                    params![key],
                    |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)),
                )
                .optional()?)
        })?;

        let Some((iv, ciphertext)) = row else {
            return Ok(None);
        };
        // A record that cannot be decrypted reads the same as a missing one
        match <[u8; IV_LEN]>::try_from(iv) {
            Ok(iv) => Ok(Some(EncryptedRecord { iv, ciphertext })),
            Err(iv) => {
                tracing::warn!(key = %key, iv_len = iv.len(), "Ignoring vault entry with malformed iv");
                Ok(None)
            }
        }
    }

    async fn save_record(&self, key: &str, record: &EncryptedRecord) -> dgen_security::Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO vault_entries (key, salt, iv, ciphertext) VALUES (?1, NULL, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET salt = NULL, iv = excluded.iv,
                     ciphertext = excluded.ciphertext",
                params![key, &record.iv[..], &record.ciphertext],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> dgen_security::Result<()> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM vault_entries WHERE key = ?1", params![key])?;
            Ok(())
        })?;
        Ok(())
    }
}
