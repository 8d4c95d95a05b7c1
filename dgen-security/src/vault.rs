//! Encrypted vault
//!
//! Key-value store whose values are opaque to the storage engine. Values are
//! only decrypted in memory while the vault is unlocked, and the derived key
//! is dropped (and wiped) after a sliding window of inactivity.
//!
//! `unlock` never checks the password. A wrong password derives a different
//! key and simply reads every existing record as missing.

use crate::config::VaultConfig;
use crate::crypto::{random_bytes, secure_random_available, EncryptionKey, VAULT_SALT_LEN};
use crate::env::{Environment, VaultStore};
use crate::monitor::WalletLock;
use crate::timer::InactivityTimer;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Salt key for the default identity
pub const DEFAULT_SALT_KEY: &str = "salt";

/// Salt key for an identity
pub fn salt_key(identity: Option<&str>) -> String {
    match identity {
        Some(id) => format!("salt_{}", id),
        None => DEFAULT_SALT_KEY.to_string(),
    }
}

struct VaultInner {
    store: Arc<dyn VaultStore>,
    key: Mutex<Option<EncryptionKey>>,
    lock_timeout: Mutex<Duration>,
    kdf_iterations: u32,
    timer: InactivityTimer,
    initialized: AtomicBool,
    // Bumped by every lock so an unlock in flight cannot undo it
    lock_epoch: AtomicU64,
}

impl VaultInner {
    fn lock(&self) {
        self.lock_epoch.fetch_add(1, Ordering::SeqCst);
        let had_key = self.key.lock().take().is_some();
        self.timer.cancel();
        if had_key {
            info!("Vault locked");
        }
    }
}

/// Encrypted vault handle
///
/// Clones share the same state; construct one per tab at the composition
/// root.
#[derive(Clone)]
pub struct Vault {
    inner: Arc<VaultInner>,
}

impl Vault {
    /// Create a locked, uninitialized vault over the environment's store
    pub fn new(env: &Environment, config: &VaultConfig) -> Self {
        Self::with_store(Arc::clone(&env.vault_store), config)
    }

    /// Create over an explicit store
    pub fn with_store(store: Arc<dyn VaultStore>, config: &VaultConfig) -> Self {
        Self {
            inner: Arc::new(VaultInner {
                store,
                key: Mutex::new(None),
                lock_timeout: Mutex::new(config.lock_timeout()),
                kdf_iterations: config.kdf_iterations,
                timer: InactivityTimer::new(),
                initialized: AtomicBool::new(false),
                lock_epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Open or create the backing store.
    ///
    /// Fails with `UnsupportedEnvironment` if secure randomness or persistent
    /// storage is missing. Other store faults propagate unchanged.
    pub async fn init(&self) -> Result<()> {
        if !secure_random_available() {
            return Err(Error::UnsupportedEnvironment(
                "Secure random source not available".to_string(),
            ));
        }

        self.inner.store.open().await?;

        self.inner.initialized.store(true, Ordering::SeqCst);
        debug!("Vault initialized");
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.inner.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Derive the vault key for `identity` and keep it in memory.
    ///
    /// Always returns `true` once derivation succeeds; password correctness
    /// only shows when an existing record decrypts. A `lock` that lands while
    /// the key is being derived wins, and this fails with `StorageLocked`.
    pub async fn unlock(&self, password: &str, identity: Option<&str>) -> Result<bool> {
        self.ensure_initialized()?;
        let epoch = self.inner.lock_epoch.load(Ordering::SeqCst);

        let salt = self.load_or_create_salt(&salt_key(identity)).await?;
        let password = Zeroizing::new(password.to_string());
        let iterations = self.inner.kdf_iterations;

        let key = tokio::task::spawn_blocking(move || {
            EncryptionKey::derive(&password, &salt, iterations)
        })
        .await
        .map_err(|e| Error::Encryption(format!("Key derivation task failed: {}", e)))??;

        {
            let mut guard = self.inner.key.lock();
            if self.inner.lock_epoch.load(Ordering::SeqCst) != epoch {
                warn!("Vault locked while unlocking, discarding derived key");
                return Err(Error::StorageLocked);
            }
            *guard = Some(key);
        }
        self.reset_lock_timer();

        info!(identity = identity.unwrap_or("default"), "Vault unlocked");
        Ok(true)
    }

    async fn load_or_create_salt(&self, key: &str) -> Result<Zeroizing<Vec<u8>>> {
        if let Some(salt) = self.inner.store.load_salt(key).await? {
            return Ok(Zeroizing::new(salt));
        }

        let salt = random_bytes::<VAULT_SALT_LEN>();
        self.inner.store.save_salt(key, &salt).await?;
        debug!(salt_key = %key, "Created vault salt");
        Ok(Zeroizing::new(salt.to_vec()))
    }

    /// Encrypt `value` under a fresh nonce and persist it under `key`.
    pub async fn store(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_initialized()?;

        let record = {
            let guard = self.inner.key.lock();
            let enc_key = guard.as_ref().ok_or(Error::StorageLocked)?;
            enc_key.seal(value.as_bytes())?
        };
        self.reset_lock_timer();

        self.inner.store.save_record(key, &record).await?;
        debug!(key = %key, "Stored vault record");
        Ok(())
    }

    /// Read and decrypt `key`.
    ///
    /// Returns `None` both when the key is absent and when it does not
    /// decrypt under the current key.
    pub async fn retrieve(&self, key: &str) -> Result<Option<Zeroizing<String>>> {
        self.ensure_initialized()?;
        if !self.is_unlocked() {
            return Err(Error::StorageLocked);
        }
        self.reset_lock_timer();

        let record = match self.inner.store.load_record(key).await? {
            Some(record) => record,
            None => return Ok(None),
        };

        let guard = self.inner.key.lock();
        let enc_key = guard.as_ref().ok_or(Error::StorageLocked)?;
        let plaintext = match enc_key.open(&record) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                debug!(key = %key, "Vault record did not decrypt");
                return Ok(None);
            }
        };

        Ok(String::from_utf8(plaintext.to_vec()).ok().map(Zeroizing::new))
    }

    /// Delete `key`. Works while locked.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.inner.store.delete(key).await?;
        debug!(key = %key, "Removed vault record");
        Ok(())
    }

    /// Drop the in-memory key and cancel the inactivity timer. Idempotent.
    pub fn lock(&self) {
        self.inner.lock();
    }

    /// Returns `true` while a key is held
    pub fn is_unlocked(&self) -> bool {
        self.inner.key.lock().is_some()
    }

    /// Change the inactivity window; re-arms a running timer.
    pub fn set_lock_timeout(&self, timeout: Duration) {
        *self.inner.lock_timeout.lock() = timeout;
        if self.is_unlocked() && self.inner.timer.is_armed() {
            self.reset_lock_timer();
        }
    }

    /// Current inactivity window
    pub fn lock_timeout(&self) -> Duration {
        *self.inner.lock_timeout.lock()
    }

    fn reset_lock_timer(&self) {
        let timeout = self.lock_timeout();
        let weak: Weak<VaultInner> = Arc::downgrade(&self.inner);
        self.inner.timer.arm(timeout, move || {
            if let Some(inner) = weak.upgrade() {
                warn!("Vault inactivity timeout reached");
                inner.lock();
            }
        });
    }
}

#[async_trait]
impl WalletLock for Vault {
    fn name(&self) -> &str {
        "vault"
    }

    async fn lock_wallet(&self) -> Result<()> {
        self.lock();
        Ok(())
    }
}
