//! Vault integration tests
//!
//! Tests cover:
//! - Lock gating and idempotent lock
//! - Sliding inactivity timeout
//! - Wrong password and tampered records reading as missing
//! - Per-identity salts
//! - Store faults and locks racing an unlock

use async_trait::async_trait;
use dgen_security::{EncryptedRecord, Error, MemoryVaultStore, Vault, VaultConfig, VaultStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const LOCK_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const EPSILON: Duration = Duration::from_secs(1);

fn config() -> VaultConfig {
    VaultConfig {
        kdf_iterations: 1_000,
        ..VaultConfig::default()
    }
}

async fn vault_with_store() -> (Arc<MemoryVaultStore>, Vault) {
    let store = Arc::new(MemoryVaultStore::new());
    let vault = Vault::with_store(store.clone(), &config());
    vault.init().await.unwrap();
    (store, vault)
}

// =============================================================================
// Lock gating
// =============================================================================

#[tokio::test]
async fn test_locked_vault_rejects_access() {
    let (_store, vault) = vault_with_store().await;

    assert!(matches!(vault.store("k", "v").await, Err(Error::StorageLocked)));
    assert!(matches!(vault.retrieve("k").await, Err(Error::StorageLocked)));

    vault.unlock("pw", None).await.unwrap();
    vault.store("k", "v").await.unwrap();
    vault.lock();

    assert!(matches!(vault.store("k", "v").await, Err(Error::StorageLocked)));
    assert!(matches!(vault.retrieve("k").await, Err(Error::StorageLocked)));
}

#[tokio::test]
async fn test_remove_works_while_locked() {
    let (store, vault) = vault_with_store().await;
    vault.unlock("pw", None).await.unwrap();
    vault.store("temp", "data").await.unwrap();
    vault.lock();

    vault.remove("temp").await.unwrap();
    assert!(store.load_record("temp").await.unwrap().is_none());

    vault.unlock("pw", None).await.unwrap();
    assert!(vault.retrieve("temp").await.unwrap().is_none());
}

// =============================================================================
// Sliding timeout
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_auto_lock_after_inactivity() {
    let (_store, vault) = vault_with_store().await;
    vault.unlock("pw", None).await.unwrap();

    tokio::time::sleep(LOCK_TIMEOUT + EPSILON).await;
    assert!(!vault.is_unlocked());
}

#[tokio::test(start_paused = true)]
async fn test_access_slides_the_deadline() {
    let (_store, vault) = vault_with_store().await;
    vault.unlock("pw", None).await.unwrap();
    vault.store("k", "v").await.unwrap();

    tokio::time::sleep(LOCK_TIMEOUT - EPSILON).await;
    assert!(vault.is_unlocked());
    assert!(vault.retrieve("k").await.unwrap().is_some());

    tokio::time::sleep(LOCK_TIMEOUT - EPSILON).await;
    assert!(vault.is_unlocked());

    tokio::time::sleep(EPSILON * 2).await;
    assert!(!vault.is_unlocked());
}

#[tokio::test(start_paused = true)]
async fn test_set_lock_timeout_rearms() {
    let (_store, vault) = vault_with_store().await;
    vault.unlock("pw", None).await.unwrap();

    vault.set_lock_timeout(Duration::from_secs(30));
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(vault.is_unlocked());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!vault.is_unlocked());
}

#[tokio::test(start_paused = true)]
async fn test_lock_cancels_timer() {
    let (_store, vault) = vault_with_store().await;
    vault.unlock("pw", None).await.unwrap();
    vault.lock();

    // Re-unlocking must get a full window, not the remainder of the old one
    tokio::time::sleep(Duration::from_secs(10 * 60)).await;
    vault.unlock("pw", None).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10 * 60)).await;
    assert!(vault.is_unlocked());
}

// =============================================================================
// Wrong keys and tampering
// =============================================================================

#[tokio::test]
async fn test_wrong_password_reads_as_missing() {
    let (_store, vault) = vault_with_store().await;
    vault.unlock("correct", None).await.unwrap();
    vault.store("mnemonic", "secret words").await.unwrap();
    vault.lock();

    // Unlock never verifies the password
    assert!(vault.unlock("wrong", None).await.unwrap());
    assert!(vault.retrieve("mnemonic").await.unwrap().is_none());

    vault.unlock("correct", None).await.unwrap();
    let value = vault.retrieve("mnemonic").await.unwrap();
    assert_eq!(value.as_deref().map(String::as_str), Some("secret words"));
}

#[tokio::test]
async fn test_tampered_record_reads_as_missing() {
    let (store, vault) = vault_with_store().await;
    vault.unlock("pw", None).await.unwrap();
    vault.store("k", "value").await.unwrap();

    let mut record = store.raw_record("k").unwrap();
    record.ciphertext[0] ^= 0x01;
    store.put_raw_record("k", record);

    assert!(vault.retrieve("k").await.unwrap().is_none());
}

#[tokio::test]
async fn test_every_write_uses_a_fresh_iv() {
    let (store, vault) = vault_with_store().await;
    vault.unlock("pw", None).await.unwrap();

    vault.store("k", "same").await.unwrap();
    let first = store.raw_record("k").unwrap();
    vault.store("k", "same").await.unwrap();
    let second = store.raw_record("k").unwrap();

    assert_ne!(first.iv, second.iv);
    assert_ne!(first.ciphertext, second.ciphertext);
}

// =============================================================================
// Identities
// =============================================================================

#[tokio::test]
async fn test_identities_have_separate_salts() {
    let (store, vault) = vault_with_store().await;

    vault.unlock("pw", Some("alice")).await.unwrap();
    vault.store("mnemonic_alice", "alice words").await.unwrap();

    // Same password, different identity: different key
    vault.unlock("pw", Some("bob")).await.unwrap();
    assert!(vault.retrieve("mnemonic_alice").await.unwrap().is_none());

    let alice_salt = store.load_salt("salt_alice").await.unwrap().unwrap();
    let bob_salt = store.load_salt("salt_bob").await.unwrap().unwrap();
    assert_eq!(alice_salt.len(), 16);
    assert_ne!(alice_salt, bob_salt);
}

#[tokio::test]
async fn test_salt_is_stable_across_instances() {
    let store = Arc::new(MemoryVaultStore::new());

    let first = Vault::with_store(store.clone(), &config());
    first.init().await.unwrap();
    first.unlock("pw", None).await.unwrap();
    first.store("k", "persisted").await.unwrap();

    // A reload builds a new vault over the same store
    let reloaded = Vault::with_store(store, &config());
    reloaded.init().await.unwrap();
    reloaded.unlock("pw", None).await.unwrap();
    let value = reloaded.retrieve("k").await.unwrap();
    assert_eq!(value.as_deref().map(String::as_str), Some("persisted"));
}

// =============================================================================
// Store faults and races
// =============================================================================

/// Memory store that can fail `open` and can hold the first salt read until
/// released
#[derive(Default)]
struct ScriptedStore {
    inner: MemoryVaultStore,
    fail_open: bool,
    gate_salt: AtomicBool,
    salt_entered: Notify,
    salt_release: Notify,
}

#[async_trait]
impl VaultStore for ScriptedStore {
    async fn open(&self) -> dgen_security::Result<()> {
        if self.fail_open {
            return Err(Error::Storage("disk gone".into()));
        }
        self.inner.open().await
    }

    async fn load_salt(&self, key: &str) -> dgen_security::Result<Option<Vec<u8>>> {
        if self.gate_salt.swap(false, Ordering::SeqCst) {
            self.salt_entered.notify_one();
            self.salt_release.notified().await;
        }
        self.inner.load_salt(key).await
    }

    async fn save_salt(&self, key: &str, salt: &[u8]) -> dgen_security::Result<()> {
        self.inner.save_salt(key, salt).await
    }

    async fn load_record(&self, key: &str) -> dgen_security::Result<Option<EncryptedRecord>> {
        self.inner.load_record(key).await
    }

    async fn save_record(&self, key: &str, record: &EncryptedRecord) -> dgen_security::Result<()> {
        self.inner.save_record(key, record).await
    }

    async fn delete(&self, key: &str) -> dgen_security::Result<()> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_init_propagates_storage_fault() {
    let store = Arc::new(ScriptedStore {
        fail_open: true,
        ..ScriptedStore::default()
    });
    let vault = Vault::with_store(store, &config());

    assert!(matches!(vault.init().await, Err(Error::Storage(msg)) if msg == "disk gone"));
}

#[tokio::test]
async fn test_lock_during_unlock_wins() {
    let store = Arc::new(ScriptedStore::default());
    let vault = Vault::with_store(store.clone(), &config());
    vault.init().await.unwrap();
    store.gate_salt.store(true, Ordering::SeqCst);

    let unlocking = tokio::spawn({
        let vault = vault.clone();
        async move { vault.unlock("pw", None).await }
    });

    store.salt_entered.notified().await;
    vault.lock();
    store.salt_release.notify_one();

    assert!(matches!(unlocking.await.unwrap(), Err(Error::StorageLocked)));
    assert!(!vault.is_unlocked());

    vault.unlock("pw", None).await.unwrap();
    assert!(vault.is_unlocked());
}
