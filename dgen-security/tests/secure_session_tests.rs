//! Composition root integration tests
//!
//! Tests cover:
//! - Tab lock handling when the vault store fails mid-open

use async_trait::async_trait;
use dgen_security::{
    EncryptedRecord, Environment, Error, LogAlertSink, SecureSession, SecurityConfig,
    TabCoordinator, TabSyncConfig, VaultStore,
};
use std::sync::Arc;
use std::time::Duration;

/// Store that opens fine but cannot read salts
struct SaltlessStore;

#[async_trait]
impl VaultStore for SaltlessStore {
    async fn open(&self) -> dgen_security::Result<()> {
        Ok(())
    }

    async fn load_salt(&self, _key: &str) -> dgen_security::Result<Option<Vec<u8>>> {
        Err(Error::Storage("disk gone".into()))
    }

    async fn save_salt(&self, _key: &str, _salt: &[u8]) -> dgen_security::Result<()> {
        Err(Error::Storage("disk gone".into()))
    }

    async fn load_record(&self, _key: &str) -> dgen_security::Result<Option<EncryptedRecord>> {
        Ok(None)
    }

    async fn save_record(&self, _key: &str, _record: &EncryptedRecord) -> dgen_security::Result<()> {
        Err(Error::Storage("disk gone".into()))
    }

    async fn delete(&self, _key: &str) -> dgen_security::Result<()> {
        Ok(())
    }
}

fn config() -> SecurityConfig {
    let mut config = SecurityConfig::default();
    config.vault.kdf_iterations = 1_000;
    config
}

async fn failing_session() -> (Environment, SecureSession) {
    let mut env = Environment::in_memory();
    env.vault_store = Arc::new(SaltlessStore);
    let session = SecureSession::start(env.clone(), config(), Arc::new(LogAlertSink))
        .await
        .unwrap();
    (env, session)
}

#[tokio::test]
async fn test_storage_fault_releases_acquired_tab_lock() {
    let (env, session) = failing_session().await;

    let result = session.open_wallet("alice", "pw").await;
    assert!(matches!(result, Err(Error::Storage(msg)) if msg == "disk gone"));
    assert!(!session.tabs().has_lock());
    assert!(!session.tabs().is_locked().unwrap());
    assert!(!session.vault().is_unlocked());

    let other = TabCoordinator::new(&env.sibling(), TabSyncConfig::default()).unwrap();
    assert!(other.try_acquire_wallet_lock(1, Duration::ZERO).await.unwrap());
}

#[tokio::test]
async fn test_storage_fault_keeps_lock_held_before_open() {
    let (_env, session) = failing_session().await;
    assert!(session.tabs().try_acquire_default().await.unwrap());

    assert!(matches!(
        session.open_wallet("alice", "pw").await,
        Err(Error::Storage(_))
    ));
    assert!(session.tabs().has_lock());
    assert!(session.tabs().is_locked().unwrap());
}
