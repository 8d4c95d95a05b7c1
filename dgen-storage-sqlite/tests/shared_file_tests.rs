//! Several processes sharing one database file

use dgen_security::{SecurityConfig, TabCoordinator, Vault, VaultConfig};
use dgen_storage_sqlite::sqlite_environment;
use std::time::Duration;
use tempfile::NamedTempFile;

fn vault_config() -> VaultConfig {
    VaultConfig {
        kdf_iterations: 1_000,
        ..VaultConfig::default()
    }
}

#[tokio::test]
async fn test_vault_survives_reopen() {
    let file = NamedTempFile::new().unwrap();

    {
        let env = sqlite_environment(file.path()).unwrap();
        let vault = Vault::new(&env, &vault_config());
        vault.init().await.unwrap();
        vault.unlock("pw", Some("alice")).await.unwrap();
        vault.store("mnemonic_alice", "twelve words go here").await.unwrap();
    }

    let env = sqlite_environment(file.path()).unwrap();
    let vault = Vault::new(&env, &vault_config());
    vault.init().await.unwrap();

    vault.unlock("pw", Some("alice")).await.unwrap();
    let value = vault.retrieve("mnemonic_alice").await.unwrap();
    assert_eq!(value.as_deref().map(String::as_str), Some("twelve words go here"));

    vault.unlock("wrong", Some("alice")).await.unwrap();
    assert!(vault.retrieve("mnemonic_alice").await.unwrap().is_none());
}

#[tokio::test]
async fn test_lock_is_exclusive_across_connections() {
    let file = NamedTempFile::new().unwrap();
    let config = SecurityConfig::default().tab_sync;

    let first = TabCoordinator::new(&sqlite_environment(file.path()).unwrap(), config.clone()).unwrap();
    let second = TabCoordinator::new(&sqlite_environment(file.path()).unwrap(), config).unwrap();
    assert_ne!(first.tab_id(), second.tab_id());

    assert!(first.try_acquire_wallet_lock(1, Duration::ZERO).await.unwrap());
    assert!(!second.try_acquire_wallet_lock(2, Duration::from_millis(10)).await.unwrap());
    assert_eq!(second.lock_holder().unwrap().as_deref(), Some(first.tab_id()));

    first.release_wallet_lock().unwrap();
    assert!(second.try_acquire_wallet_lock(1, Duration::ZERO).await.unwrap());
}
