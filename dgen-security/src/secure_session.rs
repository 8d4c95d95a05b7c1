//! Composition root
//!
//! Builds one instance of every component for a tab and wires them the way
//! the wallet layer uses them: the monitor locks the vault and the password
//! cache, the tab lock gates unlocking, and the limiters guard unlock and
//! payment attempts.

use crate::config::SecurityConfig;
use crate::env::Environment;
use crate::monitor::{AlertSink, IntegrityMonitor};
use crate::rate_limiter::RateLimiter;
use crate::session::SessionManager;
use crate::tab_sync::TabCoordinator;
use crate::vault::Vault;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Vault key holding an identity's mnemonic
pub fn mnemonic_key(identity: &str) -> String {
    format!("mnemonic_{}", identity)
}

/// Every security component of one tab
pub struct SecureSession {
    config: SecurityConfig,
    vault: Vault,
    sessions: SessionManager,
    tabs: TabCoordinator,
    monitor: IntegrityMonitor,
    unlock_limiter: RateLimiter,
    payment_limiter: RateLimiter,
}

impl SecureSession {
    /// Validate `config`, initialize the vault and the tab coordinator and
    /// start monitoring.
    pub async fn start(
        env: Environment,
        config: SecurityConfig,
        alert: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        config.validate()?;

        let vault = Vault::new(&env, &config.vault);
        vault.init().await?;

        let tabs = TabCoordinator::new(&env, config.tab_sync.clone())?;
        tabs.init();

        let sessions = SessionManager::new(&config.session);

        let monitor = IntegrityMonitor::new(config.monitor.clone(), Arc::clone(&env.clock), alert);
        monitor.register_lock(Arc::new(vault.clone()));
        monitor.register_lock(Arc::new(sessions.clone()));
        monitor.start_monitoring();

        let unlock_limiter = RateLimiter::new(config.unlock_limit.clone(), Arc::clone(&env.clock));
        let payment_limiter =
            RateLimiter::new(config.payment_limit.clone(), Arc::clone(&env.clock));

        info!(tab_id = %tabs.tab_id(), "Secure session started");
        Ok(Self {
            config,
            vault,
            sessions,
            tabs,
            monitor,
            unlock_limiter,
            payment_limiter,
        })
    }

    async fn ensure_tab_lock(&self) -> Result<bool> {
        if self.tabs.has_lock() {
            return Ok(false);
        }
        if self.tabs.try_acquire_default().await? {
            return Ok(true);
        }
        let holder = self.tabs.lock_holder()?.unwrap_or_else(|| "unknown".to_string());
        Err(Error::LockContention(holder))
    }

    /// Unlock `identity` and return its mnemonic.
    ///
    /// A wrong password surfaces here as `InvalidCredentials`, since the
    /// stored mnemonic does not decrypt.
    pub async fn open_wallet(&self, identity: &str, password: &str) -> Result<Zeroizing<String>> {
        let decision = self.unlock_limiter.check_limit(identity);
        if !decision.allowed {
            return Err(Error::RateLimited {
                retry_after_secs: decision.retry_after_secs.unwrap_or(0),
            });
        }

        let acquired = self.ensure_tab_lock().await?;

        let opened = self.unlock_mnemonic(identity, password).await;
        if opened.is_err() {
            self.vault.lock();
            if acquired {
                self.tabs.release_wallet_lock()?;
            }
            warn!(identity = %identity, "Wallet open failed");
        }
        opened
    }

    async fn unlock_mnemonic(&self, identity: &str, password: &str) -> Result<Zeroizing<String>> {
        self.vault.unlock(password, Some(identity)).await?;
        let mnemonic = self
            .vault
            .retrieve(&mnemonic_key(identity))
            .await?
            .ok_or(Error::InvalidCredentials)?;

        self.sessions.set_password(identity, password);
        self.unlock_limiter.reset(identity);
        self.tabs.broadcast_wallet_initialized();
        info!(identity = %identity, "Wallet opened");
        Ok(mnemonic)
    }

    /// Encrypt and persist a mnemonic for `identity` under `password`
    pub async fn save_mnemonic(&self, identity: &str, password: &str, mnemonic: &str) -> Result<()> {
        self.ensure_tab_lock().await?;
        self.vault.unlock(password, Some(identity)).await?;
        self.vault.store(&mnemonic_key(identity), mnemonic).await?;
        self.sessions.set_password(identity, password);
        info!(identity = %identity, "Mnemonic saved");
        Ok(())
    }

    /// Count a payment attempt for `identity`
    pub fn check_payment(&self, identity: &str) -> Result<()> {
        let decision = self.payment_limiter.check_limit(identity);
        if decision.allowed {
            Ok(())
        } else {
            Err(Error::RateLimited {
                retry_after_secs: decision.retry_after_secs.unwrap_or(0),
            })
        }
    }

    /// Lock the vault and forget cached passwords
    pub fn lock_all(&self) {
        self.vault.lock();
        self.sessions.clear_all();
        self.tabs.broadcast_wallet_disconnected();
        info!("Wallet locked");
    }

    /// Page is going away
    pub fn on_unload(&self) -> Result<()> {
        self.sessions.handle_unload();
        self.vault.lock();
        self.monitor.stop_monitoring();
        self.tabs.cleanup()
    }

    /// Tab visibility changed
    pub fn on_visibility_change(&self, hidden: bool) {
        self.sessions.handle_visibility_change(hidden);
    }

    /// Active configuration
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Encrypted vault
    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Password cache
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Cross-tab coordinator
    pub fn tabs(&self) -> &TabCoordinator {
        &self.tabs
    }

    /// Integrity monitor
    pub fn monitor(&self) -> &IntegrityMonitor {
        &self.monitor
    }
}
