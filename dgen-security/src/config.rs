//! Security configuration
//!
//! Every section defaults to the production constants, so an empty JSON
//! object is a valid configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Encrypted vault
    pub vault: VaultConfig,
    /// In-memory password cache
    pub session: SessionConfig,
    /// Cross-tab wallet lock
    pub tab_sync: TabSyncConfig,
    /// Integrity monitor
    pub monitor: MonitorConfig,
    /// Wallet unlock attempts
    pub unlock_limit: RateLimitConfig,
    /// Payment attempts
    pub payment_limit: RateLimitConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            vault: VaultConfig::default(),
            session: SessionConfig::default(),
            tab_sync: TabSyncConfig::default(),
            monitor: MonitorConfig::default(),
            unlock_limit: RateLimitConfig::wallet_unlock(),
            payment_limit: RateLimitConfig::payment(),
        }
    }
}

impl SecurityConfig {
    /// Parse from a JSON string and validate
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file and validate
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Reject values that would disable a protection
    pub fn validate(&self) -> Result<()> {
        if self.vault.lock_timeout_ms == 0 {
            return Err(Error::Config("vault.lock_timeout_ms must be non-zero".into()));
        }
        if self.vault.kdf_iterations == 0 {
            return Err(Error::Config("vault.kdf_iterations must be non-zero".into()));
        }
        if self.session.idle_timeout_ms == 0 || self.session.hidden_timeout_ms == 0 {
            return Err(Error::Config("session timeouts must be non-zero".into()));
        }
        if self.tab_sync.heartbeat_interval_ms == 0 {
            return Err(Error::Config("tab_sync.heartbeat_interval_ms must be non-zero".into()));
        }
        if self.tab_sync.lock_timeout_ms <= self.tab_sync.heartbeat_interval_ms {
            return Err(Error::Config(
                "tab_sync.lock_timeout_ms must exceed the heartbeat interval".into(),
            ));
        }
        if self.monitor.max_events == 0 || self.monitor.threshold == 0 {
            return Err(Error::Config("monitor capacity and threshold must be non-zero".into()));
        }
        if self.monitor.threshold > self.monitor.max_events {
            return Err(Error::Config("monitor.threshold cannot exceed max_events".into()));
        }
        self.unlock_limit.validate("unlock_limit")?;
        self.payment_limit.validate("payment_limit")?;
        Ok(())
    }
}

/// Vault settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Inactivity window before auto-lock
    pub lock_timeout_ms: u64,
    /// PBKDF2 iterations
    pub kdf_iterations: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 15 * 60 * 1000,
            kdf_iterations: crate::crypto::PBKDF2_ITERATIONS,
        }
    }
}

impl VaultConfig {
    /// Lock timeout as a duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Password cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-identity sliding timeout
    pub idle_timeout_ms: u64,
    /// Continuous hidden period after which everything is cleared
    pub hidden_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 15 * 60 * 1000,
            hidden_timeout_ms: 5 * 60 * 1000,
        }
    }
}

impl SessionConfig {
    /// Idle timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Hidden timeout as a duration
    pub fn hidden_timeout(&self) -> Duration {
        Duration::from_millis(self.hidden_timeout_ms)
    }
}

/// Cross-tab lock settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabSyncConfig {
    /// Heartbeat period of the lock holder
    pub heartbeat_interval_ms: u64,
    /// Maximum age of the lock timestamp for a live lock
    pub lock_timeout_ms: u64,
    /// Acquisition attempts in `try_acquire_default`
    pub max_retries: u32,
    /// Delay between acquisition attempts
    pub retry_delay_ms: u64,
    /// Pause between clearing and re-acquiring in a forced takeover
    pub takeover_grace_ms: u64,
}

impl Default for TabSyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            lock_timeout_ms: 10_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            takeover_grace_ms: 100,
        }
    }
}

impl TabSyncConfig {
    /// Heartbeat period as a duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Retry delay as a duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Takeover grace as a duration
    pub fn takeover_grace(&self) -> Duration {
        Duration::from_millis(self.takeover_grace_ms)
    }
}

/// Integrity monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Ring buffer capacity
    pub max_events: usize,
    /// Suspicious events within the window that trigger a lock
    pub threshold: usize,
    /// Sliding window for the threshold
    pub window_ms: u64,
    /// Window for counting clipboard copies
    pub rapid_copy_window_ms: u64,
    /// Copies within the window above which copying counts as rapid
    pub rapid_copy_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_events: 100,
            threshold: 10,
            window_ms: 5_000,
            rapid_copy_window_ms: 1_000,
            rapid_copy_limit: 3,
        }
    }
}

/// Sliding-window limiter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Attempts allowed per window
    pub max_attempts: usize,
    /// Window length
    pub window_ms: u64,
    /// Block length once the limit is hit
    pub block_duration_ms: u64,
}

impl RateLimitConfig {
    /// 10 attempts per 5 minutes, 5 minute block
    pub fn wallet_unlock() -> Self {
        Self {
            max_attempts: 10,
            window_ms: 5 * 60 * 1000,
            block_duration_ms: 5 * 60 * 1000,
        }
    }

    /// 50 attempts per minute, 5 minute block
    pub fn payment() -> Self {
        Self {
            max_attempts: 50,
            window_ms: 60 * 1000,
            block_duration_ms: 5 * 60 * 1000,
        }
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.max_attempts == 0 || self.window_ms == 0 || self.block_duration_ms == 0 {
            return Err(Error::Config(format!("{} values must be non-zero", section)));
        }
        Ok(())
    }
}
