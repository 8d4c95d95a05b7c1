//! Client-side secure session core for the dgen wallet
//!
//! Protects wallet secrets while they live in an untrusted client:
//!
//! - **Crypto**: PBKDF2-HMAC-SHA256 key stretching, AES-256-GCM, packed
//!   `base64(salt ‖ iv ‖ ciphertext)` blobs
//! - **Vault**: encrypted key-value store with a sliding auto-lock
//! - **Sessions**: in-memory password cache with per-identity expiry
//! - **Tab sync**: heartbeat-based wallet lock shared between tabs
//! - **Monitor**: tamper heuristics with an emergency lock response
//! - **Rate limiting**: sliding-window limits on unlock and payment attempts
//!
//! Time, storage and the cross-tab bus are injected through [`Environment`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod crypto;
pub mod env;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod rate_limiter;
pub mod secure_session;
pub mod session;
pub mod tab_sync;
pub mod timer;
pub mod vault;

pub use config::{
    MonitorConfig, RateLimitConfig, SecurityConfig, SessionConfig, TabSyncConfig, VaultConfig,
};
pub use crypto::{decrypt, derive_key, encrypt, EncryptedRecord, EncryptionKey, PackedBlob};
pub use env::{
    BusFrame, Capabilities, Clock, Environment, KeyValueStorage, LocalBus, ManualClock,
    MemoryStorage, MemoryVaultStore, MessageBus, SystemClock, VaultStore,
};
pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat};
pub use monitor::{
    AlertSink, DomMutation, IntegrityMonitor, LogAlertSink, MonitoredStorage, SecurityEvent,
    SecurityEventKind, WalletLock,
};
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use secure_session::SecureSession;
pub use session::SessionManager;
pub use tab_sync::{LockInfo, LockRecord, TabCoordinator, TabMessage};
pub use timer::InactivityTimer;
pub use vault::Vault;
