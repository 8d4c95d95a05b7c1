//! Environment capabilities injected into every component
//!
//! Components never reach for ambient globals. Time, persistent storage,
//! the cross-tab key-value store and the broadcast bus all arrive through an
//! [`Environment`], which is what lets tests run several simulated tabs in
//! one process.

use crate::crypto::{secure_random_available, EncryptedRecord};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

// =============================================================================
// Time
// =============================================================================

/// Wall-clock source in Unix milliseconds
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;
}

/// System wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start_ms`
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Move the clock forward
    pub fn advance_ms(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set_ms(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Key-value storage (shared lock record, per-tab identity)
// =============================================================================

/// Synchronous string key-value storage
///
/// The shared instance plays the role of origin-wide persistent storage; a
/// tab-local instance holds data that survives reloads but not tab close.
pub trait KeyValueStorage: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value (last writer wins)
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value; deleting a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory key-value storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

// =============================================================================
// Vault block storage
// =============================================================================

/// Raw persistent storage behind the vault
///
/// Salts and encrypted records share one keyed collection but keep distinct
/// shapes: a salt is a plain byte array, a record is `{iv, ciphertext}`.
/// Implementations never see plaintext.
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Open or create the backing store
    async fn open(&self) -> Result<()>;

    /// Read a salt
    async fn load_salt(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Persist a salt
    async fn save_salt(&self, key: &str, salt: &[u8]) -> Result<()>;

    /// Read an encrypted record. Keys holding a salt read as `None`.
    async fn load_record(&self, key: &str) -> Result<Option<EncryptedRecord>>;

    /// Persist an encrypted record
    async fn save_record(&self, key: &str, record: &EncryptedRecord) -> Result<()>;

    /// Delete whatever is stored under `key`
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
enum StoredValue {
    Salt(Vec<u8>),
    Record(EncryptedRecord),
}

/// In-memory vault store
#[derive(Debug, Default)]
pub struct MemoryVaultStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    unavailable: bool,
}

impl MemoryVaultStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `open` fails, for exercising unsupported environments
    pub fn unavailable() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            unavailable: true,
        }
    }

    /// Raw record access, for tamper tests
    pub fn raw_record(&self, key: &str) -> Option<EncryptedRecord> {
        match self.entries.read().get(key) {
            Some(StoredValue::Record(record)) => Some(record.clone()),
            _ => None,
        }
    }

    /// Overwrite a raw record, for tamper tests
    pub fn put_raw_record(&self, key: &str, record: EncryptedRecord) {
        self.entries
            .write()
            .insert(key.to_string(), StoredValue::Record(record));
    }
}

#[async_trait]
impl VaultStore for MemoryVaultStore {
    async fn open(&self) -> Result<()> {
        if self.unavailable {
            return Err(Error::UnsupportedEnvironment(
                "Persistent storage not available".to_string(),
            ));
        }
        Ok(())
    }

    async fn load_salt(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.entries.read().get(key) {
            Some(StoredValue::Salt(salt)) => Ok(Some(salt.clone())),
            _ => Ok(None),
        }
    }

    async fn save_salt(&self, key: &str, salt: &[u8]) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), StoredValue::Salt(salt.to_vec()));
        Ok(())
    }

    async fn load_record(&self, key: &str) -> Result<Option<EncryptedRecord>> {
        Ok(self.raw_record(key))
    }

    async fn save_record(&self, key: &str, record: &EncryptedRecord) -> Result<()> {
        self.put_raw_record(key, record.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

// =============================================================================
// Broadcast bus
// =============================================================================

/// One frame on the bus: an opaque JSON payload plus the sender's tab id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusFrame {
    /// Sending tab
    pub origin: String,
    /// JSON message body
    pub payload: String,
}

/// Best-effort, unordered pub/sub between tabs
///
/// Frames posted before a subscriber existed are never delivered to it.
pub trait MessageBus: Send + Sync {
    /// Channel name (scoped per origin)
    fn name(&self) -> &str;

    /// Post a frame to every current subscriber
    fn post(&self, frame: BusFrame);

    /// Subscribe to frames posted from now on
    fn subscribe(&self) -> broadcast::Receiver<BusFrame>;
}

/// In-process bus backed by a tokio broadcast channel
pub struct LocalBus {
    name: String,
    sender: broadcast::Sender<BusFrame>,
}

impl LocalBus {
    /// Default channel capacity
    pub const CAPACITY: usize = 256;

    /// Create a bus with the given channel name
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(Self::CAPACITY);
        Self {
            name: name.into(),
            sender,
        }
    }
}

impl MessageBus for LocalBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn post(&self, frame: BusFrame) {
        // No receivers is fine: delivery is best-effort
        let _ = self.sender.send(frame);
    }

    fn subscribe(&self) -> broadcast::Receiver<BusFrame> {
        self.sender.subscribe()
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Which required primitives are present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// OS random source readable
    pub secure_random: bool,
    /// Persistent vault storage can be opened
    pub persistent_storage: bool,
}

impl Capabilities {
    /// Everything the vault needs is present
    pub fn is_supported(&self) -> bool {
        self.secure_random && self.persistent_storage
    }
}

/// Capability bundle for one tab
#[derive(Clone)]
pub struct Environment {
    /// Wall clock
    pub clock: Arc<dyn Clock>,
    /// Vault block storage (shared by the origin)
    pub vault_store: Arc<dyn VaultStore>,
    /// Origin-wide key-value storage holding the lock record
    pub shared_storage: Arc<dyn KeyValueStorage>,
    /// Tab-local key-value storage holding the tab id
    pub tab_storage: Arc<dyn KeyValueStorage>,
    /// Cross-tab broadcast bus
    pub bus: Arc<dyn MessageBus>,
}

impl Environment {
    /// Default broadcast channel name
    pub const CHANNEL_NAME: &'static str = "breez_wallet_sync";

    /// Fresh in-memory origin on the system clock
    pub fn in_memory() -> Self {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    /// Fresh in-memory origin on the given clock
    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            vault_store: Arc::new(MemoryVaultStore::new()),
            shared_storage: Arc::new(MemoryStorage::new()),
            tab_storage: Arc::new(MemoryStorage::new()),
            bus: Arc::new(LocalBus::new(Self::CHANNEL_NAME)),
        }
    }

    /// Another tab of the same origin: shares everything except tab-local storage
    pub fn sibling(&self) -> Self {
        Self {
            clock: Arc::clone(&self.clock),
            vault_store: Arc::clone(&self.vault_store),
            shared_storage: Arc::clone(&self.shared_storage),
            tab_storage: Arc::new(MemoryStorage::new()),
            bus: Arc::clone(&self.bus),
        }
    }

    /// Probe the required primitives
    pub async fn capabilities(&self) -> Capabilities {
        let persistent_storage = match self.vault_store.open().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Vault storage unavailable: {}", e);
                false
            }
        };

        Capabilities {
            secure_random: secure_random_available(),
            persistent_storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);

        clock.advance_ms(500);
        assert_eq!(clock.now_ms(), 1_500);

        clock.set_ms(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());

        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));

        storage.remove("k").unwrap();
        storage.remove("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
    }

    #[tokio::test]
    async fn test_salt_and_record_shapes_are_distinct() {
        let store = MemoryVaultStore::new();
        store.save_salt("salt", &[1u8; 16]).await.unwrap();

        assert!(store.load_record("salt").await.unwrap().is_none());
        assert_eq!(store.load_salt("salt").await.unwrap(), Some(vec![1u8; 16]));

        store.delete("salt").await.unwrap();
        assert!(store.load_salt("salt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bus_delivers_only_to_existing_subscribers() {
        let bus = LocalBus::new("test");
        bus.post(BusFrame {
            origin: "a".into(),
            payload: "early".into(),
        });

        let mut rx = bus.subscribe();
        bus.post(BusFrame {
            origin: "a".into(),
            payload: "late".into(),
        });

        assert_eq!(rx.recv().await.unwrap().payload, "late");
    }

    #[tokio::test]
    async fn test_sibling_shares_origin_state() {
        let env = Environment::in_memory();
        let other = env.sibling();

        env.shared_storage.set("lock", "1").unwrap();
        env.tab_storage.set("tab", "a").unwrap();

        assert_eq!(other.shared_storage.get("lock").unwrap().as_deref(), Some("1"));
        assert_eq!(other.tab_storage.get("tab").unwrap(), None);
    }

    #[tokio::test]
    async fn test_capabilities() {
        let env = Environment::in_memory();
        assert!(env.capabilities().await.is_supported());

        let mut broken = Environment::in_memory();
        broken.vault_store = Arc::new(MemoryVaultStore::unavailable());
        let caps = broken.capabilities().await;
        assert!(!caps.persistent_storage);
        assert!(!caps.is_supported());
    }
}
