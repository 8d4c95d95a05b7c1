//! Cross-tab wallet lock
//!
//! At most one tab of an origin may run the wallet against secret material.
//! Ownership is a [`LockRecord`] in shared storage refreshed by a heartbeat;
//! a record whose timestamps fall outside the liveness bounds is stale and
//! may be reclaimed by anyone. The broadcast bus only carries notifications
//! and is never trusted for exclusion.

use crate::config::TabSyncConfig;
use crate::env::{BusFrame, Clock, Environment, KeyValueStorage, MessageBus};
use crate::Result;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared storage key of the lock timestamp
pub const LOCK_KEY: &str = "breez_wallet_lock";
/// Shared storage key of the holder tab id
pub const LOCK_HOLDER_KEY: &str = "breez_wallet_lock_holder";
/// Shared storage key of the last heartbeat
pub const HEARTBEAT_KEY: &str = "breez_wallet_heartbeat";
/// Tab-local storage key of the tab id
pub const TAB_ID_KEY: &str = "breez_tab_id";

const TAB_ID_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn read_timestamp(storage: &dyn KeyValueStorage, key: &str) -> Result<Option<u64>> {
    Ok(storage.get(key)?.map(|v| v.trim().parse().unwrap_or(0)))
}

/// Persisted lock ownership
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Acquisition time, refreshed by every heartbeat
    pub lock_timestamp: u64,
    /// Owning tab
    pub holder_tab_id: String,
    /// Last heartbeat
    pub last_heartbeat: u64,
}

impl LockRecord {
    /// Fresh record for `holder` at `now_ms`
    pub fn new(holder: &str, now_ms: u64) -> Self {
        Self {
            lock_timestamp: now_ms,
            holder_tab_id: holder.to_string(),
            last_heartbeat: now_ms,
        }
    }

    /// Read the record. Missing timestamp or holder means no record;
    /// an unparsable timestamp reads as 0.
    pub fn read(storage: &dyn KeyValueStorage) -> Result<Option<Self>> {
        let lock_timestamp = read_timestamp(storage, LOCK_KEY)?;
        let holder = storage.get(LOCK_HOLDER_KEY)?;

        match (lock_timestamp, holder) {
            (Some(lock_timestamp), Some(holder_tab_id)) => Ok(Some(Self {
                lock_timestamp,
                holder_tab_id,
                last_heartbeat: read_timestamp(storage, HEARTBEAT_KEY)?.unwrap_or(0),
            })),
            _ => Ok(None),
        }
    }

    /// Write all three keys
    pub fn write(&self, storage: &dyn KeyValueStorage) -> Result<()> {
        storage.set(LOCK_KEY, &self.lock_timestamp.to_string())?;
        storage.set(LOCK_HOLDER_KEY, &self.holder_tab_id)?;
        storage.set(HEARTBEAT_KEY, &self.last_heartbeat.to_string())?;
        Ok(())
    }

    /// Remove all three keys
    pub fn clear(storage: &dyn KeyValueStorage) -> Result<()> {
        storage.remove(LOCK_KEY)?;
        storage.remove(LOCK_HOLDER_KEY)?;
        storage.remove(HEARTBEAT_KEY)?;
        Ok(())
    }

    /// Both the lock age and the heartbeat age are within bounds
    pub fn is_live(&self, now_ms: u64, config: &TabSyncConfig) -> bool {
        is_live(self.lock_timestamp, self.last_heartbeat, now_ms, config)
    }
}

fn is_live(lock_timestamp: u64, last_heartbeat: u64, now_ms: u64, config: &TabSyncConfig) -> bool {
    heartbeat_fresh(last_heartbeat, now_ms, config)
        && now_ms.saturating_sub(lock_timestamp) < config.lock_timeout_ms
}

fn heartbeat_fresh(last_heartbeat: u64, now_ms: u64, config: &TabSyncConfig) -> bool {
    now_ms.saturating_sub(last_heartbeat) < config.heartbeat_interval_ms.saturating_mul(2)
}

/// Snapshot of the lock for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    /// Holder tab id, if any
    pub holder: Option<String>,
    /// Lock timestamp, if any
    pub time: Option<u64>,
    /// Holder heartbeat is recent
    pub is_alive: bool,
}

/// Cross-tab notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TabMessage {
    /// Liveness check
    Ping,
    /// Reply to a liveness check
    Pong {
        /// Replying tab
        #[serde(rename = "tabId")]
        tab_id: String,
    },
    /// A tab brought the wallet up
    WalletInitialized {
        /// Sending tab
        #[serde(rename = "tabId")]
        tab_id: String,
    },
    /// A tab shut the wallet down
    WalletDisconnected {
        /// Sending tab
        #[serde(rename = "tabId")]
        tab_id: String,
    },
    /// Balance changed in the holding tab
    WalletUpdated {
        /// New balance
        balance: u64,
        /// Send time in Unix ms
        timestamp: u64,
    },
    /// A tab wants the lock
    RequestLock {
        /// Requesting tab
        #[serde(rename = "tabId")]
        tab_id: String,
    },
    /// A tab now holds the lock
    LockAcquired {
        /// New holder
        #[serde(rename = "tabId")]
        tab_id: String,
    },
    /// A tab gave up the lock
    LockReleased {
        /// Previous holder
        #[serde(rename = "tabId")]
        tab_id: String,
    },
}

/// Registered message callback
pub type MessageHandler = Arc<dyn Fn(&TabMessage) + Send + Sync>;

/// Token returned by [`TabCoordinator::on_message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct TabInner {
    tab_id: String,
    config: TabSyncConfig,
    clock: Arc<dyn Clock>,
    shared: Arc<dyn KeyValueStorage>,
    bus: Arc<dyn MessageBus>,
    has_lock: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    handlers: Mutex<Vec<(HandlerId, MessageHandler)>>,
    next_handler: AtomicU64,
}

impl TabInner {
    fn broadcast(&self, message: &TabMessage) {
        match serde_json::to_string(message) {
            Ok(payload) => self.bus.post(BusFrame {
                origin: self.tab_id.clone(),
                payload,
            }),
            Err(e) => warn!("Failed to encode tab message: {}", e),
        }
    }

    fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
    }

    /// One heartbeat. Returns `false` once this tab no longer owns the lock.
    fn beat(&self) -> bool {
        if !self.has_lock.load(Ordering::SeqCst) {
            return false;
        }

        match self.shared.get(LOCK_HOLDER_KEY) {
            Ok(Some(holder)) if holder == self.tab_id => {
                let now = self.clock.now_ms();
                let refreshed = self
                    .shared
                    .set(HEARTBEAT_KEY, &now.to_string())
                    .and_then(|_| self.shared.set(LOCK_KEY, &now.to_string()));
                if let Err(e) = refreshed {
                    warn!(tab_id = %self.tab_id, "Heartbeat write failed: {}", e);
                }
                true
            }
            Ok(holder) => {
                self.has_lock.store(false, Ordering::SeqCst);
                warn!(
                    tab_id = %self.tab_id,
                    holder = holder.as_deref().unwrap_or("none"),
                    "Wallet lock lost to another tab, stopping heartbeat"
                );
                false
            }
            Err(e) => {
                warn!(tab_id = %self.tab_id, "Heartbeat read failed: {}", e);
                true
            }
        }
    }

    fn dispatch(&self, frame: BusFrame) {
        if frame.origin == self.tab_id {
            return;
        }

        let message: TabMessage = match serde_json::from_str(&frame.payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(origin = %frame.origin, "Dropping undecodable tab message: {}", e);
                return;
            }
        };
        debug!(origin = %frame.origin, ?message, "Received tab message");

        if message == TabMessage::Ping {
            self.broadcast(&TabMessage::Pong {
                tab_id: self.tab_id.clone(),
            });
        }

        let handlers: Vec<MessageHandler> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(&message);
        }
    }
}

impl Drop for TabInner {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.get_mut().take() {
            handle.abort();
        }
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

/// Per-tab participant in the wallet lock protocol
#[derive(Clone)]
pub struct TabCoordinator {
    inner: Arc<TabInner>,
}

impl TabCoordinator {
    /// Load this tab's id from tab-local storage, creating it on first use
    pub fn new(env: &Environment, config: TabSyncConfig) -> Result<Self> {
        let tab_id = match env.tab_storage.get(TAB_ID_KEY)? {
            Some(existing) => {
                debug!(tab_id = %existing, "Reusing tab id");
                existing
            }
            None => {
                let generated = generate_tab_id(env.clock.now_ms());
                env.tab_storage.set(TAB_ID_KEY, &generated)?;
                debug!(tab_id = %generated, "Generated tab id");
                generated
            }
        };

        Ok(Self {
            inner: Arc::new(TabInner {
                tab_id,
                config,
                clock: Arc::clone(&env.clock),
                shared: Arc::clone(&env.shared_storage),
                bus: Arc::clone(&env.bus),
                has_lock: AtomicBool::new(false),
                heartbeat: Mutex::new(None),
                listener: Mutex::new(None),
                handlers: Mutex::new(Vec::new()),
                next_handler: AtomicU64::new(1),
            }),
        })
    }

    /// Start listening on the bus. Calling again restarts the listener.
    ///
    /// Outside a tokio runtime this logs a warning and leaves the tab deaf to
    /// other tabs; the lock protocol still works through shared storage.
    pub fn init(&self) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(tab_id = %self.inner.tab_id, "No async runtime, tab listener not started");
                return;
            }
        };

        let mut rx = self.inner.bus.subscribe();
        let weak: Weak<TabInner> = Arc::downgrade(&self.inner);
        let tab_id = self.inner.tab_id.clone();

        let listener = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => match weak.upgrade() {
                        Some(inner) => inner.dispatch(frame),
                        None => break,
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(tab_id = %tab_id, skipped, "Tab listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = self.inner.listener.lock().replace(listener) {
            previous.abort();
        }
        info!(tab_id = %self.inner.tab_id, channel = self.inner.bus.name(), "Tab sync initialized");
    }

    /// Try to become the lock holder.
    ///
    /// A live lock held by another tab is retried up to `max_retries`
    /// attempts in total, `retry_delay` apart. Stale locks and locks left
    /// behind by this tab are reclaimed immediately. Contention is `Ok(false)`.
    pub async fn try_acquire_wallet_lock(
        &self,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<bool> {
        let inner = &self.inner;

        for attempt in 0..max_retries {
            let now = inner.clock.now_ms();
            let existing = LockRecord::read(inner.shared.as_ref())?;

            if let Some(record) = existing {
                if record.holder_tab_id == inner.tab_id {
                    debug!(tab_id = %inner.tab_id, "Lock already owned by this tab, reacquiring");
                    LockRecord::clear(inner.shared.as_ref())?;
                } else if record.is_live(now, &inner.config) {
                    if attempt + 1 < max_retries {
                        debug!(
                            holder = %record.holder_tab_id,
                            attempt = attempt + 1,
                            max_retries,
                            "Lock held by another tab, retrying"
                        );
                        tokio::time::sleep(retry_delay).await;
                        continue;
                    }
                    info!(holder = %record.holder_tab_id, "Lock held by another tab, giving up");
                    return Ok(false);
                } else {
                    warn!(holder = %record.holder_tab_id, "Stale wallet lock, reclaiming");
                    LockRecord::clear(inner.shared.as_ref())?;
                }
            }

            self.acquire(now)?;
            info!(tab_id = %inner.tab_id, "Wallet lock acquired");
            return Ok(true);
        }

        Ok(false)
    }

    /// [`Self::try_acquire_wallet_lock`] with the configured retry policy
    pub async fn try_acquire_default(&self) -> Result<bool> {
        let config = &self.inner.config;
        self.try_acquire_wallet_lock(config.max_retries, config.retry_delay())
            .await
    }

    fn acquire(&self, now_ms: u64) -> Result<()> {
        LockRecord::new(&self.inner.tab_id, now_ms).write(self.inner.shared.as_ref())?;
        self.inner.has_lock.store(true, Ordering::SeqCst);
        self.start_heartbeat();
        self.inner.broadcast(&TabMessage::LockAcquired {
            tab_id: self.inner.tab_id.clone(),
        });
        Ok(())
    }

    fn start_heartbeat(&self) {
        let weak: Weak<TabInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.heartbeat_interval();

        let Some(first_beat) = tokio::time::Instant::now().checked_add(period) else {
            warn!(tab_id = %self.inner.tab_id, "Heartbeat interval out of range, heartbeat not started");
            return;
        };

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_beat, period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !inner.beat() {
                    break;
                }
            }
        });

        if let Some(previous) = self.inner.heartbeat.lock().replace(task) {
            previous.abort();
        }
    }

    /// Give up the lock. No-op unless this tab holds it.
    ///
    /// The shared record is only cleared while it still names this tab, so a
    /// tab that lost a takeover it has not noticed yet cannot erase the new
    /// holder's lock.
    pub fn release_wallet_lock(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.has_lock.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        inner.stop_heartbeat();

        if inner.shared.get(LOCK_HOLDER_KEY)?.as_deref() == Some(inner.tab_id.as_str()) {
            LockRecord::clear(inner.shared.as_ref())?;
        }

        inner.broadcast(&TabMessage::LockReleased {
            tab_id: inner.tab_id.clone(),
        });
        info!(tab_id = %inner.tab_id, "Wallet lock released");
        Ok(())
    }

    /// Clear any record regardless of owner or liveness and take the lock
    pub async fn force_takeover(&self) -> Result<bool> {
        let inner = &self.inner;
        let previous = inner.shared.get(LOCK_HOLDER_KEY)?;
        warn!(
            tab_id = %inner.tab_id,
            previous = previous.as_deref().unwrap_or("none"),
            "Forcing wallet lock takeover"
        );

        LockRecord::clear(inner.shared.as_ref())?;
        tokio::time::sleep(inner.config.takeover_grace()).await;

        self.acquire(inner.clock.now_ms())?;
        info!(tab_id = %inner.tab_id, "Force takeover completed");
        Ok(true)
    }

    /// This tab holds the lock
    pub fn has_lock(&self) -> bool {
        self.inner.has_lock.load(Ordering::SeqCst)
    }

    /// This tab's id
    pub fn tab_id(&self) -> &str {
        &self.inner.tab_id
    }

    /// Some tab holds a live lock
    pub fn is_locked(&self) -> Result<bool> {
        let shared = self.inner.shared.as_ref();
        let Some(lock_timestamp) = read_timestamp(shared, LOCK_KEY)? else {
            return Ok(false);
        };
        let last_heartbeat = read_timestamp(shared, HEARTBEAT_KEY)?.unwrap_or(0);
        Ok(is_live(
            lock_timestamp,
            last_heartbeat,
            self.inner.clock.now_ms(),
            &self.inner.config,
        ))
    }

    /// Holder tab id as stored, live or not
    pub fn lock_holder(&self) -> Result<Option<String>> {
        self.inner.shared.get(LOCK_HOLDER_KEY)
    }

    /// The last heartbeat is recent
    pub fn is_active_tab_alive(&self) -> Result<bool> {
        let last_heartbeat = read_timestamp(self.inner.shared.as_ref(), HEARTBEAT_KEY)?.unwrap_or(0);
        Ok(heartbeat_fresh(
            last_heartbeat,
            self.inner.clock.now_ms(),
            &self.inner.config,
        ))
    }

    /// Holder, lock time and heartbeat liveness
    pub fn lock_info(&self) -> Result<LockInfo> {
        Ok(LockInfo {
            holder: self.lock_holder()?,
            time: read_timestamp(self.inner.shared.as_ref(), LOCK_KEY)?,
            is_alive: self.is_active_tab_alive()?,
        })
    }

    /// Tell other tabs the balance changed
    pub fn broadcast_wallet_update(&self, balance: u64) {
        self.inner.broadcast(&TabMessage::WalletUpdated {
            balance,
            timestamp: self.inner.clock.now_ms(),
        });
    }

    /// Tell other tabs this tab brought the wallet up
    pub fn broadcast_wallet_initialized(&self) {
        self.inner.broadcast(&TabMessage::WalletInitialized {
            tab_id: self.inner.tab_id.clone(),
        });
    }

    /// Tell other tabs this tab shut the wallet down
    pub fn broadcast_wallet_disconnected(&self) {
        self.inner.broadcast(&TabMessage::WalletDisconnected {
            tab_id: self.inner.tab_id.clone(),
        });
    }

    /// Ask the holder to give up the lock
    pub fn request_lock(&self) {
        self.inner.broadcast(&TabMessage::RequestLock {
            tab_id: self.inner.tab_id.clone(),
        });
    }

    /// Probe for other live tabs
    pub fn ping(&self) {
        self.inner.broadcast(&TabMessage::Ping);
    }

    /// Register a callback for messages from other tabs
    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&TabMessage) + Send + Sync + 'static,
    {
        let id = HandlerId(self.inner.next_handler.fetch_add(1, Ordering::SeqCst));
        self.inner.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    /// Remove a callback. Unknown ids are ignored.
    pub fn off_message(&self, id: HandlerId) {
        self.inner.handlers.lock().retain(|(existing, _)| *existing != id);
    }

    /// Release the lock, stop listening and drop every handler
    pub fn cleanup(&self) -> Result<()> {
        let released = self.release_wallet_lock();

        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
        self.inner.handlers.lock().clear();
        debug!(tab_id = %self.inner.tab_id, "Tab sync cleaned up");
        released
    }
}

fn generate_tab_id(now_ms: u64) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| TAB_ID_CHARS[rng.gen_range(0..TAB_ID_CHARS.len())] as char)
        .collect();
    format!("tab_{}_{}", now_ms, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MemoryStorage;

    fn config() -> TabSyncConfig {
        TabSyncConfig::default()
    }

    #[test]
    fn test_tab_id_format() {
        let id = generate_tab_id(1_700_000_000_000);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "tab");
        assert_eq!(parts[1], "1700000000000");
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].bytes().all(|b| TAB_ID_CHARS.contains(&b)));
    }

    #[test]
    fn test_init_outside_runtime_is_noop() {
        let env = Environment::in_memory();
        let tab = TabCoordinator::new(&env, config()).unwrap();
        tab.init();
        assert!(tab.inner.listener.lock().is_none());
    }

    #[test]
    fn test_liveness_with_extreme_intervals() {
        let config = TabSyncConfig {
            heartbeat_interval_ms: u64::MAX - 1,
            lock_timeout_ms: u64::MAX,
            ..TabSyncConfig::default()
        };
        let record = LockRecord::new("tab_a", 1_000);
        assert!(record.is_live(u64::MAX, &config));
        assert!(record.is_live(0, &config));
    }

    #[test]
    fn test_tab_id_is_stable_per_tab() {
        let env = Environment::in_memory();
        let first = TabCoordinator::new(&env, config()).unwrap();
        let reloaded = TabCoordinator::new(&env, config()).unwrap();
        let other = TabCoordinator::new(&env.sibling(), config()).unwrap();

        assert_eq!(first.tab_id(), reloaded.tab_id());
        assert_ne!(first.tab_id(), other.tab_id());
    }

    #[test]
    fn test_record_roundtrip_and_clear() {
        let storage = MemoryStorage::new();
        assert_eq!(LockRecord::read(&storage).unwrap(), None);

        let record = LockRecord::new("tab_a", 1_000);
        record.write(&storage).unwrap();
        assert_eq!(LockRecord::read(&storage).unwrap(), Some(record));

        LockRecord::clear(&storage).unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_unparsable_heartbeat_reads_as_zero() {
        let storage = MemoryStorage::new();
        storage.set(LOCK_KEY, "5000").unwrap();
        storage.set(LOCK_HOLDER_KEY, "tab_a").unwrap();
        storage.set(HEARTBEAT_KEY, "garbage").unwrap();

        let record = LockRecord::read(&storage).unwrap().unwrap();
        assert_eq!(record.last_heartbeat, 0);
        assert!(!record.is_live(5_000, &config()));
    }

    #[test]
    fn test_liveness_bounds() {
        let config = config();
        let record = LockRecord {
            lock_timestamp: 100_000,
            holder_tab_id: "tab_a".into(),
            last_heartbeat: 100_000,
        };

        assert!(record.is_live(100_000, &config));
        assert!(record.is_live(109_999, &config));
        assert!(!record.is_live(110_000, &config));

        let old_heartbeat = LockRecord {
            last_heartbeat: 90_000,
            ..record.clone()
        };
        assert!(!old_heartbeat.is_live(100_000, &config));
    }

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::to_value(TabMessage::LockAcquired {
            tab_id: "tab_1".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "LOCK_ACQUIRED", "tabId": "tab_1"}));

        let ping: TabMessage = serde_json::from_str(r#"{"type":"PING"}"#).unwrap();
        assert_eq!(ping, TabMessage::Ping);

        let update: TabMessage =
            serde_json::from_str(r#"{"type":"WALLET_UPDATED","balance":42,"timestamp":7}"#).unwrap();
        assert_eq!(
            update,
            TabMessage::WalletUpdated {
                balance: 42,
                timestamp: 7
            }
        );
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let env = Environment::in_memory();
        let tab = TabCoordinator::new(&env, config()).unwrap();

        assert!(tab.try_acquire_wallet_lock(1, Duration::ZERO).await.unwrap());
        assert!(tab.has_lock());
        assert!(tab.is_locked().unwrap());
        assert_eq!(tab.lock_holder().unwrap().as_deref(), Some(tab.tab_id()));

        tab.release_wallet_lock().unwrap();
        assert!(!tab.has_lock());
        assert!(!tab.is_locked().unwrap());
        assert_eq!(tab.lock_holder().unwrap(), None);

        // Second release is a no-op
        tab.release_wallet_lock().unwrap();
    }

    #[tokio::test]
    async fn test_zero_retries_never_acquires() {
        let env = Environment::in_memory();
        let tab = TabCoordinator::new(&env, config()).unwrap();
        assert!(!tab.try_acquire_wallet_lock(0, Duration::ZERO).await.unwrap());
        assert!(!tab.has_lock());
    }

    #[tokio::test]
    async fn test_off_message_removes_handler() {
        let env = Environment::in_memory();
        let tab = TabCoordinator::new(&env, config()).unwrap();
        let id = tab.on_message(|_| {});
        assert_eq!(tab.inner.handlers.lock().len(), 1);

        tab.off_message(id);
        assert!(tab.inner.handlers.lock().is_empty());
    }
}
