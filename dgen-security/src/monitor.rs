//! Integrity monitor
//!
//! Heuristic tamper detection over page activity. Observed signals become
//! [`SecurityEvent`]s in a bounded ring buffer; once enough suspicious events
//! land inside the sliding window, every registered wallet is locked and the
//! user is alerted. False positives only cost a re-unlock.

use crate::config::MonitorConfig;
use crate::env::{Clock, KeyValueStorage};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Message shown to the user after an emergency lock
pub const ALERT_MESSAGE: &str = "Suspicious activity detected. Your wallet has been locked for \
     security. Please verify your browser has not been compromised.";

const INJECTED_NODE_NAMES: [&str; 2] = ["SCRIPT", "IFRAME"];
const SENSITIVE_KEY_MARKERS: [&str; 2] = ["wallet", "mnemonic"];
const SEED_PHRASE_WORDS: usize = 12;

/// Something that can be locked in an emergency
#[async_trait]
pub trait WalletLock: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Drop access to secret material
    async fn lock_wallet(&self) -> Result<()>;
}

/// Blocking user notification
pub trait AlertSink: Send + Sync {
    /// Show `message` to the user
    fn alert(&self, message: &str);
}

/// Alert sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, message: &str) {
        error!(alert = %message, "Security alert");
    }
}

/// Structural page change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomMutation {
    /// An element was inserted
    NodeAdded {
        /// Element tag name
        node_name: String,
    },
    /// An element's inline style changed
    StyleChanged {
        /// The element is now invisible
        hidden: bool,
        /// Text content of the element
        text_content: Option<String>,
    },
}

/// Kind of observed activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// Script or iframe inserted
    SuspiciousInjection,
    /// Seed-phrase-shaped text hidden
    SeedHiding,
    /// Wallet or mnemonic key read
    StorageAccess,
    /// Clipboard copy
    ClipboardCopy,
    /// Burst of clipboard copies
    RapidClipboardAccess,
}

impl SecurityEventKind {
    /// Counts towards the emergency threshold
    pub fn is_suspicious(self) -> bool {
        matches!(
            self,
            Self::SuspiciousInjection | Self::SeedHiding | Self::RapidClipboardAccess
        )
    }

    /// Stable name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuspiciousInjection => "suspicious_injection",
            Self::SeedHiding => "seed_hiding",
            Self::StorageAccess => "storage_access",
            Self::ClipboardCopy => "clipboard_copy",
            Self::RapidClipboardAccess => "rapid_clipboard_access",
        }
    }
}

/// One recorded observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// What happened
    pub kind: SecurityEventKind,
    /// When, in Unix ms
    pub timestamp_ms: u64,
    /// Human-readable detail
    pub details: Option<String>,
}

struct MonitorInner {
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    monitoring: AtomicBool,
    events: Mutex<VecDeque<SecurityEvent>>,
    copies: Mutex<VecDeque<u64>>,
    targets: Mutex<Vec<Arc<dyn WalletLock>>>,
    alert: Arc<dyn AlertSink>,
    response: Mutex<Option<JoinHandle<()>>>,
}

/// Tamper heuristics with an emergency lock response
#[derive(Clone)]
pub struct IntegrityMonitor {
    inner: Arc<MonitorInner>,
}

impl IntegrityMonitor {
    /// Create a stopped monitor with no lock targets
    pub fn new(config: MonitorConfig, clock: Arc<dyn Clock>, alert: Arc<dyn AlertSink>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                events: Mutex::new(VecDeque::with_capacity(config.max_events)),
                config,
                clock,
                monitoring: AtomicBool::new(false),
                copies: Mutex::new(VecDeque::new()),
                targets: Mutex::new(Vec::new()),
                alert,
                response: Mutex::new(None),
            }),
        }
    }

    /// Add something to lock in an emergency
    pub fn register_lock(&self, target: Arc<dyn WalletLock>) {
        debug!(target = target.name(), "Registered emergency lock target");
        self.inner.targets.lock().push(target);
    }

    /// Begin accepting observations. Idempotent.
    pub fn start_monitoring(&self) {
        if !self.inner.monitoring.swap(true, Ordering::SeqCst) {
            debug!("Integrity monitoring started");
        }
    }

    /// Ignore further observations
    pub fn stop_monitoring(&self) {
        if self.inner.monitoring.swap(false, Ordering::SeqCst) {
            debug!("Integrity monitoring stopped");
        }
    }

    /// Observations are being recorded
    pub fn is_monitoring(&self) -> bool {
        self.inner.monitoring.load(Ordering::SeqCst)
    }

    /// Feed one page mutation. Returns `true` if it triggered the response.
    pub fn observe_dom_mutation(&self, mutation: &DomMutation) -> bool {
        match mutation {
            DomMutation::NodeAdded { node_name } => {
                let injected = INJECTED_NODE_NAMES
                    .iter()
                    .any(|name| node_name.eq_ignore_ascii_case(name));
                if !injected {
                    return false;
                }
                self.record_event(
                    SecurityEventKind::SuspiciousInjection,
                    Some(format!("{} element added", node_name.to_ascii_uppercase())),
                )
            }
            DomMutation::StyleChanged {
                hidden: true,
                text_content: Some(text),
            } if looks_like_seed_phrase(text) => self.record_event(
                SecurityEventKind::SeedHiding,
                Some("Element with seed phrase hidden".to_string()),
            ),
            DomMutation::StyleChanged { .. } => false,
        }
    }

    /// Feed a batch of mutations. Returns `true` if any triggered the response.
    pub fn observe_dom_mutations(&self, mutations: &[DomMutation]) -> bool {
        mutations
            .iter()
            .fold(false, |triggered, m| self.observe_dom_mutation(m) || triggered)
    }

    /// Report a storage read
    pub fn observe_storage_access(&self, key: &str) -> bool {
        if !SENSITIVE_KEY_MARKERS.iter().any(|marker| key.contains(marker)) {
            return false;
        }
        self.record_event(
            SecurityEventKind::StorageAccess,
            Some(format!("Accessing: {}", key)),
        )
    }

    /// Report a clipboard copy
    pub fn observe_clipboard_copy(&self) -> bool {
        if !self.is_monitoring() {
            return false;
        }

        let now = self.inner.clock.now_ms();
        let rapid = {
            let mut copies = self.inner.copies.lock();
            let window_start = now.saturating_sub(self.inner.config.rapid_copy_window_ms);
            while copies.front().is_some_and(|&ts| ts <= window_start) {
                copies.pop_front();
            }
            copies.push_back(now);
            copies.len() > self.inner.config.rapid_copy_limit
        };

        let mut triggered = self.record_event(
            SecurityEventKind::ClipboardCopy,
            Some("Copy event detected".to_string()),
        );
        if rapid {
            triggered |= self.record_event(
                SecurityEventKind::RapidClipboardAccess,
                Some("Multiple rapid copy events".to_string()),
            );
        }
        triggered
    }

    fn record_event(&self, kind: SecurityEventKind, details: Option<String>) -> bool {
        if !self.is_monitoring() {
            return false;
        }

        let now = self.inner.clock.now_ms();
        let suspicious = {
            let mut events = self.inner.events.lock();
            events.push_back(SecurityEvent {
                kind,
                timestamp_ms: now,
                details,
            });
            while events.len() > self.inner.config.max_events {
                events.pop_front();
            }

            events
                .iter()
                .filter(|e| now.saturating_sub(e.timestamp_ms) < self.inner.config.window_ms)
                .filter(|e| e.kind.is_suspicious())
                .count()
        };
        debug!(event = kind.as_str(), suspicious, "Security event recorded");

        if suspicious >= self.inner.config.threshold {
            self.trigger_response(suspicious);
            return true;
        }
        false
    }

    fn trigger_response(&self, suspicious: usize) {
        error!(suspicious, "Suspicious activity detected, locking wallet");
        self.inner.events.lock().clear();

        let targets: Vec<Arc<dyn WalletLock>> = self.inner.targets.lock().clone();
        let alert = Arc::clone(&self.inner.alert);

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                error!("No async runtime, emergency lock could not run");
                alert.alert(ALERT_MESSAGE);
                return;
            }
        };

        let task = runtime.spawn(async move {
            for target in &targets {
                if let Err(e) = target.lock_wallet().await {
                    error!(target = target.name(), "Emergency lock failed: {}", e);
                }
            }
            alert.alert(ALERT_MESSAGE);
        });

        if let Some(previous) = self.inner.response.lock().replace(task) {
            if !previous.is_finished() {
                warn!("Emergency response still running while another was triggered");
            }
        }
    }

    /// Wait for the latest emergency response, if one was triggered
    pub async fn await_response(&self) {
        let task = self.inner.response.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Emergency response task failed: {}", e);
            }
        }
    }

    /// Buffered events, oldest first
    pub fn recent_events(&self) -> Vec<SecurityEvent> {
        self.inner.events.lock().iter().cloned().collect()
    }

    /// Drop buffered events
    pub fn clear_events(&self) {
        self.inner.events.lock().clear();
    }
}

fn looks_like_seed_phrase(text: &str) -> bool {
    text.split_whitespace().count() == SEED_PHRASE_WORDS
}

/// Storage wrapper reporting reads of sensitive keys to a monitor
pub struct MonitoredStorage<S> {
    inner: S,
    monitor: IntegrityMonitor,
}

impl<S: KeyValueStorage> MonitoredStorage<S> {
    /// Wrap `inner`
    pub fn new(inner: S, monitor: IntegrityMonitor) -> Self {
        Self { inner, monitor }
    }

    /// Unwrap
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: KeyValueStorage> KeyValueStorage for MonitoredStorage<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.monitor.observe_storage_access(key);
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{ManualClock, MemoryStorage};

    fn monitor(clock: Arc<ManualClock>) -> IntegrityMonitor {
        let monitor = IntegrityMonitor::new(MonitorConfig::default(), clock, Arc::new(LogAlertSink));
        monitor.start_monitoring();
        monitor
    }

    fn script() -> DomMutation {
        DomMutation::NodeAdded {
            node_name: "SCRIPT".into(),
        }
    }

    #[test]
    fn test_ignored_while_stopped() {
        let monitor = IntegrityMonitor::new(
            MonitorConfig::default(),
            Arc::new(ManualClock::new(0)),
            Arc::new(LogAlertSink),
        );
        assert!(!monitor.observe_dom_mutation(&script()));
        assert!(monitor.recent_events().is_empty());
    }

    #[test]
    fn test_node_classification() {
        let monitor = monitor(Arc::new(ManualClock::new(0)));
        monitor.observe_dom_mutation(&DomMutation::NodeAdded {
            node_name: "DIV".into(),
        });
        monitor.observe_dom_mutation(&DomMutation::NodeAdded {
            node_name: "iframe".into(),
        });

        let events = monitor.recent_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SecurityEventKind::SuspiciousInjection);
    }

    #[test]
    fn test_seed_hiding_needs_twelve_words_and_hidden() {
        let monitor = monitor(Arc::new(ManualClock::new(0)));
        let seed = "a b c d e f g h i j k l".to_string();

        monitor.observe_dom_mutation(&DomMutation::StyleChanged {
            hidden: false,
            text_content: Some(seed.clone()),
        });
        monitor.observe_dom_mutation(&DomMutation::StyleChanged {
            hidden: true,
            text_content: Some("only three words".into()),
        });
        assert!(monitor.recent_events().is_empty());

        monitor.observe_dom_mutation(&DomMutation::StyleChanged {
            hidden: true,
            text_content: Some(seed),
        });
        assert_eq!(monitor.recent_events()[0].kind, SecurityEventKind::SeedHiding);
    }

    #[test]
    fn test_rapid_clipboard() {
        let clock = Arc::new(ManualClock::new(10_000));
        let monitor = monitor(Arc::clone(&clock));

        for _ in 0..3 {
            monitor.observe_clipboard_copy();
            clock.advance_ms(100);
        }
        assert!(monitor
            .recent_events()
            .iter()
            .all(|e| e.kind == SecurityEventKind::ClipboardCopy));

        monitor.observe_clipboard_copy();
        let kinds: Vec<_> = monitor.recent_events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds.last(), Some(&SecurityEventKind::RapidClipboardAccess));

        clock.advance_ms(2_000);
        monitor.clear_events();
        monitor.observe_clipboard_copy();
        assert_eq!(monitor.recent_events().len(), 1);
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let clock = Arc::new(ManualClock::new(0));
        let monitor = monitor(Arc::clone(&clock));

        for i in 0..150 {
            monitor.observe_storage_access(&format!("wallet_{}", i));
        }
        let events = monitor.recent_events();
        assert_eq!(events.len(), 100);
        assert_eq!(events[0].details.as_deref(), Some("Accessing: wallet_50"));
    }

    #[test]
    fn test_storage_events_are_not_suspicious() {
        let monitor = monitor(Arc::new(ManualClock::new(0)));
        for _ in 0..20 {
            assert!(!monitor.observe_storage_access("mnemonic_default"));
        }
        assert!(!monitor.observe_storage_access("theme"));
        assert_eq!(monitor.recent_events().len(), 20);
    }

    #[test]
    fn test_monitored_storage_reports_reads() {
        let monitor = monitor(Arc::new(ManualClock::new(0)));
        let storage = MonitoredStorage::new(MemoryStorage::new(), monitor.clone());
        storage.set("wallet_id", "abc").unwrap();
        assert!(monitor.recent_events().is_empty());

        assert_eq!(storage.get("wallet_id").unwrap().as_deref(), Some("abc"));
        assert_eq!(monitor.recent_events()[0].kind, SecurityEventKind::StorageAccess);
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(
            serde_json::to_string(&SecurityEventKind::RapidClipboardAccess).unwrap(),
            "\"rapid_clipboard_access\""
        );
        assert!(SecurityEventKind::SeedHiding.is_suspicious());
        assert!(!SecurityEventKind::ClipboardCopy.is_suspicious());
    }
}
