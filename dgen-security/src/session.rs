//! In-memory password cache
//!
//! Holds the raw password per identity for layers that must re-derive vault
//! keys later. Entries expire on a sliding per-identity timer; the whole
//! cache is also cleared on unload and after the tab has been hidden for a
//! continuous period. Nothing here is ever persisted.

use crate::config::SessionConfig;
use crate::monitor::WalletLock;
use crate::timer::InactivityTimer;
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};
use zeroize::Zeroizing;

struct SessionEntry {
    password: Zeroizing<String>,
    generation: u64,
    timer: InactivityTimer,
}

struct SessionInner {
    entries: Mutex<HashMap<String, SessionEntry>>,
    next_generation: Mutex<u64>,
    idle_timeout: Duration,
    hidden_timeout: Duration,
    hidden_timer: InactivityTimer,
}

impl SessionInner {
    fn bump_generation(&self) -> u64 {
        let mut next = self.next_generation.lock();
        *next += 1;
        *next
    }

    fn expire(&self, identity: &str, generation: u64) {
        let mut entries = self.entries.lock();
        if entries.get(identity).map(|e| e.generation) == Some(generation) {
            entries.remove(identity);
            debug!(identity = %identity, "Session password expired");
        }
    }

    fn clear_all(&self) {
        let cleared = {
            let mut entries = self.entries.lock();
            let count = entries.len();
            entries.clear();
            count
        };
        if cleared > 0 {
            info!(cleared, "Cleared all session passwords");
        }
    }
}

/// Per-identity password cache with sliding expiry
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Create an empty cache
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                entries: Mutex::new(HashMap::new()),
                next_generation: Mutex::new(0),
                idle_timeout: config.idle_timeout(),
                hidden_timeout: config.hidden_timeout(),
                hidden_timer: InactivityTimer::new(),
            }),
        }
    }

    /// Cache `password` for `identity` and start its idle timer
    pub fn set_password(&self, identity: &str, password: &str) {
        let generation = self.inner.bump_generation();
        let entry = SessionEntry {
            password: Zeroizing::new(password.to_string()),
            generation,
            timer: InactivityTimer::new(),
        };
        self.arm_entry(identity, &entry);

        // The replaced entry (if any) drops here, aborting its timer
        self.inner.entries.lock().insert(identity.to_string(), entry);
        debug!(identity = %identity, "Session password cached");
    }

    /// Read the cached password. A hit also extends its life.
    pub fn get_password(&self, identity: &str) -> Option<Zeroizing<String>> {
        let generation = self.inner.bump_generation();
        let mut entries = self.inner.entries.lock();
        let entry = entries.get_mut(identity)?;
        entry.generation = generation;
        self.arm_entry(identity, entry);
        Some(entry.password.clone())
    }

    /// Returns `true` if a password is cached for `identity`
    pub fn has_password(&self, identity: &str) -> bool {
        self.inner.entries.lock().contains_key(identity)
    }

    /// Forget one identity
    pub fn clear_password(&self, identity: &str) {
        if self.inner.entries.lock().remove(identity).is_some() {
            debug!(identity = %identity, "Session password cleared");
        }
    }

    /// Forget everything
    pub fn clear_all(&self) {
        self.inner.clear_all();
    }

    /// Identities with a cached password
    pub fn active_identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.entries.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Page is going away
    pub fn handle_unload(&self) {
        self.inner.hidden_timer.cancel();
        self.inner.clear_all();
    }

    /// Tab visibility changed.
    ///
    /// Hiding arms the hidden timer; becoming visible cancels it, so only a
    /// continuous hidden period clears the cache.
    pub fn handle_visibility_change(&self, hidden: bool) {
        if hidden {
            let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
            self.inner.hidden_timer.arm(self.inner.hidden_timeout, move || {
                if let Some(inner) = weak.upgrade() {
                    debug!("Tab hidden too long");
                    inner.clear_all();
                }
            });
        } else {
            self.inner.hidden_timer.cancel();
        }
    }

    fn arm_entry(&self, identity: &str, entry: &SessionEntry) {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let identity = identity.to_string();
        let generation = entry.generation;
        entry.timer.arm(self.inner.idle_timeout, move || {
            if let Some(inner) = weak.upgrade() {
                inner.expire(&identity, generation);
            }
        });
    }
}

#[async_trait]
impl WalletLock for SessionManager {
    fn name(&self) -> &str {
        "sessions"
    }

    async fn lock_wallet(&self) -> Result<()> {
        self.clear_all();
        Ok(())
    }
}
