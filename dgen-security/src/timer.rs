//! Sliding inactivity timer
//!
//! A one-shot timer that is cancelled and re-armed on every qualifying
//! activity. Expiry runs a callback on a spawned tokio task.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Cancel-and-rearm one-shot timer
#[derive(Debug, Default)]
pub struct InactivityTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl InactivityTimer {
    /// Create a disarmed timer
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)arm the timer. Any pending expiry is cancelled first.
    ///
    /// Outside a tokio runtime this logs a warning and leaves the timer
    /// disarmed.
    pub fn arm<F>(&self, after: Duration, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("No async runtime, inactivity timer not armed");
                self.cancel();
                return;
            }
        };

        let handle = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            on_expire();
        });

        if let Some(previous) = self.handle.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Cancel a pending expiry. No-op when disarmed.
    pub fn cancel(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    /// Returns `true` while an expiry is pending
    pub fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for InactivityTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
