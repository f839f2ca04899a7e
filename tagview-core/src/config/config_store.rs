//! Generic config store with change notification.
//!
//! `ConfigStore<T>` wraps `Arc<RwLock<T>>` and carries a version number in
//! a watch channel so consumers can `await` the next change without
//! polling.

use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, watch};

/// A shared, versioned configuration value with change notification.
pub struct ConfigStore<T> {
    inner: Arc<ConfigStoreInner<T>>,
}

struct ConfigStoreInner<T> {
    data: RwLock<T>,
    version_tx: watch::Sender<u64>,
}

/// Receives notifications when a [`ConfigStore`] is updated.
///
/// Call [`changed()`](ConfigWatcher::changed) to wait for the next update.
pub struct ConfigWatcher {
    version_rx: watch::Receiver<u64>,
}

// -- ConfigStore --------------------------------------------------------

impl<T> ConfigStore<T> {
    /// Create a new `ConfigStore` with the given initial value.
    pub fn new(initial: T) -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(ConfigStoreInner {
                data: RwLock::new(initial),
                version_tx,
            }),
        }
    }

    /// Replace the stored value and notify all watchers.
    pub async fn update(&self, value: T) {
        let mut guard = self.inner.data.write().await;
        *guard = value;
        // Release the write lock before notifying so woken subscribers can
        // immediately acquire a read lock.
        drop(guard);
        self.inner.version_tx.send_modify(|v| *v += 1);
    }

    /// Read the current value.
    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.data.read().await
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> ConfigWatcher {
        ConfigWatcher {
            version_rx: self.inner.version_tx.subscribe(),
        }
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

// -- ConfigWatcher ------------------------------------------------------

impl ConfigWatcher {
    /// Wait until the config store is updated.
    ///
    /// Returns `Ok(())` when a new version is available, or `Err` if the
    /// [`ConfigStore`] has been dropped.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.version_rx.changed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_wakes_watcher() {
        let store = ConfigStore::new(1u32);
        let mut watcher = store.subscribe();

        store.update(2).await;
        watcher.changed().await.expect("store alive");
        assert_eq!(*store.read().await, 2);
    }

    #[tokio::test]
    async fn test_watcher_errors_after_store_dropped() {
        let store = ConfigStore::new(());
        let mut watcher = store.subscribe();
        drop(store);
        assert!(watcher.changed().await.is_err());
    }
}
