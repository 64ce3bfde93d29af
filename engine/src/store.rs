//! LocalStore - durable key/document persistence with a single observer.
//!
//! Documents are stored as UTF-8 JSON through a [`Backend`]. Reads fail
//! soft: a missing or corrupt entry reads as absent. Successful writes
//! notify the registered subscriber unless notifications are suppressed.

use crate::backend::{Backend, MemoryBackend};
use crate::error::StoreError;
use crate::{CollectionTable, Snapshot};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Callback invoked with `(key, value)` after a notifying write.
pub type Subscriber = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// The local document store.
///
/// Share it as `Arc<LocalStore>` between presentation code and the
/// [`SyncEngine`](crate::SyncEngine).
pub struct LocalStore {
    backend: Box<dyn Backend>,
    /// Serializes writes so `update` is an atomic read-modify-write.
    write_lock: Mutex<()>,
    /// At most one observer.
    subscriber: Mutex<Option<Subscriber>>,
    /// Number of live suppression guards.
    suppressed: AtomicUsize,
}

impl LocalStore {
    /// Create a store over the given backend.
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            write_lock: Mutex::new(()),
            subscriber: Mutex::new(None),
            suppressed: AtomicUsize::new(0),
        }
    }

    /// Create a store backed by memory.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Read a document, falling back to `default` when it is absent or
    /// cannot be decoded as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get_raw(key) {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!(key, error = %e, "stored document has unexpected shape");
                default
            }),
            None => default,
        }
    }

    /// Read a document as raw JSON. Missing, unreadable, or corrupt entries
    /// read as `None`.
    pub fn get_raw(&self, key: &str) -> Option<Value> {
        let data = match self.backend.read(key) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "storage read failed");
                return None;
            }
        };

        match serde_json::from_str::<Value>(&data) {
            Ok(Value::Null) => None,
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "stored document is not valid JSON");
                None
            }
        }
    }

    /// Persist a document and notify the subscriber.
    ///
    /// On failure nothing is notified and the previous value stays in place.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|e| StoreError::Serialize {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        {
            let _write = self.write_lock.lock();
            self.persist(key, &value)?;
        }

        self.notify(key, &value);
        Ok(())
    }

    /// Atomically replace a document with `f(current)`.
    ///
    /// Returning `None` from `f` leaves the document untouched. The write
    /// notifies exactly like [`set`](Self::set).
    pub fn update<F>(&self, key: &str, f: F) -> Result<Option<Value>, StoreError>
    where
        F: FnOnce(Option<Value>) -> Option<Value>,
    {
        let value = {
            let _write = self.write_lock.lock();
            let current = self.get_raw(key);
            match f(current) {
                Some(value) => {
                    self.persist(key, &value)?;
                    value
                }
                None => return Ok(None),
            }
        };

        self.notify(key, &value);
        Ok(Some(value))
    }

    /// Delete a document. Removal does not notify the subscriber.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _write = self.write_lock.lock();
        self.backend.delete(key)?;
        tracing::debug!(key, "document removed");
        Ok(())
    }

    /// Collect every present document registered in `table`.
    pub fn snapshot(&self, table: &CollectionTable) -> Snapshot {
        table
            .keys()
            .filter_map(|key| self.get_raw(key).map(|value| (key.to_string(), value)))
            .collect()
    }

    /// Register the subscriber, replacing any previous one.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let replaced = self.subscriber.lock().replace(Arc::new(callback));
        if replaced.is_some() {
            tracing::debug!("previous store subscriber replaced");
        }
    }

    /// Remove the subscriber, if any.
    pub fn unsubscribe(&self) {
        self.subscriber.lock().take();
    }

    pub fn has_subscriber(&self) -> bool {
        self.subscriber.lock().is_some()
    }

    /// Suppress notifications until the returned guard is dropped.
    ///
    /// Guards nest; notifications resume when the last one is released.
    pub fn suppress_notifications(&self) -> SuppressionGuard<'_> {
        self.suppressed.fetch_add(1, Ordering::SeqCst);
        SuppressionGuard { store: self }
    }

    /// Run `scope` with notifications suppressed.
    pub fn with_suppressed_notifications<R>(&self, scope: impl FnOnce(&Self) -> R) -> R {
        let _guard = self.suppress_notifications();
        scope(self)
    }

    pub fn notifications_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst) > 0
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn persist(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let data = serde_json::to_string(value).map_err(|e| StoreError::Serialize {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        self.backend.write(key, &data).map_err(|e| {
            tracing::error!(key, backend = self.backend.name(), error = %e, "storage write failed");
            e
        })
    }

    fn notify(&self, key: &str, value: &Value) {
        if self.notifications_suppressed() {
            return;
        }
        // Clone out of the slot so the callback runs without holding the lock.
        let subscriber = self.subscriber.lock().clone();
        if let Some(subscriber) = subscriber {
            subscriber(key, value);
        }
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("backend", &self.backend.name())
            .field("has_subscriber", &self.has_subscriber())
            .field("suppressed", &self.notifications_suppressed())
            .finish()
    }
}

/// Scoped notification suppression. Released on drop.
#[must_use = "notifications resume as soon as the guard is dropped"]
pub struct SuppressionGuard<'a> {
    store: &'a LocalStore,
}

impl Drop for SuppressionGuard<'_> {
    fn drop(&mut self) {
        self.store.suppressed.fetch_sub(1, Ordering::SeqCst);
    }
}
