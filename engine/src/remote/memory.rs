//! In-memory remote, used for tests and offline demos.

use super::RemoteClient;
use crate::error::RemoteError;
use crate::{Snapshot, UserId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::watch;

/// Remote document store living in process memory.
///
/// Supports failure injection and holding calls open, so tests can observe
/// the engine while a fetch or upsert is in flight.
#[derive(Debug)]
pub struct MemoryRemote {
    documents: Mutex<HashMap<UserId, Snapshot>>,
    upserts: Mutex<Vec<(UserId, Snapshot)>>,
    fetches: Mutex<usize>,
    fetch_error: Mutex<Option<RemoteError>>,
    upsert_error: Mutex<Option<RemoteError>>,
    fetch_gate: watch::Sender<bool>,
    upsert_gate: watch::Sender<bool>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            upserts: Mutex::new(Vec::new()),
            fetches: Mutex::new(0),
            fetch_error: Mutex::new(None),
            upsert_error: Mutex::new(None),
            fetch_gate: watch::Sender::new(false),
            upsert_gate: watch::Sender::new(false),
        }
    }

    /// Seed a user's document.
    pub fn with_document(self, user_id: impl Into<UserId>, snapshot: Snapshot) -> Self {
        self.documents.lock().insert(user_id.into(), snapshot);
        self
    }

    /// Current document for a user.
    pub fn document(&self, user_id: &str) -> Option<Snapshot> {
        self.documents.lock().get(user_id).cloned()
    }

    /// Every upsert received, in arrival order.
    pub fn upserts(&self) -> Vec<(UserId, Snapshot)> {
        self.upserts.lock().clone()
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.lock().len()
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock()
    }

    /// Make every following fetch fail with `error`.
    pub fn fail_fetches(&self, error: RemoteError) {
        *self.fetch_error.lock() = Some(error);
    }

    /// Make every following upsert fail with `error`.
    pub fn fail_upserts(&self, error: RemoteError) {
        *self.upsert_error.lock() = Some(error);
    }

    /// Clear injected failures.
    pub fn heal(&self) {
        self.fetch_error.lock().take();
        self.upsert_error.lock().take();
    }

    /// Hold fetches open until [`release_fetches`](Self::release_fetches).
    pub fn hold_fetches(&self) {
        self.fetch_gate.send_replace(true);
    }

    pub fn release_fetches(&self) {
        self.fetch_gate.send_replace(false);
    }

    /// Hold upserts open until [`release_upserts`](Self::release_upserts).
    /// Held upserts are applied once released.
    pub fn hold_upserts(&self) {
        self.upsert_gate.send_replace(true);
    }

    pub fn release_upserts(&self) {
        self.upsert_gate.send_replace(false);
    }

    async fn pass(gate: &watch::Sender<bool>) {
        let mut held = gate.subscribe();
        // The sender lives as long as self, so this cannot fail.
        let _ = held.wait_for(|held| !*held).await;
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn fetch_snapshot(&self, user_id: &UserId) -> Result<Option<Snapshot>, RemoteError> {
        *self.fetches.lock() += 1;
        Self::pass(&self.fetch_gate).await;

        if let Some(error) = self.fetch_error.lock().clone() {
            return Err(error);
        }
        Ok(self.documents.lock().get(user_id).cloned())
    }

    async fn upsert(&self, user_id: &UserId, partial: Snapshot) -> Result<(), RemoteError> {
        Self::pass(&self.upsert_gate).await;

        if let Some(error) = self.upsert_error.lock().clone() {
            return Err(error);
        }

        self.upserts.lock().push((user_id.clone(), partial.clone()));
        let mut documents = self.documents.lock();
        let document = documents.entry(user_id.clone()).or_default();
        for (key, value) in partial {
            document.insert(key, value);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn partial(key: &str, value: serde_json::Value) -> Snapshot {
        [(key.to_string(), value)].into_iter().collect()
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let remote = MemoryRemote::new();
        assert_eq!(remote.fetch_snapshot(&"u1".into()).await.unwrap(), None);
        assert_eq!(remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn upsert_merges_fields() {
        let remote = MemoryRemote::new().with_document("u1", partial("a", json!(1)));
        let user: UserId = "u1".into();

        remote.upsert(&user, partial("b", json!(2))).await.unwrap();
        remote.upsert(&user, partial("b", json!(2))).await.unwrap();

        let document = remote.fetch_snapshot(&user).await.unwrap().unwrap();
        assert_eq!(document.get("a"), Some(&json!(1)));
        assert_eq!(document.get("b"), Some(&json!(2)));
        assert_eq!(document.len(), 2);
        assert_eq!(remote.upsert_count(), 2);
    }

    #[tokio::test]
    async fn injected_failures() {
        let remote = MemoryRemote::new();
        let user: UserId = "u1".into();
        remote.fail_fetches(RemoteError::Transport("offline".into()));
        remote.fail_upserts(RemoteError::Unavailable("read-only".into()));

        assert!(remote.fetch_snapshot(&user).await.is_err());
        assert!(remote.upsert(&user, partial("a", json!(1))).await.is_err());
        assert_eq!(remote.document("u1"), None);

        remote.heal();
        remote.upsert(&user, partial("a", json!(1))).await.unwrap();
        assert!(remote.document("u1").is_some());
    }

    #[tokio::test]
    async fn held_fetch_waits_for_release() {
        let remote = std::sync::Arc::new(MemoryRemote::new());
        remote.hold_fetches();

        let task = {
            let remote = remote.clone();
            tokio::spawn(async move { remote.fetch_snapshot(&"u1".into()).await })
        };
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        remote.release_fetches();
        assert_eq!(task.await.unwrap().unwrap(), None);
    }
}
