//! SyncEngine - sign-in reconciliation and forwarding of local writes.
//!
//! # Session lifecycle
//!
//! 1. `Disconnected`: no subscriber, the store works standalone.
//! 2. `Authenticating`: credentials are being checked by the auth provider.
//! 3. `Reconciling`: the remote snapshot is fetched, merged into the store
//!    with notifications suppressed, and the merged snapshot is pushed back.
//! 4. `Syncing`: every notifying local write is forwarded as a partial
//!    upsert.
//!
//! Each sign-in starts a new session number. Every resume after an await
//! checks it, so a fetch or push that completes after sign-out (or after a
//! newer sign-in) has no effect on the store or the subscription.

use crate::error::RemoteError;
use crate::{CollectionTable, Key, LocalStore, RemoteClient, Snapshot, UserId};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

/// Engine state, observable through [`SyncEngine::watch_state`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncState {
    Disconnected,
    Authenticating,
    #[serde(rename_all = "camelCase")]
    Reconciling {
        user_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    Syncing {
        user_id: UserId,
    },
}

impl SyncState {
    /// User of the active session, if any.
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            SyncState::Reconciling { user_id } | SyncState::Syncing { user_id } => Some(user_id),
            SyncState::Disconnected | SyncState::Authenticating => None,
        }
    }

    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncState::Syncing { .. })
    }
}

/// What reconciliation did with one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeAction {
    /// Local document already reflected both sides
    KeptLocal,
    /// Local was absent; the remote document was adopted
    TookRemote,
    /// Both sides contributed
    Merged,
    /// Neither side had the document
    Absent,
    /// The merged document could not be persisted locally
    WriteFailed,
}

/// Per-key outcome of a merge reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub actions: BTreeMap<Key, MergeAction>,
    /// Remote fields ignored because no collection is registered for them
    pub ignored_remote_keys: Vec<Key>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_error: Option<RemoteError>,
}

impl ReconcileReport {
    pub fn action(&self, key: &str) -> Option<MergeAction> {
        self.actions.get(key).copied()
    }

    /// Whether the merged snapshot reached the remote.
    pub fn pushed(&self) -> bool {
        self.push_error.is_none()
    }
}

/// Result of [`SyncEngine::sign_in`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// A remote document existed and was merged with the local store.
    Merged(ReconcileReport),
    /// No remote document existed; the local snapshot was pushed as the
    /// initial state.
    Seeded {
        pushed: Vec<Key>,
        push_error: Option<RemoteError>,
    },
    /// Fetching the remote document failed; the session forwards local
    /// writes without having merged.
    LocalOnly { reason: RemoteError },
    /// The session ended (sign-out or a newer sign-in) before
    /// reconciliation finished. Nothing further was applied.
    Superseded,
}

/// Orchestrates reconciliation and forwarding for one store.
pub struct SyncEngine {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteClient>,
    table: Arc<CollectionTable>,
    session: Arc<AtomicU64>,
    state: watch::Sender<SyncState>,
}

impl SyncEngine {
    /// Create an engine over the application's default collection table.
    pub fn new(store: Arc<LocalStore>, remote: Arc<dyn RemoteClient>) -> Self {
        Self::with_table(store, remote, CollectionTable::default())
    }

    pub fn with_table(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteClient>,
        table: CollectionTable,
    ) -> Self {
        Self {
            store,
            remote,
            table: Arc::new(table),
            session: Arc::new(AtomicU64::new(0)),
            state: watch::Sender::new(SyncState::Disconnected),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes, e.g. to reload views once syncing starts.
    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn table(&self) -> &CollectionTable {
        &self.table
    }

    /// Credentials have been submitted to the auth provider.
    ///
    /// Any active session is detached first.
    pub fn begin_authentication(&self) {
        self.detach();
        self.set_state(SyncState::Authenticating);
    }

    /// The auth provider rejected the credentials.
    pub fn authentication_failed(&self) {
        if self.state() == SyncState::Authenticating {
            self.set_state(SyncState::Disconnected);
        }
    }

    /// Auth-state callback: `Some(user)` signs in, `None` signs out.
    pub async fn on_auth_state_changed(&self, user: Option<UserId>) -> Option<ReconcileOutcome> {
        match user {
            Some(user_id) => Some(self.sign_in(user_id).await),
            None => {
                self.sign_out();
                None
            }
        }
    }

    /// Reconcile with the remote document of `user_id`, then start
    /// forwarding local writes.
    pub async fn sign_in(&self, user_id: impl Into<UserId>) -> ReconcileOutcome {
        let user_id = user_id.into();
        let span = tracing::info_span!("sync_session", user = %user_id);
        self.run_session(user_id).instrument(span).await
    }

    /// Stop forwarding. Local data is kept; in-flight remote calls finish
    /// in the background and their results are ignored.
    pub fn sign_out(&self) {
        let user = self.state().user_id().cloned();
        self.detach();
        self.set_state(SyncState::Disconnected);
        match user {
            Some(user) => tracing::info!(user = %user, "signed out, forwarding stopped"),
            None => tracing::debug!("sign-out with no active session"),
        }
    }

    async fn run_session(&self, user_id: UserId) -> ReconcileOutcome {
        let session = self.detach();
        self.set_state(SyncState::Reconciling {
            user_id: user_id.clone(),
        });
        tracing::info!(remote = self.remote.name(), "reconciliation started");

        let fetched = self.remote.fetch_snapshot(&user_id).await;
        if !self.is_current(session) {
            tracing::debug!("fetch finished after session ended, discarding");
            return ReconcileOutcome::Superseded;
        }

        let (outcome, pushed_basis, skip) = match fetched {
            Err(reason) => {
                tracing::warn!(error = %reason, "remote fetch failed, continuing local-only");
                (ReconcileOutcome::LocalOnly { reason }, None, HashSet::new())
            }
            Ok(None) => {
                let local = self.store.snapshot(&self.table);
                let pushed: Vec<Key> = local.keys().map(str::to_string).collect();
                tracing::info!(keys = pushed.len(), "no remote document, seeding from local");

                let push_error = if local.is_empty() {
                    None
                } else {
                    self.push(&user_id, local.clone()).await
                };
                if !self.is_current(session) {
                    return ReconcileOutcome::Superseded;
                }

                let outcome = ReconcileOutcome::Seeded { pushed, push_error };
                (outcome, Some(local), HashSet::new())
            }
            Ok(Some(remote)) => {
                let (mut report, merged, failed) = self.write_back(remote);
                if !self.is_current(session) {
                    return ReconcileOutcome::Superseded;
                }

                report.push_error = if merged.is_empty() {
                    None
                } else {
                    self.push(&user_id, merged.clone()).await
                };
                if !self.is_current(session) {
                    return ReconcileOutcome::Superseded;
                }

                (ReconcileOutcome::Merged(report), Some(merged), failed)
            }
        };

        let forwarder = self.start_forwarding(session, &user_id);
        if let (Some(forwarder), Some(basis)) = (forwarder, pushed_basis) {
            self.forward_changed_since(&forwarder, &basis, &skip);
        }

        self.set_state(SyncState::Syncing { user_id });
        tracing::info!("reconciliation finished, forwarding local writes");
        outcome
    }

    /// Merge every registered collection into the store without notifying.
    ///
    /// Returns the report, the merged snapshot to push, and the keys whose
    /// write-back failed.
    fn write_back(&self, mut remote: Snapshot) -> (ReconcileReport, Snapshot, HashSet<Key>) {
        let mut report = ReconcileReport {
            ignored_remote_keys: remote.retain_known(&self.table),
            ..ReconcileReport::default()
        };
        if !report.ignored_remote_keys.is_empty() {
            tracing::debug!(
                keys = ?report.ignored_remote_keys,
                "ignoring unregistered remote fields"
            );
        }

        let mut merged_snapshot = Snapshot::new();
        let mut failed = HashSet::new();
        let _suppressed = self.store.suppress_notifications();

        for def in self.table.iter() {
            let remote_doc = remote.get(&def.key).cloned();
            let mut merged_doc: Option<Value> = None;
            let mut action = MergeAction::Absent;

            // Read-modify-write under the store lock, so a concurrent local
            // write lands either before the merge or after the write-back.
            let written = self.store.update(&def.key, |local| {
                let merged = def.kind.merge(local.as_ref(), remote_doc.as_ref());
                action = classify(local.as_ref(), remote_doc.as_ref(), merged.as_ref());
                merged_doc = merged.clone();
                match (merged, local) {
                    (Some(merged), Some(local)) if merged == local => None,
                    (merged, _) => merged,
                }
            });

            if let Err(e) = written {
                tracing::error!(key = %def.key, error = %e, "failed to persist merged document");
                action = MergeAction::WriteFailed;
                failed.insert(def.key.clone());
            } else if let Some(doc) = merged_doc {
                merged_snapshot.insert(def.key.clone(), doc);
            }

            tracing::debug!(key = %def.key, kind = %def.kind, ?action, "collection reconciled");
            report.actions.insert(def.key.clone(), action);
        }

        (report, merged_snapshot, failed)
    }

    async fn push(&self, user_id: &UserId, snapshot: Snapshot) -> Option<RemoteError> {
        let keys = snapshot.len();
        match self.remote.upsert(user_id, snapshot).await {
            Ok(()) => {
                tracing::debug!(keys, "snapshot pushed");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "snapshot push failed");
                Some(e)
            }
        }
    }

    /// Install the store subscriber that forwards writes for this session.
    ///
    /// Writes are queued and sent one at a time by a single worker, so a
    /// slow upsert can never be overtaken by a later one for the same key.
    fn start_forwarding(&self, session: u64, user_id: &UserId) -> Option<Forwarder> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::error!("no async runtime available, local writes will not be forwarded");
                return None;
            }
        };

        let (queue, pending) = mpsc::unbounded_channel();
        let worker = ForwardWorker {
            store: Arc::downgrade(&self.store),
            remote: self.remote.clone(),
            current: self.session.clone(),
            session,
            user_id: user_id.clone(),
        };
        handle.spawn(worker.run(pending).in_current_span());

        let forwarder = Forwarder { queue };
        let subscriber = forwarder.clone();
        let table = self.table.clone();

        self.store.subscribe(move |key, value| {
            if !table.contains(key) {
                tracing::trace!(key, "write to unregistered key not forwarded");
                return;
            }
            subscriber.forward(key, value.clone());
        });
        Some(forwarder)
    }

    /// Forward documents written between the push and the subscription.
    fn forward_changed_since(&self, forwarder: &Forwarder, basis: &Snapshot, skip: &HashSet<Key>) {
        for key in self.table.keys().filter(|k| !skip.contains(*k)) {
            if let Some(current) = self.store.get_raw(key) {
                if basis.get(key) != Some(&current) {
                    tracing::debug!(key, "forwarding write made during reconciliation");
                    forwarder.forward(key, current);
                }
            }
        }
    }

    /// End the current session. Returns the new session number.
    fn detach(&self) -> u64 {
        self.store.unsubscribe();
        self.session.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.load(Ordering::SeqCst) == session
    }

    fn set_state(&self, state: SyncState) {
        self.state.send_replace(state);
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("remote", &self.remote.name())
            .field("collections", &self.table.len())
            .finish()
    }
}

/// Queue of local writes awaiting forwarding.
///
/// Dropping every clone (the subscriber is removed on detach) lets the
/// worker finish.
#[derive(Clone)]
struct Forwarder {
    queue: mpsc::UnboundedSender<(Key, Value)>,
}

impl Forwarder {
    fn forward(&self, key: &str, value: Value) {
        if self.queue.send((key.to_string(), value)).is_err() {
            tracing::warn!(key, "forwarding worker has stopped, write not forwarded");
        }
    }
}

/// Sends queued writes of one session as partial upserts, in order.
struct ForwardWorker {
    store: Weak<LocalStore>,
    remote: Arc<dyn RemoteClient>,
    current: Arc<AtomicU64>,
    session: u64,
    user_id: UserId,
}

impl ForwardWorker {
    async fn run(self, mut pending: mpsc::UnboundedReceiver<(Key, Value)>) {
        while let Some((key, written)) = pending.recv().await {
            if !self.is_current() {
                tracing::debug!(key = %key, "session ended, dropping queued write");
                continue;
            }

            // Send the newest stored value; an older queued one would
            // overwrite it remotely.
            let value = self
                .store
                .upgrade()
                .and_then(|store| store.get_raw(&key))
                .unwrap_or(written);

            let mut partial = Snapshot::new();
            partial.insert(key.clone(), value);
            let result = self.remote.upsert(&self.user_id, partial).await;

            if !self.is_current() {
                tracing::debug!(key = %key, "upsert finished after session ended, ignoring result");
                continue;
            }
            match result {
                Ok(()) => {
                    tracing::debug!(key = %key, user = %self.user_id, "local write forwarded")
                }
                Err(e) => tracing::warn!(
                    key = %key,
                    user = %self.user_id,
                    error = %e,
                    "failed to forward local write"
                ),
            }
        }
        tracing::trace!(user = %self.user_id, "forwarding worker stopped");
    }

    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.session
    }
}

fn classify(local: Option<&Value>, remote: Option<&Value>, merged: Option<&Value>) -> MergeAction {
    match merged {
        None => MergeAction::Absent,
        Some(merged) if local == Some(merged) => MergeAction::KeptLocal,
        Some(merged) if remote == Some(merged) => MergeAction::TookRemote,
        Some(_) => MergeAction::Merged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::keys;
    use crate::{CollectionKind, MemoryRemote};
    use serde_json::json;

    fn engine_with(remote: MemoryRemote) -> (SyncEngine, Arc<LocalStore>, Arc<MemoryRemote>) {
        let store = Arc::new(LocalStore::in_memory());
        let remote = Arc::new(remote);
        let engine = SyncEngine::new(store.clone(), remote.clone());
        (engine, store, remote)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn classify_actions() {
        let a = json!(1);
        let b = json!(2);
        assert_eq!(classify(None, None, None), MergeAction::Absent);
        assert_eq!(classify(Some(&a), Some(&b), Some(&a)), MergeAction::KeptLocal);
        assert_eq!(classify(None, Some(&b), Some(&b)), MergeAction::TookRemote);
        assert_eq!(
            classify(Some(&a), Some(&b), Some(&json!(3))),
            MergeAction::Merged
        );
    }

    #[test]
    fn state_serializes_tagged() {
        let state = SyncState::Syncing {
            user_id: "u1".into(),
        };
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({"state": "syncing", "userId": "u1"})
        );
        assert_eq!(state.user_id().map(String::as_str), Some("u1"));
        assert!(SyncState::Disconnected.user_id().is_none());
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let (engine, store, _) = engine_with(MemoryRemote::new());
        assert_eq!(engine.state(), SyncState::Disconnected);
        assert!(!store.has_subscriber());
    }

    #[tokio::test]
    async fn authentication_transitions() {
        let (engine, _, _) = engine_with(MemoryRemote::new());
        engine.begin_authentication();
        assert_eq!(engine.state(), SyncState::Authenticating);
        engine.authentication_failed();
        assert_eq!(engine.state(), SyncState::Disconnected);
    }

    #[tokio::test]
    async fn sign_in_without_remote_document_seeds_it() {
        let (engine, store, remote) = engine_with(MemoryRemote::new());
        store.set(keys::TASKS, &json!([{"id": "t1"}])).unwrap();

        let outcome = engine.sign_in("u1").await;
        assert_eq!(
            outcome,
            ReconcileOutcome::Seeded {
                pushed: vec![keys::TASKS.to_string()],
                push_error: None,
            }
        );
        assert_eq!(
            remote.document("u1").unwrap().get(keys::TASKS),
            Some(&json!([{"id": "t1"}]))
        );
        assert!(engine.state().is_syncing());
        assert!(store.has_subscriber());
    }

    #[tokio::test]
    async fn empty_store_seeds_nothing() {
        let (engine, _, remote) = engine_with(MemoryRemote::new());
        let outcome = engine.sign_in("u1").await;
        assert_eq!(
            outcome,
            ReconcileOutcome::Seeded {
                pushed: vec![],
                push_error: None,
            }
        );
        assert_eq!(remote.upsert_count(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_falls_back_to_local_only() {
        let remote = MemoryRemote::new();
        remote.fail_fetches(RemoteError::Transport("offline".into()));
        let (engine, store, remote) = engine_with(remote);
        store.set(keys::AI_API_KEY, &json!("sk-1")).unwrap();

        let outcome = engine.sign_in("u1").await;
        assert_eq!(
            outcome,
            ReconcileOutcome::LocalOnly {
                reason: RemoteError::Transport("offline".into()),
            }
        );
        assert_eq!(remote.upsert_count(), 0);
        assert!(engine.state().is_syncing());

        store.set(keys::AI_API_KEY, &json!("sk-2")).unwrap();
        settle().await;
        assert_eq!(remote.upsert_count(), 1);
    }

    #[tokio::test]
    async fn unregistered_keys_are_not_forwarded() {
        let table = CollectionTable::new().with("synced", CollectionKind::Scalar);
        let store = Arc::new(LocalStore::in_memory());
        let remote = Arc::new(MemoryRemote::new());
        let engine = SyncEngine::with_table(store.clone(), remote.clone(), table);

        engine.sign_in("u1").await;
        store.set("scratch", &json!(1)).unwrap();
        store.set("synced", &json!(2)).unwrap();
        settle().await;

        let upserts = remote.upserts();
        assert_eq!(upserts.len(), 1);
        assert!(upserts[0].1.contains("synced"));
    }

    #[tokio::test]
    async fn sign_out_detaches() {
        let (engine, store, remote) = engine_with(MemoryRemote::new());
        engine.sign_in("u1").await;
        engine.sign_out();

        assert_eq!(engine.state(), SyncState::Disconnected);
        assert!(!store.has_subscriber());

        store.set(keys::TASKS, &json!([])).unwrap();
        settle().await;
        assert_eq!(remote.upsert_count(), 0);
        assert_eq!(store.get_raw(keys::TASKS), Some(json!([])));
    }

    #[tokio::test]
    async fn auth_callback_dispatches() {
        let (engine, _, _) = engine_with(MemoryRemote::new());
        let mut states = engine.watch_state();

        let outcome = engine.on_auth_state_changed(Some("u1".into())).await;
        assert!(matches!(outcome, Some(ReconcileOutcome::Seeded { .. })));
        assert!(states.borrow_and_update().is_syncing());

        assert_eq!(engine.on_auth_state_changed(None).await, None);
        assert_eq!(*states.borrow_and_update(), SyncState::Disconnected);
    }
}
