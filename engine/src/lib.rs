//! # StudySync Engine
//!
//! Local/remote synchronization for a personal study tool.
//!
//! All user data (saved texts, word annotations, tasks, study history,
//! settings) lives in a local key/document store. When a user signs in, the
//! engine reconciles the local store with the user's remote document once,
//! then forwards every local write to the remote side.
//!
//! ## Design Principles
//!
//! - **No data loss**: merges union both sides; local wins only on ties
//! - **Idempotent**: re-merging a merged document changes nothing
//! - **No feedback loops**: reconciliation writes do not notify
//! - **Fail soft**: remote and decoding failures degrade to local-only
//!
//! ## Core Concepts
//!
//! ### Collections
//!
//! Every key is registered in a [`CollectionTable`] with a
//! [`CollectionKind`] that selects its merge rule:
//! - [`CollectionKind::RecordList`] - records unique by `id`, local wins ties
//! - [`CollectionKind::FlatMap`] - `{...remote, ...local}`
//! - [`CollectionKind::NestedRecordList`] - per-date union, deduplicated
//! - [`CollectionKind::CounterMap`] - per-date replace, never summed
//! - [`CollectionKind::Scalar`] - local if present
//!
//! ### LocalStore
//!
//! [`LocalStore`] persists JSON documents through a [`Backend`] and has a
//! single subscriber slot. [`LocalStore::suppress_notifications`] returns a
//! guard that silences the subscriber until dropped.
//!
//! ### SyncEngine
//!
//! [`SyncEngine`] moves through [`SyncState`]: `Disconnected`,
//! `Authenticating`, `Reconciling`, `Syncing`.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use studysync_engine::{keys, LocalStore, MemoryRemote, ReconcileOutcome, SyncEngine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(LocalStore::in_memory());
//! store.set(keys::TASKS, &json!([{"id": "t1", "completed": false}])).unwrap();
//!
//! let remote = Arc::new(MemoryRemote::new());
//! let engine = SyncEngine::new(store.clone(), remote.clone());
//!
//! // No remote document yet: the local snapshot becomes the initial state.
//! let outcome = engine.sign_in("user-1").await;
//! assert!(matches!(outcome, ReconcileOutcome::Seeded { .. }));
//! assert!(remote.document("user-1").is_some());
//!
//! engine.sign_out();
//! # }
//! ```

pub mod backend;
pub mod collection;
pub mod error;
pub mod merge;
pub mod remote;
pub mod snapshot;
pub mod store;
pub mod sync;

// Re-export main types at crate root
pub use backend::{Backend, FileBackend, MemoryBackend};
pub use collection::{keys, CollectionDef, CollectionKind, CollectionTable, RECORD_ID_FIELD};
pub use error::{Error, RemoteError, Result, StoreError};
pub use remote::{DocumentEnvelope, MemoryRemote, RemoteClient, UpsertResponse};
#[cfg(feature = "http")]
pub use remote::{HttpRemote, HttpRemoteConfig};
pub use snapshot::Snapshot;
pub use store::{LocalStore, Subscriber, SuppressionGuard};
pub use sync::{MergeAction, ReconcileOutcome, ReconcileReport, SyncEngine, SyncState};

/// Type aliases for clarity
pub type Key = String;
pub type UserId = String;
