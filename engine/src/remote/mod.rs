//! Remote document store seam.
//!
//! The remote side holds one document per user whose top-level fields are
//! the collection keys. Clients fetch the whole document and upsert
//! individual fields; an upsert never touches fields it does not name.

#[cfg(feature = "http")]
mod http;
mod memory;
pub mod wire;

#[cfg(feature = "http")]
pub use http::{HttpRemote, HttpRemoteConfig};
pub use memory::MemoryRemote;
pub use wire::{DocumentEnvelope, UpsertResponse};

use crate::error::RemoteError;
use crate::{Snapshot, UserId};
use async_trait::async_trait;

/// Client for an account-scoped remote document store.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch the user's full document. `Ok(None)` means no document exists.
    async fn fetch_snapshot(&self, user_id: &UserId) -> Result<Option<Snapshot>, RemoteError>;

    /// Merge the given fields into the user's document, creating it if
    /// needed. Repeating an upsert has no further effect.
    async fn upsert(&self, user_id: &UserId, partial: Snapshot) -> Result<(), RemoteError>;

    /// Client name for logging.
    fn name(&self) -> &'static str {
        "remote"
    }
}
