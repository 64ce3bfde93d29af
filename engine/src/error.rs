//! Error types for the StudySync engine.

use crate::Key;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while persisting a document locally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage I/O failed for '{key}': {message}")]
    Io { key: Key, message: String },

    #[error("storage quota exceeded writing '{key}': needs {needed} bytes, {available} available")]
    QuotaExceeded {
        key: Key,
        needed: usize,
        available: usize,
    },

    #[error("failed to serialize '{key}': {message}")]
    Serialize { key: Key, message: String },
}

/// Errors raised by a [`RemoteClient`](crate::RemoteClient).
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("could not decode remote document: {0}")]
    Decode(String),

    #[error("remote unavailable: {0}")]
    Unavailable(String),
}

/// All errors surfaced by the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("unknown collection key: {0}")]
    UnknownKey(Key),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
