//! error types for the storage substrate

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data file format version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("environment locked by another process: {0}")]
    Locked(PathBuf),

    #[error("data file corrupt: {0}")]
    Corrupt(String),

    #[error("environment size limit reached")]
    MapFull,

    #[error("named map limit reached")]
    DbsFull,

    #[error("write transaction too large")]
    TxnFull,

    #[error("key already exists")]
    KeyExists,

    #[error("not found")]
    NotFound,

    #[error("a write transaction is already active")]
    WriterActive,

    #[error("map opened with incompatible flags: {0}")]
    Incompatible(String),

    #[error("bad key: {0}")]
    BadKey(String),

    #[error("codec error: {0}")]
    Codec(String),
}

impl StoreError {
    /// Errors that leave the environment unusable until reopened.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_) | StoreError::VersionMismatch { .. } | StoreError::Corrupt(_)
        )
    }

    /// Errors cleared by committing or shrinking the current transaction,
    /// or by an operator raising environment limits.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::MapFull | StoreError::DbsFull | StoreError::TxnFull
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
