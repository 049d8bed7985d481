//! error taxonomy for the ledger engine
//!
//! Three families, mirroring how callers must react: invalid transactions
//! are the submitter's problem and leave the engine healthy; transient
//! storage pressure clears after a commit or an operator raising limits;
//! fatal failures close the engine until it is reopened.

use hashira_merkle::MerkleError;
use hashira_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] InvalidReason),

    #[error("transient storage pressure: {0}")]
    Transient(StoreError),

    #[error("fatal storage failure: {0}")]
    Fatal(String),

    #[error("engine is closed")]
    Closed,
}

/// Why an appended transaction was refused. The write transaction is rolled
/// back to the last commit in every case.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidReason {
    #[error("malformed blob: {0}")]
    Malformed(String),

    #[error("embedded hash does not match the payload")]
    BadHash,

    #[error("arithmetic overflow on {0}")]
    Overflow(String),

    #[error("precision mismatch on {0}")]
    PrecisionMismatch(String),

    #[error("insufficient funds for {0}")]
    InsufficientFunds(String),

    #[error("missing {0}")]
    Missing(String),

    #[error("duplicate {0}")]
    Duplicate(String),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            LedgerError::Transient(e)
        } else {
            // anything else reaching this blanket conversion is a substrate
            // failure the engine cannot reason about
            LedgerError::Fatal(e.to_string())
        }
    }
}

impl From<MerkleError> for LedgerError {
    fn from(e: MerkleError) -> Self {
        LedgerError::Fatal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
