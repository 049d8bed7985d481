//! Hashira ledger core: an append-only, content-addressed store of signed
//! transactions with a replicated world-state view and a Merkle accumulator.
//!
//! The engine binds three pieces under one write transaction:
//! - the transaction log: monotonically indexed blobs plus per-command
//!   secondary indices ([`txlog`]),
//! - the world-state view: accounts, assets, peers and permissions derived
//!   by folding the committed log ([`wsv`]),
//! - the narrow Merkle accumulator yielding a root after every append.
//!
//! Consensus, networking, signature checking and wire formats live outside
//! this crate: it consumes already-verified transaction blobs and produces
//! Merkle roots and query results.

pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod model;
pub mod txlog;
pub mod wsv;

pub use config::LedgerConfig;
pub use engine::Engine;
pub use error::{InvalidReason, LedgerError, Result};
pub use hash::{chain, hash_of, Hash32, EMPTY_ROOT};
pub use model::{
    Account, Asset, AssetId, AssetValue, Attachment, Chaincode, Command, IndexKind, Peer,
    Permission, Signature, Transaction,
};
