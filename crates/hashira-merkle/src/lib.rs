//! Capped append-only Merkle accumulator.
//!
//! The tree keeps a stack of fixed-capacity rings, one per level, instead of
//! the full node set: appends and rollbacks cost O(log_k n), memory stays
//! O(k) per level, and the price is that only a bounded window of recent
//! leaves can be rolled back without reseeding from an external log.

mod stack;
mod tree;

pub use stack::CircularStack;
pub use tree::NarrowMerkleTree;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("ring capacity cannot be zero")]
    ZeroCapacity,

    #[error("drop below the forward-only cursor: floor {floor}, requested {requested}")]
    DropRegression { floor: u64, requested: u64 },

    #[error("restore out of order: expected leaf {expected}, got {got}")]
    NonContiguousRestore { expected: u64, got: u64 },
}

pub type Result<T> = std::result::Result<T, MerkleError>;
