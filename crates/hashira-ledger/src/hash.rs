//! SHA3-256 hashing for transaction payloads and Merkle chaining

use sha3::{Digest, Sha3_256};

/// 32-byte SHA3-256 digest.
pub type Hash32 = [u8; 32];

/// Root of the empty ledger.
pub const EMPTY_ROOT: Hash32 = [0u8; 32];

/// SHA3-256 of a byte string.
pub fn hash_of(data: &[u8]) -> Hash32 {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Merkle node combinator: SHA3-256 over the concatenation.
pub fn chain(a: &Hash32, b: &Hash32) -> Hash32 {
    let mut hasher = Sha3_256::new();
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().into()
}

/// Short hex rendering for log lines.
pub(crate) fn short(hash: &Hash32) -> String {
    hex::encode(&hash[..8])
}
