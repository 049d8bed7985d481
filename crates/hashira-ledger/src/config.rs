//! engine configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Named maps the engine registers: the transaction log's eighteen
/// (store, merkle checkpoint, sixteen indices) plus the world-state view's
/// seven (accounts, asset schemas, balances, peers, three permission maps).
pub const NAMED_MAPS_TOTAL: u32 = 18 + 7;

/// Configuration for a ledger engine instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Directory holding the environment (created if absent).
    pub db_path: PathBuf,
    /// Upper bound on the data file, in bytes.
    pub max_db_size: u64,
    /// Ring capacity of the Merkle accumulator's levels; bounds how many
    /// uncommitted appends can be rolled back without a rebuild.
    pub merkle_block_capacity: usize,
    /// Peer trust is clamped into `[-trust_limit, +trust_limit]`.
    pub trust_limit: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            db_path: PathBuf::from("hashira"),
            max_db_size: 1 << 40,
            merkle_block_capacity: 1024,
            trust_limit: 10.0,
        }
    }
}

impl LedgerConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        LedgerConfig {
            db_path: db_path.into(),
            ..LedgerConfig::default()
        }
    }
}
