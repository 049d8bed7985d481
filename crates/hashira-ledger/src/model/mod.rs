//! ledger entities: accounts, assets, peers, permissions
//!
//! Every entity's canonical form is its bincode encoding; that encoding is
//! what the world-state view stores and what queries hand back.

mod command;
mod transaction;

pub use command::{Chaincode, Command, IndexKind};
pub use transaction::{Attachment, Signature, Transaction};

use serde::{Deserialize, Serialize};

/// Public key of an account or peer, as delivered by upstream consensus.
pub type PubKey = String;

/// An account holder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub pubkey: PubKey,
    pub alias: String,
    pub signatories: Vec<PubKey>,
    /// How many signatories must sign for the account's transactions.
    pub use_keys: u16,
}

/// Identity of an asset: ledger, domain and name.
///
/// Field order matters: serialized rows start with the identity, and the
/// balance map's duplicate comparator decides row equality on that prefix.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId {
    pub ledger: String,
    pub domain: String,
    pub name: String,
}

impl AssetId {
    pub fn new(ledger: impl Into<String>, domain: impl Into<String>, name: impl Into<String>) -> Self {
        AssetId {
            ledger: ledger.into(),
            domain: domain.into(),
            name: name.into(),
        }
    }
}

/// What an asset row holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AssetValue {
    Currency {
        amount: u64,
        precision: u8,
        description: String,
    },
    /// Uninterpreted structured asset; carried, never computed on.
    Complex { data: Vec<u8>, description: String },
}

/// An asset row: a registered schema, or one account's holding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub value: AssetValue,
}

impl Asset {
    pub fn currency(id: AssetId, amount: u64, precision: u8) -> Self {
        Asset {
            id,
            value: AssetValue::Currency {
                amount,
                precision,
                description: String::new(),
            },
        }
    }

    /// Currency amount, if this row is a currency.
    pub fn amount(&self) -> Option<u64> {
        match &self.value {
            AssetValue::Currency { amount, .. } => Some(*amount),
            AssetValue::Complex { .. } => None,
        }
    }
}

/// A network peer row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub ledger: String,
    pub pubkey: PubKey,
    pub address: String,
    pub trust: f64,
    pub active: bool,
}

/// Permission rows, one family per scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    Ledger(LedgerPermission),
    Domain(DomainPermission),
    Asset(AssetPermission),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPermission {
    pub ledger: String,
    pub domain_add: bool,
    pub domain_remove: bool,
    pub peer_add: bool,
    pub peer_remove: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPermission {
    pub domain: String,
    pub account_add: bool,
    pub account_remove: bool,
    pub asset_create: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPermission {
    pub asset: String,
    pub add: bool,
    pub remove: bool,
    pub transfer: bool,
}
