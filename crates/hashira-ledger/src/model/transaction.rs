//! the transaction record and its canonical encoding
//!
//! The serialized blob is the source of truth: the log stores it untouched
//! and parses this typed view on demand. The embedded hash covers the
//! canonical payload (creator, command, attachment); signatures sign that
//! hash upstream and are never re-verified here.

use serde::{Deserialize, Serialize};

use crate::error::InvalidReason;
use crate::hash::{hash_of, Hash32};

use super::{Command, PubKey};

/// A detached signature over the transaction hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub pubkey: PubKey,
    pub signature: Vec<u8>,
}

/// Optional uninterpreted payload riding along with a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime: String,
    pub data: Vec<u8>,
}

/// A signed ledger transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub creator: PubKey,
    pub command: Command,
    pub signatures: Vec<Signature>,
    pub hash: Hash32,
    pub attachment: Option<Attachment>,
}

/// The hashed portion of a transaction.
#[derive(Serialize)]
struct Payload<'a> {
    creator: &'a PubKey,
    command: &'a Command,
    attachment: &'a Option<Attachment>,
}

impl Transaction {
    /// Assembles a transaction, computing the embedded payload hash.
    pub fn build(
        creator: impl Into<PubKey>,
        command: Command,
        signatures: Vec<Signature>,
        attachment: Option<Attachment>,
    ) -> Self {
        let creator = creator.into();
        let hash = payload_hash(&creator, &command, &attachment);
        Transaction {
            creator,
            command,
            signatures,
            hash,
            attachment,
        }
    }

    /// Canonical blob form, byte-for-byte what the log stores.
    pub fn encode(&self) -> Result<Vec<u8>, InvalidReason> {
        bincode::serialize(self).map_err(|e| InvalidReason::Malformed(e.to_string()))
    }

    /// Parses the typed view of a blob.
    pub fn decode(blob: &[u8]) -> Result<Transaction, InvalidReason> {
        bincode::deserialize(blob).map_err(|e| InvalidReason::Malformed(e.to_string()))
    }

    /// Recomputes the payload hash for verification against `self.hash`.
    pub fn payload_hash(&self) -> Hash32 {
        payload_hash(&self.creator, &self.command, &self.attachment)
    }
}

fn payload_hash(creator: &PubKey, command: &Command, attachment: &Option<Attachment>) -> Hash32 {
    let payload = Payload {
        creator,
        command,
        attachment,
    };
    let bytes = bincode::serialize(&payload).expect("payload serialization is infallible");
    hash_of(&bytes)
}
