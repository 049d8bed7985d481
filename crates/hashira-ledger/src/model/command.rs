//! the command set carried by transactions

use serde::{Deserialize, Serialize};

use super::{Account, Asset, Peer, Permission, PubKey};

/// A deployable chaincode unit. Reserved: the engine logs these commands
/// but executes nothing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chaincode {
    pub ledger: String,
    pub domain: String,
    pub name: String,
    pub code: Vec<u8>,
}

/// Everything a transaction can instruct the ledger to do.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Command {
    AssetCreate { asset: Asset },
    AssetAdd { pubkey: PubKey, asset: Asset },
    AssetRemove { pubkey: PubKey, asset: Asset },
    AssetTransfer {
        sender: PubKey,
        receiver: PubKey,
        asset: Asset,
    },
    AccountAdd { account: Account },
    AccountAddSignatory {
        pubkey: PubKey,
        signatories: Vec<PubKey>,
    },
    AccountRemove { pubkey: PubKey },
    AccountRemoveSignatory {
        pubkey: PubKey,
        signatories: Vec<PubKey>,
    },
    AccountSetUseKeys { pubkeys: Vec<PubKey>, use_keys: u16 },
    PeerAdd { peer: Peer },
    PeerRemove { pubkey: PubKey },
    PeerSetActive { pubkey: PubKey, active: bool },
    PeerSetTrust { pubkey: PubKey, trust: f64 },
    PeerChangeTrust { pubkey: PubKey, delta: f64 },
    ChaincodeAdd { code: Chaincode },
    ChaincodeRemove { code: Chaincode },
    ChaincodeExecute {
        ledger: String,
        domain: String,
        name: String,
    },
    PermissionAdd {
        pubkey: PubKey,
        permission: Permission,
    },
    PermissionRemove {
        pubkey: PubKey,
        permission: Permission,
    },
}

/// Secondary-index categories of the transaction log. The single-party
/// categories key on the transaction creator; the two participant indices
/// key on a transfer's sender and receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexKind {
    AssetCreate,
    AssetAdd,
    AssetRemove,
    AssetTransfer,
    TransferSender,
    TransferReceiver,
    AccountAdd,
    AccountAddSignatory,
    AccountRemove,
    AccountRemoveSignatory,
    AccountSetUseKeys,
    PeerAdd,
    PeerChangeTrust,
    PeerRemove,
    PeerSetActive,
    PeerSetTrust,
}

impl IndexKind {
    pub const ALL: [IndexKind; 16] = [
        IndexKind::AssetCreate,
        IndexKind::AssetAdd,
        IndexKind::AssetRemove,
        IndexKind::AssetTransfer,
        IndexKind::TransferSender,
        IndexKind::TransferReceiver,
        IndexKind::AccountAdd,
        IndexKind::AccountAddSignatory,
        IndexKind::AccountRemove,
        IndexKind::AccountRemoveSignatory,
        IndexKind::AccountSetUseKeys,
        IndexKind::PeerAdd,
        IndexKind::PeerChangeTrust,
        IndexKind::PeerRemove,
        IndexKind::PeerSetActive,
        IndexKind::PeerSetTrust,
    ];

    /// Name of the backing map.
    pub fn map_name(self) -> &'static str {
        match self {
            IndexKind::AssetCreate => "index_asset_create",
            IndexKind::AssetAdd => "index_asset_add",
            IndexKind::AssetRemove => "index_asset_remove",
            IndexKind::AssetTransfer => "index_asset_transfer",
            IndexKind::TransferSender => "index_transfer_sender",
            IndexKind::TransferReceiver => "index_transfer_receiver",
            IndexKind::AccountAdd => "index_account_add",
            IndexKind::AccountAddSignatory => "index_account_add_sign",
            IndexKind::AccountRemove => "index_account_remove",
            IndexKind::AccountRemoveSignatory => "index_account_remove_sign",
            IndexKind::AccountSetUseKeys => "index_account_set_use_keys",
            IndexKind::PeerAdd => "index_peer_add",
            IndexKind::PeerChangeTrust => "index_peer_change_trust",
            IndexKind::PeerRemove => "index_peer_remove",
            IndexKind::PeerSetActive => "index_peer_set_active",
            IndexKind::PeerSetTrust => "index_peer_set_trust",
        }
    }
}

impl Command {
    /// The creator-keyed index this command lands in, if any. Chaincode and
    /// permission commands are logged without a secondary index.
    pub fn index_kind(&self) -> Option<IndexKind> {
        match self {
            Command::AssetCreate { .. } => Some(IndexKind::AssetCreate),
            Command::AssetAdd { .. } => Some(IndexKind::AssetAdd),
            Command::AssetRemove { .. } => Some(IndexKind::AssetRemove),
            Command::AssetTransfer { .. } => Some(IndexKind::AssetTransfer),
            Command::AccountAdd { .. } => Some(IndexKind::AccountAdd),
            Command::AccountAddSignatory { .. } => Some(IndexKind::AccountAddSignatory),
            Command::AccountRemove { .. } => Some(IndexKind::AccountRemove),
            Command::AccountRemoveSignatory { .. } => Some(IndexKind::AccountRemoveSignatory),
            Command::AccountSetUseKeys { .. } => Some(IndexKind::AccountSetUseKeys),
            Command::PeerAdd { .. } => Some(IndexKind::PeerAdd),
            Command::PeerChangeTrust { .. } => Some(IndexKind::PeerChangeTrust),
            Command::PeerRemove { .. } => Some(IndexKind::PeerRemove),
            Command::PeerSetActive { .. } => Some(IndexKind::PeerSetActive),
            Command::PeerSetTrust { .. } => Some(IndexKind::PeerSetTrust),
            Command::ChaincodeAdd { .. }
            | Command::ChaincodeRemove { .. }
            | Command::ChaincodeExecute { .. }
            | Command::PermissionAdd { .. }
            | Command::PermissionRemove { .. } => None,
        }
    }

    /// Short tag for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Command::AssetCreate { .. } => "AssetCreate",
            Command::AssetAdd { .. } => "AssetAdd",
            Command::AssetRemove { .. } => "AssetRemove",
            Command::AssetTransfer { .. } => "AssetTransfer",
            Command::AccountAdd { .. } => "AccountAdd",
            Command::AccountAddSignatory { .. } => "AccountAddSignatory",
            Command::AccountRemove { .. } => "AccountRemove",
            Command::AccountRemoveSignatory { .. } => "AccountRemoveSignatory",
            Command::AccountSetUseKeys { .. } => "AccountSetUseKeys",
            Command::PeerAdd { .. } => "PeerAdd",
            Command::PeerRemove { .. } => "PeerRemove",
            Command::PeerSetActive { .. } => "PeerSetActive",
            Command::PeerSetTrust { .. } => "PeerSetTrust",
            Command::PeerChangeTrust { .. } => "PeerChangeTrust",
            Command::ChaincodeAdd { .. } => "ChaincodeAdd",
            Command::ChaincodeRemove { .. } => "ChaincodeRemove",
            Command::ChaincodeExecute { .. } => "ChaincodeExecute",
            Command::PermissionAdd { .. } => "PermissionAdd",
            Command::PermissionRemove { .. } => "PermissionRemove",
        }
    }
}
