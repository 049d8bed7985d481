//! the world-state view: aggregates derived by folding the transaction log
//!
//! Maps: `accounts` (pubkey -> Account), `assets` (AssetId -> registered
//! schema), `account_assets` (pubkey -> holdings, dup-sorted with row
//! identity decided on the AssetId prefix), `peers` (pubkey -> Peer) and
//! three permission maps (pubkey -> rows). Replaying the committed log into
//! an empty view reproduces these maps bit-exactly.

use std::cmp::Ordering;

use hashira_store::{MapFlags, MapId, PutMode, StoreError, TxRead, WriteTxn};

use crate::error::{InvalidReason, LedgerError, Result};
use crate::model::{
    Account, Asset, AssetId, AssetValue, Command, Peer, Permission, PubKey, Transaction,
};

/// Row identity for the balance map: rows are the same holding when their
/// serialized AssetId prefixes match, so an upsert replaces in place.
fn account_asset_cmp(a: &[u8], b: &[u8]) -> Ordering {
    match (
        bincode::deserialize::<AssetId>(a),
        bincode::deserialize::<AssetId>(b),
    ) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

pub struct Wsv {
    accounts: MapId,
    assets: MapId,
    account_assets: MapId,
    peers: MapId,
    permissions_ledger: MapId,
    permissions_domain: MapId,
    permissions_asset: MapId,
    trust_limit: f64,
}

impl Wsv {
    /// Opens (creating on first use) the view's maps.
    pub fn open(txn: &mut WriteTxn, trust_limit: f64) -> Result<Wsv> {
        Ok(Wsv {
            accounts: txn.open_map("accounts", MapFlags::new().create())?,
            assets: txn.open_map("assets", MapFlags::new().create())?,
            account_assets: txn.open_map_with_cmp(
                "account_assets",
                MapFlags::new().dup_sort().create(),
                account_asset_cmp,
            )?,
            peers: txn.open_map("peers", MapFlags::new().create())?,
            permissions_ledger: txn.open_map("permissions_ledger", MapFlags::new().dup_sort().create())?,
            permissions_domain: txn.open_map("permissions_domain", MapFlags::new().dup_sort().create())?,
            permissions_asset: txn.open_map("permissions_asset", MapFlags::new().dup_sort().create())?,
            trust_limit,
        })
    }

    /// Applies one transaction's command to the view. Chaincode commands
    /// are reserved tags: logged by the transaction log, no state effect.
    pub fn apply(&self, txn: &mut WriteTxn, tx: &Transaction) -> Result<()> {
        match &tx.command {
            Command::AccountAdd { account } => {
                let row = encode(account)?;
                match txn.put(
                    self.accounts,
                    account.pubkey.as_bytes(),
                    &row,
                    PutMode::NoOverwrite,
                ) {
                    Err(StoreError::KeyExists) => {
                        Err(InvalidReason::Duplicate(format!("account {}", account.pubkey)).into())
                    }
                    other => Ok(other?),
                }
            }
            Command::AccountRemove { pubkey } => match txn.del_key(self.accounts, pubkey.as_bytes())
            {
                Err(StoreError::NotFound) => {
                    Err(InvalidReason::Missing(format!("account {pubkey}")).into())
                }
                other => Ok(other?),
            },
            Command::AccountAddSignatory { pubkey, signatories } => {
                let mut account = self.account_or_missing(txn, pubkey)?;
                for key in signatories {
                    if account.signatories.contains(key) {
                        return Err(
                            InvalidReason::Duplicate(format!("signatory {key}")).into()
                        );
                    }
                    account.signatories.push(key.clone());
                }
                txn.put(
                    self.accounts,
                    pubkey.as_bytes(),
                    &encode(&account)?,
                    PutMode::Overwrite,
                )?;
                Ok(())
            }
            Command::AccountRemoveSignatory { pubkey, signatories } => {
                let mut account = self.account_or_missing(txn, pubkey)?;
                for key in signatories {
                    match account.signatories.iter().position(|s| s == key) {
                        Some(at) => {
                            account.signatories.remove(at);
                        }
                        None => {
                            return Err(
                                InvalidReason::Missing(format!("signatory {key}")).into()
                            )
                        }
                    }
                }
                txn.put(
                    self.accounts,
                    pubkey.as_bytes(),
                    &encode(&account)?,
                    PutMode::Overwrite,
                )?;
                Ok(())
            }
            Command::AccountSetUseKeys { pubkeys, use_keys } => {
                for pubkey in pubkeys {
                    let mut account = self.account_or_missing(txn, pubkey)?;
                    account.use_keys = *use_keys;
                    txn.put(
                        self.accounts,
                        pubkey.as_bytes(),
                        &encode(&account)?,
                        PutMode::Overwrite,
                    )?;
                }
                Ok(())
            }
            Command::AssetCreate { asset } => {
                let key = encode(&asset.id)?;
                match txn.put(self.assets, &key, &encode(asset)?, PutMode::NoOverwrite) {
                    Err(StoreError::KeyExists) => Err(InvalidReason::Duplicate(format!(
                        "asset {}/{}/{}",
                        asset.id.ledger, asset.id.domain, asset.id.name
                    ))
                    .into()),
                    other => Ok(other?),
                }
            }
            Command::AssetAdd { pubkey, asset } => self.credit(txn, pubkey, asset),
            Command::AssetRemove { pubkey, asset } => self.debit(txn, pubkey, asset),
            Command::AssetTransfer {
                sender,
                receiver,
                asset,
            } => {
                self.debit(txn, sender, asset)?;
                self.credit(txn, receiver, asset)
            }
            Command::PeerAdd { peer } => {
                match txn.put(
                    self.peers,
                    peer.pubkey.as_bytes(),
                    &encode(peer)?,
                    PutMode::NoOverwrite,
                ) {
                    Err(StoreError::KeyExists) => {
                        Err(InvalidReason::Duplicate(format!("peer {}", peer.pubkey)).into())
                    }
                    other => Ok(other?),
                }
            }
            Command::PeerRemove { pubkey } => match txn.del_key(self.peers, pubkey.as_bytes()) {
                Err(StoreError::NotFound) => {
                    Err(InvalidReason::Missing(format!("peer {pubkey}")).into())
                }
                other => Ok(other?),
            },
            Command::PeerSetActive { pubkey, active } => {
                self.update_peer(txn, pubkey, |peer| peer.active = *active)
            }
            Command::PeerSetTrust { pubkey, trust } => {
                let limit = self.trust_limit;
                self.update_peer(txn, pubkey, |peer| peer.trust = trust.clamp(-limit, limit))
            }
            Command::PeerChangeTrust { pubkey, delta } => {
                let limit = self.trust_limit;
                self.update_peer(txn, pubkey, |peer| {
                    peer.trust = (peer.trust + delta).clamp(-limit, limit)
                })
            }
            Command::PermissionAdd { pubkey, permission } => {
                let (map, row) = self.permission_row(permission)?;
                txn.put(map, pubkey.as_bytes(), &row, PutMode::Overwrite)?;
                Ok(())
            }
            Command::PermissionRemove { pubkey, permission } => {
                let (map, row) = self.permission_row(permission)?;
                match txn.del_dup(map, pubkey.as_bytes(), &row) {
                    Err(StoreError::NotFound) => {
                        Err(InvalidReason::Missing(format!("permission of {pubkey}")).into())
                    }
                    other => Ok(other?),
                }
            }
            Command::ChaincodeAdd { code } | Command::ChaincodeRemove { code } => {
                tracing::debug!(name = %code.name, command = tx.command.name(), "reserved command logged without state effect");
                Ok(())
            }
            Command::ChaincodeExecute { name, .. } => {
                tracing::debug!(name = %name, "reserved command logged without state effect");
                Ok(())
            }
        }
    }

    /// All holdings of one account.
    pub fn account_get_all_assets(&self, view: &dyn TxRead, pubkey: &str) -> Result<Vec<Asset>> {
        match view.get_dups(self.account_assets, pubkey.as_bytes()) {
            Some(rows) => rows.iter().map(|row| decode::<Asset>(row)).collect(),
            None => Ok(Vec::new()),
        }
    }

    /// One specific holding of one account.
    pub fn account_get_asset(
        &self,
        view: &dyn TxRead,
        pubkey: &str,
        id: &AssetId,
    ) -> Result<Option<Asset>> {
        match view.get_dups(self.account_assets, pubkey.as_bytes()) {
            Some(rows) => {
                for row in rows {
                    let asset = decode::<Asset>(row)?;
                    if asset.id == *id {
                        return Ok(Some(asset));
                    }
                }
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// A registered asset schema.
    pub fn asset_get_schema(&self, view: &dyn TxRead, id: &AssetId) -> Result<Option<Asset>> {
        let key = encode(id)?;
        view.get(self.assets, &key).map(|row| decode(row)).transpose()
    }

    /// One account row.
    pub fn get_account(&self, view: &dyn TxRead, pubkey: &str) -> Result<Option<Account>> {
        view.get(self.accounts, pubkey.as_bytes())
            .map(|row| decode(row))
            .transpose()
    }

    /// One peer row.
    pub fn pubkey_get_peer(&self, view: &dyn TxRead, pubkey: &str) -> Result<Option<Peer>> {
        view.get(self.peers, pubkey.as_bytes())
            .map(|row| decode(row))
            .transpose()
    }

    /// Permission rows of one pubkey, per scope.
    pub fn get_permissions(
        &self,
        view: &dyn TxRead,
        pubkey: &str,
    ) -> Result<Vec<Permission>> {
        let mut out = Vec::new();
        for map in [
            self.permissions_ledger,
            self.permissions_domain,
            self.permissions_asset,
        ] {
            if let Some(rows) = view.get_dups(map, pubkey.as_bytes()) {
                for row in rows {
                    out.push(decode::<Permission>(row)?);
                }
            }
        }
        Ok(out)
    }

    fn account_or_missing(&self, txn: &WriteTxn, pubkey: &PubKey) -> Result<Account> {
        match txn.get(self.accounts, pubkey.as_bytes()) {
            Some(row) => decode(row),
            None => Err(InvalidReason::Missing(format!("account {pubkey}")).into()),
        }
    }

    fn update_peer(
        &self,
        txn: &mut WriteTxn,
        pubkey: &PubKey,
        mutate: impl FnOnce(&mut Peer),
    ) -> Result<()> {
        let mut peer: Peer = match txn.get(self.peers, pubkey.as_bytes()) {
            Some(row) => decode(row)?,
            None => return Err(InvalidReason::Missing(format!("peer {pubkey}")).into()),
        };
        mutate(&mut peer);
        txn.put(
            self.peers,
            pubkey.as_bytes(),
            &encode(&peer)?,
            PutMode::Overwrite,
        )?;
        Ok(())
    }

    /// Adds an asset to an account: currency amounts add up under matching
    /// precision, anything else replaces the row.
    fn credit(&self, txn: &mut WriteTxn, pubkey: &PubKey, asset: &Asset) -> Result<()> {
        let existing = self.account_get_asset(&*txn, pubkey, &asset.id)?;
        let row = match (existing, &asset.value) {
            (
                Some(Asset {
                    value:
                        AssetValue::Currency {
                            amount: held,
                            precision: held_precision,
                            description,
                        },
                    ..
                }),
                AssetValue::Currency {
                    amount, precision, ..
                },
            ) => {
                if held_precision != *precision {
                    return Err(InvalidReason::PrecisionMismatch(asset.id.name.clone()).into());
                }
                let total = held
                    .checked_add(*amount)
                    .ok_or_else(|| InvalidReason::Overflow(asset.id.name.clone()))?;
                Asset {
                    id: asset.id.clone(),
                    value: AssetValue::Currency {
                        amount: total,
                        precision: *precision,
                        description,
                    },
                }
            }
            _ => asset.clone(),
        };
        txn.put(
            self.account_assets,
            pubkey.as_bytes(),
            &encode(&row)?,
            PutMode::Overwrite,
        )?;
        Ok(())
    }

    /// Removes an asset from an account: currency amounts subtract, a zero
    /// balance deletes the row, non-currency rows are deleted outright.
    fn debit(&self, txn: &mut WriteTxn, pubkey: &PubKey, asset: &Asset) -> Result<()> {
        let existing = self
            .account_get_asset(&*txn, pubkey, &asset.id)?
            .ok_or_else(|| {
                InvalidReason::Missing(format!("asset {} of {pubkey}", asset.id.name))
            })?;
        match (&existing.value, &asset.value) {
            (
                AssetValue::Currency {
                    amount: held,
                    precision: held_precision,
                    description,
                },
                AssetValue::Currency {
                    amount, precision, ..
                },
            ) => {
                if held_precision != precision {
                    return Err(InvalidReason::PrecisionMismatch(asset.id.name.clone()).into());
                }
                let rest = held.checked_sub(*amount).ok_or_else(|| {
                    InvalidReason::InsufficientFunds(format!(
                        "{} of {pubkey}",
                        asset.id.name
                    ))
                })?;
                if rest == 0 {
                    txn.del_dup(self.account_assets, pubkey.as_bytes(), &encode(&existing)?)?;
                } else {
                    let row = Asset {
                        id: asset.id.clone(),
                        value: AssetValue::Currency {
                            amount: rest,
                            precision: *precision,
                            description: description.clone(),
                        },
                    };
                    txn.put(
                        self.account_assets,
                        pubkey.as_bytes(),
                        &encode(&row)?,
                        PutMode::Overwrite,
                    )?;
                }
                Ok(())
            }
            _ => {
                txn.del_dup(self.account_assets, pubkey.as_bytes(), &encode(&existing)?)?;
                Ok(())
            }
        }
    }

    fn permission_row(&self, permission: &Permission) -> Result<(MapId, Vec<u8>)> {
        let map = match permission {
            Permission::Ledger(_) => self.permissions_ledger,
            Permission::Domain(_) => self.permissions_domain,
            Permission::Asset(_) => self.permissions_asset,
        };
        Ok((map, encode(permission)?))
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| LedgerError::Fatal(format!("row encoding: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(row: &[u8]) -> Result<T> {
    bincode::deserialize(row).map_err(|e| LedgerError::Fatal(format!("corrupt row: {e}")))
}
