//! the append-only transaction log
//!
//! Maps owned by the log: `tx_store` (TxIndex -> blob, monotone keys),
//! `merkle_tree` (base-level checkpoint of the accumulator, rewritten on
//! every commit) and one dup-sorted index per command category mapping a
//! pubkey to the TxIndexes it participated in.

use std::cmp::Ordering;
use std::collections::HashMap;

use hashira_merkle::NarrowMerkleTree;
use hashira_store::{decode_int_key, int_key, MapFlags, MapId, PutMode, TxRead, WriteTxn};

use crate::error::{InvalidReason, LedgerError, Result};
use crate::hash::{chain, Hash32};
use crate::model::{Command, IndexKind, Transaction};

type Accumulator = NarrowMerkleTree<Hash32, fn(&Hash32, &Hash32) -> Hash32>;

/// Index entries are 8-byte little-endian TxIndexes; duplicates order
/// numerically, which the raw byte order of little-endian does not.
fn tx_index_cmp(a: &[u8], b: &[u8]) -> Ordering {
    match (decode_tx_index(a), decode_tx_index(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

fn decode_tx_index(raw: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(raw).ok().map(u64::from_le_bytes)
}

pub struct TxLog {
    tx_store: MapId,
    merkle_map: MapId,
    indices: HashMap<IndexKind, MapId>,
    tree: Accumulator,
    capacity: usize,
    tx_total: u64,
}

impl TxLog {
    /// Opens (creating on first use) the log's maps, recovers the highest
    /// TxIndex and rebuilds the accumulator from its checkpoint.
    pub fn open(txn: &mut WriteTxn, capacity: usize) -> Result<TxLog> {
        let tx_store = txn.open_map("tx_store", MapFlags::new().integer_key().create())?;
        let merkle_map = txn.open_map("merkle_tree", MapFlags::new().integer_key().create())?;
        let mut indices = HashMap::new();
        for kind in IndexKind::ALL {
            let map = txn.open_map_with_cmp(
                kind.map_name(),
                MapFlags::new().dup_sort().dup_fixed().create(),
                tx_index_cmp,
            )?;
            indices.insert(kind, map);
        }

        let tx_total = txn
            .cursor(tx_store)
            .last()
            .and_then(|(key, _)| decode_int_key(&key))
            .unwrap_or(0);

        let mut log = TxLog {
            tx_store,
            merkle_map,
            indices,
            tree: Accumulator::new(chain, capacity)?,
            capacity,
            tx_total,
        };
        log.init_merkle_tree(txn)?;
        Ok(log)
    }

    /// Appends a verified blob: stores it under the next TxIndex, indexes
    /// the participants, pushes the embedded hash into the accumulator and
    /// returns the new root.
    pub fn append(&mut self, txn: &mut WriteTxn, blob: &[u8], tx: &Transaction) -> Result<Hash32> {
        if tx.payload_hash() != tx.hash {
            return Err(InvalidReason::BadHash.into());
        }

        let index = self.tx_total + 1;
        txn.put(self.tx_store, &int_key(index), blob, PutMode::Append)?;

        if let Some(kind) = tx.command.index_kind() {
            txn.put(
                self.index(kind),
                tx.creator.as_bytes(),
                &index.to_le_bytes(),
                PutMode::Overwrite,
            )?;
        }
        if let Command::AssetTransfer {
            sender, receiver, ..
        } = &tx.command
        {
            txn.put(
                self.index(IndexKind::TransferSender),
                sender.as_bytes(),
                &index.to_le_bytes(),
                PutMode::Overwrite,
            )?;
            txn.put(
                self.index(IndexKind::TransferReceiver),
                receiver.as_bytes(),
                &index.to_le_bytes(),
                PutMode::Overwrite,
            )?;
        }

        self.tx_total = index;
        self.tree.add(tx.hash);
        Ok(self.tree.root())
    }

    /// Blobs referenced by one index under one pubkey, ascending TxIndex.
    pub fn get_by_key(
        &self,
        view: &dyn TxRead,
        kind: IndexKind,
        pubkey: &str,
    ) -> Result<Vec<Vec<u8>>> {
        let mut blobs = Vec::new();
        if let Some(entries) = view.get_dups(self.index(kind), pubkey.as_bytes()) {
            for raw in entries {
                let index = decode_tx_index(raw)
                    .ok_or_else(|| LedgerError::Fatal("corrupt index entry".into()))?;
                let blob = view.get(self.tx_store, &int_key(index)).ok_or_else(|| {
                    LedgerError::Fatal(format!("index references missing transaction {index}"))
                })?;
                blobs.push(blob.to_vec());
            }
        }
        Ok(blobs)
    }

    /// One stored blob by TxIndex.
    pub fn get(&self, view: &dyn TxRead, index: u64) -> Option<Vec<u8>> {
        view.get(self.tx_store, &int_key(index)).map(|b| b.to_vec())
    }

    /// TxIndexes recorded for one pubkey in one index.
    pub fn indexes_for(&self, view: &dyn TxRead, kind: IndexKind, pubkey: &str) -> Vec<u64> {
        view.get_dups(self.index(kind), pubkey.as_bytes())
            .map(|entries| entries.iter().filter_map(|raw| decode_tx_index(raw)).collect())
            .unwrap_or_default()
    }

    /// Rewrites the checkpoint map from the accumulator's surviving base
    /// level, ascending. Part of the commit sequence.
    pub fn checkpoint(&self, txn: &mut WriteTxn) -> Result<()> {
        let (start, entries) = self.tree.base_level();
        let entries: Vec<&Hash32> = entries.collect();
        if entries.is_empty() && self.tree.size() > 0 {
            // a rollback can land the accumulator exactly on a promotion
            // boundary with an empty base ring; the previous checkpoint
            // still ends at this size and must survive
            return Ok(());
        }
        txn.clear_map(self.merkle_map)?;
        for (offset, hash) in entries.into_iter().enumerate() {
            txn.put(
                self.merkle_map,
                &int_key(start + offset as u64),
                hash,
                PutMode::Append,
            )?;
        }
        Ok(())
    }

    /// Rebuilds the accumulator from the checkpoint map, ascending.
    pub fn init_merkle_tree(&mut self, view: &dyn TxRead) -> Result<()> {
        self.tree = Accumulator::new(chain, self.capacity)?;
        let mut cursor = view.cursor(self.merkle_map);
        while let Some((key, value)) = cursor.next() {
            let index = decode_int_key(&key)
                .ok_or_else(|| LedgerError::Fatal("corrupt merkle checkpoint key".into()))?;
            let hash: Hash32 = value.as_slice().try_into().map_err(|_| {
                LedgerError::Fatal(format!(
                    "merkle checkpoint entry {index} is {} bytes, expected 32",
                    value.len()
                ))
            })?;
            self.tree.restore_leaf(index, hash)?;
        }
        Ok(())
    }

    /// Current accumulator root, committed or not.
    pub fn merkle_root(&self) -> Hash32 {
        self.tree.root()
    }

    /// Leaves accumulated so far.
    pub fn merkle_size(&self) -> u64 {
        self.tree.size()
    }

    /// Truncates the accumulator; the caller falls back to
    /// [`TxLog::init_merkle_tree`] when the rings cannot reach `n`.
    pub fn drop_to(&mut self, n: u64) -> hashira_merkle::Result<u64> {
        self.tree.drop(n)
    }

    /// Highest assigned TxIndex.
    pub fn tx_total(&self) -> u64 {
        self.tx_total
    }

    /// Re-reads the highest TxIndex after a rollback discarded uncommitted
    /// appends.
    pub fn recover_tx_total(&mut self, view: &dyn TxRead) {
        self.tx_total = view
            .cursor(self.tx_store)
            .last()
            .and_then(|(key, _)| decode_int_key(&key))
            .unwrap_or(0);
    }

    fn index(&self, kind: IndexKind) -> MapId {
        self.indices[&kind]
    }
}
