//! the ledger engine: one environment, one write transaction, one log,
//! one world-state view
//!
//! Single-writer by construction: every mutating method takes `&mut self`,
//! and the substrate refuses a second live write transaction anyway. Any
//! number of readers may hold clones of the committed queries' results;
//! committed-state queries run on fresh snapshots and never block the
//! writer.
//!
//! Failure discipline: an invalid transaction or transient storage error
//! rolls the write transaction back to the last commit, so `append` either
//! fully happens or leaves no trace. Fatal substrate errors close the
//! engine until it is reopened.

use hashira_store::{Env, EnvOptions, EnvStat, TxRead};

use crate::config::{LedgerConfig, NAMED_MAPS_TOTAL};
use crate::error::{LedgerError, Result};
use crate::hash::{self, Hash32};
use crate::model::{Account, Asset, AssetId, IndexKind, Peer, Permission, Transaction};
use crate::txlog::TxLog;
use crate::wsv::Wsv;

pub struct Engine {
    env: Env,
    txn: Option<hashira_store::WriteTxn>,
    txlog: TxLog,
    wsv: Wsv,
    /// Accumulator size at the last successful commit.
    committed_size: u64,
    closed: bool,
    config: LedgerConfig,
}

impl Engine {
    /// Opens (creating on first use) the ledger under `config.db_path`:
    /// environment, named maps, recovered TxIndex height, rebuilt Merkle
    /// state, and the first write transaction.
    pub fn new(config: LedgerConfig) -> Result<Engine> {
        let opts = EnvOptions::new(&config.db_path)
            .max_size(config.max_db_size)
            .max_maps(NAMED_MAPS_TOTAL);
        let env = Env::open(opts)?;
        let mut txn = env.write_txn()?;
        let txlog = TxLog::open(&mut txn, config.merkle_block_capacity)?;
        let wsv = Wsv::open(&mut txn, config.trust_limit)?;
        let committed_size = txlog.merkle_size();

        tracing::info!(
            path = %config.db_path.display(),
            height = txlog.tx_total(),
            root = %hash::short(&txlog.merkle_root()),
            "ledger engine opened"
        );

        Ok(Engine {
            env,
            txn: Some(txn),
            txlog,
            wsv,
            committed_size,
            closed: false,
            config,
        })
    }

    /// Appends one transaction blob: log, secondary indices, world-state
    /// view and accumulator, all within the live write transaction. Returns
    /// the new Merkle root. On any failure the transaction is rolled back
    /// to the last commit and the error surfaces untouched.
    pub fn append(&mut self, blob: &[u8]) -> Result<Hash32> {
        self.ensure_open()?;
        match self.try_append(blob) {
            Ok(root) => Ok(root),
            Err(e) => Err(self.fail_write(e)),
        }
    }

    /// Appends a batch in order and returns the final root.
    pub fn append_batch<B: AsRef<[u8]>>(&mut self, blobs: &[B]) -> Result<Hash32> {
        for blob in blobs {
            self.append(blob.as_ref())?;
        }
        Ok(self.txlog.merkle_root())
    }

    /// Makes everything appended since the last commit durable: rewrites
    /// the Merkle checkpoint, commits the write transaction and opens the
    /// next one.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.try_commit() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail_write(e)),
        }
    }

    /// Discards everything appended since the last commit. Never fails
    /// short of a fatal substrate error, which closes the engine.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let Err(e) = self.reset_txn() {
            self.close_after_fatal(&e);
            return Err(e);
        }
        tracing::debug!(height = self.txlog.tx_total(), "rolled back to last commit");
        Ok(())
    }

    /// Current Merkle root, committed or not.
    pub fn merkle_root(&self) -> Hash32 {
        self.txlog.merkle_root()
    }

    /// Highest assigned TxIndex, committed or not.
    pub fn tx_total(&self) -> u64 {
        self.txlog.tx_total()
    }

    /// Substrate usage numbers.
    pub fn stat(&self) -> EnvStat {
        self.env.stat()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Transaction blobs of one index category under one pubkey, in
    /// ascending TxIndex order.
    pub fn get_by_key(
        &self,
        kind: IndexKind,
        pubkey: &str,
        uncommitted: bool,
    ) -> Result<Vec<Vec<u8>>> {
        self.run_query(uncommitted, |view| self.txlog.get_by_key(view, kind, pubkey))
    }

    /// Transfers sent by a pubkey.
    pub fn get_asset_transfer_by_sender(
        &self,
        pubkey: &str,
        uncommitted: bool,
    ) -> Result<Vec<Vec<u8>>> {
        self.get_by_key(IndexKind::TransferSender, pubkey, uncommitted)
    }

    /// Transfers received by a pubkey.
    pub fn get_asset_transfer_by_receiver(
        &self,
        pubkey: &str,
        uncommitted: bool,
    ) -> Result<Vec<Vec<u8>>> {
        self.get_by_key(IndexKind::TransferReceiver, pubkey, uncommitted)
    }

    /// TxIndexes recorded for one pubkey in one index category.
    pub fn get_tx_indexes(
        &self,
        kind: IndexKind,
        pubkey: &str,
        uncommitted: bool,
    ) -> Result<Vec<u64>> {
        self.run_query(uncommitted, |view| {
            Ok(self.txlog.indexes_for(view, kind, pubkey))
        })
    }

    /// One stored blob, byte-for-byte as appended.
    pub fn get_blob(&self, index: u64, uncommitted: bool) -> Result<Option<Vec<u8>>> {
        self.run_query(uncommitted, |view| Ok(self.txlog.get(view, index)))
    }

    /// One stored transaction, parsed.
    pub fn get_transaction(&self, index: u64, uncommitted: bool) -> Result<Option<Transaction>> {
        self.run_query(uncommitted, |view| {
            self.txlog
                .get(view, index)
                .map(|blob| Transaction::decode(&blob).map_err(LedgerError::from))
                .transpose()
        })
    }

    pub fn account_get_all_assets(&self, pubkey: &str, uncommitted: bool) -> Result<Vec<Asset>> {
        self.run_query(uncommitted, |view| {
            self.wsv.account_get_all_assets(view, pubkey)
        })
    }

    pub fn account_get_asset(
        &self,
        pubkey: &str,
        id: &AssetId,
        uncommitted: bool,
    ) -> Result<Option<Asset>> {
        self.run_query(uncommitted, |view| {
            self.wsv.account_get_asset(view, pubkey, id)
        })
    }

    pub fn asset_get_schema(&self, id: &AssetId, uncommitted: bool) -> Result<Option<Asset>> {
        self.run_query(uncommitted, |view| self.wsv.asset_get_schema(view, id))
    }

    pub fn get_account(&self, pubkey: &str, uncommitted: bool) -> Result<Option<Account>> {
        self.run_query(uncommitted, |view| self.wsv.get_account(view, pubkey))
    }

    pub fn pubkey_get_peer(&self, pubkey: &str, uncommitted: bool) -> Result<Option<Peer>> {
        self.run_query(uncommitted, |view| self.wsv.pubkey_get_peer(view, pubkey))
    }

    pub fn get_permissions(&self, pubkey: &str, uncommitted: bool) -> Result<Vec<Permission>> {
        self.run_query(uncommitted, |view| self.wsv.get_permissions(view, pubkey))
    }

    /// Aborts the live write transaction and releases the environment.
    pub fn close(mut self) {
        if let Some(txn) = self.txn.take() {
            txn.abort();
        }
    }

    fn try_append(&mut self, blob: &[u8]) -> Result<Hash32> {
        let txn = self.txn.as_mut().ok_or(LedgerError::Closed)?;
        let tx = Transaction::decode(blob)?;
        let root = self.txlog.append(txn, blob, &tx)?;
        self.wsv.apply(txn, &tx)?;
        Ok(root)
    }

    fn try_commit(&mut self) -> Result<()> {
        {
            let txn = self.txn.as_mut().ok_or(LedgerError::Closed)?;
            self.txlog.checkpoint(txn)?;
        }
        let txn = self.txn.take().ok_or(LedgerError::Closed)?;
        txn.commit()?;
        self.committed_size = self.txlog.merkle_size();

        let stat = self.env.stat();
        tracing::debug!(
            height = self.txlog.tx_total(),
            entries = stat.entries,
            file_bytes = stat.file_bytes,
            root = %hash::short(&self.txlog.merkle_root()),
            "committed"
        );

        self.txn = Some(self.env.write_txn()?);
        Ok(())
    }

    /// Invalid and transient failures roll back to the last commit; fatal
    /// ones close the engine. The original error always surfaces.
    fn fail_write(&mut self, err: LedgerError) -> LedgerError {
        if matches!(err, LedgerError::Fatal(_)) {
            self.close_after_fatal(&err);
            return err;
        }
        tracing::warn!(error = %err, "write failed, discarding uncommitted work");
        if let Err(reset) = self.reset_txn() {
            self.close_after_fatal(&reset);
            return reset;
        }
        err
    }

    /// Aborts the live transaction, reopens a fresh one and resynchronizes
    /// the in-memory height and Merkle state with the committed state.
    fn reset_txn(&mut self) -> Result<()> {
        if let Some(txn) = self.txn.take() {
            txn.abort();
        }
        let txn = self.env.write_txn()?;
        self.txlog.recover_tx_total(&txn);
        self.resync_merkle(&txn)?;
        self.txn = Some(txn);
        Ok(())
    }

    fn resync_merkle(&mut self, view: &hashira_store::WriteTxn) -> Result<()> {
        let size = self.txlog.merkle_size();
        if size == self.committed_size {
            return Ok(());
        }
        let reached = if size > self.committed_size {
            self.txlog.drop_to(self.committed_size).ok()
        } else {
            None
        };
        if reached != Some(self.committed_size) {
            // the rings cannot reach the commit point; rebuild from the
            // checkpointed base level instead
            self.txlog.init_merkle_tree(view)?;
        }
        Ok(())
    }

    fn close_after_fatal(&mut self, err: &LedgerError) {
        tracing::error!(error = %err, "fatal failure, closing ledger engine");
        self.txn = None;
        self.closed = true;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(LedgerError::Closed);
        }
        Ok(())
    }

    fn run_query<R>(
        &self,
        uncommitted: bool,
        query: impl FnOnce(&dyn TxRead) -> Result<R>,
    ) -> Result<R> {
        if uncommitted {
            let txn = self.txn.as_ref().ok_or(LedgerError::Closed)?;
            query(txn)
        } else {
            let snapshot = self.env.read_txn();
            query(&snapshot)
        }
    }
}
