//! write and read transactions
//!
//! The write transaction buffers a copy-on-write overlay of touched keys
//! only; commit turns the overlay into WAL records, makes them durable and
//! publishes the successor snapshot. Read transactions hold an `Arc` of the
//! committed snapshot taken at begin time and never observe later writes.

use std::collections::{BTreeMap, HashMap};
use std::io::{Seek, SeekFrom, Write};
use std::ops::Bound;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;

use crate::cursor::{Cursor, ReadView};
use crate::env::{Env, MapData, Snapshot};
use crate::error::{Result, StoreError};
use crate::map::{bytes_cmp, DupCmp, MapFlags, MapId, PutMode};
use crate::wal::{self, WalRecord};

/// Upper bound on one transaction's buffered write volume.
pub(crate) const MAX_TXN_BYTES: u64 = 1 << 30;

/// Accounting overhead charged per staged operation.
const FRAME_OVERHEAD: usize = 32;

#[derive(Clone, Debug)]
pub(crate) enum KeyOp {
    /// Full replacement value set for the key.
    Put(Vec<Vec<u8>>),
    /// Key removed.
    Del,
}

#[derive(Default)]
pub(crate) struct MapOverlay {
    pub(crate) cleared: bool,
    pub(crate) keys: BTreeMap<Vec<u8>, KeyOp>,
}

/// The environment's single live write transaction.
pub struct WriteTxn {
    env: Env,
    base: Arc<Snapshot>,
    overlay: HashMap<u32, MapOverlay>,
    created: Vec<(String, MapFlags)>,
    bytes: u64,
}

impl WriteTxn {
    pub(crate) fn begin(env: Env) -> Result<WriteTxn> {
        if env.inner.failed.load(AtomicOrdering::Acquire) {
            return Err(StoreError::Corrupt(
                "environment in failed state; reopen required".into(),
            ));
        }
        if env
            .inner
            .writer
            .compare_exchange(
                false,
                true,
                AtomicOrdering::Acquire,
                AtomicOrdering::Acquire,
            )
            .is_err()
        {
            return Err(StoreError::WriterActive);
        }
        let base = env.snapshot();
        Ok(WriteTxn {
            env,
            base,
            overlay: HashMap::new(),
            created: Vec::new(),
            bytes: 0,
        })
    }

    /// Opens a named map, creating it when `flags.create` is set.
    pub fn open_map(&mut self, name: &str, flags: MapFlags) -> Result<MapId> {
        self.open_map_inner(name, flags, None)
    }

    /// Opens a dup-sorted map with an explicit duplicate-value comparator.
    /// The same comparator must be supplied on every open.
    pub fn open_map_with_cmp(&mut self, name: &str, flags: MapFlags, cmp: DupCmp) -> Result<MapId> {
        if !flags.dup_sort {
            return Err(StoreError::Incompatible(
                "duplicate comparator on a map without dup_sort".into(),
            ));
        }
        self.open_map_inner(name, flags, Some(cmp))
    }

    fn open_map_inner(&mut self, name: &str, flags: MapFlags, cmp: Option<DupCmp>) -> Result<MapId> {
        let id = if let Some(&id) = self.base.registry.get(name) {
            if !self.base.flags[id as usize].compatible(flags) {
                return Err(StoreError::Incompatible(name.into()));
            }
            MapId(id)
        } else if let Some(pos) = self.created.iter().position(|(n, _)| n == name) {
            if !self.created[pos].1.compatible(flags) {
                return Err(StoreError::Incompatible(name.into()));
            }
            MapId((self.base.maps.len() + pos) as u32)
        } else if flags.create {
            let total = self.base.maps.len() + self.created.len();
            if total as u32 >= self.env.inner.opts.max_maps {
                return Err(StoreError::DbsFull);
            }
            let id = MapId(total as u32);
            self.created.push((name.to_string(), flags.stored()));
            // a freshly created map hides the (nonexistent) base entirely
            self.overlay.insert(
                id.0,
                MapOverlay {
                    cleared: true,
                    keys: BTreeMap::new(),
                },
            );
            id
        } else {
            return Err(StoreError::NotFound);
        };
        if let Some(cmp) = cmp {
            self.env
                .inner
                .cmps
                .lock()
                .expect("poisoned comparator lock")
                .insert(id.0, cmp);
        }
        Ok(id)
    }

    /// Single value under a key: the only value, or the first duplicate.
    pub fn get(&self, map: MapId, key: &[u8]) -> Option<&[u8]> {
        self.lookup(map.0, key)
            .and_then(|set| set.first())
            .map(|v| v.as_slice())
    }

    /// All values under a key, in comparator order.
    pub fn get_dups(&self, map: MapId, key: &[u8]) -> Option<&[Vec<u8>]> {
        self.lookup(map.0, key)
    }

    pub fn put(&mut self, map: MapId, key: &[u8], value: &[u8], mode: PutMode) -> Result<()> {
        let flags = self.flags_of(map)?;
        if flags.integer_key && key.len() != 8 {
            return Err(StoreError::BadKey(
                "integer-key map requires 8-byte keys".into(),
            ));
        }
        if self.env.inner.file_bytes.load(AtomicOrdering::Relaxed) + self.bytes
            > self.env.inner.opts.max_size
        {
            return Err(StoreError::MapFull);
        }

        if flags.dup_sort {
            if mode == PutMode::Append {
                return Err(StoreError::Incompatible(
                    "append mode on a dup-sorted map".into(),
                ));
            }
            let cmp = self.dup_cmp(map);
            let mut set = self
                .lookup(map.0, key)
                .map(|s| s.to_vec())
                .unwrap_or_default();
            if flags.dup_fixed {
                if let Some(first) = set.first() {
                    if first.len() != value.len() {
                        return Err(StoreError::BadKey(
                            "dup-fixed map requires equal-length values".into(),
                        ));
                    }
                }
            }
            match set.binary_search_by(|existing| cmp(existing, value)) {
                Ok(i) => {
                    if mode == PutMode::NoOverwrite {
                        return Err(StoreError::KeyExists);
                    }
                    set[i] = value.to_vec();
                }
                Err(i) => set.insert(i, value.to_vec()),
            }
            self.stage(map.0, key.to_vec(), KeyOp::Put(set), key.len() + value.len())
        } else {
            let exists = self.lookup(map.0, key).is_some();
            match mode {
                PutMode::NoOverwrite if exists => return Err(StoreError::KeyExists),
                PutMode::Append => {
                    if let Some((last, _)) = self.last_key(map.0) {
                        if key <= last {
                            return Err(StoreError::KeyExists);
                        }
                    }
                }
                _ => {}
            }
            self.stage(
                map.0,
                key.to_vec(),
                KeyOp::Put(vec![value.to_vec()]),
                key.len() + value.len(),
            )
        }
    }

    /// Removes a key and all its values. `NotFound` if absent.
    pub fn del_key(&mut self, map: MapId, key: &[u8]) -> Result<()> {
        if self.lookup(map.0, key).is_none() {
            return Err(StoreError::NotFound);
        }
        self.stage(map.0, key.to_vec(), KeyOp::Del, key.len())
    }

    /// Removes one duplicate value. `NotFound` if the key or value is absent.
    pub fn del_dup(&mut self, map: MapId, key: &[u8], value: &[u8]) -> Result<()> {
        let flags = self.flags_of(map)?;
        if !flags.dup_sort {
            return Err(StoreError::Incompatible(
                "del_dup on a map without dup_sort".into(),
            ));
        }
        let cmp = self.dup_cmp(map);
        let mut set = self
            .lookup(map.0, key)
            .map(|s| s.to_vec())
            .ok_or(StoreError::NotFound)?;
        match set.binary_search_by(|existing| cmp(existing, value)) {
            Ok(i) => {
                set.remove(i);
            }
            Err(_) => return Err(StoreError::NotFound),
        }
        let op = if set.is_empty() {
            KeyOp::Del
        } else {
            KeyOp::Put(set)
        };
        self.stage(map.0, key.to_vec(), op, key.len() + value.len())
    }

    /// Empties a map without dropping its registration.
    pub fn clear_map(&mut self, map: MapId) -> Result<()> {
        self.flags_of(map)?;
        let overlay = self.overlay.entry(map.0).or_default();
        overlay.cleared = true;
        overlay.keys.clear();
        Ok(())
    }

    /// Iteration handle over the merged (committed + uncommitted) view.
    pub fn cursor(&self, map: MapId) -> Cursor<'_> {
        Cursor::new(self, map.0)
    }

    /// Makes the transaction's writes durable and visible to new readers.
    /// A refused commit (size limit, io failure) aborts the transaction.
    pub fn commit(mut self) -> Result<()> {
        let mut records = Vec::new();
        for (name, flags) in self.created.drain(..) {
            records.push(WalRecord::OpenMap { name, flags });
        }
        let base_maps = self.base.maps.len() as u32;
        let mut ids: Vec<u32> = self.overlay.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(overlay) = self.overlay.remove(&id) {
                if overlay.cleared && id < base_maps {
                    records.push(WalRecord::Clear { map: id });
                }
                for (key, op) in overlay.keys {
                    records.push(match op {
                        KeyOp::Put(values) => WalRecord::PutKey {
                            map: id,
                            key,
                            values,
                        },
                        KeyOp::Del => WalRecord::DelKey { map: id, key },
                    });
                }
            }
        }
        if records.is_empty() {
            return Ok(());
        }
        records.push(WalRecord::Commit);

        let mut buf = Vec::new();
        for record in &records {
            wal::push_record(&mut buf, record)?;
        }

        if self.env.inner.file_bytes.load(AtomicOrdering::Relaxed) + buf.len() as u64
            > self.env.inner.opts.max_size
        {
            return Err(StoreError::MapFull);
        }

        {
            let mut file = self.env.inner.file.lock().expect("poisoned file lock");
            let written: Result<()> = (|| {
                file.seek(SeekFrom::End(0))?;
                file.write_all(&buf)?;
                file.sync_data()?;
                Ok(())
            })();
            if let Err(e) = written {
                // a torn append cannot be distinguished from the next one's
                // frames, so the environment must be reopened and replayed
                self.env.inner.failed.store(true, AtomicOrdering::Release);
                return Err(e);
            }
        }
        self.env
            .inner
            .file_bytes
            .fetch_add(buf.len() as u64, AtomicOrdering::Relaxed);

        let mut committed = self
            .env
            .inner
            .committed
            .lock()
            .expect("poisoned committed-state lock");
        let old = std::mem::replace(&mut *committed, Arc::new(Snapshot::default()));
        let mut snapshot = match Arc::try_unwrap(old) {
            // no live readers: mutate in place
            Ok(snapshot) => snapshot,
            // readers hold the old snapshot: copy-on-write per touched map
            Err(shared) => (*shared).clone(),
        };
        for record in records {
            snapshot.apply(record);
        }
        *committed = Arc::new(snapshot);
        Ok(())
    }

    /// Discards the transaction's writes.
    pub fn abort(self) {}

    fn stage(&mut self, map: u32, key: Vec<u8>, op: KeyOp, delta: usize) -> Result<()> {
        self.bytes += (delta + FRAME_OVERHEAD) as u64;
        if self.bytes > MAX_TXN_BYTES {
            return Err(StoreError::TxnFull);
        }
        self.overlay.entry(map).or_default().keys.insert(key, op);
        Ok(())
    }

    fn flags_of(&self, map: MapId) -> Result<MapFlags> {
        let id = map.index();
        if id < self.base.flags.len() {
            return Ok(self.base.flags[id]);
        }
        self.created
            .get(id - self.base.flags.len())
            .map(|(_, flags)| *flags)
            .ok_or(StoreError::NotFound)
    }

    fn dup_cmp(&self, map: MapId) -> DupCmp {
        self.env
            .inner
            .cmps
            .lock()
            .expect("poisoned comparator lock")
            .get(&map.0)
            .copied()
            .unwrap_or(bytes_cmp as DupCmp)
    }

    fn base_map(&self, map: u32) -> Option<&MapData> {
        self.base.maps.get(map as usize).map(|m| m.as_ref())
    }
}

impl Drop for WriteTxn {
    fn drop(&mut self) {
        self.env.inner.writer.store(false, AtomicOrdering::Release);
    }
}

impl ReadView for WriteTxn {
    fn lookup(&self, map: u32, key: &[u8]) -> Option<&[Vec<u8>]> {
        if let Some(overlay) = self.overlay.get(&map) {
            if let Some(op) = overlay.keys.get(key) {
                return match op {
                    KeyOp::Put(values) => Some(values.as_slice()),
                    KeyOp::Del => None,
                };
            }
            if overlay.cleared {
                return None;
            }
        }
        self.base_map(map)
            .and_then(|m| m.get(key))
            .map(|v| v.as_slice())
    }

    fn next_key(&self, map: u32, from: Bound<&[u8]>) -> Option<(&[u8], &[Vec<u8>])> {
        let overlay = self.overlay.get(&map);
        let hide_base = overlay.map_or(false, |o| o.cleared);
        let over = overlay.and_then(|o| {
            o.keys
                .range::<[u8], _>((from, Bound::Unbounded))
                .find_map(|(k, op)| match op {
                    KeyOp::Put(values) => Some((k.as_slice(), values.as_slice())),
                    KeyOp::Del => None,
                })
        });
        let base = if hide_base {
            None
        } else {
            self.base_map(map).and_then(|m| {
                m.range::<[u8], _>((from, Bound::Unbounded))
                    .find(|(k, _)| {
                        overlay.map_or(true, |o| !o.keys.contains_key(k.as_slice()))
                    })
                    .map(|(k, v)| (k.as_slice(), v.as_slice()))
            })
        };
        match (over, base) {
            (Some(o), Some(b)) => {
                if o.0 <= b.0 {
                    Some(o)
                } else {
                    Some(b)
                }
            }
            (Some(o), None) => Some(o),
            (None, b) => b,
        }
    }

    fn last_key(&self, map: u32) -> Option<(&[u8], &[Vec<u8>])> {
        let overlay = self.overlay.get(&map);
        let hide_base = overlay.map_or(false, |o| o.cleared);
        let over = overlay.and_then(|o| {
            o.keys.iter().rev().find_map(|(k, op)| match op {
                KeyOp::Put(values) => Some((k.as_slice(), values.as_slice())),
                KeyOp::Del => None,
            })
        });
        let base = if hide_base {
            None
        } else {
            self.base_map(map).and_then(|m| {
                m.iter()
                    .rev()
                    .find(|(k, _)| {
                        overlay.map_or(true, |o| !o.keys.contains_key(k.as_slice()))
                    })
                    .map(|(k, v)| (k.as_slice(), v.as_slice()))
            })
        };
        match (over, base) {
            (Some(o), Some(b)) => {
                if o.0 >= b.0 {
                    Some(o)
                } else {
                    Some(b)
                }
            }
            (Some(o), None) => Some(o),
            (None, b) => b,
        }
    }
}

/// Read surface shared by write and read transactions, so a query can run
/// against either the live write transaction (uncommitted view) or a fresh
/// snapshot (committed view).
pub trait TxRead {
    fn get(&self, map: MapId, key: &[u8]) -> Option<&[u8]>;
    fn get_dups(&self, map: MapId, key: &[u8]) -> Option<&[Vec<u8>]>;
    fn cursor(&self, map: MapId) -> Cursor<'_>;
}

impl TxRead for WriteTxn {
    fn get(&self, map: MapId, key: &[u8]) -> Option<&[u8]> {
        WriteTxn::get(self, map, key)
    }

    fn get_dups(&self, map: MapId, key: &[u8]) -> Option<&[Vec<u8>]> {
        WriteTxn::get_dups(self, map, key)
    }

    fn cursor(&self, map: MapId) -> Cursor<'_> {
        WriteTxn::cursor(self, map)
    }
}

impl TxRead for ReadTxn {
    fn get(&self, map: MapId, key: &[u8]) -> Option<&[u8]> {
        ReadTxn::get(self, map, key)
    }

    fn get_dups(&self, map: MapId, key: &[u8]) -> Option<&[Vec<u8>]> {
        ReadTxn::get_dups(self, map, key)
    }

    fn cursor(&self, map: MapId) -> Cursor<'_> {
        ReadTxn::cursor(self, map)
    }
}

/// A read-only snapshot of the committed state at begin time.
pub struct ReadTxn {
    snapshot: Arc<Snapshot>,
}

impl ReadTxn {
    pub(crate) fn new(snapshot: Arc<Snapshot>) -> ReadTxn {
        ReadTxn { snapshot }
    }

    /// Opens an existing named map; `NotFound` if it does not exist.
    pub fn open_map(&self, name: &str, flags: MapFlags) -> Result<MapId> {
        match self.snapshot.registry.get(name) {
            Some(&id) => {
                if !self.snapshot.flags[id as usize].compatible(flags) {
                    return Err(StoreError::Incompatible(name.into()));
                }
                Ok(MapId(id))
            }
            None => Err(StoreError::NotFound),
        }
    }

    pub fn get(&self, map: MapId, key: &[u8]) -> Option<&[u8]> {
        self.lookup(map.0, key)
            .and_then(|set| set.first())
            .map(|v| v.as_slice())
    }

    pub fn get_dups(&self, map: MapId, key: &[u8]) -> Option<&[Vec<u8>]> {
        self.lookup(map.0, key)
    }

    pub fn cursor(&self, map: MapId) -> Cursor<'_> {
        Cursor::new(self, map.0)
    }
}

impl ReadView for ReadTxn {
    fn lookup(&self, map: u32, key: &[u8]) -> Option<&[Vec<u8>]> {
        self.snapshot
            .maps
            .get(map as usize)
            .and_then(|m| m.get(key))
            .map(|v| v.as_slice())
    }

    fn next_key(&self, map: u32, from: Bound<&[u8]>) -> Option<(&[u8], &[Vec<u8>])> {
        self.snapshot.maps.get(map as usize).and_then(|m| {
            m.range::<[u8], _>((from, Bound::Unbounded))
                .next()
                .map(|(k, v)| (k.as_slice(), v.as_slice()))
        })
    }

    fn last_key(&self, map: u32) -> Option<(&[u8], &[Vec<u8>])> {
        self.snapshot.maps.get(map as usize).and_then(|m| {
            m.iter()
                .next_back()
                .map(|(k, v)| (k.as_slice(), v.as_slice()))
        })
    }
}
