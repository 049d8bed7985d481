//! file-backed environment: named maps, snapshots, durability

use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use fs4::FileExt;

use crate::error::{Result, StoreError};
use crate::map::{DupCmp, MapFlags};
use crate::txn::{ReadTxn, WriteTxn};
use crate::wal::{self, WalRecord};

pub(crate) const DATA_FILE: &str = "hashira.db";
pub(crate) const LOCK_FILE: &str = "LOCK";

/// Tuning knobs fixed at open time.
#[derive(Clone, Debug)]
pub struct EnvOptions {
    pub path: PathBuf,
    /// Upper bound on the data file, in bytes.
    pub max_size: u64,
    /// Upper bound on named map registrations.
    pub max_maps: u32,
}

impl EnvOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_size: 1 << 40,
            max_maps: 32,
        }
    }

    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    pub fn max_maps(mut self, n: u32) -> Self {
        self.max_maps = n;
        self
    }
}

/// Ordered contents of one map: key -> duplicate set in comparator order.
/// Non-dup maps keep single-element sets.
pub(crate) type MapData = BTreeMap<Vec<u8>, Vec<Vec<u8>>>;

/// Immutable committed state. Read transactions hold an `Arc` of this;
/// commits publish a successor, copy-on-write per touched map.
#[derive(Clone, Default)]
pub(crate) struct Snapshot {
    pub(crate) maps: Vec<Arc<MapData>>,
    pub(crate) registry: BTreeMap<String, u32>,
    pub(crate) flags: Vec<MapFlags>,
}

impl Snapshot {
    pub(crate) fn apply(&mut self, record: WalRecord) {
        match record {
            WalRecord::OpenMap { name, flags } => {
                let id = self.maps.len() as u32;
                self.registry.insert(name, id);
                self.maps.push(Arc::new(MapData::new()));
                self.flags.push(flags);
            }
            WalRecord::PutKey { map, key, values } => {
                if let Some(data) = self.maps.get_mut(map as usize) {
                    Arc::make_mut(data).insert(key, values);
                }
            }
            WalRecord::DelKey { map, key } => {
                if let Some(data) = self.maps.get_mut(map as usize) {
                    Arc::make_mut(data).remove(&key);
                }
            }
            WalRecord::Clear { map } => {
                if let Some(data) = self.maps.get_mut(map as usize) {
                    Arc::make_mut(data).clear();
                }
            }
            WalRecord::Commit => {}
        }
    }
}

/// Point-in-time usage numbers for an environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvStat {
    /// Registered named maps.
    pub maps: u32,
    /// Live entries across all maps; duplicates count individually.
    pub entries: u64,
    /// Live key and value bytes.
    pub data_bytes: u64,
    /// On-disk data file size, live and garbage.
    pub file_bytes: u64,
}

pub(crate) struct EnvInner {
    pub(crate) opts: EnvOptions,
    pub(crate) file: Mutex<std::fs::File>,
    pub(crate) file_bytes: AtomicU64,
    pub(crate) committed: Mutex<Arc<Snapshot>>,
    pub(crate) cmps: Mutex<HashMap<u32, DupCmp>>,
    pub(crate) writer: AtomicBool,
    /// Set after a failed WAL append; the file tail is untrustworthy and
    /// the environment must be reopened.
    pub(crate) failed: AtomicBool,
    _lock: std::fs::File,
}

/// Handle to an open environment. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Env {
    pub(crate) inner: Arc<EnvInner>,
}

impl Env {
    /// Opens or creates the environment directory, takes the exclusive
    /// process lock and replays the data file into memory.
    pub fn open(opts: EnvOptions) -> Result<Env> {
        std::fs::create_dir_all(&opts.path)?;

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(opts.path.join(LOCK_FILE))?;
        lock.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(opts.path.clone()))?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(opts.path.join(DATA_FILE))?;
        if file.metadata()?.len() == 0 {
            wal::write_header(&mut file)?;
        } else {
            wal::check_header(&mut file)?;
        }

        let mut snapshot = Snapshot::default();
        let durable = wal::replay(&mut file, |record| snapshot.apply(record))?;
        file.seek(SeekFrom::End(0))?;

        tracing::debug!(
            path = %opts.path.display(),
            maps = snapshot.registry.len(),
            bytes = durable,
            "environment opened"
        );

        Ok(Env {
            inner: Arc::new(EnvInner {
                opts,
                file: Mutex::new(file),
                file_bytes: AtomicU64::new(durable),
                committed: Mutex::new(Arc::new(snapshot)),
                cmps: Mutex::new(HashMap::new()),
                writer: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                _lock: lock,
            }),
        })
    }

    /// Begins the exclusive write transaction. Fails with `WriterActive`
    /// while another one is live.
    pub fn write_txn(&self) -> Result<WriteTxn> {
        WriteTxn::begin(self.clone())
    }

    /// Begins a read-only snapshot transaction of the committed state.
    pub fn read_txn(&self) -> ReadTxn {
        ReadTxn::new(self.snapshot())
    }

    /// Point-in-time usage numbers.
    pub fn stat(&self) -> EnvStat {
        let snapshot = self.snapshot();
        let mut stat = EnvStat {
            maps: snapshot.maps.len() as u32,
            file_bytes: self.inner.file_bytes.load(Ordering::Relaxed),
            ..EnvStat::default()
        };
        for data in &snapshot.maps {
            for (key, values) in data.iter() {
                stat.entries += values.len() as u64;
                stat.data_bytes += key.len() as u64;
                stat.data_bytes += values.iter().map(|v| v.len() as u64).sum::<u64>();
            }
        }
        stat
    }

    pub fn path(&self) -> &Path {
        &self.inner.opts.path
    }

    pub(crate) fn snapshot(&self) -> Arc<Snapshot> {
        self.inner
            .committed
            .lock()
            .expect("poisoned committed-state lock")
            .clone()
    }
}
