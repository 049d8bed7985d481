//! Transactional named-map storage substrate.
//!
//! One environment owns one directory holding an append-only data file and a
//! `LOCK` file. Inside the environment live named maps: ordered key/value
//! collections that may optionally keep several values per key (dup-sorted).
//! Writes go through a single exclusive write transaction; reads go through
//! any number of snapshot transactions that never block the writer.
//!
//! Durability is write-ahead: a commit appends the transaction's records and
//! a commit marker to the data file, fsyncs, and only then publishes the new
//! in-memory state. A crash mid-append leaves a torn tail that replay
//! truncates, so the last durable commit always wins.

pub mod cursor;
pub mod env;
pub mod error;
pub mod map;
pub mod txn;

mod wal;

pub use cursor::Cursor;
pub use env::{Env, EnvOptions, EnvStat};
pub use error::{Result, StoreError};
pub use map::{decode_int_key, int_key, DupCmp, MapFlags, MapId, PutMode};
pub use txn::{ReadTxn, TxRead, WriteTxn};
