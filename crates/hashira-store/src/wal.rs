//! append-only write-ahead log backing an environment
//!
//! Record framing: a 4-byte big-endian length followed by the bincode body.
//! A transaction is a run of records closed by a `Commit` marker; replay
//! applies nothing past the last marker and truncates whatever follows it.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::map::MapFlags;

pub(crate) const MAGIC: [u8; 4] = *b"HSRA";
pub(crate) const FORMAT_VERSION: u32 = 1;
pub(crate) const HEADER_LEN: u64 = 8;

/// One durable operation.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum WalRecord {
    /// Registers a named map. Ids are assigned in record order.
    OpenMap { name: String, flags: MapFlags },
    /// Replaces the full value set stored under a key.
    PutKey {
        map: u32,
        key: Vec<u8>,
        values: Vec<Vec<u8>>,
    },
    /// Removes a key and all its values.
    DelKey { map: u32, key: Vec<u8> },
    /// Empties a map without dropping its registration.
    Clear { map: u32 },
    /// Everything since the previous marker becomes durable.
    Commit,
}

pub(crate) fn write_header(file: &mut File) -> Result<()> {
    file.write_all(&MAGIC)?;
    file.write_all(&FORMAT_VERSION.to_be_bytes())?;
    file.sync_data()?;
    Ok(())
}

pub(crate) fn check_header(file: &mut File) -> Result<()> {
    let mut magic = [0u8; 4];
    let mut version = [0u8; 4];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut magic)?;
    file.read_exact(&mut version)?;
    if magic != MAGIC {
        return Err(StoreError::Corrupt("bad magic".into()));
    }
    let found = u32::from_be_bytes(version);
    if found != FORMAT_VERSION {
        return Err(StoreError::VersionMismatch {
            found,
            expected: FORMAT_VERSION,
        });
    }
    Ok(())
}

/// Appends one framed record to an in-memory commit buffer.
pub(crate) fn push_record(buf: &mut Vec<u8>, record: &WalRecord) -> Result<()> {
    let body = bincode::serialize(record).map_err(|e| StoreError::Codec(e.to_string()))?;
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(())
}

/// Replays the file, feeding each record of every complete transaction to
/// `apply`, and truncates any torn tail. Returns the durable length.
pub(crate) fn replay<F: FnMut(WalRecord)>(file: &mut File, mut apply: F) -> Result<u64> {
    let file_len = file.metadata()?.len();
    let mut good = HEADER_LEN;
    {
        let mut reader = BufReader::new(&mut *file);
        reader.seek(SeekFrom::Start(HEADER_LEN))?;
        let mut pos = HEADER_LEN;
        let mut pending: Vec<WalRecord> = Vec::new();
        loop {
            if pos + 4 > file_len {
                break;
            }
            let mut len_buf = [0u8; 4];
            if reader.read_exact(&mut len_buf).is_err() {
                break;
            }
            let len = u32::from_be_bytes(len_buf) as u64;
            if pos + 4 + len > file_len {
                break;
            }
            let mut body = vec![0u8; len as usize];
            if reader.read_exact(&mut body).is_err() {
                break;
            }
            pos += 4 + len;
            match bincode::deserialize::<WalRecord>(&body) {
                Ok(WalRecord::Commit) => {
                    for record in pending.drain(..) {
                        apply(record);
                    }
                    good = pos;
                }
                Ok(record) => pending.push(record),
                Err(_) => break,
            }
        }
    }
    if good < file_len {
        tracing::warn!(
            dropped = file_len - good,
            "truncating torn tail of data file"
        );
        file.set_len(good)?;
    }
    Ok(good)
}
