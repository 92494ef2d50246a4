//! Deterministic snapshot codec.
//!
//! The snapshot is a self-describing, length-prefixed binary image with
//! sections in fixed order:
//!
//! ```text
//! header   magic "KMAP" | format version u32 | version counter u64
//!          | last applied u64 | logical time u64
//! sections entries (by key) | ttl nodes (by expiry, key)
//!          | transactions (by id) | listeners (by session)
//! trailer  XxHash64 of everything above
//! ```
//!
//! Each section is a u32 record count followed by length-prefixed
//! bincode records. Collections are emitted in their defined sort
//! orders, so two replicas at the same log position produce identical
//! bytes. Any structural mismatch on read — magic, format version,
//! truncation, checksum — is [`KeystoneError::SnapshotCorrupt`] and
//! fatal to the replica.

use crate::core::error::{KeystoneError, KeystoneResult};
use crate::core::time::LogicalTime;
use crate::map::listener::ListenerRecord;
use crate::map::service::MapSnapshot;
use crate::map::store::EntryRecord;
use crate::map::ttl::TtlRecord;
use crate::map::txn::TransactionRecord;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::hash::Hasher;
use std::path::Path;
use twox_hash::XxHash64;

/// Leading magic bytes of a snapshot image.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"KMAP";

/// Current snapshot format version.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Seed for the integrity checksum.
const CHECKSUM_SEED: u64 = 0;

/// Decoded header fields plus section counts, for inspection tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub format_version: u32,
    pub version_counter: u64,
    pub last_applied: u64,
    pub now_ms: u64,
    pub entries: usize,
    pub ttl_nodes: usize,
    pub transactions: usize,
    pub listeners: usize,
}

/// Serialize a snapshot into its deterministic byte image.
pub fn write_snapshot(snapshot: &MapSnapshot) -> KeystoneResult<Vec<u8>> {
    let mut buf = Vec::new();

    buf.extend_from_slice(&SNAPSHOT_MAGIC);
    buf.extend_from_slice(&SNAPSHOT_FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&snapshot.version_counter.to_le_bytes());
    buf.extend_from_slice(&snapshot.last_applied.to_le_bytes());
    buf.extend_from_slice(&snapshot.now.ms.to_le_bytes());

    write_section(&mut buf, &snapshot.entries)?;
    write_section(&mut buf, &snapshot.ttl)?;
    write_section(&mut buf, &snapshot.transactions)?;
    write_section(&mut buf, &snapshot.listeners)?;

    let mut hasher = XxHash64::with_seed(CHECKSUM_SEED);
    hasher.write(&buf);
    buf.extend_from_slice(&hasher.finish().to_le_bytes());

    Ok(buf)
}

/// Parse a snapshot byte image.
pub fn read_snapshot(bytes: &[u8]) -> KeystoneResult<MapSnapshot> {
    // The trailer is validated before any section is parsed.
    if bytes.len() < SNAPSHOT_MAGIC.len() + 4 + 8 * 3 + 8 {
        return Err(KeystoneError::snapshot_corrupt("image truncated"));
    }

    let (body, trailer) = bytes.split_at(bytes.len() - 8);
    let mut hasher = XxHash64::with_seed(CHECKSUM_SEED);
    hasher.write(body);
    let expected = u64::from_le_bytes(
        trailer
            .try_into()
            .map_err(|_| KeystoneError::snapshot_corrupt("bad trailer"))?,
    );
    if hasher.finish() != expected {
        return Err(KeystoneError::snapshot_corrupt("checksum mismatch"));
    }

    let mut reader = SectionReader::new(body);

    let magic = reader.take(SNAPSHOT_MAGIC.len())?;
    if magic != SNAPSHOT_MAGIC {
        return Err(KeystoneError::snapshot_corrupt("bad magic"));
    }
    let format_version = reader.read_u32()?;
    if format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(KeystoneError::snapshot_corrupt(format!(
            "unsupported format version {}",
            format_version
        )));
    }

    let version_counter = reader.read_u64()?;
    let last_applied = reader.read_u64()?;
    let now = LogicalTime::new(reader.read_u64()?);

    let entries: Vec<EntryRecord> = reader.read_section()?;
    let ttl: Vec<TtlRecord> = reader.read_section()?;
    let transactions: Vec<TransactionRecord> = reader.read_section()?;
    let listeners: Vec<ListenerRecord> = reader.read_section()?;

    if !reader.is_exhausted() {
        return Err(KeystoneError::snapshot_corrupt("trailing bytes"));
    }

    Ok(MapSnapshot {
        version_counter,
        last_applied,
        now,
        entries,
        ttl,
        transactions,
        listeners,
    })
}

/// Parse only enough of an image to describe it.
pub fn summarize(bytes: &[u8]) -> KeystoneResult<SnapshotSummary> {
    let snapshot = read_snapshot(bytes)?;
    Ok(SnapshotSummary {
        format_version: SNAPSHOT_FORMAT_VERSION,
        version_counter: snapshot.version_counter,
        last_applied: snapshot.last_applied,
        now_ms: snapshot.now.ms,
        entries: snapshot.entries.len(),
        ttl_nodes: snapshot.ttl.len(),
        transactions: snapshot.transactions.len(),
        listeners: snapshot.listeners.len(),
    })
}

/// Write a snapshot image to a file.
pub fn write_snapshot_file(snapshot: &MapSnapshot, path: impl AsRef<Path>) -> Result<()> {
    let bytes = write_snapshot(snapshot).context("failed to serialize snapshot")?;
    std::fs::write(path.as_ref(), bytes)
        .with_context(|| format!("failed to write snapshot file {:?}", path.as_ref()))
}

/// Read a snapshot image from a file.
pub fn read_snapshot_file(path: impl AsRef<Path>) -> Result<MapSnapshot> {
    let bytes = std::fs::read(path.as_ref())
        .with_context(|| format!("failed to read snapshot file {:?}", path.as_ref()))?;
    read_snapshot(&bytes).context("failed to parse snapshot")
}

fn write_section<T: Serialize>(buf: &mut Vec<u8>, records: &[T]) -> KeystoneResult<()> {
    let count = u32::try_from(records.len())
        .map_err(|_| KeystoneError::Internal("section record count overflow".into()))?;
    buf.extend_from_slice(&count.to_le_bytes());

    for record in records {
        let bytes = bincode::serialize(record)
            .map_err(|e| KeystoneError::Internal(format!("encode snapshot record: {}", e)))?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| KeystoneError::Internal("section record length overflow".into()))?;
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&bytes);
    }
    Ok(())
}

struct SectionReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SectionReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> KeystoneResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| KeystoneError::snapshot_corrupt("image truncated"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> KeystoneResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(
            bytes
                .try_into()
                .map_err(|_| KeystoneError::snapshot_corrupt("image truncated"))?,
        ))
    }

    fn read_u64(&mut self) -> KeystoneResult<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(
            bytes
                .try_into()
                .map_err(|_| KeystoneError::snapshot_corrupt("image truncated"))?,
        ))
    }

    fn read_section<T: DeserializeOwned>(&mut self) -> KeystoneResult<Vec<T>> {
        let count = self.read_u32()? as usize;
        let mut records = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let len = self.read_u32()? as usize;
            let bytes = self.take(len)?;
            let record = bincode::deserialize(bytes)
                .map_err(|e| KeystoneError::snapshot_corrupt(format!("bad record: {}", e)))?;
            records.push(record);
        }
        Ok(records)
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.bytes.len()
    }
}
