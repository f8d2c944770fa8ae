//! Point-in-time binary snapshot of the keyspace (C5). See spec §4.5, §6.
//!
//! Layout (little-endian): a sequence of
//! `(u32 key_len, key_bytes, u32 val_len, val_bytes, i64 expires_at_unix_nanos_or_sentinel,
//! i64 last_access_unix_nanos, u64 access_count)` tuples, terminated by a
//! `u32 0` key-length marker (so a zero-length key is not representable —
//! an implementation choice spec §6 explicitly leaves open), followed by a
//! 32-byte SHA-256 of everything before it.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::db::{Db, Entry};
use crate::error::RdbError;

const EOF_MARKER: u32 = 0;

pub async fn save(path: &Path, db: &Db) -> Result<(), RdbError> {
    let entries = db.snapshot();
    let body = encode_body(&entries);
    let hash = Sha256::digest(&body);

    let tmp_path = path.with_extension("rdb.tmp");
    {
        let mut tmp = tokio::fs::File::create(&tmp_path).await?;
        tmp.write_all(&body).await?;
        tmp.write_all(&hash).await?;
        tmp.flush().await?;
        tmp.sync_all().await?;
    }

    // Recompute the hash from the bytes actually on disk before replacing
    // the previous snapshot (spec §4.5: the save is reported as failed,
    // and the old file left alone, if this does not match).
    let on_disk = tokio::fs::read(&tmp_path).await?;
    if on_disk.len() < 32 {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(RdbError::Malformed("truncated write".into()));
    }
    let (on_disk_body, on_disk_hash) = on_disk.split_at(on_disk.len() - 32);
    let recomputed = Sha256::digest(on_disk_body);
    if recomputed.as_slice() != on_disk_hash {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(RdbError::CorruptSnapshot);
    }

    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub async fn load(path: &Path, db: &Db) -> Result<(), RdbError> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let mut data = Vec::new();
    file.read_to_end(&mut data).await?;
    if data.len() < 32 {
        return Err(RdbError::Malformed("file shorter than trailer".into()));
    }

    let (body, trailer) = data.split_at(data.len() - 32);
    let computed = Sha256::digest(body);
    if computed.as_slice() != trailer {
        return Err(RdbError::CorruptSnapshot);
    }

    let entries = decode_body(body)?;
    db.load_snapshot(entries);
    Ok(())
}

fn encode_body(entries: &[(Bytes, Entry)]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (key, entry) in entries {
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(entry.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&entry.value);
        let expires = match entry.expires_at {
            Some(t) => to_unix_nanos(t),
            None => i64::MIN,
        };
        buf.extend_from_slice(&expires.to_le_bytes());
        buf.extend_from_slice(&to_unix_nanos(entry.last_access).to_le_bytes());
        buf.extend_from_slice(&entry.access_count.to_le_bytes());
    }
    buf.extend_from_slice(&EOF_MARKER.to_le_bytes());
    buf
}

fn decode_body(body: &[u8]) -> Result<Vec<(Bytes, Entry)>, RdbError> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    loop {
        let key_len = read_u32(body, &mut pos)?;
        if key_len == EOF_MARKER {
            break;
        }
        let key = read_bytes(body, &mut pos, key_len as usize)?;
        let val_len = read_u32(body, &mut pos)?;
        let value = read_bytes(body, &mut pos, val_len as usize)?;
        let expires_raw = read_i64(body, &mut pos)?;
        let last_access_raw = read_i64(body, &mut pos)?;
        let access_count = read_u64(body, &mut pos)?;

        let expires_at = if expires_raw == i64::MIN {
            None
        } else {
            Some(from_unix_nanos(expires_raw))
        };
        entries.push((
            key,
            Entry {
                value,
                expires_at,
                last_access: from_unix_nanos(last_access_raw),
                access_count,
            },
        ));
    }

    Ok(entries)
}

fn to_unix_nanos(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

fn from_unix_nanos(n: i64) -> SystemTime {
    if n <= 0 {
        UNIX_EPOCH
    } else {
        UNIX_EPOCH + Duration::from_nanos(n as u64)
    }
}

fn read_u32(body: &[u8], pos: &mut usize) -> Result<u32, RdbError> {
    let end = *pos + 4;
    let slice = body
        .get(*pos..end)
        .ok_or_else(|| RdbError::Malformed("truncated u32 field".into()))?;
    *pos = end;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn read_i64(body: &[u8], pos: &mut usize) -> Result<i64, RdbError> {
    let end = *pos + 8;
    let slice = body
        .get(*pos..end)
        .ok_or_else(|| RdbError::Malformed("truncated i64 field".into()))?;
    *pos = end;
    Ok(i64::from_le_bytes(slice.try_into().unwrap()))
}

fn read_u64(body: &[u8], pos: &mut usize) -> Result<u64, RdbError> {
    let end = *pos + 8;
    let slice = body
        .get(*pos..end)
        .ok_or_else(|| RdbError::Malformed("truncated u64 field".into()))?;
    *pos = end;
    Ok(u64::from_le_bytes(slice.try_into().unwrap()))
}

fn read_bytes(body: &[u8], pos: &mut usize, len: usize) -> Result<Bytes, RdbError> {
    let end = *pos + len;
    let slice = body
        .get(*pos..end)
        .ok_or_else(|| RdbError::Malformed("truncated byte field".into()))?;
    *pos = end;
    Ok(Bytes::copy_from_slice(slice))
}

/// One configured `save <secs> <changes>` rule (spec §4.5): fires a save
/// once at least `period` has elapsed since the last successful save AND
/// at least `changes` dirty writes have accumulated since then.
pub struct SaveRule {
    pub period: Duration,
    pub changes: u64,
    dirty: AtomicU64,
    last_fired: parking_lot::Mutex<Instant>,
}

impl SaveRule {
    pub fn new(period_secs: u64, changes: u64) -> SaveRule {
        SaveRule {
            period: Duration::from_secs(period_secs),
            changes,
            dirty: AtomicU64::new(0),
            last_fired: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub fn mark_dirty(&self) {
        self.dirty.fetch_add(1, Ordering::Relaxed);
    }

    pub fn due(&self) -> bool {
        self.dirty.load(Ordering::Relaxed) >= self.changes && self.last_fired.lock().elapsed() >= self.period
    }

    pub fn reset(&self) {
        self.dirty.store(0, Ordering::Relaxed);
        *self.last_fired.lock() = Instant::now();
    }
}

/// Coordinates the scheduled snapshot rules and the single-flight
/// invariant for `BGSAVE` (spec §4.5, §5).
pub struct RdbScheduler {
    pub rules: Vec<SaveRule>,
    bgsave_running: AtomicBool,
}

impl RdbScheduler {
    pub fn new(rules: Vec<SaveRule>) -> RdbScheduler {
        RdbScheduler {
            rules,
            bgsave_running: AtomicBool::new(false),
        }
    }

    pub fn mark_dirty(&self) {
        for rule in &self.rules {
            rule.mark_dirty();
        }
    }

    pub fn any_rule_due(&self) -> bool {
        self.rules.iter().any(|r| r.due())
    }

    pub fn reset_all(&self) {
        for rule in &self.rules {
            rule.reset();
        }
    }

    /// Claims the single BGSAVE slot. Returns `false` (spec: `BGSAVE_BUSY`)
    /// if one is already running.
    pub fn try_begin_bgsave(&self) -> bool {
        self.bgsave_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub fn end_bgsave(&self) {
        self.bgsave_running.store(false, Ordering::Release);
    }
}
