//! In-memory keyspace (C2): a concurrent map of key -> value with optional
//! per-key expiration and memory accounting. See spec §3, §4.2.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::DbError;
use crate::eviction::{self, EvictionPolicy};
use crate::glob::glob_match;

/// Fixed per-entry bookkeeping overhead folded into `approx_mem`, matching
/// spec §3's requirement that the constant be stable within a process
/// (insert/delete accounting must be symmetric) without mandating any
/// particular value.
const ENTRY_OVERHEAD: usize = 64;

pub fn approx_mem(key: &[u8], value: &[u8]) -> usize {
    ENTRY_OVERHEAD + key.len() + value.len()
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Bytes,
    pub expires_at: Option<SystemTime>,
    pub last_access: SystemTime,
    pub access_count: u64,
}

impl Entry {
    fn new(value: Bytes) -> Entry {
        let now = SystemTime::now();
        Entry {
            value,
            expires_at: None,
            last_access: now,
            access_count: 0,
        }
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}

#[derive(Default)]
pub struct State {
    pub entries: HashMap<Bytes, Entry>,
}

/// Keyspace memory/eviction configuration, fixed for the process lifetime
/// (spec does not define a runtime CONFIG SET path).
pub struct MemoryConfig {
    pub max_memory: usize,
    pub policy: EvictionPolicy,
    pub samples: usize,
}

struct Shared {
    state: RwLock<State>,
    mem_used: AtomicUsize,
    mem_config: MemoryConfig,
}

#[derive(Clone)]
pub struct Db {
    shared: Arc<Shared>,
}

impl Db {
    pub fn new(mem_config: MemoryConfig) -> Db {
        Db {
            shared: Arc::new(Shared {
                state: RwLock::new(State::default()),
                mem_used: AtomicUsize::new(0),
                mem_config,
            }),
        }
    }

    pub fn mem_used(&self) -> usize {
        self.shared.mem_used.load(Ordering::Relaxed)
    }

    /// `get(k) -> (value, found)` (spec §4.2). Takes the write lock so the
    /// access-metadata update and the lazy-expire check happen atomically
    /// together, per spec §5's documented alternative to non-atomic fields
    /// under a shared lock.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let mut state = self.shared.state.write();
        let now = SystemTime::now();
        if let Some(entry) = state.entries.get(key) {
            if entry.is_expired_at(now) {
                self.remove_locked(&mut state, key);
                return None;
            }
        } else {
            return None;
        }
        let entry = state.entries.get_mut(key).unwrap();
        entry.access_count += 1;
        entry.last_access = now;
        Some(entry.value.clone())
    }

    pub fn set(&self, key: Bytes, value: Bytes) -> Result<(), DbError> {
        let mut state = self.shared.state.write();
        let new_mem = approx_mem(&key, &value);
        let old_mem = state.entries.get(&key).map(|e| approx_mem(&key, &e.value));

        let max_memory = self.shared.mem_config.max_memory;
        if max_memory > 0 {
            let projected = self.mem_used() + new_mem - old_mem.unwrap_or(0);
            if projected >= max_memory {
                let shortfall = projected - max_memory + 1;
                let freed = eviction::make_room(
                    &mut state,
                    &self.shared.mem_used,
                    &self.shared.mem_config,
                    shortfall,
                );
                if !freed {
                    return Err(DbError::OutOfMemory);
                }
            }
        }

        if let Some(old) = state.entries.insert(key.clone(), Entry::new(value)) {
            let freed = approx_mem(&key, &old.value);
            self.shared.mem_used.fetch_sub(freed, Ordering::Relaxed);
        }
        self.shared.mem_used.fetch_add(new_mem, Ordering::Relaxed);
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> usize {
        let mut state = self.shared.state.write();
        self.remove_locked(&mut state, key)
    }

    fn remove_locked(&self, state: &mut State, key: &[u8]) -> usize {
        if let Some(entry) = state.entries.remove(key) {
            let freed = approx_mem(key, &entry.value);
            self.shared.mem_used.fetch_sub(freed, Ordering::Relaxed);
            1
        } else {
            0
        }
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        let state = self.shared.state.read();
        match state.entries.get(key) {
            Some(entry) => !entry.is_expired_at(SystemTime::now()),
            None => false,
        }
    }

    /// `set_expire(k, seconds) -> (1 if exists else 0)` (spec §4.2). A
    /// non-positive `seconds` makes the key immediately eligible for lazy
    /// removal, so it is stamped into the past rather than special-cased.
    pub fn set_expire(&self, key: &[u8], seconds: i64) -> usize {
        let mut state = self.shared.state.write();
        if let Some(entry) = state.entries.get_mut(key) {
            let expires_at = if seconds <= 0 {
                SystemTime::UNIX_EPOCH
            } else {
                SystemTime::now() + std::time::Duration::from_secs(seconds as u64)
            };
            entry.expires_at = Some(expires_at);
            1
        } else {
            0
        }
    }

    /// Sets an absolute expiration instant, used by AOF replay/rewrite to
    /// re-derive `EXPIRE` from a persisted absolute time.
    pub fn set_expire_at(&self, key: &[u8], expires_at: SystemTime) -> usize {
        let mut state = self.shared.state.write();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.expires_at = Some(expires_at);
            1
        } else {
            0
        }
    }

    /// `ttl(k)`: `-2` absent, `-1` no expiration, else whole seconds
    /// remaining (spec §4.2).
    pub fn ttl(&self, key: &[u8]) -> i64 {
        let mut state = self.shared.state.write();
        let now = SystemTime::now();
        let Some(entry) = state.entries.get(key) else {
            return -2;
        };
        match entry.expires_at {
            None => -1,
            Some(expires_at) => match expires_at.duration_since(now) {
                Ok(remaining) => remaining.as_secs() as i64,
                Err(_) => {
                    self.remove_locked(&mut state, key);
                    -2
                }
            },
        }
    }

    /// `keys(pattern)`: O(N) scan over raw key bytes (spec §4.2, §5).
    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        let state = self.shared.state.read();
        let now = SystemTime::now();
        state
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired_at(now))
            .filter(|(k, _)| glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn flush(&self) {
        let mut state = self.shared.state.write();
        state.entries.clear();
        self.shared.mem_used.store(0, Ordering::Relaxed);
    }

    pub fn dbsize(&self) -> usize {
        self.shared.state.read().entries.len()
    }

    /// A point-in-time logical copy of the live keyspace for RDB save /
    /// AOF rewrite, taken under the write lock briefly per spec §5.
    pub fn snapshot(&self) -> Vec<(Bytes, Entry)> {
        let state = self.shared.state.write();
        state
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Used only by RDB restore, which replaces the whole keyspace at
    /// once after a verified, successful decode.
    pub fn load_snapshot(&self, entries: Vec<(Bytes, Entry)>) {
        let mut state = self.shared.state.write();
        state.entries.clear();
        let mut total = 0usize;
        for (k, v) in entries {
            total += approx_mem(&k, &v.value);
            state.entries.insert(k, v);
        }
        self.shared.mem_used.store(total, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eviction::EvictionPolicy;

    fn unbounded_db() -> Db {
        Db::new(MemoryConfig {
            max_memory: 0,
            policy: EvictionPolicy::NoEviction,
            samples: 50,
        })
    }

    #[test]
    fn set_then_get() {
        let db = unbounded_db();
        db.set(Bytes::from_static(b"k"), Bytes::from_static(b"v")).unwrap();
        assert_eq!(db.get(b"k"), Some(Bytes::from_static(b"v")));
        assert_eq!(db.get(b"nope"), None);
    }

    #[test]
    fn memory_accounting_symmetric() {
        let db = unbounded_db();
        db.set(Bytes::from_static(b"a"), Bytes::from_static(b"1")).unwrap();
        db.set(Bytes::from_static(b"b"), Bytes::from_static(b"22")).unwrap();
        let expected = approx_mem(b"a", b"1") + approx_mem(b"b", b"22");
        assert_eq!(db.mem_used(), expected);

        db.set(Bytes::from_static(b"a"), Bytes::from_static(b"111")).unwrap();
        let expected = approx_mem(b"a", b"111") + approx_mem(b"b", b"22");
        assert_eq!(db.mem_used(), expected);

        db.delete(b"a");
        assert_eq!(db.mem_used(), approx_mem(b"b", b"22"));

        db.flush();
        assert_eq!(db.mem_used(), 0);
    }

    #[test]
    fn expiration_removes_entry_on_read() {
        let db = unbounded_db();
        db.set(Bytes::from_static(b"k"), Bytes::from_static(b"v")).unwrap();
        db.set_expire(b"k", -1);
        assert_eq!(db.get(b"k"), None);
        assert_eq!(db.dbsize(), 0);
        assert_eq!(db.ttl(b"k"), -2);
    }

    #[test]
    fn ttl_values() {
        let db = unbounded_db();
        assert_eq!(db.ttl(b"absent"), -2);
        db.set(Bytes::from_static(b"p"), Bytes::from_static(b"q")).unwrap();
        assert_eq!(db.ttl(b"p"), -1);
        db.set_expire(b"p", 100);
        let ttl = db.ttl(b"p");
        assert!((99..=100).contains(&ttl), "ttl was {ttl}");
    }

    #[test]
    fn keys_glob_matching() {
        let db = unbounded_db();
        for k in ["foo", "foobar", "bar"] {
            db.set(Bytes::from(k), Bytes::from_static(b"v")).unwrap();
        }
        let mut matched: Vec<String> = db
            .keys(b"foo*")
            .into_iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect();
        matched.sort();
        assert_eq!(matched, vec!["foo".to_string(), "foobar".to_string()]);
    }

    #[test]
    fn del_returns_count_of_existing_keys() {
        let db = unbounded_db();
        for k in ["a", "b", "c"] {
            db.set(Bytes::from(k), Bytes::from_static(b"v")).unwrap();
        }
        let count = ["a", "b", "z"].iter().filter(|k| db.delete(k.as_bytes()) == 1).count();
        assert_eq!(count, 2);
    }

    #[test]
    fn no_eviction_policy_fails_set_over_cap() {
        let db = Db::new(MemoryConfig {
            max_memory: 32,
            policy: EvictionPolicy::NoEviction,
            samples: 50,
        });
        let err = db.set(Bytes::from_static(b"key"), Bytes::from(vec![b'x'; 64]));
        assert!(err.is_err());
    }
}
