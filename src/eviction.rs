//! Sampled victim selection under a configured policy (C3). See spec §4.3.
//!
//! Called by [`crate::db::Db::set`] while the keyspace write lock is
//! already held, so this module operates directly on `&mut State` rather
//! than re-acquiring anything.

use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use crate::db::{approx_mem, MemoryConfig, State};

/// Hard cap on resample rounds per `SET` so a pathological configuration
/// (e.g. a sample that never includes a usable victim) cannot spin
/// forever; exhausting it surfaces `OUT_OF_MEMORY` exactly like an
/// all-non-evictable sample (spec §4.3).
const MAX_ROUNDS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    NoEviction,
    AllKeysRandom,
    AllKeysLru,
    AllKeysLfu,
    VolatileRandom,
    VolatileLru,
    VolatileLfu,
    VolatileTtl,
}

impl EvictionPolicy {
    pub fn parse(s: &str) -> Option<EvictionPolicy> {
        Some(match s {
            "noeviction" => EvictionPolicy::NoEviction,
            "allkeys-random" => EvictionPolicy::AllKeysRandom,
            "allkeys-lru" => EvictionPolicy::AllKeysLru,
            "allkeys-lfu" => EvictionPolicy::AllKeysLfu,
            "volatile-random" => EvictionPolicy::VolatileRandom,
            "volatile-lru" => EvictionPolicy::VolatileLru,
            "volatile-lfu" => EvictionPolicy::VolatileLfu,
            "volatile-ttl" => EvictionPolicy::VolatileTtl,
            _ => return None,
        })
    }

    fn only_volatile(&self) -> bool {
        matches!(
            self,
            EvictionPolicy::VolatileRandom
                | EvictionPolicy::VolatileLru
                | EvictionPolicy::VolatileLfu
                | EvictionPolicy::VolatileTtl
        )
    }
}

/// Attempts to free at least `required_extra` bytes. Returns whether it
/// succeeded; on `false` the caller surfaces `OUT_OF_MEMORY`.
pub fn make_room(
    state: &mut State,
    mem_used: &AtomicUsize,
    mem_config: &MemoryConfig,
    required_extra: usize,
) -> bool {
    if mem_config.policy == EvictionPolicy::NoEviction {
        return false;
    }

    let mut freed = 0usize;
    let mut rng = rand::thread_rng();

    for _ in 0..MAX_ROUNDS {
        if freed >= required_extra {
            return true;
        }

        let candidates: Vec<Bytes> = state
            .entries
            .iter()
            .filter(|(_, e)| !mem_config.policy.only_volatile() || e.expires_at.is_some())
            .map(|(k, _)| k.clone())
            .choose_multiple(&mut rng, mem_config.samples);

        if candidates.is_empty() {
            return freed >= required_extra;
        }

        let mut ordered: Vec<Bytes> = candidates;
        sort_victims(state, mem_config.policy, &mut ordered);

        for key in ordered {
            if freed >= required_extra {
                break;
            }
            if let Some(entry) = state.entries.remove(&key) {
                let size = approx_mem(&key, &entry.value);
                mem_used.fetch_sub(size, Ordering::Relaxed);
                freed += size;
            }
        }
    }

    freed >= required_extra
}

fn sort_victims(state: &State, policy: EvictionPolicy, keys: &mut [Bytes]) {
    // Stable tie-break by key bytes ascending (spec §4.3), applied first so
    // the subsequent policy sort (also stable) preserves it among ties.
    keys.sort();

    match policy {
        EvictionPolicy::NoEviction => {}
        EvictionPolicy::AllKeysRandom | EvictionPolicy::VolatileRandom => {}
        EvictionPolicy::AllKeysLru | EvictionPolicy::VolatileLru => {
            keys.sort_by_key(|k| state.entries.get(k).map(|e| e.last_access).unwrap_or(SystemTime::UNIX_EPOCH));
        }
        EvictionPolicy::AllKeysLfu | EvictionPolicy::VolatileLfu => {
            keys.sort_by_key(|k| state.entries.get(k).map(|e| e.access_count).unwrap_or(0));
        }
        EvictionPolicy::VolatileTtl => {
            keys.sort_by_key(|k| {
                state
                    .entries
                    .get(k)
                    .and_then(|e| e.expires_at)
                    .unwrap_or(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(u32::MAX as u64))
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Db, MemoryConfig};

    #[test]
    fn eviction_liveness_under_tight_cap() {
        let db = Db::new(MemoryConfig {
            max_memory: 2048,
            policy: EvictionPolicy::AllKeysRandom,
            samples: 50,
        });
        for i in 0..500 {
            let key = Bytes::from(format!("key-{i}"));
            let res = db.set(key, Bytes::from_static(b"v"));
            assert!(res.is_ok(), "SET #{i} unexpectedly hit OUT_OF_MEMORY");
        }
        assert!(db.dbsize() < 500);
    }

    #[test]
    fn lru_evicts_oldest_last_access_first() {
        let db = Db::new(MemoryConfig {
            max_memory: 300,
            policy: EvictionPolicy::AllKeysLru,
            samples: 50,
        });
        db.set(Bytes::from_static(b"old"), Bytes::from(vec![b'x'; 32])).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        db.get(b"old");
        for i in 0..20 {
            let key = Bytes::from(format!("fresh-{i}"));
            let _ = db.set(key, Bytes::from(vec![b'x'; 32]));
        }
        // "old" was touched least recently relative to the later inserts
        // once enough fresh keys force eviction; it should eventually be
        // gone rather than a never-accessed fresh key surviving forever.
        assert!(db.dbsize() <= 20);
    }
}
