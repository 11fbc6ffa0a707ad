//! Local cache (C7) and the `Datastore` collaborator interface (§6.3). The
//! DHT core never persists anything itself; it calls through this trait,
//! which real deployments back with whatever storage engine they like. An
//! in-memory reference implementation is provided for tests and for small
//! deployments that don't need durability.

use crate::identity::{Key, PeerId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A stored block, along with everything needed to answer `get` (§6.3) and
/// to evict it once expired.
#[derive(Debug, Clone)]
pub struct CachedBlock {
    pub block_type: u32,
    pub expiration: Instant,
    pub payload: Vec<u8>,
    pub put_path: Vec<PeerId>,
}

impl CachedBlock {
    /// `true` iff `now` is at or past this block's expiration.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expiration
    }
}

/// Narrow interface to whatever persists blocks (§6.3). Get/put are assumed
/// synchronous and fast; a real backing store wraps slower I/O in a bounded
/// queue on its own side of this trait.
pub trait Datastore: Send {
    /// Store `payload` under `key`/`block_type`, expiring at `expiration`,
    /// remembering the PUT path it arrived by.
    fn put(
        &mut self,
        key: Key,
        block_type: u32,
        expiration: Instant,
        payload: Vec<u8>,
        put_path: Vec<PeerId>,
    );

    /// Invoke `visit` once per unexpired stored block matching `key` and
    /// `block_type`, returning how many were visited.
    fn get(
        &mut self,
        key: &Key,
        block_type: u32,
        visit: &mut dyn FnMut(&Key, u32, Instant, &[u8], &[PeerId]),
    ) -> usize;

    /// A uniformly-random unexpired stored block, if any (used by
    /// maintenance to opportunistically republish content).
    fn get_random(&mut self) -> Option<(Key, Vec<u8>)>;
}

/// In-memory reference `Datastore`, keyed by `(key, block_type)` with
/// multiple blocks per key permitted (distinct put_paths/expirations are
/// kept side by side, matching the multi-entry GET semantics in §6.3).
/// Oldest-expiry-first eviction keeps the store under `capacity` entries.
pub struct InMemoryDatastore {
    blocks: HashMap<(Key, u32), Vec<CachedBlock>>,
    capacity: usize,
    len: usize,
}

impl InMemoryDatastore {
    /// An empty store capped at `capacity` total blocks.
    pub fn new(capacity: usize) -> Self {
        InMemoryDatastore {
            blocks: HashMap::new(),
            capacity: capacity.max(1),
            len: 0,
        }
    }

    /// Drop every expired block, returning how many were removed.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        self.blocks.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|b| !b.is_expired(now));
            removed += before - entries.len();
            !entries.is_empty()
        });
        self.len -= removed;
        removed
    }

    fn evict_one_oldest_expiry(&mut self) {
        let mut victim: Option<((Key, u32), usize, Instant)> = None;
        for (k, entries) in self.blocks.iter() {
            for (i, b) in entries.iter().enumerate() {
                if victim.as_ref().map(|(_, _, exp)| b.expiration < *exp).unwrap_or(true) {
                    victim = Some((*k, i, b.expiration));
                }
            }
        }
        if let Some((key, idx, _)) = victim {
            if let Some(entries) = self.blocks.get_mut(&key) {
                entries.remove(idx);
                if entries.is_empty() {
                    self.blocks.remove(&key);
                }
                self.len -= 1;
            }
        }
    }

    /// Number of blocks currently stored (including possibly-expired ones
    /// not yet swept by [`InMemoryDatastore::evict_expired`]).
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` iff no blocks are stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Datastore for InMemoryDatastore {
    fn put(
        &mut self,
        key: Key,
        block_type: u32,
        expiration: Instant,
        payload: Vec<u8>,
        put_path: Vec<PeerId>,
    ) {
        if self.len >= self.capacity {
            self.evict_one_oldest_expiry();
        }
        self.blocks.entry((key, block_type)).or_default().push(CachedBlock {
            block_type,
            expiration,
            payload,
            put_path,
        });
        self.len += 1;
    }

    fn get(
        &mut self,
        key: &Key,
        block_type: u32,
        visit: &mut dyn FnMut(&Key, u32, Instant, &[u8], &[PeerId]),
    ) -> usize {
        let now = Instant::now();
        let mut count = 0;
        if let Some(entries) = self.blocks.get(&(*key, block_type)) {
            for block in entries {
                if !block.is_expired(now) {
                    visit(key, block.block_type, block.expiration, &block.payload, &block.put_path);
                    count += 1;
                }
            }
        }
        count
    }

    fn get_random(&mut self) -> Option<(Key, Vec<u8>)> {
        let now = Instant::now();
        let candidates: Vec<(Key, Vec<u8>)> = self
            .blocks
            .iter()
            .flat_map(|((key, _), entries)| {
                entries
                    .iter()
                    .filter(|b| !b.is_expired(now))
                    .map(move |b| (*key, b.payload.clone()))
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let idx = rand::random::<usize>() % candidates.len();
        Some(candidates[idx].clone())
    }
}

/// `Duration` until expiration from now, saturating at zero (helper for
/// call sites translating the wire's absolute `expiration_be` field).
pub fn ttl_from_now(expiration: Instant, now: Instant) -> Duration {
    expiration.saturating_duration_since(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ID_BYTES;

    fn key(n: u8) -> Key {
        let mut b = [0u8; ID_BYTES];
        b[0] = n;
        Key::from_bytes(b)
    }

    #[test]
    fn put_then_get_round_trips_payload() {
        let mut store = InMemoryDatastore::new(8);
        let now = Instant::now();
        store.put(key(1), 1, now + Duration::from_secs(60), b"abc".to_vec(), vec![]);
        let mut seen = Vec::new();
        let count = store.get(&key(1), 1, &mut |_, _, _, payload, _| {
            seen.push(payload.to_vec());
        });
        assert_eq!(count, 1);
        assert_eq!(seen, vec![b"abc".to_vec()]);
    }

    #[test]
    fn get_skips_expired_blocks() {
        let mut store = InMemoryDatastore::new(8);
        let now = Instant::now();
        store.put(key(1), 1, now, b"stale".to_vec(), vec![]);
        std::thread::sleep(Duration::from_millis(5));
        let mut seen = 0;
        let count = store.get(&key(1), 1, &mut |_, _, _, _, _| seen += 1);
        assert_eq!(count, 0);
        assert_eq!(seen, 0);
    }

    #[test]
    fn evict_expired_removes_stale_entries_and_updates_len() {
        let mut store = InMemoryDatastore::new(8);
        let now = Instant::now();
        store.put(key(1), 1, now, b"stale".to_vec(), vec![]);
        store.put(key(2), 1, now + Duration::from_secs(60), b"fresh".to_vec(), vec![]);
        std::thread::sleep(Duration::from_millis(5));
        let removed = store.evict_expired(Instant::now());
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn capacity_eviction_drops_oldest_expiry_first() {
        let mut store = InMemoryDatastore::new(2);
        let now = Instant::now();
        store.put(key(1), 1, now + Duration::from_secs(10), b"a".to_vec(), vec![]);
        store.put(key(2), 1, now + Duration::from_secs(20), b"b".to_vec(), vec![]);
        store.put(key(3), 1, now + Duration::from_secs(30), b"c".to_vec(), vec![]);
        assert_eq!(store.len(), 2);
        let mut seen = false;
        store.get(&key(1), 1, &mut |_, _, _, _, _| seen = true);
        assert!(!seen);
    }

    #[test]
    fn get_random_returns_none_when_empty() {
        let mut store = InMemoryDatastore::new(8);
        assert!(store.get_random().is_none());
    }
}
