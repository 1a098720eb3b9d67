//! Striped key locks serializing compound read-modify-write operations.
//!
//! RocksDB write batches are atomic but reads before them are not, so every
//! compound ledger operation takes the stripe lock for its key before the
//! read and releases it after the batch commits. Separate tables exist per
//! lock domain (allocation, pool, event, quota); an operation may hold at
//! most one lock from each table and must acquire across tables in the
//! fixed order allocation -> pool, event -> pool, which rules out deadlock.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

const STRIPES: usize = 64;

/// A fixed-size table of striped mutexes keyed by hashed byte keys.
pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    /// Create a lock table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Acquire the stripe lock covering `key`.
    ///
    /// Distinct keys may share a stripe; that only coarsens serialization,
    /// never weakens it.
    pub fn lock(&self, key: &[u8]) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let idx = (hasher.finish() as usize) % STRIPES;

        // A poisoned stripe only means another thread panicked while holding
        // it; the guard itself is still a valid mutual-exclusion token.
        match self.stripes[idx].lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    #[test]
    fn same_key_serializes() {
        let locks = Arc::new(KeyLocks::new());
        let counter = Arc::new(AtomicI64::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let _guard = locks.lock(b"shared-key");
                    // Non-atomic read-modify-write; correct only if the
                    // lock actually serializes.
                    let v = counter.load(Ordering::Relaxed);
                    counter.store(v + 1, Ordering::Relaxed);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 8000);
    }

    #[test]
    fn different_keys_do_not_block_forever() {
        let locks = KeyLocks::new();
        let _a = locks.lock(b"key-a");
        // Even if key-b hashes to the same stripe this would deadlock, so
        // pick a key observed to land elsewhere; the property under test is
        // that guards are per-stripe, not global.
        for candidate in [&b"key-b"[..], b"key-c", b"key-d", b"key-e"] {
            let mut hasher_a = DefaultHasher::new();
            b"key-a".hash(&mut hasher_a);
            let mut hasher_c = DefaultHasher::new();
            candidate.hash(&mut hasher_c);
            if hasher_a.finish() % STRIPES as u64 != hasher_c.finish() % STRIPES as u64 {
                let _b = locks.lock(candidate);
                return;
            }
        }
    }
}
