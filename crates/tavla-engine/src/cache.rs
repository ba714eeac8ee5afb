//! Two-way evaluation cache keyed on position and evaluation context.
//!
//! Each bucket holds a primary and a secondary slot; a hit in the secondary
//! slot promotes it, so the hotter of the two entries survives the next
//! insertion. Hashing is the 32-bit MurmurHash3 mix over the context word
//! and the seven key words (the length mix is skipped since the length is
//! fixed).

use tavla_core::{PositionKey, NUM_OUTPUTS};

/// Default cache size, as a power of two.
pub const CACHE_SIZE_DEFAULT: u32 = 19;

/// Cached values per entry: the five outputs plus the cubeful equity.
pub const CACHE_OUTPUTS: usize = NUM_OUTPUTS + 1;

/// A cache key: the position itself plus a word encoding everything else
/// that influences the result (plies, cube state, score).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheKey {
    pub position: PositionKey,
    pub context: u32,
}

#[derive(Clone, Copy)]
struct CacheSlot {
    key: [u32; 7],
    context: u32,
    values: [f32; CACHE_OUTPUTS],
}

impl CacheSlot {
    // a key word of all ones never occurs in a legal position encoding
    const EMPTY: Self = Self {
        key: [u32::MAX; 7],
        context: 0,
        values: [0.0; CACHE_OUTPUTS],
    };

    fn matches(&self, key: &CacheKey) -> bool {
        self.key == key.position.0 && self.context == key.context
    }
}

struct CacheNode {
    primary: CacheSlot,
    secondary: CacheSlot,
}

/// The evaluation cache. Not synchronized: every evaluation context owns
/// its own instance.
pub struct EvalCache {
    entries: Vec<CacheNode>,
    hash_mask: u32,
    lookups: u64,
    hits: u64,
}

impl EvalCache {
    /// Creates a cache of roughly `size` slots, rounded up to a power of
    /// two. Two slots share a bucket, so `size / 2` buckets are allocated.
    pub fn new(size: u32) -> Self {
        let size = size.max(2).next_power_of_two();
        let buckets = (size / 2) as usize;

        let mut entries = Vec::with_capacity(buckets);
        entries.resize_with(buckets, || CacheNode {
            primary: CacheSlot::EMPTY,
            secondary: CacheSlot::EMPTY,
        });

        Self {
            entries,
            hash_mask: size / 2 - 1,
            lookups: 0,
            hits: 0,
        }
    }

    /// Looks up a key. On a hit the cached outputs are returned; on a miss
    /// the bucket index to hand back to [`EvalCache::insert`], which saves
    /// rehashing the key.
    pub fn lookup(&mut self, key: &CacheKey) -> Result<[f32; CACHE_OUTPUTS], u32> {
        let l = self.hash(key);
        self.lookups += 1;

        let node = &mut self.entries[l as usize];
        if !node.primary.matches(key) {
            if !node.secondary.matches(key) {
                return Err(l);
            }
            // found in the second slot: promote the hot entry
            std::mem::swap(&mut node.primary, &mut node.secondary);
        }

        self.hits += 1;
        Ok(node.primary.values)
    }

    /// Stores an evaluation in the bucket a failed lookup reported. The
    /// previous primary entry is demoted, the secondary one evicted.
    pub fn insert(&mut self, key: &CacheKey, bucket: u32, values: [f32; CACHE_OUTPUTS]) {
        let node = &mut self.entries[bucket as usize];
        node.secondary = node.primary;
        node.primary = CacheSlot {
            key: key.position.0,
            context: key.context,
            values,
        };
    }

    /// Total slot count, suitable for building another cache of the same
    /// capacity.
    pub fn size(&self) -> u32 {
        (self.hash_mask + 1) * 2
    }

    pub fn flush(&mut self) {
        for node in &mut self.entries {
            node.primary = CacheSlot::EMPTY;
            node.secondary = CacheSlot::EMPTY;
        }
    }

    /// Lookup and hit counters since creation or the last flush of stats.
    pub fn stats(&self) -> (u64, u64) {
        (self.lookups, self.hits)
    }

    fn hash(&self, key: &CacheKey) -> u32 {
        let mut hash = key.context.wrapping_mul(0xcc9e2d51);
        hash = hash.rotate_left(15).wrapping_mul(0x1b873593);
        hash = hash.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);

        for &word in &key.position.0 {
            let mut k = word.wrapping_mul(0xcc9e2d51);
            k = k.rotate_left(15).wrapping_mul(0x1b873593);

            hash ^= k;
            hash = hash.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
        }

        hash ^= hash >> 16;
        hash = hash.wrapping_mul(0x85ebca6b);
        hash ^= hash >> 13;
        hash = hash.wrapping_mul(0xc2b2ae35);
        hash ^= hash >> 16;

        hash & self.hash_mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavla_core::{Board, Variant};

    fn key_for(board: &Board, context: u32) -> CacheKey {
        CacheKey {
            position: PositionKey::from_board(board),
            context,
        }
    }

    #[test]
    fn miss_then_hit() {
        let mut cache = EvalCache::new(1 << 10);
        let key = key_for(&Board::starting(Variant::Standard), 2);
        let values = [0.55, 0.15, 0.01, 0.12, 0.005, 0.18];

        let bucket = cache.lookup(&key).unwrap_err();
        cache.insert(&key, bucket, values);
        assert_eq!(cache.lookup(&key), Ok(values));

        let (lookups, hits) = cache.stats();
        assert_eq!((lookups, hits), (2, 1));
    }

    #[test]
    fn context_distinguishes_entries() {
        let mut cache = EvalCache::new(1 << 10);
        let board = Board::starting(Variant::Standard);
        let k0 = key_for(&board, 0);
        let k2 = key_for(&board, 2);

        if let Err(b) = cache.lookup(&k0) {
            cache.insert(&k0, b, [0.5; CACHE_OUTPUTS]);
        }
        assert!(cache.lookup(&k2).is_err());
        assert!(cache.lookup(&k0).is_ok());
    }

    #[test]
    fn secondary_slot_survives_one_insertion() {
        let mut cache = EvalCache::new(2);
        // a single bucket: all keys collide
        let board = Board::starting(Variant::Standard);
        let a = key_for(&board, 1);
        let b = key_for(&board, 2);
        let c = key_for(&board, 3);

        let slot = cache.lookup(&a).unwrap_err();
        cache.insert(&a, slot, [0.1; CACHE_OUTPUTS]);
        cache.insert(&b, slot, [0.2; CACHE_OUTPUTS]);

        // both inhabitants are found; looking `a` up promotes it
        assert_eq!(cache.lookup(&a), Ok([0.1; CACHE_OUTPUTS]));
        cache.insert(&c, slot, [0.3; CACHE_OUTPUTS]);

        // `a` was primary when `c` arrived, so it was demoted, not evicted
        assert_eq!(cache.lookup(&a), Ok([0.1; CACHE_OUTPUTS]));
        assert!(cache.lookup(&b).is_err());
    }

    #[test]
    fn flush_clears_everything() {
        let mut cache = EvalCache::new(1 << 8);
        let key = key_for(&Board::starting(Variant::Standard), 7);
        if let Err(b) = cache.lookup(&key) {
            cache.insert(&key, b, [0.4; CACHE_OUTPUTS]);
        }
        cache.flush();
        assert!(cache.lookup(&key).is_err());
    }

    #[test]
    fn size_rounds_to_power_of_two() {
        let cache = EvalCache::new(1000);
        assert_eq!(cache.hash_mask + 1, 512);
        assert_eq!(cache.entries.len(), 512);
    }
}
