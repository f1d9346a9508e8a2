//! The Bloom-filter collaborator: §6 gates LMC's point lookups on a
//! per-chunk "maybe contains" test. Bloom-filter construction/tuning is out
//! of scope; `SimpleBloomFilter` is a minimal k-hash reference
//! implementation so `lookup()` has something real to consult.

use bit_vec::BitVec;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub trait BloomFilter: Send + Sync {
    /// hashes `key` once; LMC's `lookup()` caches this digest across every
    /// child chunk it tests instead of re-hashing per chunk (§4.5).
    fn hash(&self, key: &[u8]) -> u64;
    /// true = maybe present (no false negatives by construction), false =
    /// definitely absent.
    fn hash_get(&self, digest: u64) -> bool;
    fn insert(&mut self, key: &[u8]);

    fn maybe_contains(&self, key: &[u8]) -> bool {
        self.hash_get(self.hash(key))
    }
}

pub struct SimpleBloomFilter {
    bits: BitVec,
    k: u32,
}

impl SimpleBloomFilter {
    pub fn new(num_bits: usize, k: u32) -> Self {
        Self {
            bits: BitVec::from_elem(num_bits.max(8), false),
            k: k.max(1),
        }
    }

    /// Kirsch-Mitzenmacher double hashing: derive `k` slot indices from a
    /// single digest instead of `k` independent hashes.
    fn slot(&self, digest: u64, i: u64) -> usize {
        let h2 = digest.rotate_left(32) ^ 0x9E3779B97F4A7C15;
        (digest.wrapping_add(i.wrapping_mul(h2)) % self.bits.len() as u64) as usize
    }
}

impl BloomFilter for SimpleBloomFilter {
    fn hash(&self, key: &[u8]) -> u64 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish()
    }

    fn hash_get(&self, digest: u64) -> bool {
        (0..self.k as u64).all(|i| self.bits.get(self.slot(digest, i)).unwrap_or(false))
    }

    fn insert(&mut self, key: &[u8]) {
        let digest = self.hash(key);
        for i in 0..self.k as u64 {
            let slot = self.slot(digest, i);
            self.bits.set(slot, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_always_report_maybe_contains() {
        let mut bf = SimpleBloomFilter::new(2048, 5);
        for k in ["alpha", "beta", "gamma"] {
            bf.insert(k.as_bytes());
        }
        for k in ["alpha", "beta", "gamma"] {
            assert!(bf.maybe_contains(k.as_bytes()));
        }
    }

    #[test]
    fn empty_filter_rejects_everything() {
        let bf = SimpleBloomFilter::new(2048, 5);
        assert!(!bf.maybe_contains(b"anything"));
    }
}
