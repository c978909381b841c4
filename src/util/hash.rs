//! # Hash Utilities
//!
//! Hash combining for cache keys and content hashing for shader sources.

use bytemuck::{Pod, Zeroable};

/// Combine two hashes
pub fn hash_combine(h1: u64, h2: u64) -> u64 {
    h1 ^ (h2.wrapping_add(0x9e3779b9).wrapping_add(h1 << 6).wrapping_add(h1 >> 2))
}

/// Fold a sequence of values into a seed with [`hash_combine`]
pub fn hash_combine_all(seed: u64, values: impl IntoIterator<Item = u64>) -> u64 {
    values.into_iter().fold(seed, hash_combine)
}

/// 128-bit content hash, split in two halves so it stays `Pod`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ContentHash {
    pub low: u64,
    pub high: u64,
}

impl ContentHash {
    /// Hash shader source text together with its entry point.
    ///
    /// Only the text matters, so the same source always yields the same hash
    /// regardless of when or where it is compiled.
    pub fn of_shader(source: &str, entry_point: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(entry_point.as_bytes());
        hasher.update(&[0]);
        hasher.update(source.as_bytes());
        let digest = hasher.finalize();

        let bytes = digest.as_bytes();
        let mut low = [0u8; 8];
        let mut high = [0u8; 8];
        low.copy_from_slice(&bytes[0..8]);
        high.copy_from_slice(&bytes[8..16]);

        Self {
            low: u64::from_le_bytes(low),
            high: u64::from_le_bytes(high),
        }
    }

    /// True for the all-zero hash used by absent shader stages
    pub fn is_zero(&self) -> bool {
        self.low == 0 && self.high == 0
    }
}
