use super::BLOCK_OFFSET_BITS;
use crate::address;

pub trait Indexer: Send + std::fmt::Debug {
    /// Compute the set index of `addr` in partition `partition`.
    #[must_use]
    fn index(&self, addr: address, partition: usize) -> usize;
}

/// Plain index-bit extraction above the block offset. Every partition maps
/// an address to the same set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearIndex {
    num_sets: usize,
}

impl LinearIndex {
    #[must_use]
    pub fn new(index_width: u32) -> Self {
        Self {
            num_sets: 1 << index_width,
        }
    }
}

impl Indexer for LinearIndex {
    fn index(&self, addr: address, _partition: usize) -> usize {
        ((addr >> BLOCK_OFFSET_BITS) as usize) & (self.num_sets - 1)
    }
}

/// One seeded hash function per partition.
///
/// The hash is a xorshift-multiply finalizer over the line address xored
/// with the partition seed. The 64-bit map is a bijection and every output
/// bit depends on the whole seed; the set index is its low `index_width`
/// bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkewedIndex {
    num_sets: usize,
    seeds: Vec<u64>,
}

impl SkewedIndex {
    #[must_use]
    pub fn new(index_width: u32, partitions: usize) -> Self {
        Self {
            num_sets: 1 << index_width,
            seeds: vec![0; partitions],
        }
    }

    /// Replace all partition seeds in one call. Callers never observe a
    /// partially updated seed vector.
    pub fn seed(&mut self, seeds: &[u64]) {
        assert_eq!(
            seeds.len(),
            self.seeds.len(),
            "seed vector length must match the partition count"
        );
        self.seeds.copy_from_slice(seeds);
    }

    #[must_use]
    pub fn seeds(&self) -> &[u64] {
        &self.seeds
    }

    fn mix(mut z: u64) -> u64 {
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

impl Indexer for SkewedIndex {
    fn index(&self, addr: address, partition: usize) -> usize {
        let line = addr >> BLOCK_OFFSET_BITS;
        (Self::mix(line ^ self.seeds[partition]) as usize) & (self.num_sets - 1)
    }
}
