use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Replacement policy selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplacePolicy {
    LRU,
    FIFO,
    Random,
}

/// Victim selection contract between a cache and its replacement state.
///
/// `access` with `free = true` signals that a way was freed outside the
/// normal access path (probe invalidation, remap relocation); freed ways are
/// preferred victims until they are filled again.
pub trait Replacer: Send + std::fmt::Debug {
    /// Pick a victim way for `(partition, set)`.
    fn choose_way(&mut self, partition: usize, set: usize) -> usize;

    /// Record that a way was filled (`free = false`) or freed (`free = true`).
    fn access(&mut self, partition: usize, set: usize, way: usize, free: bool, kind: u32);

    /// Record a read touching a way.
    fn read(&mut self, partition: usize, set: usize, way: usize, miss: bool);
}

#[derive(Debug, Clone, Copy)]
struct WayState {
    stamp: u64,
    free: bool,
}

/// Timestamp-based replacer covering LRU, FIFO and random selection.
#[derive(Debug)]
pub struct StampReplacer {
    policy: ReplacePolicy,
    sets: usize,
    ways: usize,
    clock: u64,
    states: Vec<WayState>,
    rng: SmallRng,
}

impl StampReplacer {
    #[must_use]
    pub fn new(
        policy: ReplacePolicy,
        partitions: usize,
        sets: usize,
        ways: usize,
        seed: u64,
    ) -> Self {
        Self {
            policy,
            sets,
            ways,
            clock: 0,
            states: vec![
                WayState {
                    stamp: 0,
                    free: true,
                };
                partitions * sets * ways
            ],
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn base(&self, partition: usize, set: usize) -> usize {
        (partition * self.sets + set) * self.ways
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

impl Replacer for StampReplacer {
    fn choose_way(&mut self, partition: usize, set: usize) -> usize {
        let base = self.base(partition, set);
        let ways = &self.states[base..base + self.ways];
        if let Some(way) = ways.iter().position(|w| w.free) {
            return way;
        }
        match self.policy {
            ReplacePolicy::Random => self.rng.gen_range(0..self.ways),
            ReplacePolicy::LRU | ReplacePolicy::FIFO => ways
                .iter()
                .enumerate()
                .min_by_key(|(_, w)| w.stamp)
                .map(|(way, _)| way)
                .expect("a set always has at least one way"),
        }
    }

    fn access(&mut self, partition: usize, set: usize, way: usize, free: bool, _kind: u32) {
        let stamp = self.tick();
        let idx = self.base(partition, set) + way;
        let state = &mut self.states[idx];
        if free {
            state.free = true;
        } else {
            state.free = false;
            state.stamp = stamp;
        }
    }

    fn read(&mut self, partition: usize, set: usize, way: usize, _miss: bool) {
        let stamp = self.tick();
        let idx = self.base(partition, set) + way;
        let state = &mut self.states[idx];
        state.free = false;
        match self.policy {
            // only reads refresh the LRU stamp; FIFO keeps the fill order
            ReplacePolicy::LRU => state.stamp = stamp,
            ReplacePolicy::FIFO | ReplacePolicy::Random => {}
        }
    }
}
