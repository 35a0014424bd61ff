use itertools::iproduct;
use rand::Rng;

use super::meta::Meta;
use super::set_index::{Indexer, SkewedIndex};
use super::skewed::CacheSkewed;
use super::{CacheLoc, CacheModel, DataBlock, Geometry, ReplaceGenre};
use crate::address;
use crate::config::{CacheSettings, ConfigError};
use crate::delay::DelayModel;
use crate::monitor::MonitorGroup;

/// Typed failures of the replacement path. Replacement racing a remap is
/// unsupported under single-threaded scheduling and surfaces as an error
/// the caller treats as fatal.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapError {
    #[error("replacement during an active remap is not supported in single-threaded scheduling")]
    ConcurrentReplace,

    #[error("relocation-targeted replacement requires a remap-capable cache")]
    RelocateUnsupported,
}

/// Skewed cache that can atomically rotate its indexing function.
///
/// Two indexers exist at all times: `current` (inside the embedded skewed
/// cache) and `next`. While a remap sweep is in flight a line may live at
/// its old home (at or above the per-partition remap pointer) or already at
/// its new one, and lookups cover both.
pub struct CacheRemap {
    pub(crate) skew: CacheSkewed<SkewedIndex>,
    pub(crate) indexer_next: SkewedIndex,
    pub(crate) remap_pointer: Vec<usize>,
    pub(crate) remap: bool,
}

impl std::fmt::Debug for CacheRemap {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CacheRemap")
            .field("skew", &self.skew)
            .field("remap_in_progress", &self.remap)
            .finish()
    }
}

impl CacheRemap {
    pub fn build(settings: &CacheSettings, id: u64) -> Result<Self, ConfigError> {
        let mut skew = CacheSkewed::build(settings, id)?;
        let mut indexer_next = SkewedIndex::new(settings.index_width, settings.partitions);
        let seeds: Vec<u64> = (0..settings.partitions).map(|_| skew.rng.gen()).collect();
        indexer_next.seed(&seeds);
        Ok(Self {
            skew,
            indexer_next,
            remap_pointer: vec![0; settings.partitions],
            remap: false,
        })
    }

    #[must_use]
    pub fn remap_in_progress(&self) -> bool {
        self.remap
    }

    #[must_use]
    pub fn data_present(&self) -> bool {
        self.skew.array.data_present()
    }

    /// Install explicit seeds for the next indexer.
    pub fn seed_next(&mut self, seeds: &[u64]) {
        self.indexer_next.seed(seeds);
    }

    #[must_use]
    pub fn next_seeds(&self) -> &[u64] {
        self.indexer_next.seeds()
    }

    /// Promote the next seeds to current and draw fresh ones for next.
    pub fn rotate_indexer(&mut self) {
        let seeds = self.indexer_next.seeds().to_vec();
        self.skew.indexer.seed(&seeds);
        let fresh: Vec<u64> = (0..seeds.len()).map(|_| self.skew.rng.gen()).collect();
        self.indexer_next.seed(&fresh);
    }

    pub fn remap_start(&mut self) {
        self.remap = true;
    }

    pub fn move_remap_pointer(&mut self, partition: usize) {
        self.remap_pointer[partition] += 1;
    }

    /// Close a sweep: rotate the indexers, reset the pointers and clear the
    /// per-cell relocation markers.
    pub fn remap_end(&mut self) {
        self.remap = false;
        self.remap_pointer.fill(0);
        self.rotate_indexer();
        let (partitions, sets, ways) = self.skew.array.size();
        for (partition, set, way) in iproduct!(0..partitions, 0..sets, 0..ways) {
            self.skew
                .array
                .meta_mut(CacheLoc {
                    partition,
                    set,
                    way,
                })
                .to_unrelocated();
        }
    }

    /// Copy the cell at `loc` into the scratch buffers and invalidate it.
    pub fn relocate(&mut self, loc: CacheLoc, meta_buf: &mut Meta, data_buf: Option<&mut DataBlock>) {
        let (meta, data) = self.skew.array.line_mut(loc);
        meta_buf.copy_from(meta);
        if let (Some(data), Some(buf)) = (data, data_buf) {
            *buf = *data;
        }
        meta.to_invalid();
    }

    /// Exchange the scratch buffers with the cell at `loc`.
    pub fn swap(&mut self, loc: CacheLoc, meta_buf: &mut Meta, data_buf: Option<&mut DataBlock>) {
        self.skew.array.swap_with_buffers(loc, meta_buf, data_buf);
    }

    pub fn meta_copy_buffer(&mut self) -> Meta {
        self.skew.array.meta_copy_buffer()
    }

    pub fn meta_return_buffer(&mut self, meta: Meta) {
        self.skew.array.meta_return_buffer(meta);
    }

    pub fn data_copy_buffer(&mut self) -> DataBlock {
        self.skew.array.data_copy_buffer()
    }

    pub fn data_return_buffer(&mut self, data: DataBlock) {
        self.skew.array.data_return_buffer(data);
    }

    pub fn attach_monitor(&mut self, monitor: Box<dyn crate::monitor::Monitor>) {
        self.skew.attach_monitor(monitor);
    }

    pub fn set_delay(&mut self, delay: Box<dyn crate::delay::DelayModel>) {
        self.skew.set_delay(delay);
    }

    #[must_use]
    pub fn next_index(&self, addr: address, partition: usize) -> usize {
        self.indexer_next.index(addr, partition)
    }

    #[must_use]
    pub fn current_index(&self, addr: address, partition: usize) -> usize {
        self.skew.indexer.index(addr, partition)
    }
}

impl CacheModel for CacheRemap {
    fn geometry(&self) -> Geometry {
        self.skew.geometry()
    }

    fn size(&self) -> (usize, usize, usize) {
        self.skew.size()
    }

    fn hit(&self, addr: address) -> Option<CacheLoc> {
        if !self.remap {
            return self.skew.hit(addr);
        }
        // Sets below the remap pointer have been evacuated under the current
        // indexer; everywhere else the line may still sit at its old home.
        // Its new home under the next indexer covers the rest.
        let tag = self.skew.geometry.tag(addr);
        let (partitions, _, _) = self.skew.size();
        for partition in 0..partitions {
            let set = self.skew.indexer.index(addr, partition);
            if set >= self.remap_pointer[partition] {
                if let Some(way) = self.skew.array.hit(tag, partition, set) {
                    return Some(CacheLoc {
                        partition,
                        set,
                        way,
                    });
                }
            }
            let set = self.indexer_next.index(addr, partition);
            if let Some(way) = self.skew.array.hit(tag, partition, set) {
                return Some(CacheLoc {
                    partition,
                    set,
                    way,
                });
            }
        }
        None
    }

    fn replace(&mut self, addr: address, genre: ReplaceGenre) -> Result<CacheLoc, RemapError> {
        let partition = self.skew.choose_partition();
        let set = match genre {
            ReplaceGenre::Normal => self.skew.indexer.index(addr, partition),
            ReplaceGenre::ForRelocate => self.indexer_next.index(addr, partition),
            ReplaceGenre::DuringRemap => return Err(RemapError::ConcurrentReplace),
        };
        let way = self.skew.replacer.choose_way(partition, set);
        Ok(CacheLoc {
            partition,
            set,
            way,
        })
    }

    fn meta(&self, loc: CacheLoc) -> &Meta {
        self.skew.meta(loc)
    }

    fn meta_mut(&mut self, loc: CacheLoc) -> &mut Meta {
        self.skew.meta_mut(loc)
    }

    fn line_mut(&mut self, loc: CacheLoc) -> (&mut Meta, Option<&mut DataBlock>) {
        self.skew.line_mut(loc)
    }

    fn replace_read(&mut self, loc: CacheLoc, miss: bool) {
        self.skew.replace_read(loc, miss);
    }

    fn replace_manage(&mut self, loc: CacheLoc, free: bool, kind: u32) {
        self.skew.replace_manage(loc, free, kind);
    }

    fn monitors_mut(&mut self) -> &mut MonitorGroup {
        self.skew.monitors_mut()
    }

    fn delay_mut(&mut self) -> &mut dyn DelayModel {
        self.skew.delay_mut()
    }

    fn cache_id(&self) -> u64 {
        self.skew.cache_id()
    }

    fn name(&self) -> &str {
        self.skew.name()
    }
}
