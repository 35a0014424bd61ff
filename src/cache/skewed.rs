use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::array::CacheArray;
use super::meta::Meta;
use super::remap::RemapError;
use super::set_index::{Indexer, LinearIndex, SkewedIndex};
use super::{CacheLoc, CacheModel, DataBlock, Geometry, ReplaceGenre};
use crate::address;
use crate::config::{CacheSettings, ConfigError};
use crate::delay::{DelayModel, NoDelay};
use crate::monitor::{Monitor, MonitorGroup};
use crate::replace::{Replacer, StampReplacer};

/// Set-associative cache with one independent indexer view per partition.
pub struct CacheSkewed<I> {
    pub(crate) name: String,
    pub(crate) id: u64,
    pub(crate) geometry: Geometry,
    pub(crate) array: CacheArray,
    pub(crate) indexer: I,
    pub(crate) replacer: Box<dyn Replacer>,
    pub(crate) monitors: MonitorGroup,
    pub(crate) delay: Box<dyn DelayModel>,
    pub(crate) rng: SmallRng,
}

impl<I> std::fmt::Debug for CacheSkewed<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let (partitions, sets, ways) = self.array.size();
        f.debug_struct("CacheSkewed")
            .field("name", &self.name)
            .field("partitions", &partitions)
            .field("sets", &sets)
            .field("ways", &ways)
            .finish()
    }
}

impl CacheSkewed<SkewedIndex> {
    /// Build with hashed per-partition indexing, seeds drawn from the
    /// settings seed.
    pub fn build(settings: &CacheSettings, id: u64) -> Result<Self, ConfigError> {
        settings.validate()?;
        let mut rng = SmallRng::seed_from_u64(settings.seed);
        let mut indexer = SkewedIndex::new(settings.index_width, settings.partitions);
        let seeds: Vec<u64> = (0..settings.partitions).map(|_| rng.gen()).collect();
        indexer.seed(&seeds);
        Ok(Self::with_indexer(settings, id, indexer, rng))
    }
}

impl CacheSkewed<LinearIndex> {
    /// Build with plain index-bit extraction (a conventional cache).
    pub fn build_linear(settings: &CacheSettings, id: u64) -> Result<Self, ConfigError> {
        settings.validate()?;
        let rng = SmallRng::seed_from_u64(settings.seed);
        let indexer = LinearIndex::new(settings.index_width);
        Ok(Self::with_indexer(settings, id, indexer, rng))
    }
}

impl<I: Indexer> CacheSkewed<I> {
    pub(crate) fn with_indexer(
        settings: &CacheSettings,
        id: u64,
        indexer: I,
        rng: SmallRng,
    ) -> Self {
        let sets = settings.sets();
        Self {
            name: settings.name.clone(),
            id,
            geometry: settings.geometry(),
            array: CacheArray::new(
                settings.partitions,
                sets,
                settings.ways,
                settings.directory,
                settings.data,
            ),
            indexer,
            replacer: Box::new(StampReplacer::new(
                settings.replacement,
                settings.partitions,
                sets,
                settings.ways,
                settings.seed,
            )),
            monitors: MonitorGroup::default(),
            delay: Box::new(NoDelay),
            rng,
        }
    }

    pub fn attach_monitor(&mut self, monitor: Box<dyn Monitor>) {
        self.monitors.attach(monitor);
    }

    pub fn set_delay(&mut self, delay: Box<dyn DelayModel>) {
        self.delay = delay;
    }

    pub(crate) fn choose_partition(&mut self) -> usize {
        let (partitions, _, _) = self.array.size();
        if partitions == 1 {
            0
        } else {
            self.rng.gen_range(0..partitions)
        }
    }
}

impl<I: Indexer> CacheModel for CacheSkewed<I> {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn size(&self) -> (usize, usize, usize) {
        self.array.size()
    }

    fn hit(&self, addr: address) -> Option<CacheLoc> {
        let tag = self.geometry.tag(addr);
        let (partitions, _, _) = self.array.size();
        for partition in 0..partitions {
            let set = self.indexer.index(addr, partition);
            if let Some(way) = self.array.hit(tag, partition, set) {
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
        let partition = self.choose_partition();
        let set = match genre {
            ReplaceGenre::Normal => self.indexer.index(addr, partition),
            ReplaceGenre::ForRelocate => return Err(RemapError::RelocateUnsupported),
            ReplaceGenre::DuringRemap => return Err(RemapError::ConcurrentReplace),
        };
        let way = self.replacer.choose_way(partition, set);
        Ok(CacheLoc {
            partition,
            set,
            way,
        })
    }

    fn meta(&self, loc: CacheLoc) -> &Meta {
        self.array.meta(loc)
    }

    fn meta_mut(&mut self, loc: CacheLoc) -> &mut Meta {
        self.array.meta_mut(loc)
    }

    fn line_mut(&mut self, loc: CacheLoc) -> (&mut Meta, Option<&mut DataBlock>) {
        self.array.line_mut(loc)
    }

    fn replace_read(&mut self, loc: CacheLoc, miss: bool) {
        self.replacer.read(loc.partition, loc.set, loc.way, miss);
    }

    fn replace_manage(&mut self, loc: CacheLoc, free: bool, kind: u32) {
        self.replacer
            .access(loc.partition, loc.set, loc.way, free, kind);
    }

    fn monitors_mut(&mut self) -> &mut MonitorGroup {
        &mut self.monitors
    }

    fn delay_mut(&mut self) -> &mut dyn DelayModel {
        &mut *self.delay
    }

    fn cache_id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheModel, CacheSkewed, ReplaceGenre};
    use crate::cache::remap::RemapError;
    use crate::config::CacheSettings;

    fn linear_settings() -> CacheSettings {
        let mut settings = CacheSettings::skewed("l1", 1, 2, 2);
        settings.tag_offset = 8;
        settings.addr_width = 16;
        settings
    }

    #[test]
    fn miss_then_hit_after_install() {
        let mut cache = CacheSkewed::build_linear(&linear_settings(), 0).unwrap();
        assert!(cache.hit(0x1200).is_none());

        let loc = cache.replace(0x1200, ReplaceGenre::Normal).unwrap();
        let tag = cache.geometry().tag(0x1200);
        let meta = cache.meta_mut(loc);
        meta.init(tag);
        meta.to_shared(-1);

        let found = cache.hit(0x1200).expect("installed line must hit");
        assert_eq!(found, loc);
        // other tag in the same set still misses
        assert!(cache.hit(0x1300).is_none());
    }

    #[test]
    fn skewed_partitions_disagree_on_sets() {
        let settings = CacheSettings::skewed("llc", 2, 4, 2);
        let cache = CacheSkewed::build(&settings, 0).unwrap();
        let disagreements = (0..64u64)
            .map(|line| line << 6)
            .filter(|&addr| {
                crate::cache::set_index::Indexer::index(&cache.indexer, addr, 0)
                    != crate::cache::set_index::Indexer::index(&cache.indexer, addr, 1)
            })
            .count();
        assert!(disagreements > 0);
    }

    #[test]
    fn relocation_replacement_needs_a_remap_cache() {
        let mut cache = CacheSkewed::build(&CacheSettings::skewed("llc", 2, 3, 4), 0).unwrap();
        assert_eq!(
            cache.replace(0x40, ReplaceGenre::ForRelocate),
            Err(RemapError::RelocateUnsupported)
        );
        assert_eq!(
            cache.replace(0x40, ReplaceGenre::DuringRemap),
            Err(RemapError::ConcurrentReplace)
        );
    }

    #[test]
    fn single_partition_never_randomizes() {
        let mut cache = CacheSkewed::build_linear(&linear_settings(), 0).unwrap();
        for _ in 0..16 {
            let loc = cache.replace(0x1200, ReplaceGenre::Normal).unwrap();
            assert_eq!(loc.partition, 0);
        }
    }

    #[test]
    fn tag_set_roundtrip_for_valid_cells() {
        // index(m.addr(s), p) == s for any installed line
        let mut cache = CacheSkewed::build_linear(&linear_settings(), 0).unwrap();
        for addr in [0x1200u64, 0x1280, 0x3340, 0x77c0] {
            let loc = cache.replace(addr, ReplaceGenre::Normal).unwrap();
            let tag = cache.geometry().tag(addr);
            let meta = cache.meta_mut(loc);
            meta.init(tag);
            meta.to_shared(-1);
            cache.replace_manage(loc, false, 0);
        }
        let geometry = cache.geometry();
        let (partitions, sets, ways) = cache.size();
        for partition in 0..partitions {
            for set in 0..sets {
                for way in 0..ways {
                    let loc = crate::cache::CacheLoc {
                        partition,
                        set,
                        way,
                    };
                    let meta = cache.meta(loc);
                    if meta.is_valid() {
                        let addr = meta.addr(geometry, set);
                        assert_eq!(
                            crate::cache::set_index::Indexer::index(&cache.indexer, addr, partition),
                            set
                        );
                    }
                }
            }
        }
    }
}
