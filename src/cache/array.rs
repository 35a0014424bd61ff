use super::meta::Meta;
use super::{CacheLoc, DataBlock};

/// Depth of the scratch buffer pool. A single buffer suffices for the
/// single-threaded relocation sweep; the pool is slightly deeper so nested
/// leases stay cheap to reason about.
pub const COPY_BUFFER_DEPTH: usize = 4;

/// Dense `partitions x sets x ways` storage of metadata cells with an
/// optional parallel data plane. Cells are allocated at construction and
/// mutate in place for the lifetime of the cache.
#[derive(Debug)]
pub struct CacheArray {
    partitions: usize,
    sets: usize,
    ways: usize,
    meta: Vec<Meta>,
    data: Option<Vec<DataBlock>>,
    meta_pool: Vec<Meta>,
    data_pool: Vec<DataBlock>,
}

impl CacheArray {
    #[must_use]
    pub fn new(
        partitions: usize,
        sets: usize,
        ways: usize,
        directory: bool,
        with_data: bool,
    ) -> Self {
        let cells = partitions * sets * ways;
        let template = if directory {
            Meta::directory_capable()
        } else {
            Meta::default()
        };
        Self {
            partitions,
            sets,
            ways,
            meta: vec![template.clone(); cells],
            data: with_data.then(|| vec![DataBlock::default(); cells]),
            meta_pool: vec![template; COPY_BUFFER_DEPTH],
            data_pool: vec![DataBlock::default(); COPY_BUFFER_DEPTH],
        }
    }

    #[must_use]
    pub fn size(&self) -> (usize, usize, usize) {
        (self.partitions, self.sets, self.ways)
    }

    #[must_use]
    pub fn data_present(&self) -> bool {
        self.data.is_some()
    }

    fn cell_index(&self, loc: CacheLoc) -> usize {
        debug_assert!(loc.partition < self.partitions);
        debug_assert!(loc.set < self.sets);
        debug_assert!(loc.way < self.ways);
        (loc.partition * self.sets + loc.set) * self.ways + loc.way
    }

    /// Scan the ways of `(partition, set)` for a valid entry with `tag`.
    #[must_use]
    pub fn hit(&self, tag: u64, partition: usize, set: usize) -> Option<usize> {
        (0..self.ways).find(|&way| {
            self.meta(CacheLoc {
                partition,
                set,
                way,
            })
            .matches(tag)
        })
    }

    #[must_use]
    pub fn meta(&self, loc: CacheLoc) -> &Meta {
        &self.meta[self.cell_index(loc)]
    }

    pub fn meta_mut(&mut self, loc: CacheLoc) -> &mut Meta {
        let idx = self.cell_index(loc);
        &mut self.meta[idx]
    }

    pub fn line_mut(&mut self, loc: CacheLoc) -> (&mut Meta, Option<&mut DataBlock>) {
        let idx = self.cell_index(loc);
        let data = self.data.as_mut().map(|data| &mut data[idx]);
        (&mut self.meta[idx], data)
    }

    /// Exchange the contents of the cell at `loc` with the scratch buffers.
    pub fn swap_with_buffers(
        &mut self,
        loc: CacheLoc,
        meta_buf: &mut Meta,
        data_buf: Option<&mut DataBlock>,
    ) {
        let idx = self.cell_index(loc);
        std::mem::swap(&mut self.meta[idx], meta_buf);
        if let (Some(data), Some(buf)) = (self.data.as_mut(), data_buf) {
            std::mem::swap(&mut data[idx], buf);
        }
    }

    pub fn meta_copy_buffer(&mut self) -> Meta {
        self.meta_pool
            .pop()
            .expect("metadata copy buffer pool exhausted")
    }

    pub fn meta_return_buffer(&mut self, mut meta: Meta) {
        meta.to_invalid();
        meta.to_clean();
        meta.to_unrelocated();
        self.meta_pool.push(meta);
    }

    pub fn data_copy_buffer(&mut self) -> DataBlock {
        self.data_pool
            .pop()
            .expect("data copy buffer pool exhausted")
    }

    pub fn data_return_buffer(&mut self, data: DataBlock) {
        self.data_pool.push(data);
    }
}
