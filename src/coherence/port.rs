use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use console::style;

use super::{CohCmd, CohId, Policy, COH_ID_NONE};
use crate::address;
use crate::cache::meta::Meta;
use crate::cache::remap::CacheRemap;
use crate::cache::set_index::Indexer;
use crate::cache::skewed::CacheSkewed;
use crate::cache::{CacheLoc, CacheModel, DataBlock, ReplaceGenre, BLOCK_OFFSET_BITS};
use crate::monitor::{MAGIC_ID_REMAP_ASK, MAGIC_ID_REMAP_END};
use crate::pfc;

/// Response summary of a downward probe.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProbeAck {
    pub hit: bool,
    /// Dirty data was written into the caller's buffer.
    pub writeback: bool,
}

/// Inward-facing service of a level: what its inner clients call.
pub trait InnerResp: Send + Sync {
    /// Serve an acquire, filling the caller's buffer with the line.
    fn acquire_resp(&self, addr: address, data: Option<&mut DataBlock>, cmd: CohCmd);

    /// Accept an eviction or writeback from an inner client.
    fn writeback_resp(&self, addr: address, data: Option<&DataBlock>, dirty: bool, cmd: CohCmd);

    /// Flush the line at this level and onward.
    fn flush_resp(&self, addr: address, cmd: CohCmd);
}

/// Outward-facing service of a level: what its parent calls to probe.
pub trait OuterResp: Send + Sync {
    fn probe_resp(&self, addr: address, data: Option<&mut DataBlock>, cmd: CohCmd) -> ProbeAck;
}

fn line_of(addr: address) -> address {
    addr & !((1u64 << BLOCK_OFFSET_BITS) - 1)
}

/// Flat backing store terminating the hierarchy.
#[derive(Debug, Default)]
pub struct MemoryModel {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    blocks: HashMap<address, DataBlock>,
    reads: u64,
    writes: u64,
}

impl MemoryModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reads(&self) -> u64 {
        self.state.lock().unwrap().reads
    }

    #[must_use]
    pub fn writes(&self) -> u64 {
        self.state.lock().unwrap().writes
    }

    #[must_use]
    pub fn block(&self, addr: address) -> Option<DataBlock> {
        self.state.lock().unwrap().blocks.get(&line_of(addr)).copied()
    }
}

impl InnerResp for MemoryModel {
    fn acquire_resp(&self, addr: address, data: Option<&mut DataBlock>, _cmd: CohCmd) {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        if let Some(out) = data {
            *out = state
                .blocks
                .get(&line_of(addr))
                .copied()
                .unwrap_or_default();
        }
    }

    fn writeback_resp(&self, addr: address, data: Option<&DataBlock>, dirty: bool, _cmd: CohCmd) {
        if !dirty {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        if let Some(block) = data {
            state.blocks.insert(line_of(addr), *block);
        }
    }

    fn flush_resp(&self, _addr: address, _cmd: CohCmd) {}
}

#[derive(Clone)]
struct OuterLink {
    port: Arc<dyn InnerResp>,
    coh_id: CohId,
}

/// An eviction whose outward release has not been sent yet. Releases go
/// out only after the evicting level dropped its own lock, so the outer
/// level may probe back in while handling them.
#[derive(Debug)]
struct PendingRelease {
    addr: address,
    data: Option<DataBlock>,
    dirty: bool,
    cmd: CohCmd,
}

struct PortInner<C, P> {
    cache: C,
    policy: P,
    outer: Option<OuterLink>,
    inners: Vec<Arc<dyn OuterResp>>,
    cycles: u64,
}

/// One hierarchy level: a cache coupled with its policy, an outer handle and
/// the outer-facing ports of its inner clients.
///
/// Locking protocol: a level drops its own lock before any outward acquire
/// or flush, so transactions triggered at the outer level (victim probes in
/// particular) can re-enter it. Single-threaded scheduling keeps the
/// unlocked window atomic.
pub struct CoherentCache<C, P> {
    name: String,
    state: Mutex<PortInner<C, P>>,
}

/// Stop-the-world reindexing sweep. Only remap-capable caches relocate
/// anything; for the rest the sweep is empty.
pub trait RemapSweep {
    fn remap(&mut self);
}

impl<I: Indexer, P: Policy> RemapSweep for PortInner<CacheSkewed<I>, P> {
    fn remap(&mut self) {}
}

impl<P: Policy> RemapSweep for PortInner<CacheRemap, P> {
    fn remap(&mut self) {
        let (partitions, sets, ways) = self.cache.size();
        log::debug!(
            "{}: remap sweep over {partitions}x{sets}x{ways} cells",
            self.cache.name()
        );
        self.cache.remap_start();
        for partition in 0..partitions {
            for set in 0..sets {
                for way in 0..ways {
                    self.relocation_chain(CacheLoc {
                        partition,
                        set,
                        way,
                    });
                }
                self.cache.move_remap_pointer(partition);
            }
        }
        self.cache.remap_end();
    }
}

impl<P: Policy> PortInner<CacheRemap, P> {
    /// Drain one cell: lift the line into the scratch buffers, then chase
    /// displaced occupants until the chain hits an empty slot. Termination:
    /// every step marks one more cell relocated.
    fn relocation_chain(&mut self, loc: CacheLoc) {
        {
            let meta = self.cache.meta(loc);
            if !meta.is_valid() || meta.is_relocated() {
                return;
            }
        }
        let geometry = self.cache.geometry();
        let mut c_addr = self.cache.meta(loc).addr(geometry, loc.set);
        let mut c_meta = self.cache.meta_copy_buffer();
        let mut c_data = if self.cache.data_present() {
            Some(self.cache.data_copy_buffer())
        } else {
            None
        };
        self.cache.relocate(loc, &mut c_meta, c_data.as_mut());
        self.cache.meta_mut(loc).to_relocated();
        self.cache.replace_manage(loc, true, 1);

        while c_meta.is_valid() {
            c_addr = self.relocation(c_addr, &mut c_meta, &mut c_data);
        }

        self.cache.meta_return_buffer(c_meta);
        if let Some(data) = c_data {
            self.cache.data_return_buffer(data);
        }
    }

    /// Place the buffered line at its next-indexer home, displacing whatever
    /// lives there into the buffers. Returns the displaced line's address.
    fn relocation(
        &mut self,
        c_addr: address,
        c_meta: &mut Meta,
        c_data: &mut Option<DataBlock>,
    ) -> address {
        let geometry = self.cache.geometry();
        let dest = self
            .cache
            .replace(c_addr, ReplaceGenre::ForRelocate)
            .expect("relocation replacement is available during remap");
        let m_addr = self.cache.meta(dest).addr(geometry, dest.set);
        if self.cache.meta(dest).is_valid() {
            if self.cache.meta(dest).is_relocated() {
                // second displacement of an already-placed line: evict it
                let pending = self.evict_collect(m_addr, dest, COH_ID_NONE);
                self.send_release(pending);
            } else {
                self.cache.replace_manage(dest, true, 1);
            }
        }
        self.cache.swap(dest, c_meta, c_data.as_mut());
        self.cache.replace_read(dest, false);
        self.cache.meta_mut(dest).to_relocated();
        m_addr
    }
}

impl<C, P> PortInner<C, P>
where
    C: CacheModel,
    P: Policy,
    Self: RemapSweep,
{
    /// Forward `probe` to every inner client the metadata says needs it,
    /// merging written-back data into the local line.
    fn probe_inners(&mut self, addr: address, loc: CacheLoc, probe: CohCmd) {
        let inners = self.inners.clone();
        for (target, port) in inners.iter().enumerate() {
            let target = target as CohId;
            let forward = self
                .policy
                .probe_need_probe(probe, self.cache.meta(loc), target);
            let Some(forward) = forward else { continue };
            log::trace!(
                "{}: {} -> inner {}",
                self.cache.name(),
                style(forward).cyan(),
                target
            );
            let (meta, data) = self.cache.line_mut(loc);
            let ack = port.probe_resp(addr, data, forward);
            if ack.writeback {
                meta.to_dirty();
            }
            // a silently dropped clean copy still has to leave the directory
            if ack.hit || forward.is_evict() {
                self.policy.meta_after_probe_ack(forward, meta, target);
            }
        }
    }

    /// Evict the line at `loc`: synchronize inner copies (except `exclude`,
    /// the inner whose transaction triggered the eviction), capture the
    /// outward release, invalidate. The release always goes out, so a
    /// directory drops this cache even for a clean line; data rides along
    /// when the policy wants it written back.
    fn evict_collect(&mut self, addr: address, loc: CacheLoc, exclude: CohId) -> PendingRelease {
        log::debug!(
            "{}: evict {addr:#x} from p{} s{} w{}",
            self.cache.name(),
            loc.partition,
            loc.set,
            loc.way
        );
        if let Some(sync) = self.policy.writeback_need_sync(self.cache.meta(loc)) {
            self.probe_inners(addr, loc, CohCmd { id: exclude, ..sync });
        }
        let dirty = self.cache.meta(loc).is_dirty();
        let carry = self.policy.need_writeback(self.cache.meta(loc));
        if carry {
            self.cycles += self.cache.delay_mut().writeback();
        }
        let data = if carry {
            let (_meta, data) = self.cache.line_mut(loc);
            data.map(|block| *block)
        } else {
            None
        };
        self.cache.meta_mut(loc).to_clean();
        let cache_id = self.cache.cache_id();
        self.cache.meta_mut(loc).to_invalid();
        self.cache.monitors_mut().hook_invalid(cache_id, addr, loc);
        self.cache.replace_manage(loc, true, 1);
        PendingRelease {
            addr,
            data,
            dirty,
            cmd: self
                .policy
                .inner_need_release()
                .unwrap_or(CohCmd::release_evict(COH_ID_NONE)),
        }
    }

    /// Send a captured release outward. Safe while holding this level's
    /// lock only when the outer level never probes back down here.
    fn send_release(&self, pending: PendingRelease) {
        if let Some(outer) = &self.outer {
            let release = CohCmd {
                id: outer.coh_id,
                ..pending.cmd
            };
            outer
                .port
                .writeback_resp(pending.addr, pending.data.as_ref(), pending.dirty, release);
        }
    }

    /// Adopt a released line into the array (the exclusive bridge): probe
    /// the releaser for any surviving copy, make room, install the line
    /// shared with no recorded owner.
    fn release_install(&mut self, addr: address, data: Option<&DataBlock>, dirty: bool, cmd: CohCmd) {
        let geometry = self.cache.geometry();
        let tag = geometry.tag(addr);
        let dir = self.cache.hit(addr);
        log::debug!(
            "{}: adopting release {addr:#x} (tracked={})",
            self.cache.name(),
            dir.is_some()
        );

        if let Some(probe) = self.policy.release_need_probe(cmd) {
            if probe.id >= 0 {
                if let Some(port) = self.inners.get(probe.id as usize).cloned() {
                    let forward = CohCmd {
                        id: COH_ID_NONE,
                        ..probe
                    };
                    port.probe_resp(addr, None, forward);
                }
            }
        }

        let slot = self
            .cache
            .replace(addr, ReplaceGenre::Normal)
            .expect("replacement for a release install is always available");
        if Some(slot) != dir && self.cache.meta(slot).is_valid() {
            let victim = self.cache.meta(slot).addr(geometry, slot.set);
            let pending = self.evict_collect(victim, slot, cmd.id);
            self.send_release(pending);
        }
        // a tracked copy's data moves along when the release carries none
        let moved = match dir {
            Some(d) if d != slot => {
                let (_meta, data) = self.cache.line_mut(d);
                data.map(|block| *block)
            }
            _ => None,
        };
        let mut dir_meta = match dir {
            Some(d) if d != slot => Some(self.cache.meta(d).clone()),
            _ => None,
        };
        {
            let (meta, local) = self.cache.line_mut(slot);
            if let Some(local) = local {
                if let Some(incoming) = data {
                    *local = *incoming;
                } else if let Some(moved) = moved {
                    *local = moved;
                }
            }
            self.policy
                .meta_after_release(cmd, meta, dir_meta.as_mut(), tag, cmd.id, dirty);
        }
        if let (Some(d), Some(dir_meta)) = (dir.filter(|&d| d != slot), dir_meta) {
            *self.cache.meta_mut(d) = dir_meta;
            self.cache.replace_manage(d, true, 1);
        }
        self.cache.replace_manage(slot, false, 0);
        self.cache.replace_read(slot, false);
    }

    /// Answer a probe for a line this level does not hold itself: a
    /// transient entry stands in while the probe is pushed further in, and
    /// whatever the inner caches write back flows straight into the
    /// caller's buffer.
    fn probe_transient(
        &mut self,
        addr: address,
        meta: &mut Meta,
        mut data: Option<&mut DataBlock>,
        cmd: CohCmd,
    ) -> ProbeAck {
        let mut ack = ProbeAck::default();
        meta.init(self.cache.geometry().tag(addr));
        let Some(sync) = self.policy.probe_need_sync(cmd, meta) else {
            return ack;
        };
        let inners = self.inners.clone();
        for (target, port) in inners.iter().enumerate() {
            let target = target as CohId;
            let Some(forward) = self.policy.probe_need_probe(sync, meta, target) else {
                continue;
            };
            let buffer = data.as_mut().map(|block| &mut **block);
            let inner_ack = port.probe_resp(addr, buffer, forward);
            if inner_ack.writeback {
                meta.to_dirty();
            }
            if inner_ack.hit {
                ack.hit = true;
                self.policy.meta_after_probe_ack(forward, meta, target);
            }
        }
        if self.policy.probe_need_writeback(cmd, meta).is_some() {
            ack.writeback = true;
            meta.to_clean();
        }
        ack
    }

    /// End-of-transaction hook: let monitors request a remap and drain it.
    fn finish(&mut self, addr: address) {
        let cache_id = self.cache.cache_id();
        let mut want = false;
        self.cache
            .monitors_mut()
            .magic_func(cache_id, addr, MAGIC_ID_REMAP_ASK, Some(&mut want));
        if want {
            self.remap();
            self.cache
                .monitors_mut()
                .magic_func(cache_id, addr, MAGIC_ID_REMAP_END, None);
        }
    }
}

impl<C, P> CoherentCache<C, P>
where
    C: CacheModel,
    P: Policy,
    PortInner<C, P>: RemapSweep,
{
    #[must_use]
    pub fn new(cache: C, policy: P) -> Arc<Self> {
        Arc::new(Self {
            name: cache.name().to_string(),
            state: Mutex::new(PortInner {
                cache,
                policy,
                outer: None,
                inners: Vec::new(),
                cycles: 0,
            }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_outer(&self, port: Arc<dyn InnerResp>, coh_id: CohId) {
        self.state.lock().unwrap().outer = Some(OuterLink { port, coh_id });
    }

    /// Register an inner client; the returned id is the client's coherence
    /// id at this level.
    pub fn attach_inner(&self, client: Arc<dyn OuterResp>) -> CohId {
        let mut state = self.state.lock().unwrap();
        state.inners.push(client);
        (state.inners.len() - 1) as CohId
    }

    /// Latency accumulated from the delay model.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.state.lock().unwrap().cycles
    }

    /// Run `f` against the cache, e.g. to attach monitors or inspect cells.
    pub fn with_cache<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.state.lock().unwrap().cache)
    }

    /// Force a remap sweep outside the monitor protocol.
    pub fn remap(&self) {
        self.state.lock().unwrap().remap();
    }

    /// The acquire engine. Phase one runs under this level's lock: hit
    /// lookup, inner synchronization and victim eviction. The outer fetch
    /// happens with the lock released, then the line is installed.
    fn acquire_line(&self, addr: address, cmd: CohCmd) -> (CacheLoc, bool) {
        let (loc, was_hit, fetch, outer, pending) = {
            let mut state = self.state.lock().unwrap();
            let inner = &mut *state;
            match inner.cache.hit(addr) {
                Some(loc) => {
                    log::trace!("{}: {} {addr:#x} hit", inner.cache.name(), style(cmd).green());
                    if let Some(sync) = inner.policy.acquire_need_sync(cmd, inner.cache.meta(loc)) {
                        inner.probe_inners(addr, loc, sync);
                    }
                    let promote = inner
                        .policy
                        .acquire_need_promote(cmd, inner.cache.meta(loc));
                    (loc, true, promote, inner.outer.clone(), None)
                }
                None => {
                    log::trace!("{}: {} {addr:#x} miss", inner.cache.name(), style(cmd).red());
                    let loc = inner
                        .cache
                        .replace(addr, ReplaceGenre::Normal)
                        .expect("replacement for a normal miss is always available");
                    inner.cycles += inner.cache.delay_mut().replace();
                    let pending = if inner.cache.meta(loc).is_valid() {
                        let geometry = inner.cache.geometry();
                        let victim = inner.cache.meta(loc).addr(geometry, loc.set);
                        Some(inner.evict_collect(victim, loc, COH_ID_NONE))
                    } else {
                        None
                    };
                    let fetch = inner.policy.cmd_for_outer_acquire(cmd);
                    (loc, false, Some(fetch), inner.outer.clone(), pending)
                }
            }
        };
        // lock released: the outer transaction may probe back into this
        // cache, both for its own victims and while adopting the release
        if let (Some(pending), Some(outer)) = (pending, &outer) {
            let release = CohCmd {
                id: outer.coh_id,
                ..pending.cmd
            };
            outer
                .port
                .writeback_resp(pending.addr, pending.data.as_ref(), pending.dirty, release);
        }
        let fetched = fetch.map(|fetch| {
            let outer = outer.expect("a coherent cache requires an outer port");
            let fetch = CohCmd {
                id: outer.coh_id,
                ..fetch
            };
            let mut block = DataBlock::default();
            outer.port.acquire_resp(addr, Some(&mut block), fetch);
            (fetch, block)
        });

        let mut state = self.state.lock().unwrap();
        let inner = &mut *state;
        if let Some((fetch, block)) = fetched {
            let tag = inner.cache.geometry().tag(addr);
            let (meta, data) = inner.cache.line_mut(loc);
            // a dirty local line is newer than the outer copy a promote
            // brings in; keep the data and the dirtiness
            let keep_local = was_hit && meta.is_dirty();
            if let Some(data) = data {
                if !keep_local {
                    *data = block;
                }
            }
            inner.policy.meta_after_fetch(fetch, meta, tag);
            if keep_local {
                meta.to_dirty();
            }
            if !was_hit {
                inner.cache.replace_manage(loc, false, 0);
            }
        }
        let cache_id = inner.cache.cache_id();
        inner.cycles += inner.cache.delay_mut().access(cmd.is_write());
        if cmd.is_write() {
            inner
                .cache
                .monitors_mut()
                .hook_write(cache_id, addr, loc, was_hit);
        } else {
            inner
                .cache
                .monitors_mut()
                .hook_read(cache_id, addr, loc, was_hit);
        }
        inner.cache.replace_read(loc, !was_hit);
        (loc, was_hit)
    }
}

impl<C, P> InnerResp for CoherentCache<C, P>
where
    C: CacheModel + 'static,
    P: Policy + 'static,
    PortInner<C, P>: RemapSweep + Send,
{
    fn acquire_resp(&self, addr: address, data: Option<&mut DataBlock>, cmd: CohCmd) {
        let (loc, _) = self.acquire_line(addr, cmd);
        let mut state = self.state.lock().unwrap();
        let inner = &mut *state;
        inner.policy.meta_after_grant(cmd, inner.cache.meta_mut(loc));
        if let Some(out) = data {
            let (_, local) = inner.cache.line_mut(loc);
            if let Some(local) = local {
                *out = *local;
            }
        }
        inner.finish(addr);
    }

    fn writeback_resp(&self, addr: address, data: Option<&DataBlock>, dirty: bool, cmd: CohCmd) {
        let mut state = self.state.lock().unwrap();
        let inner = &mut *state;
        debug_assert!(cmd.is_release());
        // the exclusive bridge pushes the release back into the array
        // instead of merging it into an existing copy
        if inner.policy.release_need_probe(cmd).is_some() {
            inner.release_install(addr, data, dirty, cmd);
            return;
        }
        let Some(loc) = inner.cache.hit(addr) else {
            // not held here; hand the release to the next level out
            log::debug!(
                "{}: release {addr:#x} misses, forwarding outward",
                inner.cache.name()
            );
            if let Some(outer) = inner.outer.clone() {
                let forward = CohCmd {
                    id: outer.coh_id,
                    ..cmd
                };
                outer.port.writeback_resp(addr, data, dirty, forward);
            }
            return;
        };
        let tag = inner.cache.geometry().tag(addr);
        let (meta, local) = inner.cache.line_mut(loc);
        if dirty {
            if let (Some(incoming), Some(local)) = (data, local) {
                *local = *incoming;
            }
            meta.to_dirty();
        }
        inner
            .policy
            .meta_after_release(cmd, meta, None, tag, cmd.id, dirty);
        inner.cache.replace_read(loc, false);
    }

    fn flush_resp(&self, addr: address, cmd: CohCmd) {
        let (writeback, outer) = {
            let mut state = self.state.lock().unwrap();
            let inner = &mut *state;
            debug_assert!(cmd.is_flush());
            let hit = inner.cache.hit(addr);
            let sync = {
                let meta = hit.map(|loc| inner.cache.meta(loc));
                inner.policy.flush_need_sync(cmd, meta)
            };
            if let (Some(sync), Some(loc)) = (sync, hit) {
                inner.probe_inners(addr, loc, sync);
            }
            let mut writeback = None;
            if let Some(loc) = hit {
                if inner.cache.meta(loc).is_dirty() {
                    let (_meta, data) = inner.cache.line_mut(loc);
                    writeback = Some(data.map(|block| *block));
                }
                let cache_id = inner.cache.cache_id();
                let invalidated = {
                    let meta = inner.cache.meta_mut(loc);
                    inner.policy.meta_after_flush(cmd, meta)
                };
                if invalidated {
                    inner.cache.monitors_mut().hook_invalid(cache_id, addr, loc);
                    inner.cache.replace_manage(loc, true, 1);
                }
            }
            (
                writeback,
                inner
                    .outer
                    .clone()
                    .map(|outer| (outer, inner.policy.cmd_for_outer_flush(cmd))),
            )
        };
        // lock released: the outer level may probe back down, both while
        // adopting the writeback and while syncing its own flush
        if let Some((outer, forward)) = outer {
            if let Some(block) = writeback {
                let release = CohCmd::release_writeback(outer.coh_id);
                outer
                    .port
                    .writeback_resp(addr, block.as_ref(), true, release);
            }
            let forward = CohCmd {
                id: outer.coh_id,
                ..forward
            };
            outer.port.flush_resp(addr, forward);
        }
    }
}

impl<C, P> OuterResp for CoherentCache<C, P>
where
    C: CacheModel + 'static,
    P: Policy + 'static,
    PortInner<C, P>: RemapSweep + Send,
{
    fn probe_resp(&self, addr: address, data: Option<&mut DataBlock>, cmd: CohCmd) -> ProbeAck {
        let mut state = self.state.lock().unwrap();
        let inner = &mut *state;
        debug_assert!(cmd.is_probe());
        let mut ack = ProbeAck::default();
        let Some(loc) = inner.cache.hit(addr) else {
            // a transient entry lets the probe reach copies held only
            // further in
            if let Some(mut transient) = inner.policy.probe_need_create(None) {
                return inner.probe_transient(addr, &mut transient, data, cmd);
            }
            return ack;
        };
        ack.hit = true;
        log::trace!("{}: {} {addr:#x} hit", inner.cache.name(), style(cmd).yellow());
        if let Some(sync) = inner.policy.probe_need_sync(cmd, inner.cache.meta(loc)) {
            inner.probe_inners(addr, loc, sync);
        }
        if inner
            .policy
            .probe_need_writeback(cmd, inner.cache.meta(loc))
            .is_some()
        {
            let (_, local) = inner.cache.line_mut(loc);
            if let (Some(out), Some(local)) = (data, local) {
                *out = *local;
            }
            ack.writeback = true;
        }
        let cache_id = inner.cache.cache_id();
        let invalidated = {
            let meta = inner.cache.meta_mut(loc);
            inner.policy.meta_after_probe(cmd, meta)
        };
        if invalidated {
            inner.cache.monitors_mut().hook_invalid(cache_id, addr, loc);
            inner.cache.replace_manage(loc, true, 1);
        }
        ack
    }
}

/// Core-side access interface of an L1 port. Requests carry no coherence
/// id; performance-counter commands embedded as addresses are intercepted
/// before they reach the cache.
pub struct CoreInterface<C, P> {
    l1: Arc<CoherentCache<C, P>>,
}

impl<C, P> CoreInterface<C, P>
where
    C: CacheModel + 'static,
    P: Policy + 'static,
    PortInner<C, P>: RemapSweep + Send,
{
    #[must_use]
    pub fn new(l1: Arc<CoherentCache<C, P>>) -> Self {
        Self { l1 }
    }

    pub fn read(&self, addr: address) -> u64 {
        if let Some(cmd) = pfc::decode(addr) {
            self.pfc(cmd);
            return 0;
        }
        let cmd = CohCmd::acquire_read(COH_ID_NONE);
        let (loc, _) = self.l1.acquire_line(addr, cmd);
        let mut state = self.l1.state.lock().unwrap();
        let inner = &mut *state;
        inner.policy.meta_after_grant(cmd, inner.cache.meta_mut(loc));
        let word = {
            let (_, data) = inner.cache.line_mut(loc);
            data.map(|block| block.word(addr)).unwrap_or(0)
        };
        inner.finish(addr);
        word
    }

    pub fn write(&self, addr: address, value: u64) {
        if let Some(cmd) = pfc::decode(addr) {
            self.pfc(cmd);
            return;
        }
        let cmd = CohCmd::acquire_write(COH_ID_NONE);
        let (loc, _) = self.l1.acquire_line(addr, cmd);
        let mut state = self.l1.state.lock().unwrap();
        let inner = &mut *state;
        inner.policy.meta_after_grant(cmd, inner.cache.meta_mut(loc));
        {
            let (meta, data) = inner.cache.line_mut(loc);
            if let Some(block) = data {
                block.set_word(addr, value);
            }
            meta.to_dirty();
        }
        inner.finish(addr);
    }

    /// Flush the line out of the whole hierarchy.
    pub fn flush(&self, addr: address) {
        self.l1
            .flush_resp(addr, CohCmd::flush_evict(COH_ID_NONE));
    }

    /// Write the line back without invalidating it.
    pub fn writeback(&self, addr: address) {
        self.l1
            .flush_resp(addr, CohCmd::flush_writeback(COH_ID_NONE));
    }

    fn pfc(&self, cmd: pfc::Command) {
        log::debug!("{}: pfc {:?}", self.l1.name(), cmd);
        match cmd {
            pfc::Command::Start => self.l1.with_cache(|cache| cache.monitors_mut().resume()),
            pfc::Command::Stop => self.l1.with_cache(|cache| cache.monitors_mut().pause()),
            pfc::Command::Query(id) => {
                self.l1.with_cache(|cache| {
                    let cache_id = cache.cache_id();
                    cache.monitors_mut().magic_func(cache_id, 0, id, None);
                });
            }
            pfc::Command::Flush(addr) => self.flush(addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CohCmd, DataBlock, InnerResp, MemoryModel};

    #[test]
    fn memory_serves_zeroes_until_written() {
        let memory = MemoryModel::new();
        let mut block = DataBlock::default();
        memory.acquire_resp(0x1040, Some(&mut block), CohCmd::acquire_read(0));
        assert_eq!(block, DataBlock::default());

        block.0[3] = 0x55;
        memory.writeback_resp(0x1040, Some(&block), true, CohCmd::release_evict(0));

        let mut readback = DataBlock::default();
        memory.acquire_resp(0x1047, Some(&mut readback), CohCmd::acquire_read(0));
        assert_eq!(readback.0[3], 0x55);
        assert_eq!(memory.reads(), 2);
        assert_eq!(memory.writes(), 1);
    }

    #[test]
    fn clean_releases_do_not_touch_memory() {
        let memory = MemoryModel::new();
        memory.writeback_resp(0x2000, None, false, CohCmd::release_evict(1));
        assert_eq!(memory.writes(), 0);
        assert!(memory.block(0x2000).is_none());
    }

    #[test]
    fn memory_is_keyed_by_line() {
        let memory = MemoryModel::new();
        let mut block = DataBlock::default();
        block.0[0] = 7;
        memory.writeback_resp(0x10c8, Some(&block), true, CohCmd::release_evict(0));
        assert_eq!(memory.block(0x10ff).unwrap().0[0], 7);
        assert!(memory.block(0x1140).is_none());
    }
}
