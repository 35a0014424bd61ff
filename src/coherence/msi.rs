use super::{CohCmd, CohId, Policy, COH_ID_NONE};
use crate::cache::meta::Meta;

/// MSI policy for one hierarchy level.
///
/// The level position is fixed at compile time: `L1` caches never probe
/// inward, `LLC` caches never promote outward. The const parameters prune
/// those branches entirely.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MsiPolicy<const L1: bool, const LLC: bool>;

impl<const L1: bool, const LLC: bool> Policy for MsiPolicy<L1, LLC> {
    fn cmd_for_outer_acquire(&self, cmd: CohCmd) -> CohCmd {
        debug_assert!(cmd.is_acquire());
        if cmd.is_write() {
            CohCmd::acquire_write(COH_ID_NONE)
        } else {
            CohCmd::acquire_read(COH_ID_NONE)
        }
    }

    fn cmd_for_outer_flush(&self, cmd: CohCmd) -> CohCmd {
        debug_assert!(cmd.is_flush());
        if cmd.is_evict() {
            CohCmd::flush_evict(COH_ID_NONE)
        } else {
            CohCmd::flush_writeback(COH_ID_NONE)
        }
    }

    fn acquire_need_sync(&self, cmd: CohCmd, meta: &Meta) -> Option<CohCmd> {
        if L1 {
            return None;
        }
        debug_assert!(cmd.is_acquire());
        if cmd.is_write() {
            Some(CohCmd::probe_evict(cmd.id))
        } else {
            self.need_sync(meta, cmd.id)
        }
    }

    fn acquire_need_promote(&self, cmd: CohCmd, meta: &Meta) -> Option<CohCmd> {
        if LLC {
            return None;
        }
        debug_assert!(cmd.is_acquire());
        if cmd.is_write() && !meta.is_modified() {
            Some(CohCmd::acquire_write(COH_ID_NONE))
        } else {
            None
        }
    }

    fn probe_need_sync(&self, outer_cmd: CohCmd, meta: &Meta) -> Option<CohCmd> {
        if L1 {
            return None;
        }
        debug_assert!(outer_cmd.is_probe());
        if outer_cmd.is_evict() {
            Some(CohCmd::probe_evict(COH_ID_NONE))
        } else {
            self.need_sync(meta, COH_ID_NONE)
        }
    }

    fn probe_need_probe(&self, cmd: CohCmd, meta: &Meta, target: CohId) -> Option<CohCmd> {
        debug_assert!(cmd.is_probe());
        let forward = (cmd.is_evict() && meta.evict_need_probe(target, cmd.id))
            || (cmd.is_writeback() && meta.writeback_need_probe(target, cmd.id));
        if forward {
            Some(CohCmd {
                id: COH_ID_NONE,
                ..cmd
            })
        } else {
            None
        }
    }

    fn probe_need_writeback(&self, outer_cmd: CohCmd, meta: &Meta) -> Option<CohCmd> {
        debug_assert!(outer_cmd.is_probe());
        if meta.is_dirty() {
            Some(CohCmd::release_writeback(COH_ID_NONE))
        } else {
            None
        }
    }

    fn writeback_need_sync(&self, _meta: &Meta) -> Option<CohCmd> {
        if L1 {
            None
        } else {
            Some(CohCmd::probe_evict(COH_ID_NONE))
        }
    }

    fn flush_need_sync(&self, cmd: CohCmd, meta: Option<&Meta>) -> Option<CohCmd> {
        if !LLC {
            return None;
        }
        debug_assert!(cmd.is_flush());
        if cmd.is_evict() {
            Some(CohCmd::probe_evict(COH_ID_NONE))
        } else {
            meta.and_then(|meta| self.need_sync(meta, COH_ID_NONE))
        }
    }

    fn meta_after_probe_ack(&self, cmd: CohCmd, meta: &mut Meta, inner_id: CohId) {
        debug_assert!(cmd.is_probe());
        if cmd.is_evict() {
            if meta.is_directory() {
                meta.sync(inner_id);
            } else {
                meta.to_shared(COH_ID_NONE);
            }
        } else {
            meta.to_shared(inner_id);
        }
    }

    fn meta_after_fetch(&self, outer_cmd: CohCmd, meta: &mut Meta, tag: u64) {
        debug_assert!(outer_cmd.is_acquire());
        meta.init(tag);
        if outer_cmd.is_write() {
            meta.to_modified(COH_ID_NONE);
        } else {
            meta.to_shared(COH_ID_NONE);
        }
        meta.to_clean();
    }

    fn meta_after_grant(&self, cmd: CohCmd, meta: &mut Meta) {
        debug_assert!(cmd.is_acquire());
        if cmd.is_write() {
            meta.to_modified(cmd.id);
        } else {
            meta.to_shared(cmd.id);
        }
    }

    fn meta_after_probe(&self, outer_cmd: CohCmd, meta: &mut Meta) -> bool {
        debug_assert!(outer_cmd.is_probe());
        if outer_cmd.is_evict() {
            meta.to_clean();
            meta.to_invalid();
            true
        } else {
            meta.to_shared(COH_ID_NONE);
            meta.to_clean();
            false
        }
    }

    fn meta_after_flush(&self, cmd: CohCmd, meta: &mut Meta) -> bool {
        debug_assert!(cmd.is_flush());
        meta.to_clean();
        if cmd.is_evict() {
            meta.to_invalid();
            true
        } else {
            false
        }
    }
}

/// Inclusive-exclusive bridge policy for the LLC side. Always a non-L1
/// level; release handling and probing differ because lines may live only
/// in inner caches.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExclusiveMsiPolicy<const LLC: bool> {
    base: MsiPolicy<false, LLC>,
}

impl<const LLC: bool> Policy for ExclusiveMsiPolicy<LLC> {
    fn cmd_for_outer_acquire(&self, cmd: CohCmd) -> CohCmd {
        self.base.cmd_for_outer_acquire(cmd)
    }

    fn cmd_for_outer_flush(&self, cmd: CohCmd) -> CohCmd {
        self.base.cmd_for_outer_flush(cmd)
    }

    fn acquire_need_sync(&self, cmd: CohCmd, meta: &Meta) -> Option<CohCmd> {
        self.base.acquire_need_sync(cmd, meta)
    }

    fn acquire_need_promote(&self, cmd: CohCmd, meta: &Meta) -> Option<CohCmd> {
        self.base.acquire_need_promote(cmd, meta)
    }

    fn probe_need_sync(&self, outer_cmd: CohCmd, meta: &Meta) -> Option<CohCmd> {
        self.base.probe_need_sync(outer_cmd, meta)
    }

    fn probe_need_probe(&self, cmd: CohCmd, meta: &Meta, target: CohId) -> Option<CohCmd> {
        self.base.probe_need_probe(cmd, meta, target)
    }

    fn probe_need_writeback(&self, outer_cmd: CohCmd, meta: &Meta) -> Option<CohCmd> {
        self.base.probe_need_writeback(outer_cmd, meta)
    }

    fn writeback_need_sync(&self, meta: &Meta) -> Option<CohCmd> {
        self.base.writeback_need_sync(meta)
    }

    fn flush_need_sync(&self, cmd: CohCmd, meta: Option<&Meta>) -> Option<CohCmd> {
        self.base.flush_need_sync(cmd, meta)
    }

    fn meta_after_probe_ack(&self, cmd: CohCmd, meta: &mut Meta, inner_id: CohId) {
        self.base.meta_after_probe_ack(cmd, meta, inner_id);
    }

    fn meta_after_fetch(&self, outer_cmd: CohCmd, meta: &mut Meta, tag: u64) {
        self.base.meta_after_fetch(outer_cmd, meta, tag);
    }

    fn meta_after_grant(&self, cmd: CohCmd, meta: &mut Meta) {
        self.base.meta_after_grant(cmd, meta);
    }

    fn meta_after_probe(&self, outer_cmd: CohCmd, meta: &mut Meta) -> bool {
        self.base.meta_after_probe(outer_cmd, meta)
    }

    /// Push the released line back into the cache: the tracking entry, if
    /// any, is dropped and the line installed shared with no recorded
    /// owner, carrying the inner copy's dirtiness.
    fn meta_after_release(
        &self,
        cmd: CohCmd,
        meta: &mut Meta,
        dir_meta: Option<&mut Meta>,
        tag: u64,
        _inner_id: CohId,
        dirty: bool,
    ) {
        debug_assert!(cmd.is_release());
        if let Some(dir_meta) = dir_meta {
            dir_meta.to_invalid();
            debug_assert!(!dir_meta.is_dirty());
        }
        meta.init(tag);
        meta.to_shared(COH_ID_NONE);
        if dirty {
            meta.to_dirty();
        }
    }

    fn meta_after_flush(&self, cmd: CohCmd, meta: &mut Meta) -> bool {
        self.base.meta_after_flush(cmd, meta)
    }

    /// A transient entry stands in for a line held only in inner levels.
    fn probe_need_create(&self, meta: Option<&Meta>) -> Option<Meta> {
        if meta.is_none() {
            Some(Meta::default())
        } else {
            None
        }
    }

    /// The releasing inner is always probed for its copy.
    fn release_need_probe(&self, cmd: CohCmd) -> Option<CohCmd> {
        debug_assert!(cmd.is_release());
        Some(CohCmd::probe_evict(cmd.id))
    }

    fn need_writeback(&self, _meta: &Meta) -> bool {
        true
    }

    /// Inner levels hand lines back instead of dropping them silently.
    fn inner_need_release(&self) -> Option<CohCmd> {
        Some(CohCmd::release_evict(COH_ID_NONE))
    }
}

#[cfg(test)]
mod tests {
    use super::{CohCmd, ExclusiveMsiPolicy, MsiPolicy, Policy};
    use crate::cache::meta::Meta;

    type L1Policy = MsiPolicy<true, false>;
    type MidPolicy = MsiPolicy<false, false>;
    type LlcPolicy = MsiPolicy<false, true>;

    fn shared_directory(ids: &[i32]) -> Meta {
        let mut meta = Meta::directory_capable();
        meta.init(0x42);
        for &id in ids {
            meta.to_shared(id);
        }
        meta
    }

    #[test]
    fn l1_is_quiescent() {
        let policy = L1Policy::default();
        let mut meta = Meta::default();
        meta.to_shared(-1);
        assert!(policy
            .acquire_need_sync(CohCmd::acquire_write(0), &meta)
            .is_none());
        assert!(policy
            .probe_need_sync(CohCmd::probe_evict(-1), &meta)
            .is_none());
        assert!(policy.writeback_need_sync(&meta).is_none());
    }

    #[test]
    fn write_acquire_syncs_other_sharers() {
        let policy = MidPolicy::default();
        let meta = shared_directory(&[0, 1]);
        let sync = policy
            .acquire_need_sync(CohCmd::acquire_write(0), &meta)
            .expect("a write acquire must invalidate other sharers");
        assert!(sync.is_probe() && sync.is_evict());
        assert_eq!(sync.id, 0);
    }

    #[test]
    fn read_acquire_syncs_live_lines_without_evicting() {
        let policy = MidPolicy::default();
        let mut meta = Meta::default();
        meta.to_modified(-1);
        // an owner hands its data over through a writeback probe
        let sync = policy
            .acquire_need_sync(CohCmd::acquire_read(1), &meta)
            .unwrap();
        assert!(sync.is_probe() && sync.is_writeback());
        assert_eq!(sync.id, 1);

        // untouched shared copies survive the same probe
        meta.to_shared(-1);
        let sync = policy
            .acquire_need_sync(CohCmd::acquire_read(1), &meta)
            .unwrap();
        assert!(sync.is_writeback());
    }

    #[test]
    fn promotion_only_below_the_llc() {
        let mut meta = Meta::default();
        meta.to_shared(-1);
        let mid = MidPolicy::default();
        let promote = mid
            .acquire_need_promote(CohCmd::acquire_write(0), &meta)
            .expect("shared line needs a modified copy for a write");
        assert!(promote.is_acquire() && promote.is_write());

        let llc = LlcPolicy::default();
        assert!(llc
            .acquire_need_promote(CohCmd::acquire_write(0), &meta)
            .is_none());

        meta.to_modified(-1);
        assert!(mid
            .acquire_need_promote(CohCmd::acquire_write(0), &meta)
            .is_none());
    }

    #[test]
    fn probe_forwarding_respects_the_directory() {
        let policy = LlcPolicy::default();
        let meta = shared_directory(&[0, 2]);
        let cmd = CohCmd::probe_evict(0);
        assert!(policy.probe_need_probe(cmd, &meta, 0).is_none());
        assert!(policy.probe_need_probe(cmd, &meta, 1).is_none());
        let fwd = policy.probe_need_probe(cmd, &meta, 2).unwrap();
        assert_eq!(fwd.id, -1);
        assert!(fwd.is_evict());
    }

    #[test]
    fn dirty_lines_answer_probes_with_writebacks() {
        let policy = MidPolicy::default();
        let mut meta = Meta::default();
        meta.to_modified(-1);
        assert!(policy
            .probe_need_writeback(CohCmd::probe_writeback(-1), &meta)
            .is_none());
        meta.to_dirty();
        let wb = policy
            .probe_need_writeback(CohCmd::probe_writeback(-1), &meta)
            .unwrap();
        assert!(wb.is_release() && wb.is_writeback());
    }

    #[test]
    fn directory_sync_on_evict_release() {
        let policy = LlcPolicy::default();
        let mut meta = shared_directory(&[0, 1, 2]);
        policy.meta_after_probe_ack(CohCmd::probe_evict(-1), &mut meta, 1);
        assert!(meta.is_sharer(0));
        assert!(!meta.is_sharer(1));
        assert!(meta.is_sharer(2));
    }

    #[test]
    fn writeback_probe_ack_records_the_sharer() {
        let policy = LlcPolicy::default();
        let mut meta = shared_directory(&[1]);
        policy.meta_after_probe_ack(CohCmd::probe_writeback(-1), &mut meta, 3);
        assert!(meta.is_shared());
        assert!(meta.is_sharer(3));
    }

    #[test]
    fn broadcast_evict_ack_drops_to_shared() {
        let policy = MidPolicy::default();
        let mut meta = Meta::default();
        meta.to_modified(-1);
        policy.meta_after_probe_ack(CohCmd::probe_evict(-1), &mut meta, 1);
        assert!(meta.is_shared());
    }

    #[test]
    fn flush_sync_happens_at_the_llc() {
        let llc = LlcPolicy::default();
        let sync = llc.flush_need_sync(CohCmd::flush_evict(-1), None).unwrap();
        assert!(sync.is_probe() && sync.is_evict());
        assert_eq!(sync.id, -1);

        let mid = MidPolicy::default();
        assert!(mid.flush_need_sync(CohCmd::flush_evict(-1), None).is_none());
    }

    #[test]
    fn fetch_and_grant_transitions() {
        let policy = LlcPolicy::default();
        let mut meta = Meta::directory_capable();
        policy.meta_after_fetch(CohCmd::acquire_read(-1), &mut meta, 0x99);
        assert!(meta.is_shared());
        assert!(!meta.is_dirty());
        assert_eq!(meta.tag(), 0x99);

        policy.meta_after_grant(CohCmd::acquire_write(2), &mut meta);
        assert!(meta.is_modified());
        assert!(meta.is_sharer(2));
        assert_eq!(meta.sharers().count_ones(), 1);
    }

    #[test]
    fn probe_response_invalidates_on_evict() {
        let policy = L1Policy::default();
        let mut meta = Meta::default();
        meta.to_modified(-1);
        meta.to_dirty();
        assert!(policy.meta_after_probe(CohCmd::probe_evict(-1), &mut meta));
        assert!(!meta.is_valid());
        assert!(!meta.is_dirty());

        meta.to_modified(-1);
        meta.to_dirty();
        assert!(!policy.meta_after_probe(CohCmd::probe_writeback(-1), &mut meta));
        assert!(meta.is_shared());
        assert!(!meta.is_dirty());
    }

    #[test]
    fn exclusive_release_installs_shared_without_owner() {
        // pins the ownerless shared install on release, so an intentional
        // change of that behavior shows up here
        let policy = ExclusiveMsiPolicy::<true>::default();
        let mut mmeta = Meta::directory_capable();
        let mut directory = shared_directory(&[1]);
        policy.meta_after_release(
            CohCmd::release_evict(1),
            &mut mmeta,
            Some(&mut directory),
            0x55,
            1,
            true,
        );
        assert!(!directory.is_valid());
        assert!(mmeta.is_shared());
        assert_eq!(mmeta.sharers().count_ones(), 0);
        assert!(mmeta.is_dirty());
        assert_eq!(mmeta.tag(), 0x55);
    }

    #[test]
    fn exclusive_probe_creates_transient_entries() {
        let policy = ExclusiveMsiPolicy::<true>::default();
        assert!(policy.probe_need_create(None).is_some());
        let existing = Meta::default();
        assert!(policy.probe_need_create(Some(&existing)).is_none());
    }

    #[test]
    fn exclusive_always_probes_the_releaser_and_writes_back() {
        let policy = ExclusiveMsiPolicy::<true>::default();
        let probe = policy.release_need_probe(CohCmd::release_evict(2)).unwrap();
        assert_eq!(probe.id, 2);
        assert!(probe.is_probe() && probe.is_evict());
        assert!(policy.need_writeback(&Meta::default()));
        assert!(policy.inner_need_release().is_some());
    }

    #[test]
    fn inclusive_policy_keeps_the_bridge_hooks_inert() {
        let policy = LlcPolicy::default();
        assert!(policy.probe_need_create(None).is_none());
        assert!(policy
            .release_need_probe(CohCmd::release_evict(2))
            .is_none());
        assert!(policy.inner_need_release().is_none());

        let mut meta = Meta::default();
        meta.to_shared(-1);
        assert!(!policy.need_writeback(&meta));
        meta.to_dirty();
        assert!(policy.need_writeback(&meta));
    }

    #[test]
    fn inclusive_release_syncs_the_directory() {
        let policy = LlcPolicy::default();
        let mut meta = shared_directory(&[0, 1]);
        policy.meta_after_release(CohCmd::release_evict(1), &mut meta, None, 0x42, 1, false);
        assert!(meta.is_sharer(0));
        assert!(!meta.is_sharer(1));
        assert!(meta.is_shared());
    }
}
