use bitvec::array::BitArray;
use bitvec::order::Lsb0;
use bitvec::BitArr;

use super::Geometry;
use crate::address;
use crate::coherence::{CohId, COH_ID_NONE};

/// Maximum number of downstream coherence clients a directory entry tracks.
pub const MAX_SHARERS: usize = 64;

pub type SharerMask = BitArr!(for MAX_SHARERS, in u64, Lsb0);

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, strum::EnumIter)]
pub enum State {
    Invalid = 0,
    Shared = 1,
    Modified = 2,
}

const STATE_MASK: u8 = 0b11;
const DIRTY: u8 = 1 << 2;
const DIRECTORY: u8 = 1 << 3;
const RELOCATED: u8 = 1 << 4;
const DIRECTORY_CAPABLE: u8 = 1 << 5;

/// Per-line coherence metadata.
///
/// State, dirtiness and the directory/relocation flags are packed into one
/// byte. The sharer mask is only consulted on directory-capable entries;
/// broadcast entries keep it empty and answer probe filtering from the
/// requester id alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    flags: u8,
    tag: u64,
    sharers: SharerMask,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            flags: 0,
            tag: 0,
            sharers: BitArray::ZERO,
        }
    }
}

impl Meta {
    /// An entry that records sharers when granted with a concrete id.
    #[must_use]
    pub fn directory_capable() -> Self {
        Self {
            flags: DIRECTORY_CAPABLE,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        match self.flags & STATE_MASK {
            0 => State::Invalid,
            1 => State::Shared,
            _ => State::Modified,
        }
    }

    fn set_state(&mut self, state: State) {
        self.flags = (self.flags & !STATE_MASK) | state as u8;
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state() != State::Invalid
    }

    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.state() == State::Shared
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.state() == State::Modified
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.flags & DIRTY != 0
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.flags & DIRECTORY != 0
    }

    #[must_use]
    pub fn tag(&self) -> u64 {
        self.tag
    }

    #[must_use]
    pub fn matches(&self, tag: u64) -> bool {
        self.is_valid() && self.tag == tag
    }

    /// Reconstruct the line address of this entry when stored at `set`.
    #[must_use]
    pub fn addr(&self, geometry: Geometry, set: usize) -> address {
        geometry.line_addr(self.tag, set)
    }

    /// Claim the entry for a new tag, invalid and clean.
    pub fn init(&mut self, tag: u64) {
        self.tag = tag;
        self.set_state(State::Invalid);
        self.flags &= !DIRTY;
    }

    pub fn to_invalid(&mut self) {
        self.set_state(State::Invalid);
        self.flags &= !DIRECTORY;
        self.sharers = BitArray::ZERO;
    }

    pub fn to_shared(&mut self, id: CohId) {
        self.set_state(State::Shared);
        self.grant_to(id);
    }

    pub fn to_modified(&mut self, id: CohId) {
        self.set_state(State::Modified);
        self.grant_to(id);
    }

    fn grant_to(&mut self, id: CohId) {
        if id != COH_ID_NONE && self.flags & DIRECTORY_CAPABLE != 0 {
            debug_assert!((id as usize) < MAX_SHARERS, "coherence id out of range");
            self.sharers.set(id as usize, true);
            self.flags |= DIRECTORY;
        }
    }

    pub fn to_dirty(&mut self) {
        self.flags |= DIRTY;
    }

    pub fn to_clean(&mut self) {
        self.flags &= !DIRTY;
    }

    /// Drop `id` from the sharer set without touching the state.
    pub fn sync(&mut self, id: CohId) {
        if id != COH_ID_NONE && self.flags & DIRECTORY_CAPABLE != 0 {
            self.sharers.set(id as usize, false);
        }
    }

    /// Take over state, dirtiness and tag from another entry. The sharer
    /// mask stays behind.
    pub fn copy_from(&mut self, other: &Meta) {
        self.set_state(other.state());
        self.flags = (self.flags & !DIRTY) | (other.flags & DIRTY);
        self.tag = other.tag;
    }

    #[must_use]
    pub fn is_sharer(&self, id: CohId) -> bool {
        id >= 0 && (id as usize) < MAX_SHARERS && self.sharers[id as usize]
    }

    #[must_use]
    pub fn sharers(&self) -> &SharerMask {
        &self.sharers
    }

    /// Does evicting this line require probing inner cache `target`?
    #[must_use]
    pub fn evict_need_probe(&self, target: CohId, request: CohId) -> bool {
        if self.flags & DIRECTORY_CAPABLE != 0 {
            self.is_sharer(target) && target != request
        } else {
            target != request
        }
    }

    /// Does writing this line back require probing inner cache `target`?
    #[must_use]
    pub fn writeback_need_probe(&self, target: CohId, request: CohId) -> bool {
        self.evict_need_probe(target, request)
    }

    pub fn to_relocated(&mut self) {
        self.flags |= RELOCATED;
    }

    pub fn to_unrelocated(&mut self) {
        self.flags &= !RELOCATED;
    }

    #[must_use]
    pub fn is_relocated(&self) -> bool {
        self.flags & RELOCATED != 0
    }
}

#[cfg(test)]
mod tests {
    use super::{Meta, State, MAX_SHARERS};
    use strum::IntoEnumIterator;

    #[test]
    fn fresh_entry_is_invalid_and_clean() {
        let meta = Meta::default();
        assert_eq!(meta.state(), State::Invalid);
        assert!(!meta.is_dirty());
        assert!(!meta.is_directory());
        assert_eq!(meta.sharers().count_ones(), 0);
    }

    #[test]
    fn state_transitions() {
        let mut meta = Meta::default();
        for state in State::iter() {
            match state {
                State::Invalid => meta.to_invalid(),
                State::Shared => meta.to_shared(-1),
                State::Modified => meta.to_modified(-1),
            }
            assert_eq!(meta.state(), state);
        }
    }

    #[test]
    fn broadcast_entry_ignores_grant_ids() {
        let mut meta = Meta::default();
        meta.to_shared(3);
        assert!(meta.is_shared());
        assert!(!meta.is_directory());
        assert!(!meta.is_sharer(3));
    }

    #[test]
    fn directory_entry_records_and_drops_sharers() {
        let mut meta = Meta::directory_capable();
        meta.to_shared(0);
        meta.to_shared(1);
        meta.to_shared(2);
        assert!(meta.is_directory());
        assert_eq!(meta.sharers().count_ones(), 3);

        meta.sync(1);
        assert!(meta.is_sharer(0));
        assert!(!meta.is_sharer(1));
        assert!(meta.is_sharer(2));
        // sync leaves the state alone
        assert!(meta.is_shared());
    }

    #[test]
    fn invalid_implies_empty_sharers() {
        let mut meta = Meta::directory_capable();
        meta.to_modified(5);
        meta.to_dirty();
        meta.to_invalid();
        assert!(!meta.is_valid());
        assert!(!meta.is_directory());
        assert_eq!(meta.sharers().count_ones(), 0);
    }

    #[test]
    fn probe_filtering_broadcast_vs_directory() {
        let broadcast = {
            let mut meta = Meta::default();
            meta.to_shared(-1);
            meta
        };
        assert!(broadcast.evict_need_probe(2, 0));
        assert!(!broadcast.evict_need_probe(0, 0));

        let directory = {
            let mut meta = Meta::directory_capable();
            meta.to_shared(0);
            meta.to_shared(2);
            meta
        };
        assert!(directory.evict_need_probe(2, 0));
        assert!(!directory.evict_need_probe(1, 0));
        assert!(!directory.evict_need_probe(0, 0));
        assert!(directory.writeback_need_probe(2, -1));
    }

    #[test]
    fn copy_leaves_sharers_behind() {
        let mut src = Meta::directory_capable();
        src.init(0x42);
        src.to_modified(7);
        src.to_dirty();

        let mut dst = Meta::directory_capable();
        dst.copy_from(&src);
        assert_eq!(dst.tag(), 0x42);
        assert!(dst.is_modified());
        assert!(dst.is_dirty());
        assert_eq!(dst.sharers().count_ones(), 0);
    }

    #[test]
    fn relocation_flag() {
        let mut meta = Meta::default();
        assert!(!meta.is_relocated());
        meta.to_relocated();
        assert!(meta.is_relocated());
        // invalidation does not clear the sweep marker
        meta.to_invalid();
        assert!(meta.is_relocated());
        meta.to_unrelocated();
        assert!(!meta.is_relocated());
    }

    #[test]
    fn sharer_capacity() {
        let mut meta = Meta::directory_capable();
        meta.to_shared((MAX_SHARERS - 1) as i32);
        assert!(meta.is_sharer((MAX_SHARERS - 1) as i32));
    }
}
