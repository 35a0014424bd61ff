pub mod msi;
pub mod port;

use crate::cache::meta::Meta;

/// Identifier of an inner coherence client at its parent.
pub type CohId = i32;

/// No originating inner cache; on probes this means broadcast.
pub const COH_ID_NONE: CohId = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum Msg {
    Acquire,
    Release,
    Probe,
    Flush,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum Act {
    Read,
    Write,
    Evict,
    Writeback,
}

/// One coherence command: originating inner id, message class and the
/// message-specific action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CohCmd {
    pub id: CohId,
    pub msg: Msg,
    pub act: Act,
}

impl CohCmd {
    #[must_use]
    pub const fn acquire_read(id: CohId) -> Self {
        Self {
            id,
            msg: Msg::Acquire,
            act: Act::Read,
        }
    }

    #[must_use]
    pub const fn acquire_write(id: CohId) -> Self {
        Self {
            id,
            msg: Msg::Acquire,
            act: Act::Write,
        }
    }

    #[must_use]
    pub const fn release_evict(id: CohId) -> Self {
        Self {
            id,
            msg: Msg::Release,
            act: Act::Evict,
        }
    }

    #[must_use]
    pub const fn release_writeback(id: CohId) -> Self {
        Self {
            id,
            msg: Msg::Release,
            act: Act::Writeback,
        }
    }

    #[must_use]
    pub const fn probe_evict(id: CohId) -> Self {
        Self {
            id,
            msg: Msg::Probe,
            act: Act::Evict,
        }
    }

    #[must_use]
    pub const fn probe_writeback(id: CohId) -> Self {
        Self {
            id,
            msg: Msg::Probe,
            act: Act::Writeback,
        }
    }

    #[must_use]
    pub const fn flush_evict(id: CohId) -> Self {
        Self {
            id,
            msg: Msg::Flush,
            act: Act::Evict,
        }
    }

    #[must_use]
    pub const fn flush_writeback(id: CohId) -> Self {
        Self {
            id,
            msg: Msg::Flush,
            act: Act::Writeback,
        }
    }

    #[must_use]
    pub fn is_acquire(&self) -> bool {
        self.msg == Msg::Acquire
    }

    #[must_use]
    pub fn is_release(&self) -> bool {
        self.msg == Msg::Release
    }

    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.msg == Msg::Probe
    }

    #[must_use]
    pub fn is_flush(&self) -> bool {
        self.msg == Msg::Flush
    }

    #[must_use]
    pub fn is_read(&self) -> bool {
        self.act == Act::Read
    }

    #[must_use]
    pub fn is_write(&self) -> bool {
        self.act == Act::Write
    }

    #[must_use]
    pub fn is_evict(&self) -> bool {
        self.act == Act::Evict
    }

    #[must_use]
    pub fn is_writeback(&self) -> bool {
        self.act == Act::Writeback
    }
}

impl std::fmt::Display for CohCmd {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self.msg {
            Msg::Acquire => "acquire",
            Msg::Release => "release",
            Msg::Probe => "probe",
            Msg::Flush => "flush",
        };
        let act = match self.act {
            Act::Read => "read",
            Act::Write => "write",
            Act::Evict => "evict",
            Act::Writeback => "writeback",
        };
        write!(f, "{msg}-{act}@{}", self.id)
    }
}

/// Coherence decisions, consulted by the ports at every step of a
/// transaction. Policies carry no mutable state; `need_*` answers pair a
/// decision with the command to issue when the answer is yes.
pub trait Policy: Send + Sync + std::fmt::Debug {
    /// Translate an inner acquire into the command sent to the outer level.
    fn cmd_for_outer_acquire(&self, cmd: CohCmd) -> CohCmd;

    /// Translate an inner flush into the command forwarded outward.
    fn cmd_for_outer_flush(&self, cmd: CohCmd) -> CohCmd;

    /// Must other inner copies be synchronized before serving this acquire?
    fn acquire_need_sync(&self, cmd: CohCmd, meta: &Meta) -> Option<CohCmd>;

    /// Must the cached copy be upgraded at the outer level first?
    fn acquire_need_promote(&self, cmd: CohCmd, meta: &Meta) -> Option<CohCmd>;

    /// Must an outer probe be pushed further down?
    fn probe_need_sync(&self, outer_cmd: CohCmd, meta: &Meta) -> Option<CohCmd>;

    /// Should the probe be forwarded to inner cache `target`?
    fn probe_need_probe(&self, cmd: CohCmd, meta: &Meta, target: CohId) -> Option<CohCmd>;

    /// Must dirty data accompany the probe response?
    fn probe_need_writeback(&self, outer_cmd: CohCmd, meta: &Meta) -> Option<CohCmd>;

    /// Must inner copies be invalidated before evicting this line?
    fn writeback_need_sync(&self, meta: &Meta) -> Option<CohCmd>;

    /// Must inner copies be synchronized before flushing this line?
    fn flush_need_sync(&self, cmd: CohCmd, meta: Option<&Meta>) -> Option<CohCmd>;

    /// Local metadata update after inner cache `inner_id` acknowledged a
    /// probe.
    fn meta_after_probe_ack(&self, cmd: CohCmd, meta: &mut Meta, inner_id: CohId);

    /// Local metadata update after fetching the line from the outer level.
    fn meta_after_fetch(&self, outer_cmd: CohCmd, meta: &mut Meta, tag: u64);

    /// Local metadata update after granting the line to the requester.
    fn meta_after_grant(&self, cmd: CohCmd, meta: &mut Meta);

    /// Local metadata update after answering an outer probe. Returns true
    /// when the line was invalidated.
    fn meta_after_probe(&self, outer_cmd: CohCmd, meta: &mut Meta) -> bool;

    /// Local metadata update when inner cache `inner_id` releases the line
    /// with `tag`. `dir_meta` is a separate tracking entry stepping aside
    /// when the released line is installed elsewhere in the array; only the
    /// exclusive bridge produces one. The default keeps inclusive
    /// semantics: an evict release drops the releaser from the directory.
    fn meta_after_release(
        &self,
        cmd: CohCmd,
        meta: &mut Meta,
        dir_meta: Option<&mut Meta>,
        tag: u64,
        inner_id: CohId,
        dirty: bool,
    ) {
        debug_assert!(cmd.is_release());
        let _ = (dir_meta, tag, dirty);
        if cmd.is_evict() {
            meta.sync(inner_id);
        }
    }

    /// A transient metadata entry standing in for a line this level only
    /// tracks indirectly, so probes can reach copies held further in.
    /// Inclusive levels create none.
    fn probe_need_create(&self, meta: Option<&Meta>) -> Option<Meta> {
        let _ = meta;
        None
    }

    /// Probe issued at the releasing inner before its line is accepted.
    /// `Some` also routes the release through the adoption path instead of
    /// merging it into an existing copy.
    fn release_need_probe(&self, cmd: CohCmd) -> Option<CohCmd> {
        let _ = cmd;
        None
    }

    /// Must the line's data travel outward when it is evicted?
    fn need_writeback(&self, meta: &Meta) -> bool {
        meta.is_dirty()
    }

    /// Command an inner level uses to hand a line back on eviction.
    fn inner_need_release(&self) -> Option<CohCmd> {
        None
    }

    /// Local metadata update after flushing. Returns true when the line was
    /// invalidated.
    fn meta_after_flush(&self, cmd: CohCmd, meta: &mut Meta) -> bool;

    /// Synchronize other holders of a live line. The probe carries the
    /// writeback action: an owner hands its dirty data over and demotes to
    /// shared, untouched copies survive the probe.
    fn need_sync(&self, meta: &Meta, id: CohId) -> Option<CohCmd> {
        if meta.is_valid() {
            Some(CohCmd::probe_writeback(id))
        } else {
            None
        }
    }
}
