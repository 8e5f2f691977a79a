//! The deferred-work unit the engine schedules: [`Request`].

use crate::stub::Stub;

/// Identifies an inode across the engine. The surrounding translator plumbing
/// owns the real inode table; the engine only ever sees this opaque id.
pub type InodeId = u64;

/// Per-inode monotonically increasing request identity, used as the key into
/// [`crate::inode::InodeState`]'s owner map and as the link value in its four
/// lists (see §9's design note on intrusive lists vs owned collections).
pub type RequestId = u64;

/// Opaque file descriptor identity, used only for batch-splitting equality
/// checks (§4.7) — the engine never opens or reads through it itself.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FdId(pub u64);

/// Opaque lock-owner identity (`lk_owner` in the original), used the same way.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct LockOwner(pub u64);

/// The fop kind a [`Request`] wraps.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Kind {
    /// Buffered or synchronous write.
    Write,
    /// Read.
    Read,
    /// Flush (close-time sync point).
    Flush,
    /// Fsync.
    Fsync,
    /// Stat by path.
    Stat,
    /// Stat by fd.
    Fstat,
    /// Truncate by path.
    Truncate,
    /// Truncate by fd.
    Ftruncate,
    /// Setattr by path.
    SetAttr,
    /// Setattr by fd.
    FSetAttr,
}

impl Kind {
    /// Whether this kind is a write, the only kind that can be `tempted`.
    pub fn is_write(self) -> bool {
        matches!(self, Kind::Write)
    }

    /// Whether a latched inode error is surfaced (and cleared) by this kind,
    /// per §7: writev, flush, fsync, and setattr/fsetattr consume the latch;
    /// reads and other metadata ops do not.
    pub fn surfaces_latched_error(self) -> bool {
        matches!(
            self,
            Kind::Write | Kind::Flush | Kind::Fsync | Kind::SetAttr | Kind::FSetAttr
        )
    }
}

/// The `(offset, size, append)` ordering key used by the conflict oracle.
///
/// `size == 0` means "through end of file" for reads and truncates.
#[derive(Copy, Clone, Debug)]
pub struct OrderingKey {
    /// Start offset. Meaningless (and ignored by the oracle) when `append` is set.
    pub offset: u64,
    /// Byte length, or `0` for "to infinity".
    pub size: u64,
    /// Set for writes to an fd opened with `O_APPEND`: conflicts with every
    /// other write on the inode regardless of overlap.
    pub append: bool,
}

impl OrderingKey {
    /// Inclusive end offset, `u64::MAX` standing in for infinity.
    fn end(&self) -> u64 {
        if self.size == 0 {
            u64::MAX
        } else {
            self.offset.saturating_add(self.size - 1)
        }
    }

    /// Whether `self` and `other`'s byte ranges intersect (§4.1).
    pub fn overlaps(&self, other: &OrderingKey) -> bool {
        self.end() >= other.offset && other.end() >= self.offset
    }
}

/// One admitted operation, in flight somewhere between enqueue and destroy.
pub struct Request {
    /// Per-inode identity, stable for the lifetime of the request.
    pub id: RequestId,
    pub(crate) kind: Kind,
    /// `(offset, size, append)` used by the conflict oracle and the preprocessor.
    pub ordering: OrderingKey,
    /// Currently held payload length; grows as small writes are coalesced into this one.
    pub write_size: u64,
    /// Arrival-time payload length, credited to the window when lied about.
    pub orig_size: u64,
    /// Batch payload length; meaningful only on a dispatched batch's head.
    pub total_size: u64,
    /// Value to hand the caller when lying or on genuine completion.
    pub op_ret: i64,
    /// Errno to hand the caller alongside `op_ret` on failure.
    pub op_errno: Errno,
    /// Outstanding list memberships (wind slot, unwind slot). Freed at zero.
    pub refcount: u32,
    /// True for a buffered-write candidate (`tempted` in the original).
    pub tempted: bool,
    /// True once optimistically acknowledged to the caller.
    pub lied: bool,
    /// True once the lower layer has acknowledged this request.
    pub fulfilled: bool,
    /// True once the preprocessor has sealed this request for dispatch.
    pub go: bool,
    /// Inode liability generation at the moment this request was enqueued.
    pub gen: u64,
    /// Lock owner, used to split batches (writes/reads/ftruncate only).
    pub lock_owner: LockOwner,
    /// Fd identity, used to split batches (writes/reads/ftruncate only).
    pub fd: FdId,
    /// The suspended operation: resumed downward, or unwound to the caller.
    ///
    /// `None` only ever as a transient state inside [`Request::take_stub`];
    /// every live request owns its stub until the moment it is handed off
    /// for good (task resumption) or destroyed.
    pub stub: Option<Stub>,
}

impl Request {
    /// Take the stub out, leaving `None` behind. Used when a request is
    /// being handed off for good: a resumed task (§4.6) or a completed
    /// fulfillment no longer needs the engine to hold onto its arguments or
    /// reply channel.
    pub fn take_stub(&mut self) -> Stub {
        self.stub.take().expect("stub taken twice")
    }
}

use crate::error::Errno;
