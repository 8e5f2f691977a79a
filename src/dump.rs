//! Observability (§6.4): a snapshot of one inode's write-behind state,
//! suitable for the surrounding translator's diagnostic dump.

use crate::error::Errno;
use crate::request::{InodeId, Kind};

/// One line of the per-request table in an [`InodeDump`].
#[derive(Debug, Clone, Copy)]
pub struct RequestDump {
    /// The fop this request wraps.
    pub kind: Kind,
    /// Outstanding list memberships; the request is destroyed at zero.
    pub refcount: u32,
    /// Whether the request has already left `todo` (resumed or batched).
    pub wound: bool,
    /// Current held payload length (post-coalescing, for writes).
    pub size: u64,
    /// Ordering-key offset.
    pub offset: u64,
    /// Whether this write has been optimistically acknowledged.
    pub lied: bool,
    /// Whether this write conflicts with every other write on the inode.
    pub append: bool,
    /// Whether the lower layer has acknowledged this request.
    pub fulfilled: bool,
    /// Whether the preprocessor has sealed this request for dispatch.
    pub go: bool,
}

/// A point-in-time snapshot of one inode's write-behind state (§6.4).
#[derive(Debug, Clone)]
pub struct InodeDump {
    /// The inode this snapshot describes.
    pub inode: InodeId,
    /// Path of the inode, as supplied by the caller — the engine itself has
    /// no notion of filesystem paths (§1: out of scope, owned by the
    /// surrounding translator).
    pub path: Option<String>,
    /// Configured per-inode window bound.
    pub window_conf: u64,
    /// Current sum of `orig_size` over the liability set.
    pub window_current: u64,
    /// `-1` if an error is latched, `0` otherwise.
    pub op_ret: i32,
    /// The latched error, if any.
    pub op_errno: Option<Errno>,
    /// One entry per request currently on `all`, in insertion order.
    pub requests: Vec<RequestDump>,
}
