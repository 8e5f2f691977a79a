//! Suspended operations.
//!
//! §9's design note asks for "either a first-class suspended-call value ...
//! or an explicit state enum carrying per-fop argument variants". Since the
//! set of fops is small and fixed, [`Stub`] takes the latter form: one
//! variant per fop kind, each carrying exactly the arguments the original's
//! `call_stub_t` would have captured plus a [`ReplyChannel`] half used to
//! complete the caller's request exactly once, whether by lying, by genuine
//! completion, or by a latched error.

use std::sync::mpsc;

use crate::error::Errno;
use crate::request::{FdId, LockOwner};

/// Filesystem attributes returned by metadata operations.
///
/// The engine only ever passes this through; it never inspects or
/// constructs one beyond this opaque placeholder; real attribute contents
/// are the translator plumbing's concern (§1, "out of scope").
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct Attr;

/// The receiving half of a [`ReplyChannel`], held by whoever is waiting on
/// the result of a suspended operation (typically the public API call that
/// created the request).
pub struct ReplyReceiver<T>(mpsc::Receiver<Result<T, Errno>>);

impl<T> ReplyReceiver<T> {
    /// Block until the paired [`ReplyChannel`] sends a result.
    ///
    /// Only fails if the channel was dropped without ever sending, which the
    /// engine treats as a bug (a request must always be unwound or resumed
    /// exactly once) rather than something callers need to handle.
    pub fn recv(self) -> Result<T, Errno> {
        self.0
            .recv()
            .unwrap_or_else(|_| panic!("reply channel dropped without a reply"))
    }
}

/// A one-shot reply channel: sent to exactly once, either by the unwinder
/// (lying) or by the lower layer's completion callback (genuine forward).
pub struct ReplyChannel<T>(mpsc::Sender<Result<T, Errno>>);

impl<T> ReplyChannel<T> {
    /// Create a connected `(ReplyChannel, ReplyReceiver)` pair.
    pub fn new() -> (ReplyChannel<T>, ReplyReceiver<T>) {
        let (tx, rx) = mpsc::channel();
        (ReplyChannel(tx), ReplyReceiver(rx))
    }

    /// Complete the suspended operation. The receiver may already have given
    /// up (e.g. the calling thread panicked); that is not this engine's
    /// concern, so the send error is logged and dropped.
    pub fn send(self, result: Result<T, Errno>) {
        if self.0.send(result).is_err() {
            log::debug!("reply receiver gone; dropping completion");
        }
    }
}

/// Arguments for a (possibly already coalesced) buffered or synchronous write.
pub struct WriteArgs {
    /// Target fd.
    pub fd: FdId,
    /// Lock owner, for batch splitting.
    pub lock_owner: LockOwner,
    /// Payload. A single contiguous buffer: the preprocessor always collapses
    /// a holder and everything merged into it down to one buffer (§4.3).
    pub data: Vec<u8>,
    /// Starting offset. Ignored by the lower layer for append writes; the
    /// transport is expected to honor `O_APPEND` semantics itself.
    pub offset: u64,
    /// Raw open/write flags, passed through uninterpreted.
    pub flags: i32,
}

/// Arguments for a read.
pub struct ReadArgs {
    /// Source fd.
    pub fd: FdId,
    /// Requested length.
    pub size: u64,
    /// Starting offset.
    pub offset: u64,
}

/// The suspended form of one admitted operation.
///
/// Resuming a stub means handing its arguments to the matching
/// [`crate::lower::LowerLayer`] method and forwarding that method's result
/// into its `reply` channel. Unwinding means sending a value into `reply`
/// directly, without ever touching the lower layer.
pub enum Stub {
    /// A write, buffered or synchronous.
    Write {
        /// Wire-call arguments, mutated in place by coalescing.
        args: WriteArgs,
        /// Completed either by the unwinder (lie) or, for non-tempted
        /// writes, by the lower layer's completion callback.
        ///
        /// `None` after the lie (or an absorbed merge's reflected lie) has
        /// been sent: a tempted write keeps its args alive in the liability
        /// set for dispatch long after its caller has already been answered.
        reply: Option<ReplyChannel<usize>>,
    },
    /// A read.
    Read {
        /// Wire-call arguments.
        args: ReadArgs,
        /// Completed by the lower layer.
        reply: ReplyChannel<Vec<u8>>,
    },
    /// A flush.
    Flush {
        /// Target fd.
        fd: FdId,
        /// Completed immediately (flush-behind) or by the lower layer.
        reply: ReplyChannel<()>,
    },
    /// An fsync.
    Fsync {
        /// Target fd.
        fd: FdId,
        /// Whether this is a data-only sync.
        datasync: bool,
        /// Completed by the lower layer.
        reply: ReplyChannel<()>,
    },
    /// A stat by path.
    Stat {
        /// Completed by the lower layer.
        reply: ReplyChannel<Attr>,
    },
    /// A stat by fd.
    Fstat {
        /// Target fd.
        fd: FdId,
        /// Completed by the lower layer.
        reply: ReplyChannel<Attr>,
    },
    /// A truncate by path.
    Truncate {
        /// New size.
        offset: u64,
        /// Completed by the lower layer.
        reply: ReplyChannel<Attr>,
    },
    /// A truncate by fd.
    Ftruncate {
        /// Target fd.
        fd: FdId,
        /// New size.
        offset: u64,
        /// Completed by the lower layer.
        reply: ReplyChannel<Attr>,
    },
    /// A setattr by path.
    SetAttr {
        /// Attribute mask/values; opaque to the engine.
        valid: u32,
        /// Completed by the lower layer.
        reply: ReplyChannel<Attr>,
    },
    /// A setattr by fd.
    FSetAttr {
        /// Target fd.
        fd: FdId,
        /// Attribute mask/values; opaque to the engine.
        valid: u32,
        /// Completed by the lower layer.
        reply: ReplyChannel<Attr>,
    },
}

impl Stub {
    /// Take a write's reply channel, if it is still attached. `None` for
    /// every non-write variant and for a write whose reply was already sent
    /// (the absorbing side of a merge never resends it; the temptation-list
    /// walk does, exactly once).
    pub fn take_write_reply(&mut self) -> Option<ReplyChannel<usize>> {
        match self {
            Stub::Write { reply, .. } => reply.take(),
            _ => None,
        }
    }
}
