//! The downward API (§6.1): the out-of-scope transport layer the engine
//! forwards resumed and batched operations to.
//!
//! Every method takes ownership of a [`Completion`] and must invoke it
//! exactly once — synchronously inline, or later from any thread. The engine
//! never holds its inode lock while a `LowerLayer` method runs (§5), so
//! implementations are free to call back from the same stack frame or from a
//! background thread without risking deadlock.

use crate::error::Errno;
use crate::request::{FdId, LockOwner};
use crate::stub::Attr;

/// A boxed one-shot completion callback. Implementations of [`LowerLayer`]
/// must call this exactly once with the operation's outcome.
pub type Completion<T> = Box<dyn FnOnce(Result<T, Errno>) + Send>;

/// Arguments for a downward batched or single writev.
#[derive(Debug)]
pub struct WritevCall {
    /// Target fd.
    pub fd: FdId,
    /// Lock owner of the batch (all members share one).
    pub lock_owner: LockOwner,
    /// Concatenated buffers, one per batch member, capped at
    /// [`crate::config::MAX_VECTOR_COUNT`].
    pub buffers: Vec<Vec<u8>>,
    /// Starting offset of the batch.
    pub offset: u64,
    /// Raw flags, passed through uninterpreted.
    pub flags: i32,
}

/// Arguments for a downward readv.
#[derive(Debug, Clone, Copy)]
pub struct ReadvCall {
    /// Source fd.
    pub fd: FdId,
    /// Requested length.
    pub size: u64,
    /// Starting offset.
    pub offset: u64,
}

/// The lower transport the engine forwards operations to (§6.1).
///
/// Out of scope per §1: this trait is the entire interface the core needs
/// from "the lower transport that actually performs remote reads/writes".
pub trait LowerLayer: Send + Sync {
    /// Submit a (possibly batched) write. `complete` receives the number of
    /// bytes actually written on success; the engine treats
    /// `written < total requested` as a short write (§4.7, §7).
    fn writev(&self, call: WritevCall, complete: Completion<usize>);

    /// Submit a read.
    fn readv(&self, call: ReadvCall, complete: Completion<Vec<u8>>);

    /// Submit a flush.
    fn flush(&self, fd: FdId, complete: Completion<()>);

    /// Submit an fsync.
    fn fsync(&self, fd: FdId, datasync: bool, complete: Completion<()>);

    /// Submit a stat by path.
    fn stat(&self, complete: Completion<Attr>);

    /// Submit a stat by fd.
    fn fstat(&self, fd: FdId, complete: Completion<Attr>);

    /// Submit a truncate by path.
    fn truncate(&self, offset: u64, complete: Completion<Attr>);

    /// Submit a truncate by fd.
    fn ftruncate(&self, fd: FdId, offset: u64, complete: Completion<Attr>);

    /// Submit a setattr by path.
    fn setattr(&self, valid: u32, complete: Completion<Attr>);

    /// Submit a setattr by fd.
    fn fsetattr(&self, fd: FdId, valid: u32, complete: Completion<Attr>);
}

/// Lets callers hand `WriteBehind` an `Arc`-shared lower layer and keep their
/// own handle to it (e.g. a test's mock, inspected after the engine is done
/// with it), rather than giving up ownership entirely.
impl<T: LowerLayer + ?Sized> LowerLayer for std::sync::Arc<T> {
    fn writev(&self, call: WritevCall, complete: Completion<usize>) {
        (**self).writev(call, complete)
    }

    fn readv(&self, call: ReadvCall, complete: Completion<Vec<u8>>) {
        (**self).readv(call, complete)
    }

    fn flush(&self, fd: FdId, complete: Completion<()>) {
        (**self).flush(fd, complete)
    }

    fn fsync(&self, fd: FdId, datasync: bool, complete: Completion<()>) {
        (**self).fsync(fd, datasync, complete)
    }

    fn stat(&self, complete: Completion<Attr>) {
        (**self).stat(complete)
    }

    fn fstat(&self, fd: FdId, complete: Completion<Attr>) {
        (**self).fstat(fd, complete)
    }

    fn truncate(&self, offset: u64, complete: Completion<Attr>) {
        (**self).truncate(offset, complete)
    }

    fn ftruncate(&self, fd: FdId, offset: u64, complete: Completion<Attr>) {
        (**self).ftruncate(fd, offset, complete)
    }

    fn setattr(&self, valid: u32, complete: Completion<Attr>) {
        (**self).setattr(valid, complete)
    }

    fn fsetattr(&self, fd: FdId, valid: u32, complete: Completion<Attr>) {
        (**self).fsetattr(fd, valid, complete)
    }
}
