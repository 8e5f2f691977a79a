//! A deterministic, in-process [`LowerLayer`] for tests (§8: "testable...
//! with a mock lower layer"). Every call completes synchronously, inline on
//! the calling thread; the engine never assumes asynchrony, so this is
//! sufficient to exercise every scheduling path including re-entrant
//! completion callbacks.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::Errno;
use crate::lower::{Completion, LowerLayer, ReadvCall, WritevCall};
use crate::request::{FdId, LockOwner};
use crate::stub::Attr;

/// One recorded downward `writev` call, flattened to a single contiguous
/// buffer for easy assertion on the bytes the lower layer actually observed.
#[derive(Debug, Clone)]
pub struct RecordedWritev {
    /// Target fd.
    pub fd: FdId,
    /// Lock owner of the batch.
    pub lock_owner: LockOwner,
    /// Concatenation of every buffer in the batch.
    pub data: Vec<u8>,
    /// Starting offset of the batch.
    pub offset: u64,
    /// Raw flags, passed through uninterpreted.
    pub flags: i32,
}

#[derive(Default)]
struct MockState {
    writevs: Vec<RecordedWritev>,
    writev_results: VecDeque<Result<usize, Errno>>,
    reads: Vec<ReadvCall>,
    flushes: Vec<FdId>,
    fsyncs: Vec<(FdId, bool)>,
    call_order: Vec<&'static str>,
}

/// A [`LowerLayer`] that echoes success and records every call it receives.
#[derive(Default)]
pub struct MockLowerLayer {
    state: Mutex<MockState>,
}

impl MockLowerLayer {
    /// A fresh mock that echoes success for every call until told otherwise.
    pub fn new() -> Self {
        MockLowerLayer::default()
    }

    /// Queue the result the next `writev` call should complete with (FIFO).
    /// Once the queue is drained, `writev` falls back to echoing full
    /// success (the number of bytes requested).
    pub fn push_writev_result(&self, result: Result<usize, Errno>) {
        self.state.lock().writev_results.push_back(result);
    }

    /// Every `writev` call received so far, in arrival order.
    pub fn writevs(&self) -> Vec<RecordedWritev> {
        self.state.lock().writevs.clone()
    }

    /// Every `readv` call received so far, in arrival order.
    pub fn reads(&self) -> Vec<ReadvCall> {
        self.state.lock().reads.clone()
    }

    /// Every `flush` call received so far, by fd, in arrival order.
    pub fn flushes(&self) -> Vec<FdId> {
        self.state.lock().flushes.clone()
    }

    /// Every `fsync` call received so far, as `(fd, datasync)`, in arrival order.
    pub fn fsyncs(&self) -> Vec<(FdId, bool)> {
        self.state.lock().fsyncs.clone()
    }

    /// Tags (`"writev"`, `"read"`, `"flush"`, `"fsync"`) across every call
    /// this mock received, in arrival order — for asserting cross-kind
    /// ordering that the per-kind accessors above can't show on their own.
    pub fn call_order(&self) -> Vec<&'static str> {
        self.state.lock().call_order.clone()
    }
}

impl LowerLayer for MockLowerLayer {
    fn writev(&self, call: WritevCall, complete: Completion<usize>) {
        let requested: usize = call.buffers.iter().map(|b| b.len()).sum();
        let result = {
            let mut state = self.state.lock();
            state.writevs.push(RecordedWritev {
                fd: call.fd,
                lock_owner: call.lock_owner,
                data: call.buffers.concat(),
                offset: call.offset,
                flags: call.flags,
            });
            state.call_order.push("writev");
            state.writev_results.pop_front().unwrap_or(Ok(requested))
        };
        complete(result);
    }

    fn readv(&self, call: ReadvCall, complete: Completion<Vec<u8>>) {
        let mut state = self.state.lock();
        state.reads.push(call);
        state.call_order.push("read");
        drop(state);
        complete(Ok(vec![0u8; call.size as usize]));
    }

    fn flush(&self, fd: FdId, complete: Completion<()>) {
        let mut state = self.state.lock();
        state.flushes.push(fd);
        state.call_order.push("flush");
        drop(state);
        complete(Ok(()));
    }

    fn fsync(&self, fd: FdId, datasync: bool, complete: Completion<()>) {
        let mut state = self.state.lock();
        state.fsyncs.push((fd, datasync));
        state.call_order.push("fsync");
        drop(state);
        complete(Ok(()));
    }

    fn stat(&self, complete: Completion<Attr>) {
        complete(Ok(Attr));
    }

    fn fstat(&self, _fd: FdId, complete: Completion<Attr>) {
        complete(Ok(Attr));
    }

    fn truncate(&self, _offset: u64, complete: Completion<Attr>) {
        complete(Ok(Attr));
    }

    fn ftruncate(&self, _fd: FdId, _offset: u64, complete: Completion<Attr>) {
        complete(Ok(Attr));
    }

    fn setattr(&self, _valid: u32, complete: Completion<Attr>) {
        complete(Ok(Attr));
    }

    fn fsetattr(&self, _fd: FdId, _valid: u32, complete: Completion<Attr>) {
        complete(Ok(Attr));
    }
}
