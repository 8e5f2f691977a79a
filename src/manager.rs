//! [`WriteBehind`]: the public per-instance engine that ties the inode
//! table, the scheduling kernel ([`crate::engine`]), and the batching
//! fulfiller ([`crate::fulfill`]) together behind one mutex per inode.
//!
//! Every public method either completes synchronously (a bypassed read or
//! metadata op, an immediate error) or blocks the calling thread on a
//! [`crate::stub::ReplyReceiver`] that a later `process_queue` pass —
//! possibly run from a completion callback on a different thread — fires.
//! No inode lock is ever held while that blocking `recv()` runs, and none is
//! held across a call into [`crate::lower::LowerLayer`] (§5).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::WriteBehindConfig;
use crate::dump::{InodeDump, RequestDump};
use crate::engine;
use crate::error::Errno;
use crate::fulfill;
use crate::inode::InodeState;
use crate::lower::{LowerLayer, ReadvCall};
use crate::request::{FdId, InodeId, Kind, LockOwner, OrderingKey, Request, RequestId};
use crate::stub::{Attr, ReadArgs, ReplyChannel, Stub, WriteArgs};

/// Per-instance write-behind engine, generic over the lower transport it
/// forwards resumed and batched operations to.
///
/// Always held behind an `Arc`: completion callbacks submitted to `L` close
/// over a clone of it so they can re-enter `process_queue` on whatever
/// thread the lower layer chooses to call back on.
pub struct WriteBehind<L> {
    config: RwLock<WriteBehindConfig>,
    page_size: u64,
    lower: L,
    inodes: RwLock<HashMap<InodeId, Arc<Mutex<InodeState>>>>,
}

impl<L> std::fmt::Debug for WriteBehind<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBehind")
            .field("config", &*self.config.read())
            .field("page_size", &self.page_size)
            .field("inodes", &self.inodes.read().len())
            .finish_non_exhaustive()
    }
}

/// Whether a write should be buffered (`tempted`) given the fd's open flags,
/// the call's own flags, and whether `strict-O_DIRECT` is configured.
///
/// Mirrors the original's `wb_disabled` computation: `O_SYNC`/`O_DSYNC` on
/// the fd always disable write-behind; `O_DIRECT` on the fd only does so
/// under `strict-O_DIRECT`; any of the three on the individual call always
/// does, since "the O_DIRECT flag in params of writev must always be
/// honored".
fn write_behind_disabled(fd_flags: i32, call_flags: i32, strict_o_direct: bool) -> bool {
    let o_direct = if strict_o_direct { libc::O_DIRECT } else { 0 };
    if fd_flags & (libc::O_SYNC | libc::O_DSYNC | o_direct) != 0 {
        return true;
    }
    if call_flags & (libc::O_SYNC | libc::O_DSYNC | libc::O_DIRECT) != 0 {
        return true;
    }
    false
}

impl<L: LowerLayer + 'static> WriteBehind<L> {
    /// Build an engine instance around `lower`, the single required child
    /// transport (§6.3: "Startup requires exactly one child layer"), taking
    /// `page_size` from the host's system page size.
    pub fn new(config: WriteBehindConfig, lower: L) -> Arc<Self> {
        Self::with_page_size(config, lower, page_size::get() as u64)
    }

    /// As [`Self::new`], but with an explicit page size (tests use this to
    /// avoid depending on the host's actual page size).
    pub fn with_page_size(config: WriteBehindConfig, lower: L, page_size: u64) -> Arc<Self> {
        Arc::new(WriteBehind {
            config: RwLock::new(config),
            page_size,
            lower,
            inodes: RwLock::new(HashMap::new()),
        })
    }

    /// Swap the live configuration (§6.3: options are "reconfigurable at
    /// runtime"). Per-inode window bounds already snapshotted at inode
    /// creation are unaffected; every other option is read fresh on each
    /// `process_queue` pass.
    pub fn reconfigure(&self, config: WriteBehindConfig) {
        *self.config.write() = config;
    }

    pub(crate) fn lower(&self) -> &L {
        &self.lower
    }

    fn config_snapshot(&self) -> WriteBehindConfig {
        *self.config.read()
    }

    fn inode_state(self: &Arc<Self>, inode: InodeId) -> Arc<Mutex<InodeState>> {
        if let Some(existing) = self.inodes.read().get(&inode) {
            return Arc::clone(existing);
        }
        let cfg = self.config_snapshot();
        let mut inodes = self.inodes.write();
        Arc::clone(
            inodes
                .entry(inode)
                .or_insert_with(|| Arc::new(Mutex::new(InodeState::new(inode, &cfg)))),
        )
    }

    /// As [`Self::inode_state`], but never creates state: used by the
    /// operations that must bypass the queue entirely when nothing has ever
    /// been buffered for this inode (§4.8).
    fn existing_inode_state(self: &Arc<Self>, inode: InodeId) -> Option<Arc<Mutex<InodeState>>> {
        self.inodes.read().get(&inode).cloned()
    }

    /// Buffered or synchronous write (§4.2).
    #[allow(clippy::too_many_arguments)]
    pub fn write(
        self: &Arc<Self>,
        inode: InodeId,
        fd: FdId,
        lock_owner: LockOwner,
        offset: u64,
        data: Vec<u8>,
        fd_flags: i32,
        call_flags: i32,
    ) -> Result<usize, Errno> {
        let append = fd_flags & libc::O_APPEND != 0;
        let size = data.len() as u64;
        let state_handle = self.inode_state(inode);
        let cfg = self.config_snapshot();
        let tempted = !write_behind_disabled(fd_flags, call_flags, cfg.strict_o_direct());

        let rx = {
            let mut state = state_handle.lock();
            if let Some(err) = state.take_latched_error() {
                return Err(err);
            }
            let id = state.next_id();
            let (reply, rx) = ReplyChannel::new();
            let req = Request {
                id,
                kind: Kind::Write,
                ordering: OrderingKey { offset, size, append },
                write_size: size,
                orig_size: size,
                total_size: 0,
                op_ret: size as i64,
                op_errno: Errno(0),
                refcount: 0,
                tempted,
                lied: false,
                fulfilled: false,
                go: false,
                gen: 0,
                lock_owner,
                fd,
                stub: Some(Stub::Write {
                    args: WriteArgs {
                        fd,
                        lock_owner,
                        data,
                        offset,
                        flags: call_flags,
                    },
                    reply: Some(reply),
                }),
            };
            state.enqueue(req);
            rx
        };

        self.process_queue_external(inode);
        rx.recv()
    }

    /// Read (§4.8). Bypasses the queue entirely if no inode state exists yet.
    pub fn read(self: &Arc<Self>, inode: InodeId, fd: FdId, offset: u64, size: u64) -> Result<Vec<u8>, Errno> {
        let Some(state_handle) = self.existing_inode_state(inode) else {
            let (reply, rx) = ReplyChannel::new();
            self.lower
                .readv(ReadvCall { fd, size, offset }, Box::new(move |r| reply.send(r)));
            return rx.recv();
        };

        let rx = {
            let mut state = state_handle.lock();
            let id = state.next_id();
            let (reply, rx) = ReplyChannel::new();
            let req = Request {
                id,
                kind: Kind::Read,
                ordering: OrderingKey {
                    offset,
                    size,
                    append: false,
                },
                write_size: 0,
                orig_size: 0,
                total_size: 0,
                op_ret: 0,
                op_errno: Errno(0),
                refcount: 0,
                tempted: false,
                lied: false,
                fulfilled: false,
                go: false,
                gen: 0,
                lock_owner: LockOwner(0),
                fd,
                stub: Some(Stub::Read {
                    args: ReadArgs { fd, size, offset },
                    reply,
                }),
            };
            state.enqueue(req);
            rx
        };

        self.process_queue_external(inode);
        rx.recv()
    }

    /// Flush (§4.8). Observes `flush-behind`: if enabled, completes to the
    /// caller immediately (after surfacing any latched error) while a
    /// background copy of the call still drains through the queue so it
    /// waits on preceding liabilities exactly as a foreground flush would.
    pub fn flush(self: &Arc<Self>, inode: InodeId, fd: FdId) -> Result<(), Errno> {
        let Some(state_handle) = self.existing_inode_state(inode) else {
            let (reply, rx) = ReplyChannel::new();
            self.lower.flush(fd, Box::new(move |r| reply.send(r)));
            return rx.recv();
        };

        let cfg = self.config_snapshot();
        let rx = {
            let mut state = state_handle.lock();
            if let Some(err) = state.take_latched_error() {
                return Err(err);
            }
            let id = state.next_id();
            let (reply, rx) = ReplyChannel::new();
            let req = self.metadata_request(id, Kind::Flush, fd, Stub::Flush { fd, reply });
            state.enqueue(req);
            rx
        };

        self.process_queue_external(inode);

        if cfg.flush_behind() {
            Ok(())
        } else {
            rx.recv()
        }
    }

    /// Fsync (§4.8, §7: surfaces the latched error).
    pub fn fsync(self: &Arc<Self>, inode: InodeId, fd: FdId, datasync: bool) -> Result<(), Errno> {
        let Some(state_handle) = self.existing_inode_state(inode) else {
            let (reply, rx) = ReplyChannel::new();
            self.lower.fsync(fd, datasync, Box::new(move |r| reply.send(r)));
            return rx.recv();
        };

        let rx = {
            let mut state = state_handle.lock();
            if let Some(err) = state.take_latched_error() {
                return Err(err);
            }
            let id = state.next_id();
            let (reply, rx) = ReplyChannel::new();
            let req = self.metadata_request(id, Kind::Fsync, fd, Stub::Fsync { fd, datasync, reply });
            state.enqueue(req);
            rx
        };

        self.process_queue_external(inode);
        rx.recv()
    }

    /// Stat by path (§4.8). Does not consume the latched error.
    pub fn stat(self: &Arc<Self>, inode: InodeId) -> Result<Attr, Errno> {
        let Some(state_handle) = self.existing_inode_state(inode) else {
            let (reply, rx) = ReplyChannel::new();
            self.lower.stat(Box::new(move |r| reply.send(r)));
            return rx.recv();
        };
        let rx = {
            let mut state = state_handle.lock();
            let id = state.next_id();
            let (reply, rx) = ReplyChannel::new();
            let req = self.metadata_request(id, Kind::Stat, FdId(0), Stub::Stat { reply });
            state.enqueue(req);
            rx
        };
        self.process_queue_external(inode);
        rx.recv()
    }

    /// Stat by fd (§4.8). Does not consume the latched error.
    pub fn fstat(self: &Arc<Self>, inode: InodeId, fd: FdId) -> Result<Attr, Errno> {
        let Some(state_handle) = self.existing_inode_state(inode) else {
            let (reply, rx) = ReplyChannel::new();
            self.lower.fstat(fd, Box::new(move |r| reply.send(r)));
            return rx.recv();
        };
        let rx = {
            let mut state = state_handle.lock();
            let id = state.next_id();
            let (reply, rx) = ReplyChannel::new();
            let req = self.metadata_request(id, Kind::Fstat, fd, Stub::Fstat { fd, reply });
            state.enqueue(req);
            rx
        };
        self.process_queue_external(inode);
        rx.recv()
    }

    /// Truncate by path (§4.8).
    pub fn truncate(self: &Arc<Self>, inode: InodeId, offset: u64) -> Result<Attr, Errno> {
        let Some(state_handle) = self.existing_inode_state(inode) else {
            let (reply, rx) = ReplyChannel::new();
            self.lower.truncate(offset, Box::new(move |r| reply.send(r)));
            return rx.recv();
        };
        let rx = {
            let mut state = state_handle.lock();
            let id = state.next_id();
            let (reply, rx) = ReplyChannel::new();
            let mut req = self.metadata_request(id, Kind::Truncate, FdId(0), Stub::Truncate { offset, reply });
            req.ordering.offset = offset;
            state.enqueue(req);
            rx
        };
        self.process_queue_external(inode);
        rx.recv()
    }

    /// Truncate by fd (§4.8).
    pub fn ftruncate(self: &Arc<Self>, inode: InodeId, fd: FdId, offset: u64) -> Result<Attr, Errno> {
        let Some(state_handle) = self.existing_inode_state(inode) else {
            let (reply, rx) = ReplyChannel::new();
            self.lower.ftruncate(fd, offset, Box::new(move |r| reply.send(r)));
            return rx.recv();
        };
        let rx = {
            let mut state = state_handle.lock();
            let id = state.next_id();
            let (reply, rx) = ReplyChannel::new();
            let mut req = self.metadata_request(id, Kind::Ftruncate, fd, Stub::Ftruncate { fd, offset, reply });
            req.ordering.offset = offset;
            state.enqueue(req);
            rx
        };
        self.process_queue_external(inode);
        rx.recv()
    }

    /// Setattr by path (§4.8, §7: surfaces the latched error).
    pub fn setattr(self: &Arc<Self>, inode: InodeId, valid: u32) -> Result<Attr, Errno> {
        let Some(state_handle) = self.existing_inode_state(inode) else {
            let (reply, rx) = ReplyChannel::new();
            self.lower.setattr(valid, Box::new(move |r| reply.send(r)));
            return rx.recv();
        };
        let rx = {
            let mut state = state_handle.lock();
            if let Some(err) = state.take_latched_error() {
                return Err(err);
            }
            let id = state.next_id();
            let (reply, rx) = ReplyChannel::new();
            let req = self.metadata_request(id, Kind::SetAttr, FdId(0), Stub::SetAttr { valid, reply });
            state.enqueue(req);
            rx
        };
        self.process_queue_external(inode);
        rx.recv()
    }

    /// Setattr by fd (§4.8, §7: surfaces the latched error).
    pub fn fsetattr(self: &Arc<Self>, inode: InodeId, fd: FdId, valid: u32) -> Result<Attr, Errno> {
        let Some(state_handle) = self.existing_inode_state(inode) else {
            let (reply, rx) = ReplyChannel::new();
            self.lower.fsetattr(fd, valid, Box::new(move |r| reply.send(r)));
            return rx.recv();
        };
        let rx = {
            let mut state = state_handle.lock();
            if let Some(err) = state.take_latched_error() {
                return Err(err);
            }
            let id = state.next_id();
            let (reply, rx) = ReplyChannel::new();
            let req = self.metadata_request(id, Kind::FSetAttr, fd, Stub::FSetAttr { fd, valid, reply });
            state.enqueue(req);
            rx
        };
        self.process_queue_external(inode);
        rx.recv()
    }

    /// Build the common shape of a non-write, non-read request: `(0, 0)`
    /// ordering key, non-tempted (§4.2 step 3, "other metadata ops").
    fn metadata_request(&self, id: RequestId, kind: Kind, fd: FdId, stub: Stub) -> Request {
        Request {
            id,
            kind,
            ordering: OrderingKey {
                offset: 0,
                size: 0,
                append: false,
            },
            write_size: 0,
            orig_size: 0,
            total_size: 0,
            op_ret: 0,
            op_errno: Errno(0),
            refcount: 0,
            tempted: false,
            lied: false,
            fulfilled: false,
            go: false,
            gen: 0,
            lock_owner: LockOwner(0),
            fd,
            stub: Some(stub),
        }
    }

    /// Tear down an inode's state. A correctness requirement of the
    /// surrounding system: it must have already quiesced the inode (§5,
    /// §8 Invariant 6). Panics in debug builds if it has not; in release,
    /// leaves the (non-empty) state in place rather than leaking silently.
    pub fn forget(self: &Arc<Self>, inode: InodeId) {
        let mut inodes = self.inodes.write();
        if let Some(state_handle) = inodes.get(&inode) {
            let quiesced = state_handle.lock().is_quiesced();
            debug_assert!(quiesced, "forget on inode {inode} with work still outstanding");
            if quiesced {
                inodes.remove(&inode);
            }
        }
    }

    /// Snapshot this inode's state for the surrounding translator's
    /// diagnostic dump (§6.4). `path` is supplied by the caller — the engine
    /// has no notion of filesystem paths.
    pub fn dump(self: &Arc<Self>, inode: InodeId, path: Option<String>) -> Option<InodeDump> {
        let state_handle = self.existing_inode_state(inode)?;
        let state = state_handle.lock();
        let op_errno = state.peek_latched_error();
        Some(InodeDump {
            inode,
            path,
            window_conf: state.window_conf(),
            window_current: state.window_current(),
            op_ret: if op_errno.is_some() { -1 } else { 0 },
            op_errno,
            requests: state
                .iter_all()
                .map(|req| RequestDump {
                    kind: req.kind,
                    refcount: req.refcount,
                    wound: !state.is_on_todo(req.id),
                    size: req.write_size,
                    offset: req.ordering.offset,
                    lied: req.lied,
                    append: req.ordering.append,
                    fulfilled: req.fulfilled,
                    go: req.go,
                })
                .collect(),
        })
    }

    /// Re-entry point for completion callbacks (§4.7, §6.1: "completion
    /// callbacks may run on any thread and may re-enter the engine").
    pub(crate) fn process_queue_external(self: &Arc<Self>, inode: InodeId) {
        if let Some(state_handle) = self.existing_inode_state(inode) {
            self.process_queue(inode, &state_handle);
        }
    }

    /// One pass of preprocess → pick winds → pick unwinds → do unwinds → do
    /// winds → fulfill (§2), run with the inode lock released before every
    /// upward or downward call.
    fn process_queue(self: &Arc<Self>, inode: InodeId, state_handle: &Arc<Mutex<InodeState>>) {
        let cfg = self.config_snapshot();

        let (lies, tasks, liabilities) = {
            let mut state = state_handle.lock();
            engine::preprocess_winds(&mut state, self.page_size, cfg.trickling_writes(), cfg.strict_write_ordering());

            let mut tasks = Vec::new();
            let mut liabilities = Vec::new();
            engine::pick_winds(&mut state, cfg.strict_write_ordering(), &mut tasks, &mut liabilities);

            let mut lies = Vec::new();
            engine::pick_unwinds(&mut state, &mut lies);

            (lies, tasks, liabilities)
        };

        self.do_unwinds(state_handle, lies);
        self.do_winds(inode, state_handle, tasks);
        fulfill::dispatch(self, inode, state_handle, liabilities, cfg.aggregate_size());
    }

    /// Complete every lied-about write to its caller (§4.5), outside the
    /// inode lock, then release each entry's unwind reference.
    fn do_unwinds(&self, state_handle: &Arc<Mutex<InodeState>>, ids: Vec<RequestId>) {
        if ids.is_empty() {
            return;
        }
        let mut replies = Vec::with_capacity(ids.len());
        {
            let mut state = state_handle.lock();
            for &id in &ids {
                if let Some(req) = state.get_mut(id) {
                    let op_ret = req.op_ret;
                    let op_errno = req.op_errno;
                    if let Some(stub) = req.stub.as_mut() {
                        if let Some(reply) = stub.take_write_reply() {
                            replies.push((reply, op_ret, op_errno));
                        }
                    }
                }
                state.ref_dec(id);
            }
        }
        for (reply, op_ret, op_errno) in replies {
            let result = if op_errno.raw() == 0 { Ok(op_ret as usize) } else { Err(op_errno) };
            reply.send(result);
        }
    }

    /// Resume every picked non-tempted request downward (§4.6), releasing
    /// its wind reference immediately — the lower layer's own completion
    /// path replies to the caller, not `process_queue`.
    fn do_winds(self: &Arc<Self>, inode: InodeId, state_handle: &Arc<Mutex<InodeState>>, ids: Vec<RequestId>) {
        for id in ids {
            let stub = {
                let mut state = state_handle.lock();
                let stub = state.get_mut(id).map(|req| req.take_stub());
                state.ref_dec(id);
                stub
            };
            if let Some(stub) = stub {
                self.resume(inode, stub);
            }
        }
    }

    fn resume(&self, _inode: InodeId, stub: Stub) {
        match stub {
            Stub::Write { args, reply } => {
                let WriteArgs {
                    fd,
                    lock_owner,
                    data,
                    offset,
                    flags,
                } = args;
                let call = crate::lower::WritevCall {
                    fd,
                    lock_owner,
                    buffers: vec![data],
                    offset,
                    flags,
                };
                if let Some(reply) = reply {
                    self.lower.writev(call, Box::new(move |r| reply.send(r)));
                }
            }
            Stub::Read { args, reply } => {
                self.lower.readv(
                    ReadvCall {
                        fd: args.fd,
                        size: args.size,
                        offset: args.offset,
                    },
                    Box::new(move |r| reply.send(r)),
                );
            }
            Stub::Flush { fd, reply } => {
                self.lower.flush(fd, Box::new(move |r| reply.send(r)));
            }
            Stub::Fsync { fd, datasync, reply } => {
                self.lower.fsync(fd, datasync, Box::new(move |r| reply.send(r)));
            }
            Stub::Stat { reply } => {
                self.lower.stat(Box::new(move |r| reply.send(r)));
            }
            Stub::Fstat { fd, reply } => {
                self.lower.fstat(fd, Box::new(move |r| reply.send(r)));
            }
            Stub::Truncate { offset, reply } => {
                self.lower.truncate(offset, Box::new(move |r| reply.send(r)));
            }
            Stub::Ftruncate { fd, offset, reply } => {
                self.lower.ftruncate(fd, offset, Box::new(move |r| reply.send(r)));
            }
            Stub::SetAttr { valid, reply } => {
                self.lower.setattr(valid, Box::new(move |r| reply.send(r)));
            }
            Stub::FSetAttr { fd, valid, reply } => {
                self.lower.fsetattr(fd, valid, Box::new(move |r| reply.send(r)));
            }
        }
    }
}
