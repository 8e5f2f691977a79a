//! Batched writev dispatch (§4.7): groups consecutive liability writes that
//! share an fd, lock owner, and contiguous offsets into one downward
//! `writev`, submits it, and on completion marks every member fulfilled and
//! propagates any failure onto the inode's latched error.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::MAX_VECTOR_COUNT;
use crate::engine;
use crate::error::Errno;
use crate::inode::InodeState;
use crate::lower::{LowerLayer, WritevCall};
use crate::manager::WriteBehind;
use crate::request::{FdId, InodeId, LockOwner, RequestId};
use crate::stub::Stub;

struct Batch {
    members: Vec<RequestId>,
    fd: FdId,
    lock_owner: LockOwner,
    offset: u64,
    next_offset: u64,
    total: u64,
    flags: i32,
}

impl Batch {
    fn start(state: &InodeState, id: RequestId) -> Batch {
        let req = state.get(id).expect("liability id must still be live");
        let flags = match req.stub.as_ref() {
            Some(Stub::Write { args, .. }) => args.flags,
            _ => 0,
        };
        Batch {
            members: vec![id],
            fd: req.fd,
            lock_owner: req.lock_owner,
            offset: req.ordering.offset,
            next_offset: req.ordering.offset + req.write_size,
            total: req.write_size,
            flags,
        }
    }

    fn accepts(&self, state: &InodeState, id: RequestId, aggregate_size: u64) -> bool {
        if self.members.len() >= MAX_VECTOR_COUNT {
            return false;
        }
        let req = state.get(id).expect("liability id must still be live");
        req.fd == self.fd
            && req.lock_owner == self.lock_owner
            && req.ordering.offset == self.next_offset
            && self.total + req.write_size <= aggregate_size
    }

    fn push(&mut self, state: &InodeState, id: RequestId) {
        let req = state.get(id).expect("liability id must still be live");
        self.next_offset += req.write_size;
        self.total += req.write_size;
        self.members.push(id);
    }
}

/// Split `liabilities` (already picked by [`engine::pick_winds`], in `todo`
/// order) into batches per §4.7's boundary rules.
fn build_batches(state: &InodeState, liabilities: &[RequestId], aggregate_size: u64) -> Vec<Batch> {
    let mut batches: Vec<Batch> = Vec::new();
    for &id in liabilities {
        match batches.last_mut() {
            Some(batch) if batch.accepts(state, id, aggregate_size) => batch.push(state, id),
            _ => batches.push(Batch::start(state, id)),
        }
    }
    batches
}

/// Dispatch every batch built from `liabilities` as one downward `writev`
/// each, crediting `transit` under the lock and submitting outside it.
pub fn dispatch<L: LowerLayer + 'static>(
    manager: &Arc<WriteBehind<L>>,
    inode: InodeId,
    state_handle: &Arc<Mutex<InodeState>>,
    liabilities: Vec<RequestId>,
    aggregate_size: u64,
) {
    if liabilities.is_empty() {
        return;
    }

    let batches = {
        let mut state = state_handle.lock();
        let batches = build_batches(&state, &liabilities, aggregate_size);
        for batch in &batches {
            let head = batch.members[0];
            state.get_mut(head).unwrap().total_size = batch.total;
            state.credit_transit(batch.total);
        }
        batches
    };

    for batch in batches {
        dispatch_one(manager, inode, state_handle, batch);
    }
}

fn dispatch_one<L: LowerLayer + 'static>(
    manager: &Arc<WriteBehind<L>>,
    inode: InodeId,
    state_handle: &Arc<Mutex<InodeState>>,
    batch: Batch,
) {
    let buffers = {
        let mut state = state_handle.lock();
        let mut buffers = Vec::with_capacity(batch.members.len());
        for &id in &batch.members {
            let req = state.get_mut(id).unwrap();
            match req.take_stub() {
                Stub::Write { args, reply } => {
                    buffers.push(args.data);
                    // The reply was already sent by the temptation-list walk;
                    // this only fires if a request reached here without ever
                    // having passed through `pick_unwinds`, which would be a
                    // scheduling bug rather than something to paper over here.
                    debug_assert!(reply.is_none(), "liability member still holds an unsent reply");
                }
                _ => unreachable!("liability member must be a write"),
            }
        }
        buffers
    };

    let call = WritevCall {
        fd: batch.fd,
        lock_owner: batch.lock_owner,
        buffers,
        offset: batch.offset,
        flags: batch.flags,
    };
    let total = batch.total;
    let members = batch.members;
    let manager_clone = Arc::clone(manager);
    let state_handle_clone = Arc::clone(state_handle);

    manager.lower().writev(
        call,
        Box::new(move |result| {
            {
                let mut state = state_handle_clone.lock();
                match result {
                    Ok(written) if (written as u64) < total => {
                        state.latch_error(Errno::EIO);
                    }
                    Err(errno) => {
                        state.latch_error(errno);
                    }
                    Ok(_) => {}
                }
                for &id in &members {
                    engine::fulfill_request(&mut state, id);
                }
            }
            manager_clone.process_queue_external(inode);
        }),
    );
}
