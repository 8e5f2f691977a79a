//! The pure per-inode scheduling logic: preprocessor (§4.3), picker (§4.4),
//! and unwinder (§4.5). Each function only touches [`InodeState`] — no
//! locking, no downward calls — so they can be unit-tested without a lower
//! layer at all. [`crate::manager::WriteBehind`] is what wires these into
//! `process_queue` under the inode lock and drives the lower layer outside it.

use crate::inode::InodeState;
use crate::oracle;
use crate::request::RequestId;
use crate::stub::Stub;

/// Mark a request fulfilled and release its wind reference (§4.7's
/// `__wb_fulfill_request`). `total_size` is only ever non-zero on a
/// dispatched batch's head; a request absorbed by coalescing keeps it at
/// zero, so this is a no-op on the window/transit accounting for those.
pub fn fulfill_request(state: &mut InodeState, id: RequestId) {
    let total_size = match state.get_mut(id) {
        Some(req) => {
            req.fulfilled = true;
            req.total_size
        }
        None => return,
    };
    state.debit_window(total_size);
    state.debit_transit(total_size);
    state.ref_dec(id);
}

/// Attempt to merge `req_id`'s payload into `holder_id`'s (§4.3). Only valid
/// to call once [`can_merge`] has confirmed adjacency, lock-owner match, and
/// the page-size cap; panics on a type mismatch since both ids are checked
/// to be writes by the caller.
fn merge_into_holder(state: &mut InodeState, holder_id: RequestId, req_id: RequestId) {
    let incoming = match state.get(req_id).unwrap().stub.as_ref() {
        Some(Stub::Write { args, .. }) => args.data.clone(),
        _ => unreachable!("merge candidate must be a write"),
    };
    let incoming_write_size = state.get(req_id).unwrap().write_size;

    let holder = state.get_mut(holder_id).unwrap();
    match holder.stub.as_mut() {
        Some(Stub::Write { args, .. }) => args.data.extend_from_slice(&incoming),
        _ => unreachable!("holder must be a write"),
    }
    holder.write_size += incoming_write_size;
    holder.ordering.size += incoming_write_size;
}

fn can_merge(state: &InodeState, holder_id: RequestId, req_id: RequestId, page_size: u64) -> bool {
    let holder = state.get(holder_id).unwrap();
    let req = state.get(req_id).unwrap();
    let expected_offset = holder.ordering.offset + holder.write_size;
    req.ordering.offset == expected_offset
        && req.lock_owner == holder.lock_owner
        && req.fd == holder.fd
        && holder.write_size + req.write_size <= page_size
}

/// Scan `todo`, coalescing adjacent small writes into a running holder and
/// sealing (`go = true`) holders that cannot absorb more (§4.3).
pub fn preprocess_winds(
    state: &mut InodeState,
    page_size: u64,
    trickling_writes: bool,
    strict_write_ordering: bool,
) {
    let ids = state.todo_ids();
    let mut holder: Option<RequestId> = None;

    for id in ids {
        let tempted = state.get(id).unwrap().tempted;

        if !tempted {
            if let Some(h) = holder {
                let conflict = oracle::conflicts(
                    state.get(h).unwrap(),
                    state.get(id).unwrap(),
                    strict_write_ordering,
                );
                if conflict {
                    state.get_mut(h).unwrap().go = true;
                }
            }
            continue;
        }

        match holder {
            None => holder = Some(id),
            Some(h) => {
                if can_merge(state, h, id, page_size) {
                    merge_into_holder(state, h, id);
                    state.remove_from_todo(id);
                    fulfill_request(state, id);
                } else {
                    state.get_mut(h).unwrap().go = true;
                    holder = Some(id);
                }
            }
        }
    }

    if trickling_writes && state.transit() == 0 {
        if let Some(h) = holder {
            state.get_mut(h).unwrap().go = true;
        }
    }
}

/// Walk `todo`, detaching entries with no outstanding liability conflict into
/// `tasks` (non-tempted, resume directly) or `liabilities` (tempted and
/// sealed, dispatch as a batch) (§4.4).
pub fn pick_winds(
    state: &mut InodeState,
    strict_write_ordering: bool,
    tasks: &mut Vec<RequestId>,
    liabilities: &mut Vec<RequestId>,
) {
    let ids = state.todo_ids();
    let liability_ids = state.liability_ids();

    for id in ids {
        let (tempted, go) = {
            let req = state.get(id).unwrap();
            (req.tempted, req.go)
        };

        let conflict = liability_ids.iter().any(|&lid| {
            oracle::conflicts(state.get(lid).unwrap(), state.get(id).unwrap(), strict_write_ordering)
        });
        if conflict {
            continue;
        }
        if tempted && !go {
            continue;
        }
        // A tempted request is only dispatchable once it has actually been
        // lied about (§4.5 adds it to `liability` at that point): the window
        // gates lying, and this keeps it from also gating dispatch ahead of
        // that, which would hand `dispatch_one` a request whose reply was
        // never taken.
        if tempted && !liability_ids.contains(&id) {
            continue;
        }

        state.remove_from_todo(id);
        if tempted {
            liabilities.push(id);
        } else {
            tasks.push(id);
        }
    }
}

/// Walk `temptation`, early-acknowledging eligible writes into `lies`
/// (§4.5). An entry is left alone only if it is not yet fulfilled and
/// crediting its `orig_size` would push `window_current` past `window_conf`
/// (Testable Property 8: "no further lie is issued until capacity is
/// released" — checked prospectively, so `window_current` never exceeds
/// `window_conf` even transiently; see DESIGN.md for why this tightens the
/// original's post-hoc, one-shot-overshoot comparison).
pub fn pick_unwinds(state: &mut InodeState, lies: &mut Vec<RequestId>) {
    let ids = state.temptation_ids();

    for id in ids {
        let (fulfilled, orig_size) = {
            let req = state.get(id).unwrap();
            (req.fulfilled, req.orig_size)
        };

        if !fulfilled && state.window_current() + orig_size > state.window_conf() {
            continue;
        }

        state.remove_from_temptation(id);

        if !fulfilled {
            state.credit_window(orig_size);
            state.push_liability(id);
            state.get_mut(id).unwrap().lied = true;
            state.bump_gen();
        }

        lies.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteBehindConfig;
    use crate::error::Errno;
    use crate::request::{FdId, Kind, LockOwner, OrderingKey, Request};
    use crate::stub::{ReplyChannel, Stub, WriteArgs};

    fn write_request(state: &mut InodeState, offset: u64, data: &[u8]) -> RequestId {
        let id = state.next_id();
        let (reply, _rx) = ReplyChannel::new();
        let size = data.len() as u64;
        let req = Request {
            id,
            kind: Kind::Write,
            ordering: OrderingKey {
                offset,
                size,
                append: false,
            },
            write_size: size,
            orig_size: size,
            total_size: 0,
            op_ret: size as i64,
            op_errno: Errno(0),
            refcount: 0,
            tempted: true,
            lied: false,
            fulfilled: false,
            go: false,
            gen: 0,
            lock_owner: LockOwner(0),
            fd: FdId(0),
            stub: Some(Stub::Write {
                args: WriteArgs {
                    fd: FdId(0),
                    lock_owner: LockOwner(0),
                    data: data.to_vec(),
                    offset,
                    flags: 0,
                },
                reply: Some(reply),
            }),
        };
        state.enqueue(req)
    }

    fn data_of(state: &InodeState, id: RequestId) -> Vec<u8> {
        match state.get(id).unwrap().stub.as_ref() {
            Some(Stub::Write { args, .. }) => args.data.clone(),
            _ => panic!("not a write"),
        }
    }

    #[test]
    fn adjacent_small_writes_coalesce() {
        let conf = WriteBehindConfig::builder().build().unwrap();
        let mut state = InodeState::new(1, &conf);

        let a = write_request(&mut state, 0, b"AAAA");
        preprocess_winds(&mut state, 4096, false, false);
        let b = write_request(&mut state, 4, b"BBBB");
        preprocess_winds(&mut state, 4096, false, false);
        let c = write_request(&mut state, 8, b"CCCC");
        preprocess_winds(&mut state, 4096, false, false);

        assert_eq!(data_of(&state, a), b"AAAABBBBCCCC".to_vec());

        // `b` and `c` were merged into `a`'s holder, which releases only their
        // wind reference (engine.rs's `fulfill_request` doc comment). Drive
        // the unwind side (`pick_unwinds`, then the reply-take + `ref_dec`
        // `manager.rs::do_unwinds` performs) before a merged request is
        // actually destroyed.
        let mut lies = Vec::new();
        pick_unwinds(&mut state, &mut lies);
        for id in lies {
            if let Some(req) = state.get_mut(id) {
                if let Some(stub) = req.stub.as_mut() {
                    let _ = stub.take_write_reply();
                }
            }
            state.ref_dec(id);
        }

        assert!(state.get(b).is_none(), "merged request should be destroyed once unwound");
        assert!(state.get(c).is_none(), "merged request should be destroyed once unwound");
    }

    #[test]
    fn gap_prevents_merge() {
        let conf = WriteBehindConfig::builder().build().unwrap();
        let mut state = InodeState::new(1, &conf);

        let a = write_request(&mut state, 0, b"AAAA");
        preprocess_winds(&mut state, 4096, false, false);
        let _b = write_request(&mut state, 8, b"BBBB");
        preprocess_winds(&mut state, 4096, false, false);

        // `a` must have been sealed (go) once a non-contiguous sibling arrived.
        assert!(state.get(a).unwrap().go);
        assert_eq!(data_of(&state, a), b"AAAA".to_vec());
    }

    #[test]
    fn page_size_cap_seals_holder() {
        let conf = WriteBehindConfig::builder().build().unwrap();
        let mut state = InodeState::new(1, &conf);

        let a = write_request(&mut state, 0, b"AAAA");
        preprocess_winds(&mut state, 4, false, false); // page_size == holder size already
        let _b = write_request(&mut state, 4, b"BBBB");
        preprocess_winds(&mut state, 4, false, false);

        assert!(state.get(a).unwrap().go);
        assert_eq!(data_of(&state, a), b"AAAA".to_vec());
    }

    #[test]
    fn trickling_writes_seals_lone_holder_when_idle() {
        let conf = WriteBehindConfig::builder().build().unwrap();
        let mut state = InodeState::new(1, &conf);
        let a = write_request(&mut state, 0, b"AAAA");
        preprocess_winds(&mut state, 4096, true, false);
        assert!(state.get(a).unwrap().go);
    }

    #[test]
    fn without_trickling_lone_holder_waits() {
        let conf = WriteBehindConfig::builder().build().unwrap();
        let mut state = InodeState::new(1, &conf);
        let a = write_request(&mut state, 0, b"AAAA");
        preprocess_winds(&mut state, 4096, false, false);
        assert!(!state.get(a).unwrap().go);
    }

    #[test]
    fn unwind_stops_when_window_would_be_exceeded() {
        let conf = WriteBehindConfig::builder().window_size(16).build_for_test();
        let mut state = InodeState::new(1, &conf);

        let a = write_request(&mut state, 0, &[0u8; 8]);
        let b = write_request(&mut state, 8, &[0u8; 8]);
        let c = write_request(&mut state, 16, &[0u8; 8]);

        let mut lies = Vec::new();
        pick_unwinds(&mut state, &mut lies);

        assert_eq!(lies, vec![a, b]);
        assert_eq!(state.window_current(), 16);
        assert!(state.get(c).unwrap().lied == false);
    }

    #[test]
    fn unwind_releases_capacity_once_liability_is_dropped() {
        let conf = WriteBehindConfig::builder().window_size(16).build_for_test();
        let mut state = InodeState::new(1, &conf);

        let a = write_request(&mut state, 0, &[0u8; 8]);
        let _b = write_request(&mut state, 8, &[0u8; 8]);
        let c = write_request(&mut state, 16, &[0u8; 8]);

        let mut lies = Vec::new();
        pick_unwinds(&mut state, &mut lies);
        assert_eq!(lies.len(), 2);

        // Simulate `a` being fulfilled and its liability reference released.
        state.get_mut(a).unwrap().total_size = 8;
        fulfill_request(&mut state, a);
        state.remove_from_liability(a);
        state.ref_dec(a);

        let mut lies2 = Vec::new();
        pick_unwinds(&mut state, &mut lies2);
        assert_eq!(lies2, vec![c]);
    }
}
