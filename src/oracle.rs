//! The overlap/conflict oracle (§4.1).
//!
//! Below is the succinct argument the original carries in a comment: for any
//! two ranges to be non-overlapping, either the end of the first is less
//! than the start of the second, or vice versa. Negating that (De Morgan)
//! gives the overlap test used by [`crate::request::OrderingKey::overlaps`].

use crate::request::Request;

/// Whether liability entry `lie` conflicts with candidate `req` (§4.1):
/// `lie` was present at `req`'s arrival generation, and the two either
/// overlap, or `lie` is an append, or strict write ordering is configured.
///
/// A request never conflicts with itself, and has no conflict with entries
/// added at or after its own generation ("only wait on the past").
pub fn conflicts(lie: &Request, req: &Request, strict_write_ordering: bool) -> bool {
    if lie.id == req.id {
        return false;
    }
    if lie.gen >= req.gen {
        return false;
    }
    if lie.ordering.append {
        return true;
    }
    if strict_write_ordering {
        return true;
    }
    lie.ordering.overlaps(&req.ordering)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Errno;
    use crate::request::{FdId, Kind, LockOwner, OrderingKey};
    use crate::stub::{ReplyChannel, Stub, WriteArgs};

    fn req(id: u64, gen: u64, offset: u64, size: u64, append: bool) -> Request {
        let (reply, _rx) = ReplyChannel::new();
        Request {
            id,
            kind: Kind::Write,
            ordering: OrderingKey {
                offset,
                size,
                append,
            },
            write_size: size,
            orig_size: size,
            total_size: 0,
            op_ret: size as i64,
            op_errno: Errno(0),
            refcount: 1,
            tempted: true,
            lied: false,
            fulfilled: false,
            go: false,
            gen,
            lock_owner: LockOwner(0),
            fd: FdId(0),
            stub: Some(Stub::Write {
                args: WriteArgs {
                    fd: FdId(0),
                    lock_owner: LockOwner(0),
                    data: vec![0; size as usize],
                    offset,
                    flags: 0,
                },
                reply: Some(reply),
            }),
        }
    }

    #[test]
    fn self_never_conflicts() {
        let r = req(1, 0, 0, 4, false);
        assert!(!conflicts(&r, &r, false));
    }

    #[test]
    fn future_generation_never_conflicts() {
        let lie = req(1, 5, 0, 4, false);
        let later_arrival = req(2, 5, 0, 4, false);
        assert!(!conflicts(&lie, &later_arrival, false));
    }

    #[test]
    fn past_generation_overlapping_conflicts() {
        let lie = req(1, 0, 0, 4, false);
        let req_ = req(2, 1, 2, 4, false);
        assert!(conflicts(&lie, &req_, false));
    }

    #[test]
    fn past_generation_disjoint_does_not_conflict() {
        let lie = req(1, 0, 0, 4, false);
        let req_ = req(2, 1, 8, 4, false);
        assert!(!conflicts(&lie, &req_, false));
    }

    #[test]
    fn append_conflicts_regardless_of_overlap() {
        let lie = req(1, 0, 0, 4, true);
        let req_ = req(2, 1, 1000, 4, false);
        assert!(conflicts(&lie, &req_, false));
    }

    #[test]
    fn strict_ordering_conflicts_regardless_of_overlap() {
        let lie = req(1, 0, 0, 4, false);
        let req_ = req(2, 1, 1000, 4, false);
        assert!(conflicts(&lie, &req_, true));
    }

    #[test]
    fn zero_size_extends_to_infinity() {
        let lie = req(1, 0, 0, 0, false);
        let req_ = req(2, 1, 1_000_000, 4, false);
        assert!(conflicts(&lie, &req_, false));
    }
}
