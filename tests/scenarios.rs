//! End-to-end scenarios against a mock lower layer: coalescing, ordering,
//! the error latch, and window backpressure, each checked by asserting on
//! what actually crossed the `LowerLayer` boundary rather than on internal
//! state.

use std::sync::Arc;

use write_behind::mock::MockLowerLayer;
use write_behind::{Errno, FdId, LockOwner, WriteBehind, WriteBehindConfig};

const PAGE_SIZE: u64 = 4096;

fn harness(config: WriteBehindConfig) -> (Arc<WriteBehind<Arc<MockLowerLayer>>>, Arc<MockLowerLayer>) {
    let mock = Arc::new(MockLowerLayer::new());
    let wb = WriteBehind::with_page_size(config, Arc::clone(&mock), PAGE_SIZE);
    (wb, mock)
}

/// S1: three adjacent small writes from the same fd/lock-owner coalesce into
/// one downward writev.
#[test]
fn adjacent_writes_coalesce_into_one_writev() {
    let config = WriteBehindConfig::builder().trickling_writes(false).build().unwrap();
    let (wb, mock) = harness(config);
    let fd = FdId(1);
    let lock_owner = LockOwner(1);

    assert_eq!(wb.write(1, fd, lock_owner, 0, b"AAAA".to_vec(), 0, 0).unwrap(), 4);
    assert_eq!(wb.write(1, fd, lock_owner, 4, b"BBBB".to_vec(), 0, 0).unwrap(), 4);
    assert_eq!(wb.write(1, fd, lock_owner, 8, b"CCCC".to_vec(), 0, 0).unwrap(), 4);
    wb.flush(1, fd).unwrap();

    let writevs = mock.writevs();
    assert_eq!(writevs.len(), 1, "all three writes should merge into a single batch");
    assert_eq!(writevs[0].data, b"AAAABBBBCCCC".to_vec());
    assert_eq!(writevs[0].offset, 0);
}

/// S2: a non-contiguous write breaks the batch. Two writevs cross the wire,
/// split exactly at the gap.
#[test]
fn gap_between_writes_breaks_the_batch() {
    let config = WriteBehindConfig::builder().trickling_writes(false).build().unwrap();
    let (wb, mock) = harness(config);
    let fd = FdId(1);
    let lock_owner = LockOwner(1);

    assert_eq!(wb.write(1, fd, lock_owner, 0, b"AAAA".to_vec(), 0, 0).unwrap(), 4);
    assert_eq!(wb.write(1, fd, lock_owner, 8, b"BBBB".to_vec(), 0, 0).unwrap(), 4);
    wb.flush(1, fd).unwrap();

    let writevs = mock.writevs();
    assert_eq!(writevs.len(), 2, "the gap at offset 4..8 must split the batch");
    assert_eq!(writevs[0].data, b"AAAA".to_vec());
    assert_eq!(writevs[0].offset, 0);
    assert_eq!(writevs[1].data, b"BBBB".to_vec());
    assert_eq!(writevs[1].offset, 8);
}

/// S3: a read overlapping a still-buffered write is not resumed downward
/// until that write has actually gone out, preserving the ordering a single
/// file descriptor's own writes and reads must observe.
#[test]
fn overlapping_read_waits_for_the_write_it_conflicts_with() {
    let config = WriteBehindConfig::builder().build().unwrap();
    let (wb, mock) = harness(config);
    let fd = FdId(1);
    let lock_owner = LockOwner(1);

    assert_eq!(wb.write(1, fd, lock_owner, 0, b"AAAAAAAA".to_vec(), 0, 0).unwrap(), 8);
    let read = wb.read(1, fd, 0, 8).unwrap();
    assert_eq!(read.len(), 8);

    let order = mock.call_order();
    let writev_pos = order.iter().position(|&c| c == "writev").expect("write must have dispatched");
    let read_pos = order.iter().position(|&c| c == "read").expect("read must have dispatched");
    assert!(writev_pos < read_pos, "the read must not cross the wire before its conflicting write does");
}

/// S4: a failed dispatch latches on the inode. The write that triggered the
/// dispatch has already returned its optimistic ack; the next call to
/// surface the latch gets the failure, and the call after that succeeds.
#[test]
fn failed_dispatch_latches_until_observed_then_clears() {
    let config = WriteBehindConfig::builder().trickling_writes(true).build().unwrap();
    let (wb, mock) = harness(config);
    let fd = FdId(1);
    let lock_owner = LockOwner(1);

    mock.push_writev_result(Err(Errno::ENOSPC));

    assert_eq!(
        wb.write(1, fd, lock_owner, 0, b"AAAA".to_vec(), 0, 0).unwrap(),
        4,
        "the lie always returns success to the caller that triggered it"
    );

    // Forces a process_queue pass that actually dispatches the buffered
    // write (and so latches its failure) before returning.
    let _ = wb.fsync(1, fd, false);

    let err = wb.write(1, fd, lock_owner, 100, b"ZZZZ".to_vec(), 0, 0).unwrap_err();
    assert_eq!(err, Errno::ENOSPC);

    assert_eq!(
        wb.write(1, fd, lock_owner, 200, b"YYYY".to_vec(), 0, 0).unwrap(),
        4,
        "the latch is consumed by the previous call and must not repeat"
    );
}

/// S5: the per-inode window bounds how much unfulfilled data can be lied
/// about at once. A write that would exceed it is not acknowledged until a
/// prior liability actually completes and frees capacity.
#[test]
fn window_backpressure_gates_further_lies() {
    let config = WriteBehindConfig::builder().build().unwrap(); // default window: 1 MiB
    let (wb, mock) = harness(config);
    let fd = FdId(1);
    let lock_owner = LockOwner(1);
    let chunk = vec![0u8; 700 * 1024]; // over half the window each

    assert_eq!(wb.write(1, fd, lock_owner, 0, chunk.clone(), 0, 0).unwrap(), chunk.len());
    assert_eq!(
        wb.dump(1, None).unwrap().window_current,
        700 * 1024,
        "the first write's full size is credited to the window on its lie"
    );
    assert_eq!(mock.writevs().len(), 0, "nothing has actually crossed the wire yet");

    // Offset far enough away that this can never coalesce with the first
    // write; only window capacity is under test here.
    assert_eq!(
        wb.write(1, fd, lock_owner, 10_000_000, chunk.clone(), 0, 0).unwrap(),
        chunk.len(),
        "by the time this call returns, the first write has already been dispatched and \
         freed enough capacity for this one to be lied about in turn"
    );
    assert_eq!(mock.writevs().len(), 1, "the first write was flushed out to make room");

    wb.flush(1, fd).unwrap();
    assert_eq!(mock.writevs().len(), 2, "the second write is dispatched once sealed");
    assert_eq!(wb.dump(1, None).unwrap().window_current, 0);
}

/// S6: two non-overlapping append writes on the same fd still serialize —
/// append's ordering conflict is unconditional, independent of whether the
/// byte ranges actually intersect.
#[test]
fn append_writes_serialize_even_without_overlap() {
    let config = WriteBehindConfig::builder().trickling_writes(false).build().unwrap();
    let (wb, mock) = harness(config);
    let fd = FdId(1);
    let lock_owner = LockOwner(1);
    let append_flag = libc::O_APPEND;

    assert_eq!(
        wb.write(1, fd, lock_owner, 0, b"AAAA".to_vec(), append_flag, 0).unwrap(),
        4
    );
    assert_eq!(
        wb.write(1, fd, lock_owner, 1000, b"BBBB".to_vec(), append_flag, 0).unwrap(),
        4
    );
    wb.flush(1, fd).unwrap();

    let writevs = mock.writevs();
    assert_eq!(writevs.len(), 2, "disjoint ranges never coalesce into one batch");
    assert_eq!(writevs[0].data, b"AAAA".to_vec());
    assert_eq!(writevs[1].data, b"BBBB".to_vec());
}
