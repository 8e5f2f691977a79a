//! Per-inode state (§3.2): the four request lists, generation counter,
//! window accounting, and latched error, all guarded by one mutex per inode.
//!
//! §9's design note permits trading the original's intrusive list links for
//! "four owned deques keyed by request identity" backed by a single owner
//! map; that is what this module does. Removal from the middle of a deque is
//! O(n) here rather than O(1) — acceptable for the per-inode request counts
//! this engine is designed for, and explicitly sanctioned as a faithful
//! alternative to intrusive links.

use std::collections::{HashMap, VecDeque};

use crate::config::WriteBehindConfig;
use crate::error::Errno;
use crate::request::{InodeId, Request, RequestId};

/// Per-inode write-behind state (§3.2).
pub struct InodeState {
    /// The inode this state belongs to, for logging and dumps.
    pub inode: InodeId,
    requests: HashMap<RequestId, Request>,
    all: VecDeque<RequestId>,
    todo: VecDeque<RequestId>,
    liability: VecDeque<RequestId>,
    temptation: VecDeque<RequestId>,
    gen: u64,
    window_conf: u64,
    window_current: u64,
    transit: u64,
    latched_error: Option<Errno>,
    next_id: RequestId,
}

impl InodeState {
    /// Create empty state for `inode`, snapshotting the window bound from
    /// `config` at creation time (§6.3.1: a later `reconfigure` only affects
    /// inodes created afterward).
    pub fn new(inode: InodeId, config: &WriteBehindConfig) -> Self {
        InodeState {
            inode,
            requests: HashMap::new(),
            all: VecDeque::new(),
            todo: VecDeque::new(),
            liability: VecDeque::new(),
            temptation: VecDeque::new(),
            gen: 0,
            window_conf: config.window_size(),
            window_current: 0,
            transit: 0,
            latched_error: None,
            next_id: 1,
        }
    }

    /// The liability generation, bumped each time a request enters `liability`.
    pub fn gen(&self) -> u64 {
        self.gen
    }

    /// Configured per-inode window bound.
    pub fn window_conf(&self) -> u64 {
        self.window_conf
    }

    /// Sum of `orig_size` of entries currently acknowledged-but-unfulfilled.
    pub fn window_current(&self) -> u64 {
        self.window_current
    }

    /// Sum of `total_size` of batches currently dispatched downward.
    pub fn transit(&self) -> u64 {
        self.transit
    }

    /// True once every request has been destroyed — the point at which
    /// `forget` may safely tear this state down (§3.3, §4.9).
    pub fn is_quiesced(&self) -> bool {
        self.todo.is_empty() && self.liability.is_empty() && self.temptation.is_empty()
    }

    /// Allocate the next request id for this inode.
    pub fn next_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Look up a live request by id.
    pub fn get(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(&id)
    }

    /// Look up a live request by id, mutably.
    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut Request> {
        self.requests.get_mut(&id)
    }

    /// Iterate live requests in `all` order, for dumps (§6.4).
    pub fn iter_all(&self) -> impl Iterator<Item = &Request> {
        self.all.iter().filter_map(move |id| self.requests.get(id))
    }

    /// Whether `id` is still on `todo` (used by dumps as "wound?" == false).
    pub fn is_on_todo(&self, id: RequestId) -> bool {
        self.todo.contains(&id)
    }

    /// Admit a freshly built request (§4.2 step 4): append to `all` and
    /// `todo`, stamp its generation, and add it to `temptation` if tempted.
    /// Returns the id so the caller can key further bookkeeping off it.
    pub fn enqueue(&mut self, mut req: Request) -> RequestId {
        let id = req.id;
        req.gen = self.gen;
        let tempted = req.tempted;

        self.all.push_back(id);
        self.todo.push_back(id);
        req.refcount += 1; // wind slot

        if tempted {
            self.temptation.push_back(id);
            req.refcount += 1; // unwind slot
        }

        self.requests.insert(id, req);
        id
    }

    /// Peek the latched inode error without clearing it (§6.4's dump hook).
    pub fn peek_latched_error(&self) -> Option<Errno> {
        self.latched_error
    }

    /// Observe and clear the latched inode error (§7). Only kinds for which
    /// [`crate::request::Kind::surfaces_latched_error`] is true should call this.
    pub fn take_latched_error(&mut self) -> Option<Errno> {
        self.latched_error.take()
    }

    /// Latch the first unobserved failure (§7: "latches the *first*
    /// failure's op_errno" — unlike the original's unconditional overwrite,
    /// a later failure arriving before the first is observed does not
    /// replace it).
    pub fn latch_error(&mut self, errno: Errno) {
        if self.latched_error.is_none() {
            self.latched_error = Some(errno);
        }
    }

    fn remove_from(list: &mut VecDeque<RequestId>, id: RequestId) {
        if let Some(pos) = list.iter().position(|&x| x == id) {
            list.remove(pos);
        }
    }

    /// Detach `id` from `todo`.
    pub fn remove_from_todo(&mut self, id: RequestId) {
        Self::remove_from(&mut self.todo, id);
    }

    /// Detach `id` from `temptation`.
    pub fn remove_from_temptation(&mut self, id: RequestId) {
        Self::remove_from(&mut self.temptation, id);
    }

    /// Attach `id` to `liability`.
    pub fn push_liability(&mut self, id: RequestId) {
        self.liability.push_back(id);
    }

    /// Detach `id` from `liability`.
    pub fn remove_from_liability(&mut self, id: RequestId) {
        Self::remove_from(&mut self.liability, id);
    }

    /// Iterate `todo` in order (for the preprocessor and picker).
    pub fn todo_ids(&self) -> Vec<RequestId> {
        self.todo.iter().copied().collect()
    }

    /// Iterate `temptation` in order (for the unwinder).
    pub fn temptation_ids(&self) -> Vec<RequestId> {
        self.temptation.iter().copied().collect()
    }

    /// Iterate `liability` (for the conflict oracle).
    pub fn liability_ids(&self) -> Vec<RequestId> {
        self.liability.iter().copied().collect()
    }

    /// Credit `window_current` by `amount` (§4.5).
    pub fn credit_window(&mut self, amount: u64) {
        self.window_current += amount;
    }

    /// Debit `window_current` by `amount` (§4.7 fulfillment).
    pub fn debit_window(&mut self, amount: u64) {
        self.window_current = self.window_current.saturating_sub(amount);
    }

    /// Credit `transit` by `amount` (§4.7 dispatch).
    pub fn credit_transit(&mut self, amount: u64) {
        self.transit += amount;
    }

    /// Debit `transit` by `amount` (§4.7 completion).
    pub fn debit_transit(&mut self, amount: u64) {
        self.transit = self.transit.saturating_sub(amount);
    }

    /// Bump the liability generation (§4.5: a new era begins each time a
    /// request is newly lied about).
    pub fn bump_gen(&mut self) {
        self.gen += 1;
    }

    /// Increment a request's refcount (new list membership).
    pub fn ref_inc(&mut self, id: RequestId) {
        if let Some(req) = self.requests.get_mut(&id) {
            req.refcount += 1;
        } else {
            log::warn!("ref_inc on unknown request {id}");
        }
    }

    /// Decrement a request's refcount, destroying it at zero (§3.3).
    ///
    /// Destruction removes the request from every list and, if `all` is now
    /// empty, resets `gen` and `window_current` to zero — asserting in debug
    /// builds that they were already at their expected values, per §9's Open
    /// Question resolution (self-heal in release, fail loudly in debug).
    pub fn ref_dec(&mut self, id: RequestId) {
        let refcount = match self.requests.get_mut(&id) {
            Some(req) => {
                if req.refcount == 0 {
                    log::warn!("refcount({id}) is already 0 on inode {}", self.inode);
                    return;
                }
                req.refcount -= 1;
                req.refcount
            }
            None => {
                log::warn!("ref_dec on unknown request {id}");
                return;
            }
        };

        if refcount == 0 {
            Self::remove_from(&mut self.todo, id);
            Self::remove_from(&mut self.liability, id);
            Self::remove_from(&mut self.temptation, id);
            Self::remove_from(&mut self.all, id);
            self.requests.remove(&id);

            if self.all.is_empty() {
                debug_assert_eq!(
                    self.window_current, 0,
                    "window_current should already be zero once all requests are gone"
                );
                self.gen = 0;
                self.window_current = 0;
            }
        }
    }
}
