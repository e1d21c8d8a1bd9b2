//! Transactions
//!
//! A transaction batches atom writes so that observers see either all of
//! them or none of them. While a transaction is active, reads observe the
//! staged values; reactors are notified once, after the outermost commit,
//! when every staged value is final. Rolling back restores each touched
//! atom's pre-transaction `(value, version)` pair and suppresses all
//! notification.
//!
//! # How It Works
//!
//! 1. The active transactions form a thread-local stack of frames.
//!
//! 2. The first effective write to an atom within a frame stores a restore
//!    thunk holding the atom's pre-image. Later writes to the same atom in
//!    that frame keep the original pre-image.
//!
//! 3. Committing a nested frame hands its pre-images up to the parent, so
//!    the whole chain still commits (and notifies) exactly once, at the
//!    outermost level.
//!
//! 4. Committing the outermost frame drops the pre-images (the staged
//!    values are already in place) and runs the reactor sweep.
//!
//! Rollback is a guaranteed cleanup: a frame guard rolls the frame back
//! when it is dropped without having committed, which covers both the
//! `Err` path of [`try_transact`] and unwinding out of a transaction body.
//!
//! Like the rest of the engine, transaction state is thread-local and never
//! shared across threads.

use std::cell::RefCell;

use indexmap::IndexMap;

use crate::reactor;
use crate::tracking::ObservableId;

/// Restores one atom to its pre-transaction state.
type RestoreFn = Box<dyn FnOnce()>;

/// One level of the transaction stack.
struct Frame {
    /// First-touch pre-images of every atom changed in this frame,
    /// in touch order.
    snapshots: IndexMap<ObservableId, RestoreFn>,
}

thread_local! {
    static TRANSACTION_STACK: RefCell<Vec<Frame>> = RefCell::new(Vec::new());
}

/// Check whether a transaction is active on the current thread.
pub fn in_transaction() -> bool {
    TRANSACTION_STACK.with(|stack| !stack.borrow().is_empty())
}

/// Run `body` atomically and return its result.
///
/// If a transaction is already active, `body` simply joins it: no new
/// boundary is created and the enclosing transaction commits as one unit.
/// Otherwise a transaction is opened around `body` and committed when it
/// returns. Unwinding out of `body` rolls the transaction back.
pub fn transact<R>(body: impl FnOnce() -> R) -> R {
    if in_transaction() {
        return body();
    }
    let guard = FrameGuard::open();
    let result = body();
    guard.commit();
    result
}

/// Run a fallible `body` in a transaction of its own.
///
/// Opens a new frame even when a transaction is already active. On `Ok` the
/// frame commits, into the parent frame when nested, so the chain still
/// notifies once at the outermost level. On `Err` every atom staged in this
/// frame is restored to its pre-image and the error is returned unchanged;
/// observers never see the discarded writes.
pub fn try_transact<R, E>(body: impl FnOnce() -> Result<R, E>) -> Result<R, E> {
    let guard = FrameGuard::open();
    match body() {
        Ok(value) => {
            guard.commit();
            Ok(value)
        }
        Err(error) => {
            guard.rollback();
            Err(error)
        }
    }
}

/// Stage the first-touch restore thunk for `id` in the innermost frame.
///
/// Called by an atom after it swapped in a new value. If the frame already
/// holds a pre-image for this atom, the new thunk is discarded: rollback
/// always restores the state from before the frame's first write.
pub(crate) fn stage(id: ObservableId, restore: RestoreFn) {
    TRANSACTION_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        debug_assert!(!stack.is_empty(), "staged a change outside any transaction");
        if let Some(frame) = stack.last_mut() {
            frame.snapshots.entry(id).or_insert(restore);
        }
    });
}

/// Guard tying a frame's lifetime to a scope.
///
/// Dropping the guard without committing rolls the frame back, which makes
/// rollback an unconditional cleanup rather than a control-flow branch.
struct FrameGuard {
    finished: bool,
}

impl FrameGuard {
    fn open() -> Self {
        TRANSACTION_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                snapshots: IndexMap::new(),
            });
        });
        Self { finished: false }
    }

    fn commit(mut self) {
        self.finished = true;
        commit_innermost();
    }

    fn rollback(mut self) {
        self.finished = true;
        rollback_innermost();
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if !self.finished {
            rollback_innermost();
        }
    }
}

fn commit_innermost() {
    let changed = TRANSACTION_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let frame = match stack.pop() {
            Some(frame) => frame,
            None => return 0,
        };
        match stack.last_mut() {
            Some(parent) => {
                // Nested commit: hand the pre-images up so the outermost
                // frame can still restore (or notify for) them.
                for (id, restore) in frame.snapshots {
                    parent.snapshots.entry(id).or_insert(restore);
                }
                0
            }
            None => frame.snapshots.len(),
        }
    });

    // The sweep runs after the stack borrow is released: reactor callbacks
    // may open transactions of their own.
    if changed > 0 {
        tracing::trace!(changed, "transaction committed");
        reactor::run_sweep();
    }
}

fn rollback_innermost() {
    let frame = TRANSACTION_STACK.with(|stack| stack.borrow_mut().pop());
    if let Some(frame) = frame {
        tracing::trace!(restored = frame.snapshots.len(), "transaction rolled back");
        for (_, restore) in frame.snapshots {
            restore();
        }
    }
}
