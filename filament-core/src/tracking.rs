//! Dependency Tracking
//!
//! This module records which observables an evaluation reads. When a
//! derivation (or any other tracked evaluation) runs, a recorder is pushed
//! onto a thread-local stack; every observable read while the recorder is
//! active appends a `(id, version)` pair to it. The resulting dependency
//! list is what makes the cheap staleness check possible: a cached value is
//! up to date exactly when every recorded dependency still reports the
//! version it was read at.
//!
//! # Implementation
//!
//! We use a thread-local stack of recorders. Entering an evaluation pushes a
//! fresh recorder; reads go to the top of the stack only, so a derivation
//! that itself reads another derivation collects an independent dependency
//! list per level. The recorder is popped by a guard, which keeps the stack
//! balanced even when the evaluated closure panics.
//!
//! A read outside any evaluation finds an empty stack and records nothing.
//!
//! This design is not thread-shared: each thread tracks its own evaluations,
//! which is the engine's concurrency contract.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use smallvec::SmallVec;

/// Unique identifier for a tracked observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObservableId(u64);

impl ObservableId {
    /// Generate a new unique observable ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ObservableId {
    fn default() -> Self {
        Self::new()
    }
}

/// The capability a dependency record needs from the observable it points
/// at: an identity and a version counter.
///
/// For derived observables, `current_version` first brings the value up to
/// date, so that comparing against a recorded version reflects the latest
/// committed state of the transitive sources.
pub(crate) trait Versioned: Send + Sync {
    /// Current version, revalidated first for derived observables.
    fn current_version(&self) -> u64;
}

/// A single recorded read: which observable was read, at which version.
///
/// Holds only a weak handle to the observable. Dependency sets are
/// re-derived on every evaluation, so nothing here may keep a transient
/// dependency alive.
pub(crate) struct Dependency {
    pub id: ObservableId,
    pub version: u64,
    pub target: Weak<dyn Versioned>,
}

impl Clone for Dependency {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            version: self.version,
            target: Weak::clone(&self.target),
        }
    }
}

/// Dependency list of one evaluation. Nearly always small.
pub(crate) type DependencyList = SmallVec<[Dependency; 8]>;

thread_local! {
    static RECORDER_STACK: RefCell<Vec<DependencyList>> = RefCell::new(Vec::new());
}

/// Record a read of an observable.
///
/// Called by every tracked observable's read accessor. Appends to the
/// innermost active recorder, or does nothing when no evaluation is in
/// progress. A second read of the same observable within one evaluation is
/// not recorded again.
pub(crate) fn record_observation(id: ObservableId, version: u64, target: Weak<dyn Versioned>) {
    RECORDER_STACK.with(|stack| {
        if let Some(recorder) = stack.borrow_mut().last_mut() {
            if recorder.iter().all(|dep| dep.id != id) {
                recorder.push(Dependency {
                    id,
                    version,
                    target,
                });
            }
        }
    });
}

/// Check whether an evaluation is currently recording its reads.
pub fn is_tracking() -> bool {
    RECORDER_STACK.with(|stack| !stack.borrow().is_empty())
}

/// Run `body` under a fresh recorder and return its result together with the
/// dependency list it accumulated.
pub(crate) fn track<R>(body: impl FnOnce() -> R) -> (R, DependencyList) {
    let scope = TrackingScope::enter();
    let result = body();
    (result, scope.finish())
}

/// Guard that pops the recorder when dropped.
///
/// This keeps the recorder stack balanced when the evaluated closure
/// panics; on the normal path `finish` takes the dependency list instead.
struct TrackingScope {
    depth: usize,
}

impl TrackingScope {
    fn enter() -> Self {
        let depth = RECORDER_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(SmallVec::new());
            stack.len()
        });
        Self { depth }
    }

    fn finish(self) -> DependencyList {
        let recorded = RECORDER_STACK.with(|stack| stack.borrow_mut().pop());
        std::mem::forget(self);
        recorded.unwrap_or_default()
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        RECORDER_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "recorder stack out of balance: expected depth {}, got {}",
                self.depth,
                stack.len()
            );
            stack.pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Fixed {
        id: ObservableId,
        version: u64,
    }

    impl Fixed {
        fn new(version: u64) -> Arc<Self> {
            Arc::new(Self {
                id: ObservableId::new(),
                version,
            })
        }
    }

    impl Versioned for Fixed {
        fn current_version(&self) -> u64 {
            self.version
        }
    }

    fn observe(target: &Arc<Fixed>) {
        let core: Arc<dyn Versioned> = target.clone();
        let weak: Weak<dyn Versioned> = Arc::downgrade(&core);
        record_observation(target.id, target.version, weak);
    }

    #[test]
    fn observable_ids_are_unique() {
        let id1 = ObservableId::new();
        let id2 = ObservableId::new();
        let id3 = ObservableId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn recording_outside_an_evaluation_is_a_noop() {
        let fixed = Fixed::new(3);

        assert!(!is_tracking());
        observe(&fixed);
        assert!(!is_tracking());

        // Nothing was accumulated anywhere; a later evaluation starts empty.
        let ((), deps) = track(|| {});
        assert!(deps.is_empty());
    }

    #[test]
    fn track_collects_observations() {
        let first = Fixed::new(1);
        let second = Fixed::new(7);

        let ((), deps) = track(|| {
            assert!(is_tracking());
            observe(&first);
            observe(&second);
        });

        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].id, first.id);
        assert_eq!(deps[0].version, 1);
        assert_eq!(deps[1].id, second.id);
        assert_eq!(deps[1].version, 7);
    }

    #[test]
    fn duplicate_reads_are_recorded_once() {
        let fixed = Fixed::new(2);

        let ((), deps) = track(|| {
            observe(&fixed);
            observe(&fixed);
            observe(&fixed);
        });

        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn nested_recorders_are_independent() {
        let outer_read = Fixed::new(1);
        let inner_read = Fixed::new(2);

        let ((), outer_deps) = track(|| {
            observe(&outer_read);

            let ((), inner_deps) = track(|| {
                observe(&inner_read);
            });
            assert_eq!(inner_deps.len(), 1);
            assert_eq!(inner_deps[0].id, inner_read.id);
        });

        // The inner evaluation's reads never leak into the outer recorder.
        assert_eq!(outer_deps.len(), 1);
        assert_eq!(outer_deps[0].id, outer_read.id);
    }

    #[test]
    fn recorder_stack_survives_a_panicking_evaluation() {
        let result = std::panic::catch_unwind(|| {
            track(|| panic!("boom"));
        });
        assert!(result.is_err());

        // The guard popped the recorder during unwinding.
        assert!(!is_tracking());
    }

    #[test]
    fn dependency_holds_only_a_weak_handle() {
        let fixed = Fixed::new(0);
        let ((), deps) = track(|| observe(&fixed));

        assert!(deps[0].target.upgrade().is_some());
        drop(fixed);
        assert!(deps[0].target.upgrade().is_none());
    }
}
