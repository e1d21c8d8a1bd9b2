//! Derivation Implementation
//!
//! A Derivation is a cached pure computation over other observables.
//!
//! # How Derivations Work
//!
//! 1. On first access, the deriver runs inside a fresh recorder and the
//!    result is cached together with the `(id, version)` pair of every
//!    observable it read.
//!
//! 2. On later accesses, the cache is fresh when every recorded dependency
//!    still reports the version it was read at. Checking that is O(number
//!    of dependencies) instead of O(recompute).
//!
//! 3. Querying a derivation's version first brings it up to date, so a
//!    consumer comparing against a recorded version sees through whole
//!    chains of derivations.
//!
//! 4. The version advances only when the recomputed value differs from the
//!    cached one under the configured equality. Recomputation churn that
//!    lands on an equal value is invisible downstream.
//!
//! Dependency sets are dynamic: a deriver that branches may read different
//! observables on different runs, and the cache always reflects exactly
//! the reads of the latest run. Nothing recomputes eagerly when a source
//! changes; recomputation happens on the next read.
//!
//! Evaluation is single-threaded. A deriver that (transitively) reads the
//! derivation it belongs to panics with a cycle message.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::Derivable;
use crate::tracking::{self, DependencyList, ObservableId, Versioned};

type EqualityFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// A memoized computation over other observables.
///
/// # Example
///
/// ```rust,ignore
/// let count = Atom::new(2);
/// let doubled = {
///     let count = count.clone();
///     Derivation::new(move || count.get() * 2)
/// };
/// assert_eq!(doubled.get(), 4);
/// ```
pub struct Derivation<T>
where
    T: Clone + Send + Sync + 'static,
{
    core: Arc<DerivationCore<T>>,
}

/// Result of the latest evaluation: the value and the reads that produced it.
struct CachedValue<T> {
    value: T,
    dependencies: DependencyList,
}

struct DerivationCore<T> {
    /// Unique identifier for this derivation.
    id: ObservableId,

    /// The pure computation.
    deriver: Box<dyn Fn() -> T + Send + Sync>,

    /// Decides whether a recomputed value counts as a change.
    equals: EqualityFn<T>,

    /// Advances only when a recomputation produces a different value.
    version: AtomicU64,

    /// `None` until the first evaluation, and after that always the latest
    /// evaluation's result.
    cache: RwLock<Option<CachedValue<T>>>,

    /// Cycle guard: set while the deriver runs.
    evaluating: AtomicBool,
}

impl<T> Derivation<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new derivation computed by `deriver`, comparing results
    /// with `PartialEq`.
    ///
    /// The deriver is not run immediately; it runs on first access.
    pub fn new<F>(deriver: F) -> Self
    where
        T: PartialEq,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_equality(deriver, |a, b| a == b)
    }

    /// Create a new derivation with a custom change-detection function.
    pub fn with_equality<F, E>(deriver: F, equals: E) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            core: Arc::new(DerivationCore {
                id: ObservableId::new(),
                deriver: Box::new(deriver),
                equals: Box::new(equals),
                version: AtomicU64::new(0),
                cache: RwLock::new(None),
                evaluating: AtomicBool::new(false),
            }),
        }
    }

    /// Get the derivation's unique ID.
    pub fn id(&self) -> ObservableId {
        self.core.id
    }

    /// Check whether the derivation currently holds a cached value.
    pub fn has_cached_value(&self) -> bool {
        self.core.cache.read().is_some()
    }
}

impl<T> DerivationCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Check the cache against the recorded dependency versions.
    fn is_fresh(&self) -> bool {
        let dependencies = match self.cache.read().as_ref() {
            Some(cached) => cached.dependencies.clone(),
            None => return false,
        };
        dependencies.iter().all(|dep| match dep.target.upgrade() {
            Some(target) => target.current_version() == dep.version,
            // A dropped dependency can no longer be compared; recompute.
            None => false,
        })
    }

    /// Recompute when stale, rewriting the cache and advancing the version
    /// only on a value-level change.
    fn update_if_needed(&self) {
        if self.is_fresh() {
            return;
        }

        if self.evaluating.swap(true, Ordering::SeqCst) {
            panic!("cyclic dependency: derivation read during its own evaluation");
        }
        let _guard = ClearOnDrop(&self.evaluating);

        let (value, dependencies) = tracking::track(|| (self.deriver)());

        let changed = {
            let mut cache = self.cache.write();
            let changed = match cache.as_ref() {
                Some(cached) => !(self.equals)(&cached.value, &value),
                None => false,
            };
            *cache = Some(CachedValue {
                value,
                dependencies,
            });
            changed
        };

        if changed {
            self.version.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Clears the cycle guard even when the deriver panics.
struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<T> Versioned for DerivationCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn current_version(&self) -> u64 {
        self.update_if_needed();
        self.version.load(Ordering::SeqCst)
    }
}

impl<T> Derivable<T> for Derivation<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> T {
        self.core.update_if_needed();

        // Consumers depend on this derivation, not on its sources; record
        // the observation with the post-update version.
        let core: Arc<dyn Versioned> = self.core.clone();
        let weak: Weak<dyn Versioned> = Arc::downgrade(&core);
        tracking::record_observation(
            self.core.id,
            self.core.version.load(Ordering::SeqCst),
            weak,
        );

        self.core
            .cache
            .read()
            .as_ref()
            .map(|cached| cached.value.clone())
            .expect("an up-to-date derivation always holds a cached value")
    }

    fn version(&self) -> u64 {
        self.core.update_if_needed();
        self.core.version.load(Ordering::SeqCst)
    }
}

impl<T> Clone for Derivation<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Debug for Derivation<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derivation")
            .field("id", &self.core.id)
            .field("has_cached_value", &self.has_cached_value())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivable::{atom, Atom, SettableDerivable};
    use std::sync::atomic::AtomicI32;
    use std::sync::OnceLock;

    #[test]
    fn computes_on_first_access() {
        let call_count = Arc::new(AtomicI32::new(0));
        let calls = call_count.clone();

        let derived = Derivation::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert!(!derived.has_cached_value());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        assert_eq!(derived.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(derived.has_cached_value());
    }

    #[test]
    fn caches_while_dependencies_are_unchanged() {
        let source = atom(10);
        let call_count = Arc::new(AtomicI32::new(0));

        let derived = {
            let source = source.clone();
            let calls = call_count.clone();
            Derivation::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                source.get() * 2
            })
        };

        assert_eq!(derived.get(), 20);
        assert_eq!(derived.get(), 20);
        assert_eq!(derived.get(), 20);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recomputes_after_a_source_change() {
        let source = atom(10);
        let derived = {
            let source = source.clone();
            Derivation::new(move || source.get() * 2)
        };

        assert_eq!(derived.get(), 20);

        source.set(5);
        assert_eq!(derived.get(), 10);
    }

    #[test]
    fn version_advances_only_on_value_change() {
        let source = atom(1);
        let positive = {
            let source = source.clone();
            Derivation::new(move || source.get() > 0)
        };

        assert!(positive.get());
        assert_eq!(positive.version(), 0);

        // Recomputes, but the result is still `true`.
        source.set(2);
        assert!(positive.get());
        assert_eq!(positive.version(), 0);

        source.set(-1);
        assert!(!positive.get());
        assert_eq!(positive.version(), 1);
    }

    #[test]
    fn dependencies_follow_the_latest_evaluation() {
        let use_left = atom(true);
        let left = atom(1);
        let right = atom(10);
        let call_count = Arc::new(AtomicI32::new(0));

        let picked = {
            let (use_left, left, right) = (use_left.clone(), left.clone(), right.clone());
            let calls = call_count.clone();
            Derivation::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                if use_left.get() {
                    left.get()
                } else {
                    right.get()
                }
            })
        };

        assert_eq!(picked.get(), 1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        // The untaken branch is not a dependency.
        right.set(20);
        assert_eq!(picked.get(), 1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        use_left.set(false);
        assert_eq!(picked.get(), 20);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);

        // After switching branches the old branch is no longer a dependency.
        left.set(2);
        assert_eq!(picked.get(), 20);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn untracked_reads_do_not_create_dependencies() {
        let tracked = atom(1);
        let untracked: Atom<i32> = atom(100);

        let derived = {
            let (tracked, untracked) = (tracked.clone(), untracked.clone());
            Derivation::new(move || tracked.get() + untracked.get_untracked())
        };

        assert_eq!(derived.get(), 101);

        untracked.set(200);
        // Still the cached value: the untracked read is not a dependency.
        assert_eq!(derived.get(), 101);

        tracked.set(2);
        assert_eq!(derived.get(), 202);
    }

    #[test]
    fn no_cache_is_written_when_the_deriver_panics() {
        let should_fail = Arc::new(AtomicBool::new(true));

        let derived = {
            let should_fail = should_fail.clone();
            Derivation::new(move || {
                if should_fail.load(Ordering::SeqCst) {
                    panic!("deriver failure");
                }
                7
            })
        };

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| derived.get()));
        assert!(result.is_err());
        assert!(!derived.has_cached_value());

        // The derivation retries on the next read.
        should_fail.store(false, Ordering::SeqCst);
        assert_eq!(derived.get(), 7);
    }

    #[test]
    #[should_panic(expected = "cyclic dependency")]
    fn self_referential_derivation_panics() {
        let slot: Arc<OnceLock<Derivation<i32>>> = Arc::new(OnceLock::new());

        let derived = {
            let slot = Arc::clone(&slot);
            Derivation::new(move || match slot.get() {
                Some(inner) => inner.get() + 1,
                None => 0,
            })
        };

        let _ = slot.set(derived.clone());
        derived.get();
    }

    #[test]
    fn clone_shares_state() {
        let derived = Derivation::new(|| 42);
        assert_eq!(derived.get(), 42);

        let other = derived.clone();
        assert_eq!(other.id(), derived.id());
        assert!(other.has_cached_value());
        assert_eq!(other.get(), 42);
    }
}
