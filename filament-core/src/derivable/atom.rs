//! Atom Implementation
//!
//! An Atom is the mutable source of truth in the dependency graph. All
//! other observables either wrap immutable state (constants) or state
//! derived from atoms (derivations, lenses).
//!
//! # How Atoms Work
//!
//! 1. Reading an atom inside a derivation's evaluation records the read in
//!    the active recorder, together with the atom's current version.
//!
//! 2. Writing a value equal to the current one (under the atom's equality
//!    function) does nothing: no version bump, no notification.
//!
//! 3. An effective write swaps the value in place, advances the version,
//!    and stages the pre-image under the active transaction (opening an
//!    implicit single-write transaction when none is active), so the write
//!    can be rolled back and observers notified exactly once at commit.
//!
//! An atom holds no references to its dependents. Staleness is decided by
//! the dependents themselves, comparing recorded versions, and reactors are
//! found by the commit-time sweep.
//!
//! # Memory Layout
//!
//! Handles are cheap: an `Atom<T>` is an `Arc` around the shared core, and
//! cloning a handle shares state with the original.

use std::fmt::Debug;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::{Derivable, SettableDerivable};
use crate::tracking::{self, ObservableId, Versioned};
use crate::transaction;

type EqualityFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// A mutable state cell with a version counter.
///
/// # Example
///
/// ```rust,ignore
/// let count = Atom::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (observers notified at commit)
/// count.set(5);
/// ```
pub struct Atom<T>
where
    T: Clone + Send + Sync + 'static,
{
    core: Arc<AtomCore<T>>,
}

struct AtomCore<T> {
    /// Unique identifier for this atom.
    id: ObservableId,

    /// The current value. During a transaction this is the staged value.
    value: RwLock<T>,

    /// Advances on every effective write; restored on rollback.
    version: AtomicU64,

    /// Decides whether a write actually changes the value.
    equals: EqualityFn<T>,
}

impl<T> Atom<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new atom with the given initial value, comparing writes
    /// with `PartialEq`.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equality(value, |a, b| a == b)
    }

    /// Create a new atom that uses `equals` to decide whether a write
    /// changes the value.
    pub fn with_equality<E>(value: T, equals: E) -> Self
    where
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            core: Arc::new(AtomCore {
                id: ObservableId::new(),
                value: RwLock::new(value),
                version: AtomicU64::new(0),
                equals: Box::new(equals),
            }),
        }
    }

    /// Get the atom's unique ID.
    pub fn id(&self) -> ObservableId {
        self.core.id
    }

    /// Get the current value without recording a dependency.
    ///
    /// Use this to read a value inside a derivation without making the
    /// derivation re-run when it changes.
    pub fn get_untracked(&self) -> T {
        self.core.value.read().clone()
    }
}

impl<T> AtomCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Stage a new value under the active transaction.
    ///
    /// The equality check runs strictly before the value is touched, so a
    /// panicking comparer leaves the atom unchanged.
    fn stage(self: &Arc<Self>, new_value: T) {
        let unchanged = (self.equals)(&*self.value.read(), &new_value);
        if unchanged {
            return;
        }

        let old_value = mem::replace(&mut *self.value.write(), new_value);
        let old_version = self.version.fetch_add(1, Ordering::SeqCst);

        let core = Arc::clone(self);
        transaction::stage(
            self.id,
            Box::new(move || {
                *core.value.write() = old_value;
                core.version.store(old_version, Ordering::SeqCst);
            }),
        );
    }
}

impl<T> Versioned for AtomCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

impl<T> Derivable<T> for Atom<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> T {
        let core: Arc<dyn Versioned> = self.core.clone();
        let weak: Weak<dyn Versioned> = Arc::downgrade(&core);
        tracking::record_observation(
            self.core.id,
            self.core.version.load(Ordering::SeqCst),
            weak,
        );
        self.core.value.read().clone()
    }

    fn version(&self) -> u64 {
        self.core.version.load(Ordering::SeqCst)
    }
}

impl<T> SettableDerivable<T> for Atom<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn set(&self, value: T) {
        transaction::transact(|| self.core.stage(value));
    }
}

impl<T> Clone for Atom<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Debug for Atom<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.core.id)
            .field("value", &self.get_untracked())
            .field("version", &self.version())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
