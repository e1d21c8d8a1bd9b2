//! Derivables
//!
//! This module implements the observable value types: atoms, derivations,
//! lenses, and constants.
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An [`Atom`] is the basic state holder: a mutable cell with a version
//! counter. Writing a value that equals the current one is a no-op; an
//! effective write advances the version, which is what downstream staleness
//! checks compare against.
//!
//! ## Derivations
//!
//! A [`Derivation`] is a memoized pure computation over other observables.
//! Reading it inside another derivation registers the derivation itself,
//! not its transitive sources, as the dependency, so a consumer is
//! insulated from source changes that do not change the derived value.
//!
//! ## Lenses
//!
//! A [`Lens`] is a derivation with a setter. Writing through a lens always
//! happens inside a transaction, joining the caller's transaction when one
//! is active.
//!
//! ## Constants
//!
//! A [`Constant`] never changes and never participates in propagation; its
//! version is pinned to zero.
//!
//! # Capability split
//!
//! Reading and writing are separate traits. Everything implements
//! [`Derivable`]; only atoms and lenses implement [`SettableDerivable`],
//! so writing to a derivation or constant is not expressible.

mod atom;
mod constant;
mod derivation;
mod lens;

pub use atom::Atom;
pub use constant::Constant;
pub use derivation::Derivation;
pub use lens::Lens;

use crate::reactor::Reactor;
use crate::transaction::transact;

/// A readable observable value.
pub trait Derivable<T> {
    /// Returns the current value. When called during a derivation's
    /// evaluation, the read is recorded as a dependency.
    fn get(&self) -> T;

    /// Monotonic counter that advances whenever the externally visible
    /// value changes. Two reads at the same version yield equal values.
    fn version(&self) -> u64;

    /// Create a derivation that applies `f` to this observable's value.
    fn derive<U, F>(&self, f: F) -> Derivation<U>
    where
        Self: Clone + Send + Sync + Sized + 'static,
        U: PartialEq + Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let source = self.clone();
        Derivation::new(move || f(source.get()))
    }

    /// Subscribe `f` to this observable: it runs once immediately and again
    /// after every committed change of the value.
    fn react<F>(&self, f: F) -> Reactor
    where
        Self: Clone + Sized + 'static,
        F: FnMut(T) + 'static,
    {
        Reactor::new(self.clone(), f)
    }
}

/// An observable whose value can be written as well as read.
pub trait SettableDerivable<T>: Derivable<T> {
    /// Replace the current value. Equal values are a no-op; an effective
    /// write is staged under the active transaction (an implicit one when
    /// none is active) and observers are notified at commit.
    fn set(&self, value: T);

    /// Atomically replace the value with a function of the current one.
    fn update<F>(&self, f: F)
    where
        Self: Sized,
        F: FnOnce(&T) -> T,
    {
        transact(|| {
            let next = f(&self.get());
            self.set(next);
        });
    }
}

/// Construct a new atom holding `value`.
pub fn atom<T>(value: T) -> Atom<T>
where
    T: PartialEq + Clone + Send + Sync + 'static,
{
    Atom::new(value)
}

/// Construct a new constant wrapping `value`.
pub fn constant<T>(value: T) -> Constant<T>
where
    T: Clone,
{
    Constant::new(value)
}

/// Construct a new derivation computed by `deriver`.
pub fn derivation<T, F>(deriver: F) -> Derivation<T>
where
    T: PartialEq + Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Derivation::new(deriver)
}

/// Construct a new lens from a getter and a setter.
pub fn lens<T, G, S>(getter: G, setter: S) -> Lens<T>
where
    T: PartialEq + Clone + Send + Sync + 'static,
    G: Fn() -> T + Send + Sync + 'static,
    S: Fn(T) + Send + Sync + 'static,
{
    Lens::new(getter, setter)
}
