//! Lens Implementation
//!
//! A Lens is a Derivation that is also settable. Reading goes through the
//! usual derivation machinery, including dependency recording and the
//! version-based cache. Writing delegates to a setter whose job is to
//! mutate whatever underlying atoms make a subsequent `get` return the
//! written value.
//!
//! The setter always runs inside a transaction. An active transaction is
//! joined rather than nested, so a lens write composes with a caller's
//! larger batch and a failure anywhere in that batch discards the lens
//! write along with everything else.
//!
//! The setter's obligation is a caller contract, not something the engine
//! enforces: a setter that writes nothing leaves the lens reading its old
//! derived value, which is a documented outcome rather than an error.

use std::fmt::Debug;
use std::sync::Arc;

use super::{Derivable, Derivation, SettableDerivable};
use crate::tracking::ObservableId;
use crate::transaction::transact;

/// A settable view derived from other observables.
///
/// # Example
///
/// ```rust,ignore
/// let celsius = Atom::new(0.0);
/// let fahrenheit = {
///     let read = celsius.clone();
///     let write = celsius.clone();
///     Lens::new(
///         move || read.get() * 9.0 / 5.0 + 32.0,
///         move |f| write.set((f - 32.0) * 5.0 / 9.0),
///     )
/// };
/// ```
pub struct Lens<T>
where
    T: Clone + Send + Sync + 'static,
{
    derivation: Derivation<T>,
    setter: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T> Lens<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new lens from a getter and a setter.
    ///
    /// The getter is an ordinary deriver, including automatic dependency
    /// recording; the setter is the sink for written values.
    pub fn new<G, S>(getter: G, setter: S) -> Self
    where
        T: PartialEq,
        G: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        Self {
            derivation: Derivation::new(getter),
            setter: Arc::new(setter),
        }
    }

    /// Create a new lens with a custom change-detection function for the
    /// derived side.
    pub fn with_equality<G, S, E>(getter: G, setter: S, equals: E) -> Self
    where
        G: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            derivation: Derivation::with_equality(getter, equals),
            setter: Arc::new(setter),
        }
    }

    /// Get the lens's unique ID.
    pub fn id(&self) -> ObservableId {
        self.derivation.id()
    }
}

impl<T> Derivable<T> for Lens<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> T {
        self.derivation.get()
    }

    fn version(&self) -> u64 {
        self.derivation.version()
    }
}

impl<T> SettableDerivable<T> for Lens<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn set(&self, value: T) {
        transact(|| (self.setter)(value));
    }
}

impl<T> Clone for Lens<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            derivation: self.derivation.clone(),
            setter: Arc::clone(&self.setter),
        }
    }
}

impl<T> Debug for Lens<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lens")
            .field("id", &self.id())
            .field("has_cached_value", &self.derivation.has_cached_value())
            .finish()
    }
}
