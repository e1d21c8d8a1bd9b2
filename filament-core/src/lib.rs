//! Filament Core
//!
//! This crate provides the dependency-tracking runtime for the Filament
//! reactive state engine. It implements:
//!
//! - Reactive primitives (atoms, constants, derivations, lenses)
//! - Automatic dependency capture with version-based staleness checks
//! - Atomic, nestable transactions with all-or-nothing rollback
//! - Reactors: observers fired exactly once per committed change
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `derivable`: the observable value types and their capability traits
//! - `tracking`: records which observables an evaluation reads
//! - `transaction`: atomic batches of writes with commit-time propagation
//! - `reactor`: subscribers re-run after committed changes
//!
//! Dependencies are dynamic: each evaluation re-records exactly the reads
//! it performed, so a derivation that branches tracks only the branch it
//! took. Propagation is pull-based and synchronous: a write invalidates
//! nothing eagerly, derived values revalidate on their next read, and a
//! commit makes a single pass to fire the affected reactors once each.
//!
//! # Example
//!
//! ```
//! use filament_core::{atom, derivation, transact, Derivable, SettableDerivable};
//!
//! let width = atom(2);
//! let height = atom(3);
//!
//! let area = {
//!     let (width, height) = (width.clone(), height.clone());
//!     derivation(move || width.get() * height.get())
//! };
//! assert_eq!(area.get(), 6);
//!
//! // Both writes land in one commit; observers of `area` would see the
//! // old and the new area, never an intermediate mix.
//! transact(|| {
//!     width.set(4);
//!     height.set(5);
//! });
//! assert_eq!(area.get(), 20);
//! ```

pub mod derivable;
pub mod reactor;
pub mod tracking;
pub mod transaction;

pub use derivable::{
    atom, constant, derivation, lens, Atom, Constant, Derivable, Derivation, Lens,
    SettableDerivable,
};
pub use reactor::{Reactor, ReactorError, ReactorId};
pub use tracking::{is_tracking, ObservableId};
pub use transaction::{in_transaction, transact, try_transact};
