//! Reactors
//!
//! A Reactor subscribes to an observable and re-runs a side-effecting
//! callback after every committed change of the observed value.
//!
//! # How Reactors Work
//!
//! 1. Each reactor remembers the last version of its observable it reacted
//!    to.
//!
//! 2. After the outermost transaction commits, the sweep polls every
//!    registered reactor. Polling asks the observable for its version,
//!    which revalidates derived observables first, so the comparison
//!    reflects the transaction's final state.
//!
//! 3. A reactor whose observable moved fires exactly once per commit, and
//!    only after every write of that commit is final. A reactor observing
//!    two atoms through one derivation therefore never sees a mix of old
//!    and new values.
//!
//! # Lifecycle
//!
//! [`Reactor::new`] runs the callback once immediately and starts
//! observing; [`Reactor::new_deferred`] waits for an explicit
//! [`start`](Reactor::start). A stopped reactor cannot be restarted.
//! Stopping takes effect immediately, including from inside the reactor's
//! own callback: no further notification reaches it, not even later in the
//! same commit.
//!
//! Registered reactors are tracked per thread, in registration order, as
//! weak handles: dropping the last handle to a reactor ends its
//! subscription, and dead entries are pruned during sweeps. Propagation is
//! single-threaded; a reactor observes commits made on the thread it was
//! created on.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use thiserror::Error;

use crate::derivable::Derivable;

/// Unique identifier for a reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReactorId(u64);

impl ReactorId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Errors from the reactor lifecycle.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReactorError {
    /// `start` was called on a reactor that is already observing.
    #[error("reactor is already active")]
    AlreadyActive,

    /// A stopped reactor cannot be restarted.
    #[error("reactor has been stopped and cannot be restarted")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifeCycle {
    Pending,
    Active,
    Stopped,
}

/// An observer fired once per committed change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Atom::new(0);
/// let reactor = count.react(|value| println!("count is now {value}"));
/// count.set(5); // prints "count is now 5"
/// reactor.stop();
/// ```
pub struct Reactor {
    core: Arc<ReactorCore>,
}

struct ReactorCore {
    id: ReactorId,
    state: Cell<LifeCycle>,

    /// Polls the observed derivable and fires the callback when its
    /// version moved since the last firing.
    sweep: RefCell<Box<dyn FnMut()>>,
}

thread_local! {
    static REGISTRY: RefCell<IndexMap<ReactorId, Weak<ReactorCore>>> =
        RefCell::new(IndexMap::new());
}

impl Reactor {
    /// Create a reactor and run the callback once immediately with the
    /// current value.
    pub fn new<T, D, F>(source: D, callback: F) -> Self
    where
        D: Derivable<T> + 'static,
        F: FnMut(T) + 'static,
    {
        let reactor = Self::new_deferred(source, callback);
        reactor.core.activate();
        reactor
    }

    /// Create a reactor without starting it.
    ///
    /// Nothing runs and nothing is observed until [`Reactor::start`].
    pub fn new_deferred<T, D, F>(source: D, mut callback: F) -> Self
    where
        D: Derivable<T> + 'static,
        F: FnMut(T) + 'static,
    {
        let id = ReactorId::new();
        let mut last_version: Option<u64> = None;
        let sweep = move || {
            let version = source.version();
            if last_version != Some(version) {
                last_version = Some(version);
                tracing::trace!(reactor = id.0, version, "reactor fired");
                callback(source.get());
            }
        };

        Self {
            core: Arc::new(ReactorCore {
                id,
                state: Cell::new(LifeCycle::Pending),
                sweep: RefCell::new(Box::new(sweep)),
            }),
        }
    }

    /// Get the reactor's unique ID.
    pub fn id(&self) -> ReactorId {
        self.core.id
    }

    /// Start a deferred reactor: registers it and runs the callback once
    /// with the current value.
    pub fn start(&self) -> Result<(), ReactorError> {
        match self.core.state.get() {
            LifeCycle::Active => Err(ReactorError::AlreadyActive),
            LifeCycle::Stopped => Err(ReactorError::Stopped),
            LifeCycle::Pending => {
                self.core.activate();
                Ok(())
            }
        }
    }

    /// Stop observing. Takes effect immediately, even when called from
    /// inside this reactor's own callback. A stopped reactor cannot be
    /// restarted.
    pub fn stop(&self) {
        self.core.state.set(LifeCycle::Stopped);
        REGISTRY.with(|registry| {
            registry.borrow_mut().shift_remove(&self.core.id);
        });
        tracing::trace!(reactor = self.core.id.0, "reactor stopped");
    }

    /// Check whether the reactor is currently observing.
    pub fn is_active(&self) -> bool {
        self.core.state.get() == LifeCycle::Active
    }
}

impl ReactorCore {
    fn activate(self: &Arc<Self>) {
        self.state.set(LifeCycle::Active);
        REGISTRY.with(|registry| {
            registry.borrow_mut().insert(self.id, Arc::downgrade(self));
        });

        // Prime: fire with the current value so the next commit is compared
        // against a known baseline.
        if let Ok(mut sweep) = self.sweep.try_borrow_mut() {
            (&mut *sweep)();
        }
    }
}

impl Clone for Reactor {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("id", &self.core.id)
            .field("state", &self.core.state.get())
            .finish()
    }
}

/// Poll every registered reactor once.
///
/// Called by the transaction manager after the outermost commit finalizes
/// its values. Iterates a snapshot of the registry so callbacks may freely
/// start, stop, or drop reactors while the sweep runs.
pub(crate) fn run_sweep() {
    let entries: Vec<(ReactorId, Weak<ReactorCore>)> = REGISTRY.with(|registry| {
        registry
            .borrow()
            .iter()
            .map(|(id, weak)| (*id, Weak::clone(weak)))
            .collect()
    });

    let mut dead = Vec::new();
    for (id, weak) in entries {
        match weak.upgrade() {
            Some(core) => {
                // A callback earlier in this sweep may have stopped it.
                if core.state.get() != LifeCycle::Active {
                    continue;
                }
                // A reactor that is mid-callback (a cascading write
                // re-entered the sweep) is skipped; it already observes the
                // final state.
                if let Ok(mut sweep) = core.sweep.try_borrow_mut() {
                    (&mut *sweep)();
                }
            }
            None => dead.push(id),
        }
    }

    if !dead.is_empty() {
        REGISTRY.with(|registry| {
            let mut registry = registry.borrow_mut();
            for id in dead {
                registry.shift_remove(&id);
            }
        });
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivable::{atom, Derivable, SettableDerivable};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn reactor_fires_immediately_on_creation() {
        let source = atom(41);
        let seen = Rc::new(Cell::new(None));

        let _reactor = {
            let seen = seen.clone();
            source.react(move |value| seen.set(Some(value)))
        };

        assert_eq!(seen.get(), Some(41));
    }

    #[test]
    fn reactor_fires_once_per_committed_change() {
        let source = atom(0);
        let fired = Rc::new(Cell::new(0));

        let _reactor = {
            let fired = fired.clone();
            source.react(move |_| fired.set(fired.get() + 1))
        };
        assert_eq!(fired.get(), 1);

        source.set(1);
        assert_eq!(fired.get(), 2);

        source.set(2);
        assert_eq!(fired.get(), 3);
    }

    #[test]
    fn equal_value_writes_do_not_fire() {
        let source = atom(5);
        let fired = Rc::new(Cell::new(0));

        let _reactor = {
            let fired = fired.clone();
            source.react(move |_| fired.set(fired.get() + 1))
        };
        assert_eq!(fired.get(), 1);

        source.set(5);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn deferred_reactor_waits_for_start() {
        let source = atom(0);
        let fired = Rc::new(Cell::new(0));

        let reactor = {
            let fired = fired.clone();
            Reactor::new_deferred(source.clone(), move |_: i32| fired.set(fired.get() + 1))
        };

        assert!(!reactor.is_active());
        source.set(1);
        assert_eq!(fired.get(), 0);

        reactor.start().unwrap();
        assert!(reactor.is_active());
        assert_eq!(fired.get(), 1);

        source.set(2);
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn starting_an_active_reactor_fails() {
        let source = atom(0);
        let reactor = source.react(|_| {});

        assert_eq!(reactor.start(), Err(ReactorError::AlreadyActive));
    }

    #[test]
    fn a_stopped_reactor_cannot_be_restarted() {
        let source = atom(0);
        let reactor = source.react(|_| {});

        reactor.stop();
        assert!(!reactor.is_active());
        assert_eq!(reactor.start(), Err(ReactorError::Stopped));
    }

    #[test]
    fn stop_prevents_further_notifications() {
        let source = atom(0);
        let fired = Rc::new(Cell::new(0));

        let reactor = {
            let fired = fired.clone();
            source.react(move |_| fired.set(fired.get() + 1))
        };
        assert_eq!(fired.get(), 1);

        reactor.stop();
        source.set(1);
        source.set(2);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn a_reactor_may_stop_itself_from_its_own_callback() {
        let source = atom(0);
        let fired = Rc::new(Cell::new(0));
        let handle: Rc<Cell<Option<Reactor>>> = Rc::new(Cell::new(None));

        let reactor = {
            let fired = fired.clone();
            let handle = handle.clone();
            source.react(move |value| {
                fired.set(fired.get() + 1);
                if value > 0 {
                    if let Some(me) = handle.take() {
                        me.stop();
                    }
                }
            })
        };
        handle.set(Some(reactor.clone()));
        assert_eq!(fired.get(), 1);

        source.set(1);
        assert_eq!(fired.get(), 2);
        assert!(!reactor.is_active());

        source.set(2);
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn dropping_every_handle_ends_the_subscription() {
        let source = atom(0);
        let fired = Rc::new(Cell::new(0));

        let reactor = {
            let fired = fired.clone();
            source.react(move |_| fired.set(fired.get() + 1))
        };
        assert_eq!(fired.get(), 1);

        drop(reactor);
        source.set(1);
        assert_eq!(fired.get(), 1);
    }
}
