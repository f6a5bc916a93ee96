//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! is the only kind of node whose value is written from outside the graph.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a computed or an effect, the runtime links
//!    it to that consumer and records the signal's current version.
//!
//! 2. When a write changes the value (under the signal's equality), the
//!    version is bumped and the subscribers are marked.
//!
//! 3. Marked effects run when the outermost batch ends; marked computeds
//!    recompute on their next read.
//!
//! Writes that leave the value equal are dropped without touching the graph.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use super::runtime::Runtime;
use super::subscriber::{Readable, Subscription};
use crate::error::{raise, ReactiveError};
use crate::graph::{NodeId, NodeKind};

type EqFn<T> = dyn Fn(&T, &T) -> bool;

/// A reactive cell holding a value of type `T`.
///
/// Handles are cheap to clone; clones refer to the same node.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.signal(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (runs dependent effects)
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T: 'static> {
    id: NodeId,
    rt: Runtime,
    value: Rc<RefCell<T>>,
    eq: Rc<EqFn<T>>,
}

impl Runtime {
    /// Create a signal. Writes of a value equal (`PartialEq`) to the current
    /// one are ignored.
    pub fn signal<T: PartialEq + 'static>(&self, initial: T) -> Signal<T> {
        self.signal_with_eq(initial, T::eq)
    }

    /// Create a signal with a custom equality predicate.
    ///
    /// Use `|_, _| false` for a signal where every write counts as a change.
    pub fn signal_with_eq<T: 'static>(
        &self,
        initial: T,
        eq: impl Fn(&T, &T) -> bool + 'static,
    ) -> Signal<T> {
        Signal {
            id: self.create_node(NodeKind::Signal),
            rt: self.clone(),
            value: Rc::new(RefCell::new(initial)),
            eq: Rc::new(eq),
        }
    }
}

impl<T: 'static> Signal<T> {
    /// The signal's node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The runtime the signal belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.rt
    }

    /// Get a clone of the current value.
    ///
    /// If called within a computed or an effect, this also registers the
    /// signal as one of its dependencies.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the current value, with the same tracking as [`get`](Self::get).
    ///
    /// The signal must not be written from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.rt.track(self.id);
        f(&self.value.borrow())
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.value.borrow().clone()
    }

    /// Set a new value.
    ///
    /// Outside a batch, effects depending on the signal run before this
    /// returns. Writing a disposed signal does nothing. Fatal errors found
    /// while propagating are raised; see [`try_set`](Self::try_set).
    pub fn set(&self, value: T) {
        match self.try_set(value) {
            Ok(_) => {}
            Err(ReactiveError::Disposed { node }) => {
                debug!(%node, "write to disposed signal ignored");
            }
            Err(err) => raise(err),
        }
    }

    /// Set a new value, returning whether it changed.
    pub fn try_set(&self, value: T) -> Result<bool, ReactiveError> {
        if !self.rt.is_alive(self.id) {
            return Err(ReactiveError::Disposed { node: self.id });
        }
        if (self.eq)(&self.value.borrow(), &value) {
            return Ok(false);
        }
        let previous = std::mem::replace(&mut *self.value.borrow_mut(), value);
        drop(previous);

        self.rt.notify_changed(self.id)?;
        Ok(true)
    }

    /// Mutate the value in place. Always counts as a change.
    ///
    /// The signal must not be read from inside `f`.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        if !self.rt.is_alive(self.id) {
            debug!(node = %self.id, "update of disposed signal ignored");
            return;
        }
        f(&mut self.value.borrow_mut());
        if let Err(err) = self.rt.notify_changed(self.id) {
            raise(err);
        }
    }

    /// Call `listener` with the new value every time it changes.
    pub fn subscribe(&self, listener: impl FnMut(&T) + 'static) -> Subscription
    where
        T: Clone,
    {
        self.rt.subscribe(self, listener)
    }

    /// Number of consumers currently depending on this signal.
    pub fn subscriber_count(&self) -> usize {
        self.rt.subscribers(self.id).len()
    }

    /// Dispose the signal. The value stays readable; writes are ignored.
    pub fn dispose(&self) {
        self.rt.dispose(self.id);
    }

    /// Whether the signal has been disposed.
    pub fn is_disposed(&self) -> bool {
        !self.rt.is_alive(self.id)
    }
}

impl<T: 'static> Readable<T> for Signal<T> {
    fn node(&self) -> NodeId {
        self.id
    }

    fn try_read<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        Ok(self.with(f))
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            rt: self.rt.clone(),
            value: self.value.clone(),
            eq: self.eq.clone(),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Signal");
        out.field("id", &self.id);
        match self.value.try_borrow() {
            Ok(value) => out.field("value", &*value),
            Err(_) => out.field("value", &"<borrowed>"),
        };
        out.finish()
    }
}
