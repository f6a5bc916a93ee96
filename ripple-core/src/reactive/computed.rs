//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. Creating a computed does not run it. The first read runs the body and
//!    caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, the cached value
//!    is returned.
//!
//! 3. When a dependency changes, the computed is only marked.
//!
//! 4. On next access, it re-checks whether its inputs actually changed (see
//!    `pull`), and recomputes only if one did.
//!
//! 5. A recomputation producing an equal value keeps the version, so
//!    consumers further down do not recompute either.
//!
//! Computeds that are never read stay marked and do no work.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use super::runtime::{Computation, Runtime};
use super::subscriber::{Readable, Subscription};
use crate::error::{catch_raised, raise, BoxError, ReactiveError};
use crate::graph::{NodeId, NodeKind};

type Body<T> = Rc<dyn Fn() -> Result<T, BoxError>>;

struct ComputedState<T> {
    id: NodeId,
    value: RefCell<Option<T>>,
    body: RefCell<Option<Body<T>>>,
    /// The last run failed; the next success must count as a change.
    failed: Cell<bool>,
}

impl<T: PartialEq + 'static> Computation for ComputedState<T> {
    fn run(&self, _rt: &Runtime) -> Result<bool, ReactiveError> {
        let body = self.body.borrow().clone();
        let Some(body) = body else {
            return Ok(false);
        };

        let result = catch_raised(|| body())
            .and_then(|value| value.map_err(|err| ReactiveError::from_body(self.id, err)));
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                self.failed.set(true);
                return Err(err);
            }
        };

        let changed =
            self.failed.replace(false) || self.value.borrow().as_ref() != Some(&value);
        if changed {
            let previous = self.value.replace(Some(value));
            drop(previous);
        }
        Ok(changed)
    }

    fn dispose(&self, _rt: &Runtime) {
        let body = self.body.borrow_mut().take();
        drop(body);
    }
}

/// A lazily evaluated, memoized value derived from other nodes.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let width = rt.signal(3);
/// let height = rt.signal(4);
///
/// let area = {
///     let (width, height) = (width.clone(), height.clone());
///     rt.computed(move || width.get() * height.get())
/// };
/// assert_eq!(area.get(), 12);
///
/// width.set(5);
/// assert_eq!(area.get(), 20);
/// ```
pub struct Computed<T: 'static> {
    id: NodeId,
    rt: Runtime,
    state: Rc<ComputedState<T>>,
}

impl Runtime {
    /// Create a computed from an infallible body.
    pub fn computed<T: PartialEq + 'static>(&self, f: impl Fn() -> T + 'static) -> Computed<T> {
        self.try_computed(move || Ok::<T, BoxError>(f()))
    }

    /// Create a computed whose body may fail.
    ///
    /// A failing body leaves the previous value in place and is retried on
    /// the next read.
    pub fn try_computed<T, E>(&self, f: impl Fn() -> Result<T, E> + 'static) -> Computed<T>
    where
        T: PartialEq + 'static,
        E: Into<BoxError>,
    {
        let id = self.create_node(NodeKind::Computed);
        let body: Body<T> = Rc::new(move || f().map_err(Into::into));
        let state = Rc::new(ComputedState {
            id,
            value: RefCell::new(None),
            body: RefCell::new(Some(body)),
            failed: Cell::new(false),
        });
        self.register(id, state.clone());
        Computed {
            id,
            rt: self.clone(),
            state,
        }
    }
}

impl<T: 'static> Computed<T> {
    /// The computed's node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The runtime the computed belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.rt
    }

    /// Get the current value, recomputing it if needed.
    ///
    /// Errors are raised; use [`try_get`](Self::try_get) to receive them.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => raise(err),
        }
    }

    /// Get the current value, recomputing it if needed.
    ///
    /// A disposed computed returns its last value without tracking, or
    /// [`ReactiveError::Disposed`] if it never produced one.
    pub fn try_get(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        self.try_read(T::clone)
    }

    /// Borrow the current value.
    ///
    /// Signals this computed depends on must not be written from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_read(f) {
            Ok(value) => value,
            Err(err) => raise(err),
        }
    }

    /// The cached value, without recomputing or tracking.
    pub fn get_untracked(&self) -> Option<T>
    where
        T: Clone,
    {
        self.state.value.borrow().clone()
    }

    /// Call `listener` with the new value every time it changes.
    pub fn subscribe(&self, listener: impl FnMut(&T) + 'static) -> Subscription
    where
        T: Clone,
    {
        self.rt.subscribe(self, listener)
    }

    /// Dispose the computed. Its last value stays readable.
    pub fn dispose(&self) {
        self.rt.dispose(self.id);
    }

    /// Whether the computed has been disposed.
    pub fn is_disposed(&self) -> bool {
        !self.rt.is_alive(self.id)
    }
}

impl<T: 'static> Readable<T> for Computed<T> {
    fn node(&self) -> NodeId {
        self.id
    }

    fn try_read<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        if self.rt.is_alive(self.id) {
            self.rt.read_node(self.id)?;
        } else {
            debug!(node = %self.id, "read of disposed computed");
        }
        let value = self.state.value.borrow();
        match value.as_ref() {
            Some(value) => Ok(f(value)),
            None => Err(ReactiveError::Disposed { node: self.id }),
        }
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            rt: self.rt.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Computed");
        out.field("id", &self.id);
        match self.state.value.try_borrow() {
            Ok(value) => out.field("value", &*value),
            Err(_) => out.field("value", &"<borrowed>"),
        };
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Flags;

    fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let c = Rc::new(Cell::new(0));
        (c.clone(), c)
    }

    #[test]
    fn test_computed_lazy() {
        let rt = Runtime::new();
        let (runs, runs2) = counter();
        let c = rt.computed(move || {
            runs2.set(runs2.get() + 1);
            42
        });

        // Not computed yet
        assert_eq!(runs.get(), 0);
        assert_eq!(c.get_untracked(), None);
        assert!(rt.flags(c.id()).unwrap().contains(Flags::DIRTY));

        // First access computes
        assert_eq!(c.get(), 42);
        assert_eq!(runs.get(), 1);

        // Second access uses cache
        assert_eq!(c.get(), 42);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_computed_recomputes_on_change() {
        let rt = Runtime::new();
        let s = rt.signal(2);
        let s2 = s.clone();
        let squared = rt.computed(move || s2.get() * s2.get());
        assert_eq!(squared.get(), 4);
        assert_eq!(rt.dependencies(squared.id()), vec![s.id()]);

        s.set(3);
        assert_eq!(squared.get(), 9);
        assert_eq!(rt.version(squared.id()), Some(2));
    }

    #[test]
    fn equal_result_keeps_version() {
        let rt = Runtime::new();
        let s = rt.signal(4);
        let s2 = s.clone();
        let is_even = rt.computed(move || s2.get() % 2 == 0);
        assert!(is_even.get());
        s.set(6);
        assert!(is_even.get());
        assert_eq!(rt.version(is_even.id()), Some(1));
    }

    #[test]
    fn with_borrows_without_cloning() {
        let rt = Runtime::new();
        let words = rt.signal(vec!["a", "bb", "ccc"]);
        let words2 = words.clone();
        let joined = rt.computed(move || words2.with(|w| w.concat()));
        assert_eq!(joined.with(|s| s.len()), 6);
    }

    #[test]
    fn nested_errors_pass_through_unchanged() {
        let rt = Runtime::new();
        let inner = rt.try_computed(|| -> Result<i32, BoxError> { Err("bad input".into()) });
        let inner2 = inner.clone();
        let outer = rt.try_computed(move || -> Result<i32, BoxError> { Ok(inner2.try_get()? + 1) });

        match outer.try_get() {
            Err(ReactiveError::Body { node, source }) => {
                assert_eq!(node, inner.id());
                assert_eq!(source.to_string(), "bad input");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn disposed_computed_keeps_last_value() {
        let rt = Runtime::new();
        let s = rt.signal(1);
        let s2 = s.clone();
        let c = rt.computed(move || s2.get() + 1);
        assert_eq!(c.get(), 2);

        c.dispose();
        s.set(10);
        assert_eq!(c.try_get().unwrap(), 2);
        assert_eq!(s.subscriber_count(), 0);

        let never = rt.computed(|| 1);
        never.dispose();
        assert!(matches!(never.try_get(), Err(ReactiveError::Disposed { .. })));
    }
}
