//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change. Effects are the leaves of the graph: nothing depends
//! on them, and they are what makes propagation happen eagerly.
//!
//! # Lifecycle
//!
//! 1. Creation runs the body once, inside a tracking frame, to establish the
//!    initial dependencies.
//!
//! 2. When a dependency changes, the effect is queued. At the end of the
//!    outermost batch the scheduler checks whether any dependency really
//!    changed, and re-runs the body if so.
//!
//! 3. The body may return a [`Cleanup`]. It runs before the next run and
//!    when the effect is disposed.
//!
//! 4. A disposed effect is unlinked from everything and never runs again.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::runtime::{Computation, Runtime};
use crate::error::{catch_raised, raise, BoxError, ReactiveError};
use crate::graph::{NodeId, NodeKind};

/// Teardown work returned by an effect body.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    /// Wrap a teardown closure.
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// Values an effect body may return.
///
/// Implemented for `()`, [`Cleanup`], `Option<Cleanup>`, `Result<(), E>` and
/// `Result<Cleanup, E>`.
pub trait EffectOutput {
    /// Split the output into an optional cleanup or an error.
    fn into_cleanup(self) -> Result<Option<Cleanup>, BoxError>;
}

impl EffectOutput for () {
    fn into_cleanup(self) -> Result<Option<Cleanup>, BoxError> {
        Ok(None)
    }
}

impl EffectOutput for Cleanup {
    fn into_cleanup(self) -> Result<Option<Cleanup>, BoxError> {
        Ok(Some(self))
    }
}

impl EffectOutput for Option<Cleanup> {
    fn into_cleanup(self) -> Result<Option<Cleanup>, BoxError> {
        Ok(self)
    }
}

impl<E: Into<BoxError>> EffectOutput for Result<(), E> {
    fn into_cleanup(self) -> Result<Option<Cleanup>, BoxError> {
        self.map(|()| None).map_err(Into::into)
    }
}

impl<E: Into<BoxError>> EffectOutput for Result<Cleanup, E> {
    fn into_cleanup(self) -> Result<Option<Cleanup>, BoxError> {
        self.map(Some).map_err(Into::into)
    }
}

type Body = Box<dyn FnMut() -> Result<Option<Cleanup>, BoxError>>;

struct EffectState {
    id: NodeId,
    body: RefCell<Option<Body>>,
    cleanup: RefCell<Option<Cleanup>>,
    disposed: Cell<bool>,
    runs: Cell<usize>,
}

impl EffectState {
    fn run_cleanup(&self, rt: &Runtime) {
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            rt.untracked(|| cleanup.run());
        }
    }
}

impl Computation for EffectState {
    fn run(&self, rt: &Runtime) -> Result<bool, ReactiveError> {
        if self.disposed.get() {
            return Ok(false);
        }
        self.run_cleanup(rt);

        let result = {
            let mut slot = self.body.borrow_mut();
            let Some(body) = slot.as_mut() else {
                return Ok(false);
            };
            catch_raised(body)
        };
        self.runs.set(self.runs.get() + 1);

        // Disposed from inside its own body
        if self.disposed.get() {
            let body = self.body.borrow_mut().take();
            drop(body);
        }

        let cleanup = result.and_then(|output| {
            output.map_err(|err| ReactiveError::from_body(self.id, err))
        })?;
        if self.disposed.get() {
            if let Some(cleanup) = cleanup {
                rt.untracked(|| cleanup.run());
            }
        } else {
            *self.cleanup.borrow_mut() = cleanup;
        }
        Ok(false)
    }

    fn dispose(&self, rt: &Runtime) {
        self.disposed.set(true);
        // A running body is dropped when it returns
        if let Ok(mut body) = self.body.try_borrow_mut() {
            let body = body.take();
            drop(body);
        }
        self.run_cleanup(rt);
    }
}

/// Handle to a running effect.
///
/// Dropping the handle does not stop the effect; call
/// [`dispose`](Self::dispose) for that.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.signal(0);
///
/// let count2 = count.clone();
/// let effect = rt.effect(move || {
///     println!("Count is: {}", count2.get());
/// });
///
/// count.set(5); // Prints: "Count is: 5"
/// effect.dispose();
/// count.set(6); // Prints nothing
/// ```
#[derive(Clone)]
pub struct Effect {
    id: NodeId,
    rt: Runtime,
    state: Rc<EffectState>,
}

impl Runtime {
    /// Create an effect and run it once.
    ///
    /// An error returned by the first run goes to the error handler, like the
    /// errors of later runs. Fatal errors are raised.
    pub fn effect<O: EffectOutput>(&self, mut f: impl FnMut() -> O + 'static) -> Effect {
        let id = self.create_node(NodeKind::Effect);
        let body: Body = Box::new(move || f().into_cleanup());
        let state = Rc::new(EffectState {
            id,
            body: RefCell::new(Some(body)),
            cleanup: RefCell::new(None),
            disposed: Cell::new(false),
            runs: Cell::new(0),
        });
        self.register(id, state.clone());

        let (first, flushed) = self.with_batch(|| self.refresh(id));
        match first {
            Err(err) if err.is_fatal() => raise(err),
            Err(err) => self.report(&err),
            Ok(()) => {}
        }
        if let Err(err) = flushed {
            raise(err);
        }

        Effect {
            id,
            rt: self.clone(),
            state,
        }
    }
}

impl Effect {
    /// The effect's node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Stop the effect: run its cleanup and unlink it. Idempotent.
    pub fn dispose(&self) {
        self.rt.dispose(self.id);
    }

    /// Whether the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.state.disposed.get()
    }

    /// Number of times the body has run.
    pub fn run_count(&self) -> usize {
        self.state.runs.get()
    }

    /// Number of producers the effect currently depends on.
    pub fn dependency_count(&self) -> usize {
        self.rt.dependencies(self.id).len()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("runs", &self.state.runs.get())
            .field("disposed", &self.state.disposed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_effect_runs_immediately() {
        let rt = Runtime::new();
        let count = Rc::new(Cell::new(0));
        let count2 = count.clone();

        let effect = rt.effect(move || count2.set(count2.get() + 1));
        assert_eq!(count.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn test_effect_reruns_on_change() {
        let rt = Runtime::new();
        let s = rt.signal(1);
        let seen = log();

        let (s2, seen2) = (s.clone(), seen.clone());
        let effect = rt.effect(move || seen2.borrow_mut().push(s2.get().to_string()));
        s.set(2);
        s.set(2);
        s.set(3);

        assert_eq!(*seen.borrow(), ["1", "2", "3"]);
        assert_eq!(effect.dependency_count(), 1);
    }

    #[test]
    fn test_effect_dispose() {
        let rt = Runtime::new();
        let s = rt.signal(0);
        let s2 = s.clone();
        let effect = rt.effect(move || {
            s2.get();
        });

        assert!(!effect.is_disposed());
        effect.dispose();
        effect.dispose();
        assert!(effect.is_disposed());
        assert!(!rt.is_alive(effect.id()));

        s.set(1);
        assert_eq!(effect.run_count(), 1);
        assert_eq!(s.subscriber_count(), 0);
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_dispose() {
        let rt = Runtime::new();
        let s = rt.signal(1);
        let seen = log();

        let (s2, seen2) = (s.clone(), seen.clone());
        let effect = rt.effect(move || {
            let value = s2.get();
            seen2.borrow_mut().push(format!("run {value}"));
            let seen3 = seen2.clone();
            Cleanup::new(move || seen3.borrow_mut().push(format!("cleanup {value}")))
        });
        s.set(2);
        effect.dispose();

        assert_eq!(
            *seen.borrow(),
            ["run 1", "cleanup 1", "run 2", "cleanup 2"]
        );
    }

    #[test]
    fn optional_cleanup() {
        let rt = Runtime::new();
        let armed = rt.signal(false);
        let fired = Rc::new(Cell::new(0));

        let (armed2, fired2) = (armed.clone(), fired.clone());
        let _effect = rt.effect(move || {
            let fired3 = fired2.clone();
            armed2
                .get()
                .then(|| Cleanup::new(move || fired3.set(fired3.get() + 1)))
        });
        armed.set(true);
        assert_eq!(fired.get(), 0);
        armed.set(false);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn effect_can_dispose_itself() {
        let rt = Runtime::new();
        let s = rt.signal(0);
        let slot: Rc<RefCell<Option<Effect>>> = Rc::default();

        let cleanups = Rc::new(Cell::new(0));

        let (s2, slot2, cleanups2) = (s.clone(), slot.clone(), cleanups.clone());
        let effect = rt.effect(move || {
            if s2.get() < 2 {
                return None;
            }
            if let Some(me) = slot2.borrow().as_ref() {
                me.dispose();
            }
            let cleanups = cleanups2.clone();
            Some(Cleanup::new(move || cleanups.set(cleanups.get() + 1)))
        });
        *slot.borrow_mut() = Some(effect.clone());

        s.set(1);
        assert_eq!(cleanups.get(), 0);
        s.set(2);
        assert_eq!(cleanups.get(), 1);
        s.set(3);
        assert!(effect.is_disposed());
        assert_eq!(effect.run_count(), 3);
        assert_eq!(cleanups.get(), 1);
        assert_eq!(s.subscriber_count(), 0);
    }

    #[test]
    fn failing_effect_is_retried_on_next_change() {
        let rt = Runtime::new();
        let errors = Rc::new(Cell::new(0));
        let errors2 = errors.clone();
        rt.on_error(move |_| errors2.set(errors2.get() + 1));

        let s = rt.signal(1);
        let s2 = s.clone();
        let effect = rt.effect(move || -> Result<(), BoxError> {
            if s2.get() % 2 == 0 {
                return Err("even".into());
            }
            Ok(())
        });
        s.set(2);
        s.set(3);
        assert_eq!(errors.get(), 1);
        assert_eq!(effect.run_count(), 3);
        assert_eq!(effect.dependency_count(), 1);
    }
}
