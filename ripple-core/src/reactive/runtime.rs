//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computeds
//! and effects. It owns the dependency graph, the scheduler and the context
//! stack, and every primitive is created through it.
//!
//! # How It Works
//!
//! 1. Creating a primitive allocates a node in the graph. Computeds and
//!    effects also register their body as a [`Computation`].
//!
//! 2. When a body reads a signal or computed, the runtime links it to the
//!    consumer on top of the context stack.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. bumps the signal's version,
//!    b. marks every reachable consumer (see `graph::scheduler`),
//!    c. queues the reached effects,
//!    d. flushes the queue once the outermost batch ends.
//!
//! Computeds are lazy: they are only marked, and resolve on the next read.
//!
//! # Ownership
//!
//! There is no global runtime. Each `Runtime` is an independent reactive
//! universe; handles keep it alive through a reference count. Bodies that
//! capture handles form reference cycles through the runtime, which
//! [`Runtime::dispose`] and [`Runtime::teardown`] break.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use serde::Serialize;
use tracing::{debug, error, trace, warn};

use super::context::{ContextStack, TrackingScope};
use super::scope::Scope;
use crate::config::RuntimeConfig;
use crate::error::{catch_raised, raise, ReactiveError};
use crate::graph::{Flags, Graph, Marker, NodeId, NodeKind, Scheduler, ScopeId, Scopes};

/// Type-erased body of a computed or an effect.
pub(crate) trait Computation {
    /// Run the body once, inside a tracking frame set up by the caller.
    ///
    /// Returns whether the node's observable value changed.
    fn run(&self, rt: &Runtime) -> Result<bool, ReactiveError>;

    /// Release the body. Called once, when the node is disposed.
    fn dispose(&self, rt: &Runtime);
}

/// Callback receiving errors that have no caller to return to.
pub type ErrorHandler = dyn Fn(&ReactiveError);

pub(crate) struct Inner {
    pub(crate) config: RuntimeConfig,
    pub(crate) graph: RefCell<Graph>,
    pub(crate) scheduler: RefCell<Scheduler>,
    pub(crate) scopes: RefCell<Scopes>,
    pub(crate) computations: RefCell<HashMap<NodeId, Rc<dyn Computation>>>,
    pub(crate) context: RefCell<ContextStack>,
    pub(crate) owners: RefCell<Vec<ScopeId>>,
    pub(crate) depth: Cell<usize>,
    error_handler: RefCell<Option<Rc<ErrorHandler>>>,
}

/// Snapshot of runtime bookkeeping, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    /// Live nodes.
    pub nodes: usize,
    /// Live edges.
    pub edges: usize,
    /// Effects waiting for a flush.
    pub pending_effects: usize,
    /// Live scopes.
    pub scopes: usize,
    /// Current global version.
    pub global_version: u64,
    /// Current batch nesting.
    pub batch_depth: usize,
}

/// Handle to a reactive universe.
///
/// Cloning the handle is cheap and shares the same graph. The runtime is
/// single-threaded: it is neither `Send` nor `Sync`.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

/// Holds one batch level open; flushes when the outermost level finishes.
struct BatchGuard<'a> {
    rt: &'a Runtime,
}

impl<'a> BatchGuard<'a> {
    fn enter(rt: &'a Runtime) -> Self {
        rt.inner.scheduler.borrow_mut().enter_batch();
        Self { rt }
    }

    /// Close the level, flushing queued effects if it is the outermost one.
    fn finish(self) -> Result<(), ReactiveError> {
        let outermost = self.rt.inner.scheduler.borrow().batch_depth() == 1;
        let result = if outermost { self.rt.flush() } else { Ok(()) };
        drop(self);
        result
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.rt.inner.scheduler.borrow_mut().exit_batch();
    }
}

/// One flush round. If an effect panics, the effects after it go back to
/// the front of the pending queue.
struct Round<'a> {
    rt: &'a Runtime,
    queue: IndexSet<NodeId>,
    next: usize,
}

impl Round<'_> {
    fn advance(&mut self) -> Option<NodeId> {
        let id = self.queue.get_index(self.next).copied()?;
        self.next += 1;
        Some(id)
    }
}

impl Drop for Round<'_> {
    fn drop(&mut self) {
        if self.next >= self.queue.len() {
            return;
        }
        let graph = self.rt.inner.graph.borrow();
        let mut scheduler = self.rt.inner.scheduler.borrow_mut();
        let queued = scheduler.take_pending();
        for &id in self.queue.iter().skip(self.next).chain(queued.iter()) {
            if graph.contains(id) {
                scheduler.enqueue(id);
            }
        }
        warn!(
            requeued = self.queue.len() - self.next,
            "flush interrupted, effects kept for the next flush"
        );
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                graph: RefCell::new(Graph::new()),
                scheduler: RefCell::new(Scheduler::new()),
                scopes: RefCell::new(Scopes::new()),
                computations: RefCell::new(HashMap::new()),
                context: RefCell::new(ContextStack::default()),
                owners: RefCell::new(Vec::new()),
                depth: Cell::new(0),
                error_handler: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    /// The runtime's configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Allocate a node owned by the current scope, if any.
    pub(crate) fn create_node(&self, kind: NodeKind) -> NodeId {
        let owner = self.inner.owners.borrow().last().copied();
        let owner = owner.filter(|scope| self.inner.scopes.borrow().contains(*scope));
        let id = self.inner.graph.borrow_mut().insert_node(kind, owner);
        if let Some(scope) = owner {
            self.inner.scopes.borrow_mut().adopt(scope, id);
        }
        debug!(node = %id, %kind, "created");
        id
    }

    pub(crate) fn register(&self, id: NodeId, computation: Rc<dyn Computation>) {
        self.inner.computations.borrow_mut().insert(id, computation);
    }

    /// Whether `id` refers to a live node.
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.inner.graph.borrow().contains(id)
    }

    /// Kind of a live node.
    pub fn node_kind(&self, id: NodeId) -> Option<NodeKind> {
        self.inner.graph.borrow().node(id).map(|node| node.kind())
    }

    /// State bits of a live node.
    pub fn flags(&self, id: NodeId) -> Option<Flags> {
        self.inner.graph.borrow().node(id).map(|node| node.flags())
    }

    /// Value version of a live node.
    pub fn version(&self, id: NodeId) -> Option<u64> {
        self.inner.graph.borrow().node(id).map(|node| node.version())
    }

    /// The global version counter.
    pub fn global_version(&self) -> u64 {
        self.inner.graph.borrow().global_version()
    }

    /// Producers `id` currently depends on, in first-access order.
    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        self.inner.graph.borrow().dependencies(id)
    }

    /// Consumers currently subscribed to `id`.
    pub fn subscribers(&self, id: NodeId) -> Vec<NodeId> {
        self.inner.graph.borrow().subscribers(id)
    }

    /// Bookkeeping counters.
    pub fn stats(&self) -> RuntimeStats {
        let graph = self.inner.graph.borrow();
        let scheduler = self.inner.scheduler.borrow();
        RuntimeStats {
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            pending_effects: scheduler.pending_len(),
            scopes: self.inner.scopes.borrow().len(),
            global_version: graph.global_version(),
            batch_depth: scheduler.batch_depth(),
        }
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Link `producer` to the consumer currently being evaluated.
    pub(crate) fn track(&self, producer: NodeId) {
        let mut context = self.inner.context.borrow_mut();
        let Some(consumer) = context.current_consumer() else {
            return;
        };
        if let Some(tail) = context.tail_mut() {
            *tail = self
                .inner
                .graph
                .borrow_mut()
                .link(producer, consumer, *tail);
        }
    }

    /// Whether reads are currently being tracked.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.borrow().current_consumer().is_some()
    }

    /// Run `f` without tracking any reads it makes.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = TrackingScope::untracked(self);
        f()
    }

    // ------------------------------------------------------------------
    // Push side
    // ------------------------------------------------------------------

    /// A producer's value changed: bump its version and mark its subscribers.
    pub(crate) fn notify_changed(&self, id: NodeId) -> Result<(), ReactiveError> {
        let batch = BatchGuard::enter(self);
        let cycle = {
            let mut graph = self.inner.graph.borrow_mut();
            let mut scheduler = self.inner.scheduler.borrow_mut();
            let has_subscribers = match graph.node_mut(id) {
                Some(node) => {
                    node.version += 1;
                    !node.subs.is_empty()
                }
                None => false,
            };
            if scheduler.record_change() {
                graph.bump_global_version();
            }
            if has_subscribers {
                let mut marker =
                    Marker::new(scheduler.pending_mut(), self.inner.config.trace_propagation);
                graph.walk_subscribers(id, &mut marker);
                trace!(node = %id, marked = marker.marked(), "propagated");
                marker.cycle()
            } else {
                None
            }
        };
        let flushed = batch.finish();

        if let Some((node, kind)) = cycle {
            warn!(%node, %kind, "write reached a node that is being evaluated");
            return Err(ReactiveError::Cycle { node, kind });
        }
        flushed
    }

    /// Run `f` as one batch: effects queued by its writes run once, after it
    /// returns.
    ///
    /// Fatal errors raised inside `f` or during the flush are raised to the
    /// caller; use [`try_batch`](Self::try_batch) to receive them as `Err`.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.try_batch(f) {
            Ok(value) => value,
            Err(err) => raise(err),
        }
    }

    /// Like [`batch`](Self::batch), returning fatal errors instead.
    pub fn try_batch<R>(&self, f: impl FnOnce() -> R) -> Result<R, ReactiveError> {
        let batch = BatchGuard::enter(self);
        let value = catch_raised(f);
        let flushed = batch.finish();
        let value = value?;
        flushed?;
        Ok(value)
    }

    /// Whether a batch is open.
    pub fn is_batching(&self) -> bool {
        self.inner.scheduler.borrow().is_batching()
    }

    /// Run queued effects until none are left.
    ///
    /// Runs at batch depth 1, so writes made by effects queue more effects
    /// instead of flushing recursively; those run in the next round.
    fn flush(&self) -> Result<(), ReactiveError> {
        let limit = self.inner.config.max_flush_rounds;
        let mut fatal = None;
        let mut rounds = 0;

        loop {
            let queue = self.inner.scheduler.borrow_mut().take_pending();
            if queue.is_empty() {
                break;
            }
            rounds += 1;
            if rounds > limit {
                let mut leftover = queue;
                leftover.extend(self.inner.scheduler.borrow_mut().take_pending());
                self.abandon(leftover);
                warn!(rounds = limit, "effects did not settle");
                return Err(ReactiveError::FlushLimit { rounds: limit });
            }

            debug!(round = rounds, effects = queue.len(), "flushing effects");
            let mut round = Round {
                rt: self,
                queue,
                next: 0,
            };
            while let Some(id) = round.advance() {
                let Err(err) = self.refresh(id) else {
                    continue;
                };
                if err.is_fatal() {
                    warn!(node = %id, error = %err, "fatal error while flushing");
                    fatal.get_or_insert(err);
                } else {
                    self.report(&err);
                }
            }
        }

        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drop effects from the queue without running them.
    fn abandon(&self, ids: IndexSet<NodeId>) {
        let mut graph = self.inner.graph.borrow_mut();
        for id in ids {
            if let Some(node) = graph.node_mut(id) {
                node.flags.remove(Flags::NOTIFIED);
            }
        }
    }

    /// Install the handler that receives errors from effects run by the
    /// scheduler. Without a handler they are logged with `tracing::error!`.
    pub fn on_error(&self, handler: impl Fn(&ReactiveError) + 'static) {
        *self.inner.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    pub(crate) fn report(&self, err: &ReactiveError) {
        let handler = self.inner.error_handler.borrow().clone();
        match handler {
            Some(handler) => handler(err),
            None => error!(node = ?err.node(), error = %err, "effect failed"),
        }
    }

    /// Run `f` with a batch level held open, flushing afterwards.
    pub(crate) fn with_batch<R>(&self, f: impl FnOnce() -> R) -> (R, Result<(), ReactiveError>) {
        let batch = BatchGuard::enter(self);
        let value = f();
        (value, batch.finish())
    }

    // ------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------

    /// Dispose a node: sever every edge touching it, release its body and
    /// free its slot. Disposing an already disposed node does nothing.
    pub fn dispose(&self, id: NodeId) {
        let owner = {
            let mut graph = self.inner.graph.borrow_mut();
            if !graph.contains(id) {
                trace!(node = %id, "already disposed");
                return;
            }
            graph.sever(id);
            graph.remove_node(id).and_then(|node| node.owner())
        };
        self.inner.scheduler.borrow_mut().dequeue(id);
        if let Some(scope) = owner {
            self.inner.scopes.borrow_mut().release_node(scope, id);
        }

        let computation = self.inner.computations.borrow_mut().remove(&id);
        if let Some(computation) = computation {
            computation.dispose(self);
        }
        debug!(node = %id, "disposed");
    }

    /// Create a scope. If called inside [`Scope::run`], the new scope is a
    /// child of the running one.
    pub fn create_scope(&self) -> Scope {
        let parent = self.inner.owners.borrow().last().copied();
        let id = self.inner.scopes.borrow_mut().create(parent);
        Scope::new(id, self.clone())
    }

    /// Dispose every node owned by `scope` and its descendants.
    pub fn dispose_all(&self, scope: &Scope) {
        self.dispose_scope(scope.id());
    }

    pub(crate) fn dispose_scope(&self, scope: ScopeId) {
        let contents = self.inner.scopes.borrow_mut().take(scope);
        let Some(contents) = contents else {
            return;
        };
        for child in contents.children.into_iter().rev() {
            self.dispose_scope(child);
        }
        for node in contents.nodes.into_iter().rev() {
            self.dispose(node);
        }
        debug!(scope = scope.raw(), "scope disposed");
    }

    /// Whether `scope` is still live.
    pub(crate) fn scope_alive(&self, scope: ScopeId) -> bool {
        self.inner.scopes.borrow().contains(scope)
    }

    /// Dispose every scope and every node, leaving an empty runtime.
    pub fn teardown(&self) {
        let roots = self.inner.scopes.borrow().roots();
        for scope in roots {
            self.dispose_scope(scope);
        }
        let ids = self.inner.graph.borrow().node_ids();
        for id in ids.into_iter().rev() {
            self.dispose(id);
        }
        debug!("runtime torn down");
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn runtimes_are_independent() {
        let a = Runtime::new();
        let b = Runtime::new();
        a.signal(1);
        assert_eq!(a.stats().nodes, 1);
        assert_eq!(b.stats().nodes, 0);
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
    }

    #[test]
    fn global_version_bumps_once_per_batch() {
        let rt = Runtime::new();
        let a = rt.signal(0);
        let b = rt.signal(0);
        let start = rt.global_version();

        a.set(1);
        assert_eq!(rt.global_version(), start + 1);

        rt.batch(|| {
            a.set(2);
            b.set(2);
            a.set(3);
        });
        assert_eq!(rt.global_version(), start + 2);

        // Writes that change nothing do not count
        a.set(3);
        rt.batch(|| b.set(2));
        assert_eq!(rt.global_version(), start + 2);
    }

    #[test]
    fn unsubscribed_write_does_not_walk() {
        let rt = Runtime::new();
        let s = rt.signal(0);
        s.set(5);
        assert_eq!(rt.version(s.id()), Some(1));
        assert_eq!(rt.stats().pending_effects, 0);
    }

    #[test]
    fn error_handler_receives_effect_errors() {
        let rt = Runtime::new();
        let seen = Rc::new(Cell::new(0));
        let seen_clone = seen.clone();
        rt.on_error(move |err| {
            assert!(matches!(err, ReactiveError::Body { .. }));
            seen_clone.set(seen_clone.get() + 1);
        });

        let s = rt.signal(0);
        let s_clone = s.clone();
        let _effect = rt.effect(move || -> Result<(), std::io::Error> {
            if s_clone.get() > 0 {
                return Err(std::io::Error::other("negative balance"));
            }
            Ok(())
        });
        assert_eq!(seen.get(), 0);

        s.set(1);
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn teardown_empties_the_graph() {
        let rt = Runtime::new();
        let s = rt.signal(1);
        let s_clone = s.clone();
        let c = rt.computed(move || s_clone.get() + 1);
        let c_clone = c.clone();
        let _effect = rt.effect(move || {
            c_clone.get();
        });
        let scope = rt.create_scope();
        scope.run(|| rt.signal(0));
        assert_eq!(rt.stats().nodes, 4);

        rt.teardown();
        let stats = rt.stats();
        assert_eq!(stats.nodes, 0);
        assert_eq!(stats.edges, 0);
        assert_eq!(stats.scopes, 0);
        assert_eq!(c.get(), 2);
    }

    #[test]
    fn stats_serialize() {
        let rt = Runtime::new();
        rt.signal(0);
        let json = serde_json::to_value(rt.stats()).unwrap();
        assert_eq!(json["nodes"], 1);
        assert_eq!(json["pending_effects"], 0);
    }
}
