//! Error Types
//!
//! Every fallible operation in the engine reports a [`ReactiveError`].
//!
//! # Fatal errors and unwinding
//!
//! User bodies (computed functions, effect functions) return plain values,
//! so a fatal error detected deep inside a nested read cannot travel back
//! through them as a `Result`. Infallible accessors such as `Computed::get`
//! therefore *raise* the error: they unwind with the `ReactiveError` itself as
//! the payload. Every evaluation boundary in the engine catches such payloads
//! and turns them back into `Err`, so the `try_*` accessor at the top of the
//! stack sees the original error. Panics with any other payload are resumed
//! untouched.

use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::graph::{NodeId, NodeKind};

/// Error type produced by user bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by the reactive runtime.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A computed or effect body returned an error.
    #[error("body of node {node} failed: {source}")]
    Body {
        /// The node whose body failed.
        node: NodeId,
        /// The error returned by the body.
        #[source]
        source: BoxError,
    },

    /// A node was re-entered while it was being evaluated.
    #[error("dependency cycle detected at {kind} node {node}")]
    Cycle {
        /// The node observed in the `RUNNING` state.
        node: NodeId,
        /// What kind of node it is.
        kind: NodeKind,
    },

    /// Pull resolution nested deeper than the configured limit.
    #[error("evaluation of node {node} exceeded the maximum depth of {limit}")]
    DepthExceeded {
        /// The node that would have exceeded the limit.
        node: NodeId,
        /// The configured limit.
        limit: usize,
    },

    /// Effects kept scheduling each other past the configured round limit.
    #[error("effects did not settle after {rounds} flush rounds")]
    FlushLimit {
        /// Number of rounds that were run.
        rounds: usize,
    },

    /// The node has been disposed.
    #[error("node {node} has been disposed")]
    Disposed {
        /// The disposed node.
        node: NodeId,
    },
}

impl ReactiveError {
    /// Wrap an error returned by the body of `node`.
    ///
    /// Errors that already are `ReactiveError`s (typically forwarded with `?`
    /// from a nested `try_get`) pass through unchanged.
    pub fn from_body(node: NodeId, err: BoxError) -> Self {
        match err.downcast::<ReactiveError>() {
            Ok(err) => *err,
            Err(source) => ReactiveError::Body { node, source },
        }
    }

    /// Whether this error aborts the current propagation.
    ///
    /// Fatal errors are returned to the top-level caller. Non-fatal errors
    /// raised by effects during a flush go to the runtime's error handler.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReactiveError::Cycle { .. }
                | ReactiveError::DepthExceeded { .. }
                | ReactiveError::FlushLimit { .. }
        )
    }

    /// The node this error is about, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            ReactiveError::Body { node, .. }
            | ReactiveError::Cycle { node, .. }
            | ReactiveError::DepthExceeded { node, .. }
            | ReactiveError::Disposed { node } => Some(*node),
            ReactiveError::FlushLimit { .. } => None,
        }
    }
}

/// Unwind with `err` as the payload. See the module docs.
pub(crate) fn raise(err: ReactiveError) -> ! {
    panic::resume_unwind(Box::new(err))
}

/// Run `f`, converting a raised `ReactiveError` back into `Err`.
pub(crate) fn catch_raised<R>(f: impl FnOnce() -> R) -> Result<R, ReactiveError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<ReactiveError>() {
            Ok(err) => Err(*err),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}
