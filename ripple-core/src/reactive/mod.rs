//! Reactive Primitives
//!
//! This module implements the user-facing layer of the engine: signals,
//! computeds and effects, plus the runtime that connects them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a computed or an effect, the signal automatically becomes one of
//! its dependencies. When the value changes, every dependent is marked.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates
//! lazily, on read, and only when one of its dependencies really changed.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change. Effects are what pulls changes through the graph.
//!
//! # Implementation Notes
//!
//! Dependencies are detected automatically: every runtime keeps a stack of
//! evaluation frames, and a read links the node being read to the consumer on
//! top of that stack. Propagation is split in two halves: a push half that
//! marks (`graph::scheduler`) and a pull half that recomputes (`pull`).

mod computed;
mod context;
mod effect;
mod pull;
mod runtime;
mod scope;
mod signal;
mod subscriber;

pub use computed::Computed;
pub use effect::{Cleanup, Effect, EffectOutput};
pub use runtime::{ErrorHandler, Runtime, RuntimeStats};
pub use scope::Scope;
pub use signal::Signal;
pub use subscriber::{Readable, Subscription};
