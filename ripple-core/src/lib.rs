//! Ripple Core
//!
//! This crate provides a fine-grained reactive dependency graph. It
//! implements:
//!
//! - Reactive primitives (signals, computeds, effects)
//! - Glitch-free, lazy change propagation with batching
//! - Ownership scopes and explicit disposal
//!
//! Everything lives inside a [`Runtime`]. There is no global state: each
//! runtime is an independent graph, and every primitive is created through
//! one.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `graph`: nodes, edges, marking traversal and the effect queue
//! - `reactive`: the runtime and the typed primitives built on the graph
//!
//! # Example
//!
//! ```rust
//! use ripple_core::Runtime;
//!
//! let rt = Runtime::new();
//!
//! // Create a signal
//! let count = rt.signal(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     rt.computed(move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let _effect = {
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     rt.effect(move || {
//!         println!("Count: {}, Doubled: {}", count.get(), doubled.get());
//!     })
//! };
//!
//! // Update the signal
//! count.set(5);
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{BoxError, ReactiveError};
pub use graph::{Flags, NodeId, NodeKind, ScopeId};
pub use reactive::{
    Cleanup, Computed, Effect, EffectOutput, ErrorHandler, Readable, Runtime, RuntimeStats, Scope,
    Signal, Subscription,
};
