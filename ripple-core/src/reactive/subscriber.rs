//! Subscriptions
//!
//! A subscription is the callback-style face of the graph: a listener called
//! with the new value of a signal or computed every time it changes. It is
//! built on an internal effect, so it obeys the same batching and ordering
//! rules as any other effect.

use std::fmt;

use super::effect::Effect;
use super::runtime::Runtime;
use crate::error::ReactiveError;
use crate::graph::NodeId;

/// A node whose value can be read: [`Signal`](super::Signal) or
/// [`Computed`](super::Computed).
pub trait Readable<T> {
    /// The node being read.
    fn node(&self) -> NodeId;

    /// Borrow the current value, tracking the read like `get` does.
    fn try_read<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError>;
}

/// Handle returned by `subscribe`.
///
/// Dropping the handle keeps the listener attached; call
/// [`unsubscribe`](Self::unsubscribe) to detach it.
#[must_use = "the listener stays attached until `unsubscribe` is called"]
pub struct Subscription {
    effect: Effect,
}

impl Subscription {
    /// Detach the listener. Idempotent.
    pub fn unsubscribe(&self) {
        self.effect.dispose();
    }

    /// Whether the listener is still attached.
    pub fn is_active(&self) -> bool {
        !self.effect.is_disposed()
    }

    /// Node id of the internal effect.
    pub fn id(&self) -> NodeId {
        self.effect.id()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.effect.id())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Runtime {
    /// Call `listener` with the value of `source` every time it changes.
    ///
    /// The listener is not called for the current value, and its own reads
    /// are not tracked.
    pub fn subscribe<T, S>(
        &self,
        source: &S,
        mut listener: impl FnMut(&T) + 'static,
    ) -> Subscription
    where
        T: Clone + 'static,
        S: Readable<T> + Clone + 'static,
    {
        let source = source.clone();
        let rt = self.clone();
        let mut first = true;
        let effect = self.effect(move || -> Result<(), ReactiveError> {
            let value = source.try_read(T::clone)?;
            if std::mem::take(&mut first) {
                return Ok(());
            }
            rt.untracked(|| listener(&value));
            Ok(())
        });
        Subscription { effect }
    }
}
