//! Runtime Configuration
//!
//! Limits and diagnostics knobs for a [`Runtime`](crate::Runtime). Every
//! field has a default, so partial JSON documents are accepted.

use serde::{Deserialize, Serialize};

/// Configuration for a reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum nesting of pull resolution (a computed reading a computed
    /// reading a computed...). Exceeding it is a fatal error.
    pub max_depth: usize,

    /// Maximum number of flush rounds at the end of a batch. Effects queued
    /// by effects go into the next round; exceeding the limit is fatal.
    pub max_flush_rounds: usize,

    /// Emit a `trace` event for every node reached while marking.
    pub trace_propagation: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_depth: 256,
            max_flush_rounds: 1000,
            trace_propagation: false,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set the pull nesting limit.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the flush round limit.
    pub fn with_max_flush_rounds(mut self, rounds: usize) -> Self {
        self.max_flush_rounds = rounds;
        self
    }

    /// Enable or disable per-node marking traces.
    pub fn with_trace_propagation(mut self, enabled: bool) -> Self {
        self.trace_propagation = enabled;
        self
    }
}
