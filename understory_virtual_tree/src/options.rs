// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tree configuration.

/// What to do when a branch reports a count that contradicts an announced change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InconsistencyPolicy {
    /// Reject the change with
    /// [`Error::ProviderInconsistency`](crate::Error::ProviderInconsistency).
    #[default]
    Reject,
    /// Log a warning and realign the branch instead.
    Realign,
}

/// Options for [`Tree::with_options`](crate::Tree::with_options).
#[derive(Clone, Copy, Debug)]
pub struct TreeOptions {
    /// Handling of inconsistent insert and delete notifications.
    pub inconsistency: InconsistencyPolicy,
    /// Reuse the last row walk when rows are resolved in increasing order.
    pub position_cache: bool,
    /// Depth bound for [`Tree::expand_recursively`](crate::Tree::expand_recursively).
    pub max_recursive_depth: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            inconsistency: InconsistencyPolicy::Reject,
            position_cache: true,
            max_recursive_depth: 64,
        }
    }
}

impl TreeOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Realign instead of failing on inconsistent counts.
    pub fn realign_on_inconsistency(mut self) -> Self {
        self.inconsistency = InconsistencyPolicy::Realign;
        self
    }

    /// Enable or disable the sequential resolve cache.
    pub fn position_cache(mut self, enabled: bool) -> Self {
        self.position_cache = enabled;
        self
    }

    /// Set the recursive expansion depth bound.
    pub fn max_recursive_depth(mut self, depth: usize) -> Self {
        self.max_recursive_depth = depth;
        self
    }
}
