// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types returned by tree operations.

use alloc::string::String;

/// Result type alias for tree operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors reported by [`Tree`](crate::Tree) operations.
///
/// Row and column errors are caller contract violations and are never retried.
/// Provider errors are raised only after the tree has restored a consistent shape.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A row outside `0..count`.
    #[error("row {row} is out of range (row count {count})")]
    RowOutOfRange {
        /// The requested row.
        row: usize,
        /// Number of rows at the time of the request.
        count: usize,
    },
    /// A column outside the columns available on a row.
    #[error("column {column} is out of range for row {row} ({count} columns)")]
    ColumnOutOfRange {
        /// The requested row.
        row: usize,
        /// The requested column.
        column: usize,
        /// Number of columns on that row.
        count: usize,
    },
    /// An item index outside a branch's current item count.
    #[error("item {index} is out of range for a branch with {count} items")]
    IndexOutOfRange {
        /// The requested item index.
        index: usize,
        /// Item count known for the branch.
        count: usize,
    },
    /// The operation does not apply to the addressed item or cell.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
    /// A branch reported an item count that does not match the change it announced.
    #[error("branch reports {actual} items, expected {expected}")]
    ProviderInconsistency {
        /// Count implied by the announced change.
        expected: usize,
        /// Count the branch reports.
        actual: usize,
    },
    /// The branch is not attached anywhere in this tree.
    #[error("branch is not attached to this tree")]
    UnknownBranch,
    /// A provider callback failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Failure reported by a [`Branch`](crate::Branch) callback.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    message: String,
}

impl ProviderError {
    /// Create a provider error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message supplied by the provider.
    pub fn message(&self) -> &str {
        &self.message
    }
}
