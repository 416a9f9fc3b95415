// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Notifications flowing into the tree from branches and out of it to views.

use alloc::vec::Vec;

use crate::branch::{ShiftBranchLevels, StateRefreshChanges};
use crate::types::TrackedPosition;

bitflags::bitflags! {
    /// What changed about a range of displayed cells.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DisplayChanges: u8 {
        /// Cell text.
        const TEXT = 1 << 0;
        /// Images or glyphs.
        const IMAGE = 1 << 1;
        /// Whether cells can expand.
        const EXPANDABLE = 1 << 2;
        /// Whether cells are expanded.
        const EXPANSION_STATE = 1 << 3;
        /// Check or selection state owned by the branch.
        const STATE = 1 << 4;
    }
}

/// A change a branch reports to the tree, see [`Tree::apply`](crate::Tree::apply).
#[derive(Clone, Debug)]
pub enum BranchEvent {
    /// The branch changed arbitrarily; reconcile everything.
    Realign,
    /// `count` items were inserted after item `after` (`None` inserts at the front).
    InsertItems {
        /// Item the new ones follow.
        after: Option<usize>,
        /// Number of new items.
        count: usize,
    },
    /// `count` items starting at `start` were removed.
    DeleteItems {
        /// First removed item.
        start: usize,
        /// Number of removed items.
        count: usize,
    },
    /// One item moved from `from` to `to`.
    MoveItem {
        /// Old index.
        from: usize,
        /// New index.
        to: usize,
    },
    /// Display data for a range of items changed.
    DisplayDataChanged {
        /// Branch-relative column, `None` for all columns.
        column: Option<usize>,
        /// First changed item.
        start: usize,
        /// Number of changed items.
        count: usize,
        /// Kind of change.
        changes: DisplayChanges,
    },
    /// The branch goes away entirely.
    RemoveBranch,
    /// Start of a batch that should not repaint.
    BeginRedraw,
    /// End of a batch started with [`BranchEvent::BeginRedraw`].
    EndRedraw,
    /// Start of a batch that preserves tracked positions.
    BeginShuffle,
    /// End of a batch started with [`BranchEvent::BeginShuffle`].
    EndShuffle,
    /// Hold redraw suspensions until the matching [`BranchEvent::EndDelayRedraw`].
    BeginDelayRedraw,
    /// End of a batch started with [`BranchEvent::BeginDelayRedraw`].
    EndDelayRedraw,
    /// Merge shuffles until the matching [`BranchEvent::EndDelayShuffle`].
    BeginDelayShuffle,
    /// End of a batch started with [`BranchEvent::BeginDelayShuffle`].
    EndDelayShuffle,
    /// Intermediate levels are inserted or removed below the branch.
    ShiftLevels(ShiftBranchLevels),
    /// The cell at `row`/`column` switched between complex and simple.
    UpdateCellStyle {
        /// Item index.
        row: usize,
        /// Branch-relative column, never 0.
        column: usize,
        /// Load the cell's list (`true`) or drop it (`false`).
        make_complex: bool,
    },
}

/// How one column's content moved when a sub-item list changed size.
///
/// The rows of the column changed by `delta` at the anchor of the event carrying it,
/// while the other columns changed by the event's own delta. The difference is made up
/// by blank rows at the bottom of the padded block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubItemChange {
    /// Absolute column.
    pub column: usize,
    /// Content row change in that column.
    pub delta: isize,
}

/// A change views need to hear about, drained with [`Tree::take_events`](crate::Tree::take_events).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeEvent {
    /// Rows were inserted (`delta > 0`) or removed (`delta < 0`) after `anchor_row`
    /// and the `blanks_after_anchor` padding rows that follow it.
    ItemCountChanged {
        /// Last row before the change, `None` when the change starts at row 0. For an
        /// expansion toggle, the toggled row.
        anchor_row: Option<usize>,
        /// Absolute column of the changed list.
        column: usize,
        /// Row count change. Zero only when `sub_item_changes` is not empty.
        delta: isize,
        /// Row of the item owning the changed list, `None` for the root list.
        parent_row: Option<usize>,
        /// Whether the change comes from expanding or collapsing `anchor_row`.
        is_expansion_toggle: bool,
        /// Padding rows between `anchor_row` and the change; zero unless
        /// `is_expansion_toggle`.
        blanks_after_anchor: usize,
        /// Columns whose content moved differently from `delta`.
        sub_item_changes: Vec<SubItemChange>,
    },
    /// A block of rows moved.
    ItemMoved {
        /// Absolute column of the list.
        column: usize,
        /// First row of the block before the move.
        from_row: usize,
        /// First row of the block after the move.
        to_row: usize,
        /// Rows in the block.
        item_count: usize,
    },
    /// Displayed data changed without changing the row count.
    DisplayDataChanged {
        /// First changed row.
        start_row: usize,
        /// Absolute column, `None` for all columns.
        column: Option<usize>,
        /// Rows covered.
        count: usize,
        /// Kind of change.
        changes: DisplayChanges,
    },
    /// Redraw suspension started (`true`) or ended (`false`).
    RedrawSuspendedChanged(bool),
    /// A shuffle started; views may record positions with
    /// [`Tree::track_positions`](crate::Tree::track_positions).
    ShuffleBeginning,
    /// A shuffle ended with these tracked positions.
    ShuffleEnding(Vec<TrackedPosition>),
    /// A branch flipped the state of a cell through
    /// [`Tree::toggle_state`](crate::Tree::toggle_state).
    StateToggled {
        /// Row of the cell.
        row: usize,
        /// Absolute column of the cell.
        column: usize,
        /// Rows the branch asked to repaint.
        refresh: StateRefreshChanges,
    },
}
