// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Public value types: node identifiers, cell coordinates and resolved positions.

/// Identifier for a node in the tree (generational).
///
/// A freed slot is reused with a bumped generation, so a stale `NodeId` never
/// aliases a newer node.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NodeId(pub(crate) u32, pub(crate) u32);

impl NodeId {
    pub(crate) const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }
}

/// An absolute cell coordinate.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct CellPosition {
    /// Absolute row.
    pub row: usize,
    /// Absolute column.
    pub column: usize,
}

impl CellPosition {
    /// Create a cell coordinate.
    pub const fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

/// A fully resolved cell.
///
/// `node` owns the list the item lives in and `index` is the item within that list.
/// Blank cells point at the item that anchors them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Position {
    /// Node whose branch supplies the item.
    pub node: NodeId,
    /// Item index within the node's branch.
    pub index: usize,
    /// Absolute column.
    pub column: usize,
    /// Nesting depth of the list, counted from the root list or from the sub-item cell
    /// that contains it.
    pub level: usize,
    /// Rows between the anchor row and this row when inside a sub-item cell.
    pub sub_item_offset: usize,
    /// For blank cells, the number of rows below the anchoring item.
    pub blank: Option<usize>,
}

impl Position {
    /// Whether this cell has no content of its own.
    pub fn is_blank(&self) -> bool {
        self.blank.is_some()
    }
}

/// The rectangle formed by a cell and the blank cells that read through to it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlankExpansion {
    /// Row of the cell with content.
    pub top_row: usize,
    /// First column covered.
    pub left_column: usize,
    /// Columns covered.
    pub width: usize,
    /// Rows covered, including the content row.
    pub height: usize,
}

impl BlankExpansion {
    /// Last row covered.
    pub fn bottom_row(&self) -> usize {
        self.top_row + self.height - 1
    }

    /// Whether `cell` lies inside the rectangle.
    pub fn contains(&self, cell: CellPosition) -> bool {
        (self.top_row..self.top_row + self.height).contains(&cell.row)
            && (self.left_column..self.left_column + self.width).contains(&cell.column)
    }
}

/// Direction for [`Tree::navigate`](crate::Tree::navigate).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Navigation {
    /// Previous row. From a blank cell, the cell whose padding it is.
    Up,
    /// Next row below the current cell and its blank padding.
    Down,
    /// The parent item, or the previous column when there is none.
    Left,
    /// Closest cell in the previous column.
    LeftColumn,
    /// The next column, or the first child when there is none.
    Right,
    /// Closest cell in the next column.
    RightColumn,
    /// The item whose expansion contains this one. Root lists, including the list of a
    /// sub-item cell, have no parent.
    Parent,
    /// Like [`Navigation::Parent`], but the root list of a sub-item cell leads to the
    /// anchor cell.
    ComplexParent,
    /// First item of this item's expansion.
    FirstChild,
    /// Last item of this item's expansion.
    LastChild,
    /// Next item in the same list.
    NextSibling,
    /// Previous item in the same list.
    PreviousSibling,
}

/// Outcome of a successful [`Tree::locate`](crate::Tree::locate).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Located {
    /// Absolute row of the object.
    pub row: usize,
    /// Absolute column of the object.
    pub column: usize,
    /// Net change in row count caused by expanding ancestors on the way.
    pub count_delta: isize,
}

/// Outcome of a toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Toggled {
    /// Whether the cell is expanded afterwards.
    pub expanded: bool,
    /// Net change in visible rows.
    pub row_delta: isize,
}

/// A position recorded before a shuffle and where it ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackedPosition {
    /// Position passed to [`Tree::begin_tracking`](crate::Tree::begin_tracking).
    pub original: CellPosition,
    /// Position after the shuffle, `None` when the item is gone.
    pub current: Option<CellPosition>,
}

/// Description of the item behind a cell, see [`Tree::item_info`](crate::Tree::item_info).
#[derive(Clone)]
pub struct ItemInfo {
    /// Branch supplying the item.
    pub branch: crate::BranchRef,
    /// Item index within the branch.
    pub index: usize,
    /// Branch-relative column.
    pub column: usize,
    /// Nesting depth, as in [`Position::level`].
    pub level: usize,
    /// Whether the cell can expand.
    pub expandable: bool,
    /// Whether the cell is expanded.
    pub expanded: bool,
    /// Whether the cell is blank padding below the item.
    pub blank: bool,
    /// Whether the item lives inside a sub-item cell.
    pub sub_item: bool,
}

impl core::fmt::Debug for ItemInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ItemInfo")
            .field("index", &self.index)
            .field("column", &self.column)
            .field("level", &self.level)
            .field("expandable", &self.expandable)
            .field("expanded", &self.expanded)
            .field("blank", &self.blank)
            .field("sub_item", &self.sub_item)
            .finish_non_exhaustive()
    }
}
