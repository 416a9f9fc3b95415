// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node storage: one node per attached branch or sub-item cell.

use alloc::boxed::Box;
use alloc::vec::Vec;
use smallvec::SmallVec;

use crate::branch::{BranchFeatures, BranchRef};
use crate::types::NodeId;

bitflags::bitflags! {
    /// Node capability and state flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub(crate) struct NodeFlags: u32 {
        /// The node's list is shown below its item.
        const EXPANDED = 1 << 0;
        const ALLOW_EXPANSION = 1 << 1;
        const RELOCATE = 1 << 2;
        const DELAYED_UPDATE = 1 << 3;
        const ALLOW_RECURSIVE_EXPANSION = 1 << 4;
        const MULTI_COLUMN = 1 << 5;
        const JAGGED_COLUMNS = 1 << 6;
        const COMPLEX_COLUMNS = 1 << 7;
        const NO_TRACKING = 1 << 8;
        const DYNAMIC_TRACKING = 1 << 9;
        /// Root of a nested list anchored in a non-zero column.
        const SUB_ITEM_ROOT = 1 << 10;
        /// The sub-item list sits below its anchor cell instead of starting on it.
        const COMPLEX_SUB_ITEM = 1 << 11;
        /// The node lives inside a sub-item cell.
        const IN_SUB_ITEM_COLUMN = 1 << 12;
        /// Nested expansions were discarded; complex cells reload on the next expansion.
        const NEEDS_POPULATE = 1 << 13;
        /// Recursive expansion does not descend into this node.
        const BLOCK_RECURSION = 1 << 14;
        /// Item indices survive a realign.
        const STABLE_INDICES = 1 << 15;

        /// Flags derived from the bound branch.
        const BRANCH_MASK = Self::ALLOW_EXPANSION.bits()
            | Self::RELOCATE.bits()
            | Self::DELAYED_UPDATE.bits()
            | Self::ALLOW_RECURSIVE_EXPANSION.bits()
            | Self::MULTI_COLUMN.bits()
            | Self::JAGGED_COLUMNS.bits()
            | Self::COMPLEX_COLUMNS.bits()
            | Self::NO_TRACKING.bits()
            | Self::DYNAMIC_TRACKING.bits()
            | Self::STABLE_INDICES.bits();
    }
}

impl NodeFlags {
    /// Capability flags for a branch's features. Sub-item lists are single-column.
    pub(crate) fn from_features(features: BranchFeatures, in_sub_item: bool) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::ALLOW_EXPANSION, features.contains(BranchFeatures::EXPANSIONS));
        flags.set(Self::RELOCATE, features.contains(BranchFeatures::RELOCATE_ON_REFRESH));
        flags.set(Self::DELAYED_UPDATE, features.contains(BranchFeatures::DELAYED_UPDATES));
        flags.set(
            Self::ALLOW_RECURSIVE_EXPANSION,
            features.contains(BranchFeatures::RECURSIVE_EXPANSION),
        );
        flags.set(Self::NO_TRACKING, features.contains(BranchFeatures::NO_TRACKING));
        flags.set(
            Self::DYNAMIC_TRACKING,
            features.contains(BranchFeatures::POSITION_TRACKING),
        );
        flags.set(
            Self::STABLE_INDICES,
            features.contains(BranchFeatures::DEFAULT_POSITION_TRACKING),
        );
        if !in_sub_item && features.contains(BranchFeatures::MULTI_COLUMN) {
            flags.insert(Self::MULTI_COLUMN);
            flags.set(Self::JAGGED_COLUMNS, features.contains(BranchFeatures::JAGGED_COLUMNS));
            flags.set(
                Self::COMPLEX_COLUMNS,
                features.contains(BranchFeatures::COMPLEX_SUB_ITEMS),
            );
        }
        flags
    }
}

/// An expanded cell in a non-zero column of the anchor item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SubItem {
    /// Branch-relative column of the cell.
    pub(crate) column: usize,
    pub(crate) root: NodeId,
}

pub(crate) type SubItems = SmallVec<[SubItem; 2]>;

/// One attachment point.
///
/// Non-root nodes stand for item `index` of their parent's list. A node carries
/// a branch when the item is expanded (or was, and kept its expansion). A node without
/// a branch is a placeholder that only anchors sub-item cells.
pub(crate) struct Node {
    pub(crate) generation: u32,
    pub(crate) branch: Option<BranchRef>,
    pub(crate) parent: Option<NodeId>,
    /// Ordered by strictly ascending `index`.
    pub(crate) children: Vec<NodeId>,
    /// Item index in the parent list; the anchor column for sub-item roots.
    pub(crate) index: usize,
    /// Absolute column of this node's list.
    pub(crate) column: usize,
    pub(crate) immediate_count: usize,
    pub(crate) full_count: usize,
    /// Padding rows below this node's own item row.
    pub(crate) immediate_gain: usize,
    /// `immediate_gain` plus the padding rows of the node's list.
    pub(crate) full_gain: usize,
    pub(crate) flags: NodeFlags,
    pub(crate) sub_items: Option<Box<SubItems>>,
}

impl core::fmt::Debug for Node {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Node")
            .field("generation", &self.generation)
            .field("bound", &self.branch.is_some())
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("index", &self.index)
            .field("column", &self.column)
            .field("immediate_count", &self.immediate_count)
            .field("full_count", &self.full_count)
            .field("immediate_gain", &self.immediate_gain)
            .field("full_gain", &self.full_gain)
            .field("flags", &self.flags)
            .field("sub_items", &self.sub_items)
            .finish_non_exhaustive()
    }
}

impl Node {
    pub(crate) fn new(
        generation: u32,
        parent: Option<NodeId>,
        index: usize,
        column: usize,
    ) -> Self {
        Self {
            generation,
            branch: None,
            parent,
            children: Vec::new(),
            index,
            column,
            immediate_count: 0,
            full_count: 0,
            immediate_gain: 0,
            full_gain: 0,
            flags: NodeFlags::empty(),
            sub_items: None,
        }
    }

    #[inline]
    pub(crate) fn is_expanded(&self) -> bool {
        self.flags.contains(NodeFlags::EXPANDED)
    }

    #[inline]
    pub(crate) fn is_sub_item_root(&self) -> bool {
        self.flags.contains(NodeFlags::SUB_ITEM_ROOT)
    }

    #[inline]
    pub(crate) fn is_complex(&self) -> bool {
        self.flags.contains(NodeFlags::COMPLEX_SUB_ITEM)
    }

    /// Padding rows contributed by the node's list, excluding its own item's padding.
    #[inline]
    pub(crate) fn inner_gain(&self) -> usize {
        self.full_gain - self.immediate_gain
    }

    /// Rows of the node's list when shown.
    #[inline]
    pub(crate) fn list_rows(&self) -> usize {
        self.full_count + self.inner_gain()
    }

    /// Rows the item occupies beneath its own row.
    #[inline]
    pub(crate) fn rows_below(&self) -> usize {
        if self.is_expanded() {
            self.immediate_gain + self.list_rows()
        } else {
            self.immediate_gain
        }
    }

    /// Padding this node adds to its parent's list.
    #[inline]
    pub(crate) fn gain_contribution(&self) -> usize {
        if self.is_expanded() {
            self.full_gain
        } else {
            self.immediate_gain
        }
    }

    /// Padding rows a sub-item root adds below its anchor row.
    #[inline]
    pub(crate) fn cell_gain(&self) -> usize {
        if self.is_complex() {
            self.full_count
        } else {
            self.full_count.saturating_sub(1)
        }
    }

    pub(crate) fn sub_item(&self, column: usize) -> Option<NodeId> {
        self.sub_items
            .as_ref()?
            .iter()
            .find(|s| s.column == column)
            .map(|s| s.root)
    }

    pub(crate) fn has_sub_items(&self) -> bool {
        self.sub_items.as_ref().is_some_and(|s| !s.is_empty())
    }
}

/// Add a signed delta to a count.
#[inline]
pub(crate) fn shifted(value: usize, delta: isize) -> usize {
    let out = value.checked_add_signed(delta);
    debug_assert!(out.is_some(), "count {value} underflows by {delta}");
    out.unwrap_or(0)
}

/// Signed conversion for row deltas.
#[inline]
pub(crate) fn signed(value: usize) -> isize {
    isize::try_from(value).unwrap_or(isize::MAX)
}
