// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=understory_virtual_tree --heading-base-level=0

//! Understory Virtual Tree: a virtualized hierarchical row index.
//!
//! This crate maps a lazily expanded hierarchy of data onto a flat sequence of display
//! rows, and maps rows back to the data behind them, without ever materializing the
//! rows. It is the bookkeeping core of a tree or grid view; painting, scrolling and
//! input belong to the host.
//!
//! The core concepts are:
//!
//! - [`Branch`]: a provider of one level of data. It reports an item count, says which
//!   cells can expand and hands out child branches on request.
//! - [`Tree`]: the index. It keeps one node per expanded item, with aggregate counts
//!   that let [`Tree::resolve`] turn a row into a [`Position`] by skipping whole
//!   subtrees, and [`Tree::row_of`] turn it back.
//! - Sub-item cells: in a multi-column branch, a cell in a non-zero column can hold its
//!   own nested list. Expanded cells pad their row with blank rows so every column lines
//!   up ([`Tree::blank_expansion`]).
//! - [`BranchEvent`]: notifications a branch sends after its data changed. The tree
//!   updates its counts and reports the visible effect as [`TreeEvent`]s, drained with
//!   [`Tree::take_events`].
//! - Shuffles: [`Tree::begin_shuffle`] and [`Tree::end_shuffle`] bracket a batch of
//!   edits, and positions registered with [`Tree::track_positions`] are reported where
//!   they ended up.
//!
//! ## Minimal example
//!
//! ```rust
//! use std::rc::Rc;
//! use understory_virtual_tree::{
//!     Branch, BranchFeatures, Expansion, ExpansionStyle, ProviderError, Tree,
//! };
//!
//! /// Every item expands into three more, `depth` levels deep.
//! struct Numbers {
//!     depth: usize,
//!     len: usize,
//! }
//!
//! impl Branch for Numbers {
//!     fn features(&self) -> BranchFeatures {
//!         BranchFeatures::EXPANSIONS
//!     }
//!
//!     fn visible_item_count(&self) -> usize {
//!         self.len
//!     }
//!
//!     fn is_expandable(&self, _row: usize, _column: usize) -> bool {
//!         self.depth > 0
//!     }
//!
//!     fn expansion(
//!         &self,
//!         _row: usize,
//!         _column: usize,
//!         _style: ExpansionStyle,
//!     ) -> Result<Option<Expansion>, ProviderError> {
//!         let child = Rc::new(Self { depth: self.depth - 1, len: 3 });
//!         Ok(Some(Expansion::new(child)))
//!     }
//! }
//!
//! let mut tree = Tree::new();
//! tree.set_root(Rc::new(Numbers { depth: 2, len: 4 })).unwrap();
//! assert_eq!(tree.row_count(), 4);
//!
//! // Expanding row 1 inserts three rows below it.
//! let toggled = tree.toggle_expansion(1, 0).unwrap();
//! assert_eq!(toggled.row_delta, 3);
//! assert_eq!(tree.row_count(), 7);
//!
//! // Row 2 is the first child of row 1.
//! let pos = tree.resolve(2, 0).unwrap();
//! assert_eq!((pos.index, pos.level), (0, 1));
//! assert_eq!(tree.row_of(&pos), Some(2));
//! ```
//!
//! Branches are shared through [`BranchRef`] (`Rc<dyn Branch>`) and compared by
//! pointer identity. A tree, its branches and its events all live on one thread.
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

mod branch;
mod counts;
mod edit;
mod error;
mod event;
mod expand;
mod navigate;
mod node;
mod options;
mod resolve;
mod shift;
mod single_column;
mod tracker;
mod tree;
mod types;

#[cfg(test)]
mod testing;

pub use branch::{
    Branch, BranchFeatures, BranchRef, CollapseBehavior, Expansion, ExpansionOptions,
    ExpansionStyle, LevelShiftAdjuster, LocateAction, LocateResult, ObjectStyle, Relocation,
    ShiftBranchLevels, StateRefreshChanges, SubItemCellStyle,
};
pub use error::{Error, ProviderError, Result};
pub use event::{BranchEvent, DisplayChanges, SubItemChange, TreeEvent};
pub use options::{InconsistencyPolicy, TreeOptions};
pub use single_column::SingleColumnView;
pub use tree::Tree;
pub use types::{
    BlankExpansion, CellPosition, ItemInfo, Located, Navigation, NodeId, Position, Toggled,
    TrackedPosition,
};
