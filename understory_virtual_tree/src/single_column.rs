// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A column-0 projection of a multi-column tree.

use crate::error::{Error, Result};
use crate::tree::Tree;
use crate::types::{NodeId, Position};

/// Read-through view of a [`Tree`] as a plain single-column list.
///
/// The view counts only items: padding rows added by sub-item cells are skipped, so
/// row `k` of the view is the `k`-th item row of the tree in display order. Rows
/// translate between the two spaces with [`to_tree_row`](Self::to_tree_row) and
/// [`from_tree_row`](Self::from_tree_row).
#[derive(Debug)]
pub struct SingleColumnView<'a> {
    tree: &'a mut Tree,
}

impl Tree {
    /// View this tree without its sub-item padding.
    pub fn single_column(&mut self) -> SingleColumnView<'_> {
        SingleColumnView { tree: self }
    }
}

impl SingleColumnView<'_> {
    /// Number of rows in the view.
    pub fn len(&self) -> usize {
        self.tree.root.map_or(0, |r| self.tree.node(r).full_count)
    }

    /// Whether the view has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tree row of view row `row`.
    pub fn to_tree_row(&self, row: usize) -> Result<usize> {
        let count = self.len();
        let (Some(root), true) = (self.tree.root, row < count) else {
            return Err(Error::RowOutOfRange { row, count });
        };
        let tree = &*self.tree;
        let mut id = root;
        let mut remaining = row;
        let (owner, index) = 'levels: loop {
            let n = tree.node(id);
            let mut consumed = 0;
            for &c in &n.children {
                let c = tree.node(c);
                let gap = c.index - consumed;
                if remaining < gap {
                    break;
                }
                remaining -= gap;
                if remaining == 0 {
                    break 'levels (id, c.index);
                }
                remaining -= 1;
                consumed = c.index + 1;
                if c.is_expanded() {
                    if remaining < c.full_count {
                        id = tree
                            .child_at(id, c.index)
                            .ok_or(Error::InvalidOperation("missing child"))?;
                        continue 'levels;
                    }
                    remaining -= c.full_count;
                }
            }
            break (id, consumed + remaining);
        };
        tree.row_of_item(owner, index)
            .ok_or(Error::InvalidOperation("item is not visible"))
    }

    /// View row of tree row `row`; `None` for padding rows.
    pub fn from_tree_row(&mut self, row: usize) -> Result<Option<usize>> {
        let landing = self.tree.landing(row)?;
        if landing.offset > 0 {
            return Ok(None);
        }
        Ok(Some(
            self.list_start(landing.owner) + self.offset(landing.owner, landing.index),
        ))
    }

    /// Resolve view row `row` in column 0.
    pub fn resolve(&mut self, row: usize) -> Result<Position> {
        let tree_row = self.to_tree_row(row)?;
        self.tree.resolve(tree_row, 0)
    }

    /// View row of the first item of the list of `id`.
    fn list_start(&self, id: NodeId) -> usize {
        let n = self.tree.node(id);
        match n.parent {
            Some(parent) => self.list_start(parent) + self.offset(parent, n.index) + 1,
            None => 0,
        }
    }

    /// View rows between the start of the list of `owner` and item `index`.
    fn offset(&self, owner: NodeId, index: usize) -> usize {
        let n = self.tree.node(owner);
        index
            + n.children
                .iter()
                .map(|c| self.tree.node(*c))
                .take_while(|c| c.index < index)
                .filter(|c| c.is_expanded())
                .map(|c| c.full_count)
                .sum::<usize>()
    }
}
