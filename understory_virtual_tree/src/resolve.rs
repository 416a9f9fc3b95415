// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Row resolution: absolute row and column to owning node and item, and back.

use smallvec::{SmallVec, smallvec};

use crate::error::{Error, Result};
use crate::node::NodeFlags;
use crate::tree::Tree;
use crate::types::{BlankExpansion, NodeId, Position};

/// One level of an in-progress walk.
///
/// `pos`, `base` and `consumed` form a cursor into the level's child list: the child at
/// `pos` is the next one to examine, and item `consumed` of the list starts at row `base`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Frame {
    node: NodeId,
    /// First row past this level's list.
    end: usize,
    pos: usize,
    base: usize,
    consumed: usize,
}

impl Frame {
    fn new(node: NodeId, start: usize, end: usize) -> Self {
        Self {
            node,
            end,
            pos: 0,
            base: start,
            consumed: 0,
        }
    }
}

type FrameStack = SmallVec<[Frame; 8]>;

/// The last column-0 walk, reused when the next row lies inside one of its levels.
#[derive(Debug, Default)]
pub(crate) struct WalkCache {
    stack: FrameStack,
}

impl WalkCache {
    pub(crate) fn invalidate(&mut self) {
        self.stack.clear();
    }
}

/// Where a column-0 walk ended.
///
/// `offset == 0` is the item row itself; a non-zero offset is that many rows into the
/// item's sub-item padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Landing {
    pub(crate) owner: NodeId,
    pub(crate) index: usize,
    pub(crate) child: Option<NodeId>,
    pub(crate) offset: usize,
    pub(crate) level: usize,
}

impl Tree {
    /// Resolve an absolute cell to the item that supplies it.
    ///
    /// `column` is ignored for single-column trees.
    pub fn resolve(&mut self, row: usize, column: usize) -> Result<Position> {
        let landing = self.landing(row)?;
        let column = self.effective_column(column);
        self.finish_resolve(landing, row, column)
    }

    /// Absolute row of a resolved position, `None` if the position is stale or hidden.
    ///
    /// This is the inverse of [`Tree::resolve`].
    pub fn row_of(&self, position: &Position) -> Option<usize> {
        if !self.is_alive(position.node) {
            return None;
        }
        let row = self.row_of_item(position.node, position.index)?;
        Some(row + position.blank.unwrap_or(0))
    }

    /// Number of cells on a row.
    pub fn column_count_of_row(&mut self, row: usize) -> Result<usize> {
        let landing = self.landing(row)?;
        Ok(self.item_columns(landing.owner, landing.index))
    }

    /// Columns spanned by the last cell of a row.
    ///
    /// Jagged rows have fewer cells than the tree has columns; their last cell stretches
    /// across the rest.
    pub fn column_width_of_row(&mut self, row: usize) -> Result<usize> {
        let cells = self.column_count_of_row(row)?;
        Ok(self.columns.saturating_sub(cells) + 1)
    }

    /// The cell with content that `row`/`column` belongs to, with the blank cells below
    /// it that read through to it.
    pub fn blank_expansion(&mut self, row: usize, column: usize) -> Result<BlankExpansion> {
        let landing = self.landing(row)?;
        let column = self.effective_column(column);
        let cells = self.item_columns(landing.owner, landing.index);
        if column >= cells {
            return Err(Error::ColumnOutOfRange {
                row,
                column,
                count: cells,
            });
        }
        let item_row = row - landing.offset;
        let (gain, cell) = match landing.child {
            Some(c) => {
                let n = self.node(c);
                let relative = column - self.node(landing.owner).column;
                let cell = if relative == 0 { None } else { n.sub_item(relative) };
                (n.immediate_gain, cell)
            }
            None => (0, None),
        };
        let last_content = item_row + cell.map_or(0, |s| self.node(s).cell_gain());
        let bottom = item_row + gain;
        let (top_row, height) = if row < last_content {
            (row, 1)
        } else {
            (last_content, bottom - last_content + 1)
        };
        let width = if column + 1 == cells {
            self.columns.saturating_sub(column).max(1)
        } else {
            1
        };
        Ok(BlankExpansion {
            top_row,
            left_column: column,
            width,
            height,
        })
    }

    pub(crate) fn effective_column(&self, column: usize) -> usize {
        if self.columns <= 1 { 0 } else { column }
    }

    /// Walk to the item (or padding row) at `row` in column 0.
    pub(crate) fn landing(&mut self, row: usize) -> Result<Landing> {
        let count = self.row_count();
        let root = match self.root {
            Some(root) if row < count => root,
            _ => return Err(Error::RowOutOfRange { row, count }),
        };
        let mut stack = core::mem::take(&mut self.cache.stack);
        if !self.options.position_cache {
            stack.clear();
        }
        while let Some(top) = stack.last() {
            if row >= top.base && row < top.end {
                break;
            }
            stack.pop();
        }
        if stack.is_empty() {
            stack.push(Frame::new(root, 0, count));
        }
        let landing = self.walk(&mut stack, row);
        self.cache.stack = stack;
        Ok(landing)
    }

    /// Continue a walk from the cursor on top of `stack` down to `row`.
    fn walk(&self, stack: &mut FrameStack, row: usize) -> Landing {
        loop {
            let top = stack.len() - 1;
            let frame = stack[top];
            let n = self.node(frame.node);
            let mut pos = frame.pos;
            let mut base = frame.base;
            let mut consumed = frame.consumed;
            let mut descend = None;
            while let Some(&child) = n.children.get(pos) {
                let c = self.node(child);
                let c_row = base + (c.index - consumed);
                if row < c_row {
                    break;
                }
                let below = c.rows_below();
                if row <= c_row + below {
                    let offset = row - c_row;
                    if offset <= c.immediate_gain {
                        stack[top] = Frame {
                            pos,
                            base,
                            consumed,
                            ..frame
                        };
                        return Landing {
                            owner: frame.node,
                            index: c.index,
                            child: Some(child),
                            offset,
                            level: top,
                        };
                    }
                    descend = Some(Frame::new(
                        child,
                        c_row + 1 + c.immediate_gain,
                        c_row + 1 + below,
                    ));
                    break;
                }
                base = c_row + 1 + below;
                consumed = c.index + 1;
                pos += 1;
            }
            stack[top] = Frame {
                pos,
                base,
                consumed,
                ..frame
            };
            match descend {
                Some(next) => stack.push(next),
                None => {
                    return Landing {
                        owner: frame.node,
                        index: consumed + (row - base),
                        child: None,
                        offset: 0,
                        level: top,
                    };
                }
            }
        }
    }

    /// Turn a column-0 landing into a position for `column`.
    pub(crate) fn finish_resolve(
        &self,
        landing: Landing,
        row: usize,
        column: usize,
    ) -> Result<Position> {
        let Landing {
            owner,
            index,
            child,
            offset,
            level,
        } = landing;
        let blank = (offset > 0).then_some(offset);
        let base_column = self.node(owner).column;
        if column == base_column {
            return Ok(Position {
                node: owner,
                index,
                column,
                level,
                sub_item_offset: 0,
                blank,
            });
        }
        let cells = self.item_columns(owner, index);
        if column >= cells {
            return Err(Error::ColumnOutOfRange {
                row,
                column,
                count: cells,
            });
        }
        if let Some(cell) = child.and_then(|c| self.node(c).sub_item(column - base_column)) {
            let s = self.node(cell);
            let k = if s.is_complex() {
                offset.checked_sub(1)
            } else {
                Some(offset)
            };
            if let Some(k) = k
                && k < s.full_count
            {
                return Ok(self.resolve_in_cell(cell, k, offset));
            }
        }
        Ok(Position {
            node: owner,
            index,
            column,
            level,
            sub_item_offset: 0,
            blank,
        })
    }

    /// Resolve row `k` of the list rooted at sub-item root `cell`.
    fn resolve_in_cell(&self, cell: NodeId, k: usize, offset: usize) -> Position {
        let rows = self.node(cell).full_count;
        let mut stack: FrameStack = smallvec![Frame::new(cell, 0, rows)];
        let landing = self.walk(&mut stack, k);
        Position {
            node: landing.owner,
            index: landing.index,
            column: self.node(landing.owner).column,
            level: landing.level,
            sub_item_offset: offset,
            blank: None,
        }
    }

    /// Cells on the row of item `index` of `owner`.
    pub(crate) fn item_columns(&self, owner: NodeId, index: usize) -> usize {
        let n = self.node(owner);
        if !n.flags.contains(NodeFlags::MULTI_COLUMN) {
            return 1;
        }
        let Some(branch) = &n.branch else {
            return 1;
        };
        let count = if n.flags.contains(NodeFlags::JAGGED_COLUMNS) {
            branch.column_count_of_row(index)
        } else {
            branch.column_count()
        };
        count.clamp(1, self.columns.max(1))
    }

    /// First row of the list of `id`, `None` if the list is hidden.
    pub(crate) fn list_start(&self, id: NodeId) -> Option<usize> {
        let n = self.node(id);
        let Some(parent) = n.parent else {
            return Some(0);
        };
        if n.is_sub_item_root() {
            let anchor = self.node(parent);
            let row = self.row_of_item(anchor.parent?, anchor.index)?;
            return Some(row + usize::from(n.is_complex()));
        }
        if !n.is_expanded() {
            return None;
        }
        Some(self.row_of_item(parent, n.index)? + 1 + n.immediate_gain)
    }

    /// Absolute row of item `index` in the list of `owner`, `None` if hidden.
    pub(crate) fn row_of_item(&self, owner: NodeId, index: usize) -> Option<usize> {
        Some(self.list_start(owner)? + self.offset_in_list(owner, index))
    }

    /// Rows between the start of the list of `owner` and item `index`.
    pub(crate) fn offset_in_list(&self, owner: NodeId, index: usize) -> usize {
        let n = self.node(owner);
        let mut offset = index;
        for &c in &n.children {
            let c = self.node(c);
            if c.index >= index {
                break;
            }
            offset += c.rows_below();
        }
        offset
    }

    /// Last row occupied by item `index` of `owner`, including its padding and expansion.
    pub(crate) fn last_row_of_item(&self, owner: NodeId, index: usize) -> Option<usize> {
        let row = self.row_of_item(owner, index)?;
        Some(row + self.child_at(owner, index).map_or(0, |c| self.node(c).rows_below()))
    }

    /// Row of the item whose list `id` is, walking through sub-item anchors.
    pub(crate) fn parent_row(&self, id: NodeId) -> Option<usize> {
        let n = self.node(id);
        let parent = n.parent?;
        if n.is_sub_item_root() {
            let anchor = self.node(parent);
            return self.row_of_item(anchor.parent?, anchor.index);
        }
        self.row_of_item(parent, n.index)
    }
}
