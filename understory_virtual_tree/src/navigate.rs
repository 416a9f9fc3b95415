// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cell navigation over the shared padding model.

use crate::error::Result;
use crate::tree::Tree;
use crate::types::{BlankExpansion, CellPosition, Navigation};

impl Tree {
    /// The cell reached from `from` by moving in `direction`, or `None` at an edge.
    ///
    /// Row and column moves skip blank cells: they land on the cell with content whose
    /// blank padding covers the target. Hierarchy moves follow items through their
    /// lists, including lists inside sub-item cells.
    pub fn navigate(
        &mut self,
        from: CellPosition,
        direction: Navigation,
    ) -> Result<Option<CellPosition>> {
        let column = self.effective_column(from.column);
        let here = self.blank_expansion(from.row, column)?;
        let top = CellPosition::new(here.top_row, column);
        match direction {
            Navigation::Up => {
                if here.top_row < from.row {
                    return Ok(Some(CellPosition::new(here.top_row, here.left_column)));
                }
                let Some(row) = here.top_row.checked_sub(1) else {
                    return Ok(None);
                };
                self.snap(row, column).map(Some)
            }
            Navigation::Down => {
                let row = here.bottom_row() + 1;
                if row >= self.row_count() {
                    return Ok(None);
                }
                self.snap(row, column).map(Some)
            }
            Navigation::LeftColumn => self.column_left(from.row, &here),
            Navigation::RightColumn => self.column_right(from.row, &here),
            Navigation::Left => match self.navigate_hierarchy(top, Navigation::Parent)? {
                Some(parent) => Ok(Some(parent)),
                None => self.column_left(from.row, &here),
            },
            Navigation::Right => match self.column_right(from.row, &here)? {
                Some(next) => Ok(Some(next)),
                None => self.navigate_hierarchy(top, Navigation::FirstChild),
            },
            Navigation::Parent
            | Navigation::ComplexParent
            | Navigation::FirstChild
            | Navigation::LastChild
            | Navigation::NextSibling
            | Navigation::PreviousSibling => self.navigate_hierarchy(top, direction),
        }
    }

    fn column_left(&mut self, row: usize, here: &BlankExpansion) -> Result<Option<CellPosition>> {
        match here.left_column.checked_sub(1) {
            Some(left) => self.snap(row, left).map(Some),
            None => Ok(None),
        }
    }

    fn column_right(&mut self, row: usize, here: &BlankExpansion) -> Result<Option<CellPosition>> {
        let right = here.left_column + here.width;
        if right >= self.column_count_of_row(row)? {
            return Ok(None);
        }
        self.snap(row, right).map(Some)
    }

    /// Top-left cell with content covering `row`/`column`, clamping the column to the row.
    fn snap(&mut self, row: usize, column: usize) -> Result<CellPosition> {
        let cells = self.column_count_of_row(row)?;
        let target = self.blank_expansion(row, column.min(cells - 1))?;
        Ok(CellPosition::new(target.top_row, target.left_column))
    }

    fn navigate_hierarchy(
        &mut self,
        from: CellPosition,
        direction: Navigation,
    ) -> Result<Option<CellPosition>> {
        let pos = self.resolve(from.row, from.column)?;
        if pos.is_blank() {
            return Ok(None);
        }
        let node = pos.node;
        let list_column = self.node(node).column;
        let at = |row: Option<usize>, column| row.map(|row| CellPosition::new(row, column));
        Ok(match direction {
            Navigation::Parent if self.node(node).is_sub_item_root() => None,
            // Nested lists share their parent item's column; a sub-item list sits in
            // its anchor cell's column.
            Navigation::Parent | Navigation::ComplexParent => {
                at(self.parent_row(node), list_column)
            }
            Navigation::NextSibling => {
                if pos.index + 1 >= self.node(node).immediate_count {
                    None
                } else {
                    at(self.row_of_item(node, pos.index + 1), list_column)
                }
            }
            Navigation::PreviousSibling => match pos.index.checked_sub(1) {
                Some(previous) => at(self.row_of_item(node, previous), list_column),
                None => None,
            },
            Navigation::FirstChild | Navigation::LastChild => {
                let Some(child) = self.expanded_child(node, pos.index) else {
                    return Ok(None);
                };
                let count = self.node(child).immediate_count;
                if count == 0 {
                    return Ok(None);
                }
                let index = if direction == Navigation::FirstChild {
                    0
                } else {
                    count - 1
                };
                at(self.row_of_item(child, index), self.node(child).column)
            }
            Navigation::Up
            | Navigation::Down
            | Navigation::Left
            | Navigation::LeftColumn
            | Navigation::Right
            | Navigation::RightColumn => None,
        })
    }
}
