// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Expansion state: toggling items and sub-item cells, recursive expansion and
//! locating objects.
//!
//! Provider calls happen before the graph is touched. A new expansion is first
//! *prepared* (child branch, item count and every complex cell of its rows) and only
//! committed once all provider calls have succeeded, so a failing provider leaves the
//! tree exactly as it was.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::any::Any;
use core::cell::RefCell;
use core::ops::Range;

use crate::branch::{
    Branch, BranchFeatures, BranchRef, CollapseBehavior, Expansion, ExpansionOptions,
    ExpansionStyle, LocateAction, ObjectStyle, SubItemCellStyle, effective_cell_style,
};
use crate::counts::RowDelta;
use crate::error::{Error, ProviderError, Result};
use crate::event::{DisplayChanges, SubItemChange, TreeEvent};
use crate::node::{NodeFlags, signed};
use crate::tree::Tree;
use crate::types::{ItemInfo, Located, NodeId, Toggled};

/// A complex cell fetched ahead of being attached.
pub(crate) struct PreparedCell {
    pub(crate) row: usize,
    pub(crate) column: usize,
    pub(crate) branch: BranchRef,
    pub(crate) count: usize,
    /// The cell starts below its anchor row instead of on it.
    pub(crate) complex: bool,
    pub(crate) source: Option<Rc<RefCell<Tree>>>,
}

/// A branch and its complex cells, fetched ahead of being attached.
pub(crate) struct Prepared {
    pub(crate) branch: BranchRef,
    pub(crate) count: usize,
    pub(crate) cells: Vec<PreparedCell>,
    pub(crate) options: ExpansionOptions,
    /// Tree whose expansion state is taken over after binding.
    pub(crate) source: Option<Rc<RefCell<Tree>>>,
}

/// What a toggle at a cell acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ToggleTarget {
    /// Expansion of an item in column 0 of its list.
    Item { owner: NodeId, index: usize },
    /// Sub-item cell at a branch-relative column of an anchor row.
    Cell {
        owner: NodeId,
        index: usize,
        column: usize,
    },
}

impl Tree {
    /// Toggle the expansion of a cell.
    ///
    /// In column 0 (and inside sub-item cells) this expands or collapses the item. On an
    /// anchor row in a non-zero column it toggles the sub-item cell.
    pub fn toggle_expansion(&mut self, row: usize, column: usize) -> Result<Toggled> {
        let target = self.toggle_target(row, column)?;
        let expand = !self.target_expanded(target);
        self.set_expansion(target, expand)
    }

    /// Expand a cell; does nothing if it is already expanded.
    pub fn expand(&mut self, row: usize, column: usize) -> Result<Toggled> {
        let target = self.toggle_target(row, column)?;
        self.set_expansion(target, true)
    }

    /// Collapse a cell; does nothing if it is not expanded.
    pub fn collapse(&mut self, row: usize, column: usize) -> Result<Toggled> {
        let target = self.toggle_target(row, column)?;
        self.set_expansion(target, false)
    }

    /// Whether a cell is expanded. Complex cells are always expanded.
    pub fn is_expanded(&mut self, row: usize, column: usize) -> Result<bool> {
        let target = self.toggle_target(row, column)?;
        Ok(self.target_expanded(target))
    }

    /// Whether a cell can be expanded by a toggle.
    pub fn is_expandable(&mut self, row: usize, column: usize) -> Result<bool> {
        Ok(match self.toggle_target(row, column)? {
            ToggleTarget::Item { owner, index } => self.item_expandable(owner, index),
            ToggleTarget::Cell {
                owner,
                index,
                column,
            } => self.cell_expandable(owner, index, column),
        })
    }

    /// Expand an item and, below it, every expandable item of branches that declare
    /// [`BranchFeatures::RECURSIVE_EXPANSION`](crate::BranchFeatures::RECURSIVE_EXPANSION),
    /// down to [`TreeOptions::max_recursive_depth`](crate::TreeOptions::max_recursive_depth).
    ///
    /// A single count change is reported for the whole subtree.
    pub fn expand_recursively(&mut self, row: usize, column: usize) -> Result<Toggled> {
        let ToggleTarget::Item { owner, index } = self.toggle_target(row, column)? else {
            return Err(Error::InvalidOperation(
                "recursive expansion applies to items",
            ));
        };
        let first = self.expand_item(owner, index, None)?;
        let Some(child) = self.expanded_child(owner, index) else {
            return Ok(Toggled {
                expanded: false,
                row_delta: 0,
            });
        };
        if self.node(child).flags.contains(NodeFlags::BLOCK_RECURSION) {
            self.notify_item_toggle(owner, index, first);
            return Ok(Toggled {
                expanded: true,
                row_delta: first.rows(),
            });
        }
        let (items, gains) = {
            let n = self.node(child);
            (n.full_count, n.full_gain)
        };
        let outcome = self.expand_descendants(child, child, 1);
        let below = {
            let n = self.node(child);
            RowDelta::new(
                signed(n.full_count) - signed(items),
                signed(n.full_gain) - signed(gains),
            )
        };
        let total = first + self.resume_delta(child, below);
        log::debug!("recursive expansion of item {index}: {} rows", total.rows());
        self.notify_item_toggle(owner, index, total);
        outcome?;
        Ok(Toggled {
            expanded: true,
            row_delta: total.rows(),
        })
    }

    /// Describe the item behind a cell.
    pub fn item_info(&mut self, row: usize, column: usize) -> Result<ItemInfo> {
        let pos = self.resolve(row, column)?;
        let (branch, base, sub_item) = {
            let n = self.node(pos.node);
            (
                n.branch.clone(),
                n.column,
                n.flags.contains(NodeFlags::IN_SUB_ITEM_COLUMN),
            )
        };
        let branch = branch.ok_or(Error::InvalidOperation("item has no branch"))?;
        let relative = pos.column - base;
        let (expandable, expanded) = if pos.is_blank() {
            (false, false)
        } else if relative == 0 {
            (
                self.item_expandable(pos.node, pos.index),
                self.expanded_child(pos.node, pos.index).is_some(),
            )
        } else {
            (
                self.cell_expandable(pos.node, pos.index, relative),
                self.cell_expanded(pos.node, pos.index, relative),
            )
        };
        Ok(ItemInfo {
            branch,
            index: pos.index,
            column: relative,
            level: pos.level,
            expandable,
            expanded,
            blank: pos.is_blank(),
            sub_item,
        })
    }

    /// Rows shown by the expansion of the item on `row`, zero when collapsed.
    pub fn descendant_count(&mut self, row: usize) -> Result<usize> {
        let landing = self.landing(row)?;
        if landing.offset > 0 {
            return Ok(0);
        }
        Ok(self
            .expanded_child(landing.owner, landing.index)
            .map_or(0, |c| self.node(c).list_rows()))
    }

    /// Find `target` and make it visible.
    ///
    /// The search starts at the first attachment of `branch`, or at the root. Each branch
    /// on the way answers through [`Branch::locate_object`]; items it sends the search
    /// into are expanded, and collapsed ancestors of the result are expanded too.
    /// Returns `None` when the object is not found.
    pub fn locate(
        &mut self,
        branch: Option<&BranchRef>,
        target: &dyn Any,
        style: ObjectStyle,
    ) -> Result<Option<Located>> {
        let start = match branch {
            Some(b) => self.bound_nodes(b)?[0],
            None => match self.root {
                Some(root) => root,
                None => return Ok(None),
            },
        };
        let before = self.row_count();
        let mut current = start;
        let mut parent_item = None;
        let mut depth = 0;
        let found = loop {
            let (answer, count) = {
                let n = self.node(current);
                let Some(b) = n.branch.as_ref() else {
                    break None;
                };
                (b.locate_object(target, style), n.immediate_count)
            };
            if matches!(answer.action, LocateAction::ThisLevel | LocateAction::NextLevel)
                && answer.row >= count
            {
                log::warn!(
                    "branch located an object at item {} of {count}; ignoring",
                    answer.row
                );
                break None;
            }
            match answer.action {
                LocateAction::ThisLevel => break Some((current, answer.row, answer.column)),
                LocateAction::NextLevel => {
                    depth += 1;
                    if depth > self.options.max_recursive_depth {
                        break None;
                    }
                    let delta = self.expand_item(current, answer.row, None)?;
                    self.notify_item_toggle(current, answer.row, delta);
                    let Some(child) = self.expanded_child(current, answer.row) else {
                        break None;
                    };
                    parent_item = Some((current, answer.row, 0));
                    current = child;
                }
                LocateAction::NotTracked => break None,
                LocateAction::NotTrackedReturnParent => break parent_item,
            }
        };
        let Some((owner, index, column)) = found else {
            return Ok(None);
        };
        self.ensure_visible(owner)?;
        let row = self
            .row_of_item(owner, index)
            .ok_or(Error::InvalidOperation("located item is not visible"))?;
        let cells = self.item_columns(owner, index);
        let column = self.node(owner).column + column.min(cells - 1);
        Ok(Some(Located {
            row,
            column,
            count_delta: signed(self.row_count()) - signed(before),
        }))
    }

    // --- internals ---

    fn toggle_target(&mut self, row: usize, column: usize) -> Result<ToggleTarget> {
        let landing = self.landing(row)?;
        let column = self.effective_column(column);
        if column == 0 {
            if landing.offset > 0 {
                return Err(Error::InvalidOperation("blank cells do not expand"));
            }
            return Ok(ToggleTarget::Item {
                owner: landing.owner,
                index: landing.index,
            });
        }
        let cells = self.item_columns(landing.owner, landing.index);
        if column >= cells {
            return Err(Error::ColumnOutOfRange {
                row,
                column,
                count: cells,
            });
        }
        if landing.offset == 0 {
            return Ok(ToggleTarget::Cell {
                owner: landing.owner,
                index: landing.index,
                column: column - self.node(landing.owner).column,
            });
        }
        let pos = self.finish_resolve(landing, row, column)?;
        if pos.is_blank() || pos.column != self.node(pos.node).column {
            return Err(Error::InvalidOperation("blank cells do not expand"));
        }
        Ok(ToggleTarget::Item {
            owner: pos.node,
            index: pos.index,
        })
    }

    fn target_expanded(&self, target: ToggleTarget) -> bool {
        match target {
            ToggleTarget::Item { owner, index } => self.expanded_child(owner, index).is_some(),
            ToggleTarget::Cell {
                owner,
                index,
                column,
            } => self.cell_expanded(owner, index, column),
        }
    }

    fn set_expansion(&mut self, target: ToggleTarget, expand: bool) -> Result<Toggled> {
        if self.target_expanded(target) == expand {
            return Ok(Toggled {
                expanded: expand,
                row_delta: 0,
            });
        }
        match target {
            ToggleTarget::Item { owner, index } => {
                let delta = if expand {
                    self.expand_item(owner, index, None)?
                } else {
                    self.collapse_item(owner, index)
                };
                self.notify_item_toggle(owner, index, delta);
                Ok(Toggled {
                    expanded: self.expanded_child(owner, index).is_some(),
                    row_delta: delta.rows(),
                })
            }
            ToggleTarget::Cell {
                owner,
                index,
                column,
            } => self.toggle_cell(owner, index, column),
        }
    }

    pub(crate) fn expanded_child(&self, owner: NodeId, index: usize) -> Option<NodeId> {
        self.child_at(owner, index)
            .filter(|c| self.node(*c).is_expanded())
    }

    fn item_expandable(&self, owner: NodeId, index: usize) -> bool {
        let n = self.node(owner);
        if let Some(child) = self.child_at(owner, index)
            && self.node(child).branch.is_some()
        {
            return true;
        }
        n.flags.contains(NodeFlags::ALLOW_EXPANSION)
            && n.branch.as_ref().is_some_and(|b| b.is_expandable(index, 0))
    }

    fn cell_expanded(&self, owner: NodeId, index: usize, column: usize) -> bool {
        self.child_at(owner, index)
            .is_some_and(|c| self.node(c).sub_item(column).is_some())
    }

    fn cell_expandable(&self, owner: NodeId, index: usize, column: usize) -> bool {
        let Some(branch) = self.node(owner).branch.as_ref() else {
            return false;
        };
        let attached_complex = self
            .child_at(owner, index)
            .and_then(|a| self.node(a).sub_item(column))
            .is_some_and(|c| self.node(c).flags.contains(NodeFlags::COMPLEX_SUB_ITEM));
        matches!(
            effective_cell_style(&**branch, index, column),
            SubItemCellStyle::Expandable | SubItemCellStyle::Mixed
        ) && !attached_complex
            && branch.is_expandable(index, column)
    }

    /// Fetch everything needed to attach an expansion below the current root.
    pub(crate) fn prepare(&self, expansion: Expansion, in_sub_item: bool) -> Result<Prepared> {
        self.prepare_within(expansion, in_sub_item, self.columns)
    }

    /// Fetch everything needed to attach `branch` as the new root.
    pub(crate) fn prepare_root(&self, branch: BranchRef) -> Result<Prepared> {
        let limit = branch.column_count().max(1);
        self.prepare_within(Expansion::new(branch), false, limit)
    }

    fn prepare_within(
        &self,
        expansion: Expansion,
        in_sub_item: bool,
        limit: usize,
    ) -> Result<Prepared> {
        let Expansion {
            branch,
            options,
            source,
        } = expansion;
        let count = branch.visible_item_count();
        let flags = NodeFlags::from_features(branch.features(), in_sub_item);
        let cells = complex_cells(&*branch, flags, 0..count, limit)?;
        Ok(Prepared {
            branch,
            count,
            cells,
            options,
            source: source.filter(|_| options.contains(ExpansionOptions::CONSUME_TREE)),
        })
    }

    /// Bind `id` to a prepared branch and attach its complex cells. `id` must not be
    /// expanded yet; the caller propagates its counts.
    pub(crate) fn populate(&mut self, id: NodeId, prepared: Prepared) {
        let Prepared {
            branch,
            count,
            cells,
            options,
            source,
        } = prepared;
        self.bind(id, branch, count);
        self.attach_cells(id, cells);
        let flags = &mut self.node_mut(id).flags;
        flags.remove(NodeFlags::NEEDS_POPULATE);
        if options.contains(ExpansionOptions::BLOCK_RECURSION) {
            flags.insert(NodeFlags::BLOCK_RECURSION);
        }
        match source {
            Some(source) => {
                self.consume(id, &source);
                self.recount_subtree(id);
            }
            None => self.recount_local(id),
        }
    }

    /// Take over the expansion state of `source` below `id`, which is bound to the same
    /// branch as the source root, and clear `source`.
    fn consume(&mut self, id: NodeId, source: &RefCell<Tree>) {
        let Ok(mut source) = source.try_borrow_mut() else {
            log::warn!("expansion source is borrowed; using its branch only");
            return;
        };
        if let Some(root) = source.root {
            self.graft(id, &source, root);
        }
        source.clear_root();
        log::debug!("consumed expansion state into {id:?}");
    }

    /// Copy expanded children and sub-item cells of `from` in `source` below `id`.
    /// Counts are left for the caller to recompute.
    fn graft(&mut self, id: NodeId, source: &Tree, from: NodeId) {
        let multi_column = self.node(id).flags.contains(NodeFlags::MULTI_COLUMN);
        for &c in &source.node(from).children {
            let theirs = source.node(c);
            if theirs.index >= self.node(id).immediate_count {
                continue;
            }
            let child = self.ensure_child(id, theirs.index);
            if let Some(branch) = theirs.branch.clone() {
                self.bind(child, branch, theirs.immediate_count);
                self.graft(child, source, c);
                let carried =
                    NodeFlags::EXPANDED | NodeFlags::NEEDS_POPULATE | NodeFlags::BLOCK_RECURSION;
                self.node_mut(child).flags.insert(theirs.flags & carried);
            }
            if multi_column && let Some(cells) = &theirs.sub_items {
                for s in cells.iter() {
                    if self.node(child).sub_item(s.column).is_some() {
                        continue;
                    }
                    let cell = source.node(s.root);
                    let Some(branch) = cell.branch.clone() else {
                        continue;
                    };
                    let complex = cell.flags.contains(NodeFlags::COMPLEX_SUB_ITEM);
                    let root = self.attach_cell(
                        id,
                        theirs.index,
                        s.column,
                        branch,
                        cell.immediate_count,
                        complex,
                    );
                    self.graft(root, source, s.root);
                }
            }
            self.drop_empty_placeholder(child);
        }
    }

    /// Attach prepared complex cells under items of `owner` and refresh their anchors.
    pub(crate) fn attach_cells(&mut self, owner: NodeId, cells: Vec<PreparedCell>) {
        let mut anchors: Vec<NodeId> = Vec::new();
        for cell in cells {
            if self
                .child_at(owner, cell.row)
                .is_some_and(|a| self.node(a).sub_item(cell.column).is_some())
            {
                continue;
            }
            let root = self.attach_cell(
                owner,
                cell.row,
                cell.column,
                cell.branch,
                cell.count,
                cell.complex,
            );
            if let Some(source) = cell.source {
                self.consume(root, &source);
                self.recount_subtree(root);
            }
            if let Some(anchor) = self.node(root).parent
                && !anchors.contains(&anchor)
            {
                anchors.push(anchor);
            }
        }
        for anchor in anchors {
            self.refresh_anchor_gain(anchor);
        }
    }

    /// Complex cells for `rows` of the branch bound at `owner`. Provider failures are
    /// logged and the cell is skipped.
    pub(crate) fn load_complex_cells(
        &self,
        owner: NodeId,
        rows: Range<usize>,
    ) -> Vec<PreparedCell> {
        let n = self.node(owner);
        let Some(branch) = n.branch.as_ref() else {
            return Vec::new();
        };
        match complex_cells(&**branch, n.flags, rows, self.columns) {
            Ok(cells) => cells,
            Err(err) => {
                log::warn!("complex cells could not be loaded: {err}");
                Vec::new()
            }
        }
    }

    /// Expand item `index` of `owner`, propagating up to `ceiling`.
    pub(crate) fn expand_item(
        &mut self,
        owner: NodeId,
        index: usize,
        ceiling: Option<NodeId>,
    ) -> Result<RowDelta> {
        let existing = self.child_at(owner, index);
        if let Some(child) = existing {
            let n = self.node(child);
            if n.is_expanded() {
                return Ok(RowDelta::ZERO);
            }
            if n.branch.is_some() && !n.flags.contains(NodeFlags::NEEDS_POPULATE) {
                return Ok(self.commit_expansion(owner, child, ceiling));
            }
        }
        let (owner_branch, owner_flags) = {
            let n = self.node(owner);
            (n.branch.clone(), n.flags)
        };
        let owner_branch = owner_branch.ok_or(Error::InvalidOperation("item has no branch"))?;
        if index >= self.node(owner).immediate_count {
            return Err(Error::IndexOutOfRange {
                index,
                count: self.node(owner).immediate_count,
            });
        }
        let retained = existing.and_then(|c| self.node(c).branch.clone());
        let expansion = match retained {
            Some(branch) => Expansion::new(branch),
            None => {
                if !owner_flags.contains(NodeFlags::ALLOW_EXPANSION)
                    || !owner_branch.is_expandable(index, 0)
                {
                    return Err(Error::InvalidOperation("item is not expandable"));
                }
                match owner_branch.expansion(index, 0, ExpansionStyle::Children)? {
                    Some(expansion) => expansion,
                    None => {
                        log::debug!("item {index} produced no expansion");
                        return Ok(RowDelta::ZERO);
                    }
                }
            }
        };
        let in_sub_item = owner_flags.contains(NodeFlags::IN_SUB_ITEM_COLUMN);
        let prepared = self.prepare(expansion, in_sub_item)?;
        let child = self.ensure_child(owner, index);
        self.populate(child, prepared);
        log::debug!("expanded item {index} of {owner:?}");
        Ok(self.commit_expansion(owner, child, ceiling))
    }

    fn commit_expansion(
        &mut self,
        owner: NodeId,
        child: NodeId,
        ceiling: Option<NodeId>,
    ) -> RowDelta {
        self.node_mut(child).flags.insert(NodeFlags::EXPANDED);
        let (items, gains) = {
            let n = self.node(child);
            (n.full_count, n.inner_gain())
        };
        self.apply_delta(owner, signed(items), signed(gains), ceiling)
    }

    /// Collapse item `index` of `owner`, applying the branch's collapse policy.
    pub(crate) fn collapse_item(&mut self, owner: NodeId, index: usize) -> RowDelta {
        let Some(child) = self.expanded_child(owner, index) else {
            return RowDelta::ZERO;
        };
        let behavior = self
            .node(owner)
            .branch
            .as_ref()
            .map_or(CollapseBehavior::KeepExpansion, |b| b.on_collapse(index, 0));
        let (items, gains) = {
            let n = self.node(child);
            (n.full_count, n.inner_gain())
        };
        self.node_mut(child).flags.remove(NodeFlags::EXPANDED);
        let delta = self.apply_delta(owner, -signed(items), -signed(gains), None);
        match behavior {
            CollapseBehavior::KeepExpansion => {}
            CollapseBehavior::DiscardChildren => {
                self.free_children(child);
                self.node_mut(child).flags.insert(NodeFlags::NEEDS_POPULATE);
                self.recount_local(child);
            }
            CollapseBehavior::DiscardRecursively => self.discard_expansion(child),
        }
        log::debug!("collapsed item {index} of {owner:?} ({behavior:?})");
        delta
    }

    /// Release the branch of a collapsed child. Nodes that still anchor sub-item cells
    /// stay as placeholders.
    pub(crate) fn discard_expansion(&mut self, child: NodeId) {
        debug_assert!(!self.node(child).is_expanded(), "discarding an expanded node");
        if self.node(child).has_sub_items() {
            self.free_children(child);
            self.unbind(child);
            let n = self.node_mut(child);
            n.immediate_count = 0;
            n.flags.remove(NodeFlags::NEEDS_POPULATE);
            self.recount_local(child);
        } else {
            self.detach(child);
            self.free_subtree(child);
        }
    }

    fn toggle_cell(&mut self, owner: NodeId, index: usize, column: usize) -> Result<Toggled> {
        let branch = self
            .node(owner)
            .branch
            .clone()
            .ok_or(Error::InvalidOperation("item has no branch"))?;
        match effective_cell_style(&*branch, index, column) {
            SubItemCellStyle::Expandable | SubItemCellStyle::Mixed => {}
            SubItemCellStyle::Complex => {
                return Err(Error::InvalidOperation("complex cells are always expanded"));
            }
            SubItemCellStyle::Simple => {
                return Err(Error::InvalidOperation("cell is not expandable"));
            }
        }
        let attached = self
            .child_at(owner, index)
            .and_then(|a| self.node(a).sub_item(column).map(|s| (a, s)));
        if let Some((_, cell)) = attached
            && self.node(cell).flags.contains(NodeFlags::COMPLEX_SUB_ITEM)
        {
            return Err(Error::InvalidOperation("complex cells are always expanded"));
        }
        let old_gain = self
            .child_at(owner, index)
            .map_or(0, |a| self.node(a).immediate_gain);
        let old_cell = attached.map_or(0, |(_, cell)| self.node(cell).cell_gain());
        let (expanded, delta) = match attached {
            Some((anchor, cell)) => {
                self.detach(cell);
                self.free_subtree(cell);
                let d = self.refresh_anchor_gain(anchor);
                self.drop_empty_placeholder(anchor);
                (false, self.apply_delta(owner, 0, d, None))
            }
            None => {
                if !branch.is_expandable(index, column) {
                    return Err(Error::InvalidOperation("cell is not expandable"));
                }
                let nested = branch.expansion(index, column, ExpansionStyle::SubItem)?;
                let Some(Expansion {
                    branch: nested,
                    options,
                    source,
                }) = nested
                else {
                    return Ok(Toggled {
                        expanded: false,
                        row_delta: 0,
                    });
                };
                let count = nested.visible_item_count();
                let cell = self.attach_cell(owner, index, column, nested, count, false);
                let consumed = options.contains(ExpansionOptions::CONSUME_TREE);
                if let Some(source) = source.filter(|_| consumed) {
                    self.consume(cell, &source);
                    self.recount_subtree(cell);
                }
                let anchor = self
                    .node(cell)
                    .parent
                    .ok_or(Error::InvalidOperation("detached cell"))?;
                let d = self.refresh_anchor_gain(anchor);
                (true, self.apply_delta(owner, 0, d, None))
            }
        };
        log::debug!("cell {index}/{column} expanded: {expanded}");
        self.notify_cell_change(owner, index, column, old_gain, old_cell, delta);
        Ok(Toggled {
            expanded,
            row_delta: delta.rows(),
        })
    }

    /// The cell at item `row`, branch-relative `column` of `branch` switched shape.
    ///
    /// With `make_complex` the cell's list is loaded as a complex cell, replacing any
    /// expansion it had; otherwise the cell's list is dropped.
    pub fn update_cell_style(
        &mut self,
        branch: &BranchRef,
        row: usize,
        column: usize,
        make_complex: bool,
    ) -> Result<()> {
        let nodes = self.bound_nodes(branch)?;
        if column == 0 {
            return Err(Error::InvalidOperation("column 0 is not a sub-item cell"));
        }
        let features = branch.features();
        if !features.contains(BranchFeatures::MULTI_COLUMN) {
            return Err(Error::InvalidOperation("branch is not multi-column"));
        }
        for &id in &nodes {
            let count = self.node(id).immediate_count;
            if row >= count {
                return Err(Error::IndexOutOfRange { index: row, count });
            }
        }
        let width = if features.contains(BranchFeatures::JAGGED_COLUMNS) {
            branch.column_count_of_row(row)
        } else {
            branch.column_count()
        };
        if column >= width.min(self.columns) {
            return Err(Error::InvalidOperation("column is past the end of the row"));
        }
        let mut fresh = if make_complex {
            branch
                .expansion(row, column, ExpansionStyle::SubItemRoot)?
                .map(|e| prepared_cell(row, column, e, SubItemCellStyle::Complex))
        } else {
            None
        };
        for id in nodes {
            if !self.is_alive(id) || !self.node(id).flags.contains(NodeFlags::MULTI_COLUMN) {
                continue;
            }
            let existing = self
                .child_at(id, row)
                .and_then(|a| self.node(a).sub_item(column));
            let old_gain = self
                .child_at(id, row)
                .map_or(0, |a| self.node(a).immediate_gain);
            let old_cell = existing.map_or(0, |c| self.node(c).cell_gain());
            if let Some(cell) = existing {
                self.detach(cell);
                self.free_subtree(cell);
            }
            if let Some(cell) = fresh.as_mut() {
                let root =
                    self.attach_cell(id, row, column, cell.branch.clone(), cell.count, true);
                // Only the first attachment takes over the source tree.
                if let Some(source) = cell.source.take() {
                    self.consume(root, &source);
                    self.recount_subtree(root);
                }
            }
            let Some(anchor) = self.child_at(id, row) else {
                continue;
            };
            let d = self.refresh_anchor_gain(anchor);
            self.drop_empty_placeholder(anchor);
            let delta = self.apply_delta(id, 0, d, None);
            log::debug!("cell {row}/{column} of {id:?} complex: {make_complex}");
            self.notify_cell_change(id, row, column, old_gain, old_cell, delta);
        }
        Ok(())
    }

    /// Report a change of the cell in branch-relative `column` of item `index` of
    /// `owner`. `old_gain` is the padding below the item and `old_cell` the padding of
    /// the cell before the change.
    pub(crate) fn notify_cell_change(
        &mut self,
        owner: NodeId,
        index: usize,
        column: usize,
        old_gain: usize,
        old_cell: usize,
        delta: RowDelta,
    ) {
        let Some(row) = self.row_of_item(owner, index) else {
            return;
        };
        let anchor = self.child_at(owner, index);
        let new_gain = anchor.map_or(0, |a| self.node(a).immediate_gain);
        let new_cell = anchor
            .and_then(|a| self.node(a).sub_item(column))
            .map_or(0, |c| self.node(c).cell_gain());
        let absolute = self.node(owner).column + column;
        let moved = signed(new_cell) - signed(old_cell);
        let changes = if moved == delta.rows() {
            Vec::new()
        } else {
            alloc::vec![SubItemChange {
                column: absolute,
                delta: moved,
            }]
        };
        self.push_count_event(
            Some(row),
            absolute,
            delta.rows(),
            Some(row),
            Some(old_gain.min(new_gain)),
            changes,
        );
        self.events.push(TreeEvent::DisplayDataChanged {
            start_row: row,
            column: Some(absolute),
            count: 1,
            changes: DisplayChanges::EXPANSION_STATE,
        });
    }

    /// Free a placeholder that no longer anchors anything.
    pub(crate) fn drop_empty_placeholder(&mut self, anchor: NodeId) {
        let n = self.node(anchor);
        if n.branch.is_none() && !n.has_sub_items() && n.children.is_empty() {
            debug_assert_eq!(n.immediate_gain, 0, "placeholder without cells keeps padding");
            self.detach(anchor);
            self.free_subtree(anchor);
        }
    }

    fn expand_descendants(&mut self, id: NodeId, top: NodeId, depth: usize) -> Result<()> {
        if depth > self.options.max_recursive_depth {
            return Ok(());
        }
        let (branch, count) = {
            let n = self.node(id);
            if !n
                .flags
                .contains(NodeFlags::ALLOW_RECURSIVE_EXPANSION | NodeFlags::ALLOW_EXPANSION)
            {
                return Ok(());
            }
            match &n.branch {
                Some(b) => (b.clone(), n.immediate_count),
                None => return Ok(()),
            }
        };
        for index in 0..count {
            if !branch.is_expandable(index, 0) {
                continue;
            }
            self.expand_item(id, index, Some(top))?;
            if let Some(child) = self.expanded_child(id, index)
                && !self.node(child).flags.contains(NodeFlags::BLOCK_RECURSION)
            {
                self.expand_descendants(child, top, depth + 1)?;
            }
        }
        Ok(())
    }

    /// Expand every collapsed ancestor needed to show the list of `id`.
    fn ensure_visible(&mut self, id: NodeId) -> Result<()> {
        let mut pending = Vec::new();
        let mut current = id;
        loop {
            let n = self.node(current);
            let Some(parent) = n.parent else {
                break;
            };
            if n.is_sub_item_root() {
                match self.node(parent).parent {
                    Some(owner) => current = owner,
                    None => break,
                }
                continue;
            }
            if !n.is_expanded() {
                pending.push((parent, n.index));
            }
            current = parent;
        }
        for (owner, index) in pending.into_iter().rev() {
            let delta = self.expand_item(owner, index, None)?;
            self.notify_item_toggle(owner, index, delta);
        }
        Ok(())
    }

    pub(crate) fn notify_item_toggle(&mut self, owner: NodeId, index: usize, delta: RowDelta) {
        let Some(row) = self.row_of_item(owner, index) else {
            return;
        };
        let column = self.node(owner).column;
        let gain = self
            .child_at(owner, index)
            .map_or(0, |c| self.node(c).immediate_gain);
        self.push_count_event(Some(row), column, delta.rows(), Some(row), Some(gain), Vec::new());
        self.events.push(TreeEvent::DisplayDataChanged {
            start_row: row,
            column: Some(column),
            count: 1,
            changes: DisplayChanges::EXPANSION_STATE,
        });
    }
}

/// A cell loaded with its row. Mixed cells that ask to be used as a sub-item expansion
/// start on the anchor row like an expanded expandable cell.
fn prepared_cell(
    row: usize,
    column: usize,
    expansion: Expansion,
    style: SubItemCellStyle,
) -> PreparedCell {
    let Expansion {
        branch,
        options,
        source,
    } = expansion;
    let count = branch.visible_item_count();
    PreparedCell {
        row,
        column,
        branch,
        count,
        complex: style == SubItemCellStyle::Complex
            || !options.contains(ExpansionOptions::USE_AS_SUB_ITEM_EXPANSION),
        source: source.filter(|_| options.contains(ExpansionOptions::CONSUME_TREE)),
    }
}

/// Complex cells of `rows`, fetched from `branch`.
fn complex_cells(
    branch: &dyn Branch,
    flags: NodeFlags,
    rows: Range<usize>,
    limit: usize,
) -> core::result::Result<Vec<PreparedCell>, ProviderError> {
    let mut out = Vec::new();
    if !flags.contains(NodeFlags::MULTI_COLUMN | NodeFlags::COMPLEX_COLUMNS) {
        return Ok(out);
    }
    for row in rows {
        let cells = if flags.contains(NodeFlags::JAGGED_COLUMNS) {
            branch.column_count_of_row(row)
        } else {
            branch.column_count()
        }
        .clamp(1, limit.max(1));
        for column in 1..cells {
            let style = effective_cell_style(branch, row, column);
            if !matches!(style, SubItemCellStyle::Complex | SubItemCellStyle::Mixed) {
                continue;
            }
            let Some(nested) = branch.expansion(row, column, ExpansionStyle::SubItemRoot)? else {
                continue;
            };
            out.push(prepared_cell(row, column, nested, style));
        }
    }
    Ok(out)
}
