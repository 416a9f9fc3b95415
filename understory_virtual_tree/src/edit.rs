// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Branch notifications: inserts, deletes, moves, realigns, state changes and branch
//! removal.
//!
//! Every notification fans out to all nodes bound to the branch. Counts are validated
//! against each node before anything changes, so a rejected notification leaves the
//! tree untouched.

use alloc::vec::Vec;

use crate::branch::{BranchFeatures, BranchRef, ExpansionStyle, Relocation, StateRefreshChanges};
use crate::counts::RowDelta;
use crate::error::{Error, Result};
use crate::event::{DisplayChanges, SubItemChange, TreeEvent};
use crate::node::{NodeFlags, signed};
use crate::options::InconsistencyPolicy;
use crate::tree::Tree;
use crate::types::NodeId;

/// New index of item `index` after the item at `from` moved to `to`.
pub(crate) fn move_index(index: usize, from: usize, to: usize) -> usize {
    if index == from {
        to
    } else if from < to && index > from && index <= to {
        index - 1
    } else if to < from && index >= to && index < from {
        index + 1
    } else {
        index
    }
}

impl Tree {
    /// Queue an [`TreeEvent::ItemCountChanged`] for an edit unless `delta` is zero.
    pub(crate) fn push_count_changed(
        &mut self,
        anchor_row: Option<usize>,
        column: usize,
        delta: isize,
        parent_row: Option<usize>,
    ) {
        self.push_count_event(anchor_row, column, delta, parent_row, None, Vec::new());
    }

    /// Queue an [`TreeEvent::ItemCountChanged`]. `toggle` carries the padding after the
    /// anchor when the change comes from an expansion toggle.
    pub(crate) fn push_count_event(
        &mut self,
        anchor_row: Option<usize>,
        column: usize,
        delta: isize,
        parent_row: Option<usize>,
        toggle: Option<usize>,
        sub_item_changes: Vec<SubItemChange>,
    ) {
        if delta == 0 && sub_item_changes.is_empty() {
            return;
        }
        self.events.push(TreeEvent::ItemCountChanged {
            anchor_row,
            column,
            delta,
            parent_row,
            is_expansion_toggle: toggle.is_some(),
            blanks_after_anchor: toggle.unwrap_or(0),
            sub_item_changes,
        });
    }

    /// The sub-item root whose cell holds the list of `id`, with its padding.
    pub(crate) fn enclosing_cell(&self, mut id: NodeId) -> Option<(NodeId, usize)> {
        loop {
            let n = self.node(id);
            if !n.flags.contains(NodeFlags::IN_SUB_ITEM_COLUMN) {
                return None;
            }
            if n.is_sub_item_root() {
                return Some((id, n.cell_gain()));
            }
            id = n.parent?;
        }
    }

    /// The content change of a cell whose padding was `before`, when it differs from
    /// the `delta` seen by the whole row block.
    pub(crate) fn column_changes(
        &self,
        cell: Option<(NodeId, usize)>,
        delta: isize,
    ) -> Vec<SubItemChange> {
        let Some((cell, before)) = cell.filter(|(c, _)| self.is_alive(*c)) else {
            return Vec::new();
        };
        let n = self.node(cell);
        let moved = signed(n.cell_gain()) - signed(before);
        if moved == delta {
            return Vec::new();
        }
        alloc::vec![SubItemChange {
            column: n.column,
            delta: moved,
        }]
    }

    /// The row after which rows for item `pos` of `id` start.
    ///
    /// The outer `None` means the list is hidden; the inner `None` means the change
    /// starts at row 0.
    pub(crate) fn list_anchor(&self, id: NodeId, pos: usize) -> Option<Option<usize>> {
        if pos == 0 {
            Some(self.list_start(id)?.checked_sub(1))
        } else {
            Some(Some(self.last_row_of_item(id, pos - 1)?))
        }
    }

    /// Report that the list of `id` was rebuilt, as a removal of `old_rows` followed by
    /// an insertion. Lists inside sub-item cells share their row block with the other
    /// columns and report the net `delta` instead.
    pub(crate) fn push_list_rebuilt(
        &mut self,
        id: NodeId,
        anchor: Option<usize>,
        old_rows: usize,
        delta: RowDelta,
        cell: Option<(NodeId, usize)>,
    ) {
        let column = self.node(id).column;
        let parent_row = self.parent_row(id);
        if cell.is_some() {
            let changes = self.column_changes(cell, delta.rows());
            self.push_count_event(anchor, column, delta.rows(), parent_row, None, changes);
            return;
        }
        self.push_count_changed(anchor, column, -signed(old_rows), parent_row);
        let new_rows = self.node(id).list_rows();
        self.push_count_changed(anchor, column, signed(new_rows), parent_row);
    }

    /// Handle a count that contradicts the announced change.
    fn inconsistent(&mut self, branch: &BranchRef, expected: usize, actual: usize) -> Result<()> {
        match self.options.inconsistency {
            InconsistencyPolicy::Reject => Err(Error::ProviderInconsistency { expected, actual }),
            InconsistencyPolicy::Realign => {
                log::warn!("branch reports {actual} items, expected {expected}; realigning");
                self.realign(branch)
            }
        }
    }

    /// `count` items were inserted after item `after` of `branch`.
    ///
    /// The branch must declare [`BranchFeatures::INSERTS_AND_DELETES`].
    pub fn insert_items(
        &mut self,
        branch: &BranchRef,
        after: Option<usize>,
        count: usize,
    ) -> Result<()> {
        let nodes = self.bound_nodes(branch)?;
        if !branch.features().contains(BranchFeatures::INSERTS_AND_DELETES) {
            return Err(Error::InvalidOperation(
                "branch does not support inserts and deletes",
            ));
        }
        let pos = match after {
            None => 0,
            Some(a) => a.checked_add(1).ok_or(Error::IndexOutOfRange {
                index: a,
                count: self.node(nodes[0]).immediate_count,
            })?,
        };
        let actual = branch.visible_item_count();
        for &id in &nodes {
            let old = self.node(id).immediate_count;
            if pos > old {
                return Err(Error::IndexOutOfRange {
                    index: pos - 1,
                    count: old,
                });
            }
            if old.checked_add(count) != Some(actual) {
                return self.inconsistent(branch, old.saturating_add(count), actual);
            }
        }
        if count == 0 {
            return Ok(());
        }
        for id in nodes {
            if !self.is_alive(id) {
                continue;
            }
            let anchor = self.list_anchor(id, pos);
            let cell = self.enclosing_cell(id);
            let cells = self.load_complex_cells(id, pos..pos + count);
            let (old_items, old_gain) = {
                let n = self.node(id);
                (n.full_count, n.full_gain)
            };
            for child in self.node(id).children.clone() {
                let c = self.node_mut(child);
                if c.index >= pos {
                    c.index += count;
                }
            }
            self.node_mut(id).immediate_count += count;
            self.attach_cells(id, cells);
            let (items, gain) = self.counted(id);
            let delta = self.apply_delta(
                id,
                signed(items) - signed(old_items),
                signed(gain) - signed(old_gain),
                None,
            );
            self.track_insert(id, pos, count);
            log::debug!("inserted {count} items at {pos} in {id:?}");
            if let Some(anchor) = anchor {
                let column = self.node(id).column;
                let parent_row = self.parent_row(id);
                let changes = self.column_changes(cell, delta.rows());
                self.push_count_event(anchor, column, delta.rows(), parent_row, None, changes);
            }
        }
        Ok(())
    }

    /// `count` items starting at `start` were removed from `branch`.
    ///
    /// The branch must declare [`BranchFeatures::INSERTS_AND_DELETES`].
    pub fn delete_items(&mut self, branch: &BranchRef, start: usize, count: usize) -> Result<()> {
        let nodes = self.bound_nodes(branch)?;
        if !branch.features().contains(BranchFeatures::INSERTS_AND_DELETES) {
            return Err(Error::InvalidOperation(
                "branch does not support inserts and deletes",
            ));
        }
        let actual = branch.visible_item_count();
        let end = start.checked_add(count);
        for &id in &nodes {
            let old = self.node(id).immediate_count;
            if end.is_none_or(|end| end > old) {
                return Err(Error::IndexOutOfRange {
                    index: start.saturating_add(count.max(1) - 1),
                    count: old,
                });
            }
            if actual.checked_add(count) != Some(old) {
                return self.inconsistent(branch, old - count, actual);
            }
        }
        if count == 0 {
            return Ok(());
        }
        let end = start + count;
        for id in nodes {
            if !self.is_alive(id) {
                continue;
            }
            let anchor = self.list_anchor(id, start);
            let cell = self.enclosing_cell(id);
            let mut items = signed(count);
            let mut gain = 0;
            for child in self.node(id).children.clone() {
                let c = self.node(child);
                if c.index < start {
                    continue;
                }
                if c.index < end {
                    if c.is_expanded() {
                        items += signed(c.full_count);
                    }
                    gain += signed(c.gain_contribution());
                    self.detach(child);
                    self.free_subtree(child);
                } else {
                    self.node_mut(child).index -= count;
                }
            }
            self.node_mut(id).immediate_count -= count;
            let delta = self.apply_delta(id, -items, -gain, None);
            self.track_delete(id, start, count);
            log::debug!("deleted {count} items at {start} in {id:?}");
            if let Some(anchor) = anchor {
                let column = self.node(id).column;
                let parent_row = self.parent_row(id);
                let changes = self.column_changes(cell, delta.rows());
                self.push_count_event(anchor, column, delta.rows(), parent_row, None, changes);
            }
        }
        Ok(())
    }

    /// The item at `from` of `branch` moved to `to`.
    pub fn move_item(&mut self, branch: &BranchRef, from: usize, to: usize) -> Result<()> {
        let nodes = self.bound_nodes(branch)?;
        for &id in &nodes {
            let count = self.node(id).immediate_count;
            for index in [from, to] {
                if index >= count {
                    return Err(Error::IndexOutOfRange { index, count });
                }
            }
        }
        if from == to {
            return Ok(());
        }
        let (low, high) = (from.min(to), from.max(to));
        for id in nodes {
            if !self.is_alive(id) {
                continue;
            }
            let from_row = self.row_of_item(id, from);
            let moved = self.child_at(id, from);
            let block = 1 + moved.map_or(0, |c| self.node(c).rows_below());
            // Only children between `from` and `to` change index.
            let range = {
                let children = &self.node(id).children;
                let first = children.partition_point(|c| self.node(*c).index < low);
                let last = children.partition_point(|c| self.node(*c).index <= high);
                first..last
            };
            for child in self.node(id).children[range.clone()].to_vec() {
                let c = self.node_mut(child);
                c.index = move_index(c.index, from, to);
            }
            if moved.is_some() {
                let shifted = &mut self.node_mut(id).children[range];
                if from < to {
                    shifted.rotate_left(1);
                } else {
                    shifted.rotate_right(1);
                }
            }
            self.track_move(id, from, to);
            if let (Some(from_row), Some(to_row)) = (from_row, self.row_of_item(id, to)) {
                self.events.push(TreeEvent::ItemMoved {
                    column: self.node(id).column,
                    from_row,
                    to_row,
                    item_count: block,
                });
            }
        }
        Ok(())
    }

    /// Reconcile every attachment of `branch` with its current contents.
    ///
    /// Branches with [`BranchFeatures::RELOCATE_ON_REFRESH`] keep the expansions they
    /// relocate; otherwise all expansions below the branch are discarded. Branches with
    /// delayed updates wait for redraw to resume.
    pub fn realign(&mut self, branch: &BranchRef) -> Result<()> {
        let nodes = self.bound_nodes(branch)?;
        let delayed = nodes
            .iter()
            .any(|id| self.node(*id).flags.contains(NodeFlags::DELAYED_UPDATE));
        if delayed && self.defer_realign(branch) {
            return Ok(());
        }
        for id in nodes {
            if self.is_alive(id) {
                self.realign_node(id);
            }
        }
        Ok(())
    }

    /// Realign every attached branch that declares [`BranchFeatures::REALIGNS`],
    /// parents before their expansions. Static branches are left alone, but the
    /// branches below them are still visited.
    pub fn realign_all(&mut self) -> Result<()> {
        let Some(root) = self.root else {
            return Ok(());
        };
        let mut order: Vec<BranchRef> = Vec::new();
        let mut stack = alloc::vec![root];
        while let Some(id) = stack.pop() {
            let n = self.node(id);
            if let Some(branch) = &n.branch
                && branch.features().contains(BranchFeatures::REALIGNS)
                && !order.iter().any(|b| Self::same_branch(b, branch))
            {
                order.push(branch.clone());
            }
            if let Some(cells) = &n.sub_items {
                stack.extend(cells.iter().rev().map(|s| s.root));
            }
            stack.extend(n.children.iter().rev());
        }
        log::debug!("realigning {} branches", order.len());
        for branch in order {
            // Realigning a parent may have released it.
            if self.bound_nodes(&branch).is_ok() {
                self.realign(&branch)?;
            }
        }
        Ok(())
    }

    fn realign_node(&mut self, id: NodeId) {
        let Some(branch) = self.node(id).branch.clone() else {
            return;
        };
        let anchor = self.list_anchor(id, 0);
        let cell = self.enclosing_cell(id);
        let (old_items, old_gain, old_rows, relocate, in_sub_item) = {
            let n = self.node(id);
            (
                n.full_count,
                n.full_gain,
                n.list_rows(),
                n.flags.contains(NodeFlags::RELOCATE),
                n.flags.contains(NodeFlags::IN_SUB_ITEM_COLUMN),
            )
        };
        let count = branch.visible_item_count();
        let children = core::mem::take(&mut self.node_mut(id).children);
        let mut kept: Vec<NodeId> = Vec::with_capacity(children.len());
        for child in children {
            let (old_index, witness) = {
                let c = self.node(child);
                let witness = c.branch.clone().or_else(|| {
                    c.sub_items
                        .as_ref()
                        .and_then(|cells| cells.first())
                        .and_then(|s| self.node(s.root).branch.clone())
                });
                (c.index, witness)
            };
            let relocation = match witness {
                Some(witness) if relocate => branch.relocate(old_index, &witness),
                _ => Relocation::Discard,
            };
            let (index, refresh) = match relocation {
                Relocation::Discard => {
                    self.free_subtree(child);
                    continue;
                }
                Relocation::Keep => (old_index, false),
                Relocation::MoveTo(index) => (index, false),
                Relocation::Refresh(index) => (index, true),
            };
            if index >= count {
                log::warn!("expansion relocated to item {index} of {count}; discarding");
                self.free_subtree(child);
                continue;
            }
            if kept.iter().any(|k| self.node(*k).index == index) {
                log::warn!("two expansions relocated to item {index}; discarding one");
                self.free_subtree(child);
                continue;
            }
            self.node_mut(child).index = index;
            if refresh && !self.refresh_expansion(&branch, child, index, in_sub_item) {
                self.free_subtree(child);
                continue;
            }
            kept.push(child);
        }
        kept.sort_by_key(|k| self.node(*k).index);
        {
            let n = self.node_mut(id);
            n.children = kept;
            n.immediate_count = count;
        }
        let cells = self.load_complex_cells(id, 0..count);
        self.attach_cells(id, cells);
        if Some(id) == self.root {
            self.columns = if self.node(id).flags.contains(NodeFlags::MULTI_COLUMN) {
                branch.column_count().max(1)
            } else {
                1
            };
        }
        let (items, gain) = self.counted(id);
        let delta = self.apply_delta(
            id,
            signed(items) - signed(old_items),
            signed(gain) - signed(old_gain),
            None,
        );
        self.track_realign(id, count);
        log::debug!("realigned {id:?}: {count} items");
        if let Some(anchor) = anchor {
            self.push_list_rebuilt(id, anchor, old_rows, delta, cell);
        }
    }

    /// Replace the expansion at `child` with a fresh one from `branch`. Returns `false`
    /// when the child should be dropped instead.
    fn refresh_expansion(
        &mut self,
        branch: &BranchRef,
        child: NodeId,
        index: usize,
        in_sub_item: bool,
    ) -> bool {
        if self.node(child).branch.is_none() {
            return true;
        }
        let fresh = match branch.expansion(index, 0, ExpansionStyle::Children) {
            Ok(Some(fresh)) => fresh,
            Ok(None) => return false,
            Err(err) => {
                log::warn!("refreshing expansion of item {index} failed: {err}");
                return false;
            }
        };
        let prepared = match self.prepare(fresh, in_sub_item) {
            Ok(prepared) => prepared,
            Err(err) => {
                log::warn!("refreshing expansion of item {index} failed: {err}");
                return false;
            }
        };
        self.free_children(child);
        self.populate(child, prepared);
        true
    }

    /// Detach `branch` everywhere it is attached.
    pub fn remove_branch(&mut self, branch: &BranchRef) -> Result<()> {
        let nodes = self.bound_nodes(branch)?;
        for id in nodes {
            if !self.is_alive(id) {
                continue;
            }
            if Some(id) == self.root {
                self.clear_root();
                continue;
            }
            let (parent, index, sub_item_root, expanded) = {
                let n = self.node(id);
                (n.parent, n.index, n.is_sub_item_root(), n.is_expanded())
            };
            let Some(parent) = parent else {
                continue;
            };
            if sub_item_root {
                let anchor = parent;
                let Some(owner) = self.node(anchor).parent else {
                    continue;
                };
                let item = self.node(anchor).index;
                let old_gain = self.node(anchor).immediate_gain;
                let old_cell = self.node(id).cell_gain();
                self.detach(id);
                self.free_subtree(id);
                let d = self.refresh_anchor_gain(anchor);
                self.drop_empty_placeholder(anchor);
                let delta = self.apply_delta(owner, 0, d, None);
                self.notify_cell_change(owner, item, index, old_gain, old_cell, delta);
                continue;
            }
            let delta = if expanded {
                let (items, gain) = {
                    let n = self.node(id);
                    (n.full_count, n.inner_gain())
                };
                self.node_mut(id).flags.remove(NodeFlags::EXPANDED);
                self.apply_delta(parent, -signed(items), -signed(gain), None)
            } else {
                RowDelta::ZERO
            };
            self.discard_expansion(id);
            self.notify_item_toggle(parent, index, delta);
        }
        Ok(())
    }

    /// Display data of `count` items starting at `start` changed.
    ///
    /// `column` is branch-relative; `None` covers every column.
    pub fn display_data_changed(
        &mut self,
        branch: &BranchRef,
        column: Option<usize>,
        start: usize,
        count: usize,
        changes: DisplayChanges,
    ) -> Result<()> {
        let nodes = self.bound_nodes(branch)?;
        for id in nodes {
            if !self.is_alive(id) || count == 0 {
                continue;
            }
            let n = self.node(id);
            if start.checked_add(count).is_none_or(|end| end > n.immediate_count) {
                return Err(Error::IndexOutOfRange {
                    index: start.saturating_add(count - 1),
                    count: n.immediate_count,
                });
            }
            let column = column.map(|c| n.column + c);
            let (Some(first), Some(last)) = (
                self.row_of_item(id, start),
                self.last_row_of_item(id, start + count - 1),
            ) else {
                continue;
            };
            self.events.push(TreeEvent::DisplayDataChanged {
                start_row: first,
                column,
                count: last - first + 1,
                changes,
            });
        }
        Ok(())
    }

    /// Ask the branch behind a cell to flip its state, then queue
    /// [`TreeEvent::StateToggled`] and a [`DisplayChanges::STATE`] repaint for every
    /// range the branch asks for.
    ///
    /// The branch must declare [`BranchFeatures::STATE_CHANGES`].
    pub fn toggle_state(&mut self, row: usize, column: usize) -> Result<StateRefreshChanges> {
        let pos = self.resolve(row, column)?;
        if pos.is_blank() {
            return Err(Error::InvalidOperation("blank cells have no state"));
        }
        let (branch, base) = {
            let n = self.node(pos.node);
            (n.branch.clone(), n.column)
        };
        let branch = branch.ok_or(Error::InvalidOperation("item has no branch"))?;
        if !branch.features().contains(BranchFeatures::STATE_CHANGES) {
            return Err(Error::InvalidOperation("branch does not support state changes"));
        }
        let refresh = branch.toggle_state(pos.index, pos.column - base);
        log::debug!("state of item {} toggled: {refresh:?}", pos.index);
        self.events.push(TreeEvent::StateToggled {
            row,
            column: pos.column,
            refresh,
        });
        let ranges = self.refresh_ranges(pos.node, pos.index, row, pos.column, refresh);
        for (start_row, count, column) in ranges {
            self.events.push(TreeEvent::DisplayDataChanged {
                start_row,
                column,
                count,
                changes: DisplayChanges::STATE,
            });
        }
        Ok(refresh)
    }

    /// Row ranges covered by `refresh` for item `index` of `owner`, shown on `row`.
    fn refresh_ranges(
        &self,
        owner: NodeId,
        index: usize,
        row: usize,
        column: usize,
        refresh: StateRefreshChanges,
    ) -> Vec<(usize, usize, Option<usize>)> {
        let mut ranges = Vec::new();
        if refresh.contains(StateRefreshChanges::ENTIRE) {
            ranges.push((0, self.row_count(), None));
            return ranges;
        }
        if refresh.contains(StateRefreshChanges::CURRENT) {
            ranges.push((row, 1, Some(column)));
        }
        if refresh.contains(StateRefreshChanges::CHILDREN)
            && let Some(child) = self.expanded_child(owner, index)
            && let Some(first) = self.list_start(child)
        {
            ranges.push((first, self.node(child).list_rows(), None));
        }
        let parents = StateRefreshChanges::PARENTS | StateRefreshChanges::PARENTS_CHILDREN;
        let mut id = owner;
        while refresh.intersects(parents) {
            let n = self.node(id);
            let Some(parent) = n.parent else {
                break;
            };
            let (item_owner, item_index) = if n.is_sub_item_root() {
                let anchor = self.node(parent);
                match anchor.parent {
                    Some(item_owner) => (item_owner, anchor.index),
                    None => break,
                }
            } else {
                (parent, n.index)
            };
            if refresh.contains(StateRefreshChanges::PARENTS_CHILDREN)
                && let Some(first) = self.list_start(id)
            {
                ranges.push((first, n.list_rows(), None));
            }
            if refresh.contains(StateRefreshChanges::PARENTS)
                && let Some(parent_row) = self.row_of_item(item_owner, item_index)
            {
                ranges.push((parent_row, 1, None));
            }
            id = item_owner;
        }
        ranges.retain(|(_, count, _)| *count > 0);
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::SubItemCellStyle;
    use crate::event::BranchEvent;
    use crate::options::TreeOptions;
    use crate::testing::{TestBranch, assert_consistent};
    use alloc::vec;

    #[test]
    fn delete_at_front_reports_once() {
        let mut tree = Tree::new();
        let root = TestBranch::new(5);
        tree.set_root(root.clone()).unwrap();
        tree.take_events();
        root.remove(0, 2);
        let handle: BranchRef = root;
        tree.apply(&handle, BranchEvent::DeleteItems { start: 0, count: 2 })
            .unwrap();
        assert_eq!(tree.row_count(), 3);
        assert_eq!(
            tree.take_events(),
            vec![TreeEvent::ItemCountChanged {
                anchor_row: None,
                column: 0,
                delta: -2,
                parent_row: None,
                is_expansion_toggle: false,
                blanks_after_anchor: 0,
                sub_item_changes: vec![],
            }]
        );
    }

    #[test]
    fn insert_shifts_expansions() {
        let mut tree = Tree::new();
        let root = TestBranch::new(3);
        root.add_expansion(1, 0, TestBranch::new(2));
        tree.set_root(root.clone()).unwrap();
        tree.toggle_expansion(1, 0).unwrap();
        tree.take_events();

        root.insert(1, 2);
        let handle: BranchRef = root;
        tree.insert_items(&handle, Some(0), 2).unwrap();
        assert_eq!(tree.row_count(), 7);
        assert!(tree.is_expanded(3, 0).unwrap());
        assert_eq!(
            tree.take_events(),
            vec![TreeEvent::ItemCountChanged {
                anchor_row: Some(0),
                column: 0,
                delta: 2,
                parent_row: None,
                is_expansion_toggle: false,
                blanks_after_anchor: 0,
                sub_item_changes: vec![],
            }]
        );
        assert_consistent(&mut tree);
    }

    #[test]
    fn delete_frees_expanded_items() {
        let mut tree = Tree::new();
        let root = TestBranch::new(4);
        let child = TestBranch::new(3);
        root.add_expansion(2, 0, child.clone());
        tree.set_root(root.clone()).unwrap();
        tree.toggle_expansion(2, 0).unwrap();
        assert_eq!(tree.row_count(), 7);

        root.remove(1, 2);
        let handle: BranchRef = root;
        tree.delete_items(&handle, 1, 2).unwrap();
        assert_eq!(tree.row_count(), 2);
        let child: BranchRef = child;
        assert_eq!(tree.bound_nodes(&child).err(), Some(Error::UnknownBranch));
        assert_consistent(&mut tree);
    }

    #[test]
    fn nested_insert_reports_parent_row() {
        let mut tree = Tree::new();
        let root = TestBranch::new(2);
        let child = TestBranch::new(2);
        root.add_expansion(1, 0, child.clone());
        tree.set_root(root).unwrap();
        tree.toggle_expansion(1, 0).unwrap();
        tree.take_events();

        child.insert(2, 1);
        let handle: BranchRef = child;
        tree.insert_items(&handle, Some(1), 1).unwrap();
        assert_eq!(
            tree.take_events(),
            vec![TreeEvent::ItemCountChanged {
                anchor_row: Some(3),
                column: 0,
                delta: 1,
                parent_row: Some(1),
                is_expansion_toggle: false,
                blanks_after_anchor: 0,
                sub_item_changes: vec![],
            }]
        );
        assert_eq!(tree.row_count(), 5);
    }

    #[test]
    fn hidden_list_changes_are_silent() {
        let mut tree = Tree::new();
        let root = TestBranch::new(2);
        let child = TestBranch::new(2);
        root.add_expansion(0, 0, child.clone());
        tree.set_root(root).unwrap();
        tree.toggle_expansion(0, 0).unwrap();
        tree.toggle_expansion(0, 0).unwrap();
        tree.take_events();

        child.insert(0, 3);
        let handle: BranchRef = child;
        tree.insert_items(&handle, None, 3).unwrap();
        assert!(tree.take_events().is_empty());
        assert_eq!(tree.row_count(), 2);
        tree.toggle_expansion(0, 0).unwrap();
        assert_eq!(tree.row_count(), 7);
        assert_consistent(&mut tree);
    }

    #[test]
    fn inconsistent_counts_are_rejected() {
        let mut tree = Tree::new();
        let root = TestBranch::new(3);
        tree.set_root(root.clone()).unwrap();
        root.insert(0, 1);
        let handle: BranchRef = root;
        assert_eq!(
            tree.insert_items(&handle, None, 2),
            Err(Error::ProviderInconsistency {
                expected: 5,
                actual: 4,
            })
        );
        assert_eq!(tree.row_count(), 3);
        assert_eq!(
            tree.delete_items(&handle, 3, 1),
            Err(Error::IndexOutOfRange { index: 3, count: 3 })
        );
    }

    #[test]
    fn inconsistent_counts_can_realign() {
        let mut tree = Tree::with_options(TreeOptions::new().realign_on_inconsistency());
        let root = TestBranch::new(3);
        tree.set_root(root.clone()).unwrap();
        root.insert(0, 1);
        let handle: BranchRef = root;
        tree.insert_items(&handle, None, 2).unwrap();
        assert_eq!(tree.row_count(), 4);
    }

    #[test]
    fn move_carries_expansion() {
        let mut tree = Tree::new();
        let root = TestBranch::new(4);
        root.add_expansion(0, 0, TestBranch::new(2));
        tree.set_root(root.clone()).unwrap();
        tree.toggle_expansion(0, 0).unwrap();
        tree.take_events();

        root.move_item(0, 2);
        let handle: BranchRef = root;
        tree.move_item(&handle, 0, 2).unwrap();
        // 0 b, 1 c, 2 a, 3-4 a's children, 5 d
        assert!(tree.is_expanded(2, 0).unwrap());
        assert_eq!(
            tree.take_events(),
            vec![TreeEvent::ItemMoved {
                column: 0,
                from_row: 0,
                to_row: 2,
                item_count: 3,
            }]
        );
        assert_consistent(&mut tree);
    }

    #[test]
    fn move_index_shifts_range() {
        let moved: alloc::vec::Vec<_> = (0..5).map(|i| move_index(i, 1, 3)).collect();
        assert_eq!(moved, [0, 3, 1, 2, 4]);
        let moved: alloc::vec::Vec<_> = (0..5).map(|i| move_index(i, 3, 1)).collect();
        assert_eq!(moved, [0, 2, 3, 1, 4]);
    }

    #[test]
    fn realign_without_relocation_discards() {
        let mut tree = Tree::new();
        let root = TestBranch::new(3);
        root.add_expansion(0, 0, TestBranch::new(2));
        tree.set_root(root.clone()).unwrap();
        tree.toggle_expansion(0, 0).unwrap();
        tree.take_events();

        root.set_items(4);
        let handle: BranchRef = root;
        tree.realign(&handle).unwrap();
        assert_eq!(tree.row_count(), 4);
        assert!(!tree.is_expanded(0, 0).unwrap());
        assert_eq!(
            tree.take_events(),
            vec![
                TreeEvent::ItemCountChanged {
                    anchor_row: None,
                    column: 0,
                    delta: -5,
                    parent_row: None,
                    is_expansion_toggle: false,
                    blanks_after_anchor: 0,
                    sub_item_changes: vec![],
                },
                TreeEvent::ItemCountChanged {
                    anchor_row: None,
                    column: 0,
                    delta: 4,
                    parent_row: None,
                    is_expansion_toggle: false,
                    blanks_after_anchor: 0,
                    sub_item_changes: vec![],
                },
            ]
        );
    }

    #[test]
    fn realign_relocates_expansions() {
        let mut tree = Tree::new();
        let root = TestBranch::new(3);
        root.set_features(BranchFeatures::EXPANSIONS | BranchFeatures::RELOCATE_ON_REFRESH);
        let child = TestBranch::new(2);
        root.add_expansion(2, 0, child.clone());
        tree.set_root(root.clone()).unwrap();
        tree.toggle_expansion(2, 0).unwrap();

        // Two items land in front of the expanded one.
        root.insert(0, 2);
        let handle: BranchRef = root;
        tree.realign(&handle).unwrap();
        assert_eq!(tree.row_count(), 7);
        assert!(tree.is_expanded(4, 0).unwrap());
        let child: BranchRef = child;
        assert!(tree.bound_nodes(&child).is_ok());
        assert_consistent(&mut tree);
    }

    #[test]
    fn delayed_realign_waits_for_redraw() {
        let mut tree = Tree::new();
        let root = TestBranch::new(2);
        root.set_features(BranchFeatures::DELAYED_UPDATES);
        tree.set_root(root.clone()).unwrap();
        let handle: BranchRef = root.clone();
        tree.apply(&handle, BranchEvent::BeginRedraw).unwrap();
        root.set_items(5);
        tree.apply(&handle, BranchEvent::Realign).unwrap();
        tree.apply(&handle, BranchEvent::Realign).unwrap();
        assert_eq!(tree.row_count(), 2);
        tree.apply(&handle, BranchEvent::EndRedraw).unwrap();
        assert_eq!(tree.row_count(), 5);
    }

    #[test]
    fn remove_branch_collapses_item() {
        let mut tree = Tree::new();
        let root = TestBranch::new(2);
        let child = TestBranch::new(3);
        root.add_expansion(1, 0, child.clone());
        tree.set_root(root.clone()).unwrap();
        tree.toggle_expansion(1, 0).unwrap();
        let child: BranchRef = child;
        tree.remove_branch(&child).unwrap();
        assert_eq!(tree.row_count(), 2);
        assert!(!tree.is_expanded(1, 0).unwrap());
        assert_consistent(&mut tree);

        let root: BranchRef = root;
        tree.remove_branch(&root).unwrap();
        assert_eq!(tree.row_count(), 0);
        assert!(tree.root_branch().is_none());
    }

    #[test]
    fn remove_sub_item_branch_drops_padding() {
        let mut tree = Tree::new();
        let root = TestBranch::multi_column(2, 2);
        root.set_column_style(1, SubItemCellStyle::Complex);
        let cell = TestBranch::new(3);
        root.add_expansion(0, 1, cell.clone());
        tree.set_root(root).unwrap();
        assert_eq!(tree.row_count(), 5);
        let cell: BranchRef = cell;
        tree.remove_branch(&cell).unwrap();
        assert_eq!(tree.row_count(), 2);
        assert_consistent(&mut tree);
    }

    #[test]
    fn complex_cells_load_for_inserted_rows() {
        let mut tree = Tree::new();
        let root = TestBranch::multi_column(1, 2);
        root.set_column_style(1, SubItemCellStyle::Complex);
        tree.set_root(root.clone()).unwrap();
        assert_eq!(tree.row_count(), 1);
        root.insert(1, 1);
        root.add_expansion(1, 1, TestBranch::new(2));
        let handle: BranchRef = root;
        tree.insert_items(&handle, Some(0), 1).unwrap();
        assert_eq!(tree.row_count(), 4);
        assert_consistent(&mut tree);
    }

    #[test]
    fn shared_branch_updates_every_attachment() {
        let mut tree = Tree::new();
        let root = TestBranch::new(2);
        let shared = TestBranch::new(2);
        root.add_expansion(0, 0, shared.clone());
        root.add_expansion(1, 0, shared.clone());
        tree.set_root(root).unwrap();
        tree.toggle_expansion(0, 0).unwrap();
        tree.toggle_expansion(3, 0).unwrap();
        assert_eq!(tree.row_count(), 6);
        shared.insert(0, 1);
        let handle: BranchRef = shared;
        tree.insert_items(&handle, None, 1).unwrap();
        assert_eq!(tree.row_count(), 8);
        assert_consistent(&mut tree);
    }

    #[test]
    fn display_changes_cover_expanded_rows() {
        let mut tree = Tree::new();
        let root = TestBranch::new(3);
        root.add_expansion(0, 0, TestBranch::new(2));
        tree.set_root(root.clone()).unwrap();
        tree.toggle_expansion(0, 0).unwrap();
        tree.take_events();
        let handle: BranchRef = root;
        tree.display_data_changed(&handle, None, 0, 2, DisplayChanges::TEXT)
            .unwrap();
        assert_eq!(
            tree.take_events(),
            vec![TreeEvent::DisplayDataChanged {
                start_row: 0,
                column: None,
                count: 4,
                changes: DisplayChanges::TEXT,
            }]
        );
    }

    #[test]
    fn overflowing_ranges_are_rejected() {
        let mut tree = Tree::new();
        let root = TestBranch::new(2);
        tree.set_root(root.clone()).unwrap();
        let handle: BranchRef = root;
        assert_eq!(
            tree.insert_items(&handle, Some(usize::MAX), 1),
            Err(Error::IndexOutOfRange {
                index: usize::MAX,
                count: 2,
            })
        );
        assert_eq!(
            tree.delete_items(&handle, 1, usize::MAX),
            Err(Error::IndexOutOfRange {
                index: usize::MAX,
                count: 2,
            })
        );
        assert_eq!(
            tree.display_data_changed(&handle, None, 1, usize::MAX, DisplayChanges::TEXT),
            Err(Error::IndexOutOfRange {
                index: usize::MAX,
                count: 2,
            })
        );
        assert_eq!(tree.row_count(), 2);
    }

    #[test]
    fn inserts_and_deletes_need_the_feature() {
        let mut tree = Tree::new();
        let root = TestBranch::new(2);
        root.set_features(BranchFeatures::EXPANSIONS);
        tree.set_root(root.clone()).unwrap();
        root.insert(0, 1);
        let handle: BranchRef = root;
        let unsupported = Err(Error::InvalidOperation(
            "branch does not support inserts and deletes",
        ));
        assert_eq!(tree.insert_items(&handle, None, 1), unsupported);
        assert_eq!(tree.delete_items(&handle, 0, 1), unsupported);
        assert_eq!(tree.row_count(), 2);
        // A realign still picks the change up.
        tree.realign(&handle).unwrap();
        assert_eq!(tree.row_count(), 3);
    }

    #[test]
    fn move_reorders_only_the_shifted_range() {
        // 0 a, 1-2 a's children, 3 b, 4 c, 5 c's child, 6 d, 7 e, 8 e's child
        let mut tree = Tree::new();
        let root = TestBranch::new(5);
        root.add_expansion(0, 0, TestBranch::new(2));
        root.add_expansion(2, 0, TestBranch::new(1));
        root.add_expansion(4, 0, TestBranch::new(1));
        tree.set_root(root.clone()).unwrap();
        tree.toggle_expansion(0, 0).unwrap();
        tree.toggle_expansion(4, 0).unwrap();
        tree.toggle_expansion(7, 0).unwrap();
        assert_eq!(tree.row_count(), 9);

        root.move_item(3, 1);
        let handle: BranchRef = root.clone();
        tree.move_item(&handle, 3, 1).unwrap();
        // 0 a, 1-2, 3 d, 4 b, 5 c, 6 c's child, 7 e, 8 e's child
        assert!(tree.is_expanded(0, 0).unwrap());
        assert!(!tree.is_expanded(3, 0).unwrap());
        assert!(tree.is_expanded(5, 0).unwrap());
        assert!(tree.is_expanded(7, 0).unwrap());
        assert_consistent(&mut tree);

        root.move_item(0, 2);
        tree.move_item(&handle, 0, 2).unwrap();
        // 0 d, 1 b, 2 a, 3-4 a's children, 5 c, 6 c's child, 7 e, 8 e's child
        assert!(tree.is_expanded(2, 0).unwrap());
        assert!(tree.is_expanded(5, 0).unwrap());
        assert_consistent(&mut tree);

        root.move_item(4, 0);
        tree.move_item(&handle, 4, 0).unwrap();
        // 0 e, 1 e's child, 2 d, 3 b, 4 a, 5-6 a's children, 7 c, 8 c's child
        assert!(tree.is_expanded(0, 0).unwrap());
        assert!(tree.is_expanded(4, 0).unwrap());
        assert!(tree.is_expanded(7, 0).unwrap());
        assert_consistent(&mut tree);
    }

    #[test]
    fn realign_all_skips_static_branches() {
        let mut tree = Tree::new();
        let root = TestBranch::new(2);
        root.set_features(BranchFeatures::EXPANSIONS);
        let child = TestBranch::new(2);
        root.add_expansion(0, 0, child.clone());
        tree.set_root(root.clone()).unwrap();
        tree.toggle_expansion(0, 0).unwrap();
        assert_eq!(tree.row_count(), 4);

        root.insert(2, 1);
        child.insert(2, 3);
        tree.realign_all().unwrap();
        // The root keeps its count; the child below it realigns.
        assert_eq!(tree.row_count(), 7);
        assert!(tree.is_expanded(0, 0).unwrap());
        assert_consistent(&mut tree);
    }

    #[test]
    fn realign_inside_a_cell_reports_column_changes() {
        // 0 item, 1-3 complex cell in column 1, 4 item
        let mut tree = Tree::new();
        let root = TestBranch::multi_column(2, 3);
        root.set_column_style(1, SubItemCellStyle::Complex);
        root.set_column_style(2, SubItemCellStyle::Complex);
        let short = TestBranch::new(1);
        root.add_expansion(0, 1, TestBranch::new(3));
        root.add_expansion(0, 2, short.clone());
        tree.set_root(root).unwrap();
        assert_eq!(tree.row_count(), 5);
        tree.take_events();

        short.set_items(2);
        let handle: BranchRef = short;
        tree.realign(&handle).unwrap();
        assert_eq!(tree.row_count(), 5);
        assert_eq!(
            tree.take_events(),
            vec![TreeEvent::ItemCountChanged {
                anchor_row: Some(0),
                column: 2,
                delta: 0,
                parent_row: Some(0),
                is_expansion_toggle: false,
                blanks_after_anchor: 0,
                sub_item_changes: vec![SubItemChange {
                    column: 2,
                    delta: 1,
                }],
            }]
        );
        assert_consistent(&mut tree);
    }

    #[test]
    fn state_toggles_repaint_requested_rows() {
        // 0 a, 1 a0, 2 a1, 3 b
        let mut tree = Tree::new();
        let root = TestBranch::new(2);
        let child = TestBranch::new(2);
        child.set_features(BranchFeatures::STATE_CHANGES);
        child.set_state_refresh(StateRefreshChanges::CURRENT | StateRefreshChanges::PARENTS);
        root.add_expansion(0, 0, child.clone());
        tree.set_root(root).unwrap();
        tree.toggle_expansion(0, 0).unwrap();
        tree.take_events();

        let refresh = tree.toggle_state(2, 0).unwrap();
        assert_eq!(refresh, StateRefreshChanges::CURRENT | StateRefreshChanges::PARENTS);
        assert!(child.is_checked(1, 0));
        let state = |start_row, count, column| TreeEvent::DisplayDataChanged {
            start_row,
            column,
            count,
            changes: DisplayChanges::STATE,
        };
        assert_eq!(
            tree.take_events(),
            vec![
                TreeEvent::StateToggled {
                    row: 2,
                    column: 0,
                    refresh,
                },
                state(2, 1, Some(0)),
                state(0, 1, None),
            ]
        );

        child.set_state_refresh(StateRefreshChanges::ENTIRE);
        tree.toggle_state(2, 0).unwrap();
        assert!(!child.is_checked(1, 0));
        assert_eq!(tree.take_events()[1], state(0, 4, None));

        assert_eq!(
            tree.toggle_state(0, 0),
            Err(Error::InvalidOperation("branch does not support state changes"))
        );
    }
}
