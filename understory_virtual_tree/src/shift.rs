// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Level shifts: inserting or removing whole intermediate levels below a branch while
//! keeping the expansions beneath them.

use alloc::vec::Vec;
use core::any::Any;

use crate::branch::{BranchRef, ExpansionStyle, LocateAction, ObjectStyle, ShiftBranchLevels};
use crate::counts::RowDelta;
use crate::error::Result;
use crate::node::{NodeFlags, signed};
use crate::tree::Tree;
use crate::types::NodeId;

impl Tree {
    /// Restructure the levels below every attachment of `branch`.
    ///
    /// `shift.depth` levels of expanded nodes are descended first. At each node reached,
    /// `remove_levels` levels of child expansions are peeled off and the expansions found
    /// beneath them are reattached `insert_levels` levels down, at the items the level's
    /// branch reports for them. Intermediate items on the way are expanded. Expansions
    /// no branch claims are freed.
    pub fn shift_branch_levels(
        &mut self,
        branch: &BranchRef,
        shift: ShiftBranchLevels,
    ) -> Result<()> {
        let nodes = self.bound_nodes(branch)?;
        for id in nodes {
            if self.is_alive(id) {
                self.shift_node(id, &shift);
            }
        }
        Ok(())
    }

    fn shift_node(&mut self, id: NodeId, shift: &ShiftBranchLevels) {
        let anchor = self.list_anchor(id, 0);
        let cell = self.enclosing_cell(id);
        let (old_items, old_gain, old_rows) = {
            let n = self.node(id);
            (n.full_count, n.full_gain, n.list_rows())
        };
        if let Some(replacement) = &shift.replacement {
            let count = replacement.visible_item_count();
            self.bind(id, replacement.clone(), count);
        }
        let mut levels = alloc::vec![id];
        for _ in 0..shift.depth {
            levels = levels
                .into_iter()
                .flat_map(|l| self.node(l).children.clone())
                .filter(|c| {
                    let c = self.node(*c);
                    c.is_expanded() && c.branch.is_some()
                })
                .collect();
        }
        for level in levels {
            self.shift_level(level, shift);
        }
        self.recount_subtree(id);
        let (items, gain) = {
            let n = self.node(id);
            (n.full_count, n.full_gain)
        };
        let delta = self.resume_delta(
            id,
            RowDelta::new(
                signed(items) - signed(old_items),
                signed(gain) - signed(old_gain),
            ),
        );
        log::debug!("shifted levels below {id:?}: {old_items} -> {items} items");
        if let Some(anchor) = anchor {
            self.push_list_rebuilt(id, anchor, old_rows, delta, cell);
        }
    }

    fn shift_level(&mut self, level: NodeId, shift: &ShiftBranchLevels) {
        let Some(branch) = self.node(level).branch.clone() else {
            return;
        };
        let mut orphans = core::mem::take(&mut self.node_mut(level).children);
        for _ in 0..shift.remove_levels {
            let mut next = Vec::new();
            for node in orphans {
                next.extend(core::mem::take(&mut self.node_mut(node).children));
                self.free_subtree(node);
            }
            orphans = next;
        }
        let count = branch.visible_item_count();
        self.node_mut(level).immediate_count = count;
        self.track_realign(level, count);
        for orphan in orphans {
            match self.node(orphan).branch.clone() {
                Some(expansion) => {
                    self.reattach(level, orphan, &expansion, shift.insert_levels, shift);
                }
                None => self.free_subtree(orphan),
            }
        }
        let cells = self.load_complex_cells(level, 0..count);
        self.attach_cells(level, cells);
    }

    /// Place `orphan`, whose branch is `expansion`, below `level`.
    fn reattach(
        &mut self,
        level: NodeId,
        orphan: NodeId,
        expansion: &BranchRef,
        remaining: usize,
        shift: &ShiftBranchLevels,
    ) {
        let (branch, count) = {
            let n = self.node(level);
            match &n.branch {
                Some(b) => (b.clone(), n.immediate_count),
                None => {
                    self.free_subtree(orphan);
                    return;
                }
            }
        };
        let answer = match &shift.adjuster {
            Some(adjuster) => adjuster.locate(&branch, expansion, remaining),
            None => branch.locate_object(expansion as &dyn Any, ObjectStyle::ExpandedBranch),
        };
        let placed = matches!(answer.action, LocateAction::ThisLevel | LocateAction::NextLevel);
        if placed && answer.row >= count {
            log::warn!(
                "expansion located at item {} of {count}; discarding",
                answer.row
            );
            self.free_subtree(orphan);
            return;
        }
        match answer.action {
            LocateAction::ThisLevel => {
                if self.child_at(level, answer.row).is_some() {
                    log::warn!("item {} already expanded; discarding", answer.row);
                    self.free_subtree(orphan);
                    return;
                }
                let (column, inherited) = {
                    let n = self.node(level);
                    (n.column, n.flags & NodeFlags::IN_SUB_ITEM_COLUMN)
                };
                let n = self.node_mut(orphan);
                n.index = answer.row;
                n.column = column;
                n.flags = (n.flags - NodeFlags::IN_SUB_ITEM_COLUMN) | inherited;
                self.insert_child(level, orphan);
            }
            LocateAction::NextLevel if remaining > 0 => {
                match self.intermediate(level, answer.row) {
                    Some(next) => self.reattach(next, orphan, expansion, remaining - 1, shift),
                    None => self.free_subtree(orphan),
                }
            }
            _ => self.free_subtree(orphan),
        }
    }

    /// The expanded node for item `index` of `level`, expanding it if needed.
    ///
    /// Counts are left for the caller to recompute.
    fn intermediate(&mut self, level: NodeId, index: usize) -> Option<NodeId> {
        if let Some(existing) = self.child_at(level, index)
            && self.node(existing).branch.is_some()
        {
            self.node_mut(existing).flags.insert(NodeFlags::EXPANDED);
            return Some(existing);
        }
        let (branch, in_sub_item) = {
            let n = self.node(level);
            (
                n.branch.clone()?,
                n.flags.contains(NodeFlags::IN_SUB_ITEM_COLUMN),
            )
        };
        let fresh = match branch.expansion(index, 0, ExpansionStyle::Children) {
            Ok(Some(fresh)) => fresh,
            Ok(None) => return None,
            Err(err) => {
                log::warn!("intermediate level for item {index} failed: {err}");
                return None;
            }
        };
        let prepared = match self.prepare(fresh, in_sub_item) {
            Ok(prepared) => prepared,
            Err(err) => {
                log::warn!("intermediate level for item {index} failed: {err}");
                return None;
            }
        };
        let node = self.ensure_child(level, index);
        self.populate(node, prepared);
        self.node_mut(node).flags.insert(NodeFlags::EXPANDED);
        Some(node)
    }
}
