// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Count propagation.
//!
//! Every node keeps two recursive totals: `full_count` (items of its list and of every
//! expanded descendant list) and `full_gain` (padding rows added by sub-item cells).
//! A change at one node walks up through expanded ancestors. At a sub-item root the
//! walk switches dimension: the anchor's padding is the tallest of its cells, so it is
//! recomputed from all sibling cells and continues upward as a gain-only change.

use crate::node::{shifted, signed};
use crate::tree::Tree;
use crate::types::NodeId;

/// Row-count change split by dimension.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RowDelta {
    pub(crate) items: isize,
    pub(crate) sub_items: isize,
}

impl RowDelta {
    pub(crate) const ZERO: Self = Self {
        items: 0,
        sub_items: 0,
    };

    pub(crate) fn new(items: isize, sub_items: isize) -> Self {
        Self { items, sub_items }
    }

    /// Total rows.
    pub(crate) fn rows(self) -> isize {
        self.items + self.sub_items
    }

    pub(crate) fn is_zero(self) -> bool {
        self.items == 0 && self.sub_items == 0
    }
}

impl core::ops::Add for RowDelta {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.items + rhs.items, self.sub_items + rhs.sub_items)
    }
}

enum Step {
    Up(NodeId, RowDelta),
    Root,
    Hidden,
    Stopped(RowDelta),
}

impl Tree {
    /// Apply a change to the list of `id` and propagate it upward.
    ///
    /// Returns the change visible where propagation stopped: at the root, at
    /// `ceiling`, or zero when a collapsed ancestor hides it.
    pub(crate) fn apply_delta(
        &mut self,
        id: NodeId,
        items: isize,
        sub_items: isize,
        ceiling: Option<NodeId>,
    ) -> RowDelta {
        self.propagate(id, RowDelta::new(items, sub_items), ceiling, true)
    }

    /// Propagate a change that has already been applied to `id` itself.
    pub(crate) fn resume_delta(&mut self, id: NodeId, delta: RowDelta) -> RowDelta {
        self.propagate(id, delta, None, false)
    }

    fn propagate(
        &mut self,
        mut id: NodeId,
        mut delta: RowDelta,
        ceiling: Option<NodeId>,
        mut apply: bool,
    ) -> RowDelta {
        loop {
            if delta.is_zero() {
                return delta;
            }
            if apply {
                let n = self.node_mut(id);
                n.full_count = shifted(n.full_count, delta.items);
                n.full_gain = shifted(n.full_gain, delta.sub_items);
                log::trace!(
                    "counts {id:?}: full_count {} full_gain {}",
                    n.full_count,
                    n.full_gain
                );
                if Some(id) == ceiling {
                    return delta;
                }
            }
            apply = true;
            match self.step_up(id, delta, ceiling) {
                Step::Up(next, d) => {
                    id = next;
                    delta = d;
                }
                Step::Root => return delta,
                Step::Hidden => return RowDelta::ZERO,
                Step::Stopped(d) => return d,
            }
        }
    }

    fn step_up(&mut self, id: NodeId, delta: RowDelta, ceiling: Option<NodeId>) -> Step {
        let (parent, sub_item_root, expanded) = {
            let n = self.node(id);
            (n.parent, n.is_sub_item_root(), n.is_expanded())
        };
        let Some(parent) = parent else {
            return Step::Root;
        };
        if sub_item_root {
            let d = self.refresh_anchor_gain(parent);
            if Some(parent) == ceiling {
                return Step::Stopped(RowDelta::new(0, d));
            }
            return match self.node(parent).parent {
                Some(owner) => Step::Up(owner, RowDelta::new(0, d)),
                None => Step::Hidden,
            };
        }
        if !expanded {
            return Step::Hidden;
        }
        Step::Up(parent, delta)
    }

    /// Recompute the padding of `anchor` from all of its sub-item cells.
    ///
    /// Returns the change in padding, already folded into the anchor's `full_gain`.
    pub(crate) fn refresh_anchor_gain(&mut self, anchor: NodeId) -> isize {
        let gain = {
            let n = self.node(anchor);
            n.sub_items.as_ref().map_or(0, |cells| {
                cells
                    .iter()
                    .map(|s| self.node(s.root).cell_gain())
                    .max()
                    .unwrap_or(0)
            })
        };
        let n = self.node_mut(anchor);
        let d = signed(gain) - signed(n.immediate_gain);
        n.immediate_gain = gain;
        n.full_gain = shifted(n.full_gain, d);
        d
    }

    /// Totals of `id` recomputed from its own counts and its children.
    pub(crate) fn counted(&self, id: NodeId) -> (usize, usize) {
        let n = self.node(id);
        let mut full_count = n.immediate_count;
        let mut full_gain = n.immediate_gain;
        for &c in &n.children {
            let c = self.node(c);
            if c.is_expanded() {
                full_count += c.full_count;
            }
            full_gain += c.gain_contribution();
        }
        (full_count, full_gain)
    }

    /// Recompute the totals of `id` from its children.
    pub(crate) fn recount_local(&mut self, id: NodeId) {
        let (full_count, full_gain) = self.counted(id);
        let n = self.node_mut(id);
        n.full_count = full_count;
        n.full_gain = full_gain;
    }

    /// Recompute every total below and including `id`, bottom-up.
    pub(crate) fn recount_subtree(&mut self, id: NodeId) {
        let (children, cells) = {
            let n = self.node(id);
            let cells: alloc::vec::Vec<NodeId> = n
                .sub_items
                .as_ref()
                .map(|c| c.iter().map(|s| s.root).collect())
                .unwrap_or_default();
            (n.children.clone(), cells)
        };
        for child in children {
            self.recount_subtree(child);
        }
        let has_cells = !cells.is_empty();
        for cell in cells {
            self.recount_subtree(cell);
        }
        if has_cells {
            self.refresh_anchor_gain(id);
        }
        self.recount_local(id);
    }
}
