// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Position tracking across shuffles.
//!
//! A shuffle is a batch of structural edits bracketed by [`Tree::begin_shuffle`] and
//! [`Tree::end_shuffle`]. Positions recorded during the shuffle hold a generational
//! handle to the node owning the item plus the item index. Edits to that node's list
//! adjust the index in place; a freed node makes the handle stale, which reads as lost.
//! Branches with [`BranchFeatures::POSITION_TRACKING`](crate::BranchFeatures::POSITION_TRACKING)
//! re-find their items by object identity instead. A realign keeps plain index positions
//! only for branches with
//! [`BranchFeatures::DEFAULT_POSITION_TRACKING`](crate::BranchFeatures::DEFAULT_POSITION_TRACKING).

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::any::Any;

use crate::branch::{LocateAction, ObjectStyle};
use crate::edit::move_index;
use crate::error::{Error, Result};
use crate::event::TreeEvent;
use crate::node::NodeFlags;
use crate::tree::Tree;
use crate::types::{CellPosition, NodeId, TrackedPosition};

/// Where a tracked position lives.
struct Anchor {
    node: NodeId,
    index: usize,
    /// Branch-relative column.
    column: usize,
    blank: Option<usize>,
    object: Option<Rc<dyn Any>>,
}

struct Tracker {
    original: CellPosition,
    /// `None` once the position is lost.
    anchor: Option<Anchor>,
}

/// Shuffle nesting and the positions recorded by the outermost shuffle.
#[derive(Default)]
pub(crate) struct TrackingState {
    depth: u32,
    /// open `begin_delay_shuffle` calls
    delay: u32,
    /// a shuffle was announced and has not ended yet
    active: bool,
    trackers: Vec<Tracker>,
}

impl core::fmt::Debug for TrackingState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrackingState")
            .field("depth", &self.depth)
            .field("delay", &self.delay)
            .field("active", &self.active)
            .field("trackers", &self.trackers.len())
            .finish()
    }
}

impl Tree {
    /// Start a shuffle. Calls nest; the outermost call queues
    /// [`TreeEvent::ShuffleBeginning`] so views can record positions.
    pub fn begin_shuffle(&mut self) {
        self.tracking.depth += 1;
        if !self.tracking.active {
            self.tracking.active = true;
            self.tracking.trackers.clear();
            self.events.push(TreeEvent::ShuffleBeginning);
        }
    }

    /// Hold any shuffle that starts from now on open until the matching
    /// [`Tree::end_delay_shuffle`]. Calls nest.
    ///
    /// Shuffles inside the delay merge into one; nothing is reported when none starts.
    pub fn begin_delay_shuffle(&mut self) {
        self.tracking.delay += 1;
    }

    /// Close a delay opened with [`Tree::begin_delay_shuffle`].
    ///
    /// Returns the tracked positions when this ends a held shuffle, as
    /// [`Tree::end_shuffle`] does.
    pub fn end_delay_shuffle(&mut self) -> Result<Option<Vec<TrackedPosition>>> {
        if self.tracking.delay == 0 {
            return Err(Error::InvalidOperation(
                "end_delay_shuffle without begin_delay_shuffle",
            ));
        }
        self.tracking.delay -= 1;
        Ok(self.settle_shuffle())
    }

    /// Record positions to follow through the current shuffle.
    pub fn track_positions(&mut self, positions: &[CellPosition]) -> Result<()> {
        if !self.tracking.active {
            return Err(Error::InvalidOperation("no shuffle in progress"));
        }
        for &original in positions {
            let anchor = self.anchor_for(original);
            if anchor.is_none() {
                log::debug!("position {original:?} cannot be tracked");
            }
            self.tracking.trackers.push(Tracker { original, anchor });
        }
        Ok(())
    }

    /// Start a shuffle and record `positions` in it.
    pub fn begin_tracking(&mut self, positions: &[CellPosition]) -> Result<()> {
        self.begin_shuffle();
        self.track_positions(positions)
    }

    /// End a shuffle.
    ///
    /// Nested calls, and calls inside a delay, return `Ok(None)`. The outermost call
    /// resolves every recorded position against the current shape, queues
    /// [`TreeEvent::ShuffleEnding`] and returns the results in recording order.
    pub fn end_shuffle(&mut self) -> Result<Option<Vec<TrackedPosition>>> {
        if self.tracking.depth == 0 {
            return Err(Error::InvalidOperation("end_shuffle without begin_shuffle"));
        }
        self.tracking.depth -= 1;
        Ok(self.settle_shuffle())
    }

    fn settle_shuffle(&mut self) -> Option<Vec<TrackedPosition>> {
        if self.tracking.depth > 0 || self.tracking.delay > 0 || !self.tracking.active {
            return None;
        }
        self.tracking.active = false;
        let trackers = core::mem::take(&mut self.tracking.trackers);
        let settled: Vec<TrackedPosition> = trackers
            .into_iter()
            .map(|t| TrackedPosition {
                original: t.original,
                current: t.anchor.and_then(|a| self.settle(a)),
            })
            .collect();
        self.events.push(TreeEvent::ShuffleEnding(settled.clone()));
        Some(settled)
    }

    /// End a shuffle started with [`Tree::begin_tracking`].
    pub fn end_tracking(&mut self) -> Result<Option<Vec<TrackedPosition>>> {
        self.end_shuffle()
    }

    /// Whether a shuffle is in progress.
    pub fn is_shuffling(&self) -> bool {
        self.tracking.active
    }

    fn anchor_for(&mut self, cell: CellPosition) -> Option<Anchor> {
        let pos = self.resolve(cell.row, cell.column).ok()?;
        let n = self.node(pos.node);
        if n.flags.contains(NodeFlags::NO_TRACKING) {
            return None;
        }
        let column = pos.column - n.column;
        let object = if n.flags.contains(NodeFlags::DYNAMIC_TRACKING) {
            n.branch
                .as_ref()
                .and_then(|b| b.object(pos.index, column, ObjectStyle::TrackingObject))
        } else {
            None
        };
        Some(Anchor {
            node: pos.node,
            index: pos.index,
            column,
            blank: pos.blank,
            object,
        })
    }

    /// Current cell of a tracked position.
    fn settle(&self, anchor: Anchor) -> Option<CellPosition> {
        if !self.is_alive(anchor.node) {
            return None;
        }
        let n = self.node(anchor.node);
        let index = match &anchor.object {
            Some(object) => {
                let found = n
                    .branch
                    .as_ref()?
                    .locate_object(&**object, ObjectStyle::TrackingObject);
                match found.action {
                    LocateAction::ThisLevel => found.row,
                    _ => return None,
                }
            }
            None => anchor.index,
        };
        if index >= n.immediate_count {
            return None;
        }
        let Some(row) = self.row_of_item(anchor.node, index) else {
            return self.visible_ancestor(anchor.node);
        };
        let padding = self
            .child_at(anchor.node, index)
            .map_or(0, |c| self.node(c).immediate_gain);
        let cells = self.item_columns(anchor.node, index);
        Some(CellPosition::new(
            row + anchor.blank.map_or(0, |b| b.min(padding)),
            n.column + anchor.column.min(cells - 1),
        ))
    }

    /// The nearest shown item above the hidden list of `id`.
    fn visible_ancestor(&self, mut id: NodeId) -> Option<CellPosition> {
        loop {
            let n = self.node(id);
            let parent = n.parent?;
            let (owner, index) = if n.is_sub_item_root() {
                let anchor = self.node(parent);
                (anchor.parent?, anchor.index)
            } else {
                (parent, n.index)
            };
            if let Some(row) = self.row_of_item(owner, index) {
                return Some(CellPosition::new(row, self.node(owner).column));
            }
            id = owner;
        }
    }

    fn trackers_of(&mut self, id: NodeId) -> impl Iterator<Item = &mut Tracker> {
        self.tracking
            .trackers
            .iter_mut()
            .filter(move |t| t.anchor.as_ref().is_some_and(|a| a.node == id))
    }

    pub(crate) fn track_insert(&mut self, id: NodeId, pos: usize, count: usize) {
        for t in self.trackers_of(id) {
            if let Some(a) = t.anchor.as_mut()
                && a.index >= pos
            {
                a.index += count;
            }
        }
    }

    pub(crate) fn track_delete(&mut self, id: NodeId, start: usize, count: usize) {
        for t in self.trackers_of(id) {
            let Some(a) = t.anchor.as_mut() else {
                continue;
            };
            if a.object.is_some() || a.index < start {
                continue;
            }
            if a.index < start + count {
                t.anchor = None;
            } else {
                a.index -= count;
            }
        }
    }

    pub(crate) fn track_move(&mut self, id: NodeId, from: usize, to: usize) {
        for t in self.trackers_of(id) {
            if let Some(a) = t.anchor.as_mut() {
                a.index = move_index(a.index, from, to);
            }
        }
    }

    /// Settle positions in a list whose items were replaced wholesale.
    ///
    /// Object positions are re-found later. Index positions survive only in branches
    /// with stable indices, and only while the index is still in range.
    pub(crate) fn track_realign(&mut self, id: NodeId, count: usize) {
        let stable = self.node(id).flags.contains(NodeFlags::STABLE_INDICES);
        for t in self.trackers_of(id) {
            if t
                .anchor
                .as_ref()
                .is_some_and(|a| a.object.is_none() && (!stable || a.index >= count))
            {
                t.anchor = None;
            }
        }
    }
}
