// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core tree: node arena, branch index, root management and batching counters.

use alloc::boxed::Box;
use alloc::vec::Vec;
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::branch::{BranchFeatures, BranchRef, branch_key};
use crate::error::{Error, Result};
use crate::event::{BranchEvent, TreeEvent};
use crate::node::{Node, NodeFlags, SubItem, signed};
use crate::options::TreeOptions;
use crate::resolve::WalkCache;
use crate::tracker::TrackingState;
use crate::types::NodeId;

/// Attachment points of one branch.
pub(crate) type Bindings = SmallVec<[NodeId; 2]>;

/// Virtualized hierarchical row index.
///
/// A tree maps absolute rows (and columns) onto items supplied by [`Branch`](crate::Branch)
/// providers. Only the parts of the hierarchy that have been expanded are materialized:
/// each expanded item owns a node holding its branch and the counts needed to translate
/// rows without visiting unexpanded items.
///
/// Structural changes arrive through [`Tree::apply`] (or the dedicated methods it
/// dispatches to). Row-level consequences are queued as [`TreeEvent`]s and drained with
/// [`Tree::take_events`].
///
/// Methods that resolve rows take `&mut self` so the tree can keep a cache of the last
/// walk; sequential resolves then cost amortized O(1) per row.
pub struct Tree {
    /// slots
    pub(crate) nodes: Vec<Option<Node>>,
    /// last generation per slot (persists across frees)
    generations: Vec<u32>,
    free_list: Vec<usize>,
    pub(crate) root: Option<NodeId>,
    /// branch identity -> attachment points
    bindings: HashMap<usize, Bindings>,
    /// columns of the root branch
    pub(crate) columns: usize,
    pub(crate) options: TreeOptions,
    pub(crate) events: Vec<TreeEvent>,
    redraw_depth: u32,
    /// open `begin_delay_redraw` calls
    redraw_delay: u32,
    /// last value reported through `RedrawSuspendedChanged`
    redraw_suspended: bool,
    /// branches whose realign waits for redraw to resume
    pending_realign: Vec<BranchRef>,
    pub(crate) tracking: TrackingState,
    pub(crate) cache: WalkCache,
}

impl core::fmt::Debug for Tree {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let total = self.nodes.len();
        let alive = self.nodes.iter().filter(|n| n.is_some()).count();
        f.debug_struct("Tree")
            .field("nodes_total", &total)
            .field("nodes_alive", &alive)
            .field("free_list", &self.free_list.len())
            .field("root", &self.root)
            .field("branches", &self.bindings.len())
            .field("columns", &self.columns)
            .field("options", &self.options)
            .field("pending_events", &self.events.len())
            .field("redraw_depth", &self.redraw_depth)
            .field("redraw_delay", &self.redraw_delay)
            .field("redraw_suspended", &self.redraw_suspended)
            .field("pending_realign", &self.pending_realign.len())
            .field("tracking", &self.tracking)
            .finish_non_exhaustive()
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Create an empty tree with default options.
    pub fn new() -> Self {
        Self::with_options(TreeOptions::default())
    }

    /// Create an empty tree.
    pub fn with_options(options: TreeOptions) -> Self {
        Self {
            nodes: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            root: None,
            bindings: HashMap::new(),
            columns: 1,
            options,
            events: Vec::new(),
            redraw_depth: 0,
            redraw_delay: 0,
            redraw_suspended: false,
            pending_realign: Vec::new(),
            tracking: TrackingState::default(),
            cache: WalkCache::default(),
        }
    }

    /// Options the tree was created with.
    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    /// Attach `branch` as the root list, replacing any previous root.
    ///
    /// Complex sub-item cells of the root rows are loaded immediately. If loading them
    /// fails the previous root stays in place.
    pub fn set_root(&mut self, branch: BranchRef) -> Result<()> {
        let prepared = self.prepare_root(branch)?;
        let removed = self.detach_root();
        let root = self.alloc(None, 0, 0);
        self.root = Some(root);
        self.columns = if prepared.branch.features().contains(BranchFeatures::MULTI_COLUMN) {
            prepared.branch.column_count().max(1)
        } else {
            1
        };
        self.populate(root, prepared);
        self.node_mut(root).flags.insert(NodeFlags::EXPANDED);
        let columns = self.columns;
        let rows = self.node(root).list_rows();
        log::debug!("root attached: {rows} rows, {columns} columns");
        if removed > 0 {
            self.push_count_changed(None, 0, -signed(removed), None);
        }
        if rows > 0 {
            self.push_count_changed(None, 0, signed(rows), None);
        }
        Ok(())
    }

    /// Detach the root list and free every node.
    pub fn clear_root(&mut self) {
        let removed = self.detach_root();
        self.columns = 1;
        if removed > 0 {
            self.push_count_changed(None, 0, -signed(removed), None);
        }
    }

    /// The branch attached as the root list.
    pub fn root_branch(&self) -> Option<BranchRef> {
        self.root.and_then(|r| self.node(r).branch.clone())
    }

    /// Number of columns of the tree, as declared by the root branch.
    pub fn column_count(&self) -> usize {
        self.columns
    }

    /// Number of visible rows.
    pub fn row_count(&self) -> usize {
        self.root.map_or(0, |r| self.node(r).list_rows())
    }

    /// Drain the queued change notifications.
    pub fn take_events(&mut self) -> Vec<TreeEvent> {
        core::mem::take(&mut self.events)
    }

    /// Apply a change reported by `branch`.
    ///
    /// Structural events fan out to every node the branch is bound to. Batch events
    /// (`BeginRedraw`, `BeginShuffle`, their delayed forms and their ends) do not depend
    /// on the branch.
    pub fn apply(&mut self, branch: &BranchRef, event: BranchEvent) -> Result<()> {
        match event {
            BranchEvent::Realign => self.realign(branch),
            BranchEvent::InsertItems { after, count } => self.insert_items(branch, after, count),
            BranchEvent::DeleteItems { start, count } => self.delete_items(branch, start, count),
            BranchEvent::MoveItem { from, to } => self.move_item(branch, from, to),
            BranchEvent::DisplayDataChanged {
                column,
                start,
                count,
                changes,
            } => self.display_data_changed(branch, column, start, count, changes),
            BranchEvent::RemoveBranch => self.remove_branch(branch),
            BranchEvent::BeginRedraw => {
                self.begin_redraw();
                Ok(())
            }
            BranchEvent::EndRedraw => self.end_redraw(),
            BranchEvent::BeginShuffle => {
                self.begin_shuffle();
                Ok(())
            }
            BranchEvent::EndShuffle => self.end_shuffle().map(|_| ()),
            BranchEvent::BeginDelayRedraw => {
                self.begin_delay_redraw();
                Ok(())
            }
            BranchEvent::EndDelayRedraw => self.end_delay_redraw(),
            BranchEvent::BeginDelayShuffle => {
                self.begin_delay_shuffle();
                Ok(())
            }
            BranchEvent::EndDelayShuffle => self.end_delay_shuffle().map(|_| ()),
            BranchEvent::ShiftLevels(shift) => self.shift_branch_levels(branch, shift),
            BranchEvent::UpdateCellStyle {
                row,
                column,
                make_complex,
            } => self.update_cell_style(branch, row, column, make_complex),
        }
    }

    /// Suspend repainting. Calls nest.
    pub fn begin_redraw(&mut self) {
        self.redraw_depth += 1;
        if !self.redraw_suspended {
            self.redraw_suspended = true;
            self.events.push(TreeEvent::RedrawSuspendedChanged(true));
        }
    }

    /// Resume repainting once every [`Tree::begin_redraw`] has been balanced and no
    /// delay is open.
    ///
    /// Realigns deferred by branches with delayed updates run at that point.
    pub fn end_redraw(&mut self) -> Result<()> {
        if self.redraw_depth == 0 {
            return Err(Error::InvalidOperation("end_redraw without begin_redraw"));
        }
        self.redraw_depth -= 1;
        self.settle_redraw()
    }

    /// Hold any redraw suspension that starts from now on until the matching
    /// [`Tree::end_delay_redraw`]. Calls nest.
    ///
    /// Suspensions inside the delay merge into one, and nothing is reported at all when
    /// no suspension happens.
    pub fn begin_delay_redraw(&mut self) {
        self.redraw_delay += 1;
    }

    /// Close a delay opened with [`Tree::begin_delay_redraw`].
    pub fn end_delay_redraw(&mut self) -> Result<()> {
        if self.redraw_delay == 0 {
            return Err(Error::InvalidOperation(
                "end_delay_redraw without begin_delay_redraw",
            ));
        }
        self.redraw_delay -= 1;
        self.settle_redraw()
    }

    fn settle_redraw(&mut self) -> Result<()> {
        if self.redraw_depth > 0 || self.redraw_delay > 0 || !self.redraw_suspended {
            return Ok(());
        }
        self.redraw_suspended = false;
        self.events.push(TreeEvent::RedrawSuspendedChanged(false));
        let pending = core::mem::take(&mut self.pending_realign);
        for branch in pending {
            if self.bindings.contains_key(&branch_key(&branch)) {
                self.realign(&branch)?;
            }
        }
        Ok(())
    }

    /// Whether repainting is suspended.
    pub fn is_redraw_suspended(&self) -> bool {
        self.redraw_suspended
    }

    /// Queue a realign of `branch` for when redraw resumes. Returns `false` when
    /// redraw is not suspended.
    pub(crate) fn defer_realign(&mut self, branch: &BranchRef) -> bool {
        if !self.redraw_suspended {
            return false;
        }
        let key = branch_key(branch);
        if !self.pending_realign.iter().any(|b| branch_key(b) == key) {
            log::debug!("realign deferred until redraw resumes");
            self.pending_realign.push(branch.clone());
        }
        true
    }

    // --- internals ---

    /// Returns true if `id` refers to a live node.
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.idx())
            .and_then(|n| n.as_ref())
            .is_some_and(|n| n.generation == id.1)
    }

    /// Access a node; panics if `id` is stale.
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.idx()].as_ref().expect("dangling NodeId")
    }

    /// Access a node mutably; panics if `id` is stale.
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.cache.invalidate();
        self.nodes[id.idx()].as_mut().expect("dangling NodeId")
    }

    pub(crate) fn alloc(&mut self, parent: Option<NodeId>, index: usize, column: usize) -> NodeId {
        self.cache.invalidate();
        let (idx, generation) = if let Some((idx, generation)) = self.reusable_slot() {
            self.generations[idx] = generation;
            self.nodes[idx] = Some(Node::new(generation, parent, index, column));
            #[allow(
                clippy::cast_possible_truncation,
                reason = "NodeId uses 32-bit indices by design."
            )]
            (idx as u32, generation)
        } else {
            let generation = 1_u32;
            self.nodes
                .push(Some(Node::new(generation, parent, index, column)));
            self.generations.push(generation);
            #[allow(
                clippy::cast_possible_truncation,
                reason = "NodeId uses 32-bit indices by design."
            )]
            ((self.nodes.len() - 1) as u32, generation)
        };
        NodeId::new(idx, generation)
    }

    /// A free slot and its next generation. Slots whose generation would wrap are
    /// retired so a stale id can never match again.
    fn reusable_slot(&mut self) -> Option<(usize, u32)> {
        while let Some(idx) = self.free_list.pop() {
            let generation = self.generations[idx].wrapping_add(1);
            if generation != 0 {
                return Some((idx, generation));
            }
            log::trace!("slot {idx} retired");
        }
        None
    }

    /// Bind `id` to `branch`, refreshing capability flags and the immediate count.
    pub(crate) fn bind(&mut self, id: NodeId, branch: BranchRef, count: usize) {
        let same = self
            .node(id)
            .branch
            .as_ref()
            .is_some_and(|b| branch_key(b) == branch_key(&branch));
        if !same {
            self.unbind(id);
            self.bindings
                .entry(branch_key(&branch))
                .or_default()
                .push(id);
        }
        let features = branch.features();
        let n = self.node_mut(id);
        let in_sub_item = n.flags.contains(NodeFlags::IN_SUB_ITEM_COLUMN);
        n.flags =
            (n.flags - NodeFlags::BRANCH_MASK) | NodeFlags::from_features(features, in_sub_item);
        n.immediate_count = count;
        n.branch = Some(branch);
    }

    /// Drop the branch of `id`, keeping the node.
    pub(crate) fn unbind(&mut self, id: NodeId) {
        let Some(branch) = self.node_mut(id).branch.take() else {
            return;
        };
        let key = branch_key(&branch);
        if let Some(list) = self.bindings.get_mut(&key) {
            list.retain(|n| *n != id);
            if list.is_empty() {
                self.bindings.remove(&key);
            }
        }
        self.node_mut(id).flags.remove(NodeFlags::BRANCH_MASK);
    }

    /// Live nodes bound to `branch`.
    pub(crate) fn bound_nodes(&self, branch: &BranchRef) -> Result<Bindings> {
        self.bindings
            .get(&branch_key(branch))
            .cloned()
            .ok_or(Error::UnknownBranch)
    }

    /// Free `id` with all of its children and sub-item cells.
    ///
    /// The caller unlinks `id` from its parent first.
    pub(crate) fn free_subtree(&mut self, id: NodeId) {
        if !self.is_alive(id) {
            return;
        }
        self.cache.invalidate();
        let mut stack = alloc::vec![id];
        while let Some(id) = stack.pop() {
            self.unbind(id);
            let Some(node) = self.nodes[id.idx()].take() else {
                continue;
            };
            stack.extend(node.children);
            if let Some(cells) = node.sub_items {
                stack.extend(cells.iter().map(|s| s.root));
            }
            self.free_list.push(id.idx());
        }
    }

    /// Free every child of `id`.
    pub(crate) fn free_children(&mut self, id: NodeId) {
        let children = core::mem::take(&mut self.node_mut(id).children);
        for child in children {
            self.free_subtree(child);
        }
    }

    /// Remove `id` from its parent's child list or sub-item list.
    pub(crate) fn detach(&mut self, id: NodeId) {
        let (parent, sub_item_root) = {
            let n = self.node(id);
            (n.parent, n.is_sub_item_root())
        };
        let Some(parent) = parent else {
            return;
        };
        let p = self.node_mut(parent);
        if sub_item_root {
            if let Some(cells) = p.sub_items.as_mut() {
                cells.retain(|s| s.root != id);
                if cells.is_empty() {
                    p.sub_items = None;
                }
            }
        } else {
            p.children.retain(|c| *c != id);
        }
    }

    /// The child node standing for item `index` of `owner`.
    pub(crate) fn child_at(&self, owner: NodeId, index: usize) -> Option<NodeId> {
        let children = &self.node(owner).children;
        children
            .binary_search_by_key(&index, |c| self.node(*c).index)
            .ok()
            .map(|slot| children[slot])
    }

    /// Link `child` into `owner`'s ordered child list.
    pub(crate) fn insert_child(&mut self, owner: NodeId, child: NodeId) {
        let index = self.node(child).index;
        let slot = {
            let children = &self.node(owner).children;
            match children.binary_search_by_key(&index, |c| self.node(*c).index) {
                Ok(slot) | Err(slot) => slot,
            }
        };
        debug_assert!(
            self.child_at(owner, index).is_none(),
            "duplicate child index {index}"
        );
        self.node_mut(child).parent = Some(owner);
        self.node_mut(owner).children.insert(slot, child);
    }

    /// Get or create the node for item `index` of `owner`.
    pub(crate) fn ensure_child(&mut self, owner: NodeId, index: usize) -> NodeId {
        if let Some(child) = self.child_at(owner, index) {
            return child;
        }
        let (column, inherited) = {
            let n = self.node(owner);
            (n.column, n.flags & NodeFlags::IN_SUB_ITEM_COLUMN)
        };
        let child = self.alloc(Some(owner), index, column);
        self.node_mut(child).flags.insert(inherited);
        self.insert_child(owner, child);
        child
    }

    /// Attach a sub-item cell list under item `row` of `owner`.
    pub(crate) fn attach_cell(
        &mut self,
        owner: NodeId,
        row: usize,
        column: usize,
        branch: BranchRef,
        count: usize,
        complex: bool,
    ) -> NodeId {
        let anchor = self.ensure_child(owner, row);
        let absolute = self.node(owner).column + column;
        let root = self.alloc(Some(anchor), column, absolute);
        {
            let flags = &mut self.node_mut(root).flags;
            flags.insert(
                NodeFlags::SUB_ITEM_ROOT | NodeFlags::EXPANDED | NodeFlags::IN_SUB_ITEM_COLUMN,
            );
            flags.set(NodeFlags::COMPLEX_SUB_ITEM, complex);
        }
        self.bind(root, branch, count);
        self.node_mut(root).full_count = count;
        let cells = self
            .node_mut(anchor)
            .sub_items
            .get_or_insert_with(Box::default);
        let slot = cells.partition_point(|s| s.column < column);
        cells.insert(slot, SubItem { column, root });
        root
    }

    /// Free the root and everything below it, returning the rows it showed.
    fn detach_root(&mut self) -> usize {
        let Some(root) = self.root.take() else {
            return 0;
        };
        let rows = self.node(root).list_rows();
        self.free_subtree(root);
        debug_assert!(self.bindings.is_empty(), "bindings outlived their nodes");
        rows
    }

    /// Whether two branch handles are the same branch.
    pub(crate) fn same_branch(a: &BranchRef, b: &BranchRef) -> bool {
        branch_key(a) == branch_key(b)
    }
}
