// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Test support: an in-memory branch and a full consistency check.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::any::Any;
use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::branch::{
    Branch, BranchFeatures, BranchRef, CollapseBehavior, Expansion, ExpansionOptions,
    ExpansionStyle, LocateAction, LocateResult, ObjectStyle, Relocation, StateRefreshChanges,
    SubItemCellStyle, branch_key,
};
use crate::error::ProviderError;
use crate::tree::Tree;
use crate::types::NodeId;

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

fn fresh_ids(n: usize) -> impl Iterator<Item = u32> {
    (0..n).map(|_| NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// A branch over a list of unique item ids.
///
/// Expansions are keyed by item id, so they follow their item through inserts, deletes
/// and moves.
pub(crate) struct TestBranch {
    features: Cell<BranchFeatures>,
    items: RefCell<Vec<u32>>,
    expansions: RefCell<Vec<(u32, usize, BranchRef)>>,
    trees: RefCell<Vec<(u32, usize, Rc<RefCell<Tree>>)>>,
    expansion_options: Cell<ExpansionOptions>,
    cell_styles: RefCell<Vec<(u32, usize, SubItemCellStyle)>>,
    checked: RefCell<Vec<(u32, usize)>>,
    refresh: Cell<StateRefreshChanges>,
    return_parent: Cell<bool>,
    columns: Cell<usize>,
    row_columns: RefCell<Vec<(u32, usize)>>,
    styles: RefCell<Vec<(usize, SubItemCellStyle)>>,
    collapse: Cell<CollapseBehavior>,
    fail: Cell<bool>,
    expansion_calls: Cell<usize>,
    next_level: Cell<Option<usize>>,
    search_expansions: Cell<bool>,
}

impl TestBranch {
    /// A single-column branch with `n` expandable-on-request items.
    pub(crate) fn new(n: usize) -> Rc<Self> {
        Rc::new(Self {
            features: Cell::new(
                BranchFeatures::EXPANSIONS
                    | BranchFeatures::INSERTS_AND_DELETES
                    | BranchFeatures::REALIGNS,
            ),
            items: RefCell::new(fresh_ids(n).collect()),
            expansions: RefCell::new(Vec::new()),
            trees: RefCell::new(Vec::new()),
            expansion_options: Cell::new(ExpansionOptions::empty()),
            cell_styles: RefCell::new(Vec::new()),
            checked: RefCell::new(Vec::new()),
            refresh: Cell::new(StateRefreshChanges::CURRENT),
            return_parent: Cell::new(false),
            columns: Cell::new(1),
            row_columns: RefCell::new(Vec::new()),
            styles: RefCell::new(Vec::new()),
            collapse: Cell::new(CollapseBehavior::KeepExpansion),
            fail: Cell::new(false),
            expansion_calls: Cell::new(0),
            next_level: Cell::new(None),
            search_expansions: Cell::new(false),
        })
    }

    /// A branch with `rows` items and `columns` columns that may carry complex cells.
    pub(crate) fn multi_column(rows: usize, columns: usize) -> Rc<Self> {
        let branch = Self::new(rows);
        branch.features.set(
            branch.features.get()
                | BranchFeatures::MULTI_COLUMN
                | BranchFeatures::COMPLEX_SUB_ITEMS,
        );
        branch.columns.set(columns);
        branch
    }

    pub(crate) fn set_features(&self, features: BranchFeatures) {
        self.features.set(features);
    }

    pub(crate) fn set_column_style(&self, column: usize, style: SubItemCellStyle) {
        let mut styles = self.styles.borrow_mut();
        styles.retain(|(c, _)| *c != column);
        styles.push((column, style));
    }

    /// Give the item at `row` its own column count.
    pub(crate) fn set_row_columns(&self, row: usize, columns: usize) {
        self.features
            .set(self.features.get() | BranchFeatures::JAGGED_COLUMNS);
        let id = self.id_at(row);
        self.row_columns.borrow_mut().push((id, columns));
    }

    pub(crate) fn add_expansion(&self, row: usize, column: usize, branch: BranchRef) {
        let id = self.id_at(row);
        self.expansions.borrow_mut().push((id, column, branch));
    }

    /// Hand out the contents of `tree` as the expansion of the cell at `row`/`column`.
    pub(crate) fn add_tree_expansion(&self, row: usize, column: usize, tree: Rc<RefCell<Tree>>) {
        let id = self.id_at(row);
        self.trees.borrow_mut().push((id, column, tree));
    }

    /// Options attached to every expansion this branch hands out.
    pub(crate) fn set_expansion_options(&self, options: ExpansionOptions) {
        self.expansion_options.set(options);
    }

    /// Per-row answer for a [`SubItemCellStyle::Mixed`] column.
    pub(crate) fn set_cell_style(&self, row: usize, column: usize, style: SubItemCellStyle) {
        let id = self.id_at(row);
        self.cell_styles.borrow_mut().push((id, column, style));
    }

    /// Repaint request returned by [`Branch::toggle_state`].
    pub(crate) fn set_state_refresh(&self, refresh: StateRefreshChanges) {
        self.refresh.set(refresh);
    }

    pub(crate) fn is_checked(&self, row: usize, column: usize) -> bool {
        let id = self.id_at(row);
        self.checked.borrow().contains(&(id, column))
    }

    /// Answer unknown tracking objects with "return the parent item".
    pub(crate) fn return_parent(&self) {
        self.return_parent.set(true);
    }

    pub(crate) fn set_collapse(&self, behavior: CollapseBehavior) {
        self.collapse.set(behavior);
    }

    pub(crate) fn fail_expansions(&self, fail: bool) {
        self.fail.set(fail);
    }

    pub(crate) fn expansion_calls(&self) -> usize {
        self.expansion_calls.get()
    }

    /// Answer unknown tracking objects with "look below item `row`".
    pub(crate) fn set_next_level(&self, row: usize) {
        self.next_level.set(Some(row));
    }

    /// Look for unknown expansions inside this branch's own expansions.
    pub(crate) fn search_expansions(&self, search: bool) {
        self.search_expansions.set(search);
    }

    pub(crate) fn id_at(&self, row: usize) -> u32 {
        self.items.borrow()[row]
    }

    pub(crate) fn insert(&self, at: usize, n: usize) {
        let mut items = self.items.borrow_mut();
        let tail = items.split_off(at);
        items.extend(fresh_ids(n));
        items.extend(tail);
    }

    pub(crate) fn remove(&self, at: usize, n: usize) {
        self.items.borrow_mut().drain(at..at + n);
    }

    pub(crate) fn move_item(&self, from: usize, to: usize) {
        let mut items = self.items.borrow_mut();
        let id = items.remove(from);
        items.insert(to, id);
    }

    /// Replace every item with `n` new ones.
    pub(crate) fn set_items(&self, n: usize) {
        *self.items.borrow_mut() = fresh_ids(n).collect();
    }

    pub(crate) fn reverse(&self) {
        self.items.borrow_mut().reverse();
    }

    fn row_of_id(&self, id: u32) -> Option<usize> {
        self.items.borrow().iter().position(|i| *i == id)
    }

    fn find_expansion(&self, row: usize, column: usize) -> Option<Expansion> {
        let id = *self.items.borrow().get(row)?;
        let found = self
            .expansions
            .borrow()
            .iter()
            .find(|(i, c, _)| *i == id && *c == column)
            .map(|(_, _, b)| Expansion::new(b.clone()));
        let found = found.or_else(|| {
            self.trees
                .borrow()
                .iter()
                .find(|(i, c, _)| *i == id && *c == column)
                .and_then(|(_, _, t)| Expansion::from_tree(t.clone()))
        })?;
        Some(found.with_options(self.expansion_options.get()))
    }

    fn row_of_expansion(&self, expansion: &BranchRef) -> Option<usize> {
        let key = branch_key(expansion);
        let id = self
            .expansions
            .borrow()
            .iter()
            .find(|(_, _, b)| branch_key(b) == key)
            .map(|(id, _, _)| *id)?;
        self.row_of_id(id)
    }
}

impl Branch for TestBranch {
    fn features(&self) -> BranchFeatures {
        self.features.get()
    }

    fn visible_item_count(&self) -> usize {
        self.items.borrow().len()
    }

    fn is_expandable(&self, row: usize, column: usize) -> bool {
        self.find_expansion(row, column).is_some()
    }

    fn expansion(
        &self,
        row: usize,
        column: usize,
        _style: ExpansionStyle,
    ) -> Result<Option<Expansion>, ProviderError> {
        self.expansion_calls.set(self.expansion_calls.get() + 1);
        if self.fail.get() {
            return Err(ProviderError::new("expansion failed"));
        }
        Ok(self.find_expansion(row, column))
    }

    fn on_collapse(&self, _row: usize, _column: usize) -> CollapseBehavior {
        self.collapse.get()
    }

    fn locate_object(&self, target: &dyn Any, style: ObjectStyle) -> LocateResult {
        match style {
            ObjectStyle::TrackingObject => {
                let id = target.downcast_ref::<u32>();
                if let Some(row) = id.and_then(|id| self.row_of_id(*id)) {
                    return LocateResult::this_level(row);
                }
                if self.return_parent.get() {
                    return LocateResult {
                        action: LocateAction::NotTrackedReturnParent,
                        ..LocateResult::NOT_TRACKED
                    };
                }
                self.next_level
                    .get()
                    .map_or(LocateResult::NOT_TRACKED, LocateResult::next_level)
            }
            ObjectStyle::ExpandedBranch => {
                let Some(expansion) = target.downcast_ref::<BranchRef>() else {
                    return LocateResult::NOT_TRACKED;
                };
                if let Some(row) = self.row_of_expansion(expansion) {
                    return LocateResult::this_level(row);
                }
                if !self.search_expansions.get() {
                    return LocateResult::NOT_TRACKED;
                }
                let own: Vec<(u32, BranchRef)> = self
                    .expansions
                    .borrow()
                    .iter()
                    .filter(|(_, c, _)| *c == 0)
                    .map(|(id, _, b)| (*id, b.clone()))
                    .collect();
                for (id, branch) in own {
                    let found = branch.locate_object(target, style);
                    if found.action == LocateAction::ThisLevel
                        && let Some(row) = self.row_of_id(id)
                    {
                        return LocateResult::next_level(row);
                    }
                }
                LocateResult::NOT_TRACKED
            }
        }
    }

    fn object(&self, row: usize, _column: usize, _style: ObjectStyle) -> Option<Rc<dyn Any>> {
        let id = *self.items.borrow().get(row)?;
        Some(Rc::new(id))
    }

    fn relocate(&self, old_row: usize, expansion: &BranchRef) -> Relocation {
        match self.row_of_expansion(expansion) {
            Some(row) if row == old_row => Relocation::Keep,
            Some(row) => Relocation::MoveTo(row),
            None => Relocation::Discard,
        }
    }

    fn column_count(&self) -> usize {
        self.columns.get()
    }

    fn column_count_of_row(&self, row: usize) -> usize {
        let Some(id) = self.items.borrow().get(row).copied() else {
            return self.columns.get();
        };
        self.row_columns
            .borrow()
            .iter()
            .rev()
            .find(|(i, _)| *i == id)
            .map_or(self.columns.get(), |(_, n)| *n)
    }

    fn column_style(&self, column: usize) -> SubItemCellStyle {
        self.styles
            .borrow()
            .iter()
            .find(|(c, _)| *c == column)
            .map_or(SubItemCellStyle::Simple, |(_, s)| *s)
    }

    fn cell_style(&self, row: usize, column: usize) -> SubItemCellStyle {
        let Some(id) = self.items.borrow().get(row).copied() else {
            return SubItemCellStyle::Simple;
        };
        self.cell_styles
            .borrow()
            .iter()
            .rev()
            .find(|(i, c, _)| *i == id && *c == column)
            .map_or(SubItemCellStyle::Simple, |(_, _, s)| *s)
    }

    fn toggle_state(&self, row: usize, column: usize) -> StateRefreshChanges {
        let id = self.id_at(row);
        let mut checked = self.checked.borrow_mut();
        match checked.iter().position(|c| *c == (id, column)) {
            Some(at) => {
                checked.remove(at);
            }
            None => checked.push((id, column)),
        }
        self.refresh.get()
    }
}

/// Check every count invariant and the resolve round trip for every cell.
pub(crate) fn assert_consistent(tree: &mut Tree) {
    let Some(root) = tree.root else {
        assert_eq!(tree.row_count(), 0);
        return;
    };
    let mut stack: Vec<NodeId> = alloc::vec![root];
    while let Some(id) = stack.pop() {
        assert!(tree.is_alive(id));
        let n = tree.node(id);
        let (full_count, full_gain) = tree.counted(id);
        assert_eq!(n.full_count, full_count, "full_count of {id:?}");
        assert_eq!(n.full_gain, full_gain, "full_gain of {id:?}");
        let indices: Vec<usize> = n.children.iter().map(|c| tree.node(*c).index).collect();
        assert!(indices.windows(2).all(|w| w[0] < w[1]), "children of {id:?}: {indices:?}");
        if n.branch.is_some() {
            assert!(
                indices.last().is_none_or(|i| *i < n.immediate_count),
                "child past the end of {id:?}"
            );
        }
        for &c in &n.children {
            assert_eq!(tree.node(c).parent, Some(id));
            stack.push(c);
        }
        let cells: Vec<NodeId> = n
            .sub_items
            .as_ref()
            .map(|cells| cells.iter().map(|s| s.root).collect())
            .unwrap_or_default();
        let tallest = cells
            .iter()
            .map(|c| tree.node(*c).cell_gain())
            .max()
            .unwrap_or(0);
        assert_eq!(n.immediate_gain, tallest, "padding of {id:?}");
        for c in cells {
            let cell = tree.node(c);
            assert_eq!(cell.parent, Some(id));
            assert!(cell.is_sub_item_root() && cell.is_expanded());
            stack.push(c);
        }
    }
    let rows = tree.row_count();
    for row in 0..rows {
        let columns = tree.column_count_of_row(row).unwrap();
        for column in 0..columns {
            let pos = tree
                .resolve(row, column)
                .unwrap_or_else(|e| panic!("resolve({row}, {column}): {e}"));
            assert_eq!(tree.row_of(&pos), Some(row), "round trip of ({row}, {column})");
        }
    }
    assert!(tree.resolve(rows, 0).is_err());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::ShiftBranchLevels;
    use crate::event::BranchEvent;
    use crate::types::CellPosition;

    /// xorshift32
    struct Rng(u32);

    impl Rng {
        fn below(&mut self, n: usize) -> usize {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 17;
            self.0 ^= self.0 << 5;
            self.0 as usize % n.max(1)
        }
    }

    /// A three-level tree with sub-item cells on the root rows.
    fn fixture() -> (Tree, Vec<Rc<TestBranch>>) {
        let root = TestBranch::multi_column(5, 3);
        root.set_column_style(1, SubItemCellStyle::Expandable);
        root.set_column_style(2, SubItemCellStyle::Complex);
        let mut branches = alloc::vec![root.clone()];
        for r in 0..5 {
            let level1 = TestBranch::new(3);
            level1.set_features(level1.features() | BranchFeatures::RECURSIVE_EXPANSION);
            if r % 2 == 0 {
                level1.set_collapse(CollapseBehavior::DiscardChildren);
            }
            for i in 0..3 {
                let level2 = TestBranch::new(2);
                level1.add_expansion(i, 0, level2.clone());
                branches.push(level2);
            }
            root.add_expansion(r, 0, level1.clone());
            branches.push(level1);
            let expandable = TestBranch::new(r % 3 + 1);
            root.add_expansion(r, 1, expandable.clone());
            branches.push(expandable);
            if r % 2 == 1 {
                let complex = TestBranch::new(r % 2 + 1);
                root.add_expansion(r, 2, complex.clone());
                branches.push(complex);
            }
        }
        let mut tree = Tree::new();
        tree.set_root(root).unwrap();
        (tree, branches)
    }

    /// Up to three cells of the current shape.
    fn random_cells(tree: &mut Tree, rng: &mut Rng) -> Vec<CellPosition> {
        let rows = tree.row_count();
        if rows == 0 {
            return Vec::new();
        }
        (0..3)
            .map(|_| {
                let row = rng.below(rows);
                let columns = tree.column_count_of_row(row).unwrap();
                CellPosition::new(row, rng.below(columns))
            })
            .collect()
    }

    fn accept(outcome: crate::Result<()>, what: &str) {
        match outcome {
            Ok(()) | Err(crate::Error::UnknownBranch) => {}
            Err(e) => panic!("{what}: {e}"),
        }
    }

    #[test]
    fn random_edits_keep_counts_consistent() {
        for seed in [0x9e37_79b9_u32, 0x1234_5678, 0xdead_beef, 0x0bad_f00d] {
            let (mut tree, branches) = fixture();
            let mut rng = Rng(seed);
            for _ in 0..300 {
                let pick = rng.below(branches.len());
                let branch = &branches[pick];
                let handle: BranchRef = branch.clone();
                let len = branch.visible_item_count();
                let shuffled = rng.below(3) == 0;
                let tracked = if shuffled {
                    let cells = random_cells(&mut tree, &mut rng);
                    tree.begin_tracking(&cells).unwrap();
                    cells
                } else {
                    Vec::new()
                };
                match rng.below(10) {
                    0 | 1 => {
                        let rows = tree.row_count();
                        let (row, column) = (rng.below(rows), rng.below(3));
                        // Non-expandable and blank cells are rejected; the tree is unchanged.
                        let _ = tree.toggle_expansion(row, column);
                    }
                    2 => {
                        let at = rng.below(len + 1);
                        let n = rng.below(3) + 1;
                        branch.insert(at, n);
                        let after = at.checked_sub(1);
                        let event = BranchEvent::InsertItems { after, count: n };
                        accept(tree.apply(&handle, event), "insert");
                    }
                    3 if len > 1 => {
                        let at = rng.below(len);
                        let n = (rng.below(len - at) + 1).min(2);
                        branch.remove(at, n);
                        let event = BranchEvent::DeleteItems { start: at, count: n };
                        accept(tree.apply(&handle, event), "delete");
                    }
                    4 if len > 1 => {
                        let (from, to) = (rng.below(len), rng.below(len));
                        branch.move_item(from, to);
                        accept(tree.apply(&handle, BranchEvent::MoveItem { from, to }), "move");
                    }
                    5 => {
                        if rng.below(2) == 0 {
                            branch.reverse();
                        } else {
                            branch.set_items(rng.below(4) + 1);
                        }
                        accept(tree.apply(&handle, BranchEvent::Realign), "realign");
                    }
                    6 => {
                        // Reattach every expansion where the branch still reports it.
                        let shift = ShiftBranchLevels::default();
                        accept(tree.apply(&handle, BranchEvent::ShiftLevels(shift)), "shift");
                    }
                    7 if pick > 0 => accept(tree.remove_branch(&handle), "remove"),
                    8 => {
                        let rows = tree.row_count();
                        if rows > 0 {
                            let _ = tree.expand_recursively(rng.below(rows), 0);
                        }
                    }
                    _ => {
                        let rows = tree.row_count();
                        if rows > 0 {
                            let _ = tree.collapse(rng.below(rows), 0);
                        }
                    }
                }
                if shuffled {
                    let settled = tree.end_shuffle().unwrap().unwrap();
                    assert_eq!(settled.len(), tracked.len());
                    for (result, original) in settled.iter().zip(&tracked) {
                        assert_eq!(result.original, *original);
                        if let Some(cell) = result.current {
                            assert!(cell.row < tree.row_count(), "{result:?}");
                            assert!(tree.resolve(cell.row, cell.column).is_ok(), "{result:?}");
                        }
                    }
                }
                assert_consistent(&mut tree);
            }
        }
    }

    #[test]
    fn test_branch_moves_expansions_with_items() {
        let branch = TestBranch::new(3);
        let child: BranchRef = TestBranch::new(1);
        branch.add_expansion(2, 0, child.clone());
        branch.insert(0, 1);
        assert!(branch.is_expandable(3, 0));
        assert_eq!(branch.relocate(2, &child), Relocation::MoveTo(3));
        branch.remove(3, 1);
        assert_eq!(branch.relocate(3, &child), Relocation::Discard);
    }
}
