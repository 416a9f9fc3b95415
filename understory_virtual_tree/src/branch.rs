// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The provider interface: one [`Branch`] supplies one level of hierarchical data.

use alloc::rc::Rc;
use core::any::Any;
use core::cell::RefCell;

use crate::error::ProviderError;
use crate::tree::Tree;

/// Shared handle to a branch.
///
/// Branch identity is pointer identity of the `Rc`: attaching the same handle at two
/// places binds both nodes to one branch, and notifications for it fan out to both.
pub type BranchRef = Rc<dyn Branch>;

bitflags::bitflags! {
    /// Capabilities a branch declares through [`Branch::features`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BranchFeatures: u16 {
        /// Items may expand into child branches.
        const EXPANSIONS = 1 << 0;
        /// A realign asks [`Branch::relocate`] where existing expansions went instead of
        /// discarding them.
        const RELOCATE_ON_REFRESH = 1 << 1;
        /// Realign requests are deferred while redraw is suspended.
        const DELAYED_UPDATES = 1 << 2;
        /// Descendants may be expanded by [`Tree::expand_recursively`].
        const RECURSIVE_EXPANSION = 1 << 3;
        /// The branch exposes more than one column.
        const MULTI_COLUMN = 1 << 4;
        /// Column counts vary per row ([`Branch::column_count_of_row`]).
        const JAGGED_COLUMNS = 1 << 5;
        /// Some columns are complex and load their sub-items with the row.
        const COMPLEX_SUB_ITEMS = 1 << 6;
        /// Tracked positions are re-found through [`Branch::locate_object`].
        const POSITION_TRACKING = 1 << 7;
        /// Positions in this branch cannot be tracked across a shuffle.
        const NO_TRACKING = 1 << 8;
        /// The branch announces inserts and deletes. Without it both are rejected.
        const INSERTS_AND_DELETES = 1 << 9;
        /// The branch takes part in [`Tree::realign_all`]. Without it the branch is
        /// static and skipped there.
        const REALIGNS = 1 << 10;
        /// The branch implements [`Branch::toggle_state`].
        const STATE_CHANGES = 1 << 11;
        /// Item indices are stable: tracked positions keep their index across a realign.
        const DEFAULT_POSITION_TRACKING = 1 << 12;
    }
}

bitflags::bitflags! {
    /// How the tree attaches an [`Expansion`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ExpansionOptions: u8 {
        /// [`Tree::expand_recursively`] stops at this expansion instead of descending
        /// into it. Required for circular structures.
        const BLOCK_RECURSION = 1 << 0;
        /// Take over the expansions of the tree the branch came from, leaving that tree
        /// empty. Without it only the root branch of the tree is used.
        const CONSUME_TREE = 1 << 1;
        /// A branch returned for a [`ExpansionStyle::SubItemRoot`] request in a
        /// [`SubItemCellStyle::Mixed`] column becomes an expanded cell that can be
        /// collapsed, instead of a complex cell.
        const USE_AS_SUB_ITEM_EXPANSION = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Rows to repaint after [`Branch::toggle_state`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct StateRefreshChanges: u8 {
        /// The toggled cell.
        const CURRENT = 1 << 0;
        /// Every row of the toggled item's expansion.
        const CHILDREN = 1 << 1;
        /// The items whose expansions contain the toggled item.
        const PARENTS = 1 << 2;
        /// Every row below each of those items.
        const PARENTS_CHILDREN = 1 << 3;
        /// The whole tree.
        const ENTIRE = 1 << 4;
    }
}

/// What a requested expansion is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExpansionStyle {
    /// An ordinary child list under an item.
    Children,
    /// A nested list inside an expandable cell, requested when the cell is toggled.
    SubItem,
    /// A nested list loaded together with its row, for complex and mixed cells.
    SubItemRoot,
}

/// What happens to an expansion when its item collapses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CollapseBehavior {
    /// Keep the expansion and everything below it; re-expanding restores it as it was.
    #[default]
    KeepExpansion,
    /// Keep the child branch but forget the expansions nested beneath it.
    DiscardChildren,
    /// Release the child branch together with everything below it.
    DiscardRecursively,
}

/// Kind of object passed to [`Branch::locate_object`] or requested from [`Branch::object`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectStyle {
    /// A domain object used to follow an item across a shuffle.
    TrackingObject,
    /// A previously attached expansion, passed as a `&BranchRef`.
    ExpandedBranch,
}

/// How a [`LocateResult`] should be followed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LocateAction {
    /// The object is the item at `row` of this branch.
    ThisLevel,
    /// The object lives below the item at `row`; continue in that item's expansion.
    NextLevel,
    /// The branch does not know the object.
    NotTracked,
    /// The object is gone, but its parent item is the closest match.
    NotTrackedReturnParent,
}

/// Answer from [`Branch::locate_object`] or a [`LevelShiftAdjuster`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocateResult {
    /// Item index in the answering branch.
    pub row: usize,
    /// Branch-relative column.
    pub column: usize,
    /// How to continue.
    pub action: LocateAction,
}

impl LocateResult {
    /// The object is not known.
    pub const NOT_TRACKED: Self = Self {
        row: 0,
        column: 0,
        action: LocateAction::NotTracked,
    };

    /// The object is the item at `row`.
    pub fn this_level(row: usize) -> Self {
        Self {
            row,
            column: 0,
            action: LocateAction::ThisLevel,
        }
    }

    /// The object is below the item at `row`.
    pub fn next_level(row: usize) -> Self {
        Self {
            row,
            column: 0,
            action: LocateAction::NextLevel,
        }
    }
}

/// Where an existing expansion belongs after its branch realigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relocation {
    /// Drop the expansion.
    Discard,
    /// The item did not move.
    Keep,
    /// The item moved to a new index; keep the expansion.
    MoveTo(usize),
    /// The item is at a new index and wants a fresh expansion.
    Refresh(usize),
}

/// Shape of a cell in a non-zero column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SubItemCellStyle {
    /// Never expandable.
    #[default]
    Simple,
    /// May expand on demand into a nested list that starts on the anchor row.
    Expandable,
    /// Always expanded; the nested list is loaded with the row and sits below the cell.
    Complex,
    /// Varies per row; ask [`Branch::cell_style`]. When the row answers `Mixed` as well,
    /// the cell is loaded like a complex cell and may come back as an expandable one,
    /// see [`ExpansionOptions::USE_AS_SUB_ITEM_EXPANSION`].
    Mixed,
}

/// A branch handed out for an expansion, see [`Branch::expansion`].
#[derive(Clone)]
pub struct Expansion {
    pub(crate) branch: BranchRef,
    pub(crate) options: ExpansionOptions,
    pub(crate) source: Option<Rc<RefCell<Tree>>>,
}

impl Expansion {
    /// Expand into `branch`.
    pub fn new(branch: BranchRef) -> Self {
        Self {
            branch,
            options: ExpansionOptions::empty(),
            source: None,
        }
    }

    /// Expand into the root list of `tree`. Returns `None` when `tree` has no root or
    /// is borrowed.
    ///
    /// With [`ExpansionOptions::CONSUME_TREE`] the expansions already made in `tree`
    /// move over as well.
    pub fn from_tree(tree: Rc<RefCell<Tree>>) -> Option<Self> {
        let branch = tree.try_borrow().ok()?.root_branch()?;
        Some(Self {
            branch,
            options: ExpansionOptions::empty(),
            source: Some(tree),
        })
    }

    /// Set the attachment options.
    pub fn with_options(mut self, options: ExpansionOptions) -> Self {
        self.options = options;
        self
    }

    /// The expanded branch.
    pub fn branch(&self) -> &BranchRef {
        &self.branch
    }

    /// The attachment options.
    pub fn options(&self) -> ExpansionOptions {
        self.options
    }
}

impl From<BranchRef> for Expansion {
    fn from(branch: BranchRef) -> Self {
        Self::new(branch)
    }
}

impl core::fmt::Debug for Expansion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Expansion")
            .field("options", &self.options)
            .field("from_tree", &self.source.is_some())
            .finish_non_exhaustive()
    }
}

/// External provider of one level of hierarchical data.
///
/// Every method takes `&self`: providers keep their own state behind interior
/// mutability and never see the tree while an operation is running. Before notifying
/// the tree of an insert or delete, the branch must already report the new
/// [`visible_item_count`](Self::visible_item_count).
pub trait Branch {
    /// Declared capabilities.
    fn features(&self) -> BranchFeatures {
        BranchFeatures::empty()
    }

    /// Number of items this branch shows.
    fn visible_item_count(&self) -> usize;

    /// Whether the cell at `row`/`column` can expand.
    fn is_expandable(&self, row: usize, column: usize) -> bool {
        let _ = (row, column);
        false
    }

    /// Produce the branch shown when the cell at `row`/`column` expands.
    ///
    /// `Ok(None)` means there is nothing to show.
    fn expansion(
        &self,
        row: usize,
        column: usize,
        style: ExpansionStyle,
    ) -> Result<Option<Expansion>, ProviderError> {
        let _ = (row, column, style);
        Ok(None)
    }

    /// Policy applied when the cell at `row`/`column` collapses.
    fn on_collapse(&self, row: usize, column: usize) -> CollapseBehavior {
        let _ = (row, column);
        CollapseBehavior::KeepExpansion
    }

    /// Find `target` in this branch.
    fn locate_object(&self, target: &dyn Any, style: ObjectStyle) -> LocateResult {
        let _ = (target, style);
        LocateResult::NOT_TRACKED
    }

    /// An object identifying the cell at `row`/`column`, used for tracking.
    fn object(&self, row: usize, column: usize, style: ObjectStyle) -> Option<Rc<dyn Any>> {
        let _ = (row, column, style);
        None
    }

    /// Where the expansion previously attached at `old_row` belongs now.
    fn relocate(&self, old_row: usize, expansion: &BranchRef) -> Relocation {
        let _ = (old_row, expansion);
        Relocation::Discard
    }

    /// Number of columns.
    fn column_count(&self) -> usize {
        1
    }

    /// Number of columns on one row when [`BranchFeatures::JAGGED_COLUMNS`] is set.
    fn column_count_of_row(&self, row: usize) -> usize {
        let _ = row;
        self.column_count()
    }

    /// Default cell shape for a column.
    fn column_style(&self, column: usize) -> SubItemCellStyle {
        let _ = column;
        SubItemCellStyle::Simple
    }

    /// Cell shape for one row of a [`SubItemCellStyle::Mixed`] column.
    fn cell_style(&self, row: usize, column: usize) -> SubItemCellStyle {
        let _ = row;
        self.column_style(column)
    }

    /// Flip the branch-owned state (a check box, say) of the cell at `row`/`column`.
    ///
    /// Only called for branches with [`BranchFeatures::STATE_CHANGES`].
    fn toggle_state(&self, row: usize, column: usize) -> StateRefreshChanges {
        let _ = (row, column);
        StateRefreshChanges::empty()
    }
}

/// Resolve the effective style of a cell, looking through a per-row answer for
/// [`SubItemCellStyle::Mixed`] columns.
pub(crate) fn effective_cell_style(
    branch: &dyn Branch,
    row: usize,
    column: usize,
) -> SubItemCellStyle {
    match branch.column_style(column) {
        SubItemCellStyle::Mixed => branch.cell_style(row, column),
        style => style,
    }
}

/// Identity key for a branch handle.
pub(crate) fn branch_key(branch: &BranchRef) -> usize {
    Rc::as_ptr(branch).cast::<()>().addr()
}

/// Relocates expansions during a level shift.
pub trait LevelShiftAdjuster {
    /// Find `expansion` beneath `level`, with `remaining_levels` inserted levels still
    /// to descend.
    fn locate(
        &self,
        level: &BranchRef,
        expansion: &BranchRef,
        remaining_levels: usize,
    ) -> LocateResult;
}

/// Parameters of a level shift, see [`Tree::shift_branch_levels`].
#[derive(Clone, Default)]
pub struct ShiftBranchLevels {
    /// Levels removed directly beneath the shifted level.
    pub remove_levels: usize,
    /// Levels inserted directly beneath the shifted level.
    pub insert_levels: usize,
    /// How many levels below the branch the shift applies.
    pub depth: usize,
    /// Branch that replaces the notifying branch at its attachment points.
    pub replacement: Option<BranchRef>,
    /// Custom relocation; without one the level's branch is asked through
    /// [`Branch::locate_object`] with [`ObjectStyle::ExpandedBranch`].
    pub adjuster: Option<Rc<dyn LevelShiftAdjuster>>,
}

impl core::fmt::Debug for ShiftBranchLevels {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShiftBranchLevels")
            .field("remove_levels", &self.remove_levels)
            .field("insert_levels", &self.insert_levels)
            .field("depth", &self.depth)
            .field("replacement", &self.replacement.is_some())
            .field("adjuster", &self.adjuster.is_some())
            .finish()
    }
}
