//! Guidance constraints for constrained decoding.
//!
//! The decoder only ever asks the five questions on [`ConstraintSet`];
//! what a constraint *is* stays opaque. [`BracketConstraintSet`] is a
//! concrete implementation that forces the parse to respect a given set
//! of (possibly labeled) spans.

use crate::grammar::Sym;
use crate::item::{ChartItem, ItemArena};
use std::sync::atomic::{AtomicBool, Ordering};

/// Handle into a [`ConstraintSet`].
pub type ConstraintId = usize;

pub trait ConstraintSet: Send + Sync {
    /// May `item` enter the chart at all?
    fn permits(&self, arena: &ItemArena, item: &ChartItem) -> bool;

    /// The constraint `item` is assigned, if any. `None` leaves the
    /// item unconstrained.
    fn constraint_satisfying(&self, arena: &ItemArena, item: &ChartItem) -> Option<ConstraintId>;

    /// Would attaching `child` under an item carrying `c` violate `c`?
    fn is_violated_by_child(&self, c: ConstraintId, arena: &ItemArena, child: &ChartItem) -> bool;

    /// Does `item` itself satisfy `c`, ignoring `c`'s descendants?
    fn is_locally_satisfied_by(&self, c: ConstraintId, arena: &ItemArena, item: &ChartItem)
        -> bool;

    /// Parent in the constraint tree, if the set is tree-structured.
    fn parent(&self, c: ConstraintId) -> Option<ConstraintId>;

    /// Has some item satisfied `c` during this parse?
    fn has_been_satisfied(&self, c: ConstraintId) -> bool;
}

#[derive(Clone, Copy, Debug)]
pub struct BracketConstraint {
    /// First word index covered.
    pub start: usize,
    /// Last word index covered, inclusive.
    pub end: usize,
    /// Required label for an item spanning exactly this bracket; `None`
    /// accepts any label.
    pub label: Option<Sym>,
}

impl BracketConstraint {
    fn contains(&self, start: usize, end: usize) -> bool {
        self.start <= start && end <= self.end
    }

    fn crosses(&self, start: usize, end: usize) -> bool {
        (start < self.start && self.start <= end && end < self.end)
            || (self.start < start && start <= self.end && self.end < end)
    }
}

/// Constrains decoding to derivations whose constituents nest with the
/// given brackets. An item is assigned the smallest bracket containing
/// its span; items crossing any bracket are kept out of the chart, and
/// items outside every bracket are admitted unconstrained.
pub struct BracketConstraintSet {
    brackets: Vec<BracketConstraint>,
    satisfied: Vec<AtomicBool>,
}

impl BracketConstraintSet {
    pub fn new(mut brackets: Vec<BracketConstraint>) -> BracketConstraintSet {
        // Smallest spans first, so a linear scan finds the tightest cover.
        brackets.sort_by_key(|b| (b.end - b.start, b.start));
        let satisfied = brackets.iter().map(|_| AtomicBool::new(false)).collect();
        BracketConstraintSet {
            brackets,
            satisfied,
        }
    }

    fn crosses_any(&self, start: usize, end: usize) -> bool {
        self.brackets.iter().any(|b| b.crosses(start, end))
    }

    fn tightest_cover(&self, start: usize, end: usize) -> Option<ConstraintId> {
        self.brackets.iter().position(|b| b.contains(start, end))
    }

    fn note_satisfied(&self, c: ConstraintId, item: &ChartItem) {
        let b = &self.brackets[c];
        if b.start == item.start
            && b.end == item.end
            && item.stop
            && b.label.map_or(true, |l| l == item.label)
        {
            self.satisfied[c].store(true, Ordering::Relaxed);
        }
    }
}

impl ConstraintSet for BracketConstraintSet {
    fn permits(&self, _arena: &ItemArena, item: &ChartItem) -> bool {
        !self.crosses_any(item.start, item.end)
    }

    fn constraint_satisfying(&self, _arena: &ItemArena, item: &ChartItem) -> Option<ConstraintId> {
        if self.crosses_any(item.start, item.end) {
            return None;
        }
        let c = self.tightest_cover(item.start, item.end)?;
        self.note_satisfied(c, item);
        Some(c)
    }

    fn is_violated_by_child(&self, c: ConstraintId, _arena: &ItemArena, child: &ChartItem) -> bool {
        let b = &self.brackets[c];
        !b.contains(child.start, child.end) || self.crosses_any(child.start, child.end)
    }

    fn is_locally_satisfied_by(
        &self,
        c: ConstraintId,
        _arena: &ItemArena,
        item: &ChartItem,
    ) -> bool {
        let b = &self.brackets[c];
        if !b.contains(item.start, item.end) || self.crosses_any(item.start, item.end) {
            return false;
        }
        self.note_satisfied(c, item);
        true
    }

    fn parent(&self, c: ConstraintId) -> Option<ConstraintId> {
        let b = self.brackets[c];
        self.brackets
            .iter()
            .position(|p| (p.end - p.start) > (b.end - b.start) && p.contains(b.start, b.end))
    }

    fn has_been_satisfied(&self, c: ConstraintId) -> bool {
        self.satisfied[c].load(Ordering::Relaxed)
    }
}
