//! Chart items and the arena that owns them.
//!
//! Items reference their children through [`ItemId`] handles into a single
//! [`ItemArena`] rather than through owned pointers, so an item that loses
//! a recombination or falls out of the beam can stay readable (as garbage)
//! for as long as any surviving item's child list mentions it. Slots are
//! recycled only between sentences, or for items that were never entered
//! into the chart at all; the generation counter in each handle catches any
//! use of a recycled slot.

use crate::grammar::{Side, Sym, Treebank, Word};
use smallvec::SmallVec;

/// Bounded previous-modifier label history, most recent first.
pub type PrevMods = SmallVec<[Sym; 2]>;

/// Bounded previous-modifier head-word history, most recent first.
pub type PrevWords = SmallVec<[Word; 2]>;

/// A multiset of argument labels still required on one side of a head.
///
/// Kept sorted so that equal multisets compare and hash equal.
#[derive(Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct Subcat(SmallVec<[Sym; 4]>);

impl Subcat {
    pub fn empty() -> Subcat {
        Subcat::default()
    }

    pub fn from_labels(labels: &[Sym]) -> Subcat {
        let mut v: SmallVec<[Sym; 4]> = labels.iter().copied().collect();
        v.sort_unstable();
        Subcat(v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, label: Sym) -> bool {
        self.0.binary_search(&label).is_ok()
    }

    /// Copy of this subcat with one occurrence of `label` removed.
    /// Returns `None` if `label` is not a member.
    pub fn without(&self, label: Sym) -> Option<Subcat> {
        let pos = self.0.binary_search(&label).ok()?;
        let mut v = self.0.clone();
        v.remove(pos);
        Some(Subcat(v))
    }

    pub fn labels(&self) -> &[Sym] {
        &self.0
    }
}

/// Generational handle to a slot in an [`ItemArena`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ItemId {
    index: u32,
    gen: u32,
}

impl ItemId {
    /// Packed form, unique among live handles. Used by identity hashing.
    pub fn raw(self) -> u64 {
        ((self.index as u64) << 32) | self.gen as u64
    }
}

/// Handle to a node of an arena-allocated child list.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ChildId(u32);

/// One cons cell of a child list. The head of the list is the modifier
/// attached most recently, i.e. the one furthest from the head child.
#[derive(Clone, Copy, Debug)]
pub struct ChildNode {
    pub item: ItemId,
    pub next: Option<ChildId>,
}

/// A chart edge: a lexicalized constituent over a span, together with the
/// derivation state (subcats, modifier histories, verb flags, stop state)
/// that the parsing model conditions on.
#[derive(Clone, Debug)]
pub struct ChartItem {
    pub label: Sym,
    pub head_word: Word,
    pub left_subcat: Subcat,
    pub right_subcat: Subcat,
    /// `None` for preterminal items.
    pub head_child: Option<ItemId>,
    /// Label of the head child, cached at construction.
    pub head_label: Option<Sym>,
    pub left_children: Option<ChildId>,
    pub right_children: Option<ChildId>,
    pub left_prev_mods: PrevMods,
    pub right_prev_mods: PrevMods,
    /// Index of the first word covered.
    pub start: usize,
    /// Index of the last word covered (inclusive).
    pub end: usize,
    /// A verb appears somewhere among the left/right modifier subtrees.
    pub left_verb: bool,
    pub right_verb: bool,
    /// A verb appears anywhere in this subtree (computed at construction).
    pub contains_verb: bool,
    /// Both modifier sequences have been terminated.
    pub stop: bool,
    /// Log inside probability of the derivation.
    pub log_tree_prob: f64,
    /// Log prior of the (label, head word) pairing, used for pruning.
    pub log_prior: f64,
    /// `log_tree_prob + log_prior`; the chart ranks items by this.
    pub log_prob: f64,
    /// Number of distinct derivations this item stands for.
    pub num_parses: u64,
    /// Constraint assigned during constrained decoding.
    pub constraint: Option<usize>,
    /// Removed from its cell but possibly still referenced.
    pub garbage: bool,
}

impl ChartItem {
    pub fn is_preterminal(&self) -> bool {
        self.head_child.is_none()
    }

    pub fn subcat(&self, side: Side) -> &Subcat {
        match side {
            Side::Left => &self.left_subcat,
            Side::Right => &self.right_subcat,
        }
    }

    pub fn children(&self, side: Side) -> Option<ChildId> {
        match side {
            Side::Left => self.left_children,
            Side::Right => self.right_children,
        }
    }

    pub fn prev_mods(&self, side: Side) -> &PrevMods {
        match side {
            Side::Left => &self.left_prev_mods,
            Side::Right => &self.right_prev_mods,
        }
    }

    pub fn verb(&self, side: Side) -> bool {
        match side {
            Side::Left => self.left_verb,
            Side::Right => self.right_verb,
        }
    }

    pub fn set_side(
        &mut self,
        side: Side,
        subcat: Subcat,
        children: Option<ChildId>,
        prev_mods: PrevMods,
        verb: bool,
    ) {
        match side {
            Side::Left => {
                self.left_subcat = subcat;
                self.left_children = children;
                self.left_prev_mods = prev_mods;
                self.left_verb = verb;
            }
            Side::Right => {
                self.right_subcat = subcat;
                self.right_children = children;
                self.right_prev_mods = prev_mods;
                self.right_verb = verb;
            }
        }
    }
}

struct Slot {
    item: ChartItem,
    gen: u32,
    live: bool,
}

/// Slab of chart items plus the cons cells of their child lists.
#[derive(Default)]
pub struct ItemArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    children: Vec<ChildNode>,
    live: usize,
}

impl ItemArena {
    pub fn new() -> ItemArena {
        ItemArena {
            slots: Vec::new(),
            free: Vec::new(),
            children: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, item: ChartItem) -> ItemId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.item = item;
            slot.live = true;
            ItemId {
                index,
                gen: slot.gen,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                item,
                gen: 0,
                live: true,
            });
            ItemId { index, gen: 0 }
        }
    }

    /// Return a slot to the free list. Only legal for items no other live
    /// item can reference (in practice: items never entered into a cell).
    pub fn release(&mut self, id: ItemId) {
        let slot = &mut self.slots[id.index as usize];
        assert!(slot.live && slot.gen == id.gen, "release of stale item id");
        slot.live = false;
        slot.gen = slot.gen.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
    }

    pub fn get(&self, id: ItemId) -> &ChartItem {
        let slot = &self.slots[id.index as usize];
        assert!(slot.gen == id.gen, "access through stale item id");
        &slot.item
    }

    pub fn get_mut(&mut self, id: ItemId) -> &mut ChartItem {
        let slot = &mut self.slots[id.index as usize];
        assert!(slot.gen == id.gen, "access through stale item id");
        &mut slot.item
    }

    pub fn cons(&mut self, item: ItemId, next: Option<ChildId>) -> ChildId {
        let id = ChildId(self.children.len() as u32);
        self.children.push(ChildNode { item, next });
        id
    }

    pub fn child(&self, id: ChildId) -> ChildNode {
        self.children[id.0 as usize]
    }

    pub fn child_items(&self, head: Option<ChildId>) -> ChildIter<'_> {
        ChildIter { arena: self, cur: head }
    }

    pub fn child_count(&self, head: Option<ChildId>) -> usize {
        self.child_items(head).count()
    }

    pub fn live_items(&self) -> usize {
        self.live
    }

    /// Drop everything. Run between sentences; this is the only point at
    /// which garbage items are reclaimed.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.children.clear();
        self.live = 0;
    }
}

impl std::ops::Index<ItemId> for ItemArena {
    type Output = ChartItem;

    fn index(&self, id: ItemId) -> &ChartItem {
        self.get(id)
    }
}

pub struct ChildIter<'a> {
    arena: &'a ItemArena,
    cur: Option<ChildId>,
}

impl Iterator for ChildIter<'_> {
    type Item = ItemId;

    fn next(&mut self) -> Option<ItemId> {
        let node = self.arena.child(self.cur?);
        self.cur = node.next;
        Some(node.item)
    }
}

/// Whether the subtree rooted at `item` contains a verb. Children are
/// always constructed before their parents, so their cached flags are
/// already valid.
pub fn compute_contains_verb(
    arena: &ItemArena,
    tb: &dyn Treebank,
    base_nps_cannot_contain_verbs: bool,
    item: &ChartItem,
) -> bool {
    if item.left_verb || item.right_verb {
        return true;
    }
    if base_nps_cannot_contain_verbs && tb.is_base_np(item.label) {
        return false;
    }
    if let Some(hc) = item.head_child {
        if arena[hc].contains_verb {
            return true;
        }
    }
    tb.is_verb_tag(item.head_word.tag)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::grammar::{SymbolTable, TreebankDef};

    pub(crate) fn leaf(label: Sym, word: Word, start: usize) -> ChartItem {
        ChartItem {
            label,
            head_word: word,
            left_subcat: Subcat::empty(),
            right_subcat: Subcat::empty(),
            head_child: None,
            head_label: None,
            left_children: None,
            right_children: None,
            left_prev_mods: PrevMods::new(),
            right_prev_mods: PrevMods::new(),
            start,
            end: start,
            left_verb: false,
            right_verb: false,
            contains_verb: false,
            stop: true,
            log_tree_prob: 0.0,
            log_prior: 0.0,
            log_prob: 0.0,
            num_parses: 1,
            constraint: None,
            garbage: false,
        }
    }

    #[test]
    fn subcat_is_an_ordered_multiset() {
        let mut syms = SymbolTable::new();
        let np = syms.intern("NP-A");
        let s = syms.intern("S-A");
        let sc = Subcat::from_labels(&[s, np, np]);
        assert_eq!(sc.len(), 3);
        assert!(sc.contains(np));
        assert_eq!(sc, Subcat::from_labels(&[np, s, np]));

        let one_less = sc.without(np).unwrap();
        assert_eq!(one_less.len(), 2);
        assert!(one_less.contains(np));
        assert!(one_less.without(np).unwrap().contains(s));
        let vp = syms.intern("VP");
        assert!(sc.without(vp).is_none());
        assert!(Subcat::empty().is_empty());
    }

    #[test]
    fn arena_recycles_slots_and_bumps_generations() {
        let mut syms = SymbolTable::new();
        let nn = syms.intern("NN");
        let w = Word::new(syms.intern("dog"), nn);

        let mut arena = ItemArena::new();
        let a = arena.insert(leaf(nn, w, 0));
        let b = arena.insert(leaf(nn, w, 1));
        assert_eq!(arena.live_items(), 2);
        assert_eq!(arena[b].start, 1);

        arena.release(b);
        assert_eq!(arena.live_items(), 1);
        let c = arena.insert(leaf(nn, w, 2));
        // Slot reused, handle distinguishable.
        assert_ne!(b, c);
        assert_eq!(arena[c].start, 2);
        assert_eq!(arena[a].start, 0);
    }

    #[test]
    #[should_panic(expected = "stale item id")]
    fn stale_handles_are_detected() {
        let mut syms = SymbolTable::new();
        let nn = syms.intern("NN");
        let w = Word::new(syms.intern("dog"), nn);

        let mut arena = ItemArena::new();
        let a = arena.insert(leaf(nn, w, 0));
        arena.release(a);
        arena.insert(leaf(nn, w, 1));
        let _ = &arena[a];
    }

    #[test]
    fn child_lists_iterate_most_recent_first() {
        let mut syms = SymbolTable::new();
        let nn = syms.intern("NN");
        let w = Word::new(syms.intern("x"), nn);

        let mut arena = ItemArena::new();
        let first = arena.insert(leaf(nn, w, 0));
        let second = arena.insert(leaf(nn, w, 1));
        let list = arena.cons(first, None);
        let list = arena.cons(second, Some(list));
        let items: Vec<ItemId> = arena.child_items(Some(list)).collect();
        assert_eq!(items, vec![second, first]);
        assert_eq!(arena.child_count(Some(list)), 2);
        assert_eq!(arena.child_count(None), 0);
    }

    #[test]
    fn contains_verb_respects_base_np_blocking() {
        let mut syms = SymbolTable::new();
        let mut tb = TreebankDef::new(&mut syms);
        let vb = syms.intern("VB");
        let npb = syms.intern("NPB");
        tb.add_verb_tag(vb);
        tb.add_base_np(npb);

        let mut arena = ItemArena::new();
        let w = Word::new(syms.intern("barks"), vb);
        let mut pre = leaf(vb, w, 0);
        pre.contains_verb = compute_contains_verb(&arena, &tb, false, &pre);
        assert!(pre.contains_verb);
        let pre_id = arena.insert(pre);

        let mut parent = leaf(npb, w, 0);
        parent.head_child = Some(pre_id);
        parent.head_label = Some(vb);
        assert!(compute_contains_verb(&arena, &tb, false, &parent));
        assert!(!compute_contains_verb(&arena, &tb, true, &parent));

        // Side verb flags dominate the base NP block in either setting.
        parent.left_verb = true;
        assert!(compute_contains_verb(&arena, &tb, true, &parent));
    }
}
