//! Equivalence policies for chart recombination.
//!
//! Two items in the same cell recombine when the policy in force says the
//! parsing model cannot distinguish their futures. The policy therefore
//! mirrors exactly the conditioning context of the model: weaken it and
//! the chart merges items the model would score differently; strengthen it
//! and the chart fills with redundant items.

use crate::config::EquivalenceChoice;
use crate::grammar::{Shifter, Side, Sym, Treebank, Word};
use crate::item::{ChartItem, ItemArena, ItemId};
use std::sync::Arc;

/// Decides when two items in one cell are interchangeable.
pub trait EquivalencePolicy: Send + Sync {
    /// Hash consistent with [`EquivalencePolicy::equivalent`]: equivalent
    /// items must hash equal. Coarser is allowed.
    fn hash_item(&self, arena: &ItemArena, id: ItemId) -> u64;

    fn equivalent(&self, arena: &ItemArena, a: ItemId, b: ItemId) -> bool;
}

pub fn make_policy(
    choice: EquivalenceChoice,
    tb: Arc<dyn Treebank>,
    shifter: Arc<dyn Shifter>,
    num_prev_words: usize,
) -> Arc<dyn EquivalencePolicy> {
    let ctx = Ctx {
        tb,
        shifter,
        num_prev_words,
    };
    match choice {
        EquivalenceChoice::FullContext => Arc::new(FullContext { ctx }),
        EquivalenceChoice::BaseNpAware => Arc::new(BaseNpAware { ctx }),
        EquivalenceChoice::MappedPrevMod => Arc::new(MappedPrevMod {
            inner: BaseNpAware { ctx },
        }),
        EquivalenceChoice::Identity => Arc::new(Identity),
    }
}

struct Ctx {
    tb: Arc<dyn Treebank>,
    shifter: Arc<dyn Shifter>,
    num_prev_words: usize,
}

fn mix(code: u64, v: u64) -> u64 {
    (code << 2) ^ v.wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

fn word_bits(w: Word) -> u64 {
    ((w.word as u64) << 32) | w.tag as u64
}

impl Ctx {
    fn top(&self) -> Sym {
        self.tb.top_sym()
    }

    /// Modifier head words on one side, compared most recent first, with
    /// the shifter's skips applied independently to each history. Both
    /// histories are implicitly padded with the start word, so running off
    /// both lists together means equal.
    fn prev_words_equal(
        &self,
        arena: &ItemArena,
        a: &ChartItem,
        b: &ChartItem,
        side: Side,
    ) -> bool {
        let mut remaining = self.num_prev_words;
        let mut ca = a.children(side);
        let mut cb = b.children(side);
        while remaining > 0 {
            while let Some(id) = ca {
                let node = arena.child(id);
                if self.shifter.skip_word(a.label, &arena[node.item].head_word) {
                    ca = node.next;
                } else {
                    break;
                }
            }
            while let Some(id) = cb {
                let node = arena.child(id);
                if self.shifter.skip_word(b.label, &arena[node.item].head_word) {
                    cb = node.next;
                } else {
                    break;
                }
            }
            match (ca, cb) {
                (None, None) => return true,
                (None, _) | (_, None) => return false,
                (Some(x), Some(y)) => {
                    let nx = arena.child(x);
                    let ny = arena.child(y);
                    if arena[nx.item].head_word != arena[ny.item].head_word {
                        return false;
                    }
                    remaining -= 1;
                    ca = nx.next;
                    cb = ny.next;
                }
            }
        }
        true
    }

    fn prev_words_equal_both(&self, arena: &ItemArena, a: &ChartItem, b: &ChartItem) -> bool {
        self.prev_words_equal(arena, a, b, Side::Left)
            && self.prev_words_equal(arena, a, b, Side::Right)
    }

    /// Head label with base NPs treated as transparent: a base NP head
    /// child stands for its own head child's label.
    fn head_label_base_np_aware(&self, arena: &ItemArena, item: &ChartItem) -> Option<Sym> {
        let hc = &arena[item.head_child?];
        if self.tb.is_base_np(hc.label) {
            hc.head_label
        } else {
            Some(hc.label)
        }
    }

    fn mapped_mods_equal(&self, a: &[Sym], b: &[Sym]) -> bool {
        a.len() == b.len()
            && a.iter()
                .zip(b)
                .all(|(&x, &y)| self.tb.map_prev_mod(x) == self.tb.map_prev_mod(y))
    }

    /// Comparison shared by every context-sensitive policy once the
    /// stopped short-circuit and any base-NP branch are out of the way.
    fn full_equal(
        &self,
        arena: &ItemArena,
        a: &ChartItem,
        b: &ChartItem,
        head_label_a: Option<Sym>,
        head_label_b: Option<Sym>,
        map_mods: bool,
    ) -> bool {
        let mods_equal = if map_mods {
            self.mapped_mods_equal(&a.left_prev_mods, &b.left_prev_mods)
                && self.mapped_mods_equal(&a.right_prev_mods, &b.right_prev_mods)
        } else {
            a.left_prev_mods == b.left_prev_mods && a.right_prev_mods == b.right_prev_mods
        };
        a.stop == b.stop
            && a.is_preterminal() == b.is_preterminal()
            && a.label == b.label
            && a.head_word == b.head_word
            && a.contains_verb == b.contains_verb
            && a.left_verb == b.left_verb
            && a.right_verb == b.right_verb
            && head_label_a == head_label_b
            && a.left_subcat == b.left_subcat
            && a.right_subcat == b.right_subcat
            && mods_equal
            && self.prev_words_equal_both(arena, a, b)
    }

    /// Stopped items (other than the hidden root) have no derivational
    /// future; only what a parent would condition on matters.
    fn stopped_equal(&self, a: &ChartItem, b: &ChartItem) -> bool {
        a.is_preterminal() == b.is_preterminal()
            && a.label == b.label
            && a.head_word == b.head_word
            && a.contains_verb == b.contains_verb
    }

    fn hash_common(&self, item: &ChartItem, map_mods: bool) -> u64 {
        let mut code = mix(item.label as u64, word_bits(item.head_word));
        if item.stop && item.label != self.top() {
            return code;
        }
        for &s in item.left_subcat.labels() {
            code = mix(code, s as u64);
        }
        for &s in item.right_subcat.labels() {
            code = mix(code, s as u64);
        }
        for mods in [&item.left_prev_mods, &item.right_prev_mods] {
            for &m in mods.iter() {
                let m = if map_mods { self.tb.map_prev_mod(m) } else { m };
                code = mix(code, m as u64);
            }
        }
        code ^ (((item.left_verb as u64) << 1) | item.right_verb as u64)
    }

    /// Base NP items carry no subcats and recombine independently of their
    /// head word; only the label, head label, and modifier histories count.
    fn base_np_hash(&self, item: &ChartItem, map_mods: bool) -> u64 {
        let mut code = item.label as u64;
        for mods in [&item.left_prev_mods, &item.right_prev_mods] {
            for &m in mods.iter() {
                let m = if map_mods { self.tb.map_prev_mod(m) } else { m };
                code = mix(code, m as u64);
            }
        }
        code
    }

    fn base_np_equal(
        &self,
        arena: &ItemArena,
        a: &ChartItem,
        b: &ChartItem,
        map_mods: bool,
    ) -> bool {
        let mods_equal = if map_mods {
            self.mapped_mods_equal(&a.left_prev_mods, &b.left_prev_mods)
                && self.mapped_mods_equal(&a.right_prev_mods, &b.right_prev_mods)
        } else {
            a.left_prev_mods == b.left_prev_mods && a.right_prev_mods == b.right_prev_mods
        };
        a.stop == b.stop
            && a.label == b.label
            && self.head_label_base_np_aware(arena, a) == self.head_label_base_np_aware(arena, b)
            && mods_equal
            && self.prev_words_equal_both(arena, a, b)
    }
}

/// Recombines items whose full conditioning context matches: label, head
/// word, subcats, verb flags, head label, and bounded modifier histories
/// (labels and words).
pub struct FullContext {
    ctx: Ctx,
}

impl EquivalencePolicy for FullContext {
    fn hash_item(&self, arena: &ItemArena, id: ItemId) -> u64 {
        self.ctx.hash_common(&arena[id], false)
    }

    fn equivalent(&self, arena: &ItemArena, a: ItemId, b: ItemId) -> bool {
        let a = &arena[a];
        let b = &arena[b];
        if a.stop && b.stop && a.label != self.ctx.top() {
            return self.ctx.stopped_equal(a, b);
        }
        self.ctx
            .full_equal(arena, a, b, a.head_label, b.head_label, false)
    }
}

/// [`FullContext`] with two refinements for base NPs: a base NP head child
/// is identified by its own head child's label, and unstopped base NP
/// items ignore head word and subcats entirely.
pub struct BaseNpAware {
    ctx: Ctx,
}

impl BaseNpAware {
    fn equivalent_impl(&self, arena: &ItemArena, a: ItemId, b: ItemId, map_mods: bool) -> bool {
        let a = &arena[a];
        let b = &arena[b];
        if a.stop && b.stop && a.label != self.ctx.top() {
            return self.ctx.stopped_equal(a, b);
        }
        if a.label == b.label && self.ctx.tb.is_base_np(a.label) {
            return self.ctx.base_np_equal(arena, a, b, map_mods);
        }
        self.ctx.full_equal(
            arena,
            a,
            b,
            self.ctx.head_label_base_np_aware(arena, a),
            self.ctx.head_label_base_np_aware(arena, b),
            map_mods,
        )
    }

    fn hash_impl(&self, arena: &ItemArena, id: ItemId, map_mods: bool) -> u64 {
        let item = &arena[id];
        if !item.stop && self.ctx.tb.is_base_np(item.label) {
            self.ctx.base_np_hash(item, map_mods)
        } else {
            self.ctx.hash_common(item, map_mods)
        }
    }
}

impl EquivalencePolicy for BaseNpAware {
    fn hash_item(&self, arena: &ItemArena, id: ItemId) -> u64 {
        self.hash_impl(arena, id, false)
    }

    fn equivalent(&self, arena: &ItemArena, a: ItemId, b: ItemId) -> bool {
        self.equivalent_impl(arena, a, b, false)
    }
}

/// [`BaseNpAware`] with modifier-label histories coarsened through the
/// treebank's previous-modifier map before comparison.
pub struct MappedPrevMod {
    inner: BaseNpAware,
}

impl EquivalencePolicy for MappedPrevMod {
    fn hash_item(&self, arena: &ItemArena, id: ItemId) -> u64 {
        self.inner.hash_impl(arena, id, true)
    }

    fn equivalent(&self, arena: &ItemArena, a: ItemId, b: ItemId) -> bool {
        self.inner.equivalent_impl(arena, a, b, true)
    }
}

/// No recombination at all: every item is distinct. Turns the chart into
/// a plain k-best list per cell.
pub struct Identity;

impl EquivalencePolicy for Identity {
    fn hash_item(&self, _arena: &ItemArena, id: ItemId) -> u64 {
        id.raw().wrapping_mul(0x9e37_79b9_7f4a_7c15)
    }

    fn equivalent(&self, _arena: &ItemArena, a: ItemId, b: ItemId) -> bool {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{DefaultShifter, SymbolTable, TreebankDef};
    use crate::item::tests::leaf;
    use crate::item::{ItemArena, Subcat};
    use smallvec::smallvec;

    struct Fixture {
        syms: SymbolTable,
        tb: Arc<TreebankDef>,
        arena: ItemArena,
    }

    fn fixture() -> Fixture {
        let mut syms = SymbolTable::new();
        let tb = TreebankDef::new(&mut syms);
        Fixture {
            syms,
            tb: Arc::new(tb),
            arena: ItemArena::new(),
        }
    }

    fn policy(f: &Fixture, choice: EquivalenceChoice) -> Arc<dyn EquivalencePolicy> {
        make_policy(choice, f.tb.clone(), Arc::new(DefaultShifter), 1)
    }

    #[test]
    fn stopped_items_recombine_on_label_and_head_word() {
        let mut f = fixture();
        let nn = f.syms.intern("NN");
        let dog = f.syms.intern("dog");
        let cat = f.syms.intern("cat");
        let p = policy(&f, EquivalenceChoice::FullContext);

        let a = f.arena.insert(leaf(nn, Word::new(dog, nn), 0));
        let b = f.arena.insert(leaf(nn, Word::new(dog, nn), 0));
        let c = f.arena.insert(leaf(nn, Word::new(cat, nn), 0));
        assert!(p.equivalent(&f.arena, a, b));
        assert_eq!(p.hash_item(&f.arena, a), p.hash_item(&f.arena, b));
        assert!(!p.equivalent(&f.arena, a, c));
    }

    #[test]
    fn unstopped_items_compare_subcats_and_histories() {
        let mut f = fixture();
        let np = f.syms.intern("NP");
        let npa = f.syms.intern("NP-A");
        let vb = f.syms.intern("VB");
        let w = Word::new(f.syms.intern("barks"), vb);
        let p = policy(&f, EquivalenceChoice::FullContext);

        let mut x = leaf(np, w, 0);
        x.stop = false;
        let mut y = x.clone();
        let a = f.arena.insert(x.clone());
        let b = f.arena.insert(y.clone());
        assert!(p.equivalent(&f.arena, a, b));

        y.left_subcat = Subcat::from_labels(&[npa]);
        let c = f.arena.insert(y);
        assert!(!p.equivalent(&f.arena, a, c));

        x.left_prev_mods = smallvec![npa];
        let d = f.arena.insert(x);
        assert!(!p.equivalent(&f.arena, a, d));
    }

    #[test]
    fn base_np_policy_ignores_head_word_for_base_nps() {
        let mut f = fixture();
        let npb = f.syms.intern("NPB");
        let nn = f.syms.intern("NN");
        let dog = f.syms.intern("dog");
        let cat = f.syms.intern("cat");
        Arc::get_mut(&mut f.tb).unwrap().add_base_np(npb);

        let full = policy(&f, EquivalenceChoice::FullContext);
        let aware = policy(&f, EquivalenceChoice::BaseNpAware);

        // Two unstopped base NPs over different head words, same shape.
        let hd = f.arena.insert(leaf(nn, Word::new(dog, nn), 0));
        let hc = f.arena.insert(leaf(nn, Word::new(cat, nn), 0));
        let mut x = leaf(npb, Word::new(dog, nn), 0);
        x.stop = false;
        x.head_child = Some(hd);
        x.head_label = Some(nn);
        let mut y = leaf(npb, Word::new(cat, nn), 0);
        y.stop = false;
        y.head_child = Some(hc);
        y.head_label = Some(nn);
        let a = f.arena.insert(x);
        let b = f.arena.insert(y);

        assert!(!full.equivalent(&f.arena, a, b));
        assert!(aware.equivalent(&f.arena, a, b));
        assert_eq!(aware.hash_item(&f.arena, a), aware.hash_item(&f.arena, b));
    }

    #[test]
    fn base_np_policy_still_compares_modifier_words() {
        let mut f = fixture();
        let npb = f.syms.intern("NPB");
        let nn = f.syms.intern("NN");
        let dt = f.syms.intern("DT");
        Arc::get_mut(&mut f.tb).unwrap().add_base_np(npb);
        let aware = policy(&f, EquivalenceChoice::BaseNpAware);

        let hd = f.arena.insert(leaf(nn, Word::new(f.syms.intern("dog"), nn), 1));
        let the = f.arena.insert(leaf(dt, Word::new(f.syms.intern("the"), dt), 0));
        let a_mod = f.arena.insert(leaf(dt, Word::new(f.syms.intern("a"), dt), 0));

        let mut x = leaf(npb, Word::new(f.syms.intern("dog"), nn), 0);
        x.stop = false;
        x.head_child = Some(hd);
        x.head_label = Some(nn);
        x.end = 1;
        x.left_prev_mods = smallvec![dt];
        let mut y = x.clone();
        x.left_children = Some(f.arena.cons(the, None));
        y.left_children = Some(f.arena.cons(a_mod, None));
        let a = f.arena.insert(x);
        let b = f.arena.insert(y);
        // Same modifier label history, different modifier head words.
        assert!(!aware.equivalent(&f.arena, a, b));
    }

    #[test]
    fn mapped_policy_coarsens_prev_mod_labels() {
        let mut f = fixture();
        let s = f.syms.intern("S");
        let np = f.syms.intern("NP");
        let npa = f.syms.intern("NP-A");
        let vb = f.syms.intern("VB");
        Arc::get_mut(&mut f.tb).unwrap().add_prev_mod_mapping(npa, np);
        let aware = policy(&f, EquivalenceChoice::BaseNpAware);
        let mapped = policy(&f, EquivalenceChoice::MappedPrevMod);

        let w = Word::new(f.syms.intern("barks"), vb);
        let hd = f.arena.insert(leaf(vb, w, 0));
        let mut x = leaf(s, w, 0);
        x.stop = false;
        x.head_child = Some(hd);
        x.head_label = Some(vb);
        let mut y = x.clone();
        x.left_prev_mods = smallvec![np];
        y.left_prev_mods = smallvec![npa];
        let a = f.arena.insert(x);
        let b = f.arena.insert(y);

        assert!(!aware.equivalent(&f.arena, a, b));
        assert!(mapped.equivalent(&f.arena, a, b));
        assert_eq!(mapped.hash_item(&f.arena, a), mapped.hash_item(&f.arena, b));
    }

    #[test]
    fn identity_policy_never_recombines() {
        let mut f = fixture();
        let nn = f.syms.intern("NN");
        let w = Word::new(f.syms.intern("dog"), nn);
        let p = policy(&f, EquivalenceChoice::Identity);
        let a = f.arena.insert(leaf(nn, w, 0));
        let b = f.arena.insert(leaf(nn, w, 0));
        assert!(p.equivalent(&f.arena, a, a));
        assert!(!p.equivalent(&f.arena, a, b));
    }
}
