//! The probability-model port.
//!
//! The decoder consults the model through [`ProbabilityModel`] and never
//! sees raw counts or smoothing. Every query is phrased as an event struct
//! carrying the full conditioning context, so a model is free to back off
//! however it likes. [`TableModel`] is a direct table-lookup
//! implementation used by the bindings and throughout the test suite.

use crate::grammar::{Side, Sym, Word};
use crate::item::{PrevMods, PrevWords, Subcat};
use rustc_hash::{FxHashMap, FxHashSet};

/// log 0. Any event with this score is impossible.
pub const LOG_ZERO: f64 = f64::NEG_INFINITY;

/// log 1.
pub const LOG_PROB_CERTAIN: f64 = 0.0;

/// Floor substituted for impossible events when decoding with relaxed
/// constraints: log of 10^-19.
pub const LOG_PROB_SMALL: f64 = -19.0 * std::f64::consts::LN_10;

/// Conditioning context for the prior of a lexicalized nonterminal.
#[derive(Clone, Debug)]
pub struct PriorEvent {
    pub head_word: Word,
    pub label: Sym,
}

/// Conditioning context for head-child generation, subcat generation,
/// and the hidden-root transition.
#[derive(Clone, Debug)]
pub struct HeadEvent {
    pub head_word: Word,
    pub parent: Sym,
    pub head: Sym,
    pub left_subcat: Subcat,
    pub right_subcat: Subcat,
}

/// Conditioning context for generating one modifier (or the stop
/// terminator) on one side of a head.
#[derive(Clone, Debug)]
pub struct ModifierEvent {
    /// Label of the modifier being generated; the stop symbol terminates.
    pub modifier: Sym,
    /// Head word of the modifier (stop word for terminators).
    pub mod_head_word: Word,
    /// Head word of the modificand.
    pub head_word: Word,
    /// Label of the modificand.
    pub parent: Sym,
    /// Label of the modificand's head child.
    pub head: Sym,
    /// Previous-modifier labels on this side, most recent first.
    pub prev_mods: PrevMods,
    /// Previous-modifier head words on this side, most recent first.
    pub prev_words: PrevWords,
    /// The modificand's remaining subcat on this side.
    pub subcat: Subcat,
    /// A verb occurs between the head and the attachment point.
    pub verb_intervening: bool,
    pub side: Side,
}

/// Everything the decoder needs from a trained parsing model.
pub trait ProbabilityModel: Send + Sync {
    fn log_prior(&self, event: &PriorEvent) -> f64;
    fn log_prob_head(&self, event: &HeadEvent) -> f64;
    fn log_prob_left_subcat(&self, event: &HeadEvent) -> f64;
    fn log_prob_right_subcat(&self, event: &HeadEvent) -> f64;
    fn log_prob_mod(&self, event: &ModifierEvent) -> f64;
    /// Probability of `event.head` heading the hidden root.
    fn log_prob_top(&self, event: &HeadEvent) -> f64;

    /// Subcat frames observed on the left of `head` under `parent`.
    fn possible_left_subcats(&self, parent: Sym, head: Sym) -> Vec<Subcat>;
    fn possible_right_subcats(&self, parent: Sym, head: Sym) -> Vec<Subcat>;

    /// Parents observed above `head` as its head child, or `None` if
    /// `head` was never a head child in training.
    fn parents_for_head(&self, head: Sym) -> Option<Vec<Sym>>;

    /// Every observed nonterminal, for when the head-to-parent map is
    /// switched off.
    fn nonterminals(&self) -> Vec<Sym>;

    /// Cheap pre-filter: can `event` possibly have nonzero probability?
    /// A model may simply answer `true` and let scoring decide.
    fn future_possible(&self, _event: &ModifierEvent) -> bool {
        true
    }

    /// Tags observed for `word`, or `None` for unknown words.
    fn tags_for_word(&self, word: Sym) -> Option<Vec<Sym>>;

    fn is_known_word(&self, word: Sym) -> bool {
        self.tags_for_word(word).is_some()
    }

    /// Orthographic feature-vector symbol standing in for an unknown word.
    fn feature_vector(&self, word: Sym) -> Sym;

    /// Fallback feature vector for words with no informative features.
    fn default_feature_vector(&self) -> Sym;
}

/// Table-lookup [`ProbabilityModel`]. Probabilities are handed in on the
/// linear scale and stored as natural logs; anything absent scores
/// [`LOG_ZERO`].
#[derive(Clone)]
pub struct TableModel {
    priors: FxHashMap<(Sym, Sym, Sym), f64>,
    heads: FxHashMap<(Sym, Sym), f64>,
    left_subcats: FxHashMap<(Sym, Sym), Vec<(Subcat, f64)>>,
    right_subcats: FxHashMap<(Sym, Sym), Vec<(Subcat, f64)>>,
    mods: FxHashMap<(Sym, Side, Sym), f64>,
    tops: FxHashMap<Sym, f64>,
    head_to_parents: FxHashMap<Sym, Vec<Sym>>,
    nonterminals: Vec<Sym>,
    nonterminal_set: FxHashSet<Sym>,
    tag_dict: FxHashMap<Sym, Vec<Sym>>,
    feature_map: FxHashMap<Sym, Sym>,
    default_fv: Sym,
}

impl TableModel {
    pub fn new(default_feature_vector: Sym) -> TableModel {
        TableModel {
            priors: FxHashMap::default(),
            heads: FxHashMap::default(),
            left_subcats: FxHashMap::default(),
            right_subcats: FxHashMap::default(),
            mods: FxHashMap::default(),
            tops: FxHashMap::default(),
            head_to_parents: FxHashMap::default(),
            nonterminals: Vec::new(),
            nonterminal_set: FxHashSet::default(),
            tag_dict: FxHashMap::default(),
            feature_map: FxHashMap::default(),
            default_fv: default_feature_vector,
        }
    }

    fn note_nonterminal(&mut self, label: Sym) {
        if self.nonterminal_set.insert(label) {
            self.nonterminals.push(label);
        }
    }

    /// p(label | word, tag) * p(word, tag), folded into one number.
    pub fn add_prior(&mut self, word: Sym, tag: Sym, label: Sym, prob: f64) {
        self.priors.insert((word, tag, label), prob.ln());
    }

    /// p(head heads parent | parent, head word).
    pub fn add_head(&mut self, parent: Sym, head: Sym, prob: f64) {
        self.heads.insert((parent, head), prob.ln());
        self.note_nonterminal(parent);
        let parents = self.head_to_parents.entry(head).or_default();
        if !parents.contains(&parent) {
            parents.push(parent);
        }
    }

    pub fn add_left_subcat(&mut self, parent: Sym, head: Sym, subcat: Subcat, prob: f64) {
        self.left_subcats
            .entry((parent, head))
            .or_default()
            .push((subcat, prob.ln()));
    }

    pub fn add_right_subcat(&mut self, parent: Sym, head: Sym, subcat: Subcat, prob: f64) {
        self.right_subcats
            .entry((parent, head))
            .or_default()
            .push((subcat, prob.ln()));
    }

    /// p(modifier | parent, side). Terminator probabilities are entered
    /// with the stop symbol as the modifier.
    pub fn add_mod(&mut self, parent: Sym, side: Side, modifier: Sym, prob: f64) {
        self.mods.insert((parent, side, modifier), prob.ln());
    }

    /// p(label heads the hidden root).
    pub fn add_top(&mut self, label: Sym, prob: f64) {
        self.tops.insert(label, prob.ln());
    }

    pub fn add_tag(&mut self, word: Sym, tag: Sym) {
        let tags = self.tag_dict.entry(word).or_default();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    pub fn set_feature_vector(&mut self, word: Sym, fv: Sym) {
        self.feature_map.insert(word, fv);
    }
}

impl ProbabilityModel for TableModel {
    fn log_prior(&self, e: &PriorEvent) -> f64 {
        self.priors
            .get(&(e.head_word.word, e.head_word.tag, e.label))
            .copied()
            .unwrap_or(LOG_ZERO)
    }

    fn log_prob_head(&self, e: &HeadEvent) -> f64 {
        self.heads.get(&(e.parent, e.head)).copied().unwrap_or(LOG_ZERO)
    }

    fn log_prob_left_subcat(&self, e: &HeadEvent) -> f64 {
        self.left_subcats
            .get(&(e.parent, e.head))
            .and_then(|list| {
                list.iter()
                    .find(|(sc, _)| *sc == e.left_subcat)
                    .map(|&(_, p)| p)
            })
            .unwrap_or(LOG_ZERO)
    }

    fn log_prob_right_subcat(&self, e: &HeadEvent) -> f64 {
        self.right_subcats
            .get(&(e.parent, e.head))
            .and_then(|list| {
                list.iter()
                    .find(|(sc, _)| *sc == e.right_subcat)
                    .map(|&(_, p)| p)
            })
            .unwrap_or(LOG_ZERO)
    }

    fn log_prob_mod(&self, e: &ModifierEvent) -> f64 {
        self.mods
            .get(&(e.parent, e.side, e.modifier))
            .copied()
            .unwrap_or(LOG_ZERO)
    }

    fn log_prob_top(&self, e: &HeadEvent) -> f64 {
        self.tops.get(&e.head).copied().unwrap_or(LOG_ZERO)
    }

    fn possible_left_subcats(&self, parent: Sym, head: Sym) -> Vec<Subcat> {
        self.left_subcats
            .get(&(parent, head))
            .map(|list| list.iter().map(|(sc, _)| sc.clone()).collect())
            .unwrap_or_default()
    }

    fn possible_right_subcats(&self, parent: Sym, head: Sym) -> Vec<Subcat> {
        self.right_subcats
            .get(&(parent, head))
            .map(|list| list.iter().map(|(sc, _)| sc.clone()).collect())
            .unwrap_or_default()
    }

    fn parents_for_head(&self, head: Sym) -> Option<Vec<Sym>> {
        self.head_to_parents.get(&head).cloned()
    }

    fn nonterminals(&self) -> Vec<Sym> {
        self.nonterminals.clone()
    }

    fn future_possible(&self, e: &ModifierEvent) -> bool {
        self.mods.contains_key(&(e.parent, e.side, e.modifier))
    }

    fn tags_for_word(&self, word: Sym) -> Option<Vec<Sym>> {
        self.tag_dict.get(&word).cloned()
    }

    fn feature_vector(&self, word: Sym) -> Sym {
        self.feature_map.get(&word).copied().unwrap_or(self.default_fv)
    }

    fn default_feature_vector(&self) -> Sym {
        self.default_fv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::SymbolTable;
    use smallvec::smallvec;

    #[test]
    fn missing_events_score_log_zero() {
        let mut syms = SymbolTable::new();
        let fv = syms.intern("+UNKNOWN+");
        let s = syms.intern("S");
        let vp = syms.intern("VP");
        let vb = syms.intern("VB");
        let barks = syms.intern("barks");
        let mut m = TableModel::new(fv);
        m.add_head(s, vp, 0.5);

        let e = HeadEvent {
            head_word: Word::new(barks, vb),
            parent: s,
            head: vp,
            left_subcat: Subcat::empty(),
            right_subcat: Subcat::empty(),
        };
        assert!((m.log_prob_head(&e) - 0.5f64.ln()).abs() < 1e-12);
        let other = HeadEvent { parent: vp, ..e.clone() };
        assert_eq!(m.log_prob_head(&other), LOG_ZERO);
        assert_eq!(m.log_prob_top(&e), LOG_ZERO);
        m.add_top(vp, 0.25);
        assert!((m.log_prob_top(&e) - 0.25f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn subcat_lists_are_per_parent_head_pair() {
        let mut syms = SymbolTable::new();
        let fv = syms.intern("+UNKNOWN+");
        let s = syms.intern("S");
        let vp = syms.intern("VP");
        let npa = syms.intern("NP-A");
        let mut m = TableModel::new(fv);
        m.add_left_subcat(s, vp, Subcat::from_labels(&[npa]), 0.9);
        m.add_left_subcat(s, vp, Subcat::empty(), 0.1);

        let subcats = m.possible_left_subcats(s, vp);
        assert_eq!(subcats.len(), 2);
        assert!(m.possible_right_subcats(s, vp).is_empty());
        assert!(m.possible_left_subcats(vp, s).is_empty());

        let e = HeadEvent {
            head_word: Word::new(syms.intern("barks"), syms.intern("VB")),
            parent: s,
            head: vp,
            left_subcat: Subcat::from_labels(&[npa]),
            right_subcat: Subcat::empty(),
        };
        assert!((m.log_prob_left_subcat(&e) - 0.9f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn mod_table_drives_future_possible() {
        let mut syms = SymbolTable::new();
        let fv = syms.intern("+UNKNOWN+");
        let s = syms.intern("S");
        let npa = syms.intern("NP-A");
        let vb = syms.intern("VB");
        let mut m = TableModel::new(fv);
        m.add_mod(s, Side::Left, npa, 0.8);

        let e = ModifierEvent {
            modifier: npa,
            mod_head_word: Word::new(syms.intern("dog"), syms.intern("NN")),
            head_word: Word::new(syms.intern("barks"), vb),
            parent: s,
            head: vb,
            prev_mods: smallvec![],
            prev_words: smallvec![],
            subcat: Subcat::from_labels(&[npa]),
            verb_intervening: false,
            side: Side::Left,
        };
        assert!(m.future_possible(&e));
        assert!((m.log_prob_mod(&e) - 0.8f64.ln()).abs() < 1e-12);
        let right = ModifierEvent { side: Side::Right, ..e };
        assert!(!m.future_possible(&right));
        assert_eq!(m.log_prob_mod(&right), LOG_ZERO);
    }

    #[test]
    fn unknown_words_fall_back_to_feature_vectors() {
        let mut syms = SymbolTable::new();
        let fv = syms.intern("+UNKNOWN+");
        let caps = syms.intern("+CAPS+");
        let nn = syms.intern("NN");
        let dog = syms.intern("dog");
        let xylem = syms.intern("Xylem");
        let mut m = TableModel::new(fv);
        m.add_tag(dog, nn);
        m.add_tag(caps, nn);
        m.set_feature_vector(xylem, caps);

        assert!(m.is_known_word(dog));
        assert!(!m.is_known_word(xylem));
        assert_eq!(m.feature_vector(xylem), caps);
        assert_eq!(m.feature_vector(syms.intern("blorp")), fv);
        assert_eq!(m.tags_for_word(caps), Some(vec![nn]));
        assert_eq!(m.default_feature_vector(), fv);
    }
}
