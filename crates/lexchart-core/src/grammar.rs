//! Symbols and language-specific metadata.
//!
//! Every nonterminal label, part-of-speech tag, and word form is interned
//! into a single [`SymbolTable`] and handled as a plain `u32` everywhere
//! else. The [`Treebank`] trait answers the label-class questions the
//! decoder asks (is this a base NP? a verb tag? an argument?), and
//! [`Shifter`] decides which modifiers are transparent when building
//! modifier histories.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Interned symbol id. Labels, tags, and word forms all share one space.
pub type Sym = u32;

/// A lexical head: word form plus part-of-speech tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Word {
    pub word: Sym,
    pub tag: Sym,
}

impl Word {
    pub fn new(word: Sym, tag: Sym) -> Word {
        Word { word, tag }
    }
}

/// Which side of the head a modifier attaches on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Side {
    Left,
    Right,
}

/// String interner. Symbols are dense u32 ids in insertion order.
#[derive(Clone, Default, Debug)]
pub struct SymbolTable {
    map: FxHashMap<String, Sym>,
    names: Vec<String>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    pub fn intern(&mut self, name: &str) -> Sym {
        if let Some(&id) = self.map.get(name) {
            return id;
        }
        let id = self.names.len() as Sym;
        self.names.push(name.to_owned());
        self.map.insert(name.to_owned(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<Sym> {
        self.map.get(name).copied()
    }

    pub fn resolve(&self, sym: Sym) -> &str {
        &self.names[sym as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Language- and annotation-specific label classes.
///
/// The decoder never inspects label strings; everything it needs to know
/// about a label or word form comes through here.
pub trait Treebank: Send + Sync {
    /// Base NPs get special treatment in recombination, the comma
    /// constraint, and verb propagation.
    fn is_base_np(&self, label: Sym) -> bool;

    /// Tags whose presence makes a subtree "contain a verb".
    fn is_verb_tag(&self, tag: Sym) -> bool;

    fn is_punctuation_tag(&self, tag: Sym) -> bool;

    /// Coordinating-conjunction tags; positions covered by one license
    /// commas under the comma constraint.
    fn is_conjunction_tag(&self, tag: Sym) -> bool;

    fn is_comma_word(&self, word: Sym) -> bool;
    fn is_left_paren_word(&self, word: Sym) -> bool;
    fn is_right_paren_word(&self, word: Sym) -> bool;

    /// Argument (complement) labels, as marked by the trainer. These are
    /// the labels subcat frames are made of.
    fn is_argument(&self, label: Sym) -> bool;

    /// Coarsening applied to modifier labels before they enter a
    /// previous-modifier history under the mapped equivalence policy.
    fn map_prev_mod(&self, label: Sym) -> Sym {
        label
    }

    /// Synthetic boundary symbol at the start of a modifier sequence.
    fn start_sym(&self) -> Sym;
    /// Synthetic terminator symbol for modifier sequences.
    fn stop_sym(&self) -> Sym;
    /// Hidden root label.
    fn top_sym(&self) -> Sym;

    fn start_word(&self) -> Word;
    fn stop_word(&self) -> Word;
}

/// Table-driven [`Treebank`] built at grammar-load time.
#[derive(Clone, Debug)]
pub struct TreebankDef {
    base_np_labels: FxHashSet<Sym>,
    verb_tags: FxHashSet<Sym>,
    punctuation_tags: FxHashSet<Sym>,
    conjunction_tags: FxHashSet<Sym>,
    comma_words: FxHashSet<Sym>,
    left_paren_words: FxHashSet<Sym>,
    right_paren_words: FxHashSet<Sym>,
    argument_labels: FxHashSet<Sym>,
    prev_mod_map: FxHashMap<Sym, Sym>,
    start: Sym,
    stop: Sym,
    top: Sym,
    start_word: Word,
    stop_word: Word,
}

impl TreebankDef {
    /// Interns the boundary symbols and returns an otherwise empty
    /// definition; populate the label classes with the `add_*` methods.
    pub fn new(symbols: &mut SymbolTable) -> TreebankDef {
        let start = symbols.intern("+START+");
        let stop = symbols.intern("+STOP+");
        let top = symbols.intern("+TOP+");
        TreebankDef {
            base_np_labels: FxHashSet::default(),
            verb_tags: FxHashSet::default(),
            punctuation_tags: FxHashSet::default(),
            conjunction_tags: FxHashSet::default(),
            comma_words: FxHashSet::default(),
            left_paren_words: FxHashSet::default(),
            right_paren_words: FxHashSet::default(),
            argument_labels: FxHashSet::default(),
            prev_mod_map: FxHashMap::default(),
            start,
            stop,
            top,
            start_word: Word::new(start, start),
            stop_word: Word::new(stop, stop),
        }
    }

    pub fn add_base_np(&mut self, label: Sym) {
        self.base_np_labels.insert(label);
    }

    pub fn add_verb_tag(&mut self, tag: Sym) {
        self.verb_tags.insert(tag);
    }

    pub fn add_punctuation_tag(&mut self, tag: Sym) {
        self.punctuation_tags.insert(tag);
    }

    pub fn add_conjunction_tag(&mut self, tag: Sym) {
        self.conjunction_tags.insert(tag);
    }

    pub fn add_comma_word(&mut self, word: Sym) {
        self.comma_words.insert(word);
    }

    pub fn add_left_paren_word(&mut self, word: Sym) {
        self.left_paren_words.insert(word);
    }

    pub fn add_right_paren_word(&mut self, word: Sym) {
        self.right_paren_words.insert(word);
    }

    pub fn add_argument(&mut self, label: Sym) {
        self.argument_labels.insert(label);
    }

    pub fn add_prev_mod_mapping(&mut self, from: Sym, to: Sym) {
        self.prev_mod_map.insert(from, to);
    }
}

impl Treebank for TreebankDef {
    fn is_base_np(&self, label: Sym) -> bool {
        self.base_np_labels.contains(&label)
    }

    fn is_verb_tag(&self, tag: Sym) -> bool {
        self.verb_tags.contains(&tag)
    }

    fn is_punctuation_tag(&self, tag: Sym) -> bool {
        self.punctuation_tags.contains(&tag)
    }

    fn is_conjunction_tag(&self, tag: Sym) -> bool {
        self.conjunction_tags.contains(&tag)
    }

    fn is_comma_word(&self, word: Sym) -> bool {
        self.comma_words.contains(&word)
    }

    fn is_left_paren_word(&self, word: Sym) -> bool {
        self.left_paren_words.contains(&word)
    }

    fn is_right_paren_word(&self, word: Sym) -> bool {
        self.right_paren_words.contains(&word)
    }

    fn is_argument(&self, label: Sym) -> bool {
        self.argument_labels.contains(&label)
    }

    fn map_prev_mod(&self, label: Sym) -> Sym {
        self.prev_mod_map.get(&label).copied().unwrap_or(label)
    }

    fn start_sym(&self) -> Sym {
        self.start
    }

    fn stop_sym(&self) -> Sym {
        self.stop
    }

    fn top_sym(&self) -> Sym {
        self.top
    }

    fn start_word(&self) -> Word {
        self.start_word
    }

    fn stop_word(&self) -> Word {
        self.stop_word
    }
}

/// Decides which already-attached modifiers are invisible when the decoder
/// reconstructs the previous-modifier history of an item.
pub trait Shifter: Send + Sync {
    /// Skip `prev_mod` (a modifier label) in the history of an item
    /// labeled `item_label`?
    fn skip_label(&self, item_label: Sym, prev_mod: Sym) -> bool;

    /// Skip `prev_word` (a modifier head word) in the history of an item
    /// labeled `item_label`?
    fn skip_word(&self, item_label: Sym, prev_word: &Word) -> bool;
}

/// Every modifier counts.
#[derive(Clone, Copy, Default, Debug)]
pub struct DefaultShifter;

impl Shifter for DefaultShifter {
    fn skip_label(&self, _item_label: Sym, _prev_mod: Sym) -> bool {
        false
    }

    fn skip_word(&self, _item_label: Sym, _prev_word: &Word) -> bool {
        false
    }
}

/// Punctuation inside a base NP is transparent to modifier histories.
#[derive(Clone)]
pub struct BaseNpShifter {
    tb: Arc<dyn Treebank>,
}

impl BaseNpShifter {
    pub fn new(tb: Arc<dyn Treebank>) -> BaseNpShifter {
        BaseNpShifter { tb }
    }
}

impl Shifter for BaseNpShifter {
    fn skip_label(&self, item_label: Sym, prev_mod: Sym) -> bool {
        self.tb.is_base_np(item_label) && self.tb.is_punctuation_tag(prev_mod)
    }

    fn skip_word(&self, item_label: Sym, prev_word: &Word) -> bool {
        self.tb.is_base_np(item_label) && self.tb.is_punctuation_tag(prev_word.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut syms = SymbolTable::new();
        let a = syms.intern("NP");
        let b = syms.intern("VP");
        assert_ne!(a, b);
        assert_eq!(syms.intern("NP"), a);
        assert_eq!(syms.resolve(b), "VP");
        assert_eq!(syms.lookup("S"), None);
        assert_eq!(syms.len(), 2);
    }

    #[test]
    fn treebank_def_classes_and_boundaries() {
        let mut syms = SymbolTable::new();
        let mut tb = TreebankDef::new(&mut syms);
        let npb = syms.intern("NPB");
        let vb = syms.intern("VB");
        let comma = syms.intern(",");
        tb.add_base_np(npb);
        tb.add_verb_tag(vb);
        tb.add_comma_word(comma);

        assert!(tb.is_base_np(npb));
        assert!(!tb.is_base_np(vb));
        assert!(tb.is_verb_tag(vb));
        assert!(tb.is_comma_word(comma));
        assert_eq!(syms.resolve(tb.top_sym()), "+TOP+");
        assert_eq!(tb.start_word().tag, tb.start_sym());
        // Unmapped labels map to themselves.
        assert_eq!(tb.map_prev_mod(npb), npb);
        let np = syms.intern("NP");
        tb.add_prev_mod_mapping(npb, np);
        assert_eq!(tb.map_prev_mod(npb), np);
    }

    #[test]
    fn base_np_shifter_skips_punctuation_only_inside_base_nps() {
        let mut syms = SymbolTable::new();
        let mut tb = TreebankDef::new(&mut syms);
        let npb = syms.intern("NPB");
        let s = syms.intern("S");
        let comma_tag = syms.intern(",");
        let nn = syms.intern("NN");
        tb.add_base_np(npb);
        tb.add_punctuation_tag(comma_tag);

        let shifter = BaseNpShifter::new(Arc::new(tb));
        assert!(shifter.skip_label(npb, comma_tag));
        assert!(!shifter.skip_label(s, comma_tag));
        assert!(!shifter.skip_label(npb, nn));
        let w = Word::new(nn, comma_tag);
        assert!(shifter.skip_word(npb, &w));
        assert!(!shifter.skip_word(s, &w));
    }
}
