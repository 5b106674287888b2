//! Output derivation trees.

use crate::grammar::{Side, Sym, SymbolTable};
use crate::item::{ItemArena, ItemId};

/// A completed derivation, detached from the chart.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ParseTree {
    Leaf { word: Sym, tag: Sym },
    Node { label: Sym, children: Vec<ParseTree> },
}

impl ParseTree {
    /// Read the derivation rooted at `id` out of the arena. Preterminal
    /// leaves take their word form from `original_words` (unknown words
    /// are decoded via feature vectors; the output keeps the real word).
    pub fn from_item(arena: &ItemArena, id: ItemId, original_words: &[Sym]) -> ParseTree {
        let item = &arena[id];
        if item.is_preterminal() {
            let word = original_words
                .get(item.start)
                .copied()
                .unwrap_or(item.head_word.word);
            return ParseTree::Leaf {
                word,
                tag: item.label,
            };
        }
        // Left modifiers are consed most-recent-first, which for the left
        // side is leftmost-first; the right list needs reversing.
        let mut children = Vec::new();
        for child in arena.child_items(item.children(Side::Left)) {
            children.push(ParseTree::from_item(arena, child, original_words));
        }
        if let Some(hc) = item.head_child {
            children.push(ParseTree::from_item(arena, hc, original_words));
        }
        let right: Vec<ParseTree> = arena
            .child_items(item.children(Side::Right))
            .map(|c| ParseTree::from_item(arena, c, original_words))
            .collect();
        children.extend(right.into_iter().rev());
        ParseTree::Node {
            label: item.label,
            children,
        }
    }

    pub fn label(&self) -> Sym {
        match self {
            ParseTree::Leaf { tag, .. } => *tag,
            ParseTree::Node { label, .. } => *label,
        }
    }

    /// Bracketed rendering, `(S (NP (DT the) (NN dog)) (VP (VB barks)))`.
    pub fn render(&self, syms: &SymbolTable) -> String {
        let mut out = String::new();
        self.render_into(syms, &mut out);
        out
    }

    fn render_into(&self, syms: &SymbolTable, out: &mut String) {
        match self {
            ParseTree::Leaf { word, tag } => {
                out.push('(');
                out.push_str(syms.resolve(*tag));
                out.push(' ');
                out.push_str(syms.resolve(*word));
                out.push(')');
            }
            ParseTree::Node { label, children } => {
                out.push('(');
                out.push_str(syms.resolve(*label));
                for child in children {
                    out.push(' ');
                    child.render_into(syms, out);
                }
                out.push(')');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Word;
    use crate::item::tests::leaf;

    #[test]
    fn extraction_orders_left_head_right() {
        let mut syms = SymbolTable::new();
        let dt = syms.intern("DT");
        let nn = syms.intern("NN");
        let jj = syms.intern("JJ");
        let cd = syms.intern("CD");
        let npb = syms.intern("NPB");
        let the = syms.intern("the");
        let big = syms.intern("big");
        let dog = syms.intern("dog");
        let two = syms.intern("2");

        let mut arena = ItemArena::new();
        let the_id = arena.insert(leaf(dt, Word::new(the, dt), 0));
        let big_id = arena.insert(leaf(jj, Word::new(big, jj), 1));
        let dog_id = arena.insert(leaf(nn, Word::new(dog, nn), 2));
        let two_id = arena.insert(leaf(cd, Word::new(two, cd), 3));

        // Attached big first, then the: list order is [the, big], which
        // already reads left to right.
        let l1 = arena.cons(big_id, None);
        let l2 = arena.cons(the_id, Some(l1));
        let r1 = arena.cons(two_id, None);

        let mut np = leaf(npb, Word::new(dog, nn), 0);
        np.end = 3;
        np.head_child = Some(dog_id);
        np.head_label = Some(nn);
        np.left_children = Some(l2);
        np.right_children = Some(r1);
        let np_id = arena.insert(np);

        let words = [the, big, dog, two];
        let tree = ParseTree::from_item(&arena, np_id, &words);
        assert_eq!(
            tree.render(&syms),
            "(NPB (DT the) (JJ big) (NN dog) (CD 2))"
        );
        assert_eq!(tree.label(), npb);
    }

    #[test]
    fn leaves_restore_original_words() {
        let mut syms = SymbolTable::new();
        let nn = syms.intern("NN");
        let fv = syms.intern("+CAPS+");
        let xylem = syms.intern("Xylem");
        let mut arena = ItemArena::new();
        // Decoded with the feature vector standing in for the word.
        let id = arena.insert(leaf(nn, Word::new(fv, nn), 0));
        let tree = ParseTree::from_item(&arena, id, &[xylem]);
        assert_eq!(tree.render(&syms), "(NN Xylem)");
    }
}
