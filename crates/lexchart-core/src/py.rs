use crate::config::{DecoderConfig, EquivalenceChoice};
use crate::decoder::Decoder;
use crate::grammar::{DefaultShifter, Side, SymbolTable, Treebank, TreebankDef};
use crate::item::Subcat;
use crate::model::TableModel;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn parse_side(side: &str) -> PyResult<Side> {
    match side {
        "left" => Ok(Side::Left),
        "right" => Ok(Side::Right),
        other => Err(PyValueError::new_err(format!(
            "side must be \"left\" or \"right\", got {other:?}"
        ))),
    }
}

fn parse_policy(policy: &str) -> PyResult<EquivalenceChoice> {
    match policy {
        "full" => Ok(EquivalenceChoice::FullContext),
        "base_np" => Ok(EquivalenceChoice::BaseNpAware),
        "mapped" => Ok(EquivalenceChoice::MappedPrevMod),
        "identity" => Ok(EquivalenceChoice::Identity),
        other => Err(PyValueError::new_err(format!(
            "unknown equivalence policy {other:?}"
        ))),
    }
}

/// Incrementally assembled grammar and model. Probabilities are linear;
/// they are logged on the Rust side. Call `build()` to get a `Parser`.
#[pyclass]
pub struct GrammarBuilder {
    symbols: SymbolTable,
    tb: TreebankDef,
    model: TableModel,
}

#[pymethods]
impl GrammarBuilder {
    #[new]
    #[pyo3(signature = (default_feature_vector="+UNKNOWN+"))]
    fn new(default_feature_vector: &str) -> Self {
        let mut symbols = SymbolTable::new();
        let tb = TreebankDef::new(&mut symbols);
        let fv = symbols.intern(default_feature_vector);
        GrammarBuilder {
            symbols,
            tb,
            model: TableModel::new(fv),
        }
    }

    fn add_tag(&mut self, word: &str, tag: &str) {
        let word = self.symbols.intern(word);
        let tag = self.symbols.intern(tag);
        self.model.add_tag(word, tag);
    }

    fn add_prior(&mut self, word: &str, tag: &str, label: &str, prob: f64) {
        let word = self.symbols.intern(word);
        let tag = self.symbols.intern(tag);
        let label = self.symbols.intern(label);
        self.model.add_prior(word, tag, label, prob);
    }

    fn add_head(&mut self, parent: &str, head: &str, prob: f64) {
        let parent = self.symbols.intern(parent);
        let head = self.symbols.intern(head);
        self.model.add_head(parent, head, prob);
    }

    fn add_subcat(
        &mut self,
        parent: &str,
        head: &str,
        side: &str,
        labels: Vec<String>,
        prob: f64,
    ) -> PyResult<()> {
        let side = parse_side(side)?;
        let parent = self.symbols.intern(parent);
        let head = self.symbols.intern(head);
        let labels: Vec<_> = labels.iter().map(|l| self.symbols.intern(l)).collect();
        let subcat = Subcat::from_labels(&labels);
        match side {
            Side::Left => self.model.add_left_subcat(parent, head, subcat, prob),
            Side::Right => self.model.add_right_subcat(parent, head, subcat, prob),
        }
        Ok(())
    }

    fn add_modifier(
        &mut self,
        parent: &str,
        side: &str,
        modifier: &str,
        prob: f64,
    ) -> PyResult<()> {
        let side = parse_side(side)?;
        let parent = self.symbols.intern(parent);
        let modifier = self.symbols.intern(modifier);
        self.model.add_mod(parent, side, modifier, prob);
        Ok(())
    }

    /// Probability of generating no further modifiers on `side`.
    fn add_stop(&mut self, parent: &str, side: &str, prob: f64) -> PyResult<()> {
        let side = parse_side(side)?;
        let parent = self.symbols.intern(parent);
        let stop = self.tb.stop_sym();
        self.model.add_mod(parent, side, stop, prob);
        Ok(())
    }

    fn add_top(&mut self, label: &str, prob: f64) {
        let label = self.symbols.intern(label);
        self.model.add_top(label, prob);
    }

    fn set_feature_vector(&mut self, word: &str, feature_vector: &str) {
        let word = self.symbols.intern(word);
        let fv = self.symbols.intern(feature_vector);
        self.model.set_feature_vector(word, fv);
    }

    fn mark_base_np(&mut self, label: &str) {
        let label = self.symbols.intern(label);
        self.tb.add_base_np(label);
    }

    fn mark_verb_tag(&mut self, tag: &str) {
        let tag = self.symbols.intern(tag);
        self.tb.add_verb_tag(tag);
    }

    fn mark_punctuation_tag(&mut self, tag: &str) {
        let tag = self.symbols.intern(tag);
        self.tb.add_punctuation_tag(tag);
    }

    fn mark_conjunction_tag(&mut self, tag: &str) {
        let tag = self.symbols.intern(tag);
        self.tb.add_conjunction_tag(tag);
    }

    fn mark_comma_word(&mut self, word: &str) {
        let word = self.symbols.intern(word);
        self.tb.add_comma_word(word);
    }

    fn mark_paren_words(&mut self, left: &str, right: &str) {
        let left = self.symbols.intern(left);
        let right = self.symbols.intern(right);
        self.tb.add_left_paren_word(left);
        self.tb.add_right_paren_word(right);
    }

    fn mark_argument(&mut self, label: &str) {
        let label = self.symbols.intern(label);
        self.tb.add_argument(label);
    }

    fn map_prev_mod(&mut self, from: &str, to: &str) {
        let from = self.symbols.intern(from);
        let to = self.symbols.intern(to);
        self.tb.add_prev_mod_mapping(from, to);
    }

    #[pyo3(signature = (
        k_best=1,
        prune_factor=None,
        max_prune_factor=None,
        cell_limit=0,
        max_sentence_len=120,
        max_parse_seconds=None,
        use_comma_constraint=true,
        relax_constraints=true,
        policy="base_np",
    ))]
    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        k_best: usize,
        prune_factor: Option<f64>,
        max_prune_factor: Option<f64>,
        cell_limit: usize,
        max_sentence_len: usize,
        max_parse_seconds: Option<f64>,
        use_comma_constraint: bool,
        relax_constraints: bool,
        policy: &str,
    ) -> PyResult<Parser> {
        let mut config = DecoderConfig::default();
        config.k_best = k_best;
        if let Some(pf) = prune_factor {
            config.prune_factor = pf;
        }
        if let Some(pf) = max_prune_factor {
            config.max_prune_factor = pf;
        }
        config.cell_limit = cell_limit;
        config.max_sentence_len = max_sentence_len;
        config.max_parse_time = max_parse_seconds.map(Duration::from_secs_f64);
        config.use_comma_constraint = use_comma_constraint;
        config.relax_constraints_after_beam_widening = relax_constraints;
        config.policy = parse_policy(policy)?;

        let decoder = Decoder::new(
            config,
            self.symbols.clone(),
            Arc::new(self.model.clone()),
            Arc::new(self.tb.clone()),
            Arc::new(DefaultShifter),
        );
        Ok(Parser { decoder })
    }
}

/// Counters from the most recent parse.
#[pyclass]
pub struct PyDecodeStats {
    #[pyo3(get)]
    pub beam_iterations: u32,
    #[pyo3(get)]
    pub relaxed: bool,
    #[pyo3(get)]
    pub timed_out: bool,
    #[pyo3(get)]
    pub items_generated: u64,
    #[pyo3(get)]
    pub items_added: u64,
    #[pyo3(get)]
    pub items_pruned: u64,
    #[pyo3(get)]
    pub recombinations: u64,
    #[pyo3(get)]
    pub wall_ms: f64,
}

#[pymethods]
impl PyDecodeStats {
    fn __repr__(&self) -> String {
        format!(
            "DecodeStats(\n\
             \x20 wall={:.1}ms, beam_iterations={}, relaxed={}, timed_out={}\n\
             \x20 items: generated={}, added={}, pruned={}\n\
             \x20 recombinations={}\n\
             )",
            self.wall_ms,
            self.beam_iterations,
            self.relaxed,
            self.timed_out,
            self.items_generated,
            self.items_added,
            self.items_pruned,
            self.recombinations,
        )
    }
}

/// A ready-to-use parser. Results are rendered as S-expressions.
#[pyclass]
pub struct Parser {
    decoder: Decoder,
}

#[pymethods]
impl Parser {
    /// Best parse of `words`, or `None` if the sentence has no parse.
    fn parse(&mut self, words: Vec<String>) -> PyResult<Option<String>> {
        let refs: Vec<&str> = words.iter().map(String::as_str).collect();
        let tree = self
            .decoder
            .parse(&refs)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        Ok(tree.map(|t| t.render(self.decoder.symbols())))
    }

    /// Up to `k_best` parses as `(tree, log_prob, num_parses)` tuples,
    /// best first. `tags` optionally supplies candidate tags per word.
    #[pyo3(signature = (words, tags=None))]
    fn parse_k_best(
        &mut self,
        words: Vec<String>,
        tags: Option<Vec<Vec<String>>>,
    ) -> PyResult<Vec<(String, f64, u64)>> {
        let refs: Vec<&str> = words.iter().map(String::as_str).collect();
        let tag_refs: Option<Vec<Vec<&str>>> = tags.as_ref().map(|ts| {
            ts.iter()
                .map(|t| t.iter().map(String::as_str).collect())
                .collect()
        });
        let parses = self
            .decoder
            .parse_k_best(&refs, tag_refs.as_deref(), None)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        Ok(parses
            .into_iter()
            .map(|p| {
                (
                    p.tree.render(self.decoder.symbols()),
                    p.log_prob,
                    p.num_parses,
                )
            })
            .collect())
    }

    fn stats(&self) -> PyDecodeStats {
        let s = self.decoder.stats();
        PyDecodeStats {
            beam_iterations: s.beam_iterations,
            relaxed: s.relaxed,
            timed_out: s.timed_out,
            items_generated: s.items_generated,
            items_added: s.items_added,
            items_pruned: s.items_pruned,
            recombinations: s.recombinations,
            wall_ms: s.wall.as_secs_f64() * 1000.0,
        }
    }
}
