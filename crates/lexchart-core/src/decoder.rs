//! The decoder: bottom-up span-filling search over the chart.
//!
//! One `Decoder` parses one sentence at a time. The outer loop is beam
//! widening: run the full span-filling pass at the current prune factor,
//! and if no root item appears, widen the beam and retry from the seeds,
//! finally (optionally) relaxing hard probability constraints for one
//! last pass. Within a pass, spans are filled smallest-first; each span
//! runs modifier attachment over every split point, then the unary/stop
//! fixed point, then pruning.

use crate::chart::Chart;
use crate::config::DecoderConfig;
use crate::constraints::ConstraintSet;
use crate::error::ParseError;
use crate::grammar::{Shifter, Side, Sym, SymbolTable, Treebank, Word};
use crate::item::{
    compute_contains_verb, ChartItem, ChildId, ItemId, PrevMods, PrevWords, Subcat,
};
use crate::model::{
    HeadEvent, ModifierEvent, PriorEvent, ProbabilityModel, LOG_PROB_CERTAIN, LOG_PROB_SMALL,
    LOG_ZERO,
};
use crate::policy::make_policy;
use crate::tree::ParseTree;
use log::{debug, warn};
use smallvec::smallvec;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One ranked result of a parse.
#[derive(Clone, Debug)]
pub struct ScoredParse {
    pub tree: ParseTree,
    /// Log probability of the winning derivation (inside the root).
    pub log_prob: f64,
    /// Number of distinct derivations recombined into this result.
    pub num_parses: u64,
}

/// Counters for the most recent parse.
#[derive(Clone, Copy, Default, Debug)]
pub struct DecodeStats {
    /// Beam-widening attempts, including the relaxed pass.
    pub beam_iterations: u32,
    /// The relaxed-constraint pass was reached.
    pub relaxed: bool,
    /// At least one span-filling pass hit the time budget.
    pub timed_out: bool,
    /// Candidate items built (whether or not the chart kept them).
    pub items_generated: u64,
    /// Items accepted into some cell.
    pub items_added: u64,
    /// Items rejected or removed by the beam.
    pub items_pruned: u64,
    /// Recombination events.
    pub recombinations: u64,
    pub wall: Duration,
}

/// Sentinel for the cooperative timeout check.
struct TimedOut;

pub struct Decoder {
    config: DecoderConfig,
    model: Arc<dyn ProbabilityModel>,
    tb: Arc<dyn Treebank>,
    shifter: Arc<dyn Shifter>,
    symbols: SymbolTable,
    chart: Chart,
    stats: DecodeStats,
    // Per-sentence state.
    sent_len: usize,
    original_words: Vec<Sym>,
    /// Lexical forms used for conditioning; unknown words are replaced
    /// by their feature vectors here.
    words: Vec<Sym>,
    comma_for_pruning: Vec<bool>,
    conj_for_pruning: Vec<bool>,
    relaxed: bool,
    start_time: Instant,
}

impl Decoder {
    pub fn new(
        config: DecoderConfig,
        symbols: SymbolTable,
        model: Arc<dyn ProbabilityModel>,
        tb: Arc<dyn Treebank>,
        shifter: Arc<dyn Shifter>,
    ) -> Decoder {
        let policy = make_policy(
            config.policy,
            tb.clone(),
            shifter.clone(),
            config.num_prev_words,
        );
        let chart = Chart::new(policy, config.prune_factor, config.cell_limit);
        Decoder {
            config,
            model,
            tb,
            shifter,
            symbols,
            chart,
            stats: DecodeStats::default(),
            sent_len: 0,
            original_words: Vec::new(),
            words: Vec::new(),
            comma_for_pruning: Vec::new(),
            conj_for_pruning: Vec::new(),
            relaxed: false,
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Parse and return the single best tree, or `None` if the sentence
    /// has no parse.
    pub fn parse(&mut self, words: &[&str]) -> Result<Option<ParseTree>, ParseError> {
        let mut parses = self.parse_k_best(words, None, None)?;
        Ok(if parses.is_empty() {
            None
        } else {
            Some(parses.swap_remove(0).tree)
        })
    }

    /// Parse with per-word candidate tag lists (used for unknown words,
    /// or for every word under `use_only_supplied_tags`).
    pub fn parse_tagged(
        &mut self,
        words: &[&str],
        tags: &[Vec<&str>],
    ) -> Result<Option<ParseTree>, ParseError> {
        let mut parses = self.parse_k_best(words, Some(tags), None)?;
        Ok(if parses.is_empty() {
            None
        } else {
            Some(parses.swap_remove(0).tree)
        })
    }

    /// Full-control entry point: optional supplied tags, optional
    /// guidance constraints, up to `k_best` results, best first.
    pub fn parse_k_best(
        &mut self,
        words: &[&str],
        tags: Option<&[Vec<&str>]>,
        constraints: Option<&dyn ConstraintSet>,
    ) -> Result<Vec<ScoredParse>, ParseError> {
        let n = words.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        if n > self.config.max_sentence_len {
            return Err(ParseError::SentenceTooLong {
                len: n,
                max: self.config.max_sentence_len,
            });
        }
        if let Some(tags) = tags {
            if tags.len() != n {
                return Err(ParseError::TagSequenceLength {
                    words: n,
                    tags: tags.len(),
                });
            }
        }

        let tag_syms: Option<Vec<Vec<Sym>>> = tags.map(|ts| {
            ts.iter()
                .map(|t| t.iter().map(|s| self.symbols.intern(s)).collect())
                .collect()
        });

        self.start_time = Instant::now();
        self.stats = DecodeStats::default();
        self.relaxed = false;
        self.sent_len = n;
        self.original_words = words.iter().map(|w| self.symbols.intern(w)).collect();
        self.words = self.original_words.clone();
        self.set_comma_constraint_data();

        self.chart.set_size(n);
        self.chart.set_prune_factor(self.config.prune_factor);
        self.chart.set_relaxed(false);

        let result = self.decode(tag_syms.as_deref(), constraints);

        self.stats.wall = self.start_time.elapsed();
        self.stats.items_added = self.chart.stats.added;
        self.stats.items_pruned = self.chart.stats.pruned + self.chart.stats.rejected;
        self.stats.recombinations =
            self.chart.stats.recombined_won + self.chart.stats.recombined_lost;
        self.chart.post_parse_cleanup();
        Ok(result)
    }

    // ---- the outer beam-widening loop ----

    fn decode(
        &mut self,
        tags: Option<&[Vec<Sym>]>,
        cs: Option<&dyn ConstraintSet>,
    ) -> Vec<ScoredParse> {
        let n = self.sent_len;
        let increment = self.config.prune_factor_increment;
        // Half-increment guard so float round-off cannot skip the last
        // widening step.
        let limit = self.config.max_prune_factor + increment / 2.0;

        loop {
            self.stats.beam_iterations += 1;
            if self.stats.beam_iterations == 1 {
                self.seed_chart(tags, cs);
            } else {
                self.chart.clear_non_preterminals();
            }
            for i in 0..n {
                self.add_unaries_and_stop_probs(i, i, cs);
            }

            'spans: for span in 2..=n {
                for start in 0..=(n - span) {
                    if let Err(TimedOut) = self.complete(start, start + span - 1, cs) {
                        self.stats.timed_out = true;
                        debug!(
                            "parse time budget exhausted at span {}, keeping partial chart",
                            span
                        );
                        break 'spans;
                    }
                }
            }

            self.chart.reset_top_log_prob(0, n - 1);
            self.add_top_unaries(cs);
            let tops = self.collect_top_items();
            if !tops.is_empty() {
                return self.finish(tops);
            }

            let next = self.chart.prune_factor() + increment;
            if next < limit {
                debug!("no parse; widening beam margin to {:.3}", next);
                self.chart.set_prune_factor(next);
            } else if self.config.relax_constraints_after_beam_widening && !self.relaxed {
                debug!("no parse at widest beam; relaxing hard constraints");
                self.relaxed = true;
                self.stats.relaxed = true;
                self.chart.set_relaxed(true);
            } else {
                debug!("no parse");
                return Vec::new();
            }
        }
    }

    fn collect_top_items(&self) -> Vec<ItemId> {
        let top = self.tb.top_sym();
        self.chart
            .cell_items(0, self.sent_len - 1)
            .into_iter()
            .filter(|&id| self.chart.item(id).label == top)
            .collect()
    }

    fn finish(&self, tops: Vec<ItemId>) -> Vec<ScoredParse> {
        let k = self.config.k_best.max(1);
        let arena = self.chart.arena();
        let mut out = Vec::with_capacity(k.min(tops.len()));
        for id in tops.into_iter().take(k) {
            let item = self.chart.item(id);
            if let Some(hc) = item.head_child {
                out.push(ScoredParse {
                    tree: ParseTree::from_item(arena, hc, &self.original_words),
                    log_prob: item.log_prob,
                    num_parses: item.num_parses,
                });
            }
        }
        out
    }

    // ---- probability gating ----

    /// Zero probabilities reject under hard constraints and are floored
    /// under relaxed constraints.
    fn gate(&self, log_prob: f64) -> Option<f64> {
        if log_prob > LOG_ZERO {
            Some(log_prob)
        } else if self.relaxed {
            Some(LOG_PROB_SMALL)
        } else {
            None
        }
    }

    fn check_time(&self) -> Result<(), TimedOut> {
        match self.config.max_parse_time {
            Some(budget) if self.start_time.elapsed() > budget => Err(TimedOut),
            _ => Ok(()),
        }
    }

    /// Build the item in the arena and offer it to the chart, releasing
    /// the slot if the chart declines it.
    fn offer(&mut self, start: usize, end: usize, item: ChartItem) -> Option<ItemId> {
        self.stats.items_generated += 1;
        let id = self.chart.new_item(item);
        if self.chart.add(start, end, id) {
            Some(id)
        } else {
            self.chart.release(id);
            None
        }
    }

    fn start_mods(&self) -> PrevMods {
        smallvec![self.tb.start_sym(); self.config.num_prev_mods]
    }

    // ---- seeding ----

    fn set_comma_constraint_data(&mut self) {
        let n = self.sent_len;
        self.comma_for_pruning = vec![false; n];
        self.conj_for_pruning = vec![false; n];
        let mut paren_depth = 0i32;
        for i in 0..n {
            let w = self.original_words[i];
            if self.tb.is_left_paren_word(w) {
                paren_depth += 1;
            } else if self.tb.is_right_paren_word(w) {
                paren_depth -= 1;
            } else if paren_depth == 0 && self.tb.is_comma_word(w) {
                self.comma_for_pruning[i] = true;
            }
        }
    }

    fn tag_set(&self, i: usize, tags: Option<&[Vec<Sym>]>) -> Vec<Sym> {
        if self.config.use_only_supplied_tags {
            if let Some(tags) = tags {
                return tags[i].clone();
            }
        }
        let orig = self.original_words[i];
        if let Some(observed) = self.model.tags_for_word(orig) {
            return observed;
        }
        // Unknown word: supplied tags take precedence, then tags observed
        // for the feature vector, then the default feature vector's tags.
        if let Some(tags) = tags {
            if !tags[i].is_empty() {
                return tags[i].clone();
            }
        }
        let fv = self.model.feature_vector(orig);
        if let Some(observed) = self.model.tags_for_word(fv) {
            return observed;
        }
        self.model
            .tags_for_word(self.model.default_feature_vector())
            .unwrap_or_default()
    }

    fn seed_chart(&mut self, tags: Option<&[Vec<Sym>]>, cs: Option<&dyn ConstraintSet>) {
        for i in 0..self.sent_len {
            let orig = self.original_words[i];
            if !self.model.is_known_word(orig) {
                self.words[i] = self.model.feature_vector(orig);
            }
            let word_repr = self.words[i];

            let tag_list = self.tag_set(i, tags);
            if tag_list.is_empty() {
                warn!("no candidate tags for word {:?}", self.symbols.resolve(orig));
                continue;
            }
            let last = tag_list.len() - 1;
            let mut added_any = false;
            for (k, &tag) in tag_list.iter().enumerate() {
                if self.tb.is_conjunction_tag(tag) {
                    self.conj_for_pruning[i] = true;
                }
                let head_word = Word::new(word_repr, tag);
                let mut log_prior = self.model.log_prior(&PriorEvent {
                    head_word,
                    label: tag,
                });
                if log_prior <= LOG_ZERO {
                    // Escape hatch for never-observed pairings: when the
                    // relaxed pass is configured and no other tag seeded
                    // this word, floor the last candidate's prior.
                    if self.config.relax_constraints_after_beam_widening
                        && k == last
                        && !added_any
                    {
                        log_prior = LOG_PROB_SMALL;
                    } else {
                        continue;
                    }
                }
                let mut item = ChartItem {
                    label: tag,
                    head_word,
                    left_subcat: Subcat::empty(),
                    right_subcat: Subcat::empty(),
                    head_child: None,
                    head_label: None,
                    left_children: None,
                    right_children: None,
                    left_prev_mods: self.start_mods(),
                    right_prev_mods: self.start_mods(),
                    start: i,
                    end: i,
                    left_verb: false,
                    right_verb: false,
                    contains_verb: self.tb.is_verb_tag(tag),
                    stop: true,
                    log_tree_prob: LOG_PROB_CERTAIN,
                    log_prior,
                    log_prob: log_prior,
                    num_parses: 1,
                    constraint: None,
                    garbage: false,
                };
                if let Some(set) = cs {
                    if !set.permits(self.chart.arena(), &item) {
                        continue;
                    }
                    item.constraint = set.constraint_satisfying(self.chart.arena(), &item);
                }
                if self.offer(i, i, item).is_some() {
                    added_any = true;
                }
            }
        }
    }

    // ---- span completion ----

    /// The comma heuristic: a split ending at an unparenthesized comma
    /// may not be modified across, unless the constituent ends right at
    /// the sentence boundary, directly before another such comma, or on
    /// a conjunction.
    fn comma_constraint_violation(&self, split: usize, end: usize) -> bool {
        self.comma_for_pruning[split]
            && end + 1 < self.sent_len
            && !self.comma_for_pruning[end + 1]
            && !self.conj_for_pruning[end]
    }

    fn complete(
        &mut self,
        start: usize,
        end: usize,
        cs: Option<&dyn ConstraintSet>,
    ) -> Result<(), TimedOut> {
        for split in start..end {
            self.check_time()?;
            let violation =
                self.config.use_comma_constraint && self.comma_constraint_violation(split, end);
            let left_items = self.chart.cell_items(start, split);
            let right_items = self.chart.cell_items(split + 1, end);
            for &l in &left_items {
                for &r in &right_items {
                    if violation {
                        // Carve-out: a base NP may still take left
                        // premodifiers across the comma. Deliberately
                        // not subject to constraint relaxation.
                        if self.tb.is_base_np(self.chart.item(r).label) {
                            self.try_join(r, l, Side::Left, cs);
                        }
                    } else {
                        self.try_join(l, r, Side::Right, cs);
                        self.try_join(r, l, Side::Left, cs);
                    }
                }
            }
        }
        self.add_unaries_and_stop_probs(start, end, cs);
        self.chart.prune(start, end);
        Ok(())
    }

    /// Attach `modifier` on `side` of `modificand`, scoring the
    /// attachment and offering the combined item to the chart.
    fn try_join(
        &mut self,
        modificand_id: ItemId,
        modifier_id: ItemId,
        side: Side,
        cs: Option<&dyn ConstraintSet>,
    ) {
        let modificand = self.chart.item(modificand_id).clone();
        let modifier = self.chart.item(modifier_id).clone();

        // Only unstopped items accept modifiers; only stopped items can
        // become modifiers.
        if modificand.stop || !modifier.stop {
            return;
        }
        if !derivation_order_ok(&modificand, side) {
            return;
        }

        // Argument licensing: an argument label must be in the subcat.
        let mod_label = modifier.label;
        let subcat = modificand.subcat(side);
        let new_subcat = match subcat.without(mod_label) {
            Some(reduced) => reduced,
            None => {
                if self.tb.is_argument(mod_label) {
                    return;
                }
                subcat.clone()
            }
        };

        if let Some(set) = cs {
            if let Some(c) = modificand.constraint {
                if set.is_violated_by_child(c, self.chart.arena(), &modifier) {
                    return;
                }
            }
        }

        let event = ModifierEvent {
            modifier: mod_label,
            mod_head_word: modifier.head_word,
            head_word: modificand.head_word,
            parent: modificand.label,
            head: modificand.head_label.unwrap_or(modificand.label),
            prev_mods: modificand.prev_mods(side).clone(),
            prev_words: self.prev_mod_words(modificand.label, modificand.children(side)),
            subcat: subcat.clone(),
            verb_intervening: modificand.verb(side),
            side,
        };
        if !self.relaxed && !self.model.future_possible(&event) {
            return;
        }
        let log_prob_mod = match self.gate(self.model.log_prob_mod(&event)) {
            Some(lp) => lp,
            None => return,
        };

        let new_start = modificand.start.min(modifier.start);
        let new_end = modificand.end.max(modifier.end);
        let new_children = self
            .chart
            .cons(modifier_id, modificand.children(side));
        let new_prev_mods = self.prev_mod_labels(modificand.label, Some(new_children));
        let new_verb = modificand.verb(side) || modifier.contains_verb;

        let log_tree_prob = modificand.log_tree_prob + modifier.log_tree_prob + log_prob_mod;
        let mut item = ChartItem {
            label: modificand.label,
            head_word: modificand.head_word,
            left_subcat: modificand.left_subcat.clone(),
            right_subcat: modificand.right_subcat.clone(),
            head_child: modificand.head_child,
            head_label: modificand.head_label,
            left_children: modificand.left_children,
            right_children: modificand.right_children,
            left_prev_mods: modificand.left_prev_mods.clone(),
            right_prev_mods: modificand.right_prev_mods.clone(),
            start: new_start,
            end: new_end,
            left_verb: modificand.left_verb,
            right_verb: modificand.right_verb,
            contains_verb: false,
            stop: false,
            log_tree_prob,
            log_prior: modificand.log_prior,
            log_prob: log_tree_prob + modificand.log_prior,
            num_parses: modificand.num_parses * modifier.num_parses,
            constraint: modificand.constraint,
            garbage: false,
        };
        item.set_side(side, new_subcat, Some(new_children), new_prev_mods, new_verb);
        item.contains_verb = compute_contains_verb(
            self.chart.arena(),
            self.tb.as_ref(),
            self.config.base_nps_cannot_contain_verbs,
            &item,
        );
        if let Some(set) = cs {
            if !set.permits(self.chart.arena(), &item) {
                return;
            }
            // The widened span may move under a larger bracket.
            item.constraint = set.constraint_satisfying(self.chart.arena(), &item);
        }
        self.offer(new_start, new_end, item);
    }

    // ---- modifier histories ----

    /// Bounded most-recent-first modifier label history of a child list,
    /// skip-filtered and padded with the start symbol.
    fn prev_mod_labels(&self, item_label: Sym, head: Option<ChildId>) -> PrevMods {
        let window = self.config.num_prev_mods;
        let start = self.tb.start_sym();
        let mut out = PrevMods::new();
        let mut cur = head;
        while out.len() < window {
            match cur {
                None => out.push(start),
                Some(cid) => {
                    let node = self.chart.arena().child(cid);
                    let label = self.chart.item(node.item).label;
                    cur = node.next;
                    if self.shifter.skip_label(item_label, label) {
                        continue;
                    }
                    out.push(label);
                }
            }
        }
        out
    }

    /// Same walk over modifier head words.
    fn prev_mod_words(&self, item_label: Sym, head: Option<ChildId>) -> PrevWords {
        let window = self.config.num_prev_words;
        let start_word = self.tb.start_word();
        let mut out = PrevWords::new();
        let mut cur = head;
        while out.len() < window {
            match cur {
                None => out.push(start_word),
                Some(cid) => {
                    let node = self.chart.arena().child(cid);
                    let word = self.chart.item(node.item).head_word;
                    cur = node.next;
                    if self.shifter.skip_word(item_label, &word) {
                        continue;
                    }
                    out.push(word);
                }
            }
        }
        out
    }

    // ---- unary and stop closure ----

    /// Alternate unary projection and stop generation to a fixed point:
    /// a freshly stopped item may license a new unary parent, and a
    /// fresh unary item may immediately qualify for stopping.
    fn add_unaries_and_stop_probs(
        &mut self,
        start: usize,
        end: usize,
        cs: Option<&dyn ConstraintSet>,
    ) {
        let mut prev = self.chart.cell_items(start, end);
        while !prev.is_empty() {
            let mut cur = Vec::new();
            for id in prev {
                if self.chart.item(id).garbage {
                    continue;
                }
                if self.chart.item(id).stop {
                    self.add_unaries(id, start, end, cs, &mut cur);
                } else {
                    self.add_stop_probs(id, start, end, cs, &mut cur);
                }
            }
            prev = cur;
        }
    }

    fn add_unaries(
        &mut self,
        child_id: ItemId,
        start: usize,
        end: usize,
        cs: Option<&dyn ConstraintSet>,
        out: &mut Vec<ItemId>,
    ) {
        let child = self.chart.item(child_id).clone();
        if child.label == self.tb.top_sym() {
            return;
        }
        let parents: Vec<Sym> = if self.config.use_head_to_parent_map {
            match self.model.parents_for_head(child.label) {
                Some(parents) => parents,
                None => return,
            }
        } else {
            self.model.nonterminals()
        };

        for parent in parents {
            let log_prior = match self.gate(self.model.log_prior(&PriorEvent {
                head_word: child.head_word,
                label: parent,
            })) {
                Some(lp) => lp,
                None => continue,
            };

            let left_subcats = self.model.possible_left_subcats(parent, child.label);
            let right_subcats = self.model.possible_right_subcats(parent, child.label);
            if left_subcats.is_empty() || right_subcats.is_empty() {
                continue;
            }

            for left in &left_subcats {
                for right in &right_subcats {
                    let event = HeadEvent {
                        head_word: child.head_word,
                        parent,
                        head: child.label,
                        left_subcat: left.clone(),
                        right_subcat: right.clone(),
                    };
                    let log_prob_head = match self.gate(self.model.log_prob_head(&event)) {
                        Some(lp) => lp,
                        None => continue,
                    };
                    // A context with exactly one admissible subcat makes
                    // that side certain; skip the model query.
                    let log_prob_left = if left_subcats.len() == 1 {
                        LOG_PROB_CERTAIN
                    } else {
                        match self.gate(self.model.log_prob_left_subcat(&event)) {
                            Some(lp) => lp,
                            None => continue,
                        }
                    };
                    let log_prob_right = if right_subcats.len() == 1 {
                        LOG_PROB_CERTAIN
                    } else {
                        match self.gate(self.model.log_prob_right_subcat(&event)) {
                            Some(lp) => lp,
                            None => continue,
                        }
                    };

                    let log_tree_prob =
                        child.log_tree_prob + log_prob_head + log_prob_left + log_prob_right;
                    let mut item = ChartItem {
                        label: parent,
                        head_word: child.head_word,
                        left_subcat: left.clone(),
                        right_subcat: right.clone(),
                        head_child: Some(child_id),
                        head_label: Some(child.label),
                        left_children: None,
                        right_children: None,
                        left_prev_mods: self.start_mods(),
                        right_prev_mods: self.start_mods(),
                        start: child.start,
                        end: child.end,
                        left_verb: false,
                        right_verb: false,
                        contains_verb: false,
                        stop: false,
                        log_tree_prob,
                        log_prior,
                        log_prob: log_tree_prob + log_prior,
                        num_parses: child.num_parses,
                        constraint: None,
                        garbage: false,
                    };
                    item.contains_verb = compute_contains_verb(
                        self.chart.arena(),
                        self.tb.as_ref(),
                        self.config.base_nps_cannot_contain_verbs,
                        &item,
                    );
                    if let Some(set) = cs {
                        if !set.permits(self.chart.arena(), &item) {
                            continue;
                        }
                        item.constraint = set.constraint_satisfying(self.chart.arena(), &item);
                    }
                    if let Some(id) = self.offer(start, end, item) {
                        out.push(id);
                    }
                }
            }
        }
    }

    fn add_stop_probs(
        &mut self,
        id: ItemId,
        start: usize,
        end: usize,
        cs: Option<&dyn ConstraintSet>,
        out: &mut Vec<ItemId>,
    ) {
        let item = self.chart.item(id).clone();
        if !item.left_subcat.is_empty() || !item.right_subcat.is_empty() {
            return;
        }
        let head = item.head_label.unwrap_or(item.label);
        let stop_sym = self.tb.stop_sym();
        let stop_word = self.tb.stop_word();

        let mut log_stop = 0.0;
        for side in [Side::Left, Side::Right] {
            let event = ModifierEvent {
                modifier: stop_sym,
                mod_head_word: stop_word,
                head_word: item.head_word,
                parent: item.label,
                head,
                // The stop pseudo-modifier conditions on the same history
                // as the next real modifier would; the label lists are
                // already on the item, the word lists are recomputed.
                prev_mods: item.prev_mods(side).clone(),
                prev_words: self.prev_mod_words(item.label, item.children(side)),
                subcat: item.subcat(side).clone(),
                verb_intervening: item.verb(side),
                side,
            };
            match self.gate(self.model.log_prob_mod(&event)) {
                Some(lp) => log_stop += lp,
                None => return,
            }
        }

        let mut stopped = item.clone();
        stopped.stop = true;
        stopped.log_tree_prob = item.log_tree_prob + log_stop;
        stopped.log_prob = stopped.log_tree_prob + stopped.log_prior;
        stopped.garbage = false;
        if let Some(set) = cs {
            if let Some(c) = stopped.constraint {
                if !set.is_locally_satisfied_by(c, self.chart.arena(), &stopped) {
                    return;
                }
            }
        }
        if let Some(new_id) = self.offer(start, end, stopped) {
            out.push(new_id);
        }
    }

    // ---- top closure ----

    fn add_top_unaries(&mut self, cs: Option<&dyn ConstraintSet>) {
        let n = self.sent_len;
        let top = self.tb.top_sym();
        let candidates = self.chart.cell_items(0, n - 1);
        for id in candidates {
            let item = self.chart.item(id).clone();
            if !item.stop || item.label == top {
                continue;
            }
            if let Some(set) = cs {
                if let Some(c) = item.constraint {
                    if !set.has_been_satisfied(c) {
                        continue;
                    }
                }
            }
            let event = HeadEvent {
                head_word: item.head_word,
                parent: top,
                head: item.label,
                left_subcat: Subcat::empty(),
                right_subcat: Subcat::empty(),
            };
            let log_prob_top = match self.gate(self.model.log_prob_top(&event)) {
                Some(lp) => lp,
                None => continue,
            };
            let log_tree_prob = item.log_tree_prob + log_prob_top;
            let top_item = ChartItem {
                label: top,
                head_word: item.head_word,
                left_subcat: Subcat::empty(),
                right_subcat: Subcat::empty(),
                head_child: Some(id),
                head_label: Some(item.label),
                left_children: None,
                right_children: None,
                left_prev_mods: self.start_mods(),
                right_prev_mods: self.start_mods(),
                start: 0,
                end: n - 1,
                left_verb: false,
                right_verb: false,
                contains_verb: item.contains_verb,
                stop: true,
                log_tree_prob,
                log_prior: LOG_PROB_CERTAIN,
                log_prob: log_tree_prob,
                num_parses: item.num_parses,
                constraint: item.constraint,
                garbage: false,
            };
            self.offer(0, n - 1, top_item);
        }
    }
}

/// Right modifiers are generated before left ones: a left attachment
/// requires the right side to be finished (empty right subcat), and a
/// right attachment is illegal once any left modifier exists.
fn derivation_order_ok(item: &ChartItem, side: Side) -> bool {
    match side {
        Side::Left => item.right_subcat.is_empty(),
        Side::Right => item.left_children.is_none(),
    }
}
