//! The parse chart.
//!
//! One cell per span holds items bucketed by their policy hash. `add` is
//! the single entry point: it applies the beam test against the cell's
//! best score, then either recombines the new item with an equivalent
//! existing one or inserts it. Items evicted by recombination or pruning
//! are only marked garbage; their slots stay readable until the next
//! sentence because surviving items' child lists may still point at them.

use crate::item::{ChartItem, ChildId, ItemArena, ItemId};
use crate::model::LOG_ZERO;
use crate::policy::EquivalencePolicy;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

#[derive(Clone, Copy, Default, Debug)]
pub struct ChartStats {
    /// Items accepted into some cell.
    pub added: u64,
    /// Items rejected by the beam test at add time.
    pub rejected: u64,
    /// Recombinations where the incoming item won.
    pub recombined_won: u64,
    /// Recombinations where the incoming item lost.
    pub recombined_lost: u64,
    /// Items removed by `prune`.
    pub pruned: u64,
}

#[derive(Default)]
struct Cell {
    buckets: FxHashMap<u64, SmallVec<[ItemId; 2]>>,
    count: usize,
    top_log_prob: f64,
    top_item: Option<ItemId>,
}

impl Cell {
    fn reset(&mut self) {
        self.buckets.clear();
        self.count = 0;
        self.top_log_prob = LOG_ZERO;
        self.top_item = None;
    }
}

pub struct Chart {
    cells: Vec<Cell>,
    size: usize,
    arena: ItemArena,
    policy: Arc<dyn EquivalencePolicy>,
    prune_factor: f64,
    cell_limit: usize,
    relax: bool,
    pub stats: ChartStats,
}

impl Chart {
    pub fn new(policy: Arc<dyn EquivalencePolicy>, prune_factor: f64, cell_limit: usize) -> Chart {
        Chart {
            cells: Vec::new(),
            size: 0,
            arena: ItemArena::new(),
            policy,
            prune_factor,
            cell_limit,
            relax: false,
            stats: ChartStats::default(),
        }
    }

    /// Prepare for a sentence of `size` words. Drops everything from the
    /// previous sentence, including garbage items.
    pub fn set_size(&mut self, size: usize) {
        self.size = size;
        self.cells.clear();
        self.cells.resize_with(size * size, Cell::default);
        for cell in &mut self.cells {
            cell.reset();
        }
        self.arena.clear();
        self.stats = ChartStats::default();
    }

    fn cell_index(&self, start: usize, end: usize) -> usize {
        debug_assert!(start <= end && end < self.size);
        start * self.size + end
    }

    pub fn prune_factor(&self) -> f64 {
        self.prune_factor
    }

    pub fn set_prune_factor(&mut self, prune_factor: f64) {
        self.prune_factor = prune_factor;
    }

    pub fn relaxed(&self) -> bool {
        self.relax
    }

    /// In relaxed mode the beam never rejects or prunes stopped items.
    pub fn set_relaxed(&mut self, relax: bool) {
        self.relax = relax;
    }

    pub fn arena(&self) -> &ItemArena {
        &self.arena
    }

    pub fn new_item(&mut self, item: ChartItem) -> ItemId {
        self.arena.insert(item)
    }

    /// Return a never-added item's slot to the pool.
    pub fn release(&mut self, id: ItemId) {
        self.arena.release(id);
    }

    pub fn item(&self, id: ItemId) -> &ChartItem {
        &self.arena[id]
    }

    pub fn item_mut(&mut self, id: ItemId) -> &mut ChartItem {
        self.arena.get_mut(id)
    }

    pub fn cons(&mut self, item: ItemId, next: Option<ChildId>) -> ChildId {
        self.arena.cons(item, next)
    }

    fn outside_beam(&self, item: &ChartItem, top_log_prob: f64) -> bool {
        if item.is_preterminal() {
            return false;
        }
        if self.relax && item.stop {
            return false;
        }
        item.log_prob < top_log_prob - self.prune_factor
    }

    /// Offer `id` to cell `(start, end)`.
    ///
    /// Returns `false` when the item was not entered: rejected by the
    /// beam, or recombined into a better equivalent item. Either way a
    /// `false` return means the caller must not assume the item is live;
    /// it should release the slot.
    pub fn add(&mut self, start: usize, end: usize, id: ItemId) -> bool {
        let ci = self.cell_index(start, end);
        let log_prob = self.arena[id].log_prob;

        if self.outside_beam(&self.arena[id], self.cells[ci].top_log_prob) {
            self.stats.rejected += 1;
            return false;
        }

        let hash = self.policy.hash_item(&self.arena, id);
        let candidates: SmallVec<[ItemId; 2]> = self.cells[ci]
            .buckets
            .get(&hash)
            .map(|b| b.clone())
            .unwrap_or_default();
        for other in candidates {
            if !self.policy.equivalent(&self.arena, other, id) {
                continue;
            }
            let other_log_prob = self.arena[other].log_prob;
            if other_log_prob >= log_prob {
                // Existing derivation wins; it absorbs the new one.
                let n = self.arena[id].num_parses;
                self.arena.get_mut(other).num_parses += n;
                self.stats.recombined_lost += 1;
                return false;
            }
            // New derivation wins; evict the old one.
            let n = self.arena[other].num_parses;
            self.arena.get_mut(id).num_parses += n;
            self.remove_item(ci, hash, other);
            self.stats.recombined_won += 1;
            break;
        }

        let cell = &mut self.cells[ci];
        cell.buckets.entry(hash).or_default().push(id);
        cell.count += 1;
        if log_prob > cell.top_log_prob {
            cell.top_log_prob = log_prob;
            cell.top_item = Some(id);
        }
        self.stats.added += 1;
        true
    }

    fn remove_item(&mut self, ci: usize, hash: u64, id: ItemId) {
        let cell = &mut self.cells[ci];
        if let Some(bucket) = cell.buckets.get_mut(&hash) {
            if let Some(pos) = bucket.iter().position(|&x| x == id) {
                bucket.remove(pos);
                cell.count -= 1;
            }
        }
        let item = self.arena.get_mut(id);
        item.garbage = true;
        let cell = &mut self.cells[ci];
        if cell.top_item == Some(id) {
            // Leave top_log_prob in place; it stays a valid beam bound.
            cell.top_item = None;
        }
    }

    /// Apply the beam margin and the cell limit to a finished cell.
    /// Preterminals are never pruned, and in relaxed mode neither are
    /// stopped items.
    pub fn prune(&mut self, start: usize, end: usize) {
        let ci = self.cell_index(start, end);
        let top = self.cells[ci].top_log_prob;
        let mut ranked: Vec<(ItemId, u64, f64)> = Vec::with_capacity(self.cells[ci].count);
        for (&hash, bucket) in &self.cells[ci].buckets {
            for &id in bucket {
                ranked.push((id, hash, self.arena[id].log_prob));
            }
        }
        ranked.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.raw().cmp(&b.0.raw())));

        let limit = if self.cell_limit == 0 {
            usize::MAX
        } else {
            self.cell_limit
        };
        let mut kept = 0usize;
        for (id, hash, _) in ranked {
            let exempt = {
                let item = &self.arena[id];
                item.is_preterminal() || (self.relax && item.stop)
            };
            if exempt {
                continue;
            }
            let out = self.outside_beam(&self.arena[id], top) || kept >= limit;
            if out {
                self.remove_item(ci, hash, id);
                self.stats.pruned += 1;
            } else {
                kept += 1;
            }
        }
    }

    /// Live items of a cell, best first. A snapshot: callers may mutate
    /// the chart while walking it.
    pub fn cell_items(&self, start: usize, end: usize) -> Vec<ItemId> {
        let ci = self.cell_index(start, end);
        let mut items: Vec<ItemId> = self.cells[ci].buckets.values().flatten().copied().collect();
        items.sort_by(|a, b| {
            self.arena[*b]
                .log_prob
                .total_cmp(&self.arena[*a].log_prob)
                .then(a.raw().cmp(&b.raw()))
        });
        items
    }

    pub fn cell_len(&self, start: usize, end: usize) -> usize {
        self.cells[self.cell_index(start, end)].count
    }

    pub fn top_log_prob(&self, start: usize, end: usize) -> f64 {
        self.cells[self.cell_index(start, end)].top_log_prob
    }

    pub fn top_item(&self, start: usize, end: usize) -> Option<ItemId> {
        self.cells[self.cell_index(start, end)].top_item
    }

    /// Forget the cell's best score so a new family of items (the hidden
    /// root closure) competes on a fresh beam.
    pub fn reset_top_log_prob(&mut self, start: usize, end: usize) {
        let ci = self.cell_index(start, end);
        self.cells[ci].top_log_prob = LOG_ZERO;
        self.cells[ci].top_item = None;
    }

    /// Strip the chart back to its seeds: span-1 cells keep only their
    /// preterminal items, every larger cell is emptied. Used when the
    /// beam is widened for another pass.
    pub fn clear_non_preterminals(&mut self) {
        for start in 0..self.size {
            for end in start..self.size {
                let ci = self.cell_index(start, end);
                let survivors: Vec<(u64, ItemId)> = if end == start {
                    let mut keep = Vec::new();
                    for (&hash, bucket) in &self.cells[ci].buckets {
                        for &id in bucket {
                            if self.arena[id].is_preterminal() {
                                keep.push((hash, id));
                            }
                        }
                    }
                    keep
                } else {
                    Vec::new()
                };
                let evicted: Vec<ItemId> = self.cells[ci]
                    .buckets
                    .values()
                    .flatten()
                    .copied()
                    .filter(|id| !survivors.iter().any(|&(_, s)| s == *id))
                    .collect();
                for id in evicted {
                    self.arena.get_mut(id).garbage = true;
                }
                let cell = &mut self.cells[ci];
                cell.reset();
                for &(hash, id) in &survivors {
                    cell.buckets.entry(hash).or_default().push(id);
                    cell.count += 1;
                }
                for (_, id) in survivors {
                    let lp = self.arena[id].log_prob;
                    let cell = &mut self.cells[ci];
                    if lp > cell.top_log_prob {
                        cell.top_log_prob = lp;
                        cell.top_item = Some(id);
                    }
                }
            }
        }
    }

    pub fn total_items(&self) -> usize {
        self.cells.iter().map(|c| c.count).sum()
    }

    /// Drop all per-sentence state. The only point at which garbage item
    /// slots are actually reclaimed.
    pub fn post_parse_cleanup(&mut self) {
        self.cells.clear();
        self.size = 0;
        self.arena.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EquivalenceChoice;
    use crate::grammar::{DefaultShifter, SymbolTable, TreebankDef, Word};
    use crate::item::tests::leaf;
    use crate::policy::make_policy;
    use std::f64::consts::LN_10;

    struct Fixture {
        syms: SymbolTable,
        chart: Chart,
        nn: u32,
        np: u32,
    }

    fn fixture(prune_factor: f64, cell_limit: usize) -> Fixture {
        let mut syms = SymbolTable::new();
        let tb = Arc::new(TreebankDef::new(&mut syms));
        let nn = syms.intern("NN");
        let np = syms.intern("NP");
        let policy = make_policy(
            EquivalenceChoice::FullContext,
            tb,
            Arc::new(DefaultShifter),
            1,
        );
        let mut chart = Chart::new(policy, prune_factor, cell_limit);
        chart.set_size(4);
        Fixture { syms, chart, nn, np }
    }

    /// A distinguishable non-preterminal item: distinct head word, with a
    /// preterminal head child so it does not count as a seed.
    fn phrase(f: &mut Fixture, word: &str, start: usize, end: usize, log_prob: f64) -> ItemId {
        let w = Word::new(f.syms.intern(word), f.nn);
        let hc = f.chart.new_item(leaf(f.nn, w, start));
        let mut item = leaf(f.np, w, start);
        item.end = end;
        item.stop = false;
        item.head_child = Some(hc);
        item.head_label = Some(f.nn);
        item.log_tree_prob = log_prob;
        item.log_prob = log_prob;
        item.log_prior = 0.0;
        f.chart.new_item(item)
    }

    #[test]
    fn beam_rejects_low_items_at_add_time() {
        let mut f = fixture(LN_10, 0);
        let good = phrase(&mut f, "alpha", 0, 1, -1.0);
        assert!(f.chart.add(0, 1, good));
        // More than a factor of 10 below the best: rejected outright.
        let bad = phrase(&mut f, "beta", 0, 1, -1.0 - LN_10 - 0.1);
        assert!(!f.chart.add(0, 1, bad));
        f.chart.release(bad);
        assert_eq!(f.chart.cell_len(0, 1), 1);
        assert_eq!(f.chart.stats.rejected, 1);
        // Within the margin: accepted.
        let ok = phrase(&mut f, "gamma", 0, 1, -1.0 - LN_10 + 0.1);
        assert!(f.chart.add(0, 1, ok));
        assert_eq!(f.chart.cell_len(0, 1), 2);
    }

    #[test]
    fn preterminals_are_never_beam_rejected() {
        let mut f = fixture(LN_10, 0);
        let good = phrase(&mut f, "alpha", 0, 0, -1.0);
        assert!(f.chart.add(0, 0, good));
        let w = Word::new(f.syms.intern("beta"), f.nn);
        let mut seed = leaf(f.nn, w, 0);
        seed.log_prob = -100.0;
        seed.log_tree_prob = -100.0;
        let seed = f.chart.new_item(seed);
        assert!(f.chart.add(0, 0, seed));
    }

    #[test]
    fn equivalent_items_recombine_keeping_the_better() {
        let mut f = fixture(100.0, 0);
        let w = Word::new(f.syms.intern("dog"), f.nn);
        // Stopped preterminals with the same label and head word are
        // equivalent under every context policy.
        let mut a = leaf(f.nn, w, 0);
        a.log_prob = -2.0;
        let mut b = leaf(f.nn, w, 0);
        b.log_prob = -1.0;
        let a = f.chart.new_item(a);
        assert!(f.chart.add(0, 0, a));

        let b = f.chart.new_item(b);
        assert!(f.chart.add(0, 0, b));
        assert_eq!(f.chart.cell_len(0, 0), 1);
        assert_eq!(f.chart.stats.recombined_won, 1);
        assert!(f.chart.item(a).garbage);
        assert_eq!(f.chart.item(b).num_parses, 2);
        assert_eq!(f.chart.top_item(0, 0), Some(b));

        // A third, worse equivalent loses and is absorbed.
        let mut c = leaf(f.nn, w, 0);
        c.log_prob = -3.0;
        let c = f.chart.new_item(c);
        assert!(!f.chart.add(0, 0, c));
        f.chart.release(c);
        assert_eq!(f.chart.item(b).num_parses, 3);
        assert_eq!(f.chart.cell_len(0, 0), 1);
    }

    #[test]
    fn prune_applies_margin_and_cell_limit() {
        let mut f = fixture(10.0, 2);
        let ids: Vec<ItemId> = ["a", "b", "c", "d"]
            .iter()
            .enumerate()
            .map(|(i, w)| phrase(&mut f, w, 0, 1, -(i as f64)))
            .collect();
        for &id in &ids {
            assert!(f.chart.add(0, 1, id));
        }
        assert_eq!(f.chart.cell_len(0, 1), 4);
        f.chart.prune(0, 1);
        // Margin keeps all four, the cell limit keeps the best two.
        assert_eq!(f.chart.cell_len(0, 1), 2);
        assert_eq!(f.chart.stats.pruned, 2);
        let kept = f.chart.cell_items(0, 1);
        assert_eq!(kept, vec![ids[0], ids[1]]);
        assert!(f.chart.item(ids[3]).garbage);
    }

    #[test]
    fn relaxed_mode_exempts_stopped_items() {
        let mut f = fixture(1.0, 0);
        let good = phrase(&mut f, "alpha", 0, 1, 0.0);
        assert!(f.chart.add(0, 1, good));
        let mut low = phrase(&mut f, "beta", 0, 1, -50.0);
        f.chart.item_mut(low).stop = true;
        assert!(!f.chart.add(0, 1, low));
        f.chart.release(low);

        f.chart.set_relaxed(true);
        low = phrase(&mut f, "beta", 0, 1, -50.0);
        f.chart.item_mut(low).stop = true;
        assert!(f.chart.add(0, 1, low));
        f.chart.prune(0, 1);
        assert_eq!(f.chart.cell_len(0, 1), 2);
    }

    #[test]
    fn clear_non_preterminals_keeps_only_seeds() {
        let mut f = fixture(100.0, 0);
        let w = Word::new(f.syms.intern("dog"), f.nn);
        let seed = f.chart.new_item(leaf(f.nn, w, 0));
        assert!(f.chart.add(0, 0, seed));
        let unary = phrase(&mut f, "dog2", 0, 0, -1.0);
        assert!(f.chart.add(0, 0, unary));
        let span = phrase(&mut f, "dogs", 0, 2, -2.0);
        assert!(f.chart.add(0, 2, span));

        f.chart.clear_non_preterminals();
        assert_eq!(f.chart.cell_len(0, 0), 1);
        assert_eq!(f.chart.cell_len(0, 2), 0);
        assert_eq!(f.chart.top_item(0, 0), Some(seed));
        assert!(f.chart.item(unary).garbage);
        assert!(f.chart.item(span).garbage);
    }

    #[test]
    fn reset_top_log_prob_opens_the_beam() {
        let mut f = fixture(1.0, 0);
        let good = phrase(&mut f, "alpha", 0, 1, 0.0);
        assert!(f.chart.add(0, 1, good));
        let low = phrase(&mut f, "beta", 0, 1, -50.0);
        assert!(!f.chart.add(0, 1, low));
        f.chart.release(low);

        f.chart.reset_top_log_prob(0, 1);
        let low = phrase(&mut f, "beta", 0, 1, -50.0);
        assert!(f.chart.add(0, 1, low));
        assert_eq!(f.chart.top_item(0, 1), Some(low));
    }

    mod prune_properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// After pruning, every survivor is within the margin of the
            /// best item and the cell limit holds; the best item always
            /// survives.
            #[test]
            fn survivors_stay_within_the_margin(
                log_probs in proptest::collection::vec(-40.0f64..0.0, 1..24),
                prune_factor in 0.5f64..20.0,
                cell_limit in 0usize..6,
            ) {
                let mut f = fixture(prune_factor, cell_limit);
                for (i, &lp) in log_probs.iter().enumerate() {
                    let id = phrase(&mut f, &format!("w{i}"), 0, 1, lp);
                    if !f.chart.add(0, 1, id) {
                        f.chart.release(id);
                    }
                }
                f.chart.prune(0, 1);
                let kept = f.chart.cell_items(0, 1);
                prop_assert!(!kept.is_empty());
                if cell_limit > 0 {
                    prop_assert!(kept.len() <= cell_limit);
                }
                let best = f.chart.item(kept[0]).log_prob;
                for &id in &kept {
                    prop_assert!(f.chart.item(id).log_prob >= best - prune_factor - 1e-9);
                }
            }
        }
    }
}
