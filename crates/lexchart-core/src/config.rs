//! Decoder configuration.

use std::f64::consts::LN_10;
use std::time::Duration;

/// Which recombination policy the chart uses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EquivalenceChoice {
    /// Full conditioning context, base NPs treated like anything else.
    FullContext,
    /// Base-NP-aware refinement of the full context.
    BaseNpAware,
    /// Base-NP-aware with coarsened previous-modifier labels.
    MappedPrevMod,
    /// No recombination; every item stays distinct.
    Identity,
}

/// All decoding knobs, fixed for the lifetime of a [`crate::Decoder`].
///
/// Beam margins are natural-log probability differences; the defaults
/// correspond to factors of 10^4 (starting beam) through 10^9 (widest
/// beam), widened one order of magnitude at a time.
#[derive(Clone, Debug)]
pub struct DecoderConfig {
    /// Sentences longer than this are rejected up front.
    pub max_sentence_len: usize,
    /// Starting beam margin below the best item in a cell.
    pub prune_factor: f64,
    /// Added to the margin on each widening retry.
    pub prune_factor_increment: f64,
    /// Widest margin tried before giving up (or relaxing constraints).
    pub max_prune_factor: f64,
    /// Hard cap on items per cell after pruning; 0 means unlimited.
    pub cell_limit: usize,
    /// How many top-scoring parses to return.
    pub k_best: usize,
    /// Per-sentence wall-clock budget. `None` means unbounded.
    pub max_parse_time: Option<Duration>,
    /// Length of previous-modifier label histories.
    pub num_prev_mods: usize,
    /// Length of previous-modifier word histories.
    pub num_prev_words: usize,
    /// Reject modifier attachments that cross unlicensed commas.
    pub use_comma_constraint: bool,
    /// After the widest beam fails, run one final pass with
    /// probability-floor relaxation.
    pub relax_constraints_after_beam_widening: bool,
    /// Propose unary parents from the trained head-to-parent map instead
    /// of trying every nonterminal.
    pub use_head_to_parent_map: bool,
    /// Trust supplied tags exclusively, even for known words.
    pub use_only_supplied_tags: bool,
    /// Treat base NPs as verb-free for distance/verb conditioning.
    pub base_nps_cannot_contain_verbs: bool,
    pub policy: EquivalenceChoice,
}

impl Default for DecoderConfig {
    fn default() -> DecoderConfig {
        DecoderConfig {
            max_sentence_len: 120,
            prune_factor: 4.0 * LN_10,
            prune_factor_increment: LN_10,
            max_prune_factor: 9.0 * LN_10,
            cell_limit: 0,
            k_best: 1,
            max_parse_time: None,
            num_prev_mods: 1,
            num_prev_words: 1,
            use_comma_constraint: true,
            relax_constraints_after_beam_widening: true,
            use_head_to_parent_map: true,
            use_only_supplied_tags: false,
            base_nps_cannot_contain_verbs: false,
            policy: EquivalenceChoice::BaseNpAware,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_beam_widens_from_1e4_to_1e9() {
        let cfg = DecoderConfig::default();
        assert!((cfg.prune_factor - 1e4f64.ln()).abs() < 1e-9);
        assert!((cfg.max_prune_factor - 1e9f64.ln()).abs() < 1e-9);
        let steps = (cfg.max_prune_factor - cfg.prune_factor) / cfg.prune_factor_increment;
        assert!((steps - 5.0).abs() < 1e-9);
    }
}
