pub mod grammar;
pub mod item;
pub mod policy;
pub mod chart;
pub mod model;
pub mod constraints;
pub mod config;
pub mod tree;
pub mod decoder;
pub mod error;
#[cfg(feature = "python")]
pub mod py;

pub use chart::Chart;
pub use config::{DecoderConfig, EquivalenceChoice};
pub use constraints::{BracketConstraint, BracketConstraintSet, ConstraintId, ConstraintSet};
pub use decoder::{DecodeStats, Decoder, ScoredParse};
pub use error::ParseError;
pub use grammar::{
    BaseNpShifter, DefaultShifter, Shifter, Side, Sym, SymbolTable, Treebank, TreebankDef, Word,
};
pub use item::{ChartItem, ItemArena, ItemId, Subcat};
pub use model::{ProbabilityModel, TableModel, LOG_PROB_CERTAIN, LOG_PROB_SMALL, LOG_ZERO};
pub use tree::ParseTree;

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn lexchart_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<py::GrammarBuilder>()?;
    m.add_class::<py::Parser>()?;
    m.add_class::<py::PyDecodeStats>()?;
    Ok(())
}
