//! Optimization passes over a typed, rewritten model.

mod constants;
mod inline;

pub use constants::ConstantSubexpressionEliminator;
pub use inline::{IntermediateResultsInliner, ReferenceCounter};
