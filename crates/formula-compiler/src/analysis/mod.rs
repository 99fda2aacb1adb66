//! Whole-model checks and inference that run before any rewriting.

mod cycles;
mod types;

pub use cycles::CircularReferenceChecker;
pub use types::TypeAnnotator;
