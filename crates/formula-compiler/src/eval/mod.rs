//! Runtime values and the semantics shared by the literal interpreter and the engine.

mod criteria;
mod fold;
pub mod functions;
mod interpreter;
pub mod ops;
mod value;

pub use criteria::{parse_criterion, Criterion};
pub(crate) use fold::{elements as fold_elements, fold, fold_rows, FoldSteps};
pub use interpreter::{CellLookup, Interpreter, Stop};
pub(crate) use value::{flatten, Args};
pub use value::{Array, Operand, Scalar};
