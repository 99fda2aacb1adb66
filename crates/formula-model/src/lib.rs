#![forbid(unsafe_code)]

//! `formula-model` defines the intermediate representation the formula compiler works on.
//!
//! A [`ComputationModel`] is an arena of [`CellModel`]s grouped into (possibly nested) repeating
//! [`SectionModel`]s. Cells hold either a constant [`Value`], an [`ExpressionNode`] tree, or an
//! unparsed [`FormulaSource`]. Numbers are exact [`BigDecimal`]s so every numeric backend can
//! convert literals without an intermediate binary float.

mod accessor;
mod address;
mod error;
mod expr;
mod function;
mod model;
mod number;
mod value;

pub use accessor::{
    AccessorPath, AccessorStep, OutputAccessor, OutputInterface, SectionInterface, ValueType,
};
pub use address::{col_to_name, name_to_col, CellAddress, RangeAddress, Reference, ReferenceDialect};
pub use error::ModelError;
pub use expr::{
    ArrayDescriptor, DatabaseFoldDef, ExpressionNode, FoldArrayDef, FoldDef, FoldFilter, NodeKind,
    Operator,
};
pub use function::Function;
pub use model::{
    CellContent, CellId, CellModel, ComputationModel, FormulaSource, Orientation, SectionId,
    SectionModel,
};
pub use number::{BigDecimal, NumericType, ParseDecimalError, RoundingMode};
pub use value::{DataType, Value};
