#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Compiles spreadsheet computation models into engines that evaluate them against caller data.
//!
//! A [`formula_model::ComputationModel`] describes cells (constants, formulas, inputs, outputs)
//! grouped into repeating sections. Compilation runs a fixed pipeline of passes:
//!
//! 1. [`ModelResolver`] parses formula text and binds references to cells (for example through
//!    a [`GridResolver`] for sheet-addressed models).
//! 2. [`CircularReferenceChecker`] rejects self-dependent cells.
//! 3. [`TypeAnnotator`] infers a [`formula_model::DataType`] for every node.
//! 4. [`ModelRewriter`] desugars aggregates (`SUM`, `AVERAGE`, `VARP`, `DSUM`, ...) into folds.
//! 5. [`ConstantSubexpressionEliminator`] evaluates everything that does not depend on inputs.
//! 6. [`ReferenceCounter`] and [`IntermediateResultsInliner`] collapse single-use cells.
//! 7. The model is lowered into a serializable [`Program`] wrapped by an [`Engine`].
//!
//! [`EngineCompiler`] runs steps 2 to 7. Engines are evaluated with one of three arithmetic
//! backends ([`numeric::Double`], [`numeric::ScaledLong`], [`numeric::Decimal`]) selected by
//! [`formula_model::NumericType`], and can be persisted with [`Engine::save_to`].
//!
//! ```no_run
//! use formula_compiler::{EngineCompiler, GridResolver, ModelResolver, Record};
//! use formula_model::{AccessorPath, ComputationModel, FormulaSource, OutputInterface, ReferenceDialect, ValueType};
//!
//! let mut model = ComputationModel::new("price");
//! let root = model.root();
//! let qty = model.add_constant(root, "A1", 0).unwrap();
//! model.bind_input(qty, AccessorPath::field("quantity"));
//! let total = model
//!     .add_formula(root, "B1", FormulaSource::new("A1*2.5", ReferenceDialect::A1))
//!     .unwrap();
//! model.bind_output(total, "total").unwrap();
//!
//! let resolver = GridResolver::from_model(&model);
//! ModelResolver::new(&resolver).resolve(&mut model).unwrap();
//! let interface = OutputInterface::new().output("total", ValueType::Number);
//! let engine = EngineCompiler::default().compile(model, &interface).unwrap();
//! let computation = engine.new_computation(Record::new().with("quantity", 4));
//! assert_eq!(computation.value("total").unwrap().to_string(), "10");
//! ```

mod analysis;
mod engine;
mod error;
pub mod eval;
pub mod numeric;
mod optimizer;
pub mod parser;
pub mod resolve;
mod rewrite;
pub mod scope;

pub use analysis::{CircularReferenceChecker, TypeAnnotator};
pub use engine::{
    AccessorError, Code, CompileOptions, Computation, DatabaseFoldCode, Engine, EngineCompiler,
    FoldCode, Input, InputFn, InputObject, OutputCode, Program, Record, RowsOutput, SectionCode,
    SlotBody, SlotCode, ENGINE_FORMAT_VERSION, ENGINE_MAGIC,
};
pub use error::{
    CompilerError, CompilerResult, CycleError, EngineError, ErrorKind, EvalError, InputError,
    ParseError, Span,
};
pub use optimizer::{ConstantSubexpressionEliminator, IntermediateResultsInliner, ReferenceCounter};
pub use parser::{parse_formula, parse_formula_with, NameResolver, NoNames, ParseOptions};
pub use resolve::{GridResolver, ModelResolver, ReferenceResolver};
pub use rewrite::{ExpressionRewriter, ModelRewriter, RewriteRules, Rule, RuleContext};
pub use scope::{LetDictionary, LetScope, Scoped};
