use formula_model::{CellContent, CellId, ComputationModel, ExpressionNode, NodeKind, Value};

use super::fold::{elements as fold_elements, fold, fold_rows, FoldSteps};
use super::functions::{self, Branch};
use super::value::flatten;
use super::{ops, Array, Operand, Scalar};
use crate::error::ErrorKind;
use crate::numeric::Arithmetic;
use crate::scope::{LetDictionary, Scoped};

/// Source of cell values known before run time.
pub trait CellLookup {
    /// The cell's fixed value, or `None` when it is only known at run time.
    fn constant(&self, id: CellId) -> Option<Value>;
}

impl CellLookup for ComputationModel {
    fn constant(&self, id: CellId) -> Option<Value> {
        let cell = self.cell(id);
        if cell.is_input() {
            return None;
        }
        match cell.content() {
            CellContent::Empty => Some(Value::Null),
            CellContent::Constant(value) => Some(value.clone()),
            CellContent::Expression(_) | CellContent::Formula(_) => None,
        }
    }
}

/// Why an expression could not be reduced to a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Stop {
    /// Depends on run-time data.
    NotConstant,
    /// Evaluates to a spreadsheet error.
    Failed(ErrorKind),
}

impl From<ErrorKind> for Stop {
    fn from(kind: ErrorKind) -> Self {
        Stop::Failed(kind)
    }
}

/// Evaluates expression trees directly, without compiling them.
///
/// Used at compile time to fold constant subexpressions; anything that depends on inputs or
/// on computed cells stops evaluation with [`Stop::NotConstant`].
pub struct Interpreter<'a, A: Arithmetic> {
    ar: &'a A,
    cells: &'a dyn CellLookup,
    scope: LetDictionary<Operand<A::Num>>,
}

impl<A: Arithmetic> Scoped for Interpreter<'_, A> {
    type Value = Operand<A::Num>;

    fn let_dictionary(&mut self) -> &mut LetDictionary<Operand<A::Num>> {
        &mut self.scope
    }
}

impl<'a, A: Arithmetic> Interpreter<'a, A> {
    pub fn new(ar: &'a A, cells: &'a dyn CellLookup) -> Self {
        Self {
            ar,
            cells,
            scope: LetDictionary::new(),
        }
    }

    /// Evaluates to a single value; array results are not constants of a cell.
    pub fn evaluate_value(&mut self, node: &ExpressionNode) -> Result<Value, Stop> {
        match self.evaluate(node)? {
            Operand::Scalar(s) => Ok(s.to_value(self.ar)?),
            Operand::Array(_) => Err(Stop::NotConstant),
        }
    }

    pub fn evaluate(&mut self, node: &ExpressionNode) -> Result<Operand<A::Num>, Stop> {
        let ar = self.ar;
        match &node.kind {
            NodeKind::Constant(value) => Ok(Operand::Scalar(Scalar::from_value(ar, value)?)),
            NodeKind::CellRef(id) => match self.cells.constant(*id) {
                Some(value) => Ok(Operand::Scalar(Scalar::from_value(ar, &value)?)),
                None => Err(Stop::NotConstant),
            },
            NodeKind::Reference(_) | NodeKind::SubSection(_) => Err(Stop::NotConstant),
            NodeKind::Array(desc) | NodeKind::MakeArray(desc) => {
                let mut items = Vec::with_capacity(node.args.len());
                for arg in &node.args {
                    items.push(self.evaluate(arg)?.into_scalar()?);
                }
                Ok(Operand::Array(Array {
                    rows: desc.rows,
                    cols: desc.cols,
                    items,
                }))
            }
            NodeKind::ParentSection(_) => match node.args.first() {
                Some(inner) => self.evaluate(inner),
                None => Err(Stop::NotConstant),
            },
            NodeKind::Operator(op) => {
                let args = self.evaluate_all(&node.args)?;
                Ok(ops::apply(ar, *op, args)?)
            }
            NodeKind::Function(fun) if functions::is_lazy(*fun) => {
                let Some((selector, rest)) = node.args.split_first() else {
                    return Err(ErrorKind::Value.into());
                };
                let selector = self.evaluate(selector)?;
                match functions::select(ar, *fun, selector, node.args.len())? {
                    Branch::Arg(i) => self.evaluate(&rest[i - 1]),
                    Branch::Value(v) => Ok(Operand::Scalar(v)),
                }
            }
            NodeKind::Function(fun) => {
                let args = self.evaluate_all(&node.args)?;
                Ok(functions::call(ar, *fun, args)?)
            }
            NodeKind::Let(name) => {
                let [value, body] = node.args.as_slice() else {
                    return Err(ErrorKind::Value.into());
                };
                let value = self.evaluate(value)?;
                let mut scope = self.scope();
                scope.bind(name.as_str(), None, Some(value));
                scope.evaluate(body)
            }
            NodeKind::LetVar(name) => self
                .scope
                .get(name)
                .and_then(|entry| entry.value.clone())
                .ok_or(Stop::NotConstant),
            NodeKind::Count => {
                let args = self.evaluate_all(&node.args)?;
                Ok(Operand::number(ar, functions::count(ar, &args))?)
            }
            NodeKind::Fold(def) => {
                let [seed, step, elements @ ..] = node.args.as_slice() else {
                    return Err(ErrorKind::Value.into());
                };
                let seed = self.evaluate(seed);
                let elements = fold_elements(ar, def.filter, self.evaluate_all(elements)?)?;
                let mut steps = StepEval {
                    interp: self,
                    acc: &def.acc,
                    elt: &def.elt,
                    index: None,
                    step,
                    filter: None,
                };
                fold(&mut steps, def.from_first, seed, elements)
            }
            NodeKind::FoldArray(def) => {
                let [seed, step, elements @ ..] = node.args.as_slice() else {
                    return Err(ErrorKind::Value.into());
                };
                let seed = self.evaluate(seed);
                let elements = flatten(self.evaluate_all(elements)?, false);
                let mut steps = StepEval {
                    interp: self,
                    acc: &def.fold.acc,
                    elt: &def.fold.elt,
                    index: Some(&def.index),
                    step,
                    filter: None,
                };
                fold(&mut steps, def.fold.from_first, seed, elements)
            }
            NodeKind::DatabaseFold(def) => {
                let [seed, step, filter, rows @ ..] = node.args.as_slice() else {
                    return Err(ErrorKind::Value.into());
                };
                let seed = self.evaluate(seed);
                let items = flatten(self.evaluate_all(rows)?, false);
                let mut steps = StepEval {
                    interp: self,
                    acc: &def.fold.acc,
                    elt: &def.fold.elt,
                    index: None,
                    step,
                    filter: Some((def.columns.as_slice(), filter)),
                };
                fold_rows(
                    &mut steps,
                    def.fold.from_first,
                    def.fold.filter,
                    seed,
                    items,
                    def.columns.len(),
                    def.folded_column,
                )
            }
        }
    }

    fn evaluate_all(&mut self, args: &[ExpressionNode]) -> Result<Vec<Operand<A::Num>>, Stop> {
        args.iter().map(|arg| self.evaluate(arg)).collect()
    }
}

struct StepEval<'i, 'a, A: Arithmetic> {
    interp: &'i mut Interpreter<'a, A>,
    acc: &'i str,
    elt: &'i str,
    index: Option<&'i str>,
    step: &'i ExpressionNode,
    filter: Option<(&'i [String], &'i ExpressionNode)>,
}

impl<A: Arithmetic> FoldSteps<A::Num> for StepEval<'_, '_, A> {
    type Error = Stop;

    fn step(
        &mut self,
        acc: Operand<A::Num>,
        elt: Scalar<A::Num>,
        index: usize,
    ) -> Result<Operand<A::Num>, Stop> {
        let ar = self.interp.ar;
        let mut scope = self.interp.scope();
        scope.bind(self.acc, None, Some(acc));
        scope.bind(self.elt, None, Some(Operand::Scalar(elt)));
        if let Some(name) = self.index {
            scope.bind(name, None, Some(Operand::number(ar, index as i64)?));
        }
        scope.evaluate(self.step)
    }

    fn accepts(&mut self, row: &[Scalar<A::Num>]) -> Result<bool, Stop> {
        let Some((columns, filter)) = self.filter else {
            return Ok(true);
        };
        let ar = self.interp.ar;
        let mut scope = self.interp.scope();
        for (name, value) in columns.iter().zip(row) {
            scope.bind(name.as_str(), None, Some(Operand::Scalar(value.clone())));
        }
        let verdict = scope.evaluate(filter)?.into_scalar()?;
        Ok(verdict.truthy(ar)?)
    }
}
