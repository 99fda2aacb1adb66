use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use formula_model::{DataType, RoundingMode, Value, ValueType};

use super::input::{read_rows, read_value, InputObject};
use super::program::{Code, Program, SlotBody};
use crate::error::{ErrorKind, EvalError};
use crate::eval::functions::{self, Branch};
use crate::eval::ops;
use crate::eval::{
    flatten, fold, fold_elements, fold_rows, Args, Array, FoldSteps, Operand, Scalar,
};
use crate::numeric::Arithmetic;

/// One level of section iteration: the record a section's cells read their inputs from.
#[derive(Clone)]
pub(crate) struct Frame {
    pub section: u32,
    pub record: Rc<dyn InputObject>,
    /// Position among the parent's rows; `None` for the root.
    pub row: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    rows: Vec<u32>,
    section: u32,
    slot: u32,
}

/// Memoized scalar slot values of one computation.
pub(crate) type Cache = HashMap<CacheKey, Value>;

/// Tree-walking evaluator for a [`Program`] under one arithmetic backend.
pub(crate) struct Vm<'p, A: Arithmetic> {
    ar: &'p A,
    program: &'p Program,
    frames: Vec<Frame>,
    locals: Vec<Option<Operand<A::Num>>>,
    cache: Option<&'p RefCell<Cache>>,
}

impl<'p, A: Arithmetic> Vm<'p, A> {
    pub fn new(
        ar: &'p A,
        program: &'p Program,
        frames: Vec<Frame>,
        cache: Option<&'p RefCell<Cache>>,
    ) -> Self {
        Self {
            ar,
            program,
            frames,
            locals: Vec::new(),
            cache,
        }
    }

    /// Computes a slot of the innermost frame's section and converts it to `value_type`.
    pub fn output(&mut self, slot: u32, value_type: ValueType) -> Result<Value, EvalError> {
        let frame = self.frames.len().checked_sub(1).ok_or(ErrorKind::Ref)?;
        let value = self.read_slot(frame, slot)?.into_scalar()?;
        Ok(convert(self.ar, &value, value_type)?)
    }

    fn read_slot(&mut self, frame: usize, slot: u32) -> Result<Operand<A::Num>, EvalError> {
        let section = self.frames[frame].section;
        let key = self.cache.map(|_| CacheKey {
            rows: self.frames[..=frame].iter().filter_map(|f| f.row).collect(),
            section,
            slot,
        });
        if let (Some(cache), Some(key)) = (self.cache, &key) {
            if let Some(value) = cache.borrow().get(key) {
                return Ok(Operand::Scalar(Scalar::from_value(self.ar, value)?));
            }
        }

        let program = self.program;
        let code = program.slot(section, slot).ok_or(ErrorKind::Ref)?;
        let inner = self.frames.split_off(frame + 1);
        let locals = std::mem::replace(&mut self.locals, vec![None; code.locals as usize]);
        let result = match &code.body {
            SlotBody::Input(path) => read_value(&self.frames[frame].record, path)
                .and_then(|value| Ok(coerce(self.ar, value, code.data_type)?))
                .map(Operand::Scalar),
            SlotBody::Value(value) => Scalar::from_value(self.ar, value)
                .map(Operand::Scalar)
                .map_err(EvalError::from),
            SlotBody::Code(body) => self.eval(body),
        };
        self.locals = locals;
        self.frames.extend(inner);

        let result = result?;
        if let (Some(cache), Some(key), Operand::Scalar(scalar)) = (self.cache, key, &result) {
            log::trace!("cached {}", code.name);
            cache.borrow_mut().insert(key, scalar.to_value(self.ar)?);
        }
        Ok(result)
    }

    fn frame_of(&self, section: u32) -> Result<usize, ErrorKind> {
        self.frames
            .iter()
            .rposition(|f| f.section == section)
            .ok_or(ErrorKind::Ref)
    }

    fn set_local(&mut self, local: u32, value: Operand<A::Num>) -> Result<(), ErrorKind> {
        let entry = self.locals.get_mut(local as usize).ok_or(ErrorKind::Value)?;
        *entry = Some(value);
        Ok(())
    }

    fn eval_all(&mut self, codes: &'p [Code]) -> Result<Vec<Operand<A::Num>>, EvalError> {
        codes.iter().map(|c| self.eval(c)).collect()
    }

    fn eval(&mut self, code: &'p Code) -> Result<Operand<A::Num>, EvalError> {
        let ar = self.ar;
        match code {
            Code::Const(value) => Ok(Operand::Scalar(Scalar::from_value(ar, value)?)),
            Code::Slot { section, slot } => {
                let frame = self.frame_of(*section)?;
                self.read_slot(frame, *slot)
            }
            Code::Local(local) => self
                .locals
                .get(*local as usize)
                .cloned()
                .flatten()
                .ok_or(EvalError::Formula(ErrorKind::Value)),
            Code::Op(op, args) => {
                let args = args
                    .iter()
                    .map(|c| self.eval(c))
                    .collect::<Result<Args<A::Num>, _>>()?;
                Ok(ops::apply(ar, *op, args)?)
            }
            Code::Call(fun, args) if functions::is_lazy(*fun) => {
                let Some((selector, rest)) = args.split_first() else {
                    return Err(ErrorKind::Value.into());
                };
                let selector = self.eval(selector)?;
                match functions::select(ar, *fun, selector, args.len())? {
                    Branch::Arg(i) => self.eval(&rest[i - 1]),
                    Branch::Value(v) => Ok(Operand::Scalar(v)),
                }
            }
            Code::Call(fun, args) => {
                let args = self.eval_all(args)?;
                Ok(functions::call(ar, *fun, args)?)
            }
            Code::Array { rows, cols, items } => {
                let items = flatten(self.eval_all(items)?, false);
                Ok(Operand::Array(shaped(*rows, *cols, items)))
            }
            Code::Outer { section, code } => {
                let frame = self.frame_of(*section)?;
                let inner = self.frames.split_off(frame + 1);
                let result = self.eval(code);
                self.frames.extend(inner);
                result
            }
            Code::Rows { section, items } => self.rows(*section, items),
            Code::Let { local, value, body } => {
                let value = self.eval(value)?;
                self.set_local(*local, value)?;
                self.eval(body)
            }
            Code::Fold(f) => {
                let seed = self.eval(&f.seed);
                let operands = self.eval_all(&f.elements)?;
                let elements = match f.index {
                    Some(_) => flatten(operands, false),
                    None => fold_elements(ar, f.visits, operands)?,
                };
                let mut steps = Steps {
                    vm: self,
                    acc: f.acc,
                    elt: f.elt,
                    index: f.index,
                    step: &f.step,
                    filter: None,
                };
                fold(&mut steps, f.from_first, seed, elements)
            }
            Code::DatabaseFold(f) => {
                let seed = self.eval(&f.seed);
                let items = flatten(self.eval_all(&f.rows)?, false);
                let mut steps = Steps {
                    vm: self,
                    acc: f.acc,
                    elt: f.elt,
                    index: None,
                    step: &f.step,
                    filter: Some((f.columns.as_slice(), &f.filter)),
                };
                fold_rows(
                    &mut steps,
                    f.from_first,
                    f.visits,
                    seed,
                    items,
                    f.columns.len(),
                    f.folded_column as usize,
                )
            }
            Code::Count(args) => {
                let args = self.eval_all(args)?;
                Ok(Operand::number(ar, functions::count(ar, &args))?)
            }
        }
    }

    /// Evaluates `items` in a frame per row of `section`, collecting the results row-major.
    fn rows(&mut self, section: u32, items: &'p [Code]) -> Result<Operand<A::Num>, EvalError> {
        let program = self.program;
        let code = program.section(section).ok_or(ErrorKind::Ref)?;
        let (Some(parent), Some(path)) = (code.parent, code.rows.as_ref()) else {
            return Err(ErrorKind::Ref.into());
        };
        let frame = self.frame_of(parent)?;
        let records = read_rows(&self.frames[frame].record, path)?;
        let inner = self.frames.split_off(frame + 1);
        let mut collected = Vec::with_capacity(records.len() * items.len());
        let mut result = Ok(());
        for (row, record) in records.into_iter().enumerate() {
            self.frames.push(Frame {
                section,
                record,
                row: Some(row as u32),
            });
            let values = self.eval_all(items);
            self.frames.pop();
            match values {
                Ok(values) => collected.extend(flatten(values, false)),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        self.frames.extend(inner);
        result?;
        let rows = u32::try_from(collected.len() / items.len().max(1)).map_err(|_| ErrorKind::Value)?;
        let cols = u32::try_from(items.len()).map_err(|_| ErrorKind::Value)?;
        Ok(Operand::Array(shaped(rows, cols, collected)))
    }
}

/// Array of `items`, keeping the declared shape when it fits. Band units expand to one row per
/// runtime row, so the row count is recomputed from the column count.
fn shaped<N>(rows: u32, cols: u32, items: Vec<Scalar<N>>) -> Array<N> {
    let len = items.len();
    let (rows, cols) = if rows as usize * cols as usize == len {
        (rows, cols)
    } else if cols > 0 && len % cols as usize == 0 {
        ((len / cols as usize) as u32, cols)
    } else {
        (1, len as u32)
    };
    Array { rows, cols, items }
}

struct Steps<'v, 'p, A: Arithmetic> {
    vm: &'v mut Vm<'p, A>,
    acc: u32,
    elt: u32,
    index: Option<u32>,
    step: &'p Code,
    filter: Option<(&'p [u32], &'p Code)>,
}

impl<A: Arithmetic> FoldSteps<A::Num> for Steps<'_, '_, A> {
    type Error = EvalError;

    fn step(
        &mut self,
        acc: Operand<A::Num>,
        elt: Scalar<A::Num>,
        index: usize,
    ) -> Result<Operand<A::Num>, EvalError> {
        let ar = self.vm.ar;
        self.vm.set_local(self.acc, acc)?;
        self.vm.set_local(self.elt, Operand::Scalar(elt))?;
        if let Some(local) = self.index {
            self.vm.set_local(local, Operand::number(ar, index as i64)?)?;
        }
        self.vm.eval(self.step)
    }

    fn accepts(&mut self, row: &[Scalar<A::Num>]) -> Result<bool, EvalError> {
        let Some((columns, filter)) = self.filter else {
            return Ok(true);
        };
        for (&local, value) in columns.iter().zip(row) {
            self.vm.set_local(local, Operand::Scalar(value.clone()))?;
        }
        let verdict = self.vm.eval(filter)?.into_scalar()?;
        Ok(verdict.truthy(self.vm.ar)?)
    }
}

/// Brings an input value to the type inferred for its cell. Numeric cells accept numeric text.
fn coerce<A: Arithmetic>(ar: &A, value: Value, data_type: DataType) -> Result<Scalar<A::Num>, ErrorKind> {
    match (data_type, value) {
        (DataType::Numeric, Value::Text(text)) if text.trim().is_empty() => Ok(Scalar::Null),
        (DataType::Numeric, Value::Text(text)) => ar.parse(&text).map(Scalar::Number),
        (DataType::String, Value::Number(n)) => {
            let n = ar.from_decimal(&n)?;
            Ok(Scalar::Text(ar.format(&n)))
        }
        (_, value) => Scalar::from_value(ar, &value),
    }
}

/// Converts a result to an output's declared type.
fn convert<A: Arithmetic>(ar: &A, value: &Scalar<A::Num>, value_type: ValueType) -> Result<Value, ErrorKind> {
    let number = |value: &Scalar<A::Num>| -> Result<Value, ErrorKind> {
        let n = value.to_number(ar)?;
        Ok(Value::Number(ar.to_decimal(&n)?.normalized()))
    };
    match value_type {
        ValueType::Any => match value {
            Scalar::Number(_) => number(value),
            other => other.to_value(ar),
        },
        ValueType::Number => number(value),
        ValueType::Integer => {
            let n = ar.to_decimal(&value.to_number(ar)?)?;
            Ok(Value::Number(n.with_scale(0, RoundingMode::Down)))
        }
        ValueType::Text => Ok(Value::Text(value.to_text(ar))),
    }
}

#[cfg(test)]
mod tests {
    use formula_model::{BigDecimal, Operator};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::engine::input::Record;
    use crate::engine::program::{SectionCode, SlotCode};
    use crate::numeric::{Double, ScaledLong};

    fn slot(name: &str, body: SlotBody, locals: u32) -> SlotCode {
        SlotCode {
            name: name.to_string(),
            data_type: DataType::Numeric,
            body,
            locals,
        }
    }

    fn program(slots: Vec<SlotCode>, band: Option<Vec<SlotCode>>) -> Program {
        let mut sections = vec![SectionCode {
            name: "m".to_string(),
            parent: None,
            rows: None,
            slots,
            outputs: Vec::new(),
            row_outputs: Vec::new(),
        }];
        if let Some(slots) = band {
            sections.push(SectionCode {
                name: "rows".to_string(),
                parent: Some(0),
                rows: Some(formula_model::AccessorPath::field("rows")),
                slots,
                outputs: Vec::new(),
                row_outputs: Vec::new(),
            });
        }
        Program {
            numeric_type: formula_model::NumericType::Double,
            full_caching: false,
            sections,
        }
    }

    fn root(record: Record) -> Vec<Frame> {
        vec![Frame {
            section: 0,
            record: Rc::new(record),
            row: None,
        }]
    }

    #[test]
    fn numeric_inputs_accept_text() {
        let program = program(
            vec![
                slot("A", SlotBody::Input(formula_model::AccessorPath::field("a")), 0),
                slot(
                    "B",
                    SlotBody::Code(Code::Op(
                        Operator::Mul,
                        vec![Code::Slot { section: 0, slot: 0 }, Code::Const(Value::number(40))],
                    )),
                    0,
                ),
            ],
            None,
        );
        let mut vm = Vm::new(&Double, &program, root(Record::new().with("a", "4")), None);
        assert_eq!(vm.output(1, ValueType::Number).unwrap(), Value::number(160));

        let mut vm = Vm::new(&Double, &program, root(Record::new().with("a", "four")), None);
        let err = vm.output(1, ValueType::Number).unwrap_err();
        assert_eq!(err.formula_error(), Some(ErrorKind::Value));
    }

    #[test]
    fn rows_are_folded_per_record() {
        let amount = slot("AMOUNT", SlotBody::Input(formula_model::AccessorPath::field("amount")), 0);
        let total = slot(
            "TOTAL",
            SlotBody::Code(Code::Call(
                formula_model::Function::Sum,
                vec![Code::Array {
                    rows: 1,
                    cols: 1,
                    items: vec![Code::Rows {
                        section: 1,
                        items: vec![Code::Slot { section: 1, slot: 0 }],
                    }],
                }],
            )),
            0,
        );
        let program = program(vec![total], Some(vec![amount]));
        let input = Record::new().with_rows(
            "rows",
            [1, 2, 3].map(|n| Record::new().with("amount", n)),
        );
        let mut vm = Vm::new(&Double, &program, root(input), None);
        assert_eq!(vm.output(0, ValueType::Any).unwrap(), Value::number(6));
    }

    #[test]
    fn cached_slots_are_read_back() {
        let program = program(
            vec![slot("A", SlotBody::Input(formula_model::AccessorPath::field("a")), 0)],
            None,
        );
        let cache = RefCell::new(Cache::new());
        let mut vm = Vm::new(&Double, &program, root(Record::new().with("a", 2)), Some(&cache));
        assert_eq!(vm.output(0, ValueType::Any).unwrap(), Value::number(2));
        assert_eq!(cache.borrow().len(), 1);

        // A record without `a` still answers from the cache.
        let mut vm = Vm::new(&Double, &program, root(Record::new()), Some(&cache));
        assert_eq!(vm.output(0, ValueType::Any).unwrap(), Value::number(2));
    }

    #[test]
    fn outputs_convert_to_the_declared_type() {
        let ar = ScaledLong::new(4);
        let n = ar.from_decimal(&"-2.75".parse::<BigDecimal>().unwrap()).unwrap();
        let value = Scalar::Number(n);
        assert_eq!(convert(&ar, &value, ValueType::Integer).unwrap(), Value::number(-2));
        assert_eq!(convert(&ar, &value, ValueType::Text).unwrap(), Value::text("-2.75"));
        assert_eq!(
            convert(&ar, &Scalar::Text("12".to_string()), ValueType::Number).unwrap(),
            Value::number(12)
        );
        assert_eq!(convert(&ar, &Scalar::Null, ValueType::Any).unwrap(), Value::Null);
    }
}
