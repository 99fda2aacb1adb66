use core::fmt;
use std::collections::HashMap;
use std::rc::Rc;

use formula_model::{AccessorPath, AccessorStep, Value};

use crate::error::{EvalError, InputError};

/// What one accessor step yields.
#[derive(Clone)]
pub enum Input {
    Value(Value),
    Object(Rc<dyn InputObject>),
    Rows(Vec<Rc<dyn InputObject>>),
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Input::Object(_) => f.write_str("Object(..)"),
            Input::Rows(rows) => write!(f, "Rows({})", rows.len()),
        }
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Value(value)
    }
}

/// Caller-side object the engine reads inputs from, one step at a time.
///
/// Accessors are expected to be free of side effects; an error aborts the output being computed
/// and reaches the caller unchanged.
pub trait InputObject {
    fn get(&self, step: &AccessorStep) -> Result<Input, InputError>;
}

/// Failures of the ready-made input objects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessorError {
    #[error("no input named `{0}`")]
    Missing(String),
    #[error("input `{0}` is not an object")]
    NotAnObject(String),
    #[error("input `{0}` is not a row collection")]
    NotRows(String),
    #[error("input `{0}` is not a single value")]
    NotAValue(String),
}

/// Input object backed by a map of named fields.
///
/// Parameterized steps are looked up by their printed form, e.g. `rate("EUR")`.
#[derive(Clone, Default)]
pub struct Record {
    fields: HashMap<String, Input>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_input(name, Input::Value(value.into()))
    }

    pub fn with_input(mut self, name: impl Into<String>, input: Input) -> Self {
        self.fields.insert(name.into(), input);
        self
    }

    pub fn with_object(self, name: impl Into<String>, object: Record) -> Self {
        self.with_input(name, Input::Object(Rc::new(object)))
    }

    pub fn with_rows(self, name: impl Into<String>, rows: impl IntoIterator<Item = Record>) -> Self {
        let rows = rows
            .into_iter()
            .map(|r| Rc::new(r) as Rc<dyn InputObject>)
            .collect();
        self.with_input(name, Input::Rows(rows))
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.fields.iter()).finish()
    }
}

impl InputObject for Record {
    fn get(&self, step: &AccessorStep) -> Result<Input, InputError> {
        let key = if step.args.is_empty() {
            step.name.clone()
        } else {
            step.to_string()
        };
        self.fields
            .get(&key)
            .cloned()
            .ok_or_else(|| AccessorError::Missing(key).into())
    }
}

/// Input object backed by a closure.
pub struct InputFn<F>(pub F);

impl<F> InputObject for InputFn<F>
where
    F: Fn(&AccessorStep) -> Result<Input, InputError>,
{
    fn get(&self, step: &AccessorStep) -> Result<Input, InputError> {
        (self.0)(step)
    }
}

fn follow(object: &Rc<dyn InputObject>, path: &AccessorPath) -> Result<Input, EvalError> {
    let Some((init, last)) = path.split_last() else {
        return Ok(Input::Object(Rc::clone(object)));
    };
    let mut current = Rc::clone(object);
    for step in init {
        current = match current.get(step).map_err(EvalError::Input)? {
            Input::Object(next) => next,
            _ => return Err(EvalError::Input(AccessorError::NotAnObject(step.to_string()).into())),
        };
    }
    current.get(last).map_err(EvalError::Input)
}

/// The value at the end of `path`.
pub(crate) fn read_value(object: &Rc<dyn InputObject>, path: &AccessorPath) -> Result<Value, EvalError> {
    match follow(object, path)? {
        Input::Value(value) => Ok(value),
        _ => Err(EvalError::Input(AccessorError::NotAValue(path.to_string()).into())),
    }
}

/// The rows at the end of `path`; an empty value means no rows.
pub(crate) fn read_rows(
    object: &Rc<dyn InputObject>,
    path: &AccessorPath,
) -> Result<Vec<Rc<dyn InputObject>>, EvalError> {
    match follow(object, path)? {
        Input::Rows(rows) => Ok(rows),
        Input::Value(Value::Null) => Ok(Vec::new()),
        _ => Err(EvalError::Input(AccessorError::NotRows(path.to_string()).into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(record: Record) -> Rc<dyn InputObject> {
        Rc::new(record)
    }

    #[test]
    fn paths_walk_nested_objects() {
        let input = root(
            Record::new()
                .with_object("customer", Record::new().with("rate(\"EUR\")", "1.5"))
                .with_rows("orders", [Record::new(), Record::new()])
                .with("none", Value::Null),
        );
        let rate = AccessorPath::new(vec![
            AccessorStep::new("customer"),
            AccessorStep::with_args("rate", vec![Value::text("EUR")]),
        ]);
        assert_eq!(read_value(&input, &rate).unwrap(), Value::text("1.5"));
        assert_eq!(read_rows(&input, &AccessorPath::field("orders")).unwrap().len(), 2);
        assert!(read_rows(&input, &AccessorPath::field("none")).unwrap().is_empty());
    }

    #[test]
    fn accessor_failures_surface_unchanged() {
        let input = root(Record::new().with("x", 1));
        let err = read_value(&input, &AccessorPath::field("y")).unwrap_err();
        let EvalError::Input(inner) = err else {
            panic!("expected an input error");
        };
        assert_eq!(
            inner.downcast_ref::<AccessorError>(),
            Some(&AccessorError::Missing("y".to_string()))
        );
        assert!(read_value(&input, &AccessorPath::fields(["x", "z"])).is_err());
    }

    #[test]
    fn closures_are_input_objects() {
        let input: Rc<dyn InputObject> = Rc::new(InputFn(|step: &AccessorStep| {
            Ok::<_, InputError>(Input::Value(Value::text(step.name.to_uppercase())))
        }));
        assert_eq!(
            read_value(&input, &AccessorPath::field("abc")).unwrap(),
            Value::text("ABC")
        );
    }
}
