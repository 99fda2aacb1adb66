use formula_model::Value;
use smallvec::SmallVec;

use crate::error::ErrorKind;
use crate::numeric::Arithmetic;

/// A single runtime value in a backend's number representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar<N> {
    Number(N),
    Text(String),
    Null,
}

/// Row-major grid of scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct Array<N> {
    pub rows: u32,
    pub cols: u32,
    pub items: Vec<Scalar<N>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand<N> {
    Scalar(Scalar<N>),
    Array(Array<N>),
}

/// Arguments of one operator or function call.
pub(crate) type Args<N> = SmallVec<[Operand<N>; 4]>;

impl<N: Clone> Scalar<N> {
    pub fn from_value<A: Arithmetic<Num = N>>(ar: &A, value: &Value) -> Result<Self, ErrorKind> {
        Ok(match value {
            Value::Null => Scalar::Null,
            Value::Number(n) => Scalar::Number(ar.from_decimal(n)?),
            Value::Text(s) => Scalar::Text(s.clone()),
        })
    }

    pub fn to_value<A: Arithmetic<Num = N>>(&self, ar: &A) -> Result<Value, ErrorKind> {
        Ok(match self {
            Scalar::Null => Value::Null,
            Scalar::Number(n) => Value::Number(ar.to_decimal(n)?),
            Scalar::Text(s) => Value::Text(s.clone()),
        })
    }

    pub fn boolean<A: Arithmetic<Num = N>>(ar: &A, b: bool) -> Result<Self, ErrorKind> {
        Ok(Scalar::Number(ar.from_i64(i64::from(b))?))
    }

    /// Numeric view: empty is zero, text must parse.
    pub fn to_number<A: Arithmetic<Num = N>>(&self, ar: &A) -> Result<N, ErrorKind> {
        match self {
            Scalar::Number(n) => Ok(n.clone()),
            Scalar::Null => ar.from_i64(0),
            Scalar::Text(s) => ar.parse(s),
        }
    }

    pub fn to_text<A: Arithmetic<Num = N>>(&self, ar: &A) -> String {
        match self {
            Scalar::Number(n) => ar.format(n),
            Scalar::Text(s) => s.clone(),
            Scalar::Null => String::new(),
        }
    }

    /// Logical view: non-zero numbers and the texts `TRUE`/`FALSE`.
    pub fn truthy<A: Arithmetic<Num = N>>(&self, ar: &A) -> Result<bool, ErrorKind> {
        match self {
            Scalar::Number(n) => Ok(!ar.is_zero(n)),
            Scalar::Null => Ok(false),
            Scalar::Text(s) if s.eq_ignore_ascii_case("TRUE") => Ok(true),
            Scalar::Text(s) if s.eq_ignore_ascii_case("FALSE") => Ok(false),
            Scalar::Text(_) => Err(ErrorKind::Value),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Scalar::Number(_))
    }
}

impl<N: Clone> Operand<N> {
    /// The operand as one value. A single-element array is unwrapped; larger ones are `#VALUE!`.
    pub fn into_scalar(self) -> Result<Scalar<N>, ErrorKind> {
        match self {
            Operand::Scalar(s) => Ok(s),
            Operand::Array(mut a) if a.items.len() == 1 => Ok(a.items.remove(0)),
            Operand::Array(_) => Err(ErrorKind::Value),
        }
    }

    pub fn as_scalar(&self) -> Result<&Scalar<N>, ErrorKind> {
        match self {
            Operand::Scalar(s) => Ok(s),
            Operand::Array(a) if a.items.len() == 1 => Ok(&a.items[0]),
            Operand::Array(_) => Err(ErrorKind::Value),
        }
    }

    pub fn number<A: Arithmetic<Num = N>>(ar: &A, value: i64) -> Result<Self, ErrorKind> {
        Ok(Operand::Scalar(Scalar::Number(ar.from_i64(value)?)))
    }
}

/// Flattens operands into their scalars, row-major, optionally dropping empty values.
pub(crate) fn flatten<N: Clone>(
    operands: impl IntoIterator<Item = Operand<N>>,
    skip_nulls: bool,
) -> Vec<Scalar<N>> {
    let mut out = Vec::new();
    for operand in operands {
        match operand {
            Operand::Scalar(s) => out.push(s),
            Operand::Array(a) => out.extend(a.items),
        }
    }
    if skip_nulls {
        out.retain(|s| !matches!(s, Scalar::Null));
    }
    out
}
