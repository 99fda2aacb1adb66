use core::fmt;

use serde::{Deserialize, Serialize};

use crate::BigDecimal;

/// Static type of a cell or expression.
///
/// Booleans are numeric (`TRUE = 1`), so three types cover every value a model can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Numeric,
    String,
    Null,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataType::Numeric => "NUMERIC",
            DataType::String => "STRING",
            DataType::Null => "NULL",
        })
    }
}

/// A literal value: constant cell content, folded constants and engine outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Number(BigDecimal),
    Text(String),
}

impl Value {
    pub fn number(n: impl Into<BigDecimal>) -> Self {
        Value::Number(n.into())
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn boolean(b: bool) -> Self {
        Value::number(i64::from(b))
    }

    /// `None` for NaN and infinities.
    pub fn from_f64(v: f64) -> Option<Self> {
        BigDecimal::from_f64(v).map(Value::Number)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Number(_) => DataType::Numeric,
            Value::Text(_) => DataType::String,
        }
    }

    pub fn as_number(&self) -> Option<&BigDecimal> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view used by tests and callers that want a plain float.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n.to_f64()),
            Value::Null => Some(0.0),
            Value::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<BigDecimal> for Value {
    fn from(n: BigDecimal) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::text(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Number(n) => write!(f, "{}", n.normalized()),
            Value::Text(s) => {
                f.write_str("\"")?;
                f.write_str(&s.replace('"', "\"\""))?;
                f.write_str("\"")
            }
        }
    }
}
