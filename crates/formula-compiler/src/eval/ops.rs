//! Operator semantics.

use core::cmp::Ordering;

use formula_model::Operator;

use super::value::flatten;
use super::{Array, Operand, Scalar};
use crate::error::ErrorKind;
use crate::numeric::Arithmetic;

/// Applies an operator to already evaluated operands.
pub fn apply<A: Arithmetic>(
    ar: &A,
    op: Operator,
    args: impl IntoIterator<Item = Operand<A::Num>>,
) -> Result<Operand<A::Num>, ErrorKind> {
    let mut args = args.into_iter();
    match op {
        Operator::Union => {
            let items = flatten(args, false);
            let cols = u32::try_from(items.len()).map_err(|_| ErrorKind::Value)?;
            Ok(Operand::Array(Array { rows: 1, cols, items }))
        }
        Operator::Intersect => Err(ErrorKind::Null),
        Operator::Neg | Operator::Percent => {
            let x = args.next().ok_or(ErrorKind::Value)?.into_scalar()?;
            unary(ar, op, &x).map(Operand::Scalar)
        }
        _ => {
            let (Some(a), Some(b)) = (args.next(), args.next()) else {
                return Err(ErrorKind::Value);
            };
            binary(ar, op, &a.into_scalar()?, &b.into_scalar()?).map(Operand::Scalar)
        }
    }
}

pub fn unary<A: Arithmetic>(ar: &A, op: Operator, x: &Scalar<A::Num>) -> Result<Scalar<A::Num>, ErrorKind> {
    let n = x.to_number(ar)?;
    Ok(Scalar::Number(match op {
        Operator::Neg => ar.neg(&n),
        Operator::Percent => ar.div(&n, &ar.from_i64(100)?)?,
        _ => return Err(ErrorKind::Value),
    }))
}

pub fn binary<A: Arithmetic>(
    ar: &A,
    op: Operator,
    a: &Scalar<A::Num>,
    b: &Scalar<A::Num>,
) -> Result<Scalar<A::Num>, ErrorKind> {
    if op == Operator::Concat {
        return Ok(Scalar::Text(a.to_text(ar) + &b.to_text(ar)));
    }
    if op.is_comparison() {
        return Scalar::boolean(ar, compare_with(ar, op, a, b));
    }
    let (x, y) = (a.to_number(ar)?, b.to_number(ar)?);
    Ok(Scalar::Number(match op {
        Operator::Add => ar.add(&x, &y)?,
        Operator::Sub => ar.sub(&x, &y)?,
        Operator::Mul => ar.mul(&x, &y)?,
        Operator::Div => ar.div(&x, &y)?,
        Operator::Pow => ar.pow(&x, &y)?,
        Operator::Min => {
            if ar.cmp(&y, &x) == Ordering::Less {
                y
            } else {
                x
            }
        }
        Operator::Max => {
            if ar.cmp(&y, &x) == Ordering::Greater {
                y
            } else {
                x
            }
        }
        _ => return Err(ErrorKind::Value),
    }))
}

/// Evaluates a comparison operator.
pub fn compare_with<A: Arithmetic>(ar: &A, op: Operator, a: &Scalar<A::Num>, b: &Scalar<A::Num>) -> bool {
    let ord = compare(ar, a, b);
    match op {
        Operator::Eq => ord == Ordering::Equal,
        Operator::Ne => ord != Ordering::Equal,
        Operator::Lt => ord == Ordering::Less,
        Operator::Gt => ord == Ordering::Greater,
        Operator::Le => ord != Ordering::Greater,
        Operator::Ge => ord != Ordering::Less,
        _ => false,
    }
}

/// Spreadsheet ordering: numbers sort before text, text compares case-insensitively, and an
/// empty value equals zero or the empty string depending on what it is compared with.
pub fn compare<A: Arithmetic>(ar: &A, a: &Scalar<A::Num>, b: &Scalar<A::Num>) -> Ordering {
    match (a, b) {
        (Scalar::Number(x), Scalar::Number(y)) => ar.cmp(x, y),
        (Scalar::Text(x), Scalar::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Scalar::Number(_), Scalar::Text(_)) => Ordering::Less,
        (Scalar::Text(_), Scalar::Number(_)) => Ordering::Greater,
        (Scalar::Null, Scalar::Null) => Ordering::Equal,
        (Scalar::Null, Scalar::Number(y)) => match ar.from_i64(0) {
            Ok(zero) => ar.cmp(&zero, y),
            Err(_) => Ordering::Less,
        },
        (Scalar::Number(_), Scalar::Null) => compare(ar, b, a).reverse(),
        (Scalar::Null, Scalar::Text(y)) => "".cmp(y.as_str()),
        (Scalar::Text(x), Scalar::Null) => x.as_str().cmp(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::Double;

    fn n(v: f64) -> Scalar<f64> {
        Scalar::Number(v)
    }

    fn t(s: &str) -> Scalar<f64> {
        Scalar::Text(s.to_string())
    }

    #[test]
    fn arithmetic_coerces_text_and_empty() {
        assert_eq!(binary(&Double, Operator::Add, &t(" 4 "), &Scalar::Null), Ok(n(4.0)));
        assert_eq!(binary(&Double, Operator::Mul, &t("x"), &n(1.0)), Err(ErrorKind::Value));
        assert_eq!(binary(&Double, Operator::Div, &n(1.0), &Scalar::Null), Err(ErrorKind::Div0));
        assert_eq!(unary(&Double, Operator::Percent, &n(50.0)), Ok(n(0.5)));
    }

    #[test]
    fn comparisons_order_numbers_before_text() {
        assert_eq!(binary(&Double, Operator::Lt, &n(1e9), &t("a")), Ok(n(1.0)));
        assert_eq!(binary(&Double, Operator::Eq, &t("ABC"), &t("abc")), Ok(n(1.0)));
        assert_eq!(binary(&Double, Operator::Eq, &Scalar::Null, &n(0.0)), Ok(n(1.0)));
        assert_eq!(binary(&Double, Operator::Eq, &Scalar::Null, &t("")), Ok(n(1.0)));
        assert_eq!(binary(&Double, Operator::Ge, &n(2.0), &n(3.0)), Ok(n(0.0)));
    }

    #[test]
    fn concatenation_formats_numbers() {
        assert_eq!(binary(&Double, Operator::Concat, &n(1.5), &t("x")), Ok(t("1.5x")));
        assert_eq!(binary(&Double, Operator::Concat, &Scalar::Null, &n(2.0)), Ok(t("2")));
    }

    #[test]
    fn min_max_and_union() {
        assert_eq!(binary(&Double, Operator::Min, &n(3.0), &n(-1.0)), Ok(n(-1.0)));
        assert_eq!(binary(&Double, Operator::Max, &n(3.0), &n(-1.0)), Ok(n(3.0)));
        let union = apply(
            &Double,
            Operator::Union,
            [Operand::Scalar(n(1.0)), Operand::Array(Array { rows: 2, cols: 1, items: vec![n(2.0), n(3.0)] })],
        );
        assert_eq!(
            union,
            Ok(Operand::Array(Array { rows: 1, cols: 3, items: vec![n(1.0), n(2.0), n(3.0)] }))
        );
        assert_eq!(
            apply(&Double, Operator::Intersect, [Operand::Scalar(n(1.0)), Operand::Scalar(n(1.0))]),
            Err(ErrorKind::Null)
        );
    }
}
