//! The function library.
//!
//! Every function except the database aggregates is implemented here, so aggregates can also
//! be evaluated directly when no rewrite applies. `IF` and `CHOOSE` are lazy: evaluators call
//! [`select`] with the first argument and evaluate only the chosen branch.

use core::cmp::Ordering;

use formula_model::{FoldFilter, Function, Operator, RoundingMode, Value};

use super::criteria::{parse_criterion, Criterion};
use super::fold::elements;
use super::ops::{compare, compare_with};
use super::{Array, Operand, Scalar};
use crate::error::ErrorKind;
use crate::numeric::Arithmetic;

pub fn is_lazy(fun: Function) -> bool {
    matches!(fun, Function::If | Function::Choose)
}

/// Outcome of a lazy function's selector.
#[derive(Debug, Clone, PartialEq)]
pub enum Branch<N> {
    /// Evaluate this argument; its value is the result.
    Arg(usize),
    Value(Scalar<N>),
}

/// Picks the branch of `IF` or `CHOOSE` given their evaluated first argument.
pub fn select<A: Arithmetic>(
    ar: &A,
    fun: Function,
    selector: Operand<A::Num>,
    argc: usize,
) -> Result<Branch<A::Num>, ErrorKind> {
    let selector = selector.into_scalar()?;
    match fun {
        Function::If => {
            let taken = if selector.truthy(ar)? { 1 } else { 2 };
            if taken < argc {
                Ok(Branch::Arg(taken))
            } else {
                Scalar::boolean(ar, taken == 1).map(Branch::Value)
            }
        }
        Function::Choose => {
            let n = int_of(ar, &selector)?;
            match usize::try_from(n) {
                Ok(n) if n >= 1 && n < argc => Ok(Branch::Arg(n)),
                _ => Err(ErrorKind::Value),
            }
        }
        _ => Err(ErrorKind::Value),
    }
}

/// Calls an eager function on evaluated arguments.
pub fn call<A: Arithmetic>(
    ar: &A,
    fun: Function,
    args: Vec<Operand<A::Num>>,
) -> Result<Operand<A::Num>, ErrorKind> {
    use Function as F;

    if fun.is_database() {
        return Err(ErrorKind::Name);
    }
    if is_lazy(fun) {
        let mut args = args.into_iter();
        let selector = args.next().ok_or(ErrorKind::Value)?;
        let rest: Vec<_> = args.collect();
        return match select(ar, fun, selector, rest.len() + 1)? {
            Branch::Arg(i) => rest.into_iter().nth(i - 1).ok_or(ErrorKind::Value),
            Branch::Value(v) => Ok(Operand::Scalar(v)),
        };
    }
    match fun {
        F::Index => return index(ar, &args),
        F::Match => return lookup(ar, &args).map(Operand::Scalar),
        F::SumIf | F::CountIf => return conditional(ar, fun, &args).map(Operand::Scalar),
        _ => {}
    }
    let scalar = match fun {
        F::Sum => Scalar::Number(sum(ar, &numbers(ar, &args)?)?),
        F::Product => {
            let ns = numbers(ar, &args)?;
            if ns.is_empty() {
                Scalar::Number(ar.from_i64(0)?)
            } else {
                Scalar::Number(ns.iter().skip(1).try_fold(ns[0].clone(), |acc, n| ar.mul(&acc, n))?)
            }
        }
        F::Min | F::Max => {
            let want = if fun == F::Min { Ordering::Less } else { Ordering::Greater };
            let ns = numbers(ar, &args)?;
            let best = ns.into_iter().reduce(|a, b| if ar.cmp(&b, &a) == want { b } else { a });
            Scalar::Number(match best {
                Some(n) => n,
                None => ar.from_i64(0)?,
            })
        }
        F::Count => Scalar::Number(ar.from_i64(count(ar, &args))?),
        F::Average => {
            let ns = numbers(ar, &args)?;
            Scalar::Number(ar.div(&sum(ar, &ns)?, &ar.from_i64(ns.len() as i64)?)?)
        }
        F::SumSq => {
            let ns = numbers(ar, &args)?;
            let squares = ns.iter().map(|n| ar.mul(n, n)).collect::<Result<Vec<_>, _>>()?;
            Scalar::Number(sum(ar, &squares)?)
        }
        F::Var | F::VarP | F::StDev | F::StDevP => {
            let sample = matches!(fun, F::Var | F::StDev);
            let variance = variance(ar, &numbers(ar, &args)?, sample)?;
            Scalar::Number(if matches!(fun, F::StDev | F::StDevP) {
                sqrt(ar, &variance)?
            } else {
                variance
            })
        }
        F::And | F::Or => {
            let values = elements(ar, FoldFilter::Logicals, args)?
                .iter()
                .map(|s| s.truthy(ar))
                .collect::<Result<Vec<_>, _>>()?;
            if values.is_empty() {
                return Err(ErrorKind::Value);
            }
            let result = if fun == F::And {
                values.iter().all(|&b| b)
            } else {
                values.iter().any(|&b| b)
            };
            Scalar::boolean(ar, result)?
        }
        F::True => Scalar::boolean(ar, true)?,
        F::False => Scalar::boolean(ar, false)?,
        F::Na => return Err(ErrorKind::Na),
        F::Pi => Scalar::Number(ar.from_f64(core::f64::consts::PI)?),
        _ => {
            let scalars = args
                .into_iter()
                .map(Operand::into_scalar)
                .collect::<Result<Vec<_>, _>>()?;
            scalar_call(ar, fun, &scalars)?
        }
    };
    Ok(Operand::Scalar(scalar))
}

/// Functions of scalar arguments only.
fn scalar_call<A: Arithmetic>(
    ar: &A,
    fun: Function,
    args: &[Scalar<A::Num>],
) -> Result<Scalar<A::Num>, ErrorKind> {
    use Function as F;

    let arg = |i: usize| args.get(i).ok_or(ErrorKind::Value);
    let num = |i: usize| arg(i).and_then(|s| s.to_number(ar));
    let text = |i: usize| arg(i).map(|s| s.to_text(ar));
    let int = |i: usize| arg(i).and_then(|s| int_of(ar, s));
    let opt_int = |i: usize, default: i64| args.get(i).map_or(Ok(default), |s| int_of(ar, s));
    let digits = |i: usize| -> Result<i32, ErrorKind> {
        i32::try_from(opt_int(i, 0)?).map_err(|_| ErrorKind::Num)
    };

    Ok(match fun {
        F::Not => Scalar::boolean(ar, !arg(0)?.truthy(ar)?)?,
        F::IsBlank => Scalar::boolean(ar, matches!(arg(0)?, Scalar::Null))?,
        F::IsNumber => Scalar::boolean(ar, arg(0)?.is_number())?,
        F::IsText => Scalar::boolean(ar, matches!(arg(0)?, Scalar::Text(_)))?,
        F::N => match arg(0)? {
            Scalar::Number(n) => Scalar::Number(n.clone()),
            _ => Scalar::Number(ar.from_i64(0)?),
        },
        F::T => match arg(0)? {
            Scalar::Text(t) => Scalar::Text(t.clone()),
            _ => Scalar::Text(String::new()),
        },
        F::Abs => {
            let x = num(0)?;
            Scalar::Number(if ar.cmp(&x, &ar.from_i64(0)?) == Ordering::Less {
                ar.neg(&x)
            } else {
                x
            })
        }
        F::Round => Scalar::Number(ar.round(&num(0)?, digits(1)?, RoundingMode::HalfUp)?),
        F::RoundDown => Scalar::Number(ar.round(&num(0)?, digits(1)?, RoundingMode::Down)?),
        F::RoundUp => Scalar::Number(ar.round(&num(0)?, digits(1)?, RoundingMode::Up)?),
        F::Trunc => Scalar::Number(ar.round(&num(0)?, digits(1)?, RoundingMode::Down)?),
        F::Int => Scalar::Number(ar.round(&num(0)?, 0, RoundingMode::Floor)?),
        F::Mod => {
            let (x, y) = (num(0)?, num(1)?);
            let quotient = ar.round(&ar.div(&x, &y)?, 0, RoundingMode::Floor)?;
            Scalar::Number(ar.sub(&x, &ar.mul(&y, &quotient)?)?)
        }
        F::Sqrt => Scalar::Number(sqrt(ar, &num(0)?)?),
        F::Power => Scalar::Number(ar.pow(&num(0)?, &num(1)?)?),
        F::Sign => {
            let sign = match ar.cmp(&num(0)?, &ar.from_i64(0)?) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            };
            Scalar::Number(ar.from_i64(sign)?)
        }
        F::Exp => Scalar::Number(ar.from_f64(ar.to_f64(&num(0)?).exp())?),
        F::Ln | F::Log10 => {
            let x = ar.to_f64(&num(0)?);
            if x <= 0.0 {
                return Err(ErrorKind::Num);
            }
            Scalar::Number(ar.from_f64(if fun == F::Ln { x.ln() } else { x.log10() })?)
        }
        F::Concatenate => Scalar::Text(args.iter().map(|s| s.to_text(ar)).collect()),
        F::Len => Scalar::Number(ar.from_i64(text(0)?.chars().count() as i64)?),
        F::Lower => Scalar::Text(text(0)?.to_lowercase()),
        F::Upper => Scalar::Text(text(0)?.to_uppercase()),
        F::Proper => Scalar::Text(proper(&text(0)?)),
        F::Trim => Scalar::Text(text(0)?.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ")),
        F::Exact => Scalar::boolean(ar, text(0)? == text(1)?)?,
        F::Value => Scalar::Number(match arg(0)? {
            Scalar::Number(n) => n.clone(),
            other => ar.parse(&other.to_text(ar))?,
        }),
        F::Left | F::Right => {
            let s = text(0)?;
            let n = count_arg(opt_int(1, 1)?)?;
            let len = s.chars().count();
            Scalar::Text(if fun == F::Left {
                s.chars().take(n).collect()
            } else {
                s.chars().skip(len.saturating_sub(n)).collect()
            })
        }
        F::Mid => {
            let s = text(0)?;
            let start = count_arg(int(1)?)?;
            if start == 0 {
                return Err(ErrorKind::Value);
            }
            let n = count_arg(int(2)?)?;
            Scalar::Text(s.chars().skip(start - 1).take(n).collect())
        }
        F::Rept => {
            let n = count_arg(int(1)?)?;
            Scalar::Text(text(0)?.repeat(n))
        }
        F::Substitute => {
            let (s, old, new) = (text(0)?, text(1)?, text(2)?);
            if old.is_empty() {
                return Ok(Scalar::Text(s));
            }
            match args.get(3) {
                None => Scalar::Text(s.replace(&old, &new)),
                Some(instance) => {
                    let instance = count_arg(int_of(ar, instance)?)?;
                    if instance == 0 {
                        return Err(ErrorKind::Value);
                    }
                    Scalar::Text(match s.match_indices(&old).nth(instance - 1) {
                        Some((at, _)) => format!("{}{new}{}", &s[..at], &s[at + old.len()..]),
                        None => s,
                    })
                }
            }
        }
        F::Replace => {
            let s: Vec<char> = text(0)?.chars().collect();
            let start = count_arg(int(1)?)?;
            if start == 0 {
                return Err(ErrorKind::Value);
            }
            let n = count_arg(int(2)?)?;
            let from = (start - 1).min(s.len());
            let to = (from + n).min(s.len());
            let mut out: String = s[..from].iter().collect();
            out.push_str(&text(3)?);
            out.extend(&s[to..]);
            Scalar::Text(out)
        }
        _ => return Err(ErrorKind::Name),
    })
}

fn int_of<A: Arithmetic>(ar: &A, s: &Scalar<A::Num>) -> Result<i64, ErrorKind> {
    let n = s.to_number(ar)?;
    ar.to_decimal(&n)?.to_i64().ok_or(ErrorKind::Num)
}

fn count_arg(n: i64) -> Result<usize, ErrorKind> {
    usize::try_from(n).map_err(|_| ErrorKind::Value)
}

fn proper(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// Numeric arguments of an aggregate: arrays contribute only their numbers, scalar text must parse.
pub(crate) fn numbers<A: Arithmetic>(ar: &A, args: &[Operand<A::Num>]) -> Result<Vec<A::Num>, ErrorKind> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Operand::Scalar(Scalar::Null) => {}
            Operand::Scalar(s) => out.push(s.to_number(ar)?),
            Operand::Array(a) => out.extend(a.items.iter().filter_map(|s| match s {
                Scalar::Number(n) => Some(n.clone()),
                _ => None,
            })),
        }
    }
    Ok(out)
}

/// `COUNT`: numbers in arrays, plus direct arguments that are or parse as numbers.
pub(crate) fn count<A: Arithmetic>(ar: &A, args: &[Operand<A::Num>]) -> i64 {
    args.iter()
        .map(|arg| match arg {
            Operand::Scalar(Scalar::Number(_)) => 1,
            Operand::Scalar(Scalar::Text(t)) => i64::from(ar.parse(t).is_ok()),
            Operand::Scalar(Scalar::Null) => 0,
            Operand::Array(a) => a.items.iter().filter(|s| s.is_number()).count() as i64,
        })
        .sum()
}

fn sum<A: Arithmetic>(ar: &A, ns: &[A::Num]) -> Result<A::Num, ErrorKind> {
    ns.iter().try_fold(ar.from_i64(0)?, |acc, n| ar.add(&acc, n))
}

fn variance<A: Arithmetic>(ar: &A, ns: &[A::Num], sample: bool) -> Result<A::Num, ErrorKind> {
    let n = ns.len() as i64;
    let divisor = if sample { n - 1 } else { n };
    if divisor <= 0 {
        return Err(ErrorKind::Div0);
    }
    let mean = ar.div(&sum(ar, ns)?, &ar.from_i64(n)?)?;
    let mut squares = ar.from_i64(0)?;
    for x in ns {
        let d = ar.sub(x, &mean)?;
        squares = ar.add(&squares, &ar.mul(&d, &d)?)?;
    }
    ar.div(&squares, &ar.from_i64(divisor)?)
}

fn sqrt<A: Arithmetic>(ar: &A, x: &A::Num) -> Result<A::Num, ErrorKind> {
    let v = ar.to_f64(x);
    if v < 0.0 {
        return Err(ErrorKind::Num);
    }
    ar.from_f64(v.sqrt())
}

/// `INDEX(array, row[, col])`. With one index into a two-dimensional array the index is
/// row-major over all elements.
fn index<A: Arithmetic>(ar: &A, args: &[Operand<A::Num>]) -> Result<Operand<A::Num>, ErrorKind> {
    let (Some(source), Some(first)) = (args.first(), args.get(1)) else {
        return Err(ErrorKind::Value);
    };
    let first = int_of(ar, first.as_scalar()?)?;
    let second = match args.get(2) {
        Some(arg) => Some(int_of(ar, arg.as_scalar()?)?),
        None => None,
    };
    let array = match source {
        Operand::Scalar(s) => {
            return if first == 1 && second.map_or(true, |c| c == 1) {
                Ok(Operand::Scalar(s.clone()))
            } else {
                Err(ErrorKind::Ref)
            }
        }
        Operand::Array(a) => a,
    };
    let position = |i: i64| usize::try_from(i).ok().filter(|&i| i >= 1).ok_or(ErrorKind::Ref);
    let linear = match second {
        None => position(first)? - 1,
        Some(col) => {
            let (row, col) = (position(first)?, position(col)?);
            if row > array.rows as usize || col > array.cols as usize {
                return Err(ErrorKind::Ref);
            }
            (row - 1) * array.cols as usize + col - 1
        }
    };
    array
        .items
        .get(linear)
        .cloned()
        .map(Operand::Scalar)
        .ok_or(ErrorKind::Ref)
}

/// `MATCH(value, array[, type])`: 0 finds an equal element, 1 (default) the last element not
/// greater than the value in ascending data, -1 the last element not less in descending data.
fn lookup<A: Arithmetic>(ar: &A, args: &[Operand<A::Num>]) -> Result<Scalar<A::Num>, ErrorKind> {
    let (Some(value), Some(Operand::Array(array))) = (args.first(), args.get(1)) else {
        return Err(ErrorKind::Na);
    };
    let value = value.as_scalar()?;
    let match_type = match args.get(2) {
        Some(t) => int_of(ar, t.as_scalar()?)?.signum(),
        None => 1,
    };
    let mut found = None;
    for (i, item) in array.items.iter().enumerate() {
        let ord = compare(ar, item, value);
        match match_type {
            0 if ord == Ordering::Equal => {
                found = Some(i);
                break;
            }
            0 => {}
            1 if ord == Ordering::Greater => break,
            -1 if ord == Ordering::Less => break,
            _ => found = Some(i),
        }
    }
    let i = found.ok_or(ErrorKind::Na)?;
    Ok(Scalar::Number(ar.from_i64(i as i64 + 1)?))
}

/// `SUMIF(range, criteria[, sum_range])` and `COUNTIF(range, criteria)`.
fn conditional<A: Arithmetic>(
    ar: &A,
    fun: Function,
    args: &[Operand<A::Num>],
) -> Result<Scalar<A::Num>, ErrorKind> {
    let (Some(range), Some(criteria)) = (args.first(), args.get(1)) else {
        return Err(ErrorKind::Value);
    };
    let criterion = parse_criterion(&criteria.as_scalar()?.to_value(ar)?);
    let items = items_of(range);
    let sum_items = args.get(2).map(items_of).unwrap_or(items);
    let mut total = ar.from_i64(0)?;
    let mut count = 0i64;
    for (i, item) in items.iter().enumerate() {
        if !matches_criterion(ar, item, criterion.as_ref())? {
            continue;
        }
        count += 1;
        if let Some(Scalar::Number(n)) = sum_items.get(i) {
            total = ar.add(&total, n)?;
        }
    }
    Ok(Scalar::Number(if fun == Function::CountIf {
        ar.from_i64(count)?
    } else {
        total
    }))
}

fn items_of<N>(operand: &Operand<N>) -> &[Scalar<N>] {
    match operand {
        Operand::Scalar(s) => core::slice::from_ref(s),
        Operand::Array(Array { items, .. }) => items,
    }
}

/// Whether a value satisfies a criterion. `None` matches everything.
pub fn matches_criterion<A: Arithmetic>(
    ar: &A,
    item: &Scalar<A::Num>,
    criterion: Option<&Criterion>,
) -> Result<bool, ErrorKind> {
    let Some(criterion) = criterion else {
        return Ok(true);
    };
    let operand = Scalar::from_value(ar, &criterion.operand)?;
    // A numeric criterion never matches text cells, and vice versa, except for `<>`.
    let same_kind = matches!(
        (item, &operand),
        (Scalar::Number(_), Scalar::Number(_)) | (Scalar::Text(_), Scalar::Text(_))
    ) || matches!(criterion.operand, Value::Text(ref t) if t.is_empty());
    if !same_kind {
        return Ok(criterion.op == Operator::Ne);
    }
    Ok(compare_with(ar, criterion.op, item, &operand))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use formula_model::BigDecimal;

    use super::*;
    use crate::numeric::{Decimal, Double};

    fn dec(s: &str) -> Operand<BigDecimal> {
        Operand::Scalar(Scalar::Number(s.parse().unwrap()))
    }

    fn num(v: f64) -> Operand<f64> {
        Operand::Scalar(Scalar::Number(v))
    }

    fn text(s: &str) -> Operand<f64> {
        Operand::Scalar(Scalar::Text(s.to_string()))
    }

    fn column(values: &[f64]) -> Operand<f64> {
        Operand::Array(Array {
            rows: values.len() as u32,
            cols: 1,
            items: values.iter().map(|&v| Scalar::Number(v)).collect(),
        })
    }

    fn eval(fun: Function, args: Vec<Operand<f64>>) -> Result<Operand<f64>, ErrorKind> {
        call(&Double, fun, args)
    }

    #[test]
    fn aggregates_skip_text_in_arrays_but_parse_scalars() {
        let mixed = Operand::Array(Array {
            rows: 1,
            cols: 3,
            items: vec![Scalar::Number(1.0), Scalar::Text("7".into()), Scalar::Null],
        });
        assert_eq!(eval(Function::Sum, vec![mixed.clone(), text("2")]), Ok(num(3.0)));
        assert_eq!(eval(Function::Count, vec![mixed]), Ok(num(1.0)));
        assert_eq!(eval(Function::Sum, vec![text("x")]), Err(ErrorKind::Value));
        assert_eq!(eval(Function::Average, vec![]), Err(ErrorKind::Div0));
        assert_eq!(eval(Function::Max, vec![]), Ok(num(0.0)));
    }

    #[test]
    fn population_variance_is_exact() {
        let data = column(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(eval(Function::VarP, vec![data.clone()]), Ok(num(4.0)));
        assert_eq!(eval(Function::StDevP, vec![data]), Ok(num(2.0)));
        assert_eq!(eval(Function::Var, vec![num(1.0)]), Err(ErrorKind::Div0));
    }

    #[test]
    fn lazy_functions_pick_a_branch() {
        assert_eq!(select(&Double, Function::If, num(0.0), 2), Ok(Branch::Value(Scalar::Number(0.0))));
        assert_eq!(select(&Double, Function::If, text("true"), 3), Ok(Branch::Arg(1)));
        assert_eq!(select(&Double, Function::Choose, num(2.0), 4), Ok(Branch::Arg(2)));
        assert_eq!(select(&Double, Function::Choose, num(4.0), 4), Err(ErrorKind::Value));
        assert_eq!(
            eval(Function::If, vec![num(1.0), text("yes"), text("no")]),
            Ok(text("yes"))
        );
    }

    #[test]
    fn lookups() {
        let data = column(&[10.0, 20.0, 30.0]);
        assert_eq!(eval(Function::Match, vec![num(20.0), data.clone(), num(0.0)]), Ok(num(2.0)));
        assert_eq!(eval(Function::Match, vec![num(25.0), data.clone()]), Ok(num(2.0)));
        assert_eq!(eval(Function::Match, vec![num(5.0), data.clone()]), Err(ErrorKind::Na));
        assert_eq!(eval(Function::Index, vec![data.clone(), num(3.0)]), Ok(num(30.0)));
        assert_eq!(eval(Function::Index, vec![data, num(4.0)]), Err(ErrorKind::Ref));
    }

    #[test]
    fn conditional_sums() {
        let regions = Operand::Array(Array {
            rows: 3,
            cols: 1,
            items: vec![
                Scalar::Text("north".into()),
                Scalar::Text("South".into()),
                Scalar::Text("NORTH".into()),
            ],
        });
        let amounts = column(&[1.0, 2.0, 4.0]);
        assert_eq!(
            eval(Function::SumIf, vec![regions.clone(), text("north"), amounts.clone()]),
            Ok(num(5.0))
        );
        assert_eq!(eval(Function::CountIf, vec![regions, text("<>north")]), Ok(num(1.0)));
        assert_eq!(eval(Function::SumIf, vec![amounts, text(">1")]), Ok(num(6.0)));
    }

    #[test]
    fn text_functions() {
        assert_eq!(eval(Function::Proper, vec![text("hello wORLD")]), Ok(text("Hello World")));
        assert_eq!(eval(Function::Trim, vec![text("  a   b ")]), Ok(text("a b")));
        assert_eq!(eval(Function::Mid, vec![text("spreadsheet"), num(7.0), num(3.0)]), Ok(text("she")));
        assert_eq!(
            eval(Function::Substitute, vec![text("a-b-c"), text("-"), text("+"), num(2.0)]),
            Ok(text("a-b+c"))
        );
        assert_eq!(
            eval(Function::Replace, vec![text("abcdef"), num(2.0), num(3.0), text("X")]),
            Ok(text("aXef"))
        );
        assert_eq!(eval(Function::Concatenate, vec![text("n="), num(2.5)]), Ok(text("n=2.5")));
    }

    #[test]
    fn rounding_uses_the_backend() {
        let ar = Decimal::new(None, RoundingMode::HalfEven);
        assert_eq!(
            call(&ar, Function::Round, vec![dec("2.345"), dec("2")]),
            Ok(dec("2.35"))
        );
        assert_eq!(eval(Function::Mod, vec![num(-7.0), num(3.0)]), Ok(num(2.0)));
        assert_eq!(eval(Function::Int, vec![num(-1.5)]), Ok(num(-2.0)));
        assert_eq!(eval(Function::Sqrt, vec![num(-1.0)]), Err(ErrorKind::Num));
    }
}
