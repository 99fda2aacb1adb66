use formula_model::FoldFilter;

use super::functions::numbers;
use super::{flatten, Operand, Scalar};
use crate::error::ErrorKind;
use crate::numeric::Arithmetic;

/// Evaluation of a fold's step (and, for database folds, its row filter).
pub(crate) trait FoldSteps<N> {
    type Error: From<ErrorKind>;

    /// Combines the accumulator with the element at 1-based `index`.
    fn step(&mut self, acc: Operand<N>, elt: Scalar<N>, index: usize) -> Result<Operand<N>, Self::Error>;

    fn accepts(&mut self, _row: &[Scalar<N>]) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// The elements a fold visits, in order.
pub(crate) fn elements<A: Arithmetic>(
    ar: &A,
    filter: FoldFilter,
    operands: Vec<Operand<A::Num>>,
) -> Result<Vec<Scalar<A::Num>>, ErrorKind> {
    match filter {
        FoldFilter::NonEmpty => Ok(flatten(operands, true)),
        FoldFilter::Numbers => Ok(numbers(ar, &operands)?.into_iter().map(Scalar::Number).collect()),
        FoldFilter::Logicals => {
            let mut out = Vec::new();
            for operand in operands {
                match operand {
                    Operand::Scalar(Scalar::Null) => {}
                    Operand::Scalar(s) => out.push(Scalar::boolean(ar, s.truthy(ar)?)?),
                    Operand::Array(a) => out.extend(a.items.into_iter().filter(Scalar::is_number)),
                }
            }
            Ok(out)
        }
    }
}

/// Left fold over `elements`. With `from_first` the first element seeds the accumulator and
/// `seed` is only the result for an empty input, so a failed seed is reported only then.
pub(crate) fn fold<N: Clone, S: FoldSteps<N>>(
    steps: &mut S,
    from_first: bool,
    seed: Result<Operand<N>, S::Error>,
    elements: Vec<Scalar<N>>,
) -> Result<Operand<N>, S::Error> {
    let mut iter = elements.into_iter().enumerate();
    let mut acc = if from_first {
        match iter.next() {
            Some((_, first)) => Operand::Scalar(first),
            None => return seed,
        }
    } else {
        seed?
    };
    for (i, elt) in iter {
        acc = steps.step(acc, elt, i + 1)?;
    }
    Ok(acc)
}

/// Fold over the `folded` column of the rows (`width` scalars each) accepted by the filter.
/// Empty values in the folded column are skipped, and so is anything but a number under a
/// numeric `filter`.
pub(crate) fn fold_rows<N: Clone, S: FoldSteps<N>>(
    steps: &mut S,
    from_first: bool,
    filter: FoldFilter,
    seed: Result<Operand<N>, S::Error>,
    items: Vec<Scalar<N>>,
    width: usize,
    folded: usize,
) -> Result<Operand<N>, S::Error> {
    if width == 0 {
        return Err(ErrorKind::Value.into());
    }
    let (mut acc, seed) = if from_first {
        (None, Some(seed))
    } else {
        (Some(seed?), None)
    };
    for (i, row) in items.chunks(width).enumerate() {
        if !steps.accepts(row)? {
            continue;
        }
        let value = match row.get(folded) {
            Some(Scalar::Null) | None => continue,
            Some(value) if filter.is_numeric() && !value.is_number() => continue,
            Some(value) => value.clone(),
        };
        acc = Some(match acc {
            None => Operand::Scalar(value),
            Some(acc) => steps.step(acc, value, i + 1)?,
        });
    }
    match (acc, seed) {
        (Some(acc), _) => Ok(acc),
        (None, Some(seed)) => seed,
        (None, None) => Err(ErrorKind::Value.into()),
    }
}
