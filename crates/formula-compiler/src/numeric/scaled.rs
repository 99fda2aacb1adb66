use core::cmp::Ordering;

use formula_model::{BigDecimal, NumericType, RoundingMode};

use super::Arithmetic;
use crate::error::ErrorKind;

/// Fixed-point numbers held as `value * 10^scale` in an `i64`.
///
/// Products and quotients are computed in `i128` and rounded half-up (away from zero on ties).
/// Results outside the `i64` range are `#NUM!`.
#[derive(Debug, Clone, Copy)]
pub struct ScaledLong {
    scale: u8,
    factor: i64,
}

impl ScaledLong {
    pub fn new(scale: u8) -> Self {
        let scale = scale.min(NumericType::MAX_SCALED_LONG_SCALE);
        Self {
            scale,
            factor: 10i64.pow(u32::from(scale)),
        }
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    fn narrow(v: i128) -> Result<i64, ErrorKind> {
        i64::try_from(v).map_err(|_| ErrorKind::Num)
    }
}

/// `num / den` rounded half away from zero.
fn div_half_up(num: i128, den: i128) -> i128 {
    let quotient = num / den;
    let remainder = num % den;
    if remainder.unsigned_abs() * 2 >= den.unsigned_abs() {
        if (num < 0) == (den < 0) {
            quotient + 1
        } else {
            quotient - 1
        }
    } else {
        quotient
    }
}

impl Arithmetic for ScaledLong {
    type Num = i64;

    fn numeric_type(&self) -> NumericType {
        NumericType::ScaledLong { scale: self.scale }
    }

    fn from_decimal(&self, value: &BigDecimal) -> Result<i64, ErrorKind> {
        value
            .to_scaled_i64(u32::from(self.scale), RoundingMode::HalfUp)
            .ok_or(ErrorKind::Num)
    }

    fn to_decimal(&self, n: &i64) -> Result<BigDecimal, ErrorKind> {
        Ok(BigDecimal::from_scaled_i64(*n, u32::from(self.scale)))
    }

    fn from_f64(&self, value: f64) -> Result<i64, ErrorKind> {
        let exact = BigDecimal::from_f64(value).ok_or(ErrorKind::Num)?;
        self.from_decimal(&exact)
    }

    fn to_f64(&self, n: &i64) -> f64 {
        *n as f64 / self.factor as f64
    }

    fn from_i64(&self, value: i64) -> Result<i64, ErrorKind> {
        value.checked_mul(self.factor).ok_or(ErrorKind::Num)
    }

    fn add(&self, a: &i64, b: &i64) -> Result<i64, ErrorKind> {
        a.checked_add(*b).ok_or(ErrorKind::Num)
    }

    fn sub(&self, a: &i64, b: &i64) -> Result<i64, ErrorKind> {
        a.checked_sub(*b).ok_or(ErrorKind::Num)
    }

    fn mul(&self, a: &i64, b: &i64) -> Result<i64, ErrorKind> {
        let product = i128::from(*a) * i128::from(*b);
        Self::narrow(div_half_up(product, i128::from(self.factor)))
    }

    fn div(&self, a: &i64, b: &i64) -> Result<i64, ErrorKind> {
        if *b == 0 {
            return Err(ErrorKind::Div0);
        }
        let num = i128::from(*a) * i128::from(self.factor);
        Self::narrow(div_half_up(num, i128::from(*b)))
    }

    fn neg(&self, a: &i64) -> i64 {
        a.saturating_neg()
    }

    fn cmp(&self, a: &i64, b: &i64) -> Ordering {
        a.cmp(b)
    }

    fn is_zero(&self, a: &i64) -> bool {
        *a == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn products_round_half_up() {
        let ar = ScaledLong::new(2);
        let a = ar.parse("0.05").unwrap();
        let b = ar.parse("0.5").unwrap();
        // 0.025 -> 0.03
        assert_eq!(ar.format(&ar.mul(&a, &b).unwrap()), "0.03");
        let neg = ar.neg(&a);
        assert_eq!(ar.format(&ar.mul(&neg, &b).unwrap()), "-0.03");
    }

    #[test]
    fn quotients_round_half_up() {
        let ar = ScaledLong::new(4);
        let two = ar.from_i64(2).unwrap();
        let three = ar.from_i64(3).unwrap();
        assert_eq!(ar.format(&ar.div(&two, &three).unwrap()), "0.6667");
        assert_eq!(ar.div(&two, &0), Err(ErrorKind::Div0));
    }

    #[test]
    fn overflow_is_a_num_error() {
        let ar = ScaledLong::new(18);
        assert_eq!(ar.from_i64(100), Err(ErrorKind::Num));
        assert_eq!(ar.add(&i64::MAX, &1), Err(ErrorKind::Num));
    }
}
