//! Arithmetic backends.
//!
//! A compiled program is evaluated against exactly one [`Arithmetic`] implementation, chosen by
//! the model's [`NumericType`]. Literals are exact [`BigDecimal`]s and are converted into the
//! backend's representation when they are evaluated.

mod decimal;
mod double;
mod scaled;

use core::cmp::Ordering;
use core::fmt;

use formula_model::{BigDecimal, NumericType, RoundingMode};

use crate::error::{CompilerError, CompilerResult, ErrorKind};

pub use decimal::Decimal;
pub use double::Double;
pub use scaled::ScaledLong;

/// Largest integral exponent evaluated by repeated multiplication; larger ones go through `f64`.
const MAX_EXACT_EXPONENT: i64 = 1024;

pub trait Arithmetic: fmt::Debug {
    type Num: Clone + fmt::Debug + PartialEq;

    fn numeric_type(&self) -> NumericType;

    fn from_decimal(&self, value: &BigDecimal) -> Result<Self::Num, ErrorKind>;
    fn to_decimal(&self, n: &Self::Num) -> Result<BigDecimal, ErrorKind>;
    fn from_f64(&self, value: f64) -> Result<Self::Num, ErrorKind>;
    fn to_f64(&self, n: &Self::Num) -> f64;

    fn from_i64(&self, value: i64) -> Result<Self::Num, ErrorKind> {
        self.from_decimal(&BigDecimal::from_i64(value))
    }

    fn add(&self, a: &Self::Num, b: &Self::Num) -> Result<Self::Num, ErrorKind>;
    fn sub(&self, a: &Self::Num, b: &Self::Num) -> Result<Self::Num, ErrorKind>;
    fn mul(&self, a: &Self::Num, b: &Self::Num) -> Result<Self::Num, ErrorKind>;
    /// `#DIV/0!` for a zero divisor.
    fn div(&self, a: &Self::Num, b: &Self::Num) -> Result<Self::Num, ErrorKind>;
    fn neg(&self, a: &Self::Num) -> Self::Num;
    fn cmp(&self, a: &Self::Num, b: &Self::Num) -> Ordering;
    fn is_zero(&self, a: &Self::Num) -> bool;

    /// Integral exponents are computed exactly in the backend; others through `f64`.
    fn pow(&self, base: &Self::Num, exponent: &Self::Num) -> Result<Self::Num, ErrorKind> {
        let e = self.to_decimal(exponent)?;
        if e.is_integer() {
            if let Some(e) = e.to_i64().filter(|e| e.abs() <= MAX_EXACT_EXPONENT) {
                return self.powi(base, e);
            }
        }
        self.from_f64(self.to_f64(base).powf(self.to_f64(exponent)))
    }

    fn powi(&self, base: &Self::Num, exponent: i64) -> Result<Self::Num, ErrorKind> {
        if exponent == 0 {
            return if self.is_zero(base) {
                Err(ErrorKind::Num)
            } else {
                self.from_i64(1)
            };
        }
        if exponent < 0 && self.is_zero(base) {
            return Err(ErrorKind::Div0);
        }
        let mut result = self.from_i64(1)?;
        let mut square = base.clone();
        let mut e = exponent.unsigned_abs();
        while e > 0 {
            if e & 1 == 1 {
                result = self.mul(&result, &square)?;
            }
            e >>= 1;
            if e > 0 {
                square = self.mul(&square, &square)?;
            }
        }
        if exponent < 0 {
            self.div(&self.from_i64(1)?, &result)
        } else {
            Ok(result)
        }
    }

    /// Rounds to `digits` fractional digits; negative `digits` round to tens, hundreds, ...
    fn round(&self, a: &Self::Num, digits: i32, mode: RoundingMode) -> Result<Self::Num, ErrorKind> {
        let rounded = round_decimal(&self.to_decimal(a)?, digits, mode);
        self.from_decimal(&rounded)
    }

    /// Numeric text as typed by a user; surrounding whitespace is ignored.
    fn parse(&self, text: &str) -> Result<Self::Num, ErrorKind> {
        let value: BigDecimal = text.trim().parse().map_err(|_| ErrorKind::Value)?;
        self.from_decimal(&value)
    }

    fn format(&self, a: &Self::Num) -> String {
        match self.to_decimal(a) {
            Ok(d) => d.normalized().to_string(),
            Err(kind) => kind.to_string(),
        }
    }
}

pub(crate) fn round_decimal(value: &BigDecimal, digits: i32, mode: RoundingMode) -> BigDecimal {
    if digits >= 0 {
        let digits = digits.unsigned_abs();
        if digits >= value.scale() {
            return value.clone();
        }
        return value.with_scale(digits, mode);
    }
    let factor = BigDecimal::from_i64(10).powi(digits.unsigned_abs());
    match value.div(&factor, 0, mode) {
        Some(q) => q.mul(&factor),
        None => value.clone(),
    }
}

/// Rejects numeric types no backend can represent.
pub fn validate(numeric_type: NumericType) -> CompilerResult<()> {
    match numeric_type {
        NumericType::ScaledLong { scale } if scale > NumericType::MAX_SCALED_LONG_SCALE => {
            Err(CompilerError::unsupported(format!(
                "scaled-long scale {scale} exceeds {}",
                NumericType::MAX_SCALED_LONG_SCALE
            )))
        }
        _ => Ok(()),
    }
}

/// Runs `$body` with `$ar` bound to the backend for `$numeric_type`.
macro_rules! with_arithmetic {
    ($numeric_type:expr, $ar:ident => $body:expr) => {
        match $numeric_type {
            formula_model::NumericType::Double => {
                let $ar = $crate::numeric::Double;
                $body
            }
            formula_model::NumericType::ScaledLong { scale } => {
                let $ar = $crate::numeric::ScaledLong::new(scale);
                $body
            }
            formula_model::NumericType::BigDecimal { scale, rounding } => {
                let $ar = $crate::numeric::Decimal::new(scale, rounding);
                $body
            }
        }
    };
}

pub(crate) use with_arithmetic;

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    #[test]
    fn rounding_to_negative_digits() {
        assert_eq!(round_decimal(&dec("1250"), -2, RoundingMode::HalfUp), dec("1300"));
        assert_eq!(round_decimal(&dec("-1250"), -2, RoundingMode::HalfEven), dec("-1200"));
        assert_eq!(round_decimal(&dec("2.675"), 2, RoundingMode::HalfUp), dec("2.68"));
        assert_eq!(round_decimal(&dec("2.5"), 3, RoundingMode::Down), dec("2.5"));
    }

    #[test]
    fn integral_powers_are_exact() {
        let ar = Decimal::new(None, RoundingMode::HalfUp);
        let tenth = dec("0.1");
        assert_eq!(ar.powi(&tenth, 3).unwrap(), dec("0.001"));
        assert_eq!(ar.powi(&dec("2"), -2).unwrap(), dec("0.25"));
        assert_eq!(ar.powi(&dec("0"), 0), Err(ErrorKind::Num));
        assert_eq!(ar.powi(&dec("0"), -1), Err(ErrorKind::Div0));
    }

    #[test]
    fn oversized_scaled_long_is_rejected() {
        assert!(validate(NumericType::scaled_long(18)).is_ok());
        assert!(validate(NumericType::scaled_long(19)).is_err());
    }
}
