use core::cmp::Ordering;

use formula_model::{BigDecimal, NumericType, RoundingMode};

use super::Arithmetic;
use crate::error::ErrorKind;

/// Fractional digits kept by an unscaled division.
const DIVISION_SCALE: u32 = 32;

/// Arbitrary-precision decimals.
///
/// With a scale every result is rounded to it using the configured mode. Without one, results
/// are exact except for quotients, which keep [`DIVISION_SCALE`] digits.
#[derive(Debug, Clone, Copy)]
pub struct Decimal {
    scale: Option<u32>,
    rounding: RoundingMode,
}

impl Decimal {
    pub fn new(scale: Option<u32>, rounding: RoundingMode) -> Self {
        Self { scale, rounding }
    }

    fn fit(&self, value: BigDecimal) -> BigDecimal {
        match self.scale {
            Some(scale) => value.with_scale(scale, self.rounding),
            None => value,
        }
    }
}

impl Arithmetic for Decimal {
    type Num = BigDecimal;

    fn numeric_type(&self) -> NumericType {
        NumericType::BigDecimal {
            scale: self.scale,
            rounding: self.rounding,
        }
    }

    fn from_decimal(&self, value: &BigDecimal) -> Result<BigDecimal, ErrorKind> {
        Ok(self.fit(value.clone()))
    }

    fn to_decimal(&self, n: &BigDecimal) -> Result<BigDecimal, ErrorKind> {
        Ok(n.clone())
    }

    fn from_f64(&self, value: f64) -> Result<BigDecimal, ErrorKind> {
        BigDecimal::from_f64(value)
            .map(|d| self.fit(d))
            .ok_or(ErrorKind::Num)
    }

    fn to_f64(&self, n: &BigDecimal) -> f64 {
        n.to_f64()
    }

    fn add(&self, a: &BigDecimal, b: &BigDecimal) -> Result<BigDecimal, ErrorKind> {
        Ok(self.fit(a.add(b)))
    }

    fn sub(&self, a: &BigDecimal, b: &BigDecimal) -> Result<BigDecimal, ErrorKind> {
        Ok(self.fit(a.sub(b)))
    }

    fn mul(&self, a: &BigDecimal, b: &BigDecimal) -> Result<BigDecimal, ErrorKind> {
        Ok(self.fit(a.mul(b)))
    }

    fn div(&self, a: &BigDecimal, b: &BigDecimal) -> Result<BigDecimal, ErrorKind> {
        let scale = self.scale.unwrap_or(DIVISION_SCALE);
        let quotient = a.div(b, scale, self.rounding).ok_or(ErrorKind::Div0)?;
        Ok(match self.scale {
            Some(_) => quotient,
            None => quotient.normalized(),
        })
    }

    fn neg(&self, a: &BigDecimal) -> BigDecimal {
        a.neg()
    }

    fn cmp(&self, a: &BigDecimal, b: &BigDecimal) -> Ordering {
        a.cmp(b)
    }

    fn is_zero(&self, a: &BigDecimal) -> bool {
        a.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_results_use_the_rounding_mode() {
        let ar = Decimal::new(Some(2), RoundingMode::HalfEven);
        let a = ar.parse("1.005").unwrap();
        assert_eq!(ar.format(&a), "1");
        let third = ar.div(&ar.from_i64(1).unwrap(), &ar.from_i64(3).unwrap()).unwrap();
        assert_eq!(third.to_string(), "0.33");
    }

    #[test]
    fn unscaled_division_keeps_many_digits() {
        let ar = Decimal::new(None, RoundingMode::HalfUp);
        let q = ar.div(&ar.from_i64(1).unwrap(), &ar.from_i64(4).unwrap()).unwrap();
        assert_eq!(q.to_string(), "0.25");
        let third = ar.div(&ar.from_i64(1).unwrap(), &ar.from_i64(3).unwrap()).unwrap();
        assert_eq!(third.scale(), DIVISION_SCALE);
    }
}
