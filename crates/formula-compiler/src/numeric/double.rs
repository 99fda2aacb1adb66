use core::cmp::Ordering;

use formula_model::{BigDecimal, NumericType};

use super::Arithmetic;
use crate::error::ErrorKind;

/// IEEE-754 binary64. Non-finite results are `#NUM!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Double;

fn finite(v: f64) -> Result<f64, ErrorKind> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(ErrorKind::Num)
    }
}

impl Arithmetic for Double {
    type Num = f64;

    fn numeric_type(&self) -> NumericType {
        NumericType::Double
    }

    fn from_decimal(&self, value: &BigDecimal) -> Result<f64, ErrorKind> {
        finite(value.to_f64())
    }

    fn to_decimal(&self, n: &f64) -> Result<BigDecimal, ErrorKind> {
        BigDecimal::from_f64(*n).ok_or(ErrorKind::Num)
    }

    fn from_f64(&self, value: f64) -> Result<f64, ErrorKind> {
        finite(value)
    }

    fn to_f64(&self, n: &f64) -> f64 {
        *n
    }

    fn from_i64(&self, value: i64) -> Result<f64, ErrorKind> {
        Ok(value as f64)
    }

    fn add(&self, a: &f64, b: &f64) -> Result<f64, ErrorKind> {
        finite(a + b)
    }

    fn sub(&self, a: &f64, b: &f64) -> Result<f64, ErrorKind> {
        finite(a - b)
    }

    fn mul(&self, a: &f64, b: &f64) -> Result<f64, ErrorKind> {
        finite(a * b)
    }

    fn div(&self, a: &f64, b: &f64) -> Result<f64, ErrorKind> {
        if *b == 0.0 {
            return Err(ErrorKind::Div0);
        }
        finite(a / b)
    }

    fn neg(&self, a: &f64) -> f64 {
        -a
    }

    fn cmp(&self, a: &f64, b: &f64) -> Ordering {
        a.total_cmp(b)
    }

    fn is_zero(&self, a: &f64) -> bool {
        *a == 0.0
    }

    fn pow(&self, base: &f64, exponent: &f64) -> Result<f64, ErrorKind> {
        if *base == 0.0 && *exponent == 0.0 {
            return Err(ErrorKind::Num);
        }
        if *base == 0.0 && *exponent < 0.0 {
            return Err(ErrorKind::Div0);
        }
        finite(base.powf(*exponent))
    }

    /// Displays 15 significant digits, the precision spreadsheets show for doubles.
    fn format(&self, a: &f64) -> String {
        let rounded: f64 = format!("{a:.14e}").parse().unwrap_or(*a);
        BigDecimal::from_f64(rounded)
            .map(|d| d.normalized().to_string())
            .unwrap_or_else(|| ErrorKind::Num.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatting_hides_binary_noise() {
        let ar = Double;
        let sum = ar.add(&0.1, &0.2).unwrap();
        assert_eq!(ar.format(&sum), "0.3");
        assert_eq!(ar.format(&160.0), "160");
    }

    #[test]
    fn overflow_and_division_by_zero() {
        let ar = Double;
        assert_eq!(ar.mul(&f64::MAX, &2.0), Err(ErrorKind::Num));
        assert_eq!(ar.div(&1.0, &0.0), Err(ErrorKind::Div0));
        assert_eq!(ar.pow(&-8.0, &(1.0 / 3.0)), Err(ErrorKind::Num));
    }
}
