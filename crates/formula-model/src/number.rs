use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use dashu_int::IBig;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Rounding applied when a decimal result has to drop fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundingMode {
    /// Away from zero.
    Up,
    /// Towards zero (truncation).
    Down,
    Ceiling,
    Floor,
    HalfUp,
    HalfDown,
    HalfEven,
}

impl Default for RoundingMode {
    fn default() -> Self {
        RoundingMode::HalfUp
    }
}

/// Arithmetic backend a model is compiled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericType {
    /// IEEE-754 binary64.
    Double,
    /// `i64` holding `value * 10^scale`; results are rounded half-up.
    ScaledLong { scale: u8 },
    /// Arbitrary-precision decimal. `scale = None` keeps results exact except for division.
    BigDecimal {
        scale: Option<u32>,
        rounding: RoundingMode,
    },
}

impl NumericType {
    /// Largest scale a `ScaledLong` can carry without overflowing on the value `1`.
    pub const MAX_SCALED_LONG_SCALE: u8 = 18;

    pub const fn scaled_long(scale: u8) -> Self {
        NumericType::ScaledLong { scale }
    }

    pub const fn big_decimal(scale: u32, rounding: RoundingMode) -> Self {
        NumericType::BigDecimal {
            scale: Some(scale),
            rounding,
        }
    }
}

impl Default for NumericType {
    fn default() -> Self {
        NumericType::Double
    }
}

impl fmt::Display for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericType::Double => f.write_str("double"),
            NumericType::ScaledLong { scale } => write!(f, "scaled-long({scale})"),
            NumericType::BigDecimal { scale: None, .. } => f.write_str("big-decimal"),
            NumericType::BigDecimal {
                scale: Some(scale),
                rounding,
            } => write!(f, "big-decimal({scale}, {rounding:?})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid decimal literal `{0}`")]
pub struct ParseDecimalError(String);

/// Exact decimal number: `unscaled * 10^-scale`.
///
/// Every numeric literal in a model is stored this way so that each backend can convert it
/// without going through binary floating point first.
#[derive(Clone, Debug)]
pub struct BigDecimal {
    unscaled: IBig,
    scale: u32,
}

impl BigDecimal {
    pub fn new(unscaled: IBig, scale: u32) -> Self {
        Self { unscaled, scale }
    }

    pub fn zero() -> Self {
        Self::new(IBig::ZERO, 0)
    }

    pub fn one() -> Self {
        Self::from_i64(1)
    }

    pub fn from_i64(value: i64) -> Self {
        Self::new(IBig::from(value), 0)
    }

    /// `unscaled / 10^scale`, the representation used by the scaled-long backend.
    pub fn from_scaled_i64(unscaled: i64, scale: u32) -> Self {
        Self::new(IBig::from(unscaled), scale)
    }

    /// Shortest decimal that round-trips to `value`. Non-finite values have no decimal form.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        // `Display` for f64 never uses exponent notation and prints the shortest round-trip digits.
        format!("{value}").parse().ok()
    }

    pub fn unscaled(&self) -> &IBig {
        &self.unscaled
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_zero(&self) -> bool {
        self.unscaled == IBig::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.unscaled < IBig::ZERO
    }

    pub fn is_integer(&self) -> bool {
        let n = self.normalized();
        n.scale == 0
    }

    pub fn neg(&self) -> Self {
        Self::new(-self.unscaled.clone(), self.scale)
    }

    pub fn abs(&self) -> Self {
        if self.is_negative() {
            self.neg()
        } else {
            self.clone()
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        let scale = self.scale.max(other.scale);
        let a = self.upscaled(scale);
        let b = other.upscaled(scale);
        Self::new(&a + &b, scale)
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.add(&other.neg())
    }

    pub fn mul(&self, other: &Self) -> Self {
        Self::new(&self.unscaled * &other.unscaled, self.scale + other.scale)
    }

    /// Quotient rounded to `scale` fractional digits. `None` for a zero divisor.
    pub fn div(&self, other: &Self, scale: u32, mode: RoundingMode) -> Option<Self> {
        if other.is_zero() {
            return None;
        }
        // self / other = (a / 10^sa) / (b / 10^sb); scale the numerator so the quotient lands on `scale`.
        let shift = i64::from(scale) + i64::from(other.scale) - i64::from(self.scale);
        let (num, den) = if shift >= 0 {
            (&self.unscaled * &pow10(shift as u32), other.unscaled.clone())
        } else {
            (self.unscaled.clone(), &other.unscaled * &pow10((-shift) as u32))
        };
        let (num, den) = if den < IBig::ZERO {
            (-num, -den)
        } else {
            (num, den)
        };
        Some(Self::new(round_div(&num, &den, mode), scale))
    }

    /// Rescales to exactly `scale` fractional digits, rounding when digits are dropped.
    pub fn with_scale(&self, scale: u32, mode: RoundingMode) -> Self {
        if scale >= self.scale {
            Self::new(self.upscaled(scale), scale)
        } else {
            let den = pow10(self.scale - scale);
            Self::new(round_div(&self.unscaled, &den, mode), scale)
        }
    }

    /// Same value with trailing fractional zeros removed.
    pub fn normalized(&self) -> Self {
        let ten = IBig::from(10);
        let mut unscaled = self.unscaled.clone();
        let mut scale = self.scale;
        while scale > 0 && (&unscaled % &ten) == IBig::ZERO {
            unscaled = &unscaled / &ten;
            scale -= 1;
        }
        Self::new(unscaled, scale)
    }

    /// Integer `value^exponent`, exact.
    pub fn powi(&self, exponent: u32) -> Self {
        Self::new(
            self.unscaled.pow(exponent as usize),
            self.scale * exponent,
        )
    }

    /// Nearest binary64 value.
    pub fn to_f64(&self) -> f64 {
        self.to_string().parse().unwrap_or(f64::NAN)
    }

    /// Integer part (truncated towards zero) if it fits in an `i64`.
    pub fn to_i64(&self) -> Option<i64> {
        let truncated = self.with_scale(0, RoundingMode::Down);
        i64::try_from(truncated.unscaled).ok()
    }

    /// `round(value * 10^scale)` as an `i64`, for the scaled-long backend.
    pub fn to_scaled_i64(&self, scale: u32, mode: RoundingMode) -> Option<i64> {
        let rescaled = self.with_scale(scale, mode);
        i64::try_from(rescaled.unscaled).ok()
    }

    fn upscaled(&self, scale: u32) -> IBig {
        debug_assert!(scale >= self.scale);
        if scale == self.scale {
            self.unscaled.clone()
        } else {
            &self.unscaled * &pow10(scale - self.scale)
        }
    }
}

fn pow10(exp: u32) -> IBig {
    IBig::from(10).pow(exp as usize)
}

/// `num / den` rounded per `mode`; `den` must be positive.
fn round_div(num: &IBig, den: &IBig, mode: RoundingMode) -> IBig {
    let quotient = num / den;
    let remainder = num - &(&quotient * den);
    if remainder == IBig::ZERO {
        return quotient;
    }
    let negative = *num < IBig::ZERO;
    let remainder = if remainder < IBig::ZERO {
        -remainder
    } else {
        remainder
    };
    let half = (&remainder * &IBig::from(2)).cmp(den);
    let away = match mode {
        RoundingMode::Up => true,
        RoundingMode::Down => false,
        RoundingMode::Ceiling => !negative,
        RoundingMode::Floor => negative,
        RoundingMode::HalfUp => half != Ordering::Less,
        RoundingMode::HalfDown => half == Ordering::Greater,
        RoundingMode::HalfEven => {
            half == Ordering::Greater
                || (half == Ordering::Equal && (&quotient % &IBig::from(2)) != IBig::ZERO)
        }
    };
    match (away, negative) {
        (false, _) => quotient,
        (true, false) => quotient + IBig::ONE,
        (true, true) => quotient - IBig::ONE,
    }
}

impl PartialEq for BigDecimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BigDecimal {}

impl PartialOrd for BigDecimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BigDecimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let scale = self.scale.max(other.scale);
        self.upscaled(scale).cmp(&other.upscaled(scale))
    }
}

impl From<i64> for BigDecimal {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl From<i32> for BigDecimal {
    fn from(value: i32) -> Self {
        Self::from_i64(i64::from(value))
    }
}

impl FromStr for BigDecimal {
    type Err = ParseDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseDecimalError(s.to_string());
        let raw = s.trim();
        let (negative, body) = match raw.as_bytes().first() {
            Some(b'-') => (true, &raw[1..]),
            Some(b'+') => (false, &raw[1..]),
            _ => (false, raw),
        };
        let (mantissa, exponent) = match body.find(['e', 'E']) {
            Some(pos) => {
                let exp: i64 = body[pos + 1..].parse().map_err(|_| err())?;
                (&body[..pos], exp)
            }
            None => (body, 0),
        };
        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((i, f)) => (i, f),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(err());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let digits = format!("{int_part}{frac_part}");
        let mut unscaled: IBig = digits.parse().map_err(|_| err())?;
        if negative {
            unscaled = -unscaled;
        }
        let scale = frac_part.len() as i64 - exponent;
        if scale >= 0 {
            let scale = u32::try_from(scale).map_err(|_| err())?;
            Ok(Self::new(unscaled, scale))
        } else {
            let shift = u32::try_from(-scale).map_err(|_| err())?;
            Ok(Self::new(&unscaled * &pow10(shift), 0))
        }
    }
}

impl fmt::Display for BigDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let negative = self.is_negative();
        let magnitude = if negative {
            -self.unscaled.clone()
        } else {
            self.unscaled.clone()
        };
        let digits = magnitude.to_string();
        if negative {
            f.write_str("-")?;
        }
        let scale = self.scale as usize;
        if scale == 0 {
            return f.write_str(&digits);
        }
        if digits.len() > scale {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            write!(f, "{int_part}.{frac_part}")
        } else {
            write!(f, "0.{}{digits}", "0".repeat(scale - digits.len()))
        }
    }
}

impl Serialize for BigDecimal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BigDecimal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    #[test]
    fn parses_plain_and_exponent_forms() {
        assert_eq!(dec("123.45").to_string(), "123.45");
        assert_eq!(dec("-0.005").to_string(), "-0.005");
        assert_eq!(dec("1.5e3").to_string(), "1500");
        assert_eq!(dec("123.45E-4").to_string(), "0.012345");
        assert_eq!(dec(".5").to_string(), "0.5");
        assert!("1.2.3".parse::<BigDecimal>().is_err());
        assert!("".parse::<BigDecimal>().is_err());
        assert!("e5".parse::<BigDecimal>().is_err());
    }

    #[test]
    fn equality_ignores_trailing_zeros() {
        assert_eq!(dec("160"), dec("160.00000000"));
        assert!(dec("0.1") < dec("0.10001"));
        assert_eq!(dec("160.00000000").normalized().to_string(), "160");
    }

    #[test]
    fn division_rounds_per_mode() {
        let one = BigDecimal::one();
        let three = BigDecimal::from_i64(3);
        let two = BigDecimal::from_i64(2);
        assert_eq!(
            one.div(&three, 4, RoundingMode::HalfUp).unwrap().to_string(),
            "0.3333"
        );
        assert_eq!(
            two.div(&three, 4, RoundingMode::HalfUp).unwrap().to_string(),
            "0.6667"
        );
        assert_eq!(
            two.div(&three, 4, RoundingMode::Down).unwrap().to_string(),
            "0.6666"
        );
        assert_eq!(
            two.neg().div(&three, 2, RoundingMode::Floor).unwrap().to_string(),
            "-0.67"
        );
        assert!(one.div(&BigDecimal::zero(), 4, RoundingMode::HalfUp).is_none());
    }

    #[test]
    fn half_even_and_half_down_differ_on_ties() {
        assert_eq!(dec("2.5").with_scale(0, RoundingMode::HalfEven).to_string(), "2");
        assert_eq!(dec("3.5").with_scale(0, RoundingMode::HalfEven).to_string(), "4");
        assert_eq!(dec("2.5").with_scale(0, RoundingMode::HalfDown).to_string(), "2");
        assert_eq!(dec("-2.5").with_scale(0, RoundingMode::HalfUp).to_string(), "-3");
    }

    #[test]
    fn f64_conversions_use_shortest_digits() {
        assert_eq!(BigDecimal::from_f64(0.1).unwrap().to_string(), "0.1");
        assert_eq!(BigDecimal::from_f64(160.0).unwrap().to_f64(), 160.0);
        assert!(BigDecimal::from_f64(f64::INFINITY).is_none());
        assert_eq!(dec("12.5").to_scaled_i64(4, RoundingMode::HalfUp), Some(125_000));
        assert_eq!(dec("-7.9").to_i64(), Some(-7));
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&dec("1.25")).unwrap();
        assert_eq!(json, "\"1.25\"");
        let back: BigDecimal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dec("1.25"));
    }
}
