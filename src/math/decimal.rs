//! Fixed-point decimal: an arbitrary-precision integer mantissa with an
//! explicit base-10 scale. `value = mantissa / 10^scale`.
//!
//! All rounding truncates toward zero. Nothing here touches floating point.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{ProjectionError, ProjectionResult};

#[derive(Debug, Clone)]
pub struct Decimal {
    mantissa: BigInt,
    scale: u32,
}

pub fn pow10(exp: u32) -> BigInt {
    num_traits::pow(BigInt::from(10u8), exp as usize)
}

impl Decimal {
    pub fn new(mantissa: BigInt, scale: u32) -> Self {
        Self { mantissa, scale }
    }

    pub fn zero() -> Self {
        Self::new(BigInt::zero(), 0)
    }

    pub fn from_int(v: impl Into<BigInt>) -> Self {
        Self::new(v.into(), 0)
    }

    /// Exact `raw / 10^decimals`, the scaled mirror of a raw on-chain amount.
    pub fn from_scaled_int(raw: &BigUint, decimals: u32) -> Self {
        Self::new(BigInt::from(raw.clone()), decimals)
    }

    /// `num / den` truncated to `scale` fractional digits.
    pub fn from_ratio(num: &BigInt, den: &BigInt, scale: u32) -> ProjectionResult<Self> {
        if den.is_zero() {
            return Err(ProjectionError::DivisionByZero);
        }
        Ok(Self::new((num * pow10(scale)) / den, scale))
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }

    /// Re-express at another scale; lowering the scale truncates.
    pub fn rescale(&self, scale: u32) -> Self {
        match scale.cmp(&self.scale) {
            Ordering::Equal => self.clone(),
            Ordering::Greater => Self::new(&self.mantissa * pow10(scale - self.scale), scale),
            Ordering::Less => Self::new(&self.mantissa / pow10(self.scale - scale), scale),
        }
    }

    fn aligned(&self, other: &Self) -> (BigInt, BigInt, u32) {
        let scale = self.scale.max(other.scale);
        (
            self.rescale(scale).mantissa,
            other.rescale(scale).mantissa,
            scale,
        )
    }

    pub fn div_to_scale(&self, other: &Self, scale: u32) -> ProjectionResult<Self> {
        if other.is_zero() {
            return Err(ProjectionError::DivisionByZero);
        }
        // (a/10^sa) / (b/10^sb) = a*10^(scale+sb-sa) / b, shifting whichever side keeps it integral
        let up = scale as i64 + other.scale as i64 - self.scale as i64;
        let (num, den) = if up >= 0 {
            (&self.mantissa * pow10(up as u32), other.mantissa.clone())
        } else {
            (self.mantissa.clone(), &other.mantissa * pow10((-up) as u32))
        };
        Ok(Self::new(num / den, scale))
    }
}

impl Default for Decimal {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add for &Decimal {
    type Output = Decimal;
    fn add(self, rhs: &Decimal) -> Decimal {
        let (a, b, scale) = self.aligned(rhs);
        Decimal::new(a + b, scale)
    }
}

impl Sub for &Decimal {
    type Output = Decimal;
    fn sub(self, rhs: &Decimal) -> Decimal {
        let (a, b, scale) = self.aligned(rhs);
        Decimal::new(a - b, scale)
    }
}

impl Mul for &Decimal {
    type Output = Decimal;
    fn mul(self, rhs: &Decimal) -> Decimal {
        Decimal::new(&self.mantissa * &rhs.mantissa, self.scale + rhs.scale)
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b, _) = self.aligned(other);
        a.cmp(&b)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.magnitude().to_str_radix(10);
        let sign = if self.mantissa.sign() == Sign::Minus { "-" } else { "" };
        if self.scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let scale = self.scale as usize;
        let padded = if digits.len() <= scale {
            format!("{}{}", "0".repeat(scale - digits.len() + 1), digits)
        } else {
            digits
        };
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid decimal literal: {0}")]
pub struct ParseDecimalError(String);

impl FromStr for Decimal {
    type Err = ParseDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (neg, body) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(ParseDecimalError(s.to_string()));
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(ParseDecimalError(s.to_string()));
        }
        let joined = format!("{int_part}{frac_part}");
        let magnitude = BigUint::parse_bytes(joined.as_bytes(), 10)
            .ok_or_else(|| ParseDecimalError(s.to_string()))?;
        let sign = if neg { Sign::Minus } else { Sign::Plus };
        Ok(Decimal::new(
            BigInt::from_biguint(sign, magnitude),
            frac_part.len() as u32,
        ))
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
