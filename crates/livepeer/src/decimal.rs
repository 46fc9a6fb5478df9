//! Fixed-point decimal with 18 fractional digits.
//!
//! Token amounts arrive as raw 18-decimal integers, so conversion from wei is
//! exact and addition/subtraction never lose precision. Multiplication and
//! division truncate toward zero at the 18th fractional digit, which bounds
//! the drift of each operation to one unit in the last place (1e-18).

use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
    str::FromStr,
};

use bondgraph_core::U256;
use num_bigint::{BigInt, Sign};
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};

pub const DIGITS: u32 = 18;

fn unit() -> BigInt {
    BigInt::from(1_000_000_000_000_000_000u64)
}

fn pow10(exp: u32) -> BigInt {
    BigInt::from(10u8).pow(exp)
}

/// Widens an on-chain unsigned integer into an arbitrary-precision one.
pub fn to_bigint(value: &U256) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>())
}

/// Narrows an on-chain integer used as a round, block or id, saturating at
/// `u64::MAX`.
pub fn saturating_u64(value: &U256) -> u64 {
    u64::try_from(*value).unwrap_or(u64::MAX)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid decimal literal: {0:?}")]
pub struct DecimalError(String);

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Decimal(BigInt);

impl Decimal {
    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    pub fn one() -> Self {
        Self(unit())
    }

    /// Converts an 18-decimal raw token amount.
    pub fn from_wei(wei: &U256) -> Self {
        Self(to_bigint(wei))
    }

    /// Converts a raw integer carrying `decimals` fractional digits.
    pub fn from_scaled(raw: &U256, decimals: u32) -> Self {
        let raw = to_bigint(raw);

        if decimals <= DIGITS {
            Self(raw * pow10(DIGITS - decimals))
        } else {
            Self(raw / pow10(decimals - DIGITS))
        }
    }

    /// Builds `numer / denom`, or `None` when the denominator is zero.
    pub fn from_ratio(numer: &BigInt, denom: &BigInt) -> Option<Self> {
        if denom.is_zero() {
            return None;
        }

        Some(Self(numer * unit() / denom))
    }

    pub fn raw(&self) -> &BigInt {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_positive()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn checked_div(&self, other: &Decimal) -> Option<Decimal> {
        Self::from_ratio(&self.0, &other.0)
    }

    /// Division that yields zero for a zero denominator.
    pub fn safe_div(&self, other: &Decimal) -> Decimal {
        self.checked_div(other).unwrap_or_default()
    }
}

impl From<u64> for Decimal {
    fn from(value: u64) -> Self {
        Self(BigInt::from(value) * unit())
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Self(BigInt::from(value) * unit())
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = unit();
        let magnitude = self.0.abs();
        let int = &magnitude / &unit;
        let frac = &magnitude % &unit;

        if self.0.is_negative() {
            write!(f, "-")?;
        }

        write!(f, "{int}")?;

        if !frac.is_zero() {
            let digits = format!("{:0>width$}", frac.to_string(), width = DIGITS as usize);
            write!(f, ".{}", digits.trim_end_matches('0'))?;
        }

        Ok(())
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Decimal {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DecimalError(s.to_string());

        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (int, frac) = body.split_once('.').unwrap_or((body, ""));

        let all_digits = |x: &str| x.bytes().all(|b| b.is_ascii_digit());

        if int.is_empty() || !all_digits(int) || !all_digits(frac) {
            return Err(invalid());
        }

        // digits beyond the supported precision are truncated
        let frac = &frac[..frac.len().min(DIGITS as usize)];
        let frac = format!("{frac:0<width$}", width = DIGITS as usize);

        let raw = BigInt::from_str(&format!("{int}{frac}")).map_err(|_| invalid())?;

        let raw = match negative {
            true => -raw,
            false => raw,
        };

        Ok(Self(raw))
    }
}

impl Serialize for Decimal {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl Add<&Decimal> for Decimal {
    type Output = Decimal;

    fn add(self, rhs: &Decimal) -> Decimal {
        Decimal(self.0 + &rhs.0)
    }
}

impl Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl Sub<&Decimal> for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: &Decimal) -> Decimal {
        Decimal(self.0 - &rhs.0)
    }
}

impl Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl Mul<&Decimal> for &Decimal {
    type Output = Decimal;

    fn mul(self, rhs: &Decimal) -> Decimal {
        Decimal(&self.0 * &rhs.0 / unit())
    }
}

impl Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

impl AddAssign<&Decimal> for Decimal {
    fn add_assign(&mut self, rhs: &Decimal) {
        self.0 += &rhs.0;
    }
}

impl AddAssign for Decimal {
    fn add_assign(&mut self, rhs: Decimal) {
        self.0 += rhs.0;
    }
}

impl SubAssign<&Decimal> for Decimal {
    fn sub_assign(&mut self, rhs: &Decimal) {
        self.0 -= &rhs.0;
    }
}

impl SubAssign for Decimal {
    fn sub_assign(&mut self, rhs: Decimal) {
        self.0 -= rhs.0;
    }
}

impl Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a Decimal> for Decimal {
    fn sum<I: Iterator<Item = &'a Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, x| acc + x)
    }
}
