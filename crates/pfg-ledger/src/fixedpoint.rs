//! Fixed-point money and ratio types.
//!
//! # Scale
//!
//! 1 USD = 1_000_000 [`Micros`]. A ratio of 1.0 = 1_000_000 [`Ppm`].
//! Prices are carried at the same 1e-6 scale as money.
//!
//! # Rounding
//!
//! Every division in the guardian picks its rounding direction explicitly:
//! allowances are floored, consumed fractions are ceiled, and P&L is floored
//! toward negative infinity so a loss is never understated. The helpers at
//! the bottom of this module are the only place those directions live.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

pub const MICROS_SCALE: i64 = 1_000_000;
pub const PPM_SCALE: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Micros newtype
// ---------------------------------------------------------------------------

/// A fixed-point monetary amount (or price) at 1e-6 scale.
///
/// There is intentionally no `From<i64>`; use [`Micros::new`] when a raw
/// integer is known to be a micros amount.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Micros(i64);

impl Micros {
    pub const ZERO: Micros = Micros(0);
    pub const MAX: Micros = Micros(i64::MAX);
    pub const MIN: Micros = Micros(i64::MIN);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        Micros(raw)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Whole dollars.
    #[inline]
    pub const fn from_usd(usd: i64) -> Self {
        Micros(usd * MICROS_SCALE)
    }

    /// Convert an external floating-point amount, rounding to the nearest
    /// micro. `None` for NaN, infinities and out-of-range values.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * MICROS_SCALE as f64).round();
        if scaled > i64::MAX as f64 || scaled < i64::MIN as f64 {
            return None;
        }
        Some(Micros(scaled as i64))
    }

    /// Lossy conversion for reporting and sizing inputs.
    #[inline]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / MICROS_SCALE as f64
    }

    #[inline]
    pub fn saturating_add(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_sub(rhs.0))
    }

    #[inline]
    pub fn abs(self) -> Micros {
        Micros(self.0.saturating_abs())
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// `max(self, 0)`.
    #[inline]
    pub fn clamp_non_negative(self) -> Micros {
        Micros(self.0.max(0))
    }
}

impl Add for Micros {
    type Output = Micros;
    #[inline]
    fn add(self, rhs: Micros) -> Micros {
        Micros(self.0 + rhs.0)
    }
}

impl Sub for Micros {
    type Output = Micros;
    #[inline]
    fn sub(self, rhs: Micros) -> Micros {
        Micros(self.0 - rhs.0)
    }
}

impl Neg for Micros {
    type Output = Micros;
    #[inline]
    fn neg(self) -> Micros {
        Micros(-self.0)
    }
}

impl AddAssign for Micros {
    #[inline]
    fn add_assign(&mut self, rhs: Micros) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Micros {
    #[inline]
    fn sub_assign(&mut self, rhs: Micros) {
        self.0 -= rhs.0;
    }
}

impl std::fmt::Display for Micros {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dollars = self.0 / MICROS_SCALE;
        let frac = (self.0 % MICROS_SCALE).abs();
        // -0.xx would otherwise lose its sign.
        if self.0 < 0 && dollars == 0 {
            write!(f, "-{dollars}.{frac:06}")
        } else {
            write!(f, "{dollars}.{frac:06}")
        }
    }
}

// ---------------------------------------------------------------------------
// Ppm newtype
// ---------------------------------------------------------------------------

/// A ratio in parts per million. `Ppm::ONE` is 100%.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ppm(i64);

impl Ppm {
    pub const ZERO: Ppm = Ppm(0);
    pub const ONE: Ppm = Ppm(PPM_SCALE);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        Ppm(raw)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Nearest-ppm conversion of a configured fraction (e.g. `0.05`).
    /// `None` for non-finite input.
    pub fn from_fraction(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * PPM_SCALE as f64).round();
        if scaled > i64::MAX as f64 || scaled < i64::MIN as f64 {
            return None;
        }
        Some(Ppm(scaled as i64))
    }

    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / PPM_SCALE as f64
    }

    /// `max(self - rhs, 0)`.
    #[inline]
    pub fn saturating_sub_floor_zero(self, rhs: Ppm) -> Ppm {
        Ppm(self.0.saturating_sub(rhs.0).max(0))
    }
}

impl std::fmt::Display for Ppm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.as_f64())
    }
}

// ---------------------------------------------------------------------------
// Directed rounding helpers
// ---------------------------------------------------------------------------

pub(crate) fn i128_to_i64_clamp(x: i128) -> i64 {
    if x > i64::MAX as i128 {
        i64::MAX
    } else if x < i64::MIN as i128 {
        i64::MIN
    } else {
        x as i64
    }
}

/// `amount × ratio`, rounded toward negative infinity.
pub fn mul_ppm_floor(amount: Micros, ratio: Ppm) -> Micros {
    let prod = amount.0 as i128 * ratio.0 as i128;
    Micros(i128_to_i64_clamp(prod.div_euclid(PPM_SCALE as i128)))
}

/// `amount × ratio`, rounded toward positive infinity.
pub fn mul_ppm_ceil(amount: Micros, ratio: Ppm) -> Micros {
    let prod = amount.0 as i128 * ratio.0 as i128;
    let den = PPM_SCALE as i128;
    let q = prod.div_euclid(den);
    let q = if prod.rem_euclid(den) != 0 { q + 1 } else { q };
    Micros(i128_to_i64_clamp(q))
}

/// `consumed / allowance` in ppm, rounded up. `None` when the allowance is
/// not strictly positive; callers treat that as a degenerate denominator.
pub fn ratio_ppm_ceil(consumed: Micros, allowance: Micros) -> Option<Ppm> {
    if allowance.0 <= 0 {
        return None;
    }
    let num = consumed.0.max(0) as i128 * PPM_SCALE as i128;
    let den = allowance.0 as i128;
    let q = num / den;
    let q = if num % den != 0 { q + 1 } else { q };
    Some(Ppm(i128_to_i64_clamp(q)))
}
