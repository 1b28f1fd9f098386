//! Cardinality (distinct source count) decoding
//!
//! The data plane maintains HyperLogLog registers; this module turns a
//! register snapshot into an estimate.
//!
//! # Algorithms
//!
//! - [`HyperLogLogDecoder`]: raw harmonic-mean estimate plus [`Regime`]
//!   correction
//! - [`fixed_point`]: reading back the estimate the data plane computes itself
//!
//! # Example
//!
//! ```
//! use flowsketch::cardinality::HyperLogLogDecoder;
//!
//! let decoder = HyperLogLogDecoder::new(16).unwrap();
//! let estimate = decoder.decode(&[0u64; 16]).unwrap();
//! assert_eq!(estimate.value, 0.0);
//! ```

pub mod fixed_point;
mod hyperloglog;

pub use hyperloglog::{CardinalityEstimate, HyperLogLogDecoder};

use crate::error::{ConfigError, Result};
use crate::math;

/// Largest rho a 32-bit digest can produce
pub const MAX_RHO: u8 = 32;

pub(crate) const TWO_POW_32: f64 = 4_294_967_296.0;

/// Bias constant α(m)
///
/// Only `m` in {16, 32, 64} or a power of two >= 128 is supported.
pub fn alpha(m: usize) -> Result<f64> {
    match m {
        16 => Ok(0.673),
        32 => Ok(0.697),
        64 => Ok(0.709),
        m if m >= 128 && m.is_power_of_two() => Ok(0.7213 / (1.0 + 1.079 / m as f64)),
        m => Err(ConfigError::UnsupportedRegisterCount(m).into()),
    }
}

/// HyperLogLog correction regime, chosen from the raw estimate `E`
///
/// | Regime | Range | Result |
/// |--------|-------|--------|
/// | `SmallRange` | `E <= 2.5m` | `m ln(m/V)` if `V > 0` zero registers, else `E` |
/// | `MidRange` | `2.5m < E <= 2^32/30` | `E` |
/// | `LargeRange` | `E > 2^32/30` | `-2^32 ln(1 - E/2^32)` |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Regime {
    /// Linear counting territory
    SmallRange,
    /// Raw estimate is unbiased enough
    MidRange,
    /// Hash collisions in the 32-bit space dominate
    LargeRange,
}

impl Regime {
    /// Upper bound (inclusive) of the small range
    pub fn small_range_limit(m: usize) -> f64 {
        2.5 * m as f64
    }

    /// Upper bound (inclusive) of the mid range
    pub fn mid_range_limit() -> f64 {
        TWO_POW_32 / 30.0
    }

    /// Select the regime for raw estimate `raw` over `m` registers
    pub fn select(raw: f64, m: usize) -> Self {
        if raw <= Self::small_range_limit(m) {
            Regime::SmallRange
        } else if raw <= Self::mid_range_limit() {
            Regime::MidRange
        } else {
            Regime::LargeRange
        }
    }

    /// Apply this regime's correction
    ///
    /// `zero_registers` is only consulted in the small range.
    pub fn apply(self, raw: f64, m: usize, zero_registers: usize) -> f64 {
        match self {
            Regime::SmallRange if zero_registers > 0 => linear_counting(m, zero_registers),
            Regime::SmallRange | Regime::MidRange => raw,
            Regime::LargeRange => -TWO_POW_32 * math::ln(1.0 - raw / TWO_POW_32),
        }
    }
}

/// Linear counting estimate `m ln(m / zeros)`
pub fn linear_counting(m: usize, zero_registers: usize) -> f64 {
    let m = m as f64;
    m * math::ln(m / zero_registers as f64)
}

/// Expected relative standard error for `m` registers
pub fn error_for_registers(m: usize) -> f64 {
    1.04 / math::sqrt(m as f64)
}
