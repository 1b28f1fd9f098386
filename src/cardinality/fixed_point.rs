//! Fixed-point HyperLogLog values computed in the data plane
//!
//! A switch pipeline has no floating point, so the data plane keeps its own
//! HLL result as an integer scaled by `2^s`, where `s = 33 - log2(m)` is the
//! largest rho an `m`-bucket sketch can record. When the pipeline applied
//! linear counting the register holds that result; otherwise it holds the
//! scaled indicator sum and the controller finishes the division.

use alloc::vec::Vec;

use super::alpha;
use crate::error::{ConfigError, IntegrityError, Result};
use crate::math;

/// Fractional bits `s = 33 - log2(m)`
///
/// Fails for any `m` the decoder does not support, and for `m > 2^32`
/// where no fractional bits remain.
pub fn fractional_bits(m: usize) -> Result<u32> {
    alpha(m)?;
    match 33u32.checked_sub(m.trailing_zeros()) {
        Some(s) if s > 0 => Ok(s),
        _ => Err(ConfigError::UnsupportedRegisterCount(m).into()),
    }
}

/// Scale `value` to fixed point, truncating
pub fn to_fixed(value: f64, m: usize) -> Result<u64> {
    Ok(scale(value, fractional_bits(m)?))
}

/// Interpret `raw` as a fixed-point number with `fractional_bits(m)` bits
pub fn from_fixed(raw: u64, m: usize) -> Result<f64> {
    Ok(unscale(raw, fractional_bits(m)?))
}

/// Linear counting results the data plane looks up by number of empty
/// registers `x` in `1..m` (entry `x - 1`), scaled to fixed point
pub fn linear_counting_table(m: usize) -> Result<Vec<u64>> {
    let s = fractional_bits(m)?;
    Ok((1..m)
        .map(|x| scale(super::linear_counting(m, x), s))
        .collect())
}

/// Decode the data plane's HLL estimate register
///
/// `small_range_applied` mirrors the data plane's flag register: when zero
/// the register held the indicator sum.
pub fn decode_estimate(raw: u64, small_range_applied: bool, m: usize) -> Result<f64> {
    let value = unscale(raw, fractional_bits(m)?);
    if small_range_applied {
        return Ok(value);
    }
    if value == 0.0 {
        return Err(IntegrityError::Saturated { raw: f64::INFINITY }.into());
    }
    let m_f = m as f64;
    Ok(alpha(m)? * m_f * m_f / value)
}

fn scale(value: f64, s: u32) -> u64 {
    math::floor(value * math::exp2(s as f64)) as u64
}

fn unscale(raw: u64, s: u32) -> f64 {
    let integer = (raw >> s) as f64;
    let fraction = (raw & ((1u64 << s) - 1)) as f64;
    integer + fraction / math::exp2(s as f64)
}
