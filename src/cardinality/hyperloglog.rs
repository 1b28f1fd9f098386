//! HyperLogLog register decoding
//!
//! Turns a snapshot of `m` rho registers into a cardinality estimate using the
//! harmonic-mean raw estimate and the three classic correction regimes.

use alloc::string::String;

use super::{alpha, Regime, TWO_POW_32};
use crate::error::{IntegrityError, Result};
use crate::math;
use crate::traits::{z_score, ErrorBounds};

/// Decoder for HLL register arrays of a fixed size
///
/// # Example
///
/// ```
/// use flowsketch::cardinality::{HyperLogLogDecoder, Regime};
///
/// let decoder = HyperLogLogDecoder::new(16).unwrap();
/// let estimate = decoder.decode(&[1u64; 16]).unwrap();
///
/// assert_eq!(estimate.regime, Regime::SmallRange);
/// assert!((estimate.value - 21.536).abs() < 1e-9);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HyperLogLogDecoder {
    m: usize,
    alpha: f64,
    max_rho: u64,
}

impl HyperLogLogDecoder {
    /// Decoder for `m` registers; `m` must be 16, 32, 64 or a power of two >= 128
    pub fn new(m: usize) -> Result<Self> {
        Ok(Self {
            m,
            alpha: alpha(m)?,
            max_rho: super::MAX_RHO as u64,
        })
    }

    /// Tighten the register bound below 32 (e.g. for narrow device registers)
    pub fn with_max_rho(mut self, max_rho: u64) -> Self {
        self.max_rho = max_rho.min(super::MAX_RHO as u64);
        self
    }

    /// Number of registers
    pub fn num_registers(&self) -> usize {
        self.m
    }

    /// Bias constant α(m)
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Decode a register snapshot
    ///
    /// Fails on a length mismatch, on any register above the rho bound, and
    /// when the raw estimate reaches 2^32 (where the large-range correction
    /// is undefined).
    pub fn decode(&self, registers: &[u64]) -> Result<CardinalityEstimate> {
        self.decode_named("hyperloglog", registers)
    }

    pub(crate) fn decode_named(
        &self,
        name: &str,
        registers: &[u64],
    ) -> Result<CardinalityEstimate> {
        if registers.len() != self.m {
            return Err(IntegrityError::LengthMismatch {
                register: String::from(name),
                expected: self.m,
                found: registers.len(),
            }
            .into());
        }

        let mut indicator_sum = 0.0;
        let mut zero_registers = 0;
        for (index, &rho) in registers.iter().enumerate() {
            if rho > self.max_rho {
                return Err(IntegrityError::RegisterOutOfRange {
                    register: String::from(name),
                    index,
                    value: rho,
                    max: self.max_rho,
                }
                .into());
            }
            if rho == 0 {
                zero_registers += 1;
            }
            indicator_sum += math::exp2(-(rho as f64));
        }

        let raw = self.raw_estimate(indicator_sum);
        if raw >= TWO_POW_32 {
            return Err(IntegrityError::Saturated { raw }.into());
        }

        let regime = Regime::select(raw, self.m);
        let value = regime.apply(raw, self.m, zero_registers);

        Ok(CardinalityEstimate {
            m: self.m,
            indicator_sum,
            raw,
            zero_registers,
            regime,
            value,
        })
    }

    /// `α(m) · m² / indicator_sum`
    pub fn raw_estimate(&self, indicator_sum: f64) -> f64 {
        let m = self.m as f64;
        self.alpha * m * m / indicator_sum
    }
}

/// Decoded cardinality with the intermediate quantities that produced it
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CardinalityEstimate {
    /// Register count
    pub m: usize,
    /// Σ 2^-register[i]
    pub indicator_sum: f64,
    /// Raw harmonic-mean estimate E
    pub raw: f64,
    /// Registers equal to zero (V)
    pub zero_registers: usize,
    /// Correction regime selected from E
    pub regime: Regime,
    /// Final estimate
    pub value: f64,
}

impl CardinalityEstimate {
    /// Whether linear counting produced the value
    pub fn used_linear_counting(&self) -> bool {
        self.regime == Regime::SmallRange && self.zero_registers > 0
    }

    /// Relative standard error, 1.04 / sqrt(m)
    pub fn relative_error(&self) -> f64 {
        super::error_for_registers(self.m)
    }

    /// Confidence interval around the estimate
    pub fn error_bounds(&self, confidence: f64) -> ErrorBounds {
        let margin = z_score(confidence) * self.relative_error() * self.value;
        ErrorBounds::new(
            (self.value - margin).max(0.0),
            self.value,
            self.value + margin,
            confidence,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use alloc::vec;
    use alloc::vec::Vec;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_empty_registers_estimate_zero() {
        for m in [16, 32, 64, 128, 256] {
            let est = HyperLogLogDecoder::new(m).unwrap().decode(&vec![0; m]).unwrap();
            assert_eq!(est.indicator_sum, m as f64);
            assert_eq!(est.regime, Regime::SmallRange);
            assert_eq!(est.zero_registers, m);
            assert_eq!(est.value, 0.0);
        }
    }

    #[test]
    fn test_small_range_without_zeros_falls_back_to_raw() {
        let est = HyperLogLogDecoder::new(16).unwrap().decode(&[1; 16]).unwrap();
        assert_eq!(est.indicator_sum, 8.0);
        assert!(close(est.raw, 21.536, 1e-9));
        assert_eq!(est.regime, Regime::SmallRange);
        assert!(!est.used_linear_counting());
        assert!(close(est.value, 21.536, 1e-9));
    }

    #[test]
    fn test_small_range_linear_counting() {
        let mut registers = vec![0u64; 8];
        registers.extend([1u64; 8]);
        let est = HyperLogLogDecoder::new(16).unwrap().decode(&registers).unwrap();

        assert!(close(est.raw, 14.357_333_333, 1e-6));
        assert_eq!(est.zero_registers, 8);
        assert!(est.used_linear_counting());
        assert!(close(est.value, 11.090_354_888_959_125, 1e-9));
    }

    #[test]
    fn test_mid_range_returns_raw() {
        let est = HyperLogLogDecoder::new(16).unwrap().decode(&[4; 16]).unwrap();
        assert_eq!(est.regime, Regime::MidRange);
        assert!(close(est.value, 172.288, 1e-9));
        assert_eq!(est.value, est.raw);
    }

    #[test]
    fn test_large_range_correction() {
        let est = HyperLogLogDecoder::new(16).unwrap().decode(&[24; 16]).unwrap();
        assert_eq!(est.regime, Regime::LargeRange);
        assert!(close(est.raw, 180_657_061.888, 1e-3));
        assert!(close(est.value, 184_566_526.762, 1.0));
        assert!(est.value > est.raw);
    }

    #[test]
    fn test_alpha_for_large_m() {
        let est = HyperLogLogDecoder::new(128).unwrap().decode(&[0; 128]).unwrap();
        // indicator_sum = m, so E = alpha * m
        assert!(close(est.raw, 0.7213 / (1.0 + 1.079 / 128.0) * 128.0, 1e-9));
    }

    #[test]
    fn test_register_above_bound_rejected() {
        let mut registers = vec![3u64; 32];
        registers[7] = 33;
        let err = HyperLogLogDecoder::new(32).unwrap().decode(&registers).unwrap_err();
        assert_eq!(
            err,
            Error::Integrity(IntegrityError::RegisterOutOfRange {
                register: String::from("hyperloglog"),
                index: 7,
                value: 33,
                max: 32,
            })
        );
    }

    #[test]
    fn test_tightened_bound() {
        let decoder = HyperLogLogDecoder::new(16).unwrap().with_max_rho(29);
        assert!(decoder.decode(&[20; 16]).is_ok());
        assert!(matches!(
            decoder.decode(&[30; 16]),
            Err(Error::Integrity(IntegrityError::RegisterOutOfRange { max: 29, .. }))
        ));
    }

    #[test]
    fn test_in_bound_registers_can_still_saturate() {
        // 0.673 * 16 * 2^29 is above 2^32
        let decoder = HyperLogLogDecoder::new(16).unwrap().with_max_rho(29);
        assert!(matches!(
            decoder.decode(&[29; 16]),
            Err(Error::Integrity(IntegrityError::Saturated { .. }))
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = HyperLogLogDecoder::new(16).unwrap().decode(&[0; 15]).unwrap_err();
        assert!(matches!(
            err,
            Error::Integrity(IntegrityError::LengthMismatch {
                expected: 16,
                found: 15,
                ..
            })
        ));
    }

    #[test]
    fn test_saturation_rejected() {
        let err = HyperLogLogDecoder::new(16).unwrap().decode(&[32; 16]).unwrap_err();
        assert!(matches!(err, Error::Integrity(IntegrityError::Saturated { .. })));
    }

    #[test]
    fn test_error_bounds() {
        let registers: Vec<u64> = (0..256).map(|i| (i % 5) as u64 + 1).collect();
        let est = HyperLogLogDecoder::new(256).unwrap().decode(&registers).unwrap();
        let bounds = est.error_bounds(0.95);
        assert!(bounds.lower < est.value && est.value < bounds.upper);
        assert!(close(est.relative_error(), 0.065, 1e-9));
    }
}
