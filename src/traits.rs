//! Core traits
//!
//! [`RegisterAccess`] is the seam between the sketch logic and whatever
//! transport reaches the device (a switch management RPC, an eBPF map, the
//! in-memory [`MemoryDevice`](crate::device::MemoryDevice)). Every call is
//! assumed atomic per register and nothing more.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{DeviceError, DeviceOp};
use crate::hash::Crc32Params;

/// Value of a packet/byte counter cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterValue {
    /// Packets counted
    pub packets: u64,
    /// Bytes counted
    pub bytes: u64,
}

/// Register, counter and hashing-unit primitives of the remote device
pub trait RegisterAccess {
    /// Read every cell of register array `name`
    fn register_read(&mut self, name: &str) -> Result<Vec<u64>, DeviceError>;

    /// Read one cell of register array `name`
    fn register_read_at(&mut self, name: &str, index: usize) -> Result<u64, DeviceError> {
        let cells = self.register_read(name)?;
        cells.get(index).copied().ok_or_else(|| {
            DeviceError::new(DeviceOp::Read, name, "index out of range")
        })
    }

    /// Set one cell of register array `name`
    fn register_write(&mut self, name: &str, index: usize, value: u64) -> Result<(), DeviceError>;

    /// Zero every cell of register array `name`
    fn register_reset(&mut self, name: &str) -> Result<(), DeviceError>;

    /// Read one cell of counter array `name`
    fn counter_read(&mut self, name: &str, index: usize) -> Result<CounterValue, DeviceError>;

    /// Zero every cell of counter array `name`
    fn counter_reset(&mut self, name: &str) -> Result<(), DeviceError>;

    /// Identifiers of the programmable hashing units, in any order
    fn hash_units(&mut self) -> Result<Vec<String>, DeviceError>;

    /// Program hashing unit `unit`
    fn configure_hash_unit(&mut self, unit: &str, params: &Crc32Params) -> Result<(), DeviceError>;

    /// Read back a unit's parameters, if the transport supports it
    fn read_hash_unit(&mut self, unit: &str) -> Result<Option<Crc32Params>, DeviceError> {
        let _ = unit;
        Ok(None)
    }
}

impl<D: RegisterAccess + ?Sized> RegisterAccess for &mut D {
    fn register_read(&mut self, name: &str) -> Result<Vec<u64>, DeviceError> {
        (**self).register_read(name)
    }

    fn register_read_at(&mut self, name: &str, index: usize) -> Result<u64, DeviceError> {
        (**self).register_read_at(name, index)
    }

    fn register_write(&mut self, name: &str, index: usize, value: u64) -> Result<(), DeviceError> {
        (**self).register_write(name, index, value)
    }

    fn register_reset(&mut self, name: &str) -> Result<(), DeviceError> {
        (**self).register_reset(name)
    }

    fn counter_read(&mut self, name: &str, index: usize) -> Result<CounterValue, DeviceError> {
        (**self).counter_read(name, index)
    }

    fn counter_reset(&mut self, name: &str) -> Result<(), DeviceError> {
        (**self).counter_reset(name)
    }

    fn hash_units(&mut self) -> Result<Vec<String>, DeviceError> {
        (**self).hash_units()
    }

    fn configure_hash_unit(&mut self, unit: &str, params: &Crc32Params) -> Result<(), DeviceError> {
        (**self).configure_hash_unit(unit, params)
    }

    fn read_hash_unit(&mut self, unit: &str) -> Result<Option<Crc32Params>, DeviceError> {
        (**self).read_hash_unit(unit)
    }
}

/// Error bounds for a sketch estimate
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorBounds {
    /// Lower bound of the estimate
    pub lower: f64,
    /// Point estimate
    pub estimate: f64,
    /// Upper bound of the estimate
    pub upper: f64,
    /// Confidence level (e.g., 0.95 for 95%)
    pub confidence: f64,
}

impl ErrorBounds {
    /// Create new error bounds
    pub fn new(lower: f64, estimate: f64, upper: f64, confidence: f64) -> Self {
        Self {
            lower,
            estimate,
            upper,
            confidence,
        }
    }

    /// Check if a value falls within bounds
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    /// Width of the confidence interval
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// z-score for a two-sided confidence level, coarse tiers
pub(crate) fn z_score(confidence: f64) -> f64 {
    match confidence {
        c if c >= 0.99 => 2.576,
        c if c >= 0.95 => 1.96,
        c if c >= 0.90 => 1.645,
        c if c >= 0.80 => 1.282,
        _ => 1.0,
    }
}
