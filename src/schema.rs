//! Shared, versioned description of the sketch deployment
//!
//! The rotation controller, the estimators and the device programming step
//! all derive their hash parameters, register shapes and register names from
//! one [`SketchSchema`]. Independent components compare
//! [`fingerprint`](SketchSchema::fingerprint)s instead of trusting that they
//! were configured alike, and [`verify_hash_units`] checks the device's
//! hashing units against the local family at startup.

use alloc::string::String;
use alloc::vec::Vec;
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

use crate::cardinality::HyperLogLogDecoder;
use crate::error::{ConfigError, Result};
use crate::flow::KeyLayout;
use crate::frequency::CountMinDecoder;
use crate::hash::{sort_units, HashFamily, DEFAULT_POLYNOMIALS};
use crate::layout::{RegisterNames, SketchLayout};
use crate::traits::RegisterAccess;

/// Current schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Everything the control plane and the data plane must agree on
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SketchSchema {
    /// Schema format version
    pub version: u32,
    /// CRC-32 polynomials in hash-slot order
    pub polynomials: Vec<u32>,
    /// Register counts and widths
    pub layout: SketchLayout,
    /// Byte layout of Count-Min keys
    #[cfg_attr(feature = "serde", serde(default))]
    pub key_layout: KeyLayout,
    /// Device register names
    pub registers: RegisterNames,
}

impl SketchSchema {
    /// Schema for `layout` with the default polynomials and register names
    pub fn new(layout: SketchLayout) -> Self {
        Self {
            version: SCHEMA_VERSION,
            polynomials: DEFAULT_POLYNOMIALS.to_vec(),
            layout,
            key_layout: KeyLayout::default(),
            registers: RegisterNames::for_layout(&layout),
        }
    }

    /// Replace the polynomial list
    pub fn with_polynomials(mut self, polynomials: impl Into<Vec<u32>>) -> Self {
        self.polynomials = polynomials.into();
        self
    }

    /// Replace the Count-Min key layout
    pub fn with_key_layout(mut self, key_layout: KeyLayout) -> Self {
        self.key_layout = key_layout;
        self
    }

    /// Replace the register names
    pub fn with_register_names(mut self, registers: RegisterNames) -> Self {
        self.registers = registers;
        self
    }

    /// Check version, register names and hash family
    pub fn validate(&self) -> Result<()> {
        if self.version != SCHEMA_VERSION {
            return Err(ConfigError::SchemaVersion {
                expected: SCHEMA_VERSION,
                found: self.version,
            }
            .into());
        }
        // a deserialized layout bypassed the constructor checks
        let (rows, width) = self.layout.countmin_shape();
        SketchLayout::new(self.layout.hll_size(), rows, width)?.with_register_bits(
            self.layout.hll_register_bits(),
            self.layout.countmin_counter_bits(),
        )?;
        self.registers.validate(&self.layout)?;
        self.hash_family().map(|_| ())
    }

    /// Build the `2 + 2k` hash functions
    pub fn hash_family(&self) -> Result<HashFamily> {
        HashFamily::new(&self.polynomials, self.layout.hash_count())
    }

    /// HLL decoder bounded by the device register width
    pub fn hll_decoder(&self) -> Result<HyperLogLogDecoder> {
        Ok(HyperLogLogDecoder::new(self.layout.hll_size())?.with_max_rho(self.layout.max_rho()))
    }

    /// Count-Min decoder bounded by the device counter width
    pub fn countmin_decoder(&self) -> Result<CountMinDecoder> {
        let (rows, width) = self.layout.countmin_shape();
        Ok(CountMinDecoder::new(rows, width, self.key_layout)?
            .with_max_counter(self.layout.max_counter()))
    }

    /// 64-bit digest of every field that affects hashing or register layout
    pub fn fingerprint(&self) -> u64 {
        xxh3_64(&self.canonical_bytes())
    }

    fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        let (rows, width) = self.layout.countmin_shape();

        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&(self.polynomials.len() as u32).to_le_bytes());
        for poly in &self.polynomials {
            out.extend_from_slice(&poly.to_le_bytes());
        }
        for dim in [self.layout.hll_size(), rows, width] {
            out.extend_from_slice(&(dim as u64).to_le_bytes());
        }
        out.push(self.layout.hll_register_bits());
        out.push(self.layout.countmin_counter_bits());
        out.push(self.key_layout.tag());

        let names = &self.registers;
        let all = names
            .hyperloglog
            .iter()
            .chain(names.countmin.iter().flatten())
            .chain([&names.generation_flag, &names.packet_counter])
            .chain(names.readout_registers());
        for name in all {
            out.extend_from_slice(&(name.len() as u32).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
        }
        out
    }
}

impl Default for SketchSchema {
    fn default() -> Self {
        Self::new(SketchLayout::default())
    }
}

/// Remote hashing units in slot order
pub fn ordered_hash_units<D: RegisterAccess + ?Sized>(device: &mut D) -> Result<Vec<String>> {
    let mut units = device.hash_units()?;
    sort_units(&mut units);
    Ok(units)
}

/// Program the device's hashing units from `family`
///
/// The device must expose exactly `family.len()` units; unit `i` in
/// [`unit_order`](crate::hash::unit_order) receives slot `i`'s parameters.
pub fn install_hash_units<D: RegisterAccess + ?Sized>(
    family: &HashFamily,
    device: &mut D,
) -> Result<()> {
    let units = ordered_hash_units(device)?;
    check_unit_count(family, &units)?;

    for (unit, function) in units.iter().zip(family.iter()) {
        debug!(
            unit = unit.as_str(),
            slot = function.id(),
            polynomial = function.params().polynomial,
            "programming hash unit"
        );
        device.configure_hash_unit(unit, function.params())?;
    }
    info!(units = units.len(), "hash units programmed");
    Ok(())
}

/// Check the device's hashing units against `family`
///
/// Always checks the unit count; parameters are compared for every unit the
/// transport can read back.
pub fn verify_hash_units<D: RegisterAccess + ?Sized>(
    family: &HashFamily,
    device: &mut D,
) -> Result<()> {
    let units = ordered_hash_units(device)?;
    check_unit_count(family, &units)?;

    let mut compared = 0usize;
    for (unit, function) in units.iter().zip(family.iter()) {
        match device.read_hash_unit(unit)? {
            Some(params) if params == *function.params() => compared += 1,
            Some(_) => {
                return Err(ConfigError::HashUnitMismatch {
                    unit: unit.clone(),
                    slot: function.id(),
                }
                .into())
            }
            None => {}
        }
    }
    info!(units = units.len(), compared, "hash units verified");
    Ok(())
}

fn check_unit_count(family: &HashFamily, units: &[String]) -> Result<()> {
    if units.len() != family.len() {
        return Err(ConfigError::HashUnitCount {
            expected: family.len(),
            found: units.len(),
        }
        .into());
    }
    Ok(())
}
