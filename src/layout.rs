//! Register layout of the double-buffered sketches
//!
//! Each generation owns one HyperLogLog array of `m` registers and `k`
//! Count-Min rows of `w` counters. Every one of those `2 + 2k` arrays is fed
//! by its own hashing unit, so hash slots are assigned per generation:
//!
//! | Slots | Role |
//! |-------|------|
//! | `0..k` | Count-Min rows, generation 0 |
//! | `k..2k` | Count-Min rows, generation 1 |
//! | `2k` | HyperLogLog, generation 0 |
//! | `2k + 1` | HyperLogLog, generation 1 |

use alloc::collections::BTreeSet;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::ops::Range;

use crate::cardinality;
use crate::error::{ConfigError, Result};
use crate::generation::Generation;
use crate::hash::HashId;

/// Register counts and widths for both sketch generations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SketchLayout {
    hll_registers: usize,
    countmin_rows: usize,
    countmin_width: usize,
    hll_register_bits: u8,
    countmin_counter_bits: u8,
}

impl SketchLayout {
    /// Default HLL register width on the device
    pub const DEFAULT_HLL_BITS: u8 = 6;
    /// Default Count-Min counter width on the device
    pub const DEFAULT_COUNTER_BITS: u8 = 32;

    /// Create a layout with `m` HLL registers and a `rows x width` Count-Min
    /// matrix per generation
    pub fn new(m: usize, rows: usize, width: usize) -> Result<Self> {
        cardinality::alpha(m)?;
        if rows == 0 || width == 0 {
            return Err(ConfigError::InvalidShape { rows, width }.into());
        }

        Ok(Self {
            hll_registers: m,
            countmin_rows: rows,
            countmin_width: width,
            hll_register_bits: Self::DEFAULT_HLL_BITS,
            countmin_counter_bits: Self::DEFAULT_COUNTER_BITS,
        })
    }

    /// Override the register widths (HLL 5..=8 bits, counters 1..=64 bits)
    pub fn with_register_bits(mut self, hll_bits: u8, counter_bits: u8) -> Result<Self> {
        if !(5..=8).contains(&hll_bits) {
            return Err(ConfigError::InvalidRegisterWidth {
                register: "hyperloglog",
                bits: hll_bits,
            }
            .into());
        }
        if !(1..=64).contains(&counter_bits) {
            return Err(ConfigError::InvalidRegisterWidth {
                register: "countmin",
                bits: counter_bits,
            }
            .into());
        }
        self.hll_register_bits = hll_bits;
        self.countmin_counter_bits = counter_bits;
        Ok(self)
    }

    /// Number of HLL registers `m`
    pub fn hll_size(&self) -> usize {
        self.hll_registers
    }

    /// Count-Min `(rows, width)`
    pub fn countmin_shape(&self) -> (usize, usize) {
        (self.countmin_rows, self.countmin_width)
    }

    /// HLL register width in bits
    pub fn hll_register_bits(&self) -> u8 {
        self.hll_register_bits
    }

    /// Count-Min counter width in bits
    pub fn countmin_counter_bits(&self) -> u8 {
        self.countmin_counter_bits
    }

    /// Largest legal HLL register value
    pub fn max_rho(&self) -> u64 {
        let storable = (1u64 << self.hll_register_bits) - 1;
        storable.min(cardinality::MAX_RHO as u64)
    }

    /// Largest legal Count-Min counter value
    pub fn max_counter(&self) -> u64 {
        match self.countmin_counter_bits {
            64 => u64::MAX,
            bits => (1u64 << bits) - 1,
        }
    }

    /// Total hash functions `N = 2 + 2k`
    pub fn hash_count(&self) -> usize {
        2 + 2 * self.countmin_rows
    }

    /// Hash slot feeding `role`
    pub fn hash_slot_for(&self, role: HashRole) -> Result<HashId> {
        let k = self.countmin_rows;
        match role {
            HashRole::Cardinality(g) => Ok(2 * k + g.index()),
            HashRole::CountMinRow { generation, row } if row < k => {
                Ok(generation.index() * k + row)
            }
            HashRole::CountMinRow { row, .. } => Err(ConfigError::HashIdOutOfRange {
                id: row,
                count: k,
            }
            .into()),
        }
    }

    /// Hash slots of one generation's Count-Min rows, in row order
    pub fn countmin_slots(&self, generation: Generation) -> Range<HashId> {
        let start = generation.index() * self.countmin_rows;
        start..start + self.countmin_rows
    }
}

impl Default for SketchLayout {
    fn default() -> Self {
        Self {
            hll_registers: 16,
            countmin_rows: 3,
            countmin_width: 28,
            hll_register_bits: Self::DEFAULT_HLL_BITS,
            countmin_counter_bits: Self::DEFAULT_COUNTER_BITS,
        }
    }
}

/// What a hash function is used for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashRole {
    /// HyperLogLog bucket/rho selection for one generation
    Cardinality(Generation),
    /// Column selection for one Count-Min row
    CountMinRow {
        /// Generation the row belongs to
        generation: Generation,
        /// Row index in `0..k`
        row: usize,
    },
}

/// Names of the device registers backing the sketches
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegisterNames {
    /// HLL array per generation
    pub hyperloglog: [String; 2],
    /// Count-Min rows per generation
    pub countmin: [Vec<String>; 2],
    /// Single-cell register holding the active generation
    pub generation_flag: String,
    /// Ground-truth packet counter
    pub packet_counter: String,
    /// Fixed-point HLL estimate computed in the data plane
    pub hyperloglog_estimate: String,
    /// Whether the data plane applied linear counting
    pub small_range_applied: String,
    /// Count-Min estimate computed in the data plane
    pub countmin_estimate: String,
    /// Optional single-cell alarm the data plane raises, cleared on setup
    #[cfg_attr(feature = "serde", serde(default))]
    pub alarm: Option<String>,
}

impl RegisterNames {
    /// Conventional names for `layout`: `hyperloglog_sketch{0,1}` and
    /// `countmin_sketch{0..2k}`, generation 0 rows first
    pub fn for_layout(layout: &SketchLayout) -> Self {
        let k = layout.countmin_rows;
        let rows = |g: usize| -> Vec<String> {
            (g * k..(g + 1) * k)
                .map(|i| format!("countmin_sketch{}", i))
                .collect()
        };

        Self {
            hyperloglog: [
                String::from("hyperloglog_sketch0"),
                String::from("hyperloglog_sketch1"),
            ],
            countmin: [rows(0), rows(1)],
            generation_flag: String::from("active_sketch"),
            packet_counter: String::from("packet_counter"),
            hyperloglog_estimate: String::from("hyperloglog_est"),
            small_range_applied: String::from("small_range_correction_applied"),
            countmin_estimate: String::from("countmin_est"),
            alarm: None,
        }
    }

    /// Check the names fit `layout` and are pairwise distinct
    pub fn validate(&self, layout: &SketchLayout) -> Result<()> {
        for rows in &self.countmin {
            if rows.len() != layout.countmin_rows {
                return Err(ConfigError::RegisterNameCount {
                    register: "countmin",
                    expected: layout.countmin_rows,
                    found: rows.len(),
                }
                .into());
            }
        }

        let mut seen = BTreeSet::new();
        let registers = self
            .hyperloglog
            .iter()
            .chain(self.countmin.iter().flatten())
            .chain([&self.generation_flag])
            .chain(self.readout_registers());
        for name in registers {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateRegisterName(name.clone()).into());
            }
        }
        Ok(())
    }

    /// Single-cell registers the data plane writes its own results into,
    /// including the alarm when one is named
    pub fn readout_registers(&self) -> impl Iterator<Item = &String> {
        [
            &self.hyperloglog_estimate,
            &self.small_range_applied,
            &self.countmin_estimate,
        ]
        .into_iter()
        .chain(self.alarm.as_ref())
    }

    /// HLL array of `generation`
    pub fn hyperloglog(&self, generation: Generation) -> &str {
        &self.hyperloglog[generation.index()]
    }

    /// Count-Min rows of `generation`
    pub fn countmin(&self, generation: Generation) -> &[String] {
        &self.countmin[generation.index()]
    }

    /// Every sketch register belonging to `generation`, HLL first
    pub fn generation_registers(&self, generation: Generation) -> impl Iterator<Item = &str> {
        core::iter::once(self.hyperloglog(generation))
            .chain(self.countmin(generation).iter().map(String::as_str))
    }
}
