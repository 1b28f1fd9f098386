//! Count-Min matrix decoding
//!
//! The data plane increments, in each of `k` rows, the counter at column
//! `crc_r(key) mod w`. Reading back the minimum over those `k` cells gives an
//! upper bound on the key's packet count: every cell holds at least the
//! key's own increments, and collisions only ever add.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::{ConfigError, IntegrityError, Result};
use crate::flow::{FlowKey, KeyLayout};
use crate::hash::{HashFamily, HashId};

/// Snapshot of one generation's Count-Min counters, `k` rows of `w`
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CountMinMatrix {
    width: usize,
    rows: Vec<Vec<u64>>,
}

impl CountMinMatrix {
    /// All-zero `depth x width` matrix
    pub fn zeroed(depth: usize, width: usize) -> Self {
        Self {
            width,
            rows: vec![vec![0; width]; depth],
        }
    }

    /// Build from rows read off the device; all rows must have equal length
    pub fn from_rows(rows: Vec<Vec<u64>>) -> Result<Self> {
        let width = rows.first().map_or(0, Vec::len);
        if rows.is_empty() || width == 0 {
            return Err(ConfigError::InvalidShape {
                rows: rows.len(),
                width,
            }
            .into());
        }
        if let Some((row, found)) = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (i, r.len()))
            .find(|&(_, len)| len != width)
        {
            return Err(IntegrityError::LengthMismatch {
                register: alloc::format!("countmin row {}", row),
                expected: width,
                found,
            }
            .into());
        }
        Ok(Self { width, rows })
    }

    /// Number of rows `k`
    pub fn depth(&self) -> usize {
        self.rows.len()
    }

    /// Columns per row `w`
    pub fn width(&self) -> usize {
        self.width
    }

    /// Counter at `(row, col)`
    pub fn get(&self, row: usize, col: usize) -> Option<u64> {
        self.rows.get(row).and_then(|r| r.get(col)).copied()
    }

    /// Mutable counter at `(row, col)`
    pub fn get_mut(&mut self, row: usize, col: usize) -> Option<&mut u64> {
        self.rows.get_mut(row).and_then(|r| r.get_mut(col))
    }

    /// Row slices
    pub fn rows(&self) -> &[Vec<u64>] {
        &self.rows
    }

    /// Sum of one row: the number of increments the generation received
    pub fn row_total(&self, row: usize) -> u64 {
        self.rows
            .get(row)
            .map_or(0, |r| r.iter().fold(0u64, |acc, &c| acc.saturating_add(c)))
    }

    /// Check every counter against `max`
    pub fn check_bound(&self, max: u64) -> Result<()> {
        for (r, row) in self.rows.iter().enumerate() {
            if let Some((index, &value)) = row.iter().enumerate().find(|&(_, &v)| v > max) {
                return Err(IntegrityError::RegisterOutOfRange {
                    register: alloc::format!("countmin row {}", r),
                    index,
                    value,
                    max,
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Count-Min point-query decoder
///
/// # Example
///
/// ```
/// use std::net::Ipv4Addr;
/// use flowsketch::frequency::{CountMinDecoder, CountMinMatrix};
/// use flowsketch::flow::{FlowKey, KeyLayout};
/// use flowsketch::hash::{HashFamily, DEFAULT_POLYNOMIALS};
///
/// let family = HashFamily::new(&DEFAULT_POLYNOMIALS, 8).unwrap();
/// let decoder = CountMinDecoder::new(3, 28, KeyLayout::FiveTuple).unwrap();
/// let key = FlowKey::tcp(Ipv4Addr::new(10, 0, 1, 1), Ipv4Addr::new(10, 0, 2, 2), 1234, 80);
///
/// let mut matrix = CountMinMatrix::zeroed(3, 28);
/// let columns = decoder.column_indices(&family, &[0, 1, 2], &key).unwrap();
/// for (row, &col) in columns.iter().enumerate() {
///     *matrix.get_mut(row, col).unwrap() += 4;
/// }
///
/// assert_eq!(decoder.decode(&family, &[0, 1, 2], &matrix, &key).unwrap(), 4);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountMinDecoder {
    depth: usize,
    width: usize,
    key_layout: KeyLayout,
    max_counter: u64,
}

impl CountMinDecoder {
    /// Decoder for a `depth x width` matrix keyed with `key_layout`
    pub fn new(depth: usize, width: usize, key_layout: KeyLayout) -> Result<Self> {
        if depth == 0 || width == 0 {
            return Err(ConfigError::InvalidShape { rows: depth, width }.into());
        }
        Ok(Self {
            depth,
            width,
            key_layout,
            max_counter: u64::MAX,
        })
    }

    /// Reject counters above `max` as corrupt
    pub fn with_max_counter(mut self, max: u64) -> Self {
        self.max_counter = max;
        self
    }

    /// Number of rows `k`
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Columns per row `w`
    pub fn width(&self) -> usize {
        self.width
    }

    /// Byte layout keys are hashed in
    pub fn key_layout(&self) -> KeyLayout {
        self.key_layout
    }

    /// Column selected in each row for `key`
    pub fn column_indices(
        &self,
        family: &HashFamily,
        slots: &[HashId],
        key: &FlowKey,
    ) -> Result<Vec<usize>> {
        self.column_indices_bytes(family, slots, &self.key_layout.encode(key))
    }

    /// Column selected in each row for a pre-serialized key
    pub fn column_indices_bytes(
        &self,
        family: &HashFamily,
        slots: &[HashId],
        key: &[u8],
    ) -> Result<Vec<usize>> {
        if key.len() != self.key_layout.encoded_len() {
            return Err(ConfigError::KeyLength {
                expected: self.key_layout.encoded_len(),
                found: key.len(),
            }
            .into());
        }
        if slots.len() != self.depth {
            return Err(ConfigError::SlotCount {
                expected: self.depth,
                found: slots.len(),
            }
            .into());
        }

        slots
            .iter()
            .map(|&slot| Ok(family.digest(slot, key)? as usize % self.width))
            .collect()
    }

    /// Upper bound on the packet count of `key`
    pub fn decode(
        &self,
        family: &HashFamily,
        slots: &[HashId],
        matrix: &CountMinMatrix,
        key: &FlowKey,
    ) -> Result<u64> {
        self.decode_bytes(family, slots, matrix, &self.key_layout.encode(key))
    }

    /// Upper bound on the packet count of a pre-serialized key
    pub fn decode_bytes(
        &self,
        family: &HashFamily,
        slots: &[HashId],
        matrix: &CountMinMatrix,
        key: &[u8],
    ) -> Result<u64> {
        if matrix.depth() != self.depth || matrix.width() != self.width {
            return Err(IntegrityError::LengthMismatch {
                register: String::from("countmin"),
                expected: self.depth * self.width,
                found: matrix.depth() * matrix.width(),
            }
            .into());
        }
        matrix.check_bound(self.max_counter)?;

        let columns = self.column_indices_bytes(family, slots, key)?;
        Ok(columns
            .iter()
            .enumerate()
            .filter_map(|(row, &col)| matrix.get(row, col))
            .min()
            .unwrap_or(0))
    }
}
