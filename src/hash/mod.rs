//! Deterministic CRC-32 hash family
//!
//! The data plane and this crate must compute identical digests: the `i`-th
//! hash function here uses the `i`-th polynomial of an ordered list, and the
//! `i`-th remote hashing unit (in [`unit_order`]) is programmed with the same
//! polynomial. Reordering either side silently corrupts every register index.
//!
//! # Example
//!
//! ```
//! use flowsketch::hash::{HashFamily, DEFAULT_POLYNOMIALS};
//!
//! let family = HashFamily::new(&DEFAULT_POLYNOMIALS, 8).unwrap();
//! let digest = family.digest(0, b"123456789").unwrap();
//! assert_eq!(digest, 0xCBF4_3926);
//! ```

mod crc;

pub use crc::{Crc32Params, HashFunction, HashId};

use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::error::{ConfigError, Result};

/// Polynomials the remote hashing units are programmed with, in slot order
pub const DEFAULT_POLYNOMIALS: [u32; 10] = [
    0x04C1_1DB7,
    0xEDB8_8320,
    0xDB71_0641,
    0x8260_8EDB,
    0x741B_8CD7,
    0xEB31_D82E,
    0x0D66_3B05,
    0xBA0D_C66B,
    0x3258_3499,
    0x992C_1A4C,
];

/// Ordered family of CRC-32 hash functions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashFamily {
    functions: Vec<HashFunction>,
}

impl HashFamily {
    /// Build `count` reflected CRC-32 functions from the first `count`
    /// polynomials of `polynomials`
    ///
    /// Fails if the list is shorter than `count`, if `count` is zero, or if
    /// the list contains a duplicate polynomial.
    pub fn new(polynomials: &[u32], count: usize) -> Result<Self> {
        if count == 0 {
            return Err(ConfigError::EmptyHashFamily.into());
        }
        if polynomials.len() < count {
            return Err(ConfigError::NotEnoughPolynomials {
                required: count,
                available: polynomials.len(),
            }
            .into());
        }
        check_distinct(polynomials)?;

        let functions = polynomials[..count]
            .iter()
            .enumerate()
            .map(|(id, &poly)| HashFunction::new(id, Crc32Params::reflected(poly)))
            .collect();

        Ok(Self { functions })
    }

    /// Number of functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Always false for a constructed family
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Function in slot `id`
    pub fn get(&self, id: HashId) -> Result<&HashFunction> {
        self.functions.get(id).ok_or_else(|| {
            ConfigError::HashIdOutOfRange {
                id,
                count: self.functions.len(),
            }
            .into()
        })
    }

    /// Digest of `bytes` under the function in slot `id`
    pub fn digest(&self, id: HashId, bytes: &[u8]) -> Result<u32> {
        Ok(self.get(id)?.digest(bytes))
    }

    /// Iterate over the functions in slot order
    pub fn iter(&self) -> impl Iterator<Item = &HashFunction> {
        self.functions.iter()
    }
}

fn check_distinct(polynomials: &[u32]) -> Result<()> {
    let mut sorted: Vec<u32> = polynomials.to_vec();
    sorted.sort_unstable();
    match sorted.windows(2).find(|w| w[0] == w[1]) {
        Some(w) => Err(ConfigError::DuplicatePolynomial(w[0]).into()),
        None => Ok(()),
    }
}

/// Order in which remote hashing units are matched to hash slots
///
/// Identifiers are split into a prefix and a trailing decimal id. Prefixes
/// compare lexicographically, ids numerically, so `calc_9 < calc_10`.
/// Identifiers without a trailing id sort before numbered ones with the same
/// prefix.
pub fn unit_order(a: &str, b: &str) -> Ordering {
    let (pa, na) = split_numeric_suffix(a);
    let (pb, nb) = split_numeric_suffix(b);
    pa.cmp(pb).then(na.cmp(&nb)).then_with(|| a.cmp(b))
}

/// Sort remote hashing unit identifiers into slot order
pub fn sort_units<S: AsRef<str>>(units: &mut [S]) {
    units.sort_by(|a, b| unit_order(a.as_ref(), b.as_ref()));
}

fn split_numeric_suffix(s: &str) -> (&str, Option<u64>) {
    let digits = s.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return (s, None);
    }
    let (prefix, suffix) = s.split_at(s.len() - digits);
    match suffix.parse() {
        Ok(n) => (prefix, Some(n)),
        Err(_) => (s, None),
    }
}
