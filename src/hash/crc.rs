//! Parameterized CRC-32
//!
//! Table-driven CRC-32 with the full Rocksoft parameter set (polynomial,
//! input/output reflection, initial value, final XOR). The polynomial is
//! given in normal (MSB-first) form, the way hashing units on the switch are
//! programmed, and the input reflection is applied per byte. The result is
//! bit-for-bit identical to the canonical bit-by-bit definition, which is kept
//! as [`HashFunction::digest_bitwise`] for cross-checking.

/// CRC-32 parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Crc32Params {
    /// Generator polynomial, normal form, implicit x^32 term
    pub polynomial: u32,
    /// Register value before the first byte
    pub init: u32,
    /// Value XORed into the register after the last byte
    pub xor_out: u32,
    /// Reflect each input byte
    pub reflect_in: bool,
    /// Reflect the final register
    pub reflect_out: bool,
}

impl Crc32Params {
    /// Reflected CRC-32 variant used by the remote hashing units:
    /// init and final XOR `0xFFFFFFFF`, reflected in and out
    pub const fn reflected(polynomial: u32) -> Self {
        Self {
            polynomial,
            init: 0xFFFF_FFFF,
            xor_out: 0xFFFF_FFFF,
            reflect_in: true,
            reflect_out: true,
        }
    }
}

/// Index of a hash function within a [`HashFamily`](super::HashFamily)
pub type HashId = usize;

/// One CRC-32 hash function
#[derive(Clone)]
pub struct HashFunction {
    id: HashId,
    params: Crc32Params,
    table: [u32; 256],
}

impl HashFunction {
    /// Build the function and its lookup table
    pub fn new(id: HashId, params: Crc32Params) -> Self {
        let mut table = [0u32; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let mut crc = (i as u32) << 24;
            for _ in 0..8 {
                crc = if crc & 0x8000_0000 != 0 {
                    (crc << 1) ^ params.polynomial
                } else {
                    crc << 1
                };
            }
            *slot = crc;
        }

        Self { id, params, table }
    }

    /// Slot this function occupies in its family
    pub fn id(&self) -> HashId {
        self.id
    }

    /// Configured parameters
    pub fn params(&self) -> &Crc32Params {
        &self.params
    }

    /// 32-bit digest of `bytes`
    pub fn digest(&self, bytes: &[u8]) -> u32 {
        let mut crc = self.params.init;
        for &byte in bytes {
            let byte = if self.params.reflect_in {
                byte.reverse_bits()
            } else {
                byte
            };
            let idx = ((crc >> 24) ^ byte as u32) & 0xFF;
            crc = (crc << 8) ^ self.table[idx as usize];
        }
        self.finish(crc)
    }

    /// Bit-by-bit reference implementation of [`digest`](Self::digest)
    pub fn digest_bitwise(&self, bytes: &[u8]) -> u32 {
        let mut crc = self.params.init;
        for &byte in bytes {
            let byte = if self.params.reflect_in {
                byte.reverse_bits()
            } else {
                byte
            };
            for bit in 0..8 {
                let mut top = crc & 0x8000_0000;
                if byte & (0x80 >> bit) != 0 {
                    top ^= 0x8000_0000;
                }
                crc <<= 1;
                if top != 0 {
                    crc ^= self.params.polynomial;
                }
            }
        }
        self.finish(crc)
    }

    #[inline]
    fn finish(&self, crc: u32) -> u32 {
        let crc = if self.params.reflect_out {
            crc.reverse_bits()
        } else {
            crc
        };
        crc ^ self.params.xor_out
    }
}

impl core::fmt::Debug for HashFunction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HashFunction")
            .field("id", &self.id)
            .field("params", &self.params)
            .finish()
    }
}

impl PartialEq for HashFunction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.params == other.params
    }
}

impl Eq for HashFunction {}
