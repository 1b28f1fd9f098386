//! Error types for sketch decoding and window rotation
//!
//! Failures fall into four kinds: configuration errors (fail fast, never
//! retried), data-integrity errors (register contents outside their
//! theoretical bounds), remote-operation failures (carried unchanged from the
//! register-access collaborator), and a blocked rotation while a half-reset
//! generation is outstanding.

use alloc::string::String;
use thiserror::Error;

use crate::generation::Generation;

/// Result type alias for flowsketch operations
pub type Result<T> = core::result::Result<T, Error>;

/// Main error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid or inconsistent configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Register contents violate their theoretical bounds
    #[error("data integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    /// The remote register transport failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A previous rotation left a generation partially reset
    #[error("rotation blocked: generation {generation} has {pending} register(s) awaiting reset")]
    RotationBlocked {
        /// Generation whose reset did not complete
        generation: Generation,
        /// Number of registers still to be reset
        pending: usize,
    },
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// HLL register count is not one of 16, 32, 64 or a power of two >= 128
    #[error(
        "unsupported HyperLogLog register count {0}: must be 16, 32, 64 or a power of two >= 128"
    )]
    UnsupportedRegisterCount(usize),

    /// Fewer polynomials than required hash functions
    #[error("need {required} polynomials, only {available} configured")]
    NotEnoughPolynomials {
        /// Hash functions required by the layout
        required: usize,
        /// Polynomials available
        available: usize,
    },

    /// Hash slot list does not give one slot per Count-Min row
    #[error("{found} hash slots given for {expected} Count-Min rows")]
    SlotCount {
        /// Rows in the matrix
        expected: usize,
        /// Slots supplied
        found: usize,
    },

    /// The same polynomial appears twice in the list
    #[error("polynomial {0:#010x} appears more than once")]
    DuplicatePolynomial(u32),

    /// A hash family must contain at least one function
    #[error("hash family must contain at least one function")]
    EmptyHashFamily,

    /// Hash id outside the configured family
    #[error("hash id {id} out of range for a family of {count}")]
    HashIdOutOfRange {
        /// Requested id
        id: usize,
        /// Family size
        count: usize,
    },

    /// Serialized flow key has the wrong length
    #[error("flow key must be {expected} bytes, got {found}")]
    KeyLength {
        /// Expected byte length
        expected: usize,
        /// Actual byte length
        found: usize,
    },

    /// Count-Min shape is degenerate
    #[error("invalid Count-Min shape {rows}x{width}")]
    InvalidShape {
        /// Row count
        rows: usize,
        /// Column count
        width: usize,
    },

    /// Register width outside the supported range
    #[error("invalid register width of {bits} bits for {register}")]
    InvalidRegisterWidth {
        /// Which register family
        register: &'static str,
        /// Requested width
        bits: u8,
    },

    /// Register name list does not match the layout
    #[error("expected {expected} register names for {register}, found {found}")]
    RegisterNameCount {
        /// Which register family
        register: &'static str,
        /// Names required by the layout
        expected: usize,
        /// Names provided
        found: usize,
    },

    /// The same register name is used twice
    #[error("register name {0:?} is used more than once")]
    DuplicateRegisterName(String),

    /// Schema written by an incompatible version
    #[error("unsupported schema version {found} (expected {expected})")]
    SchemaVersion {
        /// Supported version
        expected: u32,
        /// Version found
        found: u32,
    },

    /// Two components disagree on the shared schema
    #[error("schema fingerprint mismatch: expected {expected:#018x}, found {found:#018x}")]
    FingerprintMismatch {
        /// Fingerprint the caller expected
        expected: u64,
        /// Fingerprint of the local schema
        found: u64,
    },

    /// Remote device exposes a different number of hashing units
    #[error("device exposes {found} hash units, layout needs {expected}")]
    HashUnitCount {
        /// Units required by the layout
        expected: usize,
        /// Units reported by the device
        found: usize,
    },

    /// A remote hashing unit is configured differently from the local family
    #[error("hash unit {unit:?} disagrees with local hash slot {slot}")]
    HashUnitMismatch {
        /// Remote unit identifier
        unit: String,
        /// Local slot it was compared against
        slot: usize,
    },
}

/// Data integrity errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrityError {
    /// HLL rho or Count-Min counter above its bound
    #[error("register {register}[{index}] holds {value}, bound is {max}")]
    RegisterOutOfRange {
        /// Register name (or "hll"/"countmin" for detached snapshots)
        register: String,
        /// Offending index
        index: usize,
        /// Value read
        value: u64,
        /// Largest legal value
        max: u64,
    },

    /// Register array has the wrong number of cells
    #[error("register {register} has {found} cells, expected {expected}")]
    LengthMismatch {
        /// Register name
        register: String,
        /// Cells required by the layout
        expected: usize,
        /// Cells read
        found: usize,
    },

    /// Generation flag holds something other than 0 or 1
    #[error("generation flag holds {0}, expected 0 or 1")]
    InvalidGenerationFlag(u64),

    /// Raw estimate exhausted the 32-bit hash space
    #[error("raw estimate {raw} saturates the 32-bit hash space")]
    Saturated {
        /// Raw estimate
        raw: f64,
    },
}

/// Operation attempted against the remote device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceOp {
    /// `register_read`
    Read,
    /// `register_write`
    Write,
    /// `register_reset`
    Reset,
    /// `counter_read`
    CounterRead,
    /// `counter_reset`
    CounterReset,
    /// Hash unit listing, programming or read-back
    HashUnit,
}

impl core::fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            DeviceOp::Read => "register_read",
            DeviceOp::Write => "register_write",
            DeviceOp::Reset => "register_reset",
            DeviceOp::CounterRead => "counter_read",
            DeviceOp::CounterReset => "counter_reset",
            DeviceOp::HashUnit => "hash_unit",
        };
        f.write_str(name)
    }
}

/// Transport-level failure reported by a [`RegisterAccess`](crate::traits::RegisterAccess)
/// implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{op} on {target:?} failed: {message}")]
pub struct DeviceError {
    /// Operation that failed
    pub op: DeviceOp,
    /// Register, counter or hash unit it targeted
    pub target: String,
    /// Transport message
    pub message: String,
}

impl DeviceError {
    /// Create a new device error
    pub fn new(op: DeviceOp, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            op,
            target: target.into(),
            message: message.into(),
        }
    }
}
