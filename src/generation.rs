//! Generations of the double-buffered sketch registers
//!
//! Two physical copies of every sketch register exist. The generation flag on
//! the device names the copy the data plane currently writes; the other copy
//! holds the window that ended at the last rotation.

use crate::error::{IntegrityError, Result};
use crate::traits::RegisterAccess;

/// One of the two physical register sets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Generation {
    /// Register set 0
    Zero,
    /// Register set 1
    One,
}

impl Generation {
    /// Both generations, in index order
    pub const ALL: [Generation; 2] = [Generation::Zero, Generation::One];

    /// Decode the value held by the generation flag
    pub fn from_flag(value: u64) -> Result<Self> {
        match value {
            0 => Ok(Generation::Zero),
            1 => Ok(Generation::One),
            other => Err(IntegrityError::InvalidGenerationFlag(other).into()),
        }
    }

    /// Value to store in the generation flag
    pub fn flag(self) -> u64 {
        self.index() as u64
    }

    /// 0 or 1
    pub fn index(self) -> usize {
        match self {
            Generation::Zero => 0,
            Generation::One => 1,
        }
    }

    /// The other generation
    pub fn other(self) -> Self {
        match self {
            Generation::Zero => Generation::One,
            Generation::One => Generation::Zero,
        }
    }
}

impl core::fmt::Display for Generation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Which window a reader wants, relative to the flag at read time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Window {
    /// The in-progress window (the generation being written)
    #[default]
    Active,
    /// The window completed by the most recent rotation
    Retired,
}

impl Window {
    /// Physical generation holding this window when `active` is being written
    pub fn resolve(self, active: Generation) -> Generation {
        match self {
            Window::Active => active,
            Window::Retired => active.other(),
        }
    }
}

/// Whether a generation's registers can be trusted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GenerationHealth {
    /// All resets issued against it completed
    Clean,
    /// A reset failed part-way; contents are a mix of old and zeroed cells
    Suspect,
}

/// Reads the generation flag from the device
///
/// Never caches: every call issues a register read, so a caller that spans a
/// rotation observes the new value.
#[derive(Clone, Copy, Debug)]
pub struct GenerationState<'a> {
    flag: &'a str,
}

impl<'a> GenerationState<'a> {
    /// Track the flag stored in register `flag`
    pub fn new(flag: &'a str) -> Self {
        Self { flag }
    }

    /// Generation currently receiving writes
    pub fn current_generation<D: RegisterAccess + ?Sized>(
        &self,
        device: &mut D,
    ) -> Result<Generation> {
        let value = device.register_read_at(self.flag, 0)?;
        Generation::from_flag(value)
    }

    /// Resolve `window` against the current flag
    pub fn resolve<D: RegisterAccess + ?Sized>(
        &self,
        device: &mut D,
        window: Window,
    ) -> Result<Generation> {
        Ok(window.resolve(self.current_generation(device)?))
    }
}
