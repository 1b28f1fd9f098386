//! Sliding-window rotation of the double-buffered sketches
//!
//! The data plane writes whichever generation the flag names. Rotating
//! flips the flag and clears one generation so that, at any time, readers
//! can reach the in-progress window and the window completed by the last
//! rotation, and nothing older.
//!
//! There is no lock on the device. The protocol relies on ordering alone:
//! only a generation the data plane is not writing is ever reset, and a
//! reset that fails part-way blocks further rotations until
//! [`WindowRotationController::resume`] completes it.

use alloc::string::String;
use alloc::vec::Vec;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::generation::{Generation, GenerationHealth, GenerationState};
use crate::layout::RegisterNames;
use crate::schema::SketchSchema;
use crate::traits::RegisterAccess;

/// Which generation a rotation clears, and when
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RotationPolicy {
    /// Clear the stale generation (two windows old), then flip the flag to
    /// it. The window that just ended stays readable as
    /// [`Window::Retired`](crate::generation::Window::Retired) until the next
    /// rotation, and the new active generation starts from zero.
    #[default]
    RetainRetired,
    /// Flip the flag, then clear the generation that was active until now.
    /// The retired window is discarded immediately; only the in-progress
    /// window is ever readable.
    ClearRetired,
}

/// Registers of one generation whose reset has not completed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingReset {
    /// Generation left half-reset
    pub generation: Generation,
    /// Registers still to reset, in issue order
    pub registers: Vec<String>,
}

/// Outcome of a successful rotation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rotation {
    /// Generation that stopped receiving writes
    pub retired: Generation,
    /// Generation now receiving writes
    pub active: Generation,
    /// Generation that was cleared
    pub cleared: Generation,
    /// Registers reset
    pub registers_reset: usize,
}

/// Owns the generation flag and drives rotations
#[derive(Clone, Debug)]
pub struct WindowRotationController {
    registers: RegisterNames,
    policy: RotationPolicy,
    pending: Option<PendingReset>,
    rotations: u64,
}

impl WindowRotationController {
    /// Controller for the registers in `registers`
    pub fn new(registers: RegisterNames) -> Self {
        Self {
            registers,
            policy: RotationPolicy::default(),
            pending: None,
            rotations: 0,
        }
    }

    /// Controller for the registers named by `schema`
    pub fn from_schema(schema: &SketchSchema) -> Self {
        Self::new(schema.registers.clone())
    }

    /// Choose the rotation policy
    pub fn with_policy(mut self, policy: RotationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Active rotation policy
    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Rotations completed since construction
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Reset left incomplete by a failed rotation, if any
    pub fn pending(&self) -> Option<&PendingReset> {
        self.pending.as_ref()
    }

    /// Whether `generation` can be trusted
    pub fn health(&self, generation: Generation) -> GenerationHealth {
        match &self.pending {
            Some(p) if p.generation == generation => GenerationHealth::Suspect,
            _ => GenerationHealth::Clean,
        }
    }

    /// Read the flag from the device
    pub fn current_generation<D: RegisterAccess + ?Sized>(
        &self,
        device: &mut D,
    ) -> Result<Generation> {
        GenerationState::new(&self.registers.generation_flag).current_generation(device)
    }

    /// Zero both generations and the data-plane readout registers, and make
    /// generation 0 active
    ///
    /// Safe to repeat; if it fails, call it again.
    pub fn setup<D: RegisterAccess + ?Sized>(&mut self, device: &mut D) -> Result<()> {
        self.pending = None;
        let mut count = 0;
        for g in [Generation::One, Generation::Zero] {
            count += self.reset_generation(device, g)?;
        }
        for name in self.registers.readout_registers() {
            device.register_reset(name)?;
        }
        device.register_write(&self.registers.generation_flag, 0, Generation::Zero.flag())?;

        info!(registers = count, "sketch registers reset, generation 0 active");
        Ok(())
    }

    /// Rotate to the other generation
    ///
    /// Refuses with [`Error::RotationBlocked`] while a previous reset is
    /// incomplete. A transport failure during the reset records the
    /// remaining registers as [pending](Self::pending), marks that
    /// generation [suspect](GenerationHealth::Suspect) and returns the
    /// device error unchanged.
    pub fn rotate<D: RegisterAccess + ?Sized>(&mut self, device: &mut D) -> Result<Rotation> {
        if let Some(pending) = &self.pending {
            return Err(Error::RotationBlocked {
                generation: pending.generation,
                pending: pending.registers.len(),
            });
        }

        let retired = self.current_generation(device)?;
        let active = retired.other();

        let (cleared, registers_reset) = match self.policy {
            RotationPolicy::RetainRetired => {
                // `active` is stale and idle until the flag names it
                let n = self.reset_generation(device, active)?;
                self.write_flag(device, active)?;
                self.rotations += 1;
                (active, n)
            }
            RotationPolicy::ClearRetired => {
                self.write_flag(device, active)?;
                self.rotations += 1;
                (retired, self.reset_generation(device, retired)?)
            }
        };

        info!(
            retired = retired.index(),
            active = active.index(),
            cleared = cleared.index(),
            registers = registers_reset,
            "rotated sketch window"
        );
        Ok(Rotation {
            retired,
            active,
            cleared,
            registers_reset,
        })
    }

    /// Finish a reset left incomplete by a failed rotation
    ///
    /// Returns the generation that was repaired, or `None` if nothing was
    /// pending.
    pub fn resume<D: RegisterAccess + ?Sized>(
        &mut self,
        device: &mut D,
    ) -> Result<Option<Generation>> {
        let Some(pending) = self.pending.take() else {
            return Ok(None);
        };
        let generation = pending.generation;
        let n = self.reset_registers(device, generation, pending.registers)?;

        info!(generation = generation.index(), registers = n, "pending reset completed");
        Ok(Some(generation))
    }

    fn write_flag<D: RegisterAccess + ?Sized>(
        &self,
        device: &mut D,
        generation: Generation,
    ) -> Result<()> {
        device.register_write(&self.registers.generation_flag, 0, generation.flag())?;
        debug!(active = generation.index(), "generation flag written");
        Ok(())
    }

    fn reset_generation<D: RegisterAccess + ?Sized>(
        &mut self,
        device: &mut D,
        generation: Generation,
    ) -> Result<usize> {
        let registers = self
            .registers
            .generation_registers(generation)
            .map(String::from)
            .collect();
        self.reset_registers(device, generation, registers)
    }

    fn reset_registers<D: RegisterAccess + ?Sized>(
        &mut self,
        device: &mut D,
        generation: Generation,
        registers: Vec<String>,
    ) -> Result<usize> {
        for (i, name) in registers.iter().enumerate() {
            if let Err(err) = device.register_reset(name) {
                let remaining = registers[i..].to_vec();
                warn!(
                    generation = generation.index(),
                    register = name.as_str(),
                    pending = remaining.len(),
                    error = %err,
                    "generation reset failed part-way"
                );
                self.pending = Some(PendingReset {
                    generation,
                    registers: remaining,
                });
                return Err(err.into());
            }
        }
        Ok(registers.len())
    }
}
