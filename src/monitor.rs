//! Control-plane monitor tying the schema, the decoders and the rotation
//! controller to one device
//!
//! # Example
//!
//! ```
//! use core::net::Ipv4Addr;
//! use flowsketch::device::MemoryDevice;
//! use flowsketch::flow::FlowKey;
//! use flowsketch::generation::Window;
//! use flowsketch::monitor::SketchMonitor;
//! use flowsketch::schema::SketchSchema;
//!
//! let schema = SketchSchema::default();
//! let device = MemoryDevice::from_schema(&schema);
//! let mut monitor = SketchMonitor::new(device, schema).unwrap();
//! monitor.install_hashes().unwrap();
//! monitor.setup().unwrap();
//!
//! let key = FlowKey::tcp(Ipv4Addr::new(10, 0, 1, 1), Ipv4Addr::new(10, 0, 2, 2), 1234, 80);
//! for _ in 0..3 {
//!     monitor.device_mut().ingest(&key).unwrap();
//! }
//!
//! assert_eq!(monitor.frequency(&key, Window::Active).unwrap().value, 3);
//! assert!(monitor.cardinality(Window::Active).unwrap().value.value > 0.0);
//! ```
//!
//! # Read tearing
//!
//! Register reads are not atomic with respect to rotation. A query for
//! [`Window::Active`] that races a rotation on another controller may read a
//! generation that has just been cleared. Coordinate rotations and queries
//! on one [`SketchMonitor`], or query [`Window::Retired`] for a stable view.

use alloc::vec::Vec;
use tracing::{debug, warn};

use crate::cardinality::{fixed_point, CardinalityEstimate, HyperLogLogDecoder};
use crate::error::{ConfigError, Result};
use crate::flow::FlowKey;
use crate::frequency::{CountMinDecoder, CountMinMatrix};
use crate::generation::{Generation, GenerationHealth, Window};
use crate::hash::HashFamily;
use crate::rotation::{PendingReset, Rotation, RotationPolicy, WindowRotationController};
use crate::schema::{install_hash_units, verify_hash_units, SketchSchema};
use crate::traits::RegisterAccess;

/// Whether an estimate came from a fully reset generation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Confidence {
    /// Normal sketch guarantees hold
    Nominal,
    /// The generation was left half-reset by a failed rotation
    Suspect,
}

/// A decoded value with the generation it was read from
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Estimate<T> {
    /// Decoded value
    pub value: T,
    /// Generation the registers were read from
    pub generation: Generation,
    /// Trust in `value`
    pub confidence: Confidence,
}

impl<T> Estimate<T> {
    /// Whether the normal sketch guarantees hold
    pub fn is_nominal(&self) -> bool {
        self.confidence == Confidence::Nominal
    }
}

/// Data-plane readout registers next to the controller's own decode
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataPlaneReport {
    /// Packets counted by the ground-truth counter
    pub packets: u64,
    /// Controller decode of the active HLL registers
    pub controller: Estimate<CardinalityEstimate>,
    /// HLL estimate finished from the data plane's fixed-point register,
    /// `None` before the first packet
    pub dataplane_cardinality: Option<f64>,
    /// Count-Min estimate of the last packet's flow
    pub dataplane_countmin: u64,
}

/// Sketch monitor over a device `D`
pub struct SketchMonitor<D> {
    device: D,
    schema: SketchSchema,
    family: HashFamily,
    hll: HyperLogLogDecoder,
    countmin: CountMinDecoder,
    controller: WindowRotationController,
}

impl<D: RegisterAccess> SketchMonitor<D> {
    /// Validate `schema` and bind it to `device`
    ///
    /// Does not touch the device; call [`install_hashes`](Self::install_hashes)
    /// or [`verify_hashes`](Self::verify_hashes), then [`setup`](Self::setup).
    pub fn new(device: D, schema: SketchSchema) -> Result<Self> {
        schema.validate()?;
        let family = schema.hash_family()?;
        let hll = schema.hll_decoder()?;
        let countmin = schema.countmin_decoder()?;
        let controller = WindowRotationController::from_schema(&schema);

        debug!(
            fingerprint = schema.fingerprint(),
            hashes = family.len(),
            "sketch monitor created"
        );
        Ok(Self {
            device,
            schema,
            family,
            hll,
            countmin,
            controller,
        })
    }

    /// Choose the rotation policy
    pub fn with_policy(mut self, policy: RotationPolicy) -> Self {
        self.controller = self.controller.with_policy(policy);
        self
    }

    /// Fail unless the local schema has fingerprint `expected`
    pub fn expect_fingerprint(&self, expected: u64) -> Result<()> {
        let found = self.schema.fingerprint();
        if found != expected {
            return Err(ConfigError::FingerprintMismatch { expected, found }.into());
        }
        Ok(())
    }

    /// Schema in use
    pub fn schema(&self) -> &SketchSchema {
        &self.schema
    }

    /// Hash family derived from the schema
    pub fn hash_family(&self) -> &HashFamily {
        &self.family
    }

    /// Program the device's hashing units
    pub fn install_hashes(&mut self) -> Result<()> {
        install_hash_units(&self.family, &mut self.device)
    }

    /// Check the device's hashing units against the schema
    pub fn verify_hashes(&mut self) -> Result<()> {
        verify_hash_units(&self.family, &mut self.device)
    }

    /// Zero all sketch registers and make generation 0 active
    pub fn setup(&mut self) -> Result<()> {
        self.controller.setup(&mut self.device)
    }

    /// Rotate the window
    pub fn rotate(&mut self) -> Result<Rotation> {
        self.controller.rotate(&mut self.device)
    }

    /// Complete a reset left pending by a failed rotation
    pub fn resume(&mut self) -> Result<Option<Generation>> {
        self.controller.resume(&mut self.device)
    }

    /// Reset left pending by a failed rotation
    pub fn pending(&self) -> Option<&PendingReset> {
        self.controller.pending()
    }

    /// Generation currently receiving writes
    pub fn current_generation(&mut self) -> Result<Generation> {
        self.controller.current_generation(&mut self.device)
    }

    /// Cardinality of distinct sources seen in `window`
    pub fn cardinality(&mut self, window: Window) -> Result<Estimate<CardinalityEstimate>> {
        let generation = window.resolve(self.current_generation()?);
        let value = self.read_hll(generation)?;
        Ok(self.estimate(value, generation))
    }

    /// Upper bound on the packets of `key` in `window`
    pub fn frequency(&mut self, key: &FlowKey, window: Window) -> Result<Estimate<u64>> {
        let generation = window.resolve(self.current_generation()?);
        let matrix = self.read_countmin(generation)?;
        let slots: Vec<_> = self.schema.layout.countmin_slots(generation).collect();
        let value = self.countmin.decode(&self.family, &slots, &matrix, key)?;
        Ok(self.estimate(value, generation))
    }

    /// Read and decode one generation's HLL registers
    pub fn read_hll(&mut self, generation: Generation) -> Result<CardinalityEstimate> {
        let name = self.schema.registers.hyperloglog(generation);
        let registers = self.device.register_read(name)?;
        self.hll.decode_named(name, &registers)
    }

    /// Read one generation's Count-Min rows
    pub fn read_countmin(&mut self, generation: Generation) -> Result<CountMinMatrix> {
        let rows = self
            .schema
            .registers
            .countmin(generation)
            .iter()
            .map(|name| self.device.register_read(name))
            .collect::<core::result::Result<Vec<_>, _>>()?;
        CountMinMatrix::from_rows(rows)
    }

    /// Packets seen since the last counter reset
    pub fn packet_count(&mut self) -> Result<u64> {
        let counter = &self.schema.registers.packet_counter;
        Ok(self.device.counter_read(counter, 0)?.packets)
    }

    /// Zero the packet counter
    pub fn reset_packet_count(&mut self) -> Result<()> {
        self.device.counter_reset(&self.schema.registers.packet_counter)?;
        Ok(())
    }

    /// Compare the data plane's own estimates with a controller decode of
    /// the active generation
    pub fn dataplane_report(&mut self) -> Result<DataPlaneReport> {
        let names = &self.schema.registers;
        let m = self.schema.layout.hll_size();

        let raw = self.device.register_read_at(&names.hyperloglog_estimate, 0)?;
        let applied = self.device.register_read_at(&names.small_range_applied, 0)? != 0;
        let dataplane_countmin = self.device.register_read_at(&names.countmin_estimate, 0)?;

        let dataplane_cardinality = if raw == 0 && !applied {
            None
        } else {
            Some(fixed_point::decode_estimate(raw, applied, m)?)
        };

        let packets = self.packet_count()?;
        let controller = self.cardinality(Window::Active)?;
        Ok(DataPlaneReport {
            packets,
            controller,
            dataplane_cardinality,
            dataplane_countmin,
        })
    }

    /// The underlying device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The underlying device, mutably
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Release the device
    pub fn into_inner(self) -> D {
        self.device
    }

    fn estimate<T>(&self, value: T, generation: Generation) -> Estimate<T> {
        let confidence = match self.controller.health(generation) {
            GenerationHealth::Clean => Confidence::Nominal,
            GenerationHealth::Suspect => {
                warn!(
                    generation = generation.index(),
                    "estimate read from a partially reset generation"
                );
                Confidence::Suspect
            }
        };
        Estimate {
            value,
            generation,
            confidence,
        }
    }
}

impl<D: core::fmt::Debug> core::fmt::Debug for SketchMonitor<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SketchMonitor")
            .field("device", &self.device)
            .field("fingerprint", &self.schema.fingerprint())
            .field("controller", &self.controller)
            .finish()
    }
}
