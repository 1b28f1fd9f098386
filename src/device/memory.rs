//! In-process register store with a simulated data plane

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use crate::cardinality::fixed_point;
use crate::error::{DeviceError, DeviceOp};
use crate::flow::{FlowKey, KeyLayout};
use crate::generation::Generation;
use crate::hash::{sort_units, Crc32Params, HashFunction};
use crate::layout::{HashRole, RegisterNames, SketchLayout};
use crate::schema::SketchSchema;
use crate::traits::{CounterValue, RegisterAccess};

/// One operation issued against a [`MemoryDevice`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    /// Kind of operation
    pub op: DeviceOp,
    /// Register, counter or unit targeted
    pub target: String,
    /// Whether it succeeded
    pub ok: bool,
}

#[derive(Clone, Debug)]
struct PlaneConfig {
    layout: SketchLayout,
    registers: RegisterNames,
    key_layout: KeyLayout,
}

/// Register/counter/hash-unit store implementing [`RegisterAccess`]
///
/// Allocated from a [`SketchSchema`]: both generations of every sketch
/// register, the generation flag, the data-plane readout registers, the
/// packet counter, and `2 + 2k` unprogrammed hashing units named
/// `calc_0..calc_N`. [`ingest`](Self::ingest) plays the data plane: it hashes
/// packets with whatever parameters were programmed into the units and
/// updates the generation named by the flag.
#[derive(Clone, Debug)]
pub struct MemoryDevice {
    registers: BTreeMap<String, Vec<u64>>,
    counters: BTreeMap<String, Vec<CounterValue>>,
    hash_units: BTreeMap<String, Option<Crc32Params>>,
    engines: Option<Vec<HashFunction>>,
    faults: Vec<(DeviceOp, String)>,
    ops: Vec<Operation>,
    plane: PlaneConfig,
}

impl MemoryDevice {
    /// Allocate every register `schema` names, zeroed
    pub fn from_schema(schema: &SketchSchema) -> Self {
        let layout = schema.layout;
        let names = &schema.registers;
        let (_, width) = layout.countmin_shape();

        let mut registers = BTreeMap::new();
        for g in Generation::ALL {
            registers.insert(
                names.hyperloglog(g).to_string(),
                vec![0; layout.hll_size()],
            );
            for row in names.countmin(g) {
                registers.insert(row.clone(), vec![0; width]);
            }
        }
        for single in [&names.generation_flag]
            .into_iter()
            .chain(names.readout_registers())
        {
            registers.insert(single.clone(), vec![0]);
        }

        let mut counters = BTreeMap::new();
        counters.insert(names.packet_counter.clone(), vec![CounterValue::default()]);

        let hash_units = (0..layout.hash_count())
            .map(|i| (alloc::format!("calc_{}", i), None))
            .collect();

        Self {
            registers,
            counters,
            hash_units,
            engines: None,
            faults: Vec::new(),
            ops: Vec::new(),
            plane: PlaneConfig {
                layout,
                registers: names.clone(),
                key_layout: schema.key_layout,
            },
        }
    }

    /// Make the next `op` against `target` fail
    pub fn fail_next(&mut self, op: DeviceOp, target: impl Into<String>) {
        self.faults.push((op, target.into()));
    }

    /// Operations issued so far, in order
    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    /// Forget the operation log
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Current contents of a register, without logging an operation
    pub fn peek(&self, name: &str) -> Option<&[u64]> {
        self.registers.get(name).map(Vec::as_slice)
    }

    /// Overwrite a whole register, without logging an operation
    ///
    /// Returns `false` if the register does not exist or `values` has the
    /// wrong length.
    pub fn poke(&mut self, name: &str, values: &[u64]) -> bool {
        match self.registers.get_mut(name) {
            Some(cells) if cells.len() == values.len() => {
                cells.copy_from_slice(values);
                true
            }
            _ => false,
        }
    }

    /// Process one packet of flow `key` the way the data plane does
    pub fn ingest(&mut self, key: &FlowKey) -> Result<(), DeviceError> {
        let flag = self.plane.registers.generation_flag.clone();
        let generation = match self.cell(&flag, 0)? {
            0 => Generation::Zero,
            1 => Generation::One,
            other => {
                return Err(DeviceError::new(
                    DeviceOp::Write,
                    flag,
                    alloc::format!("data plane found flag value {}", other),
                ))
            }
        };
        self.build_engines()?;

        let layout = self.plane.layout;
        let names = self.plane.registers.clone();
        let m = layout.hll_size();
        let p = m.trailing_zeros();
        let (_, width) = layout.countmin_shape();

        // HyperLogLog: top p bits pick the bucket, the rest give rho
        let hll_slot = layout
            .hash_slot_for(HashRole::Cardinality(generation))
            .map_err(|e| DeviceError::new(DeviceOp::HashUnit, "layout", e.to_string()))?;
        let digest = self.engine(hll_slot)?.digest(&key.source_bytes());
        let bucket = digest.checked_shr(32 - p).unwrap_or(0) as usize;
        let rest = digest.checked_shl(p).unwrap_or(0);
        let rho = (rest.leading_zeros() + 1).min(33 - p) as u64;
        let hll = self.cells_mut(names.hyperloglog(generation))?;
        if hll[bucket] < rho {
            hll[bucket] = rho;
        }

        // Count-Min
        let key_bytes = self.plane.key_layout.encode(key);
        let mut estimate = u64::MAX;
        for (row, cm_slot) in layout.countmin_slots(generation).enumerate() {
            let col = self.engine(cm_slot)?.digest(&key_bytes) as usize % width;
            let cells = self.cells_mut(&names.countmin(generation)[row])?;
            cells[col] = cells[col].saturating_add(1);
            estimate = estimate.min(cells[col]);
        }

        // Fixed-point HLL result, as the pipeline would compute it
        let hll = self.cells_mut(names.hyperloglog(generation))?.clone();
        let zeros = hll.iter().filter(|&&r| r == 0).count();
        let fixed_err = |e: crate::error::Error| {
            DeviceError::new(DeviceOp::Write, names.hyperloglog_estimate.as_str(), e.to_string())
        };
        let (raw, applied) = if zeros > 0 {
            let value = fixed_point::linear_counting_table(m)
                .map_err(fixed_err)?
                .get(zeros - 1)
                .copied()
                .unwrap_or(0);
            (value, 1)
        } else {
            let sum: f64 = hll.iter().map(|&r| crate::math::exp2(-(r as f64))).sum();
            (fixed_point::to_fixed(sum, m).map_err(fixed_err)?, 0)
        };
        self.cells_mut(&names.hyperloglog_estimate)?[0] = raw;
        self.cells_mut(&names.small_range_applied)?[0] = applied;
        self.cells_mut(&names.countmin_estimate)?[0] = estimate;

        let counter = self
            .counters
            .get_mut(&names.packet_counter)
            .and_then(|c| c.first_mut())
            .ok_or_else(|| {
                DeviceError::new(
                    DeviceOp::CounterRead,
                    names.packet_counter.as_str(),
                    "no such counter",
                )
            })?;
        counter.packets += 1;
        Ok(())
    }

    fn build_engines(&mut self) -> Result<(), DeviceError> {
        if self.engines.is_some() {
            return Ok(());
        }
        let mut units: Vec<&String> = self.hash_units.keys().collect();
        sort_units(&mut units);

        let mut engines = Vec::with_capacity(units.len());
        for (slot, unit) in units.into_iter().enumerate() {
            let params = self.hash_units[unit].ok_or_else(|| {
                DeviceError::new(DeviceOp::HashUnit, unit.as_str(), "not configured")
            })?;
            engines.push(HashFunction::new(slot, params));
        }
        self.engines = Some(engines);
        Ok(())
    }

    fn engine(&self, slot: usize) -> Result<&HashFunction, DeviceError> {
        self.engines
            .as_ref()
            .and_then(|e| e.get(slot))
            .ok_or_else(|| {
                DeviceError::new(DeviceOp::HashUnit, alloc::format!("slot {}", slot), "missing")
            })
    }

    fn cell(&self, name: &str, index: usize) -> Result<u64, DeviceError> {
        self.registers
            .get(name)
            .and_then(|c| c.get(index))
            .copied()
            .ok_or_else(|| DeviceError::new(DeviceOp::Read, name, "no such register cell"))
    }

    fn cells_mut(&mut self, name: &str) -> Result<&mut Vec<u64>, DeviceError> {
        self.registers
            .get_mut(name)
            .ok_or_else(|| DeviceError::new(DeviceOp::Write, name, "no such register"))
    }

    /// Log `op` on `target`, failing it if a fault was injected
    fn begin(&mut self, op: DeviceOp, target: &str) -> Result<(), DeviceError> {
        let fault = self
            .faults
            .iter()
            .position(|(o, t)| *o == op && t == target);
        let ok = fault.is_none();
        self.ops.push(Operation {
            op,
            target: target.to_string(),
            ok,
        });
        match fault {
            Some(i) => {
                self.faults.remove(i);
                Err(DeviceError::new(op, target, "injected fault"))
            }
            None => Ok(()),
        }
    }
}

impl RegisterAccess for MemoryDevice {
    fn register_read(&mut self, name: &str) -> Result<Vec<u64>, DeviceError> {
        self.begin(DeviceOp::Read, name)?;
        self.registers
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::new(DeviceOp::Read, name, "no such register"))
    }

    fn register_read_at(&mut self, name: &str, index: usize) -> Result<u64, DeviceError> {
        self.begin(DeviceOp::Read, name)?;
        self.cell(name, index)
    }

    fn register_write(&mut self, name: &str, index: usize, value: u64) -> Result<(), DeviceError> {
        self.begin(DeviceOp::Write, name)?;
        let cell = self
            .registers
            .get_mut(name)
            .and_then(|c| c.get_mut(index))
            .ok_or_else(|| DeviceError::new(DeviceOp::Write, name, "no such register cell"))?;
        *cell = value;
        Ok(())
    }

    fn register_reset(&mut self, name: &str) -> Result<(), DeviceError> {
        self.begin(DeviceOp::Reset, name)?;
        let cells = self
            .registers
            .get_mut(name)
            .ok_or_else(|| DeviceError::new(DeviceOp::Reset, name, "no such register"))?;
        cells.fill(0);
        Ok(())
    }

    fn counter_read(&mut self, name: &str, index: usize) -> Result<CounterValue, DeviceError> {
        self.begin(DeviceOp::CounterRead, name)?;
        self.counters
            .get(name)
            .and_then(|c| c.get(index))
            .copied()
            .ok_or_else(|| DeviceError::new(DeviceOp::CounterRead, name, "no such counter cell"))
    }

    fn counter_reset(&mut self, name: &str) -> Result<(), DeviceError> {
        self.begin(DeviceOp::CounterReset, name)?;
        let cells = self
            .counters
            .get_mut(name)
            .ok_or_else(|| DeviceError::new(DeviceOp::CounterReset, name, "no such counter"))?;
        cells.fill(CounterValue::default());
        Ok(())
    }

    fn hash_units(&mut self) -> Result<Vec<String>, DeviceError> {
        self.begin(DeviceOp::HashUnit, "*")?;
        Ok(self.hash_units.keys().cloned().collect())
    }

    fn configure_hash_unit(&mut self, unit: &str, params: &Crc32Params) -> Result<(), DeviceError> {
        self.begin(DeviceOp::HashUnit, unit)?;
        let slot = self
            .hash_units
            .get_mut(unit)
            .ok_or_else(|| DeviceError::new(DeviceOp::HashUnit, unit, "no such hash unit"))?;
        *slot = Some(*params);
        self.engines = None;
        Ok(())
    }

    fn read_hash_unit(&mut self, unit: &str) -> Result<Option<Crc32Params>, DeviceError> {
        self.begin(DeviceOp::HashUnit, unit)?;
        match self.hash_units.get(unit) {
            Some(Some(params)) => Ok(Some(*params)),
            Some(None) => Err(DeviceError::new(DeviceOp::HashUnit, unit, "not configured")),
            None => Err(DeviceError::new(DeviceOp::HashUnit, unit, "no such hash unit")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::install_hash_units;
    use core::net::Ipv4Addr;

    fn device() -> (SketchSchema, MemoryDevice) {
        let schema = SketchSchema::default();
        let mut device = MemoryDevice::from_schema(&schema);
        install_hash_units(&schema.hash_family().unwrap(), &mut device).unwrap();
        (schema, device)
    }

    fn key(src: u8) -> FlowKey {
        FlowKey::tcp(
            Ipv4Addr::new(10, 0, 1, src),
            Ipv4Addr::new(10, 0, 2, 2),
            1234,
            80,
        )
    }

    #[test]
    fn test_allocation() {
        let (schema, device) = device();
        assert_eq!(device.peek("hyperloglog_sketch1").unwrap().len(), 16);
        assert_eq!(device.peek("countmin_sketch5").unwrap().len(), 28);
        assert_eq!(device.peek(&schema.registers.generation_flag).unwrap(), &[0u64]);
        assert!(device.peek("countmin_sketch6").is_none());
    }

    #[test]
    fn test_ingest_updates_active_generation_only() {
        let (schema, mut device) = device();
        for _ in 0..5 {
            device.ingest(&key(1)).unwrap();
        }

        let names = &schema.registers;
        for row in names.countmin(Generation::Zero) {
            assert_eq!(device.peek(row).unwrap().iter().sum::<u64>(), 5);
        }
        for row in names.countmin(Generation::One) {
            assert_eq!(device.peek(row).unwrap().iter().sum::<u64>(), 0);
        }
        let hll0 = device.peek(names.hyperloglog(Generation::Zero)).unwrap();
        assert_eq!(hll0.iter().filter(|&&r| r > 0).count(), 1);
        let hll1 = device.peek(names.hyperloglog(Generation::One)).unwrap();
        assert!(hll1.iter().all(|&r| r == 0));
        assert_eq!(device.peek(&names.countmin_estimate).unwrap(), &[5u64]);
        assert_eq!(device.counter_read(&names.packet_counter, 0).unwrap().packets, 5);
    }

    #[test]
    fn test_ingest_requires_programmed_units() {
        let mut device = MemoryDevice::from_schema(&SketchSchema::default());
        let err = device.ingest(&key(1)).unwrap_err();
        assert_eq!(err.op, DeviceOp::HashUnit);
    }

    #[test]
    fn test_fault_injection_is_one_shot() {
        let (_, mut device) = device();
        device.fail_next(DeviceOp::Reset, "countmin_sketch2");

        assert!(device.register_reset("countmin_sketch1").is_ok());
        assert!(device.register_reset("countmin_sketch2").is_err());
        assert!(device.register_reset("countmin_sketch2").is_ok());

        let failed: Vec<&Operation> = device.ops().iter().filter(|o| !o.ok).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].target, "countmin_sketch2");
    }

    #[test]
    fn test_unknown_register() {
        let (_, mut device) = device();
        assert!(device.register_read("nope").is_err());
        assert!(device.register_write("active_sketch", 1, 1).is_err());
        assert!(!device.poke("hyperloglog_sketch0", &[1, 2, 3]));
    }
}
