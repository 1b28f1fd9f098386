//! Correctness and invariant tests for flowsketch
//!
//! These tests drive the public API end to end against the in-memory device:
//! hash programming, data-plane updates, decoding and window rotation. They
//! complement the unit tests in each module by focusing on properties that
//! must hold across components.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use flowsketch::cardinality::{fixed_point, HyperLogLogDecoder, Regime};
use flowsketch::device::MemoryDevice;
use flowsketch::error::{ConfigError, DeviceOp, Error, IntegrityError};
use flowsketch::flow::{FlowKey, KeyLayout};
use flowsketch::frequency::{CountMinDecoder, CountMinMatrix};
use flowsketch::generation::{Generation, Window};
use flowsketch::hash::{HashFamily, DEFAULT_POLYNOMIALS};
use flowsketch::layout::{HashRole, SketchLayout};
use flowsketch::monitor::{Confidence, SketchMonitor};
use flowsketch::rotation::RotationPolicy;
use flowsketch::schema::SketchSchema;
use flowsketch::traits::RegisterAccess;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn monitor_with(schema: SketchSchema) -> SketchMonitor<MemoryDevice> {
    let device = MemoryDevice::from_schema(&schema);
    let mut monitor = SketchMonitor::new(device, schema).unwrap();
    monitor.install_hashes().unwrap();
    monitor.verify_hashes().unwrap();
    monitor.setup().unwrap();
    monitor
}

fn monitor() -> SketchMonitor<MemoryDevice> {
    monitor_with(SketchSchema::default())
}

/// Distinct source per `i`, scattered over the address space
fn source(i: u32) -> FlowKey {
    FlowKey::tcp(
        Ipv4Addr::from(i.wrapping_mul(0x9E37_79B1)),
        Ipv4Addr::new(192, 168, 0, 1),
        40_000,
        443,
    )
}

fn close(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

// ============================================================================
// Hash Family
// ============================================================================

mod hashing {
    use super::*;

    #[test]
    fn standard_check_value() {
        let family = HashFamily::new(&DEFAULT_POLYNOMIALS, 1).unwrap();
        assert_eq!(family.digest(0, b"123456789").unwrap(), 0xCBF4_3926);
    }

    #[test]
    fn digests_are_deterministic_across_instances() {
        let a = HashFamily::new(&DEFAULT_POLYNOMIALS, 8).unwrap();
        let b = HashFamily::new(&DEFAULT_POLYNOMIALS, 8).unwrap();
        let bytes = source(77).to_bytes();
        for id in 0..8 {
            assert_eq!(a.digest(id, &bytes).unwrap(), b.digest(id, &bytes).unwrap());
        }
    }

    #[test]
    fn flow_key_columns_match_known_values() {
        let family = HashFamily::new(&DEFAULT_POLYNOMIALS, 8).unwrap();
        let key = FlowKey::tcp(Ipv4Addr::new(10, 0, 1, 1), Ipv4Addr::new(10, 0, 2, 2), 1234, 80);
        let columns: Vec<u32> = (0..3)
            .map(|id| family.digest(id, &key.to_bytes()).unwrap() % 28)
            .collect();
        assert_eq!(columns, vec![25, 13, 20]);
    }

    #[test]
    fn out_of_range_id_is_an_error() {
        let family = HashFamily::new(&DEFAULT_POLYNOMIALS, 8).unwrap();
        assert_eq!(
            family.digest(8, b"x").unwrap_err(),
            Error::Config(ConfigError::HashIdOutOfRange { id: 8, count: 8 })
        );
    }

    #[test]
    fn too_few_polynomials_for_layout() {
        let schema = SketchSchema::new(SketchLayout::new(16, 5, 28).unwrap());
        assert!(matches!(
            schema.hash_family(),
            Err(Error::Config(ConfigError::NotEnoughPolynomials {
                required: 12,
                available: 10
            }))
        ));
    }

    #[test]
    fn hash_units_verified_after_install() {
        init_tracing();
        let schema = SketchSchema::default();
        let mut device = MemoryDevice::from_schema(&schema);
        let family = schema.hash_family().unwrap();

        // unprogrammed units cannot be read back
        assert!(flowsketch::schema::verify_hash_units(&family, &mut device).is_err());
        flowsketch::schema::install_hash_units(&family, &mut device).unwrap();
        flowsketch::schema::verify_hash_units(&family, &mut device).unwrap();
    }
}

// ============================================================================
// HyperLogLog Decoding
// ============================================================================

mod hyperloglog {
    use super::*;

    #[test]
    fn all_ones_is_small_range_raw_estimate() {
        let estimate = HyperLogLogDecoder::new(16).unwrap().decode(&[1; 16]).unwrap();
        assert_eq!(estimate.regime, Regime::SmallRange);
        assert_eq!(estimate.zero_registers, 0);
        assert!(close(estimate.value, 21.536, 1e-9));
    }

    #[test]
    fn half_empty_uses_linear_counting() {
        let mut registers = [0u64; 16];
        registers[8..].fill(1);
        let estimate = HyperLogLogDecoder::new(16).unwrap().decode(&registers).unwrap();
        assert!(estimate.used_linear_counting());
        assert!(close(estimate.value, 16.0 * std::f64::consts::LN_2, 1e-9));
    }

    #[test]
    fn all_zero_is_zero() {
        for m in [16, 32, 64, 128, 1024] {
            let decoder = HyperLogLogDecoder::new(m).unwrap();
            assert_eq!(decoder.decode(&vec![0; m]).unwrap().value, 0.0);
        }
    }

    #[test]
    fn large_range_correction() {
        let estimate = HyperLogLogDecoder::new(16).unwrap().decode(&[24; 16]).unwrap();
        assert_eq!(estimate.regime, Regime::LargeRange);
        assert!(close(estimate.raw, 180_657_061.888, 1e-3));
        assert!(estimate.value > estimate.raw);
    }

    #[test]
    fn register_above_bound_is_rejected() {
        let decoder = HyperLogLogDecoder::new(16).unwrap();
        let mut registers = [1u64; 16];
        registers[5] = 33;
        assert!(matches!(
            decoder.decode(&registers),
            Err(Error::Integrity(IntegrityError::RegisterOutOfRange { index: 5, value: 33, .. }))
        ));
    }

    #[test]
    fn unsupported_register_count() {
        assert_eq!(
            HyperLogLogDecoder::new(100).unwrap_err(),
            Error::Config(ConfigError::UnsupportedRegisterCount(100))
        );
    }

    #[test]
    fn estimate_tracks_distinct_sources() {
        let schema = SketchSchema::new(SketchLayout::new(256, 3, 28).unwrap());
        let mut monitor = monitor_with(schema);
        for i in 0..5_000 {
            monitor.device_mut().ingest(&source(i)).unwrap();
            // repeats must not move the estimate
            monitor.device_mut().ingest(&source(i)).unwrap();
        }

        let estimate = monitor.cardinality(Window::Active).unwrap().value;
        let error = (estimate.value - 5_000.0).abs() / 5_000.0;
        assert!(
            error < 4.0 * estimate.relative_error(),
            "estimate {} too far from 5000 (relative error {:.3})",
            estimate.value,
            error
        );
    }
}

// ============================================================================
// Count-Min Decoding
// ============================================================================

mod count_min {
    use super::*;

    #[test]
    fn minimum_over_hashed_cells() {
        let family = HashFamily::new(&DEFAULT_POLYNOMIALS, 8).unwrap();
        let key = FlowKey::tcp(Ipv4Addr::new(10, 0, 1, 1), Ipv4Addr::new(10, 0, 2, 2), 1234, 80);
        let mut matrix = CountMinMatrix::zeroed(3, 28);
        for (row, (col, value)) in [(25, 5), (13, 3), (20, 7)].into_iter().enumerate() {
            *matrix.get_mut(row, col).unwrap() = value;
        }

        let decoder = CountMinDecoder::new(3, 28, KeyLayout::FiveTuple).unwrap();
        assert_eq!(decoder.decode(&family, &[0, 1, 2], &matrix, &key).unwrap(), 3);
    }

    #[test]
    fn never_underestimates() {
        let mut monitor = monitor();
        let mut truth: HashMap<FlowKey, u64> = HashMap::new();
        for i in 0..200u32 {
            let key = source(i % 40);
            monitor.device_mut().ingest(&key).unwrap();
            *truth.entry(key).or_default() += 1;
        }

        for (key, count) in &truth {
            let estimate = monitor.frequency(key, Window::Active).unwrap().value;
            assert!(estimate >= *count, "{:?}: {} < {}", key, estimate, count);
        }

        let matrix = monitor.read_countmin(Generation::Zero).unwrap();
        for row in 0..matrix.depth() {
            assert_eq!(matrix.row_total(row), 200);
        }
    }

    #[test]
    fn destination_keyed_sketch() {
        let schema = SketchSchema::default().with_key_layout(KeyLayout::DestinationAddress);
        let mut monitor = monitor_with(schema);
        let a = FlowKey::tcp(Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(9, 9, 9, 9), 1, 2);
        let b = FlowKey::tcp(Ipv4Addr::new(2, 2, 2, 2), Ipv4Addr::new(9, 9, 9, 9), 3, 4);
        monitor.device_mut().ingest(&a).unwrap();
        monitor.device_mut().ingest(&b).unwrap();

        // both flows share a destination, so they share every cell
        assert_eq!(monitor.frequency(&a, Window::Active).unwrap().value, 2);
    }

    #[test]
    fn counter_above_device_width_is_rejected() {
        let family = HashFamily::new(&DEFAULT_POLYNOMIALS, 8).unwrap();
        let decoder = CountMinDecoder::new(3, 28, KeyLayout::FiveTuple)
            .unwrap()
            .with_max_counter(u32::MAX as u64);
        let mut matrix = CountMinMatrix::zeroed(3, 28);
        *matrix.get_mut(1, 0).unwrap() = 1 << 40;
        assert!(decoder
            .decode(&family, &[0, 1, 2], &matrix, &source(1))
            .is_err());
    }
}

// ============================================================================
// Window Rotation
// ============================================================================

mod rotation {
    use super::*;

    #[test]
    fn retired_window_is_exact_snapshot() {
        init_tracing();
        let mut monitor = monitor();
        for i in 0..50 {
            monitor.device_mut().ingest(&source(i)).unwrap();
        }
        let hll = monitor.device().peek("hyperloglog_sketch0").unwrap().to_vec();
        let cm = monitor.read_countmin(Generation::Zero).unwrap();
        let before = monitor.cardinality(Window::Active).unwrap().value;

        monitor.rotate().unwrap();

        assert_eq!(monitor.device().peek("hyperloglog_sketch0").unwrap(), hll.as_slice());
        assert_eq!(monitor.read_countmin(Generation::Zero).unwrap(), cm);
        let after = monitor.cardinality(Window::Retired).unwrap();
        assert_eq!(after.generation, Generation::Zero);
        assert_eq!(after.value, before);

        let active = monitor.cardinality(Window::Active).unwrap();
        assert_eq!(active.generation, Generation::One);
        assert_eq!(active.value.value, 0.0);
        let fresh = monitor.read_countmin(Generation::One).unwrap();
        assert_eq!(fresh, CountMinMatrix::zeroed(3, 28));
    }

    #[test]
    fn windows_slide() {
        let mut monitor = monitor();
        let key = source(1);
        let mut expected_retired = None;
        for window in 1..=4u64 {
            for _ in 0..window {
                monitor.device_mut().ingest(&key).unwrap();
            }
            assert_eq!(monitor.frequency(&key, Window::Active).unwrap().value, window);
            if let Some(prev) = expected_retired {
                assert_eq!(monitor.frequency(&key, Window::Retired).unwrap().value, prev);
            }
            monitor.rotate().unwrap();
            expected_retired = Some(window);
        }
    }

    #[test]
    fn repeated_reset_is_harmless() {
        let schema = SketchSchema::default();
        let mut device = MemoryDevice::from_schema(&schema);
        for _ in 0..2 {
            for g in Generation::ALL {
                for name in schema.registers.generation_registers(g) {
                    device.register_reset(name).unwrap();
                }
            }
        }
        let names: Vec<&str> = schema.registers.generation_registers(Generation::One).collect();
        for name in names {
            assert!(device.peek(name).unwrap().iter().all(|&v| v == 0));
        }
    }

    #[test]
    fn failed_reset_is_reported_and_recoverable() {
        init_tracing();
        let mut monitor = monitor();
        monitor
            .device_mut()
            .fail_next(DeviceOp::Reset, "countmin_sketch5");

        assert!(matches!(monitor.rotate(), Err(Error::Device(_))));
        assert_eq!(monitor.current_generation().unwrap(), Generation::Zero);
        assert_eq!(
            monitor.cardinality(Window::Retired).unwrap().confidence,
            Confidence::Suspect
        );
        assert!(matches!(
            monitor.rotate(),
            Err(Error::RotationBlocked {
                generation: Generation::One,
                pending: 1
            })
        ));

        monitor.resume().unwrap();
        assert!(monitor.pending().is_none());
        assert_eq!(monitor.rotate().unwrap().active, Generation::One);
    }

    #[test]
    fn clear_retired_policy_discards_completed_window() {
        let mut monitor = monitor().with_policy(RotationPolicy::ClearRetired);
        monitor.device_mut().ingest(&source(3)).unwrap();
        monitor.rotate().unwrap();

        assert_eq!(monitor.frequency(&source(3), Window::Retired).unwrap().value, 0);
        assert_eq!(monitor.frequency(&source(3), Window::Active).unwrap().value, 0);
    }

    #[test]
    fn corrupt_flag_is_an_integrity_error() {
        let mut monitor = monitor();
        monitor.device_mut().register_write("active_sketch", 0, 7).unwrap();
        assert_eq!(
            monitor.rotate().unwrap_err(),
            Error::Integrity(IntegrityError::InvalidGenerationFlag(7))
        );
    }
}

// ============================================================================
// Data-Plane Readout
// ============================================================================

mod dataplane {
    use super::*;

    #[test]
    fn dataplane_estimate_matches_controller() {
        let mut monitor = monitor();
        for i in 0..2_000 {
            monitor.device_mut().ingest(&source(i)).unwrap();
        }
        let report = monitor.dataplane_report().unwrap();
        let controller = report.controller.value;
        let dataplane = report.dataplane_cardinality.unwrap();

        assert_eq!(report.packets, 2_000);
        assert!(
            close(dataplane, controller.value, 1e-6 * controller.value.max(1.0)),
            "data plane {} vs controller {}",
            dataplane,
            controller.value
        );
    }

    #[test]
    fn fixed_point_scale() {
        assert_eq!(fixed_point::fractional_bits(16).unwrap(), 29);
        assert_eq!(fixed_point::from_fixed(3 << 29, 16).unwrap(), 3.0);
        assert_eq!(
            fixed_point::decode_estimate(1, true, 48).unwrap_err(),
            Error::Config(ConfigError::UnsupportedRegisterCount(48))
        );
    }
}

// ============================================================================
// Schema
// ============================================================================

mod schema {
    use super::*;

    #[test]
    fn slot_assignment() {
        let layout = SketchLayout::default();
        assert_eq!(layout.hash_slot_for(HashRole::Cardinality(Generation::Zero)).unwrap(), 6);
        assert_eq!(layout.hash_slot_for(HashRole::Cardinality(Generation::One)).unwrap(), 7);
        assert_eq!(layout.countmin_slots(Generation::One), 3..6);
    }

    #[test]
    fn independent_components_agree_on_fingerprint() {
        let controller = SketchSchema::default();
        let programmer = SketchSchema::new(SketchLayout::new(16, 3, 28).unwrap());
        assert_eq!(controller.fingerprint(), programmer.fingerprint());

        let monitor = monitor();
        monitor.expect_fingerprint(programmer.fingerprint()).unwrap();
        let wider = SketchSchema::new(SketchLayout::new(16, 3, 64).unwrap());
        assert!(monitor.expect_fingerprint(wider.fingerprint()).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_round_trip_preserves_fingerprint() {
        let schema = SketchSchema::new(SketchLayout::new(64, 4, 100).unwrap())
            .with_key_layout(KeyLayout::DestinationAddress);
        let json = serde_json::to_string(&schema).unwrap();
        let back: SketchSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
        assert_eq!(back.fingerprint(), schema.fingerprint());
        back.validate().unwrap();
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialized_layout_is_revalidated() {
        let mut value = serde_json::to_value(SketchSchema::default()).unwrap();
        value["layout"]["hll_registers"] = serde_json::json!(48);
        let schema: SketchSchema = serde_json::from_value(value).unwrap();
        assert_eq!(
            schema.validate().unwrap_err(),
            Error::Config(ConfigError::UnsupportedRegisterCount(48))
        );
    }
}
