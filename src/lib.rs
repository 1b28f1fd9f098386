//! # Flowsketch
//!
//! Control-plane decoding for sketches maintained in a programmable data plane.
//!
//! A switch pipeline keeps two generations of a HyperLogLog array (distinct
//! sources) and a Count-Min matrix (per-flow packet counts), fed by CRC-32
//! hashing units. Flowsketch programs those units, reads the registers back,
//! decodes them, and rotates the generations to give sliding-window results.
//!
//! ## Features
//!
//! - **Hashing**: configurable reflected CRC-32 family matching the device units
//! - **Cardinality Decoding**: HyperLogLog with small/mid/large range correction
//! - **Frequency Decoding**: Count-Min minimum over hashed counters
//! - **Window Rotation**: double-buffered generations with failure tracking
//! - **Shared Schema**: versioned, fingerprinted description of hashes and registers
//!
//! ## Quick Start
//!
//! ```rust
//! use flowsketch::prelude::*;
//! use core::net::Ipv4Addr;
//!
//! let schema = SketchSchema::default();
//! let mut monitor = SketchMonitor::new(MemoryDevice::from_schema(&schema), schema).unwrap();
//! monitor.install_hashes().unwrap();
//! monitor.setup().unwrap();
//!
//! let flow = FlowKey::tcp(Ipv4Addr::new(10, 0, 1, 1), Ipv4Addr::new(10, 0, 2, 2), 1234, 80);
//! monitor.device_mut().ingest(&flow).unwrap();
//!
//! let sources = monitor.cardinality(Window::Active).unwrap();
//! println!("Distinct sources: ~{:.1}", sources.value.value);
//!
//! monitor.rotate().unwrap();
//! assert_eq!(monitor.frequency(&flow, Window::Retired).unwrap().value, 1);
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): Standard library support; without it the crate is
//!   `no_std` + `alloc` and uses `libm` for floating point
//! - `serde`: Serialization of schemas, layouts and estimates

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

mod math;

pub mod cardinality;
pub mod device;
pub mod error;
pub mod flow;
pub mod frequency;
pub mod generation;
pub mod hash;
pub mod layout;
pub mod monitor;
pub mod rotation;
pub mod schema;
pub mod traits;

pub mod prelude {
    pub use crate::traits::*;

    pub use crate::cardinality::{CardinalityEstimate, HyperLogLogDecoder, Regime};
    pub use crate::device::MemoryDevice;
    pub use crate::error::{Error, Result};
    pub use crate::flow::{FlowKey, KeyLayout};
    pub use crate::frequency::{CountMinDecoder, CountMinMatrix};
    pub use crate::generation::{Generation, Window};
    pub use crate::hash::{HashFamily, HashFunction};
    pub use crate::layout::{RegisterNames, SketchLayout};
    pub use crate::monitor::{Confidence, Estimate, SketchMonitor};
    pub use crate::rotation::{RotationPolicy, WindowRotationController};
    pub use crate::schema::SketchSchema;
}

pub use error::{Error, Result};
pub use monitor::SketchMonitor;
pub use schema::SketchSchema;
