//! Register-access implementations
//!
//! - [`MemoryDevice`]: in-process store for dry runs and tests, with a
//!   simulated data plane and one-shot fault injection
//!
//! Production transports implement [`RegisterAccess`](crate::traits::RegisterAccess)
//! outside this crate.

mod memory;

pub use memory::{MemoryDevice, Operation};
