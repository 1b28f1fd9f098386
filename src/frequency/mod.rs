//! Frequency (per-flow packet count) decoding
//!
//! # Algorithms
//!
//! - [`CountMinDecoder`]: minimum over the `k` hashed counters of one
//!   generation's Count-Min rows
//!
//! Results are upper bounds: the decoded value is never below the true
//! count, and the overestimate is bounded by the usual `e/w` fraction of the
//! generation's total with probability `1 - e^-k`.

mod count_min;

pub use count_min::{CountMinDecoder, CountMinMatrix};

/// Additive error bound `ε·N` with `ε = e / width`
pub fn error_bound(width: usize, total: u64) -> u64 {
    let epsilon = core::f64::consts::E / width as f64;
    (epsilon * total as f64) as u64
}
