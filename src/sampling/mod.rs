//! Repeated single readings turned into one averaged width per axis.
//!
//! - `outliers`: trimming and spike rejection
//! - `averaging`: warm-up discard, filtering, mean and population std

pub mod averaging;
pub mod outliers;

pub use averaging::*;
