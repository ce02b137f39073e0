//! Scan position planning.

pub mod scan_plan;

pub use scan_plan::*;
