//! Numerical utilities: sample statistics and least-squares covariance.

pub mod covariance;
pub mod stats;

pub use covariance::*;
pub use stats::*;
