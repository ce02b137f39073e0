//! Closed-loop searches along the optical axis.
//!
//! Both searches drive the stage and read the profiler through the [`Probe`]
//! seam, so they can be exercised against a synthetic beam without hardware:
//!
//! - `ternary`: the waist position (minimum width), single or coupled X/Y
//! - `itp`: the Rayleigh length (width = √2 · waist width) with an ITP root finder

pub mod itp;
pub mod ternary;

pub use itp::{ItpOptions, RayleighSearch, find_rayleigh_length, find_rayleigh_length_xy};
pub use ternary::{find_center, find_center_xy};

use crate::domain::{AxisPair, AxisSelection, TravelRange};
use crate::error::AppResult;

/// Move-and-measure access used by the searches.
pub trait Probe {
    /// Averaged D4σ diameter (µm) per axis at `position`.
    ///
    /// Axes outside `axes` carry `NaN`.
    fn measure(&mut self, position: i64, axes: AxisSelection) -> AppResult<AxisPair<f64>>;

    fn travel_range(&self) -> TravelRange;

    fn is_ranged(&self) -> bool;

    /// Calibrate the travel range; called before a search that needs the limits.
    fn find_travel_range(&mut self) -> AppResult<TravelRange>;
}

/// `round((a + b) / 2)`.
pub(crate) fn midpoint(a: i64, b: i64) -> i64 {
    ((a + b) as f64 / 2.0).round() as i64
}
