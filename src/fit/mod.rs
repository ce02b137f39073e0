//! Caustic fitting.
//!
//! Responsibilities:
//!
//! - express each backend as a least-squares problem (`lm`)
//! - seed, solve, and derive `M²` for one axis (`fitter`)
//! - fit both axes of a scan in parallel (`fit_axes`)

pub mod fitter;
pub mod lm;

pub use fitter::*;

use crate::domain::{Axis, AxisPair, ScanDataset};
use crate::error::AppResult;

/// Fit every measured axis of `dataset`.
///
/// The two axes are independent, so they are solved on the rayon pool. Axes
/// without samples come back as `None`.
pub fn fit_axes(dataset: &ScanDataset, settings: FitSettings) -> AppResult<AxisPair<Option<BeamFitter>>> {
    let fit_one = |axis: Axis| -> AppResult<Option<BeamFitter>> {
        let samples = dataset.samples(axis);
        if samples.is_empty() {
            return Ok(None);
        }
        let mut fitter = BeamFitter::new(&samples, settings)?;
        fitter.estimate_and_fit()?;
        Ok(Some(fitter))
    };

    let (x, y) = rayon::join(|| fit_one(Axis::X), || fit_one(Axis::Y));
    Ok(AxisPair::new(x?, y?))
}
