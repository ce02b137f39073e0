//! Reporting utilities: per-sample residuals and formatted terminal output.

pub mod format;

pub use format::*;

use crate::domain::Sample;
use crate::error::{AppError, AppResult};
use crate::fit::BeamFitter;

/// Measured diameter against the fitted caustic at one position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleResidual {
    pub sample: Sample,
    /// Fitted diameter in µm.
    pub fitted_um: f64,
    /// `measured - fitted`, in µm.
    pub residual_um: f64,
}

/// Residual of every sample of a fitted axis.
pub fn compute_residuals(fitter: &BeamFitter) -> AppResult<Vec<SampleResidual>> {
    let mut out = Vec::with_capacity(fitter.samples().len());
    for s in fitter.samples() {
        let fitted_um = 2.0 * fitter.predict(s.position_mm)?;
        if !fitted_um.is_finite() {
            return Err(AppError::InvalidInput(format!(
                "fitted caustic is not finite at {} mm",
                s.position_mm
            )));
        }
        out.push(SampleResidual {
            sample: *s,
            fitted_um,
            residual_um: s.mean_um - fitted_um,
        });
    }
    Ok(out)
}

/// The `top_n` residuals with the largest magnitude, largest first.
pub fn largest_residuals(residuals: &[SampleResidual], top_n: usize) -> Vec<SampleResidual> {
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| b.residual_um.abs().total_cmp(&a.residual_um.abs()));
    sorted.truncate(top_n);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitBackend, FitModel, Wavelength};
    use crate::fit::FitSettings;
    use crate::models::beam_radius;

    pub(crate) fn fitted(bump_at: Option<i32>) -> BeamFitter {
        let params = [100.0, 0.0, 1.0];
        let samples: Vec<Sample> = (-10..=10)
            .map(|i| {
                let z = i as f64 * 4.0;
                let bump = if Some(i) == bump_at { 5.0 } else { 0.0 };
                Sample {
                    position_mm: z,
                    mean_um: 2.0 * beam_radius(FitModel::M2, z, &params, 2300.0) + bump,
                    std_um: 0.0,
                }
            })
            .collect();
        let settings = FitSettings {
            model: FitModel::M2,
            backend: FitBackend::LeastSquares,
            wavelength: Wavelength::new(2300.0, 0.0),
        };
        let mut fitter = BeamFitter::new(&samples, settings).unwrap();
        fitter.estimate_and_fit().unwrap();
        fitter
    }

    #[test]
    fn residuals_vanish_on_an_exact_caustic() {
        let residuals = compute_residuals(&fitted(None)).unwrap();
        assert_eq!(residuals.len(), 21);
        assert!(residuals.iter().all(|r| r.residual_um.abs() < 1e-6));
    }

    #[test]
    fn largest_residual_points_at_the_bump() {
        let residuals = compute_residuals(&fitted(Some(3))).unwrap();
        let top = largest_residuals(&residuals, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].sample.position_mm, 12.0);
        assert!(top[0].residual_um.abs() >= top[1].residual_um.abs());
    }
}
