//! JSON fit report.
//!
//! The portable record of a fitted caustic: settings, per-axis parameters and
//! `M²`, and a precomputed 101-point grid of the fitted radius for plotting.

use std::fs::File;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::{Axis, AxisPair, FitBackend, FitModel, Wavelength};
use crate::error::{AppError, AppResult};
use crate::fit::{BeamFitter, FitStatus};
use crate::models::MSquared;

const GRID_POINTS: usize = 101;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub tool: String,
    pub generated: NaiveDateTime,
    pub wavelength: Wavelength,
    pub backend: FitBackend,
    pub axes: Vec<AxisReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisReport {
    pub axis: Axis,
    pub model: FitModel,
    pub param_names: Vec<String>,
    pub params: [f64; 3],
    pub std_errors: [f64; 3],
    pub m_squared: MSquared,
    pub status: FitStatus,
    pub evaluations: usize,
    pub chi_squared: f64,
    pub samples: usize,
    pub grid: CausticGrid,
}

/// Fitted radius sampled over the scanned positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausticGrid {
    pub position_mm: Vec<f64>,
    pub radius_um: Vec<f64>,
}

fn build_grid(fitter: &BeamFitter, n: usize) -> AppResult<CausticGrid> {
    let n = n.max(2);
    let positions = fitter.samples().iter().map(|s| s.position_mm);
    let mut z0 = positions.clone().fold(f64::INFINITY, f64::min);
    let mut z1 = positions.fold(f64::NEG_INFINITY, f64::max);
    if !(z0.is_finite() && z1.is_finite()) || z1 <= z0 {
        z0 -= 1.0;
        z1 = z0 + 2.0;
    }

    let mut position_mm = Vec::with_capacity(n);
    let mut radius_um = Vec::with_capacity(n);
    for i in 0..n {
        let u = i as f64 / (n as f64 - 1.0);
        let z = z0 + u * (z1 - z0);
        position_mm.push(z);
        radius_um.push(fitter.predict(z)?);
    }

    Ok(CausticGrid { position_mm, radius_um })
}

fn axis_report(axis: Axis, fitter: &BeamFitter) -> AppResult<AxisReport> {
    let result = fitter.result().ok_or(AppError::NotFitted)?;
    Ok(AxisReport {
        axis,
        model: result.model,
        param_names: result.model.param_names().iter().map(|s| s.to_string()).collect(),
        params: result.params,
        std_errors: result.std_errors,
        m_squared: fitter.m_squared()?,
        status: result.status.clone(),
        evaluations: result.evaluations,
        chi_squared: result.chi_squared,
        samples: fitter.samples().len(),
        grid: build_grid(fitter, GRID_POINTS)?,
    })
}

/// Collect the fitted axes into a report.
///
/// # Errors
/// `InvalidInput` when no axis was fitted, `NotFitted` when a fitter has no result.
pub fn build_report(fits: &AxisPair<Option<BeamFitter>>, generated: NaiveDateTime) -> AppResult<FitReport> {
    let fitted: Vec<(Axis, &BeamFitter)> = Axis::BOTH
        .iter()
        .filter_map(|&axis| fits.get(axis).as_ref().map(|f| (axis, f)))
        .collect();
    let (_, first) = fitted
        .first()
        .ok_or_else(|| AppError::InvalidInput("no fitted axis to report".into()))?;
    let settings = *first.settings();

    let axes = fitted
        .iter()
        .map(|(axis, fitter)| axis_report(*axis, fitter))
        .collect::<AppResult<Vec<_>>>()?;

    Ok(FitReport {
        tool: "m2".to_string(),
        generated,
        wavelength: settings.wavelength,
        backend: settings.backend,
        axes,
    })
}

pub fn write_report_json(path: &Path, report: &FitReport) -> AppResult<()> {
    let file = File::create(path)
        .map_err(|e| AppError::InvalidInput(format!("Failed to create report '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

pub fn read_report_json(path: &Path) -> AppResult<FitReport> {
    let file = File::open(path)
        .map_err(|e| AppError::InvalidInput(format!("Failed to open report '{}': {e}", path.display())))?;
    Ok(serde_json::from_reader(file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Sample;
    use crate::fit::FitSettings;
    use crate::models::beam_radius;
    use chrono::NaiveDate;

    fn fitted() -> BeamFitter {
        let params = [100.0, 0.5, 1.2];
        let samples: Vec<Sample> = (-15..=15)
            .map(|i| {
                let z = i as f64 * 2.0;
                Sample {
                    position_mm: z,
                    mean_um: 2.0 * beam_radius(FitModel::M2, z, &params, 1064.0),
                    std_um: 0.0,
                }
            })
            .collect();
        let settings = FitSettings {
            model: FitModel::M2,
            backend: FitBackend::LeastSquares,
            wavelength: Wavelength::new(1064.0, 0.0),
        };
        let mut fitter = BeamFitter::new(&samples, settings).unwrap();
        fitter.estimate_and_fit().unwrap();
        fitter
    }

    #[test]
    fn report_round_trips_through_json() {
        let fits = AxisPair::new(Some(fitted()), None);
        let generated = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
        let report = build_report(&fits, generated).unwrap();

        assert_eq!(report.axes.len(), 1);
        let x = &report.axes[0];
        assert_eq!(x.axis, Axis::X);
        assert_eq!(x.grid.position_mm.len(), GRID_POINTS);
        assert_eq!(x.grid.position_mm[0], -30.0);
        assert_eq!(x.grid.position_mm[GRID_POINTS - 1], 30.0);
        assert!((x.m_squared.value - 1.2).abs() < 1e-6);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.json");
        write_report_json(&path, &report).unwrap();
        let back = read_report_json(&path).unwrap();
        assert_eq!(back.tool, "m2");
        assert_eq!(back.axes[0].status, FitStatus::Converged);
        assert_eq!(back.axes[0].grid.radius_um.len(), GRID_POINTS);
    }

    #[test]
    fn empty_report_is_rejected() {
        let fits: AxisPair<Option<BeamFitter>> = AxisPair::new(None, None);
        let generated = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
        assert!(matches!(build_report(&fits, generated), Err(AppError::InvalidInput(_))));
    }
}
