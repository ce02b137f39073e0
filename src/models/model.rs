//! Beam-radius models for the three fit parameterizations.
//!
//! The fitter relies on a handful of primitive operations per model:
//! - evaluate the radius `ω(z)` for a parameter vector
//! - fill the gradient `∂ω/∂β` (Jacobian row for the solver)
//! - evaluate the slope `∂ω/∂z` (needed when positions carry errors)
//! - derive `M²` and its standard error from fitted parameters
//!
//! These are implemented here for each `FitModel` as plain functions so that the
//! solver adaptors stay model-agnostic.
//!
//! Units: `z`, `z0` in mm, `w0` and `ω` in µm, `λ` in nm.

use std::f64::consts::PI;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::{FitModel, Sample};

/// Lower bound for the ISO polynomial under the square root.
///
/// Keeps the model and its gradient finite when the solver wanders into a
/// parameter region where `a + b·z + c·z²` dips below zero.
const ISO_MIN_POLY: f64 = 1e-12;

/// `M²` and its one-sigma uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MSquared {
    pub value: f64,
    pub std_error: f64,
}

/// Evaluate the beam radius `ω(z)` in µm.
///
/// # Panics
/// Panics if `params` has fewer than three entries.
pub fn beam_radius(model: FitModel, z: f64, params: &[f64], wavelength_nm: f64) -> f64 {
    match model {
        FitModel::M2Lambda => gaussian_radius(z, params[0], params[1], params[2]),
        FitModel::M2 => gaussian_radius(z, params[0], params[1], params[2] * wavelength_nm),
        FitModel::Iso => 0.5 * iso_poly(z, params).sqrt(),
    }
}

/// Fill `out` with `∂ω/∂β` at `z`.
pub fn fill_gradient(model: FitModel, z: f64, params: &[f64], wavelength_nm: f64, out: &mut [f64]) {
    match model {
        FitModel::M2Lambda | FitModel::M2 => {
            let (w0, z0) = (params[0], params[1]);
            let q = match model {
                FitModel::M2 => params[2] * wavelength_nm,
                _ => params[2],
            };
            let area = PI * w0 * w0;
            let dz = z - z0;
            let u = dz * q / area;
            let s = (1.0 + u * u).sqrt();

            out[0] = (1.0 - u * u) / s;
            out[1] = -w0 * (q / area) * u / s;
            let d_q = w0 * (u / s) * dz / area;
            out[2] = match model {
                FitModel::M2 => d_q * wavelength_nm,
                _ => d_q,
            };
        }
        FitModel::Iso => {
            let root = iso_poly(z, params).sqrt();
            out[0] = 0.25 / root;
            out[1] = 0.25 * z / root;
            out[2] = 0.25 * z * z / root;
        }
    }
}

/// Slope `∂ω/∂z` at `z`.
pub fn radius_slope(model: FitModel, z: f64, params: &[f64], wavelength_nm: f64) -> f64 {
    match model {
        FitModel::M2Lambda | FitModel::M2 => {
            let (w0, z0) = (params[0], params[1]);
            let q = match model {
                FitModel::M2 => params[2] * wavelength_nm,
                _ => params[2],
            };
            let k = q / (PI * w0 * w0);
            let u = (z - z0) * k;
            w0 * k * u / (1.0 + u * u).sqrt()
        }
        FitModel::Iso => {
            let (b, c) = (params[1], params[2]);
            0.25 * (b + 2.0 * c * z) / iso_poly(z, params).sqrt()
        }
    }
}

/// Starting point for the Gaussian parameterizations: waist at the narrowest
/// sample, `M² = 1`. `samples` carry radii.
///
/// Returns `None` for the ISO model, which is seeded from an `M2` fit instead
/// (see [`iso_from_gaussian`]), or for empty data.
pub fn seed_from_minimum(model: FitModel, samples: &[Sample], wavelength_nm: f64) -> Option<[f64; 3]> {
    let narrowest = samples
        .iter()
        .min_by(|a, b| a.mean_um.total_cmp(&b.mean_um))?;
    let (w0, z0) = (narrowest.mean_um, narrowest.position_mm);
    match model {
        FitModel::M2Lambda => Some([w0, z0, wavelength_nm]),
        FitModel::M2 => Some([w0, z0, 1.0]),
        FitModel::Iso => None,
    }
}

/// Convert Gaussian parameters `(w0, z0, M²)` to ISO `(a, b, c)`.
///
/// The ISO polynomial describes the squared *diameter*, so each coefficient is
/// four times its radius-space counterpart.
pub fn iso_from_gaussian(w0: f64, z0: f64, m2: f64, wavelength_nm: f64) -> [f64; 3] {
    let c = (m2 * wavelength_nm / (PI * w0)).powi(2);
    let a = w0 * w0 + c * z0 * z0;
    let b = -2.0 * z0 * c;
    [4.0 * a, 4.0 * b, 4.0 * c]
}

/// Derive `M²` from fitted parameters.
///
/// `cov` is the covariance of the three fitted parameters; `wavelength_err_nm`
/// enters the propagation for the models that depend on λ explicitly.
///
/// Returns `None` for ISO parameters with `4ac - b² ≤ 0`, which describe no
/// real beam.
pub fn m_squared(
    model: FitModel,
    params: &[f64],
    cov: &DMatrix<f64>,
    wavelength_nm: f64,
    wavelength_err_nm: f64,
) -> Option<MSquared> {
    let m = match model {
        FitModel::M2 => MSquared {
            value: params[2],
            std_error: cov[(2, 2)].max(0.0).sqrt(),
        },
        FitModel::M2Lambda => {
            let p = params[2];
            let sp = cov[(2, 2)].max(0.0).sqrt();
            let value = p / wavelength_nm;
            let rel = ((sp / p).powi(2) + (wavelength_err_nm / wavelength_nm).powi(2)).sqrt();
            MSquared {
                value,
                std_error: value.abs() * rel,
            }
        }
        FitModel::Iso => {
            let (a, b, c) = (params[0], params[1], params[2]);
            let l = wavelength_nm;
            let discriminant = 4.0 * a * c - b * b;
            if !(discriminant.is_finite() && discriminant > 0.0) {
                return None;
            }
            let f = discriminant.sqrt();
            let value = PI / (8.0 * l) * f;

            // a, b and c are strongly correlated, so the propagation uses the
            // full covariance rather than its diagonal.
            let grad = [
                PI * c / (4.0 * l * f),
                -PI * b / (8.0 * l * f),
                PI * a / (4.0 * l * f),
            ];
            let mut var = 0.0;
            for i in 0..3 {
                for j in 0..3 {
                    var += grad[i] * cov[(i, j)] * grad[j];
                }
            }
            let d_lambda = -PI * f / (8.0 * l * l);
            var += (d_lambda * wavelength_err_nm).powi(2);

            MSquared {
                value,
                std_error: var.max(0.0).sqrt(),
            }
        }
    };
    Some(m)
}

fn gaussian_radius(z: f64, w0: f64, z0: f64, m2_lambda: f64) -> f64 {
    let u = (z - z0) * m2_lambda / (PI * w0 * w0);
    w0 * (1.0 + u * u).sqrt()
}

fn iso_poly(z: f64, params: &[f64]) -> f64 {
    (params[0] + params[1] * z + params[2] * z * z).max(ISO_MIN_POLY)
}
