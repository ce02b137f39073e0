//! Beam-caustic fitting for a single axis.
//!
//! Given averaged samples `(zᵢ, dᵢ ± σᵢ)` (position in mm, diameter in µm), we
//! fit the beam radius `ω(z) = d/2` with one of the `FitModel`
//! parameterizations and derive `M²` from the fitted parameters.
//!
//! Workflow:
//! - `estimate_initial_guess` seeds the parameters (ISO runs a preliminary `M2`
//!   fit and converts it)
//! - `fit` / `fit_from` run the selected backend and overwrite the previous result
//! - `m_squared` derives `M² ± σ` on first access and caches it until the next fit
//!
//! Backend failure handling differs on purpose: a least-squares solve that does
//! not converge is an error, while an ODR solve that stops on a non-convergence
//! criterion still returns its result flagged `FitStatus::Marginal`.

use std::cell::OnceCell;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{FitBackend, FitModel, PulseCalibration, Sample, Wavelength};
use crate::error::{AppError, AppResult};
use crate::fit::lm::{FitData, Solution, solve_odr, solve_weighted};
use crate::math::covariance;
use crate::models::{MSquared, beam_radius, iso_from_gaussian, m_squared, seed_from_minimum};

/// Everything that selects how a caustic is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitSettings {
    pub model: FitModel,
    pub backend: FitBackend,
    pub wavelength: Wavelength,
}

/// Whether the solver reported convergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FitStatus {
    Converged,
    /// Result returned despite a non-convergence stop; `reasons` lists the
    /// solver's stop condition.
    Marginal { reasons: String },
}

/// Outcome of one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub model: FitModel,
    pub params: [f64; 3],
    pub std_errors: [f64; 3],
    /// Covariance of the three model parameters, row-major.
    pub covariance: [[f64; 3]; 3],
    pub status: FitStatus,
    pub evaluations: usize,
    /// Sum of squared weighted residuals.
    pub chi_squared: f64,
    /// `chi_squared / (n - 3)`.
    pub residual_variance: f64,
}

impl FitResult {
    pub fn is_converged(&self) -> bool {
        self.status == FitStatus::Converged
    }
}

/// One pulse of the reference 200 mm stage, used as ODR position error when the
/// caller does not supply one.
pub fn default_x_error_mm() -> f64 {
    PulseCalibration::reference().pulse_to_mm(1)
}

#[derive(Debug, Clone)]
pub struct BeamFitter {
    samples: Vec<Sample>,
    data: FitData,
    settings: FitSettings,
    initial: Option<[f64; 3]>,
    result: Option<FitResult>,
    m_squared: OnceCell<MSquared>,
}

impl BeamFitter {
    /// Prepare samples for fitting.
    ///
    /// Samples are sorted by position; duplicate positions are rejected. If no
    /// sample carries a positive σ, all points get unit weight; otherwise
    /// non-positive σ are replaced by the smallest positive one.
    pub fn new(samples: &[Sample], settings: FitSettings) -> AppResult<Self> {
        if samples.len() <= FitModel::PARAM_LEN {
            return Err(AppError::InvalidInput(format!(
                "need more than {} samples to fit, got {}",
                FitModel::PARAM_LEN,
                samples.len()
            )));
        }
        if !(settings.wavelength.nm.is_finite() && settings.wavelength.nm > 0.0) {
            return Err(AppError::InvalidInput(format!(
                "wavelength must be positive, got {} nm",
                settings.wavelength.nm
            )));
        }

        let mut samples = samples.to_vec();
        samples.sort_by(|a, b| a.position_mm.total_cmp(&b.position_mm));
        if let Some(w) = samples.windows(2).find(|w| w[0].position_mm == w[1].position_mm) {
            return Err(AppError::InvalidInput(format!(
                "duplicate sample position {} mm",
                w[0].position_mm
            )));
        }
        if samples
            .iter()
            .any(|s| !(s.position_mm.is_finite() && s.mean_um.is_finite()))
        {
            return Err(AppError::InvalidInput("non-finite sample".to_string()));
        }

        let data = fit_data(&samples);
        Ok(Self {
            samples,
            data,
            settings,
            initial: None,
            result: None,
            m_squared: OnceCell::new(),
        })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn settings(&self) -> &FitSettings {
        &self.settings
    }

    pub fn initial_guess(&self) -> Option<[f64; 3]> {
        self.initial
    }

    /// Latest successful fit.
    pub fn result(&self) -> Option<&FitResult> {
        self.result.as_ref()
    }

    /// Seed the parameters from the data and store them for `fit`.
    pub fn estimate_initial_guess(&mut self) -> AppResult<[f64; 3]> {
        let lambda = self.settings.wavelength.nm;
        let guess = match self.settings.model {
            FitModel::Iso => {
                let mut gaussian = BeamFitter {
                    samples: self.samples.clone(),
                    data: self.data.clone(),
                    settings: FitSettings {
                        model: FitModel::M2,
                        ..self.settings
                    },
                    initial: None,
                    result: None,
                    m_squared: OnceCell::new(),
                };
                let [w0, z0, m2] = gaussian.estimate_and_fit()?.params;
                iso_from_gaussian(w0, z0, m2, lambda)
            }
            model => {
                let radii: Vec<Sample> = self
                    .samples
                    .iter()
                    .map(|s| Sample {
                        mean_um: s.mean_um / 2.0,
                        std_um: s.std_um / 2.0,
                        ..*s
                    })
                    .collect();
                seed_from_minimum(model, &radii, lambda)
                    .ok_or_else(|| AppError::InvalidInput("no samples to seed from".to_string()))?
            }
        };
        debug!(model = ?self.settings.model, ?guess, "initial guess");
        self.initial = Some(guess);
        Ok(guess)
    }

    /// Fit from the stored initial guess, estimating one first if needed.
    pub fn fit(&mut self) -> AppResult<&FitResult> {
        let initial = match self.initial {
            Some(guess) => guess,
            None => self.estimate_initial_guess()?,
        };
        self.fit_from(initial)
    }

    /// Equivalent to `estimate_initial_guess` followed by `fit`.
    pub fn estimate_and_fit(&mut self) -> AppResult<&FitResult> {
        let initial = self.estimate_initial_guess()?;
        self.fit_from(initial)
    }

    /// Fit from an explicit starting point.
    pub fn fit_from(&mut self, initial: [f64; 3]) -> AppResult<&FitResult> {
        self.result = None;
        self.m_squared = OnceCell::new();
        self.initial = Some(initial);

        let model = self.settings.model;
        let lambda = self.settings.wavelength.nm;
        let n = self.data.len();

        let (solution, is_odr) = match self.settings.backend {
            FitBackend::LeastSquares => (solve_weighted(&self.data, model, lambda, &initial), false),
            FitBackend::Odr { x_error_mm } => {
                let sx = x_error_mm.filter(|e| *e > 0.0).unwrap_or_else(default_x_error_mm);
                let sx = vec![sx; n];
                (solve_odr(&self.data, &sx, model, lambda, &initial), true)
            }
        };
        let solution = solution.ok_or_else(|| AppError::FitConvergence {
            reasons: "model is not finite at the solution".to_string(),
        })?;

        let status = if solution.success {
            FitStatus::Converged
        } else if is_odr {
            warn!(reasons = %solution.termination, "ODR fit did not converge cleanly");
            FitStatus::Marginal {
                reasons: solution.termination.clone(),
            }
        } else {
            return Err(AppError::FitConvergence {
                reasons: solution.termination,
            });
        };

        let result = build_result(model, &solution, n, status)?;
        debug!(?result.params, ?result.std_errors, evaluations = result.evaluations, "fit done");
        Ok(self.result.insert(result))
    }

    /// `M²` and its standard error for the latest fit.
    pub fn m_squared(&self) -> AppResult<MSquared> {
        let result = self.result.as_ref().ok_or(AppError::NotFitted)?;
        if let Some(m) = self.m_squared.get() {
            return Ok(*m);
        }
        let cov = nalgebra::DMatrix::from_fn(3, 3, |i, j| result.covariance[i][j]);
        let w = self.settings.wavelength;
        let m = m_squared(result.model, &result.params, &cov, w.nm, w.error_nm).ok_or_else(|| {
            AppError::FitConvergence {
                reasons: format!("fitted parameters {:?} describe no real waist (4ac - b² ≤ 0)", result.params),
            }
        })?;
        Ok(*self.m_squared.get_or_init(|| m))
    }

    /// Fitted beam radius at `z_mm`.
    pub fn predict(&self, z_mm: f64) -> AppResult<f64> {
        let result = self.result.as_ref().ok_or(AppError::NotFitted)?;
        Ok(beam_radius(result.model, z_mm, &result.params, self.settings.wavelength.nm))
    }
}

fn fit_data(samples: &[Sample]) -> FitData {
    let x = samples.iter().map(|s| s.position_mm).collect();
    let y = samples.iter().map(|s| s.mean_um / 2.0).collect();
    let sigmas: Vec<f64> = samples.iter().map(|s| s.std_um / 2.0).collect();

    let min_positive = sigmas
        .iter()
        .copied()
        .filter(|s| s.is_finite() && *s > 0.0)
        .min_by(f64::total_cmp);
    let sy = match min_positive {
        None => vec![1.0; sigmas.len()],
        Some(floor) => sigmas
            .into_iter()
            .map(|s| if s.is_finite() && s > 0.0 { s } else { floor })
            .collect(),
    };

    FitData { x, y, sy }
}

fn build_result(model: FitModel, solution: &Solution, n: usize, status: FitStatus) -> AppResult<FitResult> {
    let p = FitModel::PARAM_LEN;
    let cov = covariance(&solution.jacobian, &solution.residuals, n - p).ok_or_else(|| {
        AppError::FitConvergence {
            reasons: "parameter covariance is singular".to_string(),
        }
    })?;

    let mut params = [0.0; 3];
    let mut std_errors = [0.0; 3];
    let mut matrix = [[0.0; 3]; 3];
    for (i, e) in cov.std_errors(p).into_iter().enumerate() {
        std_errors[i] = e;
    }
    for i in 0..p {
        params[i] = solution.params[i];
        for j in 0..p {
            matrix[i][j] = cov.matrix[(i, j)];
        }
    }

    let chi_squared = solution.residuals.norm_squared();
    Ok(FitResult {
        model,
        params,
        std_errors,
        covariance: matrix,
        status,
        evaluations: solution.evaluations,
        chi_squared,
        residual_variance: cov.residual_variance,
    })
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use super::*;

    const LAMBDA: f64 = 2300.0;

    /// Noiseless diameters of a beam with the given parameters.
    fn caustic(w0: f64, z0: f64, m2: f64, noise: impl Fn(usize) -> f64) -> Vec<Sample> {
        (0..31)
            .map(|i| {
                let z = -45.0 + 3.0 * i as f64;
                let w = beam_radius(FitModel::M2, z, &[w0, z0, m2], LAMBDA);
                Sample {
                    position_mm: z,
                    mean_um: 2.0 * w + noise(i),
                    std_um: 2.0,
                }
            })
            .collect()
    }

    fn settings(model: FitModel, backend: FitBackend) -> FitSettings {
        FitSettings {
            model,
            backend,
            wavelength: Wavelength::new(LAMBDA, 0.0),
        }
    }

    #[test]
    fn m2_mode_recovers_m_squared() {
        let samples = caustic(100.0, 2.0, 1.3, |_| 0.0);
        let mut fitter = BeamFitter::new(&samples, settings(FitModel::M2, FitBackend::LeastSquares)).unwrap();
        let result = fitter.estimate_and_fit().unwrap().clone();

        assert!(result.is_converged());
        assert!((result.params[0] - 100.0).abs() < 1e-6);
        assert!((result.params[1] - 2.0).abs() < 1e-6);
        let m = fitter.m_squared().unwrap();
        assert!((m.value - 1.3).abs() / 1.3 < 1e-6, "M² = {}", m.value);
        assert!(m.std_error < 1e-6);
    }

    #[test]
    fn iso_mode_recovers_m_squared() {
        let samples = caustic(100.0, -3.0, 1.3, |_| 0.0);
        let mut fitter = BeamFitter::new(&samples, settings(FitModel::Iso, FitBackend::LeastSquares)).unwrap();
        fitter.estimate_and_fit().unwrap();

        let m = fitter.m_squared().unwrap();
        assert!((m.value - 1.3).abs() / 1.3 < 1e-6, "M² = {}", m.value);
        assert!(m.std_error < 1e-4);
    }

    #[test]
    fn m2_lambda_mode_propagates_wavelength_error() {
        let samples = caustic(100.0, 0.0, 1.0, |_| 0.0);
        let mut s = settings(FitModel::M2Lambda, FitBackend::LeastSquares);
        s.wavelength = Wavelength::new(LAMBDA, 23.0);
        let mut fitter = BeamFitter::new(&samples, s).unwrap();
        fitter.estimate_and_fit().unwrap();

        let m = fitter.m_squared().unwrap();
        assert!((m.value - 1.0).abs() < 1e-6);
        assert!((m.std_error - 0.01).abs() < 1e-5);
    }

    #[test]
    fn odr_matches_least_squares_on_clean_data() {
        let noise = |i: usize| [0.8, -1.1, 0.3, -0.2, 1.4, -0.9][i % 6];
        let samples = caustic(120.0, 1.0, 1.5, noise);

        let mut wls = BeamFitter::new(&samples, settings(FitModel::M2, FitBackend::LeastSquares)).unwrap();
        wls.estimate_and_fit().unwrap();
        let mut odr = BeamFitter::new(&samples, settings(FitModel::M2, FitBackend::Odr { x_error_mm: None })).unwrap();
        odr.estimate_and_fit().unwrap();

        let m_wls = wls.m_squared().unwrap().value;
        let m_odr = odr.m_squared().unwrap().value;
        assert!((m_wls - 1.5).abs() < 0.05);
        assert!((m_odr - m_wls).abs() < 0.01, "{m_odr} vs {m_wls}");
        assert!(odr.m_squared().unwrap().std_error > 0.0);
    }

    #[test]
    fn m_squared_before_fit_is_an_error() {
        let samples = caustic(100.0, 0.0, 1.0, |_| 0.0);
        let fitter = BeamFitter::new(&samples, settings(FitModel::M2, FitBackend::LeastSquares)).unwrap();
        assert!(matches!(fitter.m_squared(), Err(AppError::NotFitted)));
        assert!(matches!(fitter.predict(0.0), Err(AppError::NotFitted)));
    }

    #[test]
    fn refit_overwrites_the_previous_result() {
        let samples = caustic(100.0, 0.0, 1.2, |_| 0.0);
        let mut fitter = BeamFitter::new(&samples, settings(FitModel::M2, FitBackend::LeastSquares)).unwrap();
        fitter.estimate_and_fit().unwrap();
        let first = fitter.m_squared().unwrap();

        fitter.fit_from([90.0, 1.0, 1.0]).unwrap();
        assert_eq!(fitter.initial_guess(), Some([90.0, 1.0, 1.0]));
        assert!((fitter.m_squared().unwrap().value - first.value).abs() < 1e-6);
    }

    #[test]
    fn predict_returns_the_fitted_radius() {
        let samples = caustic(100.0, 0.0, 1.0, |_| 0.0);
        let mut fitter = BeamFitter::new(&samples, settings(FitModel::M2, FitBackend::LeastSquares)).unwrap();
        fitter.estimate_and_fit().unwrap();
        let zr = PI * 100.0 * 100.0 / LAMBDA;
        assert!((fitter.predict(zr).unwrap() - 100.0 * 2f64.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn too_few_or_duplicate_samples_are_rejected() {
        let samples = caustic(100.0, 0.0, 1.0, |_| 0.0);
        let s = settings(FitModel::M2, FitBackend::LeastSquares);
        assert!(BeamFitter::new(&samples[..3], s).is_err());

        let mut dup = samples.clone();
        dup.push(samples[4]);
        assert!(matches!(BeamFitter::new(&dup, s), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn zero_sigmas_fall_back_to_weights() {
        let samples = [
            Sample { position_mm: 0.0, mean_um: 1.0, std_um: 0.0 },
            Sample { position_mm: 1.0, mean_um: 1.0, std_um: 4.0 },
            Sample { position_mm: 2.0, mean_um: 1.0, std_um: 2.0 },
        ];
        assert_eq!(fit_data(&samples).sy, vec![1.0, 2.0, 1.0]);

        let unweighted: Vec<Sample> = samples.iter().map(|s| Sample { std_um: 0.0, ..*s }).collect();
        assert_eq!(fit_data(&unweighted).sy, vec![1.0; 3]);
    }
}
