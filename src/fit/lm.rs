//! Levenberg-Marquardt adaptors for the two fitting backends.
//!
//! Both backends are expressed as a `LeastSquaresProblem` and handed to the
//! same solver:
//!
//! - **weighted least squares**: residuals `(ω(xᵢ; β) - yᵢ) / σyᵢ`, positions exact
//! - **orthogonal distance regression**: each position gets its own correction
//!   `δᵢ`, the parameter vector becomes `[β, δ₁..δₙ]`, and the residuals gain a
//!   second block `δᵢ / σxᵢ` that penalizes moving a point along the axis
//!
//! The ODR Jacobian is sparse (each `δᵢ` touches two rows) but tiny, so it is
//! stored dense.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};

use crate::domain::FitModel;
use crate::models::{beam_radius, fill_gradient, radius_slope};

/// Observations prepared for fitting: positions (mm), radii (µm) and their
/// standard deviations. All σ are strictly positive.
#[derive(Debug, Clone, PartialEq)]
pub struct FitData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub sy: Vec<f64>,
}

impl FitData {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Solver state at the optimum.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Full parameter vector (model parameters first).
    pub params: DVector<f64>,
    pub residuals: DVector<f64>,
    pub jacobian: DMatrix<f64>,
    pub evaluations: usize,
    pub success: bool,
    pub termination: String,
}

/// Tolerances stay above machine epsilon so an exact fit terminates through a
/// convergence test rather than the "no improvement possible" guards.
fn solver() -> LevenbergMarquardt<f64> {
    LevenbergMarquardt::new()
        .with_ftol(1e-10)
        .with_xtol(1e-10)
        .with_gtol(1e-12)
        .with_patience(200)
}

struct WeightedProblem<'a> {
    data: &'a FitData,
    model: FitModel,
    wavelength_nm: f64,
    params: DVector<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for WeightedProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let d = self.data;
        let p = self.params.as_slice();
        let r = DVector::from_fn(d.len(), |i, _| {
            (beam_radius(self.model, d.x[i], p, self.wavelength_nm) - d.y[i]) / d.sy[i]
        });
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let d = self.data;
        let p = self.params.as_slice();
        let mut j = DMatrix::zeros(d.len(), FitModel::PARAM_LEN);
        let mut row = [0.0; FitModel::PARAM_LEN];
        for i in 0..d.len() {
            fill_gradient(self.model, d.x[i], p, self.wavelength_nm, &mut row);
            for (k, g) in row.iter().enumerate() {
                j[(i, k)] = g / d.sy[i];
            }
        }
        j.iter().all(|v| v.is_finite()).then_some(j)
    }
}

struct OdrProblem<'a> {
    data: &'a FitData,
    sx: &'a [f64],
    model: FitModel,
    wavelength_nm: f64,
    params: DVector<f64>,
}

impl OdrProblem<'_> {
    fn beta(&self) -> &[f64] {
        &self.params.as_slice()[..FitModel::PARAM_LEN]
    }

    fn shifted_x(&self, i: usize) -> f64 {
        self.data.x[i] + self.params[FitModel::PARAM_LEN + i]
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for OdrProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let d = self.data;
        let n = d.len();
        let beta = self.beta();
        let r = DVector::from_fn(2 * n, |row, _| {
            if row < n {
                (beam_radius(self.model, self.shifted_x(row), beta, self.wavelength_nm) - d.y[row]) / d.sy[row]
            } else {
                let i = row - n;
                self.params[FitModel::PARAM_LEN + i] / self.sx[i]
            }
        });
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let d = self.data;
        let n = d.len();
        let p = FitModel::PARAM_LEN;
        let beta = self.beta();
        let mut j = DMatrix::zeros(2 * n, p + n);
        let mut row = [0.0; FitModel::PARAM_LEN];
        for i in 0..n {
            let x = self.shifted_x(i);
            fill_gradient(self.model, x, beta, self.wavelength_nm, &mut row);
            for (k, g) in row.iter().enumerate() {
                j[(i, k)] = g / d.sy[i];
            }
            j[(i, p + i)] = radius_slope(self.model, x, beta, self.wavelength_nm) / d.sy[i];
            j[(n + i, p + i)] = 1.0 / self.sx[i];
        }
        j.iter().all(|v| v.is_finite()).then_some(j)
    }
}

fn finish<P>(problem: P, report: levenberg_marquardt::MinimizationReport<f64>) -> Option<Solution>
where
    P: LeastSquaresProblem<
            f64,
            Dyn,
            Dyn,
            ParameterStorage = Owned<f64, Dyn>,
            ResidualStorage = Owned<f64, Dyn>,
            JacobianStorage = Owned<f64, Dyn, Dyn>,
        >,
{
    Some(Solution {
        params: problem.params(),
        residuals: problem.residuals()?,
        jacobian: problem.jacobian()?,
        evaluations: report.number_of_evaluations,
        success: report.termination.was_successful(),
        termination: format!("{:?}", report.termination),
    })
}

/// Weighted least squares from `initial`. `None` if the model is not finite
/// at the optimum.
pub fn solve_weighted(data: &FitData, model: FitModel, wavelength_nm: f64, initial: &[f64]) -> Option<Solution> {
    let problem = WeightedProblem {
        data,
        model,
        wavelength_nm,
        params: DVector::from_row_slice(initial),
    };
    let (problem, report) = solver().minimize(problem);
    finish(problem, report)
}

/// Orthogonal distance regression from `initial` with position errors `sx`.
///
/// Position corrections start at zero.
pub fn solve_odr(
    data: &FitData,
    sx: &[f64],
    model: FitModel,
    wavelength_nm: f64,
    initial: &[f64],
) -> Option<Solution> {
    let mut params = DVector::zeros(FitModel::PARAM_LEN + data.len());
    params.rows_mut(0, FitModel::PARAM_LEN).copy_from_slice(initial);
    let problem = OdrProblem {
        data,
        sx,
        model,
        wavelength_nm,
        params,
    };
    let (problem, report) = solver().minimize(problem);
    finish(problem, report)
}
