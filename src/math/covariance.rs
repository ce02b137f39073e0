//! Parameter covariance from a weighted Jacobian.
//!
//! After a nonlinear least-squares solve we linearize around the optimum:
//!
//! ```text
//! Cov(β) ≈ s² · (JᵀJ)⁻¹,    s² = Σ rᵢ² / (n - p)
//! ```
//!
//! where `J` and `r` are the Jacobian and residuals *already divided by the
//! per-point σ*. Scaling by the reduced chi-square `s²` makes the errors
//! reflect the observed scatter rather than trusting σ absolutely.
//!
//! `JᵀJ` can be close to singular when a parameter is poorly constrained (e.g.
//! a scan that never leaves the Rayleigh range), so we invert through an SVD
//! pseudo-inverse instead of a plain inverse, loosening the singular-value
//! cutoff until the result is finite.

use nalgebra::{DMatrix, DVector};

/// Covariance of the parameters and the residual variance `s²`.
#[derive(Debug, Clone)]
pub struct Covariance {
    pub matrix: DMatrix<f64>,
    pub residual_variance: f64,
}

impl Covariance {
    /// Standard errors of the first `k` parameters.
    pub fn std_errors(&self, k: usize) -> Vec<f64> {
        (0..k.min(self.matrix.nrows()))
            .map(|i| self.matrix[(i, i)].max(0.0).sqrt())
            .collect()
    }
}

/// Estimate the parameter covariance.
///
/// `dof` is the residual degrees of freedom (observations minus fitted model
/// parameters). For augmented problems such as ODR it is smaller than
/// `residuals.len() - jacobian.ncols()` would suggest.
/// Returns `None` when `dof` is zero or the normal matrix cannot be inverted.
pub fn covariance(jacobian: &DMatrix<f64>, residuals: &DVector<f64>, dof: usize) -> Option<Covariance> {
    if dof == 0 {
        return None;
    }

    let residual_variance = residuals.norm_squared() / dof as f64;
    let normal = jacobian.transpose() * jacobian;

    for &tol in &[1e-14, 1e-12, 1e-10] {
        let svd = normal.clone().svd(true, true);
        if let Ok(inv) = svd.pseudo_inverse(tol) {
            if inv.iter().all(|v| v.is_finite()) {
                return Some(Covariance {
                    matrix: inv * residual_variance,
                    residual_variance,
                });
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_line_errors_match_closed_form() {
        // y = a + b·x on x = [0, 1, 2, 3] with residuals [0.1, -0.1, -0.1, 0.1].
        let j = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let r = DVector::from_row_slice(&[0.1, -0.1, -0.1, 0.1]);

        let cov = covariance(&j, &r, 4 - 2).unwrap();
        let s2 = 0.04 / 2.0;
        assert!((cov.residual_variance - s2).abs() < 1e-15);

        // (JᵀJ)⁻¹ = [[0.7, -0.3], [-0.3, 0.2]] for this design.
        let se = cov.std_errors(2);
        assert!((se[0] - (0.7 * s2).sqrt()).abs() < 1e-12);
        assert!((se[1] - (0.2 * s2).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn no_spare_degrees_of_freedom() {
        let j = DMatrix::identity(2, 2);
        let r = DVector::zeros(2);
        assert!(covariance(&j, &r, 0).is_none());
    }
}
