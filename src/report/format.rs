//! Formatted terminal output for fitted caustics.
//!
//! Formatting lives here so the fitting code stays free of presentation.

use crate::domain::{Axis, AxisPair};
use crate::error::AppResult;
use crate::fit::{BeamFitter, FitStatus};
use crate::report::{SampleResidual, compute_residuals, largest_residuals};

/// Format the fit summary of every fitted axis.
pub fn format_fit_summary(fits: &AxisPair<Option<BeamFitter>>) -> AppResult<String> {
    let mut out = String::new();
    out.push_str("=== m2 - Caustic Fit ===\n");

    let mut first = true;
    for axis in Axis::BOTH {
        let Some(fitter) = fits.get(axis) else {
            continue;
        };
        let Some(result) = fitter.result() else {
            continue;
        };
        let settings = fitter.settings();
        if first {
            out.push_str(&format!(
                "Wavelength: {} nm (± {} nm) | backend: {}\n",
                settings.wavelength.nm,
                settings.wavelength.error_nm,
                settings.backend.label()
            ));
            first = false;
        }

        let m2 = fitter.m_squared()?;
        out.push_str(&format!(
            "\n{} axis ({} samples, model {}):\n",
            axis.label(),
            fitter.samples().len(),
            result.model.display_name()
        ));
        out.push_str(&format!("  M2 = {:.4} ± {:.4}\n", m2.value, m2.std_error));
        for ((name, value), error) in result
            .model
            .param_names()
            .iter()
            .zip(result.params)
            .zip(result.std_errors)
        {
            out.push_str(&format!("  {name:<14} {value:>14.6} ± {error:.6}\n"));
        }
        out.push_str(&format!(
            "  status: {} | evaluations: {} | chi2: {:.4}\n",
            fmt_status(&result.status),
            result.evaluations,
            result.chi_squared
        ));
    }

    if first {
        out.push_str("No fitted axis.\n");
    }
    Ok(out)
}

/// Format the largest residuals of one axis as a table.
pub fn format_residuals(fitter: &BeamFitter, top_n: usize) -> AppResult<String> {
    let residuals = compute_residuals(fitter)?;
    Ok(format_table(&largest_residuals(&residuals, top_n)))
}

fn format_table(rows: &[SampleResidual]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:>12} {:>12} {:>12} {:>12}\n",
        "z[mm]", "d[um]", "d_fit[um]", "resid[um]"
    ));
    out.push_str(&format!("{:-<12} {:-<12} {:-<12} {:-<12}\n", "", "", "", ""));
    for r in rows {
        out.push_str(&format!(
            "{:>12.4} {:>12.3} {:>12.3} {:>12.3}\n",
            r.sample.position_mm, r.sample.mean_um, r.fitted_um, r.residual_um
        ));
    }
    out
}

fn fmt_status(status: &FitStatus) -> String {
    match status {
        FitStatus::Converged => "converged".to_string(),
        FitStatus::Marginal { reasons } => format!("marginal ({reasons})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::fitted;

    #[test]
    fn summary_lists_each_fitted_axis() {
        let fits = AxisPair::new(Some(fitted(None)), None);
        let text = format_fit_summary(&fits).unwrap();
        assert!(text.contains("Wavelength: 2300 nm"), "{text}");
        assert!(text.contains("x axis (21 samples, model M2)"), "{text}");
        assert!(text.contains("M2 = 1.0000"), "{text}");
        assert!(text.contains("status: converged"), "{text}");
        assert!(!text.contains("y axis"));
    }

    #[test]
    fn empty_summary_says_so() {
        let fits: AxisPair<Option<BeamFitter>> = AxisPair::new(None, None);
        assert!(format_fit_summary(&fits).unwrap().contains("No fitted axis."));
    }

    #[test]
    fn residual_table_has_header_and_rows() {
        let text = format_residuals(&fitted(Some(-2)), 3).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("resid[um]"));
        assert!(lines[2].trim_start().starts_with("-8.0000"), "{text}");
    }
}
