//! Closed-loop caustic measurement.
//!
//! The orchestrator ties the instruments to the searches, the planner and the
//! data file. The free functions below are the first-order Gaussian-beam
//! estimates used to pick a Rayleigh length before any search has run.

pub mod cancel;
pub mod orchestrator;

pub use cancel::CancellationToken;
pub use orchestrator::*;

use std::f64::consts::PI;

/// Rayleigh length in mm of a beam with waist radius `w0_um` (µm) at
/// `wavelength_nm` (nm).
///
/// `π·w0² / (M²·λ)` comes out in mm with these units.
pub fn rayleigh_length_mm(w0_um: f64, wavelength_nm: f64, m2: f64) -> f64 {
    PI * w0_um * w0_um / (m2 * wavelength_nm)
}

/// Waist radius in µm behind a lens of focal length `focal_length_mm` for a
/// collimated beam of diameter `diam_at_lens_mm`.
pub fn beam_waist_radius_um(diam_at_lens_mm: f64, focal_length_mm: f64, wavelength_nm: f64, m2: f64) -> f64 {
    2.0 * m2 * wavelength_nm * focal_length_mm / (PI * diam_at_lens_mm) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_beam_rayleigh_length() {
        assert!((rayleigh_length_mm(100.0, 2300.0, 1.0) - 13.659_098_49).abs() < 1e-8);
        assert!((rayleigh_length_mm(100.0, 2300.0, 2.0) - 13.659_098_49 / 2.0).abs() < 1e-8);
    }

    #[test]
    fn focused_waist() {
        // 2·1064 nm·100 mm / (π·5 mm) = 13.547 µm
        let w0 = beam_waist_radius_um(5.0, 100.0, 1064.0, 1.0);
        assert!((w0 - 13.547_269).abs() < 1e-6, "{w0}");
        assert!((beam_waist_radius_um(5.0, 100.0, 1064.0, 1.5) / w0 - 1.5).abs() < 1e-12);
    }
}
