//! Rayleigh-length search with the ITP (interpolate, truncate, project) method.
//!
//! The root of `f(x) = width(x) - √2 · width(center)` is one Rayleigh length
//! away from the waist. The search runs in two phases:
//!
//! 1. **Bounding**: walk from the center toward a travel limit in steps of one
//!    third of the remaining distance until `f > 0`. If the walk runs out of
//!    travel, retry once toward the opposite limit.
//! 2. **ITP**: shrink the bracket `[center, first hit]` with regula-falsi
//!    estimates that are truncated toward the midpoint and projected into a
//!    radius that keeps the bisection worst case (`n_max` iterations).
//!
//! Every probe position is rounded to a whole pulse.

use tracing::{debug, info, warn};

use crate::domain::{Axis, AxisPair, GOLDEN_RATIO};
use crate::error::{AppError, AppResult};
use crate::search::{Probe, midpoint};

/// Extra iterations tolerated past `n_max` before giving up on the bracket.
///
/// Integer rounding can cost a few iterations over the continuous bound.
const ITERATION_SLACK: u32 = 16;

/// Tuning for [`find_rayleigh_length`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItpOptions {
    /// Final bracket half-width, in pulses.
    pub precision: i64,
    /// Truncation scale `κ1`. `None` uses `0.2 / (x_b - x_a)` of the initial bracket.
    pub kappa1: Option<f64>,
    /// Truncation exponent `κ2 ∈ [1, 1 + φ)`.
    pub kappa2: f64,
    /// Slack iterations `n0` added to the bisection bound.
    pub n0: u32,
    /// Limit the bounding search walks toward first. Defaults to the upper travel limit.
    pub toward: Option<i64>,
}

impl Default for ItpOptions {
    fn default() -> Self {
        Self {
            precision: 10,
            kappa1: None,
            kappa2: GOLDEN_RATIO,
            n0: 1,
            toward: None,
        }
    }
}

/// Outcome of one Rayleigh-length search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayleighSearch {
    /// `|root - center|` in pulses.
    pub rayleigh_pulses: i64,
    /// Position where the width reaches √2 times the waist width.
    pub root: i64,
    pub iterations: u32,
    /// Bisection-equivalent iteration bound for the initial bracket.
    pub n_max: u32,
}

struct Objective<'a, P: ?Sized> {
    probe: &'a mut P,
    axis: Axis,
    target: f64,
}

impl<P: Probe + ?Sized> Objective<'_, P> {
    fn eval(&mut self, position: i64) -> AppResult<f64> {
        let width = *self.probe.measure(position, self.axis.into())?.get(self.axis);
        Ok(width - self.target)
    }
}

enum Bracket {
    /// `f(x) > 0` at `x`.
    Found { x: i64, y: f64 },
    /// `f(x) == 0` exactly.
    Root(i64),
}

fn bounding_search<P: Probe + ?Sized>(
    f: &mut Objective<'_, P>,
    center: i64,
    toward: i64,
    precision: i64,
) -> AppResult<Bracket> {
    let range = f.probe.travel_range();
    let (mut origin, mut bound) = (center, toward);
    let mut retries = 1;
    let mut failed = Vec::new();
    let mut step = 0;

    loop {
        step += 1;
        let x = (origin as f64 + (bound - origin) as f64 / 3.0).round() as i64;
        let y = f.eval(x)?;
        debug!(step, origin, bound, x, y, "bounding search");

        if y > 0.0 {
            return Ok(Bracket::Found { x, y });
        }
        if y == 0.0 {
            return Ok(Bracket::Root(x));
        }
        origin = x;

        if (bound - origin).abs() <= precision {
            failed.push(format!("[{center}, {bound}]"));
            if retries == 0 {
                return Err(AppError::StageOutOfRange(format!(
                    "no point beyond the Rayleigh length in {} (travel [{}, {}])",
                    failed.join(" or "),
                    range.lower,
                    range.upper
                )));
            }
            retries -= 1;
            warn!(center, bound, "no bracket toward this limit, trying the other side");
            origin = center;
            bound = if toward > center { range.lower } else { range.upper };
        }
    }
}

/// Find the Rayleigh length of `axis` around a known waist position.
///
/// # Errors
/// `StageOutOfRange` when neither travel direction reaches √2 times the waist
/// width.
pub fn find_rayleigh_length<P: Probe + ?Sized>(
    probe: &mut P,
    axis: Axis,
    center: i64,
    options: &ItpOptions,
) -> AppResult<RayleighSearch> {
    let precision = options.precision.max(1);
    let toward = options.toward.unwrap_or_else(|| probe.travel_range().upper);

    let waist = *probe.measure(center, axis.into())?.get(axis);
    let mut f = Objective {
        probe,
        axis,
        target: std::f64::consts::SQRT_2 * waist,
    };
    let y_center = waist - f.target;
    debug!(axis = axis.label(), center, waist, target = f.target, "rayleigh search");

    let (x, y) = match bounding_search(&mut f, center, toward, precision)? {
        Bracket::Found { x, y } => (x, y),
        Bracket::Root(root) => {
            return Ok(RayleighSearch {
                rayleigh_pulses: (root - center).abs(),
                root,
                iterations: 0,
                n_max: 0,
            });
        }
    };

    let (mut xa, mut ya, mut xb, mut yb) = if x > center {
        (center, y_center, x, y)
    } else {
        (x, y, center, y_center)
    };

    let eps = precision as f64;
    let initial_width = (xb - xa) as f64;
    let n_half = (initial_width / (2.0 * eps)).log2().ceil().max(0.0) as u32;
    let n_max = n_half + options.n0;
    let kappa1 = options.kappa1.unwrap_or(0.2 / initial_width);
    let kappa2 = options.kappa2;
    debug!(xa, xb, n_max, kappa1, kappa2, "itp start");

    let mut j: u32 = 0;
    while xb - xa > 2 * precision {
        if j >= n_max + ITERATION_SLACK {
            warn!(xa, xb, iterations = j, "ITP did not shrink the bracket to precision");
            break;
        }

        let width = (xb - xa) as f64;
        let x_half = (xa + xb) as f64 / 2.0;
        let r = (eps * 2f64.powi(n_max as i32 - j as i32) - width / 2.0).max(0.0);
        let delta = kappa1 * width.powf(kappa2);

        // Interpolate
        let mut x_f = (yb * xa as f64 - ya * xb as f64) / (yb - ya);
        if !x_f.is_finite() {
            x_f = x_half;
        }

        // Truncate
        let distance = x_half - x_f;
        let sigma = if distance >= 0.0 { 1.0 } else { -1.0 };
        let x_t = if delta <= distance.abs() {
            x_f + sigma * delta
        } else {
            x_half
        };

        // Project
        let x_itp = if (x_t - x_half).abs() <= r {
            x_t
        } else {
            x_half - sigma * r
        };
        let x_new = (x_itp.round() as i64).clamp(xa + 1, xb - 1);

        let y_new = f.eval(x_new)?;
        debug!(iteration = j + 1, xa, xb, x_f, x_t, x_new, y_new, "itp step");
        j += 1;

        let orientation = (yb - ya).signum();
        if y_new * orientation > 0.0 {
            xb = x_new;
            yb = y_new;
        } else if y_new * orientation < 0.0 {
            xa = x_new;
            ya = y_new;
        } else {
            xa = x_new;
            xb = x_new;
        }
    }

    let root = midpoint(xa, xb);
    let rayleigh_pulses = (root - center).abs();
    info!(axis = axis.label(), root, rayleigh_pulses, iterations = j, n_max, "rayleigh length found");
    Ok(RayleighSearch {
        rayleigh_pulses,
        root,
        iterations: j,
        n_max,
    })
}

/// Run [`find_rayleigh_length`] independently on both axes.
pub fn find_rayleigh_length_xy<P: Probe + ?Sized>(
    probe: &mut P,
    center: AxisPair<i64>,
    options: &ItpOptions,
) -> AppResult<AxisPair<RayleighSearch>> {
    let x = find_rayleigh_length(probe, Axis::X, center.x, options)?;
    let y = find_rayleigh_length(probe, Axis::Y, center.y, options)?;
    Ok(AxisPair::new(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::testing::{PulseBeam, SyntheticProbe};

    const ZR: f64 = 6867.6;

    fn beam(waist: f64, rayleigh: f64) -> PulseBeam {
        PulseBeam { waist, w0: 100.0, rayleigh }
    }

    fn options(precision: i64) -> ItpOptions {
        ItpOptions {
            precision,
            ..ItpOptions::default()
        }
    }

    #[test]
    fn finds_rayleigh_length_within_two_precisions() {
        for precision in [10, 100, 1000] {
            let mut probe = SyntheticProbe::new(beam(0.0, ZR));
            let found = find_rayleigh_length(&mut probe, Axis::X, 0, &options(precision)).unwrap();
            assert!(
                (found.rayleigh_pulses as f64 - ZR).abs() <= 2.0 * precision as f64,
                "precision {precision}: {found:?}"
            );
        }
    }

    #[test]
    fn stays_within_the_iteration_bound() {
        for precision in [1, 10, 100] {
            let mut probe = SyntheticProbe::new(beam(250.0, ZR));
            let found = find_rayleigh_length(&mut probe, Axis::X, 250, &options(precision)).unwrap();
            assert!(found.iterations <= found.n_max + 2, "{found:?}");
        }
    }

    #[test]
    fn pure_regula_falsi_also_converges() {
        let mut probe = SyntheticProbe::new(beam(0.0, ZR));
        let opts = ItpOptions {
            kappa1: Some(0.0),
            ..options(10)
        };
        let found = find_rayleigh_length(&mut probe, Axis::Y, 0, &opts).unwrap();
        assert!((found.rayleigh_pulses as f64 - ZR).abs() <= 20.0);
    }

    #[test]
    fn searches_toward_the_requested_limit() {
        let mut probe = SyntheticProbe::new(beam(0.0, ZR));
        let opts = ItpOptions {
            toward: Some(-50_278),
            ..options(10)
        };
        let found = find_rayleigh_length(&mut probe, Axis::X, 0, &opts).unwrap();
        assert!(found.root < 0);
        assert!((found.rayleigh_pulses as f64 - ZR).abs() <= 20.0);
    }

    #[test]
    fn retries_toward_the_opposite_limit() {
        // The waist sits closer to the upper limit than one Rayleigh length.
        let mut probe = SyntheticProbe::new(beam(46_000.0, ZR));
        let found = find_rayleigh_length(&mut probe, Axis::X, 46_000, &options(10)).unwrap();
        assert!(found.root < 46_000);
        assert!((found.rayleigh_pulses as f64 - ZR).abs() <= 20.0);
    }

    #[test]
    fn fails_when_no_bracket_fits() {
        let mut probe = SyntheticProbe::new(beam(0.0, 1.0e6));
        let err = find_rayleigh_length(&mut probe, Axis::X, 0, &options(10)).unwrap_err();
        assert!(matches!(err, AppError::StageOutOfRange(_)));
        assert!(err.to_string().contains("-50278"));
    }

    #[test]
    fn axes_are_searched_independently() {
        let beams = AxisPair::new(beam(0.0, ZR), beam(100.0, 2.0 * ZR));
        let mut probe = SyntheticProbe::with_beams(beams);
        let found = find_rayleigh_length_xy(&mut probe, AxisPair::new(0, 100), &options(10)).unwrap();
        assert!((found.x.rayleigh_pulses as f64 - ZR).abs() <= 20.0);
        assert!((found.y.rayleigh_pulses as f64 - 2.0 * ZR).abs() <= 20.0);
    }
}
