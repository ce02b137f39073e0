//! Ternary search for the beam waist.
//!
//! The width along the optical axis is unimodal, so comparing two interior
//! third points tells which outer third cannot hold the minimum.
//!
//! The coupled variant exploits that every probe reads both transverse axes:
//! X and Y keep separate brackets that are both narrowed from the same pair of
//! moves while the front of the queue drives the probe positions.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::domain::{Axis, AxisPair, AxisSelection};
use crate::error::AppResult;
use crate::search::{Probe, midpoint};

/// Smallest bracket width the integer search can shrink below.
const MIN_PRECISION: i64 = 2;

fn clamp_precision(precision: i64) -> i64 {
    if precision < MIN_PRECISION {
        warn!(precision, "precision too small, using {MIN_PRECISION}");
        MIN_PRECISION
    } else {
        precision
    }
}

/// Interior third points of `[left, right]`, rounded to whole pulses.
fn thirds(left: i64, right: i64) -> (i64, i64) {
    let third = (right - left) as f64 / 3.0;
    (
        (left as f64 + third).round() as i64,
        (right as f64 - third).round() as i64,
    )
}

fn search_bounds<P: Probe + ?Sized>(probe: &mut P, bounds: Option<(i64, i64)>) -> AppResult<(i64, i64)> {
    match bounds {
        Some(b) => Ok(b),
        None => {
            if !probe.is_ranged() {
                info!("stage not ranged, finding travel range before the center search");
                probe.find_travel_range()?;
            }
            let range = probe.travel_range();
            Ok((range.lower, range.upper))
        }
    }
}

/// Locate the waist on one axis to within `precision` pulses.
///
/// `bounds` defaults to the stage travel range.
pub fn find_center<P: Probe + ?Sized>(
    probe: &mut P,
    axis: Axis,
    precision: i64,
    bounds: Option<(i64, i64)>,
) -> AppResult<i64> {
    let precision = clamp_precision(precision);
    let (mut left, mut right) = search_bounds(probe, bounds)?;

    let mut step = 0;
    while (right - left).abs() >= precision {
        step += 1;
        let (left_third, right_third) = thirds(left, right);
        let l = *probe.measure(left_third, axis.into())?.get(axis);
        let r = *probe.measure(right_third, axis.into())?.get(axis);
        debug!(step, left, right, left_third, right_third, l, r, "ternary step");

        if l > r {
            left = left_third;
        } else {
            right = right_third;
        }
    }

    let center = midpoint(left, right);
    info!(axis = axis.label(), center, "center found");
    Ok(center)
}

/// Locate the X and Y waists together.
///
/// Axes are processed from a queue `[X, Y]`. The axis at the front picks the
/// probe positions; every axis still in the queue narrows its own bracket from
/// the resulting widths. An axis leaves the queue once its bracket is no wider
/// than `precision`. A passive axis only ever narrows: an update that would
/// cross its other bound is skipped.
pub fn find_center_xy<P: Probe + ?Sized>(
    probe: &mut P,
    precision: i64,
    bounds: Option<AxisPair<(i64, i64)>>,
) -> AppResult<AxisPair<i64>> {
    let precision = clamp_precision(precision);
    let mut brackets = match bounds {
        Some(b) => b,
        None => AxisPair::splat(search_bounds(probe, None)?),
    };

    let mut remaining: VecDeque<Axis> = Axis::BOTH.into_iter().collect();
    let mut step = 0;

    while let Some(&driving) = remaining.front() {
        step += 1;
        let (left, right) = *brackets.get(driving);
        let (left_third, right_third) = thirds(left, right);
        let l = probe.measure(left_third, AxisSelection::Both)?;
        let r = probe.measure(right_third, AxisSelection::Both)?;
        debug!(step, driving = driving.label(), left_third, right_third, ?l, ?r, "coupled ternary step");

        for &axis in &remaining {
            let (lo, hi) = brackets.get_mut(axis);
            let move_left = l.get(axis) > r.get(axis);
            if axis == driving {
                if move_left {
                    *lo = left_third;
                } else {
                    *hi = right_third;
                }
            } else if move_left {
                if left_third > *lo && left_third < *hi {
                    *lo = left_third;
                }
            } else if right_third < *hi && right_third > *lo {
                *hi = right_third;
            }
        }

        while let Some(&axis) = remaining.front() {
            let (lo, hi) = *brackets.get(axis);
            if (hi - lo).abs() > precision {
                break;
            }
            debug!(axis = axis.label(), lo, hi, "axis converged");
            remaining.pop_front();
        }
    }

    let center = brackets.map(|_, (lo, hi)| midpoint(lo, hi));
    info!(x = center.x, y = center.y, "center found");
    Ok(center)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::testing::{PulseBeam, SyntheticProbe};

    fn beam(waist: f64) -> PulseBeam {
        PulseBeam {
            waist,
            w0: 100.0,
            rayleigh: 6868.0,
        }
    }

    #[test]
    fn converges_within_precision() {
        for precision in [10, 100, 1000] {
            let mut probe = SyntheticProbe::new(beam(1234.0));
            let center = find_center(&mut probe, Axis::X, precision, None).unwrap();
            assert!((center - 1234).abs() <= precision, "precision {precision}: {center}");
        }
    }

    #[test]
    fn respects_explicit_bounds() {
        let mut probe = SyntheticProbe::new(beam(-700.0));
        let center = find_center(&mut probe, Axis::Y, 10, Some((-2000, 3000))).unwrap();
        assert!((center + 700).abs() <= 10);
        assert!(probe.visited.iter().all(|p| (-2000..=3000).contains(p)));
    }

    #[test]
    fn tiny_precision_still_terminates() {
        let mut probe = SyntheticProbe::new(beam(17.0));
        let center = find_center(&mut probe, Axis::X, 0, Some((0, 40))).unwrap();
        assert!((center - 17).abs() <= 2);
    }

    #[test]
    fn ranges_the_stage_first_when_needed() {
        let mut probe = SyntheticProbe::new(beam(0.0));
        probe.ranged = false;
        find_center(&mut probe, Axis::X, 100, None).unwrap();
        assert!(probe.ranged);
    }

    #[test]
    fn coupled_search_finds_both_waists() {
        for precision in [10, 100] {
            let beams = AxisPair::new(beam(1234.0), beam(1434.0));
            let mut probe = SyntheticProbe::with_beams(beams);
            let center = find_center_xy(&mut probe, precision, None).unwrap();
            assert!((center.x - 1234).abs() <= precision, "x: {}", center.x);
            assert!((center.y - 1434).abs() <= precision, "y: {}", center.y);
        }
    }

    #[test]
    fn coupled_search_is_cheaper_than_two_searches() {
        let beams = AxisPair::new(beam(-3000.0), beam(-2900.0));

        let mut coupled = SyntheticProbe::with_beams(beams);
        find_center_xy(&mut coupled, 10, None).unwrap();

        let mut separate = SyntheticProbe::with_beams(beams);
        find_center(&mut separate, Axis::X, 10, None).unwrap();
        find_center(&mut separate, Axis::Y, 10, None).unwrap();

        assert!(coupled.calls < separate.calls, "{} vs {}", coupled.calls, separate.calls);
    }
}
