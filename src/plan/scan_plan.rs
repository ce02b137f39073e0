//! Scan positions from a waist estimate.
//!
//! A caustic scan needs about half its points within one Rayleigh length of
//! the waist and half beyond two Rayleigh lengths. Per axis the plan takes
//!
//! - 10 points evenly spread over `[-zR, zR]`
//! - 5 points over `[2zR, 3zR]`, mirrored to the negative side
//! - the center itself
//!
//! Points from all axes are merged, deduplicated and sorted. If any point comes
//! within [`LIMIT_MARGIN`] pulses of a travel limit, the planner falls back to a
//! one-sided layout (10 far points on the positive side), then to the same
//! layout mirrored about the center, before giving up.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::TravelRange;
use crate::error::{AppError, AppResult};

/// Points must keep this many pulses to each travel limit.
pub const LIMIT_MARGIN: i64 = 10;

const NEAR_POINTS: usize = 10;
const FAR_POINTS: usize = 5;
const FAR_POINTS_ONE_SIDED: usize = 10;

/// Waist position and Rayleigh length of one axis, in pulses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaistEstimate {
    pub center: i64,
    pub rayleigh: i64,
}

/// Layout that made it onto the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanGeometry {
    Symmetric,
    Asymmetric,
    InvertedAsymmetric,
}

impl fmt::Display for ScanGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanGeometry::Symmetric => "symmetric",
            ScanGeometry::Asymmetric => "asymmetric",
            ScanGeometry::InvertedAsymmetric => "inverted asymmetric",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPlan {
    /// Stage positions in pulses, ascending and unique.
    pub points: Vec<i64>,
    pub geometry: ScanGeometry,
}

/// `num` evenly spaced values over `[start, stop]`, truncated to whole pulses.
fn linspace(start: f64, stop: f64, num: usize) -> impl Iterator<Item = i64> {
    let step = if num > 1 { (stop - start) / (num - 1) as f64 } else { 0.0 };
    (0..num).map(move |i| {
        let v = if i + 1 == num { stop } else { start + step * i as f64 };
        v as i64
    })
}

/// Offsets from the center for one axis.
fn offsets(rayleigh: i64, geometry: ScanGeometry) -> Vec<i64> {
    let zr = rayleigh as f64;
    let mut out: Vec<i64> = linspace(-zr, zr, NEAR_POINTS).collect();
    out.push(0);
    match geometry {
        ScanGeometry::Symmetric => {
            let far: Vec<i64> = linspace(2.0 * zr, 3.0 * zr, FAR_POINTS).collect();
            out.extend(far.iter().map(|p| -p));
            out.extend(far);
        }
        ScanGeometry::Asymmetric => out.extend(linspace(2.0 * zr, 3.0 * zr, FAR_POINTS_ONE_SIDED)),
        ScanGeometry::InvertedAsymmetric => {
            out = offsets(rayleigh, ScanGeometry::Asymmetric).into_iter().map(|p| -p).collect();
        }
    }
    out
}

fn layout(estimates: &[WaistEstimate], geometry: ScanGeometry) -> Vec<i64> {
    let points: BTreeSet<i64> = estimates
        .iter()
        .flat_map(|e| offsets(e.rayleigh, geometry).into_iter().map(move |o| e.center + o))
        .collect();
    points.into_iter().collect()
}

fn fits(points: &[i64], travel: TravelRange) -> bool {
    points.iter().all(|&p| travel.contains_with_margin(p, LIMIT_MARGIN))
}

/// Plan the scan positions for the measured axes.
///
/// # Errors
/// `InvalidInput` for an empty estimate list or a non-positive Rayleigh length;
/// `Configuration` when no layout fits inside `travel`.
pub fn plan_scan(estimates: &[WaistEstimate], travel: TravelRange) -> AppResult<ScanPlan> {
    if estimates.is_empty() {
        return Err(AppError::InvalidInput("no axis to plan a scan for".into()));
    }
    if let Some(bad) = estimates.iter().find(|e| e.rayleigh <= 0) {
        return Err(AppError::InvalidInput(format!(
            "Rayleigh length must be positive, got {} pulses",
            bad.rayleigh
        )));
    }

    let mut last = Vec::new();
    for geometry in [
        ScanGeometry::Symmetric,
        ScanGeometry::Asymmetric,
        ScanGeometry::InvertedAsymmetric,
    ] {
        let points = layout(estimates, geometry);
        if fits(&points, travel) {
            info!(%geometry, points = points.len(), "scan planned");
            debug!(?points, "scan positions");
            return Ok(ScanPlan { points, geometry });
        }
        debug!(%geometry, first = ?points.first(), last = ?points.last(), "layout does not fit the travel range");
        last = points;
    }

    Err(AppError::Configuration(format!(
        "the travel range of the stage does not support the scan: travel [{}, {}], points [{}, {}]",
        travel.lower,
        travel.upper,
        last.first().copied().unwrap_or_default(),
        last.last().copied().unwrap_or_default()
    )))
}
