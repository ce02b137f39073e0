//! Shared domain types.
//!
//! Units are fixed across the crate:
//!
//! - stage positions are integer actuator **pulses** (`i64`)
//! - positions handed to the fitter are **millimetres**
//! - beam diameters and radii are **micrometres**
//! - wavelengths are **nanometres**
//!
//! With these units `M²·λ / (π·w0²)` is dimensionally consistent (nm / µm² = 1/mm),
//! so the model functions need no conversion constants.

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// `(1 + √5) / 2`, the default ITP truncation exponent.
pub const GOLDEN_RATIO: f64 = 1.618_033_988_749_895;

/// A single transverse beam axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub const BOTH: [Axis; 2] = [Axis::X, Axis::Y];

    pub fn label(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
        }
    }
}

/// Axes requested from a sampler or search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AxisSelection {
    X,
    Y,
    #[default]
    Both,
}

impl AxisSelection {
    pub fn axes(self) -> &'static [Axis] {
        match self {
            AxisSelection::X => &[Axis::X],
            AxisSelection::Y => &[Axis::Y],
            AxisSelection::Both => &Axis::BOTH,
        }
    }

    pub fn contains(self, axis: Axis) -> bool {
        self.axes().contains(&axis)
    }
}

impl From<Axis> for AxisSelection {
    fn from(axis: Axis) -> Self {
        match axis {
            Axis::X => AxisSelection::X,
            Axis::Y => AxisSelection::Y,
        }
    }
}

/// One value per transverse axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisPair<T> {
    pub x: T,
    pub y: T,
}

impl<T> AxisPair<T> {
    pub fn new(x: T, y: T) -> Self {
        Self { x, y }
    }

    pub fn get(&self, axis: Axis) -> &T {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
        }
    }

    pub fn get_mut(&mut self, axis: Axis) -> &mut T {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(Axis, T) -> U) -> AxisPair<U> {
        AxisPair {
            x: f(Axis::X, self.x),
            y: f(Axis::Y, self.y),
        }
    }
}

impl<T: Clone> AxisPair<T> {
    pub fn splat(value: T) -> Self {
        Self {
            x: value.clone(),
            y: value,
        }
    }
}

/// Mean and population standard deviation of a set of width readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WidthStat {
    pub mean: f64,
    pub std_dev: f64,
}

/// One averaged measurement for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub position_mm: f64,
    pub mean_um: f64,
    pub std_um: f64,
}

/// One row of a scan: a stage position and the averaged diameter on each axis.
///
/// An axis that was not measured is `None` and is written as `nan`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanRow {
    pub position_mm: f64,
    pub x: Option<WidthStat>,
    pub y: Option<WidthStat>,
}

impl ScanRow {
    pub fn width(&self, axis: Axis) -> Option<WidthStat> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }
}

/// Averaged scan results, kept sorted by position with unique positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanDataset {
    rows: Vec<ScanRow>,
}

impl ScanDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row, replacing any existing row at the same position.
    pub fn insert(&mut self, row: ScanRow) {
        match self
            .rows
            .binary_search_by(|r| r.position_mm.total_cmp(&row.position_mm))
        {
            Ok(idx) => self.rows[idx] = row,
            Err(idx) => self.rows.insert(idx, row),
        }
    }

    pub fn rows(&self) -> &[ScanRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Samples for one axis, skipping rows where that axis was not measured.
    pub fn samples(&self, axis: Axis) -> Vec<Sample> {
        self.rows
            .iter()
            .filter_map(|r| {
                r.width(axis).map(|w| Sample {
                    position_mm: r.position_mm,
                    mean_um: w.mean,
                    std_um: w.std_dev,
                })
            })
            .collect()
    }

    /// Axes with at least one measured row.
    pub fn measured_axes(&self) -> Vec<Axis> {
        Axis::BOTH
            .into_iter()
            .filter(|&a| self.rows.iter().any(|r| r.width(a).is_some()))
            .collect()
    }
}

impl FromIterator<ScanRow> for ScanDataset {
    fn from_iter<I: IntoIterator<Item = ScanRow>>(iter: I) -> Self {
        let mut ds = ScanDataset::new();
        for row in iter {
            ds.insert(row);
        }
        ds
    }
}

/// Inclusive travel limits of the stage, in pulses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelRange {
    pub lower: i64,
    pub upper: i64,
}

impl TravelRange {
    pub fn new(lower: i64, upper: i64) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, position: i64) -> bool {
        (self.lower..=self.upper).contains(&position)
    }

    /// True when `position` keeps at least `margin` pulses to both limits.
    pub fn contains_with_margin(&self, position: i64, margin: i64) -> bool {
        position >= self.lower + margin && position <= self.upper - margin
    }

    pub fn span(&self) -> i64 {
        self.upper - self.lower
    }
}

/// Length of the reference 200 mm translation stage.
pub const REFERENCE_TRAVEL_MM: f64 = 200.0;
/// Pulses between the end stops of the reference stage.
pub const REFERENCE_PULSE_RANGE: i64 = 100_557;

/// Conversion between actuator pulses and physical distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseCalibration {
    pub um_per_pulse: f64,
}

impl PulseCalibration {
    /// Calibration of the reference stage.
    pub fn reference() -> Self {
        Self::from_travel(REFERENCE_TRAVEL_MM, REFERENCE_PULSE_RANGE)
    }

    /// Calibration derived from a measured pulse span over a known travel length.
    pub fn from_travel(travel_mm: f64, pulse_span: i64) -> Self {
        Self {
            um_per_pulse: travel_mm * 1000.0 / pulse_span as f64,
        }
    }

    pub fn pulse_to_um(&self, pulses: f64) -> f64 {
        pulses * self.um_per_pulse
    }

    pub fn um_to_pulse(&self, um: f64) -> f64 {
        um / self.um_per_pulse
    }

    pub fn um_to_pulse_rounded(&self, um: f64) -> i64 {
        self.um_to_pulse(um).round() as i64
    }

    pub fn pulse_to_mm(&self, pulses: i64) -> f64 {
        self.pulse_to_um(pulses as f64) / 1000.0
    }

    pub fn mm_to_pulse(&self, mm: f64) -> i64 {
        self.um_to_pulse_rounded(mm * 1000.0)
    }
}

/// Wavelength with its uncertainty, in nm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wavelength {
    pub nm: f64,
    pub error_nm: f64,
}

impl Wavelength {
    pub fn new(nm: f64, error_nm: f64) -> Self {
        Self { nm, error_nm }
    }
}

/// Post-processing applied to the single readings taken at one position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OutlierMode {
    #[default]
    None,
    /// Drop the largest `fraction` of the readings.
    TrimTop { fraction: f64 },
    /// Remove prominent peaks; thresholds `≤ 1` are a fraction of the mean.
    Spikes { threshold: f64 },
}

impl OutlierMode {
    pub const TRIM_TOP_10: OutlierMode = OutlierMode::TrimTop { fraction: 0.1 };

    pub fn label(&self) -> String {
        match self {
            OutlierMode::None => "none".to_string(),
            OutlierMode::TrimTop { fraction } => format!("trim top {:.0}%", fraction * 100.0),
            OutlierMode::Spikes { .. } => "remove spikes".to_string(),
        }
    }
}

/// Beam-radius parameterization used by the fit engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FitModel {
    /// `[w0, z0, M²λ]`; M² is recovered by dividing out λ.
    M2Lambda,
    /// `[w0, z0, M²]` with λ fixed inside the model.
    M2,
    /// ISO 11146-1 quadratic `d(z) = 0.5·sqrt(a + b·z + c·z²)`, parameters `[a, b, c]`.
    Iso,
}

impl FitModel {
    pub const PARAM_LEN: usize = 3;

    pub fn param_names(self) -> [&'static str; 3] {
        match self {
            FitModel::M2Lambda => ["w0[um]", "z0[mm]", "M2*lambda[nm]"],
            FitModel::M2 => ["w0[um]", "z0[mm]", "M2"],
            FitModel::Iso => ["a", "b", "c"],
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            FitModel::M2Lambda => "M2*lambda",
            FitModel::M2 => "M2",
            FitModel::Iso => "ISO 11146",
        }
    }
}

/// Solver used to fit a beam model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FitBackend {
    /// Weighted least squares; positions are taken as exact.
    LeastSquares,
    /// Orthogonal distance regression with a position error in mm.
    ///
    /// `None` means one actuator pulse, converted by the caller.
    Odr { x_error_mm: Option<f64> },
}

impl FitBackend {
    pub fn label(&self) -> &'static str {
        match self {
            FitBackend::LeastSquares => "least squares",
            FitBackend::Odr { .. } => "ODR",
        }
    }
}

/// Knobs for a full caustic measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    pub axis: AxisSelection,
    /// Search precision in pulses.
    pub precision: i64,
    /// Readings averaged at each scan position.
    pub samples_per_point: usize,
    /// Readings averaged at each probe during center and Rayleigh-length searches.
    pub search_samples: usize,
    /// Leading readings discarded at each position.
    pub warm_up: usize,
    pub outliers: OutlierMode,
    /// Known waist position in pulses; skips the center search.
    pub center: Option<AxisPair<i64>>,
    /// Known Rayleigh length in mm; skips the root finder.
    pub rayleigh_mm: Option<AxisPair<f64>>,
    /// ITP truncation scale; `None` scales it to the initial bracket.
    pub itp_kappa1: Option<f64>,
    pub itp_kappa2: f64,
    pub itp_n0: u32,
    /// Write every single reading to a `.raw.log` companion file.
    pub raw_log: bool,
    pub output: PathBuf,
    /// Extra `key: value` lines for the data file header.
    pub metadata: Vec<(String, String)>,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            axis: AxisSelection::Both,
            precision: 100,
            samples_per_point: 50,
            search_samples: 10,
            warm_up: 10,
            outliers: OutlierMode::None,
            center: None,
            rayleigh_mm: None,
            itp_kappa1: None,
            itp_kappa2: GOLDEN_RATIO,
            itp_n0: 1,
            raw_log: false,
            output: PathBuf::from("caustic.dat"),
            metadata: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(mean: f64) -> Option<WidthStat> {
        Some(WidthStat { mean, std_dev: 0.0 })
    }

    #[test]
    fn dataset_stays_sorted_and_unique() {
        let mut ds = ScanDataset::new();
        for p in [3.0, -1.0, 2.0, -1.0] {
            ds.insert(ScanRow {
                position_mm: p,
                x: stat(p * 10.0),
                y: None,
            });
        }
        let positions: Vec<f64> = ds.rows().iter().map(|r| r.position_mm).collect();
        assert_eq!(positions, vec![-1.0, 2.0, 3.0]);
        assert_eq!(ds.samples(Axis::X).len(), 3);
        assert!(ds.samples(Axis::Y).is_empty());
        assert_eq!(ds.measured_axes(), vec![Axis::X]);
    }

    #[test]
    fn calibration_round_trips_pulses() {
        let cal = PulseCalibration::from_travel(200.0, 100_557);
        assert!((cal.um_per_pulse - 1.988_921_705_699_255).abs() < 1e-9);
        assert_eq!(cal.mm_to_pulse(cal.pulse_to_mm(6868)), 6868);
    }

    #[test]
    fn travel_margin_is_inclusive() {
        let travel = TravelRange::new(-100, 100);
        assert!(travel.contains_with_margin(90, 10));
        assert!(!travel.contains_with_margin(91, 10));
        assert!(travel.contains_with_margin(-90, 10));
    }
}
