//! Command-line parsing for the `m2` caustic tool.
//!
//! Argument parsing and command dispatch stay separate from the measurement
//! and fitting code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::domain::{AxisSelection, FitBackend, FitModel, OutlierMode};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "m2", version, about = "M² beam-quality measurement on a translation stage")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a full closed-loop scan on the simulated bench, then fit it.
    Simulate(SimulateArgs),
    /// Fit a previously written data file.
    Fit(FitArgs),
}

/// Outlier handling selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutlierChoice {
    None,
    /// Drop the largest 10% of readings.
    TrimTop,
    /// Remove prominent spikes (see `--threshold`).
    Spikes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    /// Weighted least squares.
    Wls,
    /// Orthogonal distance regression.
    Odr,
}

/// Fit options shared by both subcommands.
#[derive(Debug, Args, Clone)]
pub struct FitOptions {
    #[arg(long, value_enum, default_value_t = FitModel::M2)]
    pub model: FitModel,

    #[arg(long, value_enum, default_value_t = BackendChoice::Odr)]
    pub backend: BackendChoice,

    /// Position error in mm for ODR (default: one actuator pulse).
    #[arg(long)]
    pub x_error: Option<f64>,

    /// Wavelength uncertainty in nm.
    #[arg(long, default_value_t = 0.0)]
    pub wavelength_error: f64,

    /// Export the fit (parameters, M², fitted grid) to JSON.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Show the N largest residuals per axis.
    #[arg(long, default_value_t = 0)]
    pub residuals: usize,
}

impl FitOptions {
    pub fn backend(&self) -> FitBackend {
        match self.backend {
            BackendChoice::Wls => FitBackend::LeastSquares,
            BackendChoice::Odr => FitBackend::Odr {
                x_error_mm: self.x_error,
            },
        }
    }
}

#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Axes to search and fit.
    #[arg(long, value_enum, default_value_t = AxisSelection::Both)]
    pub axis: AxisSelection,

    /// Search precision in pulses.
    #[arg(short = 'p', long, default_value_t = 100)]
    pub precision: i64,

    /// Readings averaged per scan point.
    #[arg(short = 'n', long, default_value_t = 50)]
    pub samples: usize,

    /// Readings averaged per search probe.
    #[arg(long, default_value_t = 10)]
    pub search_samples: usize,

    /// Leading readings discarded after each move.
    #[arg(long, default_value_t = 10)]
    pub warm_up: usize,

    #[arg(long, value_enum, default_value_t = OutlierChoice::None)]
    pub outliers: OutlierChoice,

    /// Spike threshold; values ≤ 1 are a fraction of the mean.
    #[arg(long, default_value_t = 0.2)]
    pub threshold: f64,

    /// Known Rayleigh length in mm; skips the root finder.
    #[arg(long)]
    pub rayleigh: Option<f64>,

    /// Data file to write.
    #[arg(short = 'o', long, default_value = "caustic.dat")]
    pub output: PathBuf,

    /// Also write every single reading to `<output>.raw.log`.
    #[arg(long)]
    pub raw_log: bool,

    /// Gaussian sensor noise in µm (0 disables it).
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// `M²` of the simulated beam.
    #[arg(long, default_value_t = 1.0)]
    pub beam_m2: f64,

    /// Wavelength of the simulated beam in nm.
    #[arg(long, default_value_t = 2300.0)]
    pub wavelength: f64,

    #[command(flatten)]
    pub fit: FitOptions,
}

impl SimulateArgs {
    pub fn outlier_mode(&self) -> OutlierMode {
        match self.outliers {
            OutlierChoice::None => OutlierMode::None,
            OutlierChoice::TrimTop => OutlierMode::TRIM_TOP_10,
            OutlierChoice::Spikes => OutlierMode::Spikes {
                threshold: self.threshold,
            },
        }
    }
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Data file written by `m2 simulate` or a bench run.
    #[arg(short = 'd', long)]
    pub data: PathBuf,

    /// Wavelength in nm.
    #[arg(short = 'w', long)]
    pub wavelength: f64,

    #[command(flatten)]
    pub fit: FitOptions,
}
