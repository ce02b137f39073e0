//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the "real main" that:
//! - installs the log subscriber
//! - parses CLI arguments
//! - runs a simulated scan or loads a data file
//! - fits both axes and prints the summary
//! - writes the optional JSON report

use std::path::Path;

use chrono::Local;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, FitArgs, FitOptions, SimulateArgs};
use crate::domain::{Axis, AxisPair, MeasurementConfig, ScanDataset, Wavelength};
use crate::error::{AppError, AppResult};
use crate::fit::{BeamFitter, FitSettings, fit_axes};
use crate::hardware::LinearStage;
use crate::hardware::sim::{SIM_Y_OFFSET_PULSES, SimulatedBeam, SimulatedProfiler, SimulatedStage};
use crate::io::{build_report, read_dataset, write_report_json};
use crate::measurement::Measurement;

/// Entry point for the `m2` binary.
pub fn run() -> AppResult<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Simulate(args) => handle_simulate(args),
        Command::Fit(args) => handle_fit(args),
    }
}

/// `RUST_LOG` wins; otherwise `info`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed when embedded.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn measurement_config_from_args(args: &SimulateArgs) -> MeasurementConfig {
    MeasurementConfig {
        axis: args.axis,
        precision: args.precision,
        samples_per_point: args.samples,
        search_samples: args.search_samples,
        warm_up: args.warm_up,
        outliers: args.outlier_mode(),
        rayleigh_mm: args.rayleigh.map(AxisPair::splat),
        raw_log: args.raw_log,
        output: args.output.clone(),
        metadata: vec![
            ("Wavelength".to_string(), format!("{} nm", args.wavelength)),
            ("Source".to_string(), "simulated bench".to_string()),
        ],
        ..MeasurementConfig::default()
    }
}

fn handle_simulate(args: SimulateArgs) -> AppResult<()> {
    let config = measurement_config_from_args(&args);

    let stage = SimulatedStage::new();
    let x = SimulatedBeam {
        wavelength_nm: args.wavelength,
        m2: args.beam_m2,
        ..SimulatedBeam::default()
    };
    let y = SimulatedBeam {
        z0_mm: stage.calibration().pulse_to_mm(SIM_Y_OFFSET_PULSES),
        ..x
    };
    let mut profiler = SimulatedProfiler::attached_to(&stage).with_beams(AxisPair::new(x, y));
    if args.noise > 0.0 {
        profiler = profiler.with_noise(args.noise, args.seed)?;
    }
    info!(zr_mm = x.rayleigh_length_mm(), "simulated beam");

    let mut bench = Measurement::new(stage, profiler);
    if let Err(e) = bench.cancellation_token().cancel_on_interrupt() {
        warn!(error = %e, "Ctrl-C will not stop the scan cleanly");
    }
    let outcome = bench.take_measurements(&config)?;
    bench.close()?;

    println!("Data written to {}", outcome.data_path.display());
    if let Some(path) = &outcome.raw_log_path {
        println!("Raw readings written to {}", path.display());
    }

    let settings = fit_settings(&args.fit, Wavelength::new(args.wavelength, args.fit.wavelength_error));
    let fits = fit_dataset(&outcome.dataset, settings)?;
    print_fits(&fits, &args.fit)
}

fn handle_fit(args: FitArgs) -> AppResult<()> {
    let file = read_dataset(&args.data)?;
    let axes = require_measured_axes(&file.dataset, &args.data)?;
    info!(rows = file.dataset.len(), ?axes, path = %args.data.display(), "data loaded");

    let settings = fit_settings(&args.fit, Wavelength::new(args.wavelength, args.fit.wavelength_error));
    let fits = fit_dataset(&file.dataset, settings)?;
    print_fits(&fits, &args.fit)
}

fn require_measured_axes(dataset: &ScanDataset, path: &Path) -> AppResult<Vec<Axis>> {
    let axes = dataset.measured_axes();
    if axes.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "{} holds no measured width on either axis",
            path.display()
        )));
    }
    Ok(axes)
}

fn fit_settings(options: &FitOptions, wavelength: Wavelength) -> FitSettings {
    FitSettings {
        model: options.model,
        backend: options.backend(),
        wavelength,
    }
}

fn fit_dataset(dataset: &ScanDataset, settings: FitSettings) -> AppResult<AxisPair<Option<BeamFitter>>> {
    let fits = fit_axes(dataset, settings)?;
    for fitter in [&fits.x, &fits.y].into_iter().flatten() {
        if let Some(result) = fitter.result().filter(|r| !r.is_converged()) {
            warn!(status = ?result.status, "fit is marginal");
        }
    }
    Ok(fits)
}

fn print_fits(fits: &AxisPair<Option<BeamFitter>>, options: &FitOptions) -> AppResult<()> {
    println!("{}", crate::report::format_fit_summary(fits)?);

    if options.residuals > 0 {
        for (label, fitter) in [("x", &fits.x), ("y", &fits.y)] {
            if let Some(fitter) = fitter {
                println!("Largest residuals ({label}):");
                println!("{}", crate::report::format_residuals(fitter, options.residuals)?);
            }
        }
    }

    if let Some(path) = &options.report {
        let report = build_report(fits, Local::now().naive_local())?;
        write_report_json(path, &report)?;
        println!("Fit report written to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OutlierMode;

    #[test]
    fn config_follows_simulate_args() {
        let cli = Cli::parse_from([
            "m2", "simulate", "--axis", "x", "-p", "50", "--rayleigh", "12.5", "--outliers", "trim-top", "--raw-log",
        ]);
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        let config = measurement_config_from_args(&args);
        assert_eq!(config.precision, 50);
        assert_eq!(config.rayleigh_mm, Some(AxisPair::splat(12.5)));
        assert_eq!(config.outliers, OutlierMode::TRIM_TOP_10);
        assert!(config.raw_log);
        assert_eq!(config.metadata[0].1, "2300 nm");
    }

    #[test]
    fn data_without_widths_is_rejected() {
        let err = require_measured_axes(&ScanDataset::new(), Path::new("empty.dat")).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(ref m) if m.contains("empty.dat")), "{err:?}");
    }
}
