//! Full caustic measurement on a stage/profiler pair.
//!
//! A run goes through fixed phases:
//!
//! 1. make the stage position trustworthy (home if dirty, range if needed)
//! 2. waist position: given, or ternary search
//! 3. Rayleigh length: given in mm, or ITP search
//! 4. scan plan with the bounds-fit fallback ladder
//! 5. move, wait, sample at every planned point
//! 6. write the data file (and the raw log when enabled)
//!
//! The cancellation token is checked before every move and every sample. On
//! cancellation the stage is stopped and the raw log flushed; rows collected so
//! far stay available through [`Measurement::dataset`].

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use crate::domain::{
    Axis, AxisPair, AxisSelection, MeasurementConfig, OutlierMode, PulseCalibration, ScanDataset, ScanRow,
    TravelRange,
};
use crate::error::{AppError, AppResult};
use crate::fit::{BeamFitter, FitSettings, fit_axes};
use crate::hardware::{BeamProfiler, IdlePolicy, LinearStage};
use crate::io::{RawLog, raw_log_path, write_dataset};
use crate::measurement::CancellationToken;
use crate::plan::{ScanPlan, WaistEstimate, plan_scan};
use crate::sampling::{AveragingSampler, SampleOutcome};
use crate::search::{ItpOptions, Probe, find_center, find_center_xy, find_rayleigh_length};

/// Everything a finished scan produced.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub dataset: ScanDataset,
    /// Waist positions in pulses, for the requested axes.
    pub centers: AxisPair<Option<i64>>,
    /// Rayleigh lengths in pulses, for the requested axes.
    pub rayleigh_pulses: AxisPair<Option<i64>>,
    pub plan: ScanPlan,
    pub metadata: Vec<(String, String)>,
    pub data_path: PathBuf,
    pub raw_log_path: Option<PathBuf>,
}

impl ScanOutcome {
    /// Fit every axis present in the dataset.
    pub fn fit(&self, settings: FitSettings) -> AppResult<AxisPair<Option<BeamFitter>>> {
        fit_axes(&self.dataset, settings)
    }
}

/// Orchestrates one stage and one profiler.
///
/// Devices are closed on drop unless [`close`](Self::close) already did.
pub struct Measurement<S: LinearStage, P: BeamProfiler> {
    stage: S,
    profiler: P,
    idle: IdlePolicy,
    cancel: CancellationToken,
    dataset: ScanDataset,
    raw_log: Option<RawLog>,
    closed: bool,
}

/// Probe that moves the real stage and averages profiler readings.
struct BenchProbe<'a, S: LinearStage, P: BeamProfiler> {
    bench: &'a mut Measurement<S, P>,
    sampler: AveragingSampler,
    samples: usize,
}

impl<S: LinearStage, P: BeamProfiler> Probe for BenchProbe<'_, S, P> {
    fn measure(&mut self, position: i64, axes: AxisSelection) -> AppResult<AxisPair<f64>> {
        let outcome = self.bench.measure_at(position, axes, self.samples, &self.sampler)?;
        Ok(outcome.widths.map(|_, w| w.map_or(f64::NAN, |w| w.mean)))
    }

    fn travel_range(&self) -> TravelRange {
        self.bench.stage.travel_range()
    }

    fn is_ranged(&self) -> bool {
        self.bench.stage.state().is_ranged()
    }

    fn find_travel_range(&mut self) -> AppResult<TravelRange> {
        self.bench.stage.find_travel_range()
    }
}

fn validate(config: &MeasurementConfig) -> AppResult<()> {
    if config.samples_per_point == 0 || config.search_samples == 0 {
        return Err(AppError::InvalidInput("sample counts must be > 0".into()));
    }
    if config.precision <= 0 {
        return Err(AppError::InvalidInput(format!(
            "precision must be positive, got {}",
            config.precision
        )));
    }
    if let Some(zr) = config.rayleigh_mm {
        for &axis in config.axis.axes() {
            let v = *zr.get(axis);
            if !(v.is_finite() && v > 0.0) {
                return Err(AppError::InvalidInput(format!(
                    "Rayleigh length must be positive, got {v} mm on {}",
                    axis.label()
                )));
            }
        }
    }
    Ok(())
}

fn only(axes: AxisSelection, values: AxisPair<i64>) -> AxisPair<Option<i64>> {
    values.map(|axis, v| axes.contains(axis).then_some(v))
}

/// Header entries for the data file; caller entries replace defaults with the
/// same key.
fn scan_metadata(
    config: &MeasurementConfig,
    calibration: PulseCalibration,
    rayleigh: AxisPair<i64>,
    plan: &ScanPlan,
    raw_log: Option<&Path>,
) -> Vec<(String, String)> {
    let axes = config.axis.axes();
    let zr = match axes {
        [axis] => format!("{} mm", calibration.pulse_to_mm(*rayleigh.get(*axis))),
        _ => axes
            .iter()
            .map(|&a| format!("{}: {} mm", a.label(), calibration.pulse_to_mm(*rayleigh.get(a))))
            .collect::<Vec<_>>()
            .join(", "),
    };

    let mut meta = vec![
        ("Rayleigh Length".to_string(), zr),
        ("Scan Geometry".to_string(), plan.geometry.to_string()),
        ("Post Processing Mode".to_string(), config.outliers.label()),
    ];
    if let OutlierMode::Spikes { threshold } = config.outliers {
        meta.push(("Threshold".to_string(), threshold.to_string()));
    }
    if let Some(path) = raw_log {
        meta.push(("Raw Data File".to_string(), path.display().to_string()));
    }

    for (key, value) in &config.metadata {
        match meta.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.clone(),
            None => meta.push((key.clone(), value.clone())),
        }
    }
    meta
}

impl<S: LinearStage, P: BeamProfiler> Measurement<S, P> {
    pub fn new(stage: S, profiler: P) -> Self {
        Self {
            stage,
            profiler,
            idle: IdlePolicy::default(),
            cancel: CancellationToken::new(),
            dataset: ScanDataset::new(),
            raw_log: None,
            closed: false,
        }
    }

    pub fn with_idle_policy(mut self, idle: IdlePolicy) -> Self {
        self.idle = idle;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// A handle that cancels this measurement.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn profiler(&self) -> &P {
        &self.profiler
    }

    /// Rows of the current (or last, possibly interrupted) scan.
    pub fn dataset(&self) -> &ScanDataset {
        &self.dataset
    }

    /// Move to `position`, wait for the stage, and average `samples` readings.
    pub fn measure_at(
        &mut self,
        position: i64,
        axes: AxisSelection,
        samples: usize,
        sampler: &AveragingSampler,
    ) -> AppResult<SampleOutcome> {
        self.cancel.check()?;
        self.stage.move_to(position)?;
        self.stage.wait_idle(&self.idle)?;

        self.cancel.check()?;
        let outcome = sampler.sample(&mut self.profiler, axes, samples)?;

        if let Some(log) = self.raw_log.as_mut() {
            let position_mm = self.stage.calibration().pulse_to_mm(position);
            log.record(position_mm, axes, &outcome.raw)?;
        }
        Ok(outcome)
    }

    /// Home a stage whose position is unreliable and range it if needed.
    ///
    /// A controller refusing to home is logged and tolerated; the range-finding
    /// that follows ends on a synced end stop either way.
    pub fn prepare_stage(&mut self) -> AppResult<()> {
        if !self.stage.state().is_reliable() {
            info!(state = ?self.stage.state(), "stage position unreliable, homing");
            match self.stage.home() {
                Ok(()) => {}
                Err(AppError::Controller(msg)) => warn!(%msg, "homing failed"),
                Err(e) => return Err(e),
            }
        }
        if !self.stage.state().is_ranged() || !self.stage.state().is_reliable() {
            let range = self.stage.find_travel_range()?;
            info!(lower = range.lower, upper = range.upper, "travel range found");
        }
        Ok(())
    }

    fn probe(&mut self, config: &MeasurementConfig) -> BenchProbe<'_, S, P> {
        BenchProbe {
            sampler: AveragingSampler::new(config.warm_up, config.outliers),
            samples: config.search_samples,
            bench: self,
        }
    }

    fn log_section(&mut self, title: &str) -> AppResult<()> {
        match self.raw_log.as_mut() {
            Some(log) => log.section(title),
            None => Ok(()),
        }
    }

    /// Search the waist position of the requested axes.
    ///
    /// The stage is prepared first. For a single axis the same position is
    /// reported on both slots.
    pub fn find_center(&mut self, config: &MeasurementConfig) -> AppResult<AxisPair<i64>> {
        self.prepare_stage()?;
        self.log_section("Finding Center")?;
        let precision = config.precision;
        let mut probe = self.probe(config);
        match config.axis {
            AxisSelection::Both => find_center_xy(&mut probe, precision, None),
            AxisSelection::X => find_center(&mut probe, Axis::X, precision, None).map(AxisPair::splat),
            AxisSelection::Y => find_center(&mut probe, Axis::Y, precision, None).map(AxisPair::splat),
        }
    }

    /// Search the Rayleigh length (pulses) of the requested axes around `centers`.
    ///
    /// # Errors
    /// `Configuration` when the travel range holds no bracket on either side.
    pub fn find_rayleigh_length(
        &mut self,
        config: &MeasurementConfig,
        centers: AxisPair<i64>,
    ) -> AppResult<AxisPair<i64>> {
        self.prepare_stage()?;
        self.log_section("Finding Rayleigh Length")?;
        let options = ItpOptions {
            precision: config.precision,
            kappa1: config.itp_kappa1,
            kappa2: config.itp_kappa2,
            n0: config.itp_n0,
            toward: None,
        };

        let mut rayleigh = AxisPair::splat(0);
        let mut probe = self.probe(config);
        for &axis in config.axis.axes() {
            let found = find_rayleigh_length(&mut probe, axis, *centers.get(axis), &options).map_err(|e| match e {
                AppError::StageOutOfRange(msg) => AppError::Configuration(format!(
                    "the travel range of the stage does not support the current configuration: {msg}"
                )),
                other => other,
            })?;
            *rayleigh.get_mut(axis) = found.rayleigh_pulses;
        }
        Ok(rayleigh)
    }

    /// Run a complete scan and write the data file.
    pub fn take_measurements(&mut self, config: &MeasurementConfig) -> AppResult<ScanOutcome> {
        validate(config)?;
        self.dataset = ScanDataset::new();

        let result = self.run(config);
        if let Err(err) = &result {
            if matches!(err, AppError::Cancelled) {
                warn!("measurement cancelled, stopping the stage");
                if let Err(e) = self.stage.stop() {
                    warn!(error = %e, "stopping the stage failed");
                }
            }
            if let Some(log) = self.raw_log.take() {
                let path = log.path().to_path_buf();
                if let Err(e) = log.finish() {
                    warn!(path = %path.display(), error = %e, "flushing the raw log failed");
                }
            }
        }
        result
    }

    fn run(&mut self, config: &MeasurementConfig) -> AppResult<ScanOutcome> {
        self.prepare_stage()?;
        let calibration = self.stage.calibration();

        if config.raw_log {
            let path = raw_log_path(&config.output);
            self.raw_log = Some(RawLog::create(&path, &config.metadata, Local::now().naive_local())?);
        }

        let centers = match config.center {
            Some(c) => c,
            None => self.find_center(config)?,
        };
        let rayleigh = match config.rayleigh_mm {
            Some(mm) => mm.map(|_, v| calibration.mm_to_pulse(v)),
            None => self.find_rayleigh_length(config, centers)?,
        };

        let estimates: Vec<WaistEstimate> = config
            .axis
            .axes()
            .iter()
            .map(|&axis| WaistEstimate {
                center: *centers.get(axis),
                rayleigh: *rayleigh.get(axis),
            })
            .collect();
        let plan = plan_scan(&estimates, self.stage.travel_range())?;

        self.log_section("Scan")?;
        let sampler = AveragingSampler::new(config.warm_up, config.outliers);
        let total = plan.points.len();
        let digits = total.to_string().len();
        for (n, &point) in plan.points.iter().enumerate() {
            info!("Point [{:>digits$}/{total}]: {point}", n + 1);
            let outcome = self.measure_at(point, AxisSelection::Both, config.samples_per_point, &sampler)?;
            self.dataset.insert(ScanRow {
                position_mm: calibration.pulse_to_mm(point),
                x: outcome.widths.x,
                y: outcome.widths.y,
            });
        }

        let raw_log_path = self.raw_log.take().map(RawLog::finish).transpose()?;
        let metadata = scan_metadata(config, calibration, rayleigh, &plan, raw_log_path.as_deref());
        write_dataset(&config.output, &self.dataset, &metadata, Local::now().naive_local())?;

        Ok(ScanOutcome {
            dataset: self.dataset.clone(),
            centers: only(config.axis, centers),
            rayleigh_pulses: only(config.axis, rayleigh),
            plan,
            metadata,
            data_path: config.output.clone(),
            raw_log_path,
        })
    }

    fn close_devices(&mut self) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(log) = self.raw_log.as_mut() {
            log.flush()?;
        }
        let stage = self.stage.close();
        let profiler = self.profiler.close();
        stage.and(profiler)
    }

    /// Close both devices, reporting the first failure.
    pub fn close(mut self) -> AppResult<()> {
        self.close_devices()
    }
}

impl<S: LinearStage, P: BeamProfiler> Drop for Measurement<S, P> {
    fn drop(&mut self) {
        if let Err(e) = self.close_devices() {
            warn!(error = %e, "closing devices failed");
        }
    }
}
