//! Simulated bench: a stage with end stops and a profiler looking at an ideal
//! Gaussian beam.
//!
//! The profiler shares the stage's position counter, so every reading is the
//! beam diameter at wherever the carriage currently is. This closes the loop
//! for the center and Rayleigh-length searches without hardware.
//!
//! Defaults reproduce the reference bench: a 200 mm stage with 100 557 pulses
//! of travel and a 2300 nm beam with `w0 = 100 µm` at `z = 0`, which has
//! `zR = 13.659 mm`. The Y waist sits 100 pulses downstream of the X waist.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use tracing::debug;

use crate::domain::{AxisPair, PulseCalibration, REFERENCE_PULSE_RANGE, REFERENCE_TRAVEL_MM, TravelRange};
use crate::error::{AppError, AppResult};
use crate::hardware::{BeamProfiler, LinearStage, PositionState};

/// Controller limits before the travel range has been measured.
pub const CONTROLLER_LIMIT: i64 = 16_777_215;
/// Offset of the simulated Y waist from the X waist, in pulses.
pub const SIM_Y_OFFSET_PULSES: i64 = 100;

/// Stage with a shared position counter and physical end stops.
#[derive(Debug)]
pub struct SimulatedStage {
    position: Arc<AtomicI64>,
    limits: TravelRange,
    end_stops: TravelRange,
    travel_mm: f64,
    calibration: PulseCalibration,
    state: PositionState,
    powered: bool,
    jogging: Option<bool>,
    busy_polls: usize,
    busy_remaining: usize,
    moves: usize,
}

impl SimulatedStage {
    pub fn new() -> Self {
        let half = (REFERENCE_PULSE_RANGE - 1) / 2;
        Self {
            position: Arc::new(AtomicI64::new(0)),
            limits: TravelRange::new(-CONTROLLER_LIMIT, CONTROLLER_LIMIT),
            end_stops: TravelRange::new(-half, half),
            travel_mm: REFERENCE_TRAVEL_MM,
            calibration: PulseCalibration::reference(),
            state: PositionState::Homed,
            powered: true,
            jogging: None,
            busy_polls: 0,
            busy_remaining: 0,
            moves: 0,
        }
    }

    /// Report busy for `polls` calls to `is_busy` after every move.
    pub fn with_busy_polls(mut self, polls: usize) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Move the end stops, e.g. to model a stage mounted off-center.
    pub fn with_end_stops(mut self, end_stops: TravelRange) -> Self {
        self.end_stops = end_stops;
        self
    }

    pub fn with_state(mut self, state: PositionState) -> Self {
        self.state = state;
        self
    }

    /// Shared position counter, for attaching a simulated profiler.
    pub fn position_handle(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.position)
    }

    /// Number of completed `move_to` calls.
    pub fn move_count(&self) -> usize {
        self.moves
    }

    /// Let the motor spin freely; the position is lost until homed.
    pub fn release_motor(&mut self) {
        self.powered = false;
        self.state = self.state.after_release();
    }

    pub fn power_motor(&mut self) {
        self.powered = true;
    }

    fn carriage(&self) -> i64 {
        self.position.load(Ordering::SeqCst)
    }

    fn set_carriage(&mut self, target: i64) {
        let clamped = target.clamp(self.end_stops.lower, self.end_stops.upper);
        if clamped != target {
            debug!(target, clamped, "carriage stopped at end stop");
        }
        self.position.store(clamped, Ordering::SeqCst);
    }
}

impl Default for SimulatedStage {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearStage for SimulatedStage {
    fn move_to(&mut self, position: i64) -> AppResult<()> {
        if !self.limits.contains(position) {
            return Err(AppError::PositionOutOfBounds {
                position,
                lower: self.limits.lower,
                upper: self.limits.upper,
            });
        }
        self.set_carriage(position);
        self.busy_remaining = self.busy_polls;
        self.moves += 1;
        Ok(())
    }

    fn is_busy(&mut self) -> AppResult<bool> {
        if self.busy_remaining == 0 {
            return Ok(false);
        }
        if self.busy_remaining != usize::MAX {
            self.busy_remaining -= 1;
        }
        Ok(true)
    }

    fn home(&mut self) -> AppResult<()> {
        self.jogging = None;
        self.set_carriage(0);
        self.state = self.state.after_home();
        Ok(())
    }

    fn find_travel_range(&mut self) -> AppResult<TravelRange> {
        self.jog(true)?;
        self.stop()?;
        let upper = self.carriage();
        self.jog(false)?;
        self.stop()?;
        let lower = self.carriage();

        self.limits = TravelRange::new(lower.min(upper), lower.max(upper));
        self.calibration = PulseCalibration::from_travel(self.travel_mm, self.limits.span() + 1);
        self.state = self.state.after_range();
        Ok(self.limits)
    }

    fn jog(&mut self, positive: bool) -> AppResult<()> {
        self.jogging = Some(positive);
        self.state = self.state.after_jog();
        Ok(())
    }

    fn sync_position(&mut self) -> AppResult<i64> {
        let pos = self.carriage();
        if pos < self.limits.lower {
            self.limits.lower = pos;
        } else if pos > self.limits.upper {
            self.limits.upper = pos;
        }
        self.state = self.state.after_sync(self.powered);
        Ok(pos)
    }

    fn stop(&mut self) -> AppResult<()> {
        if let Some(positive) = self.jogging.take() {
            let stop = if positive { self.end_stops.upper } else { self.end_stops.lower };
            self.set_carriage(stop);
        }
        self.busy_remaining = 0;
        // Only a stage already flagged dirty is re-synced.
        if matches!(self.state, PositionState::Dirty { .. }) {
            self.sync_position()?;
        }
        Ok(())
    }

    fn position(&self) -> AppResult<i64> {
        if !self.state.is_reliable() {
            return Err(AppError::PositionDirty);
        }
        Ok(self.carriage())
    }

    fn travel_range(&self) -> TravelRange {
        self.limits
    }

    fn calibration(&self) -> PulseCalibration {
        self.calibration
    }

    fn state(&self) -> PositionState {
        self.state
    }
}

/// Ideal embedded-Gaussian beam along one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedBeam {
    pub w0_um: f64,
    pub z0_mm: f64,
    pub wavelength_nm: f64,
    pub m2: f64,
}

impl SimulatedBeam {
    pub fn radius_um(&self, z_mm: f64) -> f64 {
        crate::models::beam_radius(
            crate::domain::FitModel::M2,
            z_mm,
            &[self.w0_um, self.z0_mm, self.m2],
            self.wavelength_nm,
        )
    }

    pub fn rayleigh_length_mm(&self) -> f64 {
        crate::measurement::rayleigh_length_mm(self.w0_um, self.wavelength_nm, self.m2)
    }
}

impl Default for SimulatedBeam {
    fn default() -> Self {
        Self {
            w0_um: 100.0,
            z0_mm: 0.0,
            wavelength_nm: 2300.0,
            m2: 1.0,
        }
    }
}

/// Profiler that reports `2·ω(z)` of a simulated beam at the stage position.
#[derive(Debug)]
pub struct SimulatedProfiler {
    position: Arc<AtomicI64>,
    calibration: PulseCalibration,
    beams: AxisPair<SimulatedBeam>,
    noise: Option<(StdRng, Normal<f64>)>,
    stale_frames: usize,
    stale_factor: f64,
    stale_remaining: usize,
    last_position: Option<i64>,
    reads: usize,
}

impl SimulatedProfiler {
    /// Attach to `stage` with the default beam on both axes, Y waist offset by
    /// [`SIM_Y_OFFSET_PULSES`].
    pub fn attached_to(stage: &SimulatedStage) -> Self {
        let calibration = stage.calibration();
        let x = SimulatedBeam::default();
        let y = SimulatedBeam {
            z0_mm: calibration.pulse_to_mm(SIM_Y_OFFSET_PULSES),
            ..x
        };
        Self {
            position: stage.position_handle(),
            calibration,
            beams: AxisPair::new(x, y),
            noise: None,
            stale_frames: 0,
            stale_factor: 1.0,
            stale_remaining: 0,
            last_position: None,
            reads: 0,
        }
    }

    pub fn with_beams(mut self, beams: AxisPair<SimulatedBeam>) -> Self {
        self.beams = beams;
        self
    }

    /// Add zero-mean Gaussian noise with standard deviation `sigma_um`.
    pub fn with_noise(mut self, sigma_um: f64, seed: u64) -> AppResult<Self> {
        let normal = Normal::new(0.0, sigma_um)
            .map_err(|e| AppError::InvalidInput(format!("noise distribution: {e}")))?;
        self.noise = Some((StdRng::seed_from_u64(seed), normal));
        Ok(self)
    }

    /// After every position change, the first `frames` readings are scaled by
    /// `factor`, imitating frames still in flight from the previous position.
    pub fn with_stale_frames(mut self, frames: usize, factor: f64) -> Self {
        self.stale_frames = frames;
        self.stale_factor = factor;
        self
    }

    pub fn beams(&self) -> &AxisPair<SimulatedBeam> {
        &self.beams
    }

    pub fn read_count(&self) -> usize {
        self.reads
    }
}

impl BeamProfiler for SimulatedProfiler {
    fn read_single(&mut self) -> AppResult<AxisPair<f64>> {
        let pos = self.position.load(Ordering::SeqCst);
        if self.last_position != Some(pos) {
            self.last_position = Some(pos);
            self.stale_remaining = self.stale_frames;
        }

        let z_mm = self.calibration.pulse_to_mm(pos);
        let mut diameters = self.beams.map(|_, beam| 2.0 * beam.radius_um(z_mm));

        if self.stale_remaining > 0 {
            self.stale_remaining -= 1;
            diameters = diameters.map(|_, d| d * self.stale_factor);
        }
        if let Some((rng, normal)) = self.noise.as_mut() {
            diameters = diameters.map(|_, d| d + normal.sample(rng));
        }

        self.reads += 1;
        Ok(diameters)
    }
}
